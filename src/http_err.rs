use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::error;

/// An error surfaced to an API client.
#[derive(Debug, PartialEq)]
pub enum ApiError {
    /// The request cannot be served as sent. Each entry describes one
    /// problem with it.
    BadRequest(Vec<String>),
    Forbidden(String),
    NotFound(String),
    InternalServerError,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(vec![message.into()])
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::InternalServerError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match self {
            Self::BadRequest(errors) => ErrorRep {
                message: "The request is invalid.".to_owned(),
                errors,
            },
            Self::Forbidden(message) | Self::NotFound(message) => ErrorRep {
                message,
                errors: vec![],
            },
            Self::InternalServerError => ErrorRep {
                message: "Internal server error.".to_owned(),
                errors: vec![],
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(error: anyhow::Error) -> Self {
        error!(?error, "Received error.");

        Self::InternalServerError
    }
}

pub type ApiResponse<T> = Result<T, ApiError>;

#[derive(Serialize)]
pub struct ErrorRep {
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn statuses() {
        assert_eq!(
            StatusCode::BAD_REQUEST,
            ApiError::bad_request("nope").status()
        );
        assert_eq!(
            StatusCode::FORBIDDEN,
            ApiError::Forbidden("locked".to_owned()).status()
        );
        assert_eq!(
            StatusCode::NOT_FOUND,
            ApiError::NotFound("gone".to_owned()).status()
        );
        assert_eq!(
            StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::from(anyhow::anyhow!("boom")).status()
        );
    }
}
