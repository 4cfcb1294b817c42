//! Who is making a request.
//!
//! Authentication itself happens upstream. The gateway in front of the
//! service forwards the id of the authenticated user and the client's
//! timezone as headers.

use async_trait::async_trait;
use axum::{
    extract::FromRequestParts,
    http::{request::Parts, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::debug;
use uuid::Uuid;

use crate::ledger::domain::transactions::{MAX_UTC_OFFSET, MIN_UTC_OFFSET};

pub const USER_ID_HEADER: &str = "x-user-id";
pub const TIMEZONE_OFFSET_HEADER: &str = "x-timezone-offset";

/// The authenticated user and the timezone their client runs in.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Identity {
    pub user_id: Uuid,
    /// The client's UTC offset in minutes.
    pub client_utc_offset: i16,
}

impl Identity {
    fn from_headers(headers: &HeaderMap) -> Result<Self, IdentityError> {
        let raw_user_id = headers
            .get(USER_ID_HEADER)
            .ok_or(IdentityError::Missing)?
            .to_str()
            .map_err(|_| IdentityError::InvalidUser)?;
        let user_id = Uuid::parse_str(raw_user_id.trim()).map_err(|_| IdentityError::InvalidUser)?;

        let client_utc_offset = match headers.get(TIMEZONE_OFFSET_HEADER) {
            None => 0,
            Some(value) => value
                .to_str()
                .ok()
                .and_then(|raw| raw.trim().parse::<i16>().ok())
                .filter(|offset| (MIN_UTC_OFFSET..=MAX_UTC_OFFSET).contains(offset))
                .ok_or(IdentityError::InvalidTimezoneOffset)?,
        };

        Ok(Self {
            user_id,
            client_utc_offset,
        })
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for Identity
where
    S: Send + Sync,
{
    type Rejection = IdentityError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Self::from_headers(&parts.headers).map_err(|error| {
            debug!(?error, "Cannot identify the caller of a request.");

            error
        })
    }
}

#[derive(Debug, Eq, PartialEq)]
pub enum IdentityError {
    Missing,
    InvalidUser,
    InvalidTimezoneOffset,
}

impl IntoResponse for IdentityError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::Missing => (StatusCode::UNAUTHORIZED, "No authenticated user provided."),
            Self::InvalidUser => (StatusCode::UNAUTHORIZED, "Invalid authenticated user."),
            Self::InvalidTimezoneOffset => (
                StatusCode::BAD_REQUEST,
                "Client timezone offset is invalid.",
            ),
        };

        let body = Json(json!({
            "message": message,
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod test {
    use axum::http::HeaderValue;

    use super::*;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for &(name, value) in pairs {
            headers.insert(name, HeaderValue::from_static(value));
        }

        headers
    }

    #[test]
    fn offset_defaults_to_utc() {
        let identity = Identity::from_headers(&headers(&[(
            USER_ID_HEADER,
            "67e55044-10b1-426f-9247-bb680e5fe0c8",
        )]))
        .expect("identity is read");

        assert_eq!(0, identity.client_utc_offset);
    }

    #[test]
    fn offset_is_range_checked() {
        let valid = Identity::from_headers(&headers(&[
            (USER_ID_HEADER, "67e55044-10b1-426f-9247-bb680e5fe0c8"),
            (TIMEZONE_OFFSET_HEADER, "-300"),
        ]))
        .expect("identity is read");
        assert_eq!(-300, valid.client_utc_offset);

        let invalid = Identity::from_headers(&headers(&[
            (USER_ID_HEADER, "67e55044-10b1-426f-9247-bb680e5fe0c8"),
            (TIMEZONE_OFFSET_HEADER, "900"),
        ]));
        assert_eq!(Err(IdentityError::InvalidTimezoneOffset), invalid);
    }

    #[test]
    fn user_is_required() {
        assert_eq!(
            Err(IdentityError::Missing),
            Identity::from_headers(&HeaderMap::new())
        );
        assert_eq!(
            Err(IdentityError::InvalidUser),
            Identity::from_headers(&headers(&[(USER_ID_HEADER, "not-a-uuid")]))
        );
    }
}
