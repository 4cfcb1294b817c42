use std::convert::TryFrom;

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use tracing::{error, info};

use crate::{
    authentication::Identity,
    client_ip::ClientIp,
    http_err::{ApiError, ApiResponse},
    server::AppState,
};

use super::{
    domain::users::PreferencesUpdate,
    services::{UserError, UserService},
};

pub mod reps;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", post(create_user))
        .route("/me", get(get_me))
        .route("/me/preferences", put(update_preferences))
}

async fn create_user(
    ClientIp(client_ip): ClientIp,
    State(users): State<UserService>,
    Json(request): Json<reps::NewUserRequest>,
) -> ApiResponse<(StatusCode, Json<reps::UserResponse>)> {
    let user = users.register(request.into()).await?;

    info!(user_id = %user.id, %client_ip, "Accepted registration.");

    Ok((StatusCode::CREATED, Json((&user).into())))
}

async fn get_me(
    identity: Identity,
    State(users): State<UserService>,
) -> ApiResponse<Json<reps::UserResponse>> {
    let user = users.get_user(identity.user_id).await?;

    Ok(Json((&user).into()))
}

async fn update_preferences(
    identity: Identity,
    State(users): State<UserService>,
    Json(request): Json<reps::PreferencesRequest>,
) -> ApiResponse<Json<reps::UserResponse>> {
    let update = PreferencesUpdate::try_from(request)?;
    let user = users.update_preferences(identity.user_id, update).await?;

    Ok(Json((&user).into()))
}

impl From<UserError> for ApiError {
    fn from(error: UserError) -> Self {
        match error {
            UserError::InvalidUser(context) => {
                Self::BadRequest(context.into_iter().map(reps::describe_new_user).collect())
            }
            UserError::InvalidPreferences(context) => {
                Self::BadRequest(context.into_iter().map(reps::describe_preferences).collect())
            }
            UserError::DuplicateEmail => {
                Self::bad_request("A user with this email address already exists.")
            }
            UserError::DefaultAccountNotFound => {
                Self::NotFound("No account found with the provided ID.".to_owned())
            }
            UserError::NotFound => Self::NotFound("No user found with the provided ID.".to_owned()),
            UserError::NoOp => Self::bad_request("Nothing would be changed."),
            UserError::Other(error) => {
                error!(?error, "User operation failed.");

                Self::InternalServerError
            }
        }
    }
}
