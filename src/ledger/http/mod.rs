use axum::{
    routing::{delete, get, put},
    Router,
};
use tracing::error;

use crate::{http_err::ApiError, server::AppState};

use super::{domain::transactions::TransactionRole, errors::LedgerError};

mod handlers;
pub mod reps;

use handlers::*;

pub fn routes() -> Router<AppState> {
    Router::new()
        .nest("/accounts", account_routes())
        .nest("/transaction-categories", category_routes())
        .nest("/transaction-tags", tag_routes())
        .nest("/transactions", transaction_routes())
        .route("/data", delete(clear_data))
}

fn account_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_accounts).post(create_account))
        .route("/display-orders", put(move_accounts))
        .route(
            "/:account_id",
            get(get_account).put(modify_account).delete(delete_account),
        )
        .route("/:account_id/hidden", put(hide_account))
}

fn category_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_categories).post(create_category))
        .route("/:category_id", delete(delete_category))
        .route("/:category_id/hidden", put(hide_category))
}

fn tag_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_tags).post(create_tag))
        .route("/:tag_id", put(rename_tag).delete(delete_tag))
}

fn transaction_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_transactions).post(create_transaction))
        .route("/count", get(count_transactions))
        .route("/months/:year/:month", get(list_transactions_in_month))
        .route("/totals", get(total_income_and_expense))
        .route("/statistics", get(transaction_statistics))
        .route("/trends", get(transaction_trends))
        .route("/amounts", get(transaction_amounts))
        .route(
            "/:transaction_id",
            get(get_transaction)
                .put(modify_transaction)
                .delete(delete_transaction),
        )
}

impl From<LedgerError> for ApiError {
    fn from(error: LedgerError) -> Self {
        match error {
            LedgerError::Invalid(context) => {
                Self::BadRequest(context.into_iter().map(reps::describe).collect())
            }
            LedgerError::NotFound(resource) => {
                Self::NotFound(format!("No {} found with the provided ID.", resource))
            }
            LedgerError::EditWindowViolation => Self::Forbidden(
                "The transaction is outside of the range you allow to be edited.".to_owned(),
            ),
            LedgerError::WrongType(TransactionRole::TransferIn) => Self::bad_request(
                "The incoming side of a transfer cannot be changed, change the transfer instead.",
            ),
            LedgerError::WrongType(role) => {
                Self::bad_request(format!("The operation is not allowed on {:?} rows.", role))
            }
            LedgerError::NoOp => Self::bad_request("Nothing would be changed."),
            LedgerError::IncorrectPassword => Self::bad_request("The password is incorrect."),
            LedgerError::TooManyItems { max } => {
                Self::bad_request(format!("At most {} query items are allowed.", max))
            }
            LedgerError::EmptyItems => Self::bad_request("At least one query item is required."),
            LedgerError::OperationFailed(error) => {
                error!(?error, "Ledger operation failed.");

                Self::InternalServerError
            }
        }
    }
}

#[cfg(test)]
mod test {
    use crate::ledger::{domain::tags::TagInvalidity, errors::Resource};

    use super::*;

    #[test]
    fn ledger_errors_map_to_client_errors() {
        assert_eq!(
            ApiError::BadRequest(vec!["Tag names may not be blank.".to_owned()]),
            ApiError::from(LedgerError::invalid(TagInvalidity::NameRequired))
        );
        assert_eq!(
            ApiError::NotFound("No transaction tag found with the provided ID.".to_owned()),
            ApiError::from(LedgerError::NotFound(Resource::Tag))
        );
        assert!(matches!(
            ApiError::from(LedgerError::EditWindowViolation),
            ApiError::Forbidden(_)
        ));
        assert!(matches!(
            ApiError::from(LedgerError::WrongType(TransactionRole::TransferIn)),
            ApiError::BadRequest(_)
        ));
        assert_eq!(
            ApiError::InternalServerError,
            ApiError::from(LedgerError::OperationFailed(anyhow::anyhow!("db down")))
        );
    }
}
