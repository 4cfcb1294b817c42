//! Persistence of ledger and user data.
//!
//! Every repository is a trait so services can be driven by either the
//! Postgres implementation or the in-memory [`MemoryStore`].

mod accounts;
mod categories;
mod memory;
mod tags;
mod transactions;
mod users;

use thiserror::Error;

use crate::ledger::errors::Resource;

pub use accounts::{AccountRepo, DynAccountRepo};
pub use categories::{CategoryRepo, DynCategoryRepo};
pub use memory::MemoryStore;
pub use tags::{DynTagRepo, TagChanges, TagRepo};
pub use transactions::{DynTransactionRepo, TransactionQuery, TransactionRepo};
pub use users::{DynUserRepo, UserRepo};

/// Postgres error code for unique constraint violations.
const UNIQUE_VIOLATION: &str = "23505";

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("{0} not found")]
    NotFound(Resource),

    #[error("duplicate {0}")]
    Duplicate(Resource),

    /// Other rows still reference the record.
    #[error("{0} is still in use")]
    InUse(Resource),

    #[error("the user already recorded the maximum number of transactions in this second")]
    TooManyTransactionsInOneSecond,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<sqlx::Error> for RepoError {
    fn from(error: sqlx::Error) -> Self {
        Self::Other(error.into())
    }
}

pub type RepoResult<T> = Result<T, RepoError>;

/// Map a unique constraint violation to [`RepoError::Duplicate`].
fn duplicate_as(resource: Resource) -> impl FnOnce(sqlx::Error) -> RepoError {
    move |error| match error {
        sqlx::Error::Database(db_error)
            if db_error.code().unwrap_or_default() == UNIQUE_VIOLATION =>
        {
            RepoError::Duplicate(resource)
        }
        other => other.into(),
    }
}
