use std::fmt;

use semval::{context::Context as ValidationContext, prelude::*};
use thiserror::Error;

use crate::repos::RepoError;

use super::domain::{
    accounts::AccountInvalidity, categories::CategoryInvalidity,
    statistics::QueryInvalidity, tags::TagInvalidity, transactions::TransactionInvalidity,
    transactions::TransactionRole,
};

/// The kinds of records a request may reference.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Resource {
    Account,
    Category,
    Tag,
    Transaction,
    User,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Account => "account",
            Self::Category => "transaction category",
            Self::Tag => "transaction tag",
            Self::Transaction => "transaction",
            Self::User => "user",
        };

        f.write_str(name)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LedgerInvalidity {
    Account(AccountInvalidity),
    Category(CategoryInvalidity),
    Query(QueryInvalidity),
    Tag(TagInvalidity),
    Transaction(TransactionInvalidity),
}

impl From<AccountInvalidity> for LedgerInvalidity {
    fn from(invalidity: AccountInvalidity) -> Self {
        Self::Account(invalidity)
    }
}

impl From<CategoryInvalidity> for LedgerInvalidity {
    fn from(invalidity: CategoryInvalidity) -> Self {
        Self::Category(invalidity)
    }
}

impl From<QueryInvalidity> for LedgerInvalidity {
    fn from(invalidity: QueryInvalidity) -> Self {
        Self::Query(invalidity)
    }
}

impl From<TagInvalidity> for LedgerInvalidity {
    fn from(invalidity: TagInvalidity) -> Self {
        Self::Tag(invalidity)
    }
}

impl From<TransactionInvalidity> for LedgerInvalidity {
    fn from(invalidity: TransactionInvalidity) -> Self {
        Self::Transaction(invalidity)
    }
}

#[derive(Debug, Error)]
pub enum LedgerError {
    /// The request is malformed or contradicts itself.
    #[error("invalid request: {0:?}")]
    Invalid(ValidationContext<LedgerInvalidity>),

    /// A referenced record does not exist or belongs to someone else.
    #[error("{0} not found")]
    NotFound(Resource),

    /// The transaction lies outside of the user's edit scope.
    #[error("transaction time is outside of the editable window")]
    EditWindowViolation,

    /// The operation is not allowed on this kind of transaction row.
    #[error("operation is not allowed on {0:?} rows")]
    WrongType(TransactionRole),

    /// The requested state equals the current state.
    #[error("nothing will be updated")]
    NoOp,

    /// A password re-check for a destructive operation failed.
    #[error("incorrect password")]
    IncorrectPassword,

    #[error("too many query items, at most {max} are allowed")]
    TooManyItems { max: usize },

    #[error("no valid query items")]
    EmptyItems,

    #[error(transparent)]
    OperationFailed(#[from] anyhow::Error),
}

impl LedgerError {
    /// Build a validation error holding a single invalidity.
    pub fn invalid(invalidity: impl Into<LedgerInvalidity>) -> Self {
        Self::Invalid(ValidationContext::new().invalidate(invalidity.into()))
    }

    /// Validate `target`, reporting its invalidities as ledger invalidities.
    pub fn check<T, F>(target: &T, map: F) -> LedgerResult<()>
    where
        T: Validate,
        F: Fn(T::Invalidity) -> LedgerInvalidity,
    {
        let result: ValidationResult<LedgerInvalidity> =
            ValidationContext::new().validate_with(target, map).into();

        Ok(result?)
    }

    /// Build a validation error from the invalidities of a failed
    /// conversion.
    pub fn from_context<V, F>(context: ValidationContext<V>, map: F) -> Self
    where
        V: semval::Invalidity,
        F: Fn(V) -> LedgerInvalidity,
    {
        Self::Invalid(
            context
                .into_iter()
                .fold(ValidationContext::new(), |merged, invalidity| {
                    merged.invalidate(map(invalidity))
                }),
        )
    }

    /// Collect the invalidities carried by a validation error. Other errors
    /// yield nothing.
    pub fn invalidities(self) -> Vec<LedgerInvalidity> {
        match self {
            Self::Invalid(context) => context.into_iter().collect(),
            _ => Vec::new(),
        }
    }
}

impl From<ValidationContext<LedgerInvalidity>> for LedgerError {
    fn from(context: ValidationContext<LedgerInvalidity>) -> Self {
        Self::Invalid(context)
    }
}

impl From<RepoError> for LedgerError {
    fn from(error: RepoError) -> Self {
        match error {
            RepoError::NotFound(resource) => Self::NotFound(resource),
            RepoError::Duplicate(Resource::Tag) => Self::invalid(TagInvalidity::DuplicateName),
            RepoError::Duplicate(resource) => Self::OperationFailed(anyhow::anyhow!(
                "unexpected duplicate {}",
                resource
            )),
            RepoError::InUse(Resource::Account) => Self::invalid(AccountInvalidity::InUse),
            RepoError::InUse(Resource::Category) => Self::invalid(CategoryInvalidity::InUse),
            RepoError::InUse(resource) => Self::OperationFailed(anyhow::anyhow!(
                "unexpected reference to {}",
                resource
            )),
            RepoError::TooManyTransactionsInOneSecond => {
                Self::invalid(TransactionInvalidity::TooManyTransactionsInOneSecond)
            }
            RepoError::Other(error) => Self::OperationFailed(error),
        }
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;
