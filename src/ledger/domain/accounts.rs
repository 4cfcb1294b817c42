use std::convert::TryFrom;

use chrono::{DateTime, Utc};
use semval::prelude::*;
use uuid::Uuid;

/// The currency recorded on container accounts. Containers never hold money
/// themselves, their sub-accounts do.
pub const CONTAINER_CURRENCY: &str = "---";

const MAX_NAME_LENGTH: usize = 64;
const MAX_COMMENT_LENGTH: usize = 255;
const MAX_BALANCE: i64 = 99_999_999_999;

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum AccountType {
    /// A leaf account holding a balance in one currency.
    Single,
    /// A container grouping several single accounts.
    MultiSubAccounts,
}

impl AccountType {
    pub fn code(self) -> i16 {
        match self {
            Self::Single => 1,
            Self::MultiSubAccounts => 2,
        }
    }
}

impl TryFrom<i16> for AccountType {
    type Error = i16;

    fn try_from(code: i16) -> Result<Self, Self::Error> {
        match code {
            1 => Ok(Self::Single),
            2 => Ok(Self::MultiSubAccounts),
            other => Err(other),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum AccountCategory {
    Cash,
    Checking,
    CreditCard,
    Virtual,
    Debt,
    Receivables,
    Investment,
}

impl AccountCategory {
    pub fn code(self) -> i16 {
        match self {
            Self::Cash => 1,
            Self::Checking => 2,
            Self::CreditCard => 3,
            Self::Virtual => 4,
            Self::Debt => 5,
            Self::Receivables => 6,
            Self::Investment => 7,
        }
    }
}

impl TryFrom<i16> for AccountCategory {
    type Error = i16;

    fn try_from(code: i16) -> Result<Self, Self::Error> {
        match code {
            1 => Ok(Self::Cash),
            2 => Ok(Self::Checking),
            3 => Ok(Self::CreditCard),
            4 => Ok(Self::Virtual),
            5 => Ok(Self::Debt),
            6 => Ok(Self::Receivables),
            7 => Ok(Self::Investment),
            other => Err(other),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Account {
    pub id: Uuid,
    pub user_id: Uuid,
    /// The container this account belongs to. Top-level accounts have none.
    pub parent_id: Option<Uuid>,
    pub account_type: AccountType,
    pub category: AccountCategory,
    pub name: String,
    pub icon: i64,
    pub color: String,
    pub currency: String,
    /// Balance in minor units.
    pub balance: i64,
    pub display_order: i32,
    pub hidden: bool,
    pub comment: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    pub fn is_container(&self) -> bool {
        self.account_type == AccountType::MultiSubAccounts
    }

    /// Produce a copy of the account with the user editable fields replaced.
    pub fn with_changes(&self, changes: &AccountChanges, now: DateTime<Utc>) -> Self {
        Self {
            name: changes.name.clone(),
            category: changes.category,
            icon: changes.icon,
            color: changes.color.clone(),
            comment: changes.comment.clone(),
            hidden: changes.hidden,
            updated_at: now,
            ..self.clone()
        }
    }

    /// Whether applying `changes` would leave the account as it is.
    pub fn is_unchanged_by(&self, changes: &AccountChanges) -> bool {
        self.name == changes.name
            && self.category == changes.category
            && self.icon == changes.icon
            && self.color == changes.color
            && self.comment == changes.comment
            && self.hidden == changes.hidden
    }
}

/// An account together with its sub-accounts.
#[derive(Clone, Debug, PartialEq)]
pub struct AccountTree {
    pub account: Account,
    pub sub_accounts: Vec<Account>,
}

impl AccountTree {
    /// Arrange a flat list of accounts into trees ordered by display order.
    /// Sub-accounts whose container is not in the list are dropped.
    pub fn build(mut accounts: Vec<Account>) -> Vec<AccountTree> {
        accounts.sort_by(|a, b| {
            (a.category, a.display_order, a.id).cmp(&(b.category, b.display_order, b.id))
        });

        let (top_level, children): (Vec<_>, Vec<_>) =
            accounts.into_iter().partition(|a| a.parent_id.is_none());

        top_level
            .into_iter()
            .map(|account| {
                let sub_accounts = children
                    .iter()
                    .filter(|child| child.parent_id == Some(account.id))
                    .cloned()
                    .collect();

                AccountTree {
                    account,
                    sub_accounts,
                }
            })
            .collect()
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AccountInvalidity {
    UnknownType,
    UnknownCategory,
    NameRequired,
    NameTooLong(usize),
    CommentTooLong(usize),
    BalanceOutOfRange,
    /// The currency is not a three letter code.
    InvalidCurrency,
    /// A single account used the container currency.
    ContainerCurrencyNotAllowed,
    /// A container did not use the container currency.
    ContainerCurrencyRequired,
    ContainerBalanceNotAllowed,
    SubAccountsNotAllowed,
    SubAccountsRequired,
    SubAccountMustBeSingle,
    SubAccountCategoryMismatch,
    /// Transactions still reference the account.
    InUse,
    /// Accounts moved together must share their container and category.
    MixedDisplayGroups,
}

#[derive(Clone, Debug, PartialEq)]
pub struct NewAccountData {
    pub name: String,
    pub account_type: AccountType,
    pub category: AccountCategory,
    pub icon: i64,
    pub color: String,
    pub currency: String,
    pub balance: i64,
    pub comment: String,
    pub sub_accounts: Vec<NewAccountData>,
}

impl NewAccountData {
    fn check_common(
        &self,
        context: ValidationContext<AccountInvalidity>,
    ) -> ValidationContext<AccountInvalidity> {
        let name_length = self.name.trim().chars().count();

        context
            .invalidate_if(name_length == 0, AccountInvalidity::NameRequired)
            .invalidate_if(
                name_length > MAX_NAME_LENGTH,
                AccountInvalidity::NameTooLong(MAX_NAME_LENGTH),
            )
            .invalidate_if(
                self.comment.chars().count() > MAX_COMMENT_LENGTH,
                AccountInvalidity::CommentTooLong(MAX_COMMENT_LENGTH),
            )
            .invalidate_if(
                self.balance.abs() > MAX_BALANCE,
                AccountInvalidity::BalanceOutOfRange,
            )
    }

    fn check_single(
        &self,
        context: ValidationContext<AccountInvalidity>,
    ) -> ValidationContext<AccountInvalidity> {
        let uses_container_currency = self.currency == CONTAINER_CURRENCY;

        self.check_common(context)
            .invalidate_if(
                uses_container_currency,
                AccountInvalidity::ContainerCurrencyNotAllowed,
            )
            .invalidate_if(
                !uses_container_currency && !is_currency_code(&self.currency),
                AccountInvalidity::InvalidCurrency,
            )
            .invalidate_if(
                !self.sub_accounts.is_empty(),
                AccountInvalidity::SubAccountsNotAllowed,
            )
    }

    /// Turn validated data into the account rows to persist.
    ///
    /// # Arguments
    ///
    /// * `user_id` - The owner of the new accounts.
    /// * `display_order` - The position of the top-level account among its
    ///   siblings.
    /// * `now` - The creation time.
    ///
    /// # Returns
    ///
    /// The top-level account followed by its sub-accounts, in the order they
    /// were provided.
    pub fn into_accounts(
        self,
        user_id: Uuid,
        display_order: i32,
        now: DateTime<Utc>,
    ) -> (Account, Vec<Account>) {
        let main = Account {
            id: Uuid::new_v4(),
            user_id,
            parent_id: None,
            account_type: self.account_type,
            category: self.category,
            name: self.name.trim().to_owned(),
            icon: self.icon,
            color: self.color,
            currency: self.currency,
            balance: self.balance,
            display_order,
            hidden: false,
            comment: self.comment,
            created_at: now,
            updated_at: now,
        };

        let subs = self
            .sub_accounts
            .into_iter()
            .enumerate()
            .map(|(index, sub)| Account {
                id: Uuid::new_v4(),
                user_id,
                parent_id: Some(main.id),
                account_type: AccountType::Single,
                category: main.category,
                name: sub.name.trim().to_owned(),
                icon: sub.icon,
                color: sub.color,
                currency: sub.currency,
                balance: sub.balance,
                display_order: index as i32 + 1,
                hidden: false,
                comment: sub.comment,
                created_at: now,
                updated_at: now,
            })
            .collect();

        (main, subs)
    }
}

impl Validate for NewAccountData {
    type Invalidity = AccountInvalidity;

    fn validate(&self) -> ValidationResult<Self::Invalidity> {
        match self.account_type {
            AccountType::Single => self.check_single(ValidationContext::new()).into(),
            AccountType::MultiSubAccounts => {
                let mut context = self
                    .check_common(ValidationContext::new())
                    .invalidate_if(
                        self.currency != CONTAINER_CURRENCY,
                        AccountInvalidity::ContainerCurrencyRequired,
                    )
                    .invalidate_if(self.balance != 0, AccountInvalidity::ContainerBalanceNotAllowed)
                    .invalidate_if(
                        self.sub_accounts.is_empty(),
                        AccountInvalidity::SubAccountsRequired,
                    );

                for sub in &self.sub_accounts {
                    context = sub
                        .check_single(context)
                        .invalidate_if(
                            sub.account_type != AccountType::Single,
                            AccountInvalidity::SubAccountMustBeSingle,
                        )
                        .invalidate_if(
                            sub.category != self.category,
                            AccountInvalidity::SubAccountCategoryMismatch,
                        );
                }

                context.into()
            }
        }
    }
}

/// The user editable fields of an existing account.
#[derive(Clone, Debug, PartialEq)]
pub struct AccountChanges {
    pub name: String,
    pub category: AccountCategory,
    pub icon: i64,
    pub color: String,
    pub comment: String,
    pub hidden: bool,
}

impl Validate for AccountChanges {
    type Invalidity = AccountInvalidity;

    fn validate(&self) -> ValidationResult<Self::Invalidity> {
        let name_length = self.name.trim().chars().count();

        ValidationContext::new()
            .invalidate_if(name_length == 0, AccountInvalidity::NameRequired)
            .invalidate_if(
                name_length > MAX_NAME_LENGTH,
                AccountInvalidity::NameTooLong(MAX_NAME_LENGTH),
            )
            .invalidate_if(
                self.comment.chars().count() > MAX_COMMENT_LENGTH,
                AccountInvalidity::CommentTooLong(MAX_COMMENT_LENGTH),
            )
            .into()
    }
}

fn is_currency_code(code: &str) -> bool {
    code.len() == 3 && code.chars().all(|c| c.is_ascii_uppercase())
}
