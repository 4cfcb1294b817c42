use std::{collections::BTreeMap, convert::TryFrom};

use chrono::{DateTime, FixedOffset, Utc};
use semval::prelude::*;
use uuid::Uuid;

use super::{
    accounts::Account,
    categories::{CategoryType, TransactionCategory},
    edit_window::EditPolicy,
    transaction_time::TransactionTime,
};

pub const MAX_AMOUNT: i64 = 99_999_999_999;
pub const MAX_COMMENT_LENGTH: usize = 255;
pub const MIN_UTC_OFFSET: i16 = -720;
pub const MAX_UTC_OFFSET: i16 = 840;

/// The kind of transaction a user deals with.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum TransactionType {
    ModifyBalance,
    Income,
    Expense,
    Transfer,
}

impl TransactionType {
    pub fn code(self) -> i16 {
        match self {
            Self::ModifyBalance => 1,
            Self::Income => 2,
            Self::Expense => 3,
            Self::Transfer => 4,
        }
    }

    /// The category type a transaction of this type must reference.
    pub fn category_type(self) -> Option<CategoryType> {
        match self {
            Self::ModifyBalance => None,
            Self::Income => Some(CategoryType::Income),
            Self::Expense => Some(CategoryType::Expense),
            Self::Transfer => Some(CategoryType::Transfer),
        }
    }
}

impl TryFrom<i16> for TransactionType {
    type Error = TransactionInvalidity;

    fn try_from(code: i16) -> Result<Self, Self::Error> {
        match code {
            1 => Ok(Self::ModifyBalance),
            2 => Ok(Self::Income),
            3 => Ok(Self::Expense),
            4 => Ok(Self::Transfer),
            _ => Err(TransactionInvalidity::UnknownType),
        }
    }
}

/// The part a stored row plays. A transfer is stored as two rows: the
/// transfer-out row owns the transfer and the transfer-in row mirrors it from
/// the destination account's point of view.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum TransactionRole {
    Standalone,
    TransferOut,
    TransferIn,
}

/// The code a row's type and role are stored as.
pub fn encode_kind(transaction_type: TransactionType, role: TransactionRole) -> i16 {
    match (transaction_type, role) {
        (TransactionType::Transfer, TransactionRole::TransferIn) => 5,
        (other, _) => other.code(),
    }
}

pub fn decode_kind(code: i16) -> Option<(TransactionType, TransactionRole)> {
    match code {
        1 => Some((TransactionType::ModifyBalance, TransactionRole::Standalone)),
        2 => Some((TransactionType::Income, TransactionRole::Standalone)),
        3 => Some((TransactionType::Expense, TransactionRole::Standalone)),
        4 => Some((TransactionType::Transfer, TransactionRole::TransferOut)),
        5 => Some((TransactionType::Transfer, TransactionRole::TransferIn)),
        _ => None,
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GeoLocation {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Transaction {
    pub id: Uuid,
    pub user_id: Uuid,
    pub transaction_type: TransactionType,
    pub role: TransactionRole,
    pub category_id: Option<Uuid>,
    pub account_id: Uuid,
    pub time: TransactionTime,
    /// The UTC offset, in minutes, the transaction was recorded in.
    pub utc_offset: i16,
    /// Amount in minor units.
    pub amount: i64,
    /// The other row of a transfer pair.
    pub related_id: Option<Uuid>,
    pub related_account_id: Option<Uuid>,
    pub related_account_amount: i64,
    pub hide_amount: bool,
    pub comment: String,
    pub geo_location: Option<GeoLocation>,
    pub created_ip: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    pub fn is_transfer_in(&self) -> bool {
        self.role == TransactionRole::TransferIn
    }

    pub fn is_transfer_out(&self) -> bool {
        self.role == TransactionRole::TransferOut
    }

    /// The modify-balance row recording the initial balance of a new
    /// account. Its time carries no sequence yet.
    pub fn opening_balance(account: &Account, utc_offset: i16, now: DateTime<Utc>) -> Transaction {
        Transaction {
            id: Uuid::new_v4(),
            user_id: account.user_id,
            transaction_type: TransactionType::ModifyBalance,
            role: TransactionRole::Standalone,
            category_id: None,
            account_id: account.id,
            time: TransactionTime::min_for_unix_time(now.timestamp()),
            utc_offset,
            amount: account.balance,
            related_id: None,
            related_account_id: None,
            related_account_amount: 0,
            hide_amount: false,
            comment: String::new(),
            geo_location: None,
            created_ip: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Build the transfer-in row mirroring this transfer-out row.
    ///
    /// # Arguments
    ///
    /// * `id` - The id of the transfer-in row.
    ///
    /// # Returns
    ///
    /// The mirror row, or [`None`] if this is not a transfer-out row or its
    /// time leaves no room for the mirror in the same second.
    pub fn transfer_in_mirror(&self, id: Uuid) -> Option<Transaction> {
        if !self.is_transfer_out() {
            return None;
        }

        Some(Transaction {
            id,
            role: TransactionRole::TransferIn,
            account_id: self.related_account_id?,
            amount: self.related_account_amount,
            time: self.time.next()?,
            related_id: Some(self.id),
            related_account_id: Some(self.account_id),
            related_account_amount: self.amount,
            ..self.clone()
        })
    }

    /// Present a row the way callers see it. Transfer-in rows are turned
    /// into the transfer-out row they mirror so amounts always read from the
    /// owning row; every other row is returned as is.
    pub fn as_transfer_out_view(&self) -> Transaction {
        if !self.is_transfer_in() {
            return self.clone();
        }

        Transaction {
            id: self.related_id.unwrap_or(self.id),
            role: TransactionRole::TransferOut,
            account_id: self.related_account_id.unwrap_or(self.account_id),
            amount: self.related_account_amount,
            time: self.time.previous().unwrap_or(self.time),
            related_id: Some(self.id),
            related_account_id: Some(self.account_id),
            related_account_amount: self.amount,
            ..self.clone()
        }
    }

    /// The changes this row makes to account balances, as `(account, delta)`
    /// pairs. Transfer-in rows have none, their transfer-out row accounts for
    /// both sides.
    pub fn balance_effects(&self) -> Vec<(Uuid, i64)> {
        match (self.transaction_type, self.role) {
            (TransactionType::ModifyBalance, _) | (TransactionType::Income, _) => {
                vec![(self.account_id, self.amount)]
            }
            (TransactionType::Expense, _) => vec![(self.account_id, -self.amount)],
            (TransactionType::Transfer, TransactionRole::TransferOut) => {
                let mut effects = vec![(self.account_id, -self.amount)];
                if let Some(destination) = self.related_account_id {
                    effects.push((destination, self.related_account_amount));
                }
                effects
            }
            (TransactionType::Transfer, _) => vec![],
        }
    }

    /// The accounts a caller must be allowed to use to touch this row.
    pub fn account_ids(&self) -> Vec<Uuid> {
        match (self.is_transfer_out(), self.related_account_id) {
            (true, Some(destination)) => vec![self.account_id, destination],
            _ => vec![self.account_id],
        }
    }

    /// Whether the row may still be changed.
    ///
    /// # Arguments
    ///
    /// * `policy` - The owner's edit policy.
    /// * `now` - The current time in the server's local offset.
    /// * `client_utc_offset` - The client's UTC offset in minutes.
    /// * `account` - The row's account, if it still exists.
    /// * `related_account` - The destination account of a transfer-out row,
    ///   if it still exists.
    pub fn is_editable(
        &self,
        policy: &EditPolicy,
        now: DateTime<FixedOffset>,
        client_utc_offset: i16,
        account: Option<&Account>,
        related_account: Option<&Account>,
    ) -> bool {
        if !policy.allows(self.time, now, client_utc_offset) {
            return false;
        }

        if !matches!(account, Some(a) if !a.hidden) {
            return false;
        }

        !self.is_transfer_out() || matches!(related_account, Some(a) if !a.hidden)
    }

    /// Produce the row that results from applying `fields`. Identity, type,
    /// role and pair linkage are kept. Moving to another second resets the
    /// sequence, the storage layer assigns a free one.
    pub fn with_changes(&self, fields: &TransactionFields, now: DateTime<Utc>) -> Transaction {
        let time = if fields.unix_time == self.time.unix_time() {
            self.time
        } else {
            TransactionTime::min_for_unix_time(fields.unix_time)
        };

        let (related_account_id, related_account_amount) = if self.is_transfer_out() {
            (fields.destination_account_id, fields.destination_amount)
        } else {
            (self.related_account_id, self.related_account_amount)
        };

        Transaction {
            category_id: fields.category_id,
            account_id: fields.source_account_id,
            time,
            utc_offset: fields.utc_offset,
            amount: fields.source_amount,
            related_account_id,
            related_account_amount,
            hide_amount: fields.hide_amount,
            comment: fields.comment.clone(),
            geo_location: fields.geo_location,
            updated_at: now,
            ..self.clone()
        }
    }

    /// Whether two rows hold the same user visible content. Bookkeeping
    /// fields and the sequence part of the time are ignored.
    pub fn has_same_content(&self, other: &Transaction) -> bool {
        let same_transfer_fields = !self.is_transfer_out()
            || (self.related_account_id == other.related_account_id
                && self.related_account_amount == other.related_account_amount);

        self.category_id == other.category_id
            && self.time.unix_time() == other.time.unix_time()
            && self.utc_offset == other.utc_offset
            && self.account_id == other.account_id
            && self.amount == other.amount
            && same_transfer_fields
            && self.hide_amount == other.hide_amount
            && self.comment == other.comment
            && self.geo_location == other.geo_location
    }
}

/// The net balance changes of replacing the `removed` rows with the `added`
/// rows, one entry per touched account ordered by account id.
pub fn net_balance_changes(removed: &[&Transaction], added: &[&Transaction]) -> Vec<(Uuid, i64)> {
    let mut changes: BTreeMap<Uuid, i64> = BTreeMap::new();

    for transaction in removed {
        for (account_id, delta) in transaction.balance_effects() {
            *changes.entry(account_id).or_insert(0) -= delta;
        }
    }

    for transaction in added {
        for (account_id, delta) in transaction.balance_effects() {
            *changes.entry(account_id).or_insert(0) += delta;
        }
    }

    changes.into_iter().filter(|(_, delta)| *delta != 0).collect()
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TransactionInvalidity {
    UnknownType,
    CategoryNotAllowed,
    MissingCategory,
    CategoryTypeMismatch,
    PrimaryCategoryNotAllowed,
    DestinationNotAllowed,
    MissingDestinationAccount,
    SameSourceAndDestination,
    AmountOutOfRange(i64),
    UtcOffsetOutOfRange,
    TimeOutOfRange,
    CommentTooLong(usize),
    GeoLocationOutOfRange,
    ContainerAccountNotAllowed,
    HiddenAccount,
    TooManyTransactionsInOneSecond,
}

/// The fields a client provides when creating or modifying a transaction.
#[derive(Clone, Debug, PartialEq)]
pub struct TransactionFields {
    pub category_id: Option<Uuid>,
    pub unix_time: i64,
    pub utc_offset: i16,
    pub source_account_id: Uuid,
    pub source_amount: i64,
    pub destination_account_id: Option<Uuid>,
    pub destination_amount: i64,
    pub hide_amount: bool,
    pub tag_ids: Vec<Uuid>,
    pub comment: String,
    pub geo_location: Option<GeoLocation>,
}

/// Transaction fields paired with the type they are interpreted as.
#[derive(Clone, Debug, PartialEq)]
pub struct TransactionData {
    pub transaction_type: TransactionType,
    pub fields: TransactionFields,
}

impl TransactionData {
    /// Build the transfer-out or standalone row for a new transaction. Its
    /// time carries no sequence yet.
    pub fn into_transaction(
        self,
        id: Uuid,
        user_id: Uuid,
        created_ip: Option<String>,
        now: DateTime<Utc>,
    ) -> Transaction {
        let role = if self.transaction_type == TransactionType::Transfer {
            TransactionRole::TransferOut
        } else {
            TransactionRole::Standalone
        };

        let fields = self.fields;

        Transaction {
            id,
            user_id,
            transaction_type: self.transaction_type,
            role,
            category_id: fields.category_id,
            account_id: fields.source_account_id,
            time: TransactionTime::min_for_unix_time(fields.unix_time),
            utc_offset: fields.utc_offset,
            amount: fields.source_amount,
            related_id: None,
            related_account_id: fields.destination_account_id,
            related_account_amount: fields.destination_amount,
            hide_amount: fields.hide_amount,
            comment: fields.comment,
            geo_location: fields.geo_location,
            created_ip,
            created_at: now,
            updated_at: now,
        }
    }
}

impl Validate for TransactionData {
    type Invalidity = TransactionInvalidity;

    fn validate(&self) -> ValidationResult<Self::Invalidity> {
        let fields = &self.fields;
        let is_transfer = self.transaction_type == TransactionType::Transfer;
        let is_modify_balance = self.transaction_type == TransactionType::ModifyBalance;

        let geo_out_of_range = match fields.geo_location {
            Some(geo) => {
                !(-90.0..=90.0).contains(&geo.latitude) || !(-180.0..=180.0).contains(&geo.longitude)
            }
            None => false,
        };

        ValidationContext::new()
            .invalidate_if(
                is_modify_balance && fields.category_id.is_some(),
                TransactionInvalidity::CategoryNotAllowed,
            )
            .invalidate_if(
                !is_modify_balance && fields.category_id.is_none(),
                TransactionInvalidity::MissingCategory,
            )
            .invalidate_if(
                !is_transfer
                    && (fields.destination_account_id.is_some() || fields.destination_amount != 0),
                TransactionInvalidity::DestinationNotAllowed,
            )
            .invalidate_if(
                is_transfer && fields.destination_account_id.is_none(),
                TransactionInvalidity::MissingDestinationAccount,
            )
            .invalidate_if(
                is_transfer && fields.destination_account_id == Some(fields.source_account_id),
                TransactionInvalidity::SameSourceAndDestination,
            )
            .invalidate_if(
                fields.source_amount.abs() > MAX_AMOUNT
                    || fields.destination_amount.abs() > MAX_AMOUNT,
                TransactionInvalidity::AmountOutOfRange(MAX_AMOUNT),
            )
            .invalidate_if(
                !(MIN_UTC_OFFSET..=MAX_UTC_OFFSET).contains(&fields.utc_offset),
                TransactionInvalidity::UtcOffsetOutOfRange,
            )
            .invalidate_if(fields.unix_time <= 0, TransactionInvalidity::TimeOutOfRange)
            .invalidate_if(
                fields.comment.chars().count() > MAX_COMMENT_LENGTH,
                TransactionInvalidity::CommentTooLong(MAX_COMMENT_LENGTH),
            )
            .invalidate_if(geo_out_of_range, TransactionInvalidity::GeoLocationOutOfRange)
            .into()
    }
}

/// Check that transactions may be booked on `account`.
pub fn check_account_usable(account: &Account) -> Result<(), TransactionInvalidity> {
    if account.is_container() {
        Err(TransactionInvalidity::ContainerAccountNotAllowed)
    } else if account.hidden {
        Err(TransactionInvalidity::HiddenAccount)
    } else {
        Ok(())
    }
}

/// Check that a transaction of `transaction_type` may reference `category`.
pub fn check_category_usable(
    transaction_type: TransactionType,
    category: &TransactionCategory,
) -> Result<(), TransactionInvalidity> {
    if category.is_primary() {
        Err(TransactionInvalidity::PrimaryCategoryNotAllowed)
    } else if transaction_type.category_type() != Some(category.category_type) {
        Err(TransactionInvalidity::CategoryTypeMismatch)
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use chrono::Weekday;

    use crate::ledger::domain::{
        accounts::{AccountCategory, AccountType},
        edit_window::TransactionEditScope,
    };

    use super::*;

    fn fields(source: Uuid, destination: Option<Uuid>) -> TransactionFields {
        TransactionFields {
            category_id: Some(Uuid::new_v4()),
            unix_time: 1_678_874_400,
            utc_offset: 0,
            source_account_id: source,
            source_amount: 5000,
            destination_account_id: destination,
            destination_amount: if destination.is_some() { 4500 } else { 0 },
            hide_amount: false,
            tag_ids: vec![],
            comment: "rent".to_owned(),
            geo_location: None,
        }
    }

    fn transfer() -> Transaction {
        TransactionData {
            transaction_type: TransactionType::Transfer,
            fields: fields(Uuid::new_v4(), Some(Uuid::new_v4())),
        }
        .into_transaction(Uuid::new_v4(), Uuid::new_v4(), None, Utc::now())
    }

    fn account(hidden: bool) -> Account {
        Account {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            parent_id: None,
            account_type: AccountType::Single,
            category: AccountCategory::Cash,
            name: "Cash".to_owned(),
            icon: 1,
            color: String::new(),
            currency: "USD".to_owned(),
            balance: 0,
            display_order: 1,
            hidden,
            comment: String::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn invalidities(data: &TransactionData) -> Vec<TransactionInvalidity> {
        match data.validate() {
            Ok(()) => vec![],
            Err(context) => context.into_iter().collect(),
        }
    }

    #[test]
    fn kind_codes_round_trip() {
        for code in 1..=5 {
            let (transaction_type, role) = decode_kind(code).expect("known kind");
            assert_eq!(code, encode_kind(transaction_type, role));
        }

        assert_eq!(None, decode_kind(6));
    }

    #[test]
    fn transfer_to_same_account_is_invalid() {
        let source = Uuid::new_v4();
        let data = TransactionData {
            transaction_type: TransactionType::Transfer,
            fields: fields(source, Some(source)),
        };

        assert_eq!(
            vec![TransactionInvalidity::SameSourceAndDestination],
            invalidities(&data)
        );
    }

    #[test]
    fn modify_balance_rejects_category() {
        let data = TransactionData {
            transaction_type: TransactionType::ModifyBalance,
            fields: fields(Uuid::new_v4(), None),
        };

        assert_eq!(
            vec![TransactionInvalidity::CategoryNotAllowed],
            invalidities(&data)
        );
    }

    #[test]
    fn non_transfer_rejects_destination() {
        let mut data = TransactionData {
            transaction_type: TransactionType::Expense,
            fields: fields(Uuid::new_v4(), None),
        };
        data.fields.destination_amount = 10;

        assert_eq!(
            vec![TransactionInvalidity::DestinationNotAllowed],
            invalidities(&data)
        );
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        let mut data = TransactionData {
            transaction_type: TransactionType::Income,
            fields: fields(Uuid::new_v4(), None),
        };
        data.fields.source_amount = MAX_AMOUNT + 1;
        data.fields.utc_offset = 900;
        data.fields.comment = "x".repeat(256);

        assert_eq!(
            vec![
                TransactionInvalidity::AmountOutOfRange(MAX_AMOUNT),
                TransactionInvalidity::UtcOffsetOutOfRange,
                TransactionInvalidity::CommentTooLong(MAX_COMMENT_LENGTH),
            ],
            invalidities(&data)
        );
    }

    #[test]
    fn unknown_type_code_is_rejected() {
        assert_eq!(
            Err(TransactionInvalidity::UnknownType),
            TransactionType::try_from(5)
        );
    }

    #[test]
    fn mirror_swaps_sides_and_links_back() {
        let out = transfer();
        let mirror = out.transfer_in_mirror(Uuid::new_v4()).expect("transfer has a mirror");

        assert_eq!(TransactionRole::TransferIn, mirror.role);
        assert_eq!(out.related_account_id, Some(mirror.account_id));
        assert_eq!(out.related_account_amount, mirror.amount);
        assert_eq!(Some(out.account_id), mirror.related_account_id);
        assert_eq!(out.amount, mirror.related_account_amount);
        assert_eq!(Some(out.id), mirror.related_id);
        assert_eq!(out.time.packed() + 1, mirror.time.packed());
    }

    #[test]
    fn transfer_in_view_restores_out_row() {
        let mut out = transfer();
        let mirror = out.transfer_in_mirror(Uuid::new_v4()).expect("transfer has a mirror");
        out.related_id = Some(mirror.id);

        assert_eq!(out, mirror.as_transfer_out_view());
    }

    #[test]
    fn balance_effects_by_kind() {
        let out = transfer();
        let destination = out.related_account_id.expect("transfer has destination");

        assert_eq!(
            vec![(out.account_id, -5000), (destination, 4500)],
            out.balance_effects()
        );

        let mirror = out.transfer_in_mirror(Uuid::new_v4()).expect("transfer has a mirror");
        assert!(mirror.balance_effects().is_empty());

        let expense = TransactionData {
            transaction_type: TransactionType::Expense,
            fields: fields(Uuid::new_v4(), None),
        }
        .into_transaction(Uuid::new_v4(), Uuid::new_v4(), None, Utc::now());
        assert_eq!(vec![(expense.account_id, -5000)], expense.balance_effects());
    }

    #[test]
    fn net_changes_cancel_out() {
        let out = transfer();
        let destination = out.related_account_id.expect("transfer has destination");
        let mut moved = out.clone();
        moved.amount = 6000;

        assert!(net_balance_changes(&[&out], &[&out]).is_empty());

        let changes = net_balance_changes(&[&out], &[&moved]);
        assert_eq!(vec![(out.account_id, -1000)], changes);

        let mut removed = net_balance_changes(&[&out], &[]);
        removed.sort();
        let mut expected = vec![(out.account_id, 5000), (destination, -4500)];
        expected.sort();
        assert_eq!(expected, removed);
    }

    #[test]
    fn hidden_accounts_block_editing() {
        let policy = EditPolicy {
            scope: TransactionEditScope::All,
            first_day_of_week: Weekday::Sun,
        };
        let now: DateTime<FixedOffset> = Utc::now().into();
        let out = transfer();

        assert!(out.is_editable(&policy, now, 0, Some(&account(false)), Some(&account(false))));
        assert!(!out.is_editable(&policy, now, 0, Some(&account(true)), Some(&account(false))));
        assert!(!out.is_editable(&policy, now, 0, Some(&account(false)), Some(&account(true))));
        assert!(!out.is_editable(&policy, now, 0, None, Some(&account(false))));
    }

    #[test]
    fn with_changes_keeps_sequence_within_same_second() {
        let mut out = transfer();
        out.time = TransactionTime::from_packed(out.time.packed() + 7);

        let mut changed = fields(out.account_id, out.related_account_id);
        changed.unix_time = out.time.unix_time();
        changed.destination_amount = 4000;
        let modified = out.with_changes(&changed, Utc::now());

        assert_eq!(out.time, modified.time);
        assert_eq!(4000, modified.related_account_amount);
        assert!(!out.has_same_content(&modified));

        changed.unix_time += 60;
        let moved = out.with_changes(&changed, Utc::now());
        assert_eq!(0, moved.time.sequence());
    }

    #[test]
    fn container_and_hidden_accounts_are_unusable() {
        let mut container = account(false);
        container.account_type = AccountType::MultiSubAccounts;

        assert_eq!(
            Err(TransactionInvalidity::ContainerAccountNotAllowed),
            check_account_usable(&container)
        );
        assert_eq!(
            Err(TransactionInvalidity::HiddenAccount),
            check_account_usable(&account(true))
        );
        assert_eq!(Ok(()), check_account_usable(&account(false)));
    }
}
