use std::{
    collections::{BTreeMap, HashMap},
    convert::TryFrom,
};

use serde::{ser::SerializeMap, Deserialize, Serialize, Serializer};
use uuid::Uuid;

use crate::ledger::{
    domain::{
        self,
        accounts::{AccountCategory, AccountChanges, AccountInvalidity, AccountType, NewAccountData},
        categories::{CategoryInvalidity, CategoryType, NewCategoryData},
        statistics::{AccountCategoryTotal, AmountsResult, QueryInvalidity, YearMonth},
        transaction_time::TransactionTime,
        transactions::{
            encode_kind, GeoLocation, TransactionData, TransactionFields, TransactionInvalidity,
            TransactionType,
        },
    },
    errors::{LedgerError, LedgerInvalidity},
    services::{TransactionDetail, TransactionFilter, TransactionPage},
};

#[derive(Serialize)]
pub struct ResourceCollection<T: Serialize> {
    pub items: Vec<T>,
}

#[derive(Serialize)]
pub struct Account {
    pub id: Uuid,
    pub parent_id: Option<Uuid>,
    pub account_type: i16,
    pub category: i16,
    pub name: String,
    pub icon: i64,
    pub color: String,
    pub currency: String,
    pub balance: i64,
    pub display_order: i32,
    pub hidden: bool,
    pub comment: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub_accounts: Option<Vec<Account>>,
}

impl From<&domain::accounts::Account> for Account {
    fn from(account: &domain::accounts::Account) -> Self {
        Self {
            id: account.id,
            parent_id: account.parent_id,
            account_type: account.account_type.code(),
            category: account.category.code(),
            name: account.name.clone(),
            icon: account.icon,
            color: account.color.clone(),
            currency: account.currency.clone(),
            balance: account.balance,
            display_order: account.display_order,
            hidden: account.hidden,
            comment: account.comment.clone(),
            sub_accounts: None,
        }
    }
}

impl From<&domain::accounts::AccountTree> for Account {
    fn from(tree: &domain::accounts::AccountTree) -> Self {
        Self {
            sub_accounts: Some(tree.sub_accounts.iter().map(Account::from).collect()),
            ..Account::from(&tree.account)
        }
    }
}

#[derive(Deserialize)]
pub struct NewAccountRequest {
    name: String,
    account_type: i16,
    category: i16,
    #[serde(default)]
    icon: i64,
    #[serde(default)]
    color: String,
    currency: String,
    #[serde(default)]
    balance: i64,
    #[serde(default)]
    comment: String,
    #[serde(default)]
    sub_accounts: Vec<NewAccountRequest>,
}

fn account_category(code: i16) -> Result<AccountCategory, LedgerError> {
    AccountCategory::try_from(code).map_err(|_| LedgerError::invalid(AccountInvalidity::UnknownCategory))
}

impl TryFrom<NewAccountRequest> for NewAccountData {
    type Error = LedgerError;

    fn try_from(request: NewAccountRequest) -> Result<Self, Self::Error> {
        let account_type = AccountType::try_from(request.account_type)
            .map_err(|_| LedgerError::invalid(AccountInvalidity::UnknownType))?;

        Ok(Self {
            name: request.name,
            account_type,
            category: account_category(request.category)?,
            icon: request.icon,
            color: request.color,
            currency: request.currency,
            balance: request.balance,
            comment: request.comment,
            sub_accounts: request
                .sub_accounts
                .into_iter()
                .map(NewAccountData::try_from)
                .collect::<Result<_, _>>()?,
        })
    }
}

#[derive(Deserialize)]
pub struct AccountChangesRequest {
    name: String,
    category: i16,
    #[serde(default)]
    icon: i64,
    #[serde(default)]
    color: String,
    #[serde(default)]
    comment: String,
    #[serde(default)]
    hidden: bool,
}

impl TryFrom<AccountChangesRequest> for AccountChanges {
    type Error = LedgerError;

    fn try_from(request: AccountChangesRequest) -> Result<Self, Self::Error> {
        Ok(Self {
            name: request.name,
            category: account_category(request.category)?,
            icon: request.icon,
            color: request.color,
            comment: request.comment,
            hidden: request.hidden,
        })
    }
}

#[derive(Deserialize)]
pub struct HiddenRequest {
    pub hidden: bool,
}

#[derive(Deserialize)]
pub struct DisplayOrder {
    pub id: Uuid,
    pub display_order: i32,
}

#[derive(Deserialize)]
pub struct MoveAccountsRequest {
    pub accounts: Vec<DisplayOrder>,
}

#[derive(Serialize)]
pub struct Category {
    pub id: Uuid,
    pub parent_id: Option<Uuid>,
    pub category_type: i16,
    pub name: String,
    pub icon: i64,
    pub color: String,
    pub comment: String,
    pub display_order: i32,
    pub hidden: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub_categories: Option<Vec<Category>>,
}

impl From<&domain::categories::TransactionCategory> for Category {
    fn from(category: &domain::categories::TransactionCategory) -> Self {
        Self {
            id: category.id,
            parent_id: category.parent_id,
            category_type: category.category_type.code(),
            name: category.name.clone(),
            icon: category.icon,
            color: category.color.clone(),
            comment: category.comment.clone(),
            display_order: category.display_order,
            hidden: category.hidden,
            sub_categories: None,
        }
    }
}

impl From<&domain::categories::CategoryTree> for Category {
    fn from(tree: &domain::categories::CategoryTree) -> Self {
        Self {
            sub_categories: Some(tree.sub_categories.iter().map(Category::from).collect()),
            ..Category::from(&tree.category)
        }
    }
}

pub fn category_type(code: i16) -> Result<CategoryType, LedgerError> {
    CategoryType::try_from(code).map_err(|_| LedgerError::invalid(CategoryInvalidity::UnknownType))
}

#[derive(Deserialize)]
pub struct ListCategoriesParams {
    pub category_type: Option<i16>,
}

#[derive(Deserialize)]
pub struct NewCategoryRequest {
    name: String,
    category_type: i16,
    parent_id: Option<Uuid>,
    #[serde(default)]
    icon: i64,
    #[serde(default)]
    color: String,
    #[serde(default)]
    comment: String,
}

impl TryFrom<NewCategoryRequest> for NewCategoryData {
    type Error = LedgerError;

    fn try_from(request: NewCategoryRequest) -> Result<Self, Self::Error> {
        Ok(Self {
            name: request.name,
            category_type: category_type(request.category_type)?,
            parent_id: request.parent_id,
            icon: request.icon,
            color: request.color,
            comment: request.comment,
        })
    }
}

#[derive(Serialize)]
pub struct Tag {
    pub id: Uuid,
    pub name: String,
    pub display_order: i32,
}

impl From<&domain::tags::TransactionTag> for Tag {
    fn from(tag: &domain::tags::TransactionTag) -> Self {
        Self {
            id: tag.id,
            name: tag.name.clone(),
            display_order: tag.display_order,
        }
    }
}

#[derive(Deserialize)]
pub struct TagRequest {
    pub name: String,
}

#[derive(Clone, Copy, Deserialize, Serialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
}

/// A transaction as the client sees it. Transfers are shown from the
/// source account's side unless transfer-in rows were asked for.
#[derive(Serialize)]
pub struct Transaction {
    pub id: Uuid,
    pub kind: i16,
    pub transaction_type: i16,
    pub category_id: Option<Uuid>,
    pub time: i64,
    pub utc_offset: i16,
    pub source_account_id: Uuid,
    pub source_amount: i64,
    pub destination_account_id: Option<Uuid>,
    pub destination_amount: i64,
    pub hide_amount: bool,
    pub tag_ids: Vec<Uuid>,
    pub comment: String,
    pub geo_location: Option<Location>,
    pub editable: bool,
}

impl From<&TransactionDetail> for Transaction {
    fn from(detail: &TransactionDetail) -> Self {
        let transaction = &detail.transaction;

        Self {
            id: transaction.id,
            kind: encode_kind(transaction.transaction_type, transaction.role),
            transaction_type: transaction.transaction_type.code(),
            category_id: transaction.category_id,
            time: transaction.time.unix_time(),
            utc_offset: transaction.utc_offset,
            source_account_id: transaction.account_id,
            source_amount: transaction.amount,
            destination_account_id: transaction.related_account_id,
            destination_amount: transaction.related_account_amount,
            hide_amount: transaction.hide_amount,
            tag_ids: detail.tag_ids.clone(),
            comment: transaction.comment.clone(),
            geo_location: transaction.geo_location.map(|geo| Location {
                latitude: geo.latitude,
                longitude: geo.longitude,
            }),
            editable: detail.editable,
        }
    }
}

#[derive(Serialize)]
pub struct TransactionPageRep {
    pub items: Vec<Transaction>,
    /// Pass as `before` to fetch the next page.
    pub next_cursor: Option<TransactionTime>,
}

impl From<&TransactionPage> for TransactionPageRep {
    fn from(page: &TransactionPage) -> Self {
        Self {
            items: page.items.iter().map(Transaction::from).collect(),
            next_cursor: page.next_cursor,
        }
    }
}

#[derive(Deserialize)]
pub struct TransactionFieldsRequest {
    category_id: Option<Uuid>,
    time: i64,
    #[serde(default)]
    utc_offset: i16,
    source_account_id: Uuid,
    source_amount: i64,
    destination_account_id: Option<Uuid>,
    #[serde(default)]
    destination_amount: i64,
    #[serde(default)]
    hide_amount: bool,
    #[serde(default)]
    tag_ids: Vec<Uuid>,
    #[serde(default)]
    comment: String,
    geo_location: Option<Location>,
}

impl From<TransactionFieldsRequest> for TransactionFields {
    fn from(request: TransactionFieldsRequest) -> Self {
        Self {
            category_id: request.category_id,
            unix_time: request.time,
            utc_offset: request.utc_offset,
            source_account_id: request.source_account_id,
            source_amount: request.source_amount,
            destination_account_id: request.destination_account_id,
            destination_amount: request.destination_amount,
            hide_amount: request.hide_amount,
            tag_ids: request.tag_ids,
            comment: request.comment,
            geo_location: request.geo_location.map(|location| GeoLocation {
                latitude: location.latitude,
                longitude: location.longitude,
            }),
        }
    }
}

#[derive(Deserialize)]
pub struct NewTransactionRequest {
    transaction_type: i16,
    #[serde(flatten)]
    fields: TransactionFieldsRequest,
}

fn transaction_type(code: i16) -> Result<TransactionType, LedgerError> {
    TransactionType::try_from(code).map_err(LedgerError::invalid)
}

impl TryFrom<NewTransactionRequest> for TransactionData {
    type Error = LedgerError;

    fn try_from(request: NewTransactionRequest) -> Result<Self, Self::Error> {
        Ok(Self {
            transaction_type: transaction_type(request.transaction_type)?,
            fields: request.fields.into(),
        })
    }
}

/// Filters shared by the listing, month and count endpoints. Paging only
/// applies to the listing.
#[derive(Default, Deserialize)]
pub struct TransactionFilterParams {
    pub before: Option<TransactionTime>,
    pub count: Option<u32>,
    transaction_type: Option<i16>,
    category_id: Option<Uuid>,
    account_id: Option<Uuid>,
    keyword: Option<String>,
    min_time: Option<i64>,
    max_time: Option<i64>,
    #[serde(default)]
    include_transfer_in: bool,
}

impl TryFrom<&TransactionFilterParams> for TransactionFilter {
    type Error = LedgerError;

    fn try_from(params: &TransactionFilterParams) -> Result<Self, Self::Error> {
        Ok(Self {
            transaction_type: params.transaction_type.map(transaction_type).transpose()?,
            category_id: params.category_id,
            account_id: params.account_id,
            keyword: params.keyword.clone(),
            min_unix_time: params.min_time,
            max_unix_time: params.max_time,
            include_transfer_in_rows: params.include_transfer_in,
        })
    }
}

#[derive(Serialize)]
pub struct TransactionCount {
    pub count: i64,
}

#[derive(Deserialize)]
pub struct StatisticsParams {
    pub start_time: Option<i64>,
    pub end_time: Option<i64>,
    #[serde(default)]
    pub use_transaction_timezone: bool,
}

#[derive(Deserialize)]
pub struct TrendsParams {
    pub start_year_month: String,
    pub end_year_month: String,
    #[serde(default)]
    pub use_transaction_timezone: bool,
}

pub fn year_month(value: &str) -> Result<YearMonth, LedgerError> {
    value.parse().map_err(LedgerError::invalid)
}

#[derive(Deserialize)]
pub struct AmountsParams {
    pub query: String,
    #[serde(default)]
    pub use_transaction_timezone: bool,
}

#[derive(Serialize)]
pub struct IncomeAndExpense {
    pub income: HashMap<Uuid, i64>,
    pub expense: HashMap<Uuid, i64>,
}

#[derive(Serialize)]
pub struct AccountCategoryAmount {
    pub account_id: Uuid,
    pub category_id: Option<Uuid>,
    pub income_amount: i64,
    pub expense_amount: i64,
}

impl From<&AccountCategoryTotal> for AccountCategoryAmount {
    fn from(total: &AccountCategoryTotal) -> Self {
        Self {
            account_id: total.account_id,
            category_id: total.category_id,
            income_amount: total.income_amount,
            expense_amount: total.expense_amount,
        }
    }
}

#[derive(Serialize)]
pub struct MonthlyAmounts {
    pub year: i32,
    pub month: i32,
    pub items: Vec<AccountCategoryAmount>,
}

pub fn monthly_amounts(trends: &BTreeMap<i32, Vec<AccountCategoryTotal>>) -> Vec<MonthlyAmounts> {
    trends
        .iter()
        .map(|(key, totals)| MonthlyAmounts {
            year: key / 100,
            month: key % 100,
            items: totals.iter().map(AccountCategoryAmount::from).collect(),
        })
        .collect()
}

#[derive(Serialize)]
pub struct CurrencyAmount {
    pub currency: String,
    pub income_amount: i64,
    pub expense_amount: i64,
}

#[derive(Serialize)]
pub struct RangeAmounts {
    pub start_time: i64,
    pub end_time: i64,
    pub amounts: Vec<CurrencyAmount>,
}

impl From<&AmountsResult> for RangeAmounts {
    fn from(result: &AmountsResult) -> Self {
        Self {
            start_time: result.start_time,
            end_time: result.end_time,
            amounts: result
                .amounts
                .iter()
                .map(|amount| CurrencyAmount {
                    currency: amount.currency.clone(),
                    income_amount: amount.income_amount,
                    expense_amount: amount.expense_amount,
                })
                .collect(),
        }
    }
}

/// Labelled amounts, serialized as an object whose keys keep the order the
/// labels were requested in.
pub struct LabelledAmounts(pub Vec<(String, RangeAmounts)>);

impl Serialize for LabelledAmounts {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (label, amounts) in &self.0 {
            map.serialize_entry(label, amounts)?;
        }

        map.end()
    }
}

#[derive(Deserialize)]
pub struct ClearDataRequest {
    pub password: String,
}

/// Describe a ledger validation problem to a client.
pub fn describe(invalidity: LedgerInvalidity) -> String {
    use LedgerInvalidity as L;

    match invalidity {
        L::Account(invalidity) => describe_account(invalidity),
        L::Category(invalidity) => describe_category(invalidity),
        L::Query(invalidity) => describe_query(invalidity),
        L::Tag(invalidity) => match invalidity {
            domain::tags::TagInvalidity::NameRequired => "Tag names may not be blank.".to_owned(),
            domain::tags::TagInvalidity::NameTooLong(max) => {
                format!("Tag names may not contain more than {} characters.", max)
            }
            domain::tags::TagInvalidity::DuplicateName => {
                "A tag with this name already exists.".to_owned()
            }
        },
        L::Transaction(invalidity) => describe_transaction(invalidity),
    }
}

fn describe_account(invalidity: AccountInvalidity) -> String {
    match invalidity {
        AccountInvalidity::UnknownType => "Unknown account type.".to_owned(),
        AccountInvalidity::UnknownCategory => "Unknown account category.".to_owned(),
        AccountInvalidity::NameRequired => "Account names may not be blank.".to_owned(),
        AccountInvalidity::NameTooLong(max) => {
            format!("Account names may not contain more than {} characters.", max)
        }
        AccountInvalidity::CommentTooLong(max) => {
            format!("Comments may not contain more than {} characters.", max)
        }
        AccountInvalidity::BalanceOutOfRange => "The balance is out of range.".to_owned(),
        AccountInvalidity::InvalidCurrency => "The currency is not a valid code.".to_owned(),
        AccountInvalidity::ContainerCurrencyNotAllowed => {
            "Only accounts with sub-accounts may omit a currency.".to_owned()
        }
        AccountInvalidity::ContainerCurrencyRequired => {
            "Accounts with sub-accounts may not have a currency.".to_owned()
        }
        AccountInvalidity::ContainerBalanceNotAllowed => {
            "Accounts with sub-accounts may not have a balance.".to_owned()
        }
        AccountInvalidity::SubAccountsNotAllowed => {
            "Single accounts may not have sub-accounts.".to_owned()
        }
        AccountInvalidity::SubAccountsRequired => {
            "At least one sub-account is required.".to_owned()
        }
        AccountInvalidity::SubAccountMustBeSingle => {
            "Sub-accounts may not have sub-accounts of their own.".to_owned()
        }
        AccountInvalidity::SubAccountCategoryMismatch => {
            "Sub-accounts must share their parent's category.".to_owned()
        }
        AccountInvalidity::InUse => "The account is still used by transactions.".to_owned(),
        AccountInvalidity::MixedDisplayGroups => {
            "Only accounts with the same parent and category can be reordered together."
                .to_owned()
        }
    }
}

fn describe_category(invalidity: CategoryInvalidity) -> String {
    match invalidity {
        CategoryInvalidity::UnknownType => "Unknown category type.".to_owned(),
        CategoryInvalidity::NameRequired => "Category names may not be blank.".to_owned(),
        CategoryInvalidity::NameTooLong(max) => {
            format!("Category names may not contain more than {} characters.", max)
        }
        CategoryInvalidity::CommentTooLong(max) => {
            format!("Comments may not contain more than {} characters.", max)
        }
        CategoryInvalidity::ParentMustBePrimary => {
            "The parent category may not be a sub-category.".to_owned()
        }
        CategoryInvalidity::ParentTypeMismatch => {
            "The parent category has a different type.".to_owned()
        }
        CategoryInvalidity::InUse => "The category is still used by transactions.".to_owned(),
    }
}

fn describe_query(invalidity: QueryInvalidity) -> String {
    match invalidity {
        QueryInvalidity::MalformedItem => {
            "Query items must have the form 'name_start_end'.".to_owned()
        }
        QueryInvalidity::ReversedTimeRange => "The start time is after the end time.".to_owned(),
        QueryInvalidity::PageSizeOutOfRange(max) => {
            format!("The page size must be between 1 and {}.", max)
        }
        QueryInvalidity::InvalidMonth => "Months must have the form 'YYYY-MM'.".to_owned(),
        QueryInvalidity::ReversedMonthRange => "The start month is after the end month.".to_owned(),
        QueryInvalidity::UtcOffsetOutOfRange => "The UTC offset is out of range.".to_owned(),
    }
}

fn describe_transaction(invalidity: TransactionInvalidity) -> String {
    match invalidity {
        TransactionInvalidity::UnknownType => "Unknown transaction type.".to_owned(),
        TransactionInvalidity::CategoryNotAllowed => {
            "Balance modifications may not have a category.".to_owned()
        }
        TransactionInvalidity::MissingCategory => "A category is required.".to_owned(),
        TransactionInvalidity::CategoryTypeMismatch => {
            "The category does not match the transaction type.".to_owned()
        }
        TransactionInvalidity::PrimaryCategoryNotAllowed => {
            "Transactions must use a sub-category.".to_owned()
        }
        TransactionInvalidity::DestinationNotAllowed => {
            "Only transfers may have a destination account.".to_owned()
        }
        TransactionInvalidity::MissingDestinationAccount => {
            "Transfers require a destination account.".to_owned()
        }
        TransactionInvalidity::SameSourceAndDestination => {
            "Transfers may not have the same source and destination account.".to_owned()
        }
        TransactionInvalidity::AmountOutOfRange(max) => {
            format!("Amounts may not exceed {} in either direction.", max)
        }
        TransactionInvalidity::UtcOffsetOutOfRange => "The UTC offset is out of range.".to_owned(),
        TransactionInvalidity::TimeOutOfRange => "The transaction time is invalid.".to_owned(),
        TransactionInvalidity::CommentTooLong(max) => {
            format!("Comments may not contain more than {} characters.", max)
        }
        TransactionInvalidity::GeoLocationOutOfRange => "The location is out of range.".to_owned(),
        TransactionInvalidity::ContainerAccountNotAllowed => {
            "Transactions may not use an account that has sub-accounts.".to_owned()
        }
        TransactionInvalidity::HiddenAccount => {
            "Transactions may not use a hidden account.".to_owned()
        }
        TransactionInvalidity::TooManyTransactionsInOneSecond => {
            "Too many transactions were recorded within the same second.".to_owned()
        }
    }
}
