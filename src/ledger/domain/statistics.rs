use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    str::FromStr,
};

use chrono::{Datelike, NaiveDate, NaiveDateTime};
use uuid::Uuid;

use super::{
    transaction_time::TransactionTime,
    transactions::{TransactionType, MAX_UTC_OFFSET, MIN_UTC_OFFSET},
};

/// Largest number of ranges a single amounts query may ask for.
pub const MAX_AMOUNTS_QUERY_ITEMS: usize = 20;

const ITEM_SEPARATOR: char = '|';
const FIELD_SEPARATOR: char = '_';

/// Largest possible distance between two valid UTC offsets, in seconds.
const MAX_OFFSET_SPREAD: i64 = (MAX_UTC_OFFSET as i64 - MIN_UTC_OFFSET as i64) * 60;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum QueryInvalidity {
    MalformedItem,
    ReversedTimeRange,
    PageSizeOutOfRange(u32),
    InvalidMonth,
    ReversedMonthRange,
    UtcOffsetOutOfRange,
}

/// A labelled time range of an amounts query.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AmountsQueryItem {
    pub name: String,
    pub start_time: i64,
    pub end_time: i64,
}

/// Parse an amounts query of the form `name_start_end|name_start_end`.
/// Empty segments are skipped, counting the items is left to the caller.
pub fn parse_amounts_query(query: &str) -> Result<Vec<AmountsQueryItem>, QueryInvalidity> {
    query
        .split(ITEM_SEPARATOR)
        .filter(|segment| !segment.trim().is_empty())
        .map(parse_amounts_query_item)
        .collect()
}

fn parse_amounts_query_item(segment: &str) -> Result<AmountsQueryItem, QueryInvalidity> {
    let parts = segment.split(FIELD_SEPARATOR).collect::<Vec<_>>();

    if parts.len() != 3 || parts[0].is_empty() {
        return Err(QueryInvalidity::MalformedItem);
    }

    let start_time = parts[1]
        .parse::<i64>()
        .map_err(|_| QueryInvalidity::MalformedItem)?;
    let end_time = parts[2]
        .parse::<i64>()
        .map_err(|_| QueryInvalidity::MalformedItem)?;

    if start_time > end_time {
        return Err(QueryInvalidity::ReversedTimeRange);
    }

    Ok(AmountsQueryItem {
        name: parts[0].to_owned(),
        start_time,
        end_time,
    })
}

pub fn encode_amounts_query(items: &[AmountsQueryItem]) -> String {
    items
        .iter()
        .map(|item| {
            format!(
                "{}{}{}{}{}",
                item.name, FIELD_SEPARATOR, item.start_time, FIELD_SEPARATOR, item.end_time
            )
        })
        .collect::<Vec<_>>()
        .join(&ITEM_SEPARATOR.to_string())
}

/// A half-open range `[start, end)` of unix times. A missing bound leaves
/// that side open.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct TimeWindow {
    pub start: Option<i64>,
    pub end: Option<i64>,
}

impl TimeWindow {
    pub fn new(start: Option<i64>, end: Option<i64>) -> Result<Self, QueryInvalidity> {
        match (start, end) {
            (Some(start), Some(end)) if start > end => Err(QueryInvalidity::ReversedTimeRange),
            _ => Ok(Self { start, end }),
        }
    }

    pub fn between(start: i64, end: i64) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
        }
    }

    /// The range of rows storage has to return so that [`Self::contains`]
    /// can make the final decision. When every row is judged in its own
    /// timezone, the range grows by the widest possible offset difference.
    pub fn storage_range(&self, use_transaction_timezone: bool) -> TimeWindow {
        if !use_transaction_timezone {
            return *self;
        }

        TimeWindow {
            start: self.start.map(|start| start - MAX_OFFSET_SPREAD),
            end: self.end.map(|end| end + MAX_OFFSET_SPREAD),
        }
    }

    /// Whether a row at `unix_time` falls within the window.
    ///
    /// The window's bounds are wall-clock times in the client's timezone.
    /// With `use_transaction_timezone`, a row matches when its own wall-clock
    /// time, taken in the offset it was recorded with, is inside those
    /// bounds. Otherwise the row's instant is compared directly.
    pub fn contains(
        &self,
        unix_time: i64,
        record_utc_offset: i16,
        client_utc_offset: i16,
        use_transaction_timezone: bool,
    ) -> bool {
        let shift = if use_transaction_timezone {
            (i64::from(client_utc_offset) - i64::from(record_utc_offset)) * 60
        } else {
            0
        };

        self.start.map_or(true, |start| unix_time >= start + shift)
            && self.end.map_or(true, |end| unix_time < end + shift)
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct YearMonth {
    year: i32,
    month: u32,
}

impl YearMonth {
    pub fn new(year: i32, month: u32) -> Result<Self, QueryInvalidity> {
        if (1..=9999).contains(&year) && (1..=12).contains(&month) {
            Ok(Self { year, month })
        } else {
            Err(QueryInvalidity::InvalidMonth)
        }
    }

    pub fn year(self) -> i32 {
        self.year
    }

    pub fn month(self) -> u32 {
        self.month
    }

    /// The key trends are reported under, `year * 100 + month`.
    pub fn key(self) -> i32 {
        self.year * 100 + self.month as i32
    }

    pub fn next(self) -> Self {
        if self.month == 12 {
            Self {
                year: self.year + 1,
                month: 1,
            }
        } else {
            Self {
                year: self.year,
                month: self.month + 1,
            }
        }
    }

    /// Every month from `self` through `end`, both included.
    pub fn through(self, end: YearMonth) -> Vec<YearMonth> {
        let mut months = Vec::new();
        let mut current = self;

        while current <= end {
            months.push(current);
            current = current.next();
        }

        months
    }

    /// The unix time at which the month starts for a clock at
    /// `utc_offset` minutes.
    pub fn start_unix_time(self, utc_offset: i16) -> i64 {
        let local_start = NaiveDate::from_ymd_opt(self.year, self.month, 1)
            .and_then(|date| date.and_hms_opt(0, 0, 0))
            .map(|start| start.timestamp())
            .unwrap_or_default();

        local_start - i64::from(utc_offset) * 60
    }

    /// The month a unix time falls in for a clock at `utc_offset` minutes.
    pub fn of_unix_time(unix_time: i64, utc_offset: i16) -> Option<Self> {
        let local = NaiveDateTime::from_timestamp_opt(unix_time + i64::from(utc_offset) * 60, 0)?;

        Self::new(local.year(), local.month()).ok()
    }
}

impl FromStr for YearMonth {
    type Err = QueryInvalidity;

    /// Parse `YYYY-MM`, the month may omit its leading zero.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (year, month) = value.split_once('-').ok_or(QueryInvalidity::InvalidMonth)?;
        let year = year.parse().map_err(|_| QueryInvalidity::InvalidMonth)?;
        let month = month.parse().map_err(|_| QueryInvalidity::InvalidMonth)?;

        Self::new(year, month)
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

/// An income or expense row reduced to what aggregation needs.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AmountRecord {
    pub account_id: Uuid,
    pub category_id: Option<Uuid>,
    pub transaction_type: TransactionType,
    pub time: TransactionTime,
    pub utc_offset: i16,
    pub amount: i64,
}

impl AmountRecord {
    fn split(&self) -> (i64, i64) {
        match self.transaction_type {
            TransactionType::Income => (self.amount, 0),
            TransactionType::Expense => (0, self.amount),
            _ => (0, 0),
        }
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct AccountCategoryTotal {
    pub account_id: Uuid,
    pub category_id: Option<Uuid>,
    pub income_amount: i64,
    pub expense_amount: i64,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CurrencyAmounts {
    pub currency: String,
    pub income_amount: i64,
    pub expense_amount: i64,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AmountsResult {
    pub start_time: i64,
    pub end_time: i64,
    pub amounts: Vec<CurrencyAmounts>,
}

/// Sum income and expense per account.
pub fn totals_by_account<'a>(
    records: impl IntoIterator<Item = &'a AmountRecord>,
) -> (HashMap<Uuid, i64>, HashMap<Uuid, i64>) {
    let mut income = HashMap::new();
    let mut expense = HashMap::new();

    for record in records {
        match record.transaction_type {
            TransactionType::Income => *income.entry(record.account_id).or_insert(0) += record.amount,
            TransactionType::Expense => {
                *expense.entry(record.account_id).or_insert(0) += record.amount
            }
            _ => (),
        }
    }

    (income, expense)
}

/// Sum income and expense for every account and category pair present in
/// `records`, ordered by account and then category.
pub fn totals_by_account_and_category<'a>(
    records: impl IntoIterator<Item = &'a AmountRecord>,
) -> Vec<AccountCategoryTotal> {
    let mut totals: BTreeMap<(Uuid, Option<Uuid>), AccountCategoryTotal> = BTreeMap::new();

    for record in records {
        let (income, expense) = record.split();
        let total = totals
            .entry((record.account_id, record.category_id))
            .or_insert_with(|| AccountCategoryTotal {
                account_id: record.account_id,
                category_id: record.category_id,
                ..Default::default()
            });

        total.income_amount += income;
        total.expense_amount += expense;
    }

    totals.into_values().collect()
}

/// Sum income and expense per currency, ordered by currency code. Records of
/// accounts missing from `account_currencies` are left out.
pub fn totals_by_currency<'a>(
    records: impl IntoIterator<Item = &'a AmountRecord>,
    account_currencies: &HashMap<Uuid, String>,
) -> Vec<CurrencyAmounts> {
    let mut totals: BTreeMap<&str, (i64, i64)> = BTreeMap::new();

    for record in records {
        if let Some(currency) = account_currencies.get(&record.account_id) {
            let (income, expense) = record.split();
            let total = totals.entry(currency.as_str()).or_insert((0, 0));

            total.0 += income;
            total.1 += expense;
        }
    }

    totals
        .into_iter()
        .map(|(currency, (income_amount, expense_amount))| CurrencyAmounts {
            currency: currency.to_owned(),
            income_amount,
            expense_amount,
        })
        .collect()
}

/// Insert a labelled result, keeping the position of the first occurrence
/// of a label when it is repeated.
pub fn insert_labelled<T>(results: &mut Vec<(String, T)>, label: String, value: T) {
    match results.iter_mut().find(|(existing, _)| *existing == label) {
        Some(entry) => entry.1 = value,
        None => results.push((label, value)),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn record(account_id: Uuid, transaction_type: TransactionType, amount: i64) -> AmountRecord {
        AmountRecord {
            account_id,
            category_id: None,
            transaction_type,
            time: TransactionTime::min_for_unix_time(1_000),
            utc_offset: 0,
            amount,
        }
    }

    #[test]
    fn parse_then_encode_preserves_items() {
        let query = "today_1678838400_1678924800|month_1677628800_1680307200";

        let items = parse_amounts_query(query).expect("query is valid");

        assert_eq!(
            vec![
                AmountsQueryItem {
                    name: "today".to_owned(),
                    start_time: 1_678_838_400,
                    end_time: 1_678_924_800,
                },
                AmountsQueryItem {
                    name: "month".to_owned(),
                    start_time: 1_677_628_800,
                    end_time: 1_680_307_200,
                },
            ],
            items
        );
        assert_eq!(query, encode_amounts_query(&items));
    }

    #[test]
    fn parse_skips_empty_segments() {
        assert!(parse_amounts_query("").expect("empty query parses").is_empty());
        assert_eq!(1, parse_amounts_query("a_1_2||").expect("valid").len());
    }

    #[test]
    fn parse_rejects_malformed_items() {
        assert_eq!(Err(QueryInvalidity::MalformedItem), parse_amounts_query("a_1"));
        assert_eq!(Err(QueryInvalidity::MalformedItem), parse_amounts_query("a_b_1_2"));
        assert_eq!(Err(QueryInvalidity::MalformedItem), parse_amounts_query("a_x_2"));
        assert_eq!(Err(QueryInvalidity::MalformedItem), parse_amounts_query("_1_2"));
        assert_eq!(Err(QueryInvalidity::ReversedTimeRange), parse_amounts_query("a_3_2"));
    }

    #[test]
    fn window_in_client_timezone() {
        let window = TimeWindow::between(1_000, 2_000);

        assert!(window.contains(1_000, 0, 0, false));
        assert!(window.contains(1_999, 300, 0, false));
        assert!(!window.contains(2_000, 0, 0, false));
        assert!(!window.contains(999, 0, 0, false));
    }

    #[test]
    fn window_in_transaction_timezone_shifts_per_row() {
        // A day in UTC for a client at UTC.
        let window = TimeWindow::between(86_400, 2 * 86_400);

        // 23:00 UTC on the first day is already the next day at +02:00.
        let late = 2 * 86_400 - 3_600;
        assert!(window.contains(late, 0, 0, true));
        assert!(!window.contains(late, 120, 0, true));

        // 23:00 UTC the day before is the first day at +02:00.
        let early = 86_400 - 3_600;
        assert!(!window.contains(early, 0, 0, true));
        assert!(window.contains(early, 120, 0, true));
    }

    #[test]
    fn storage_range_widens_for_transaction_timezones() {
        let window = TimeWindow::between(100_000, 200_000);

        assert_eq!(window, window.storage_range(false));

        let widened = window.storage_range(true);
        assert_eq!(Some(100_000 - 93_600), widened.start);
        assert_eq!(Some(200_000 + 93_600), widened.end);
    }

    #[test]
    fn months_are_iterated_inclusively() {
        let start = YearMonth::new(2022, 11).expect("valid month");
        let end = YearMonth::new(2023, 2).expect("valid month");

        let keys = start.through(end).into_iter().map(YearMonth::key).collect::<Vec<_>>();

        assert_eq!(vec![202211, 202212, 202301, 202302], keys);
    }

    #[test]
    fn month_boundaries_follow_offset() {
        let march = YearMonth::new(2023, 3).expect("valid month");

        assert_eq!(1_677_628_800, march.start_unix_time(0));
        assert_eq!(1_677_628_800 - 28_800, march.start_unix_time(480));

        assert_eq!(Some(march), YearMonth::of_unix_time(1_677_628_800, 0));
        assert_eq!(
            YearMonth::new(2023, 2).ok(),
            YearMonth::of_unix_time(1_677_628_799, 0)
        );
        assert_eq!(Some(march), YearMonth::of_unix_time(1_677_628_799, 60));
    }

    #[test]
    fn parse_year_month() {
        assert_eq!(YearMonth::new(2023, 4), "2023-04".parse());
        assert_eq!(YearMonth::new(2023, 4), "2023-4".parse());
        assert_eq!(Err(QueryInvalidity::InvalidMonth), "2023-13".parse::<YearMonth>());
        assert_eq!(Err(QueryInvalidity::InvalidMonth), "2023".parse::<YearMonth>());
    }

    #[test]
    fn totals_split_income_and_expense() {
        let cash = Uuid::new_v4();
        let card = Uuid::new_v4();
        let records = vec![
            record(cash, TransactionType::Income, 1_000),
            record(cash, TransactionType::Expense, 300),
            record(cash, TransactionType::Income, 50),
            record(card, TransactionType::Expense, 700),
        ];

        let (income, expense) = totals_by_account(&records);

        assert_eq!(Some(&1_050), income.get(&cash));
        assert_eq!(None, income.get(&card));
        assert_eq!(Some(&300), expense.get(&cash));
        assert_eq!(Some(&700), expense.get(&card));
    }

    #[test]
    fn totals_by_pair_keep_both_directions() {
        let cash = Uuid::new_v4();
        let mut salary = record(cash, TransactionType::Income, 1_000);
        salary.category_id = Some(Uuid::new_v4());
        let records = vec![salary, record(cash, TransactionType::Expense, 300)];

        let totals = totals_by_account_and_category(&records);

        assert_eq!(2, totals.len());
        assert_eq!(None, totals[0].category_id);
        assert_eq!((0, 300), (totals[0].income_amount, totals[0].expense_amount));
        assert_eq!((1_000, 0), (totals[1].income_amount, totals[1].expense_amount));
    }

    #[test]
    fn totals_by_currency_never_mix_currencies() {
        let dollars = Uuid::new_v4();
        let euros = Uuid::new_v4();
        let unknown = Uuid::new_v4();
        let currencies = vec![(dollars, "USD".to_owned()), (euros, "EUR".to_owned())]
            .into_iter()
            .collect::<HashMap<_, _>>();
        let records = vec![
            record(dollars, TransactionType::Income, 100),
            record(euros, TransactionType::Expense, 40),
            record(unknown, TransactionType::Income, 9_999),
            record(dollars, TransactionType::Expense, 25),
        ];

        let totals = totals_by_currency(&records, &currencies);

        assert_eq!(
            vec![
                CurrencyAmounts {
                    currency: "EUR".to_owned(),
                    income_amount: 0,
                    expense_amount: 40,
                },
                CurrencyAmounts {
                    currency: "USD".to_owned(),
                    income_amount: 100,
                    expense_amount: 25,
                },
            ],
            totals
        );
    }

    #[test]
    fn repeated_labels_keep_first_position() {
        let mut results = Vec::new();
        insert_labelled(&mut results, "b".to_owned(), 1);
        insert_labelled(&mut results, "a".to_owned(), 2);
        insert_labelled(&mut results, "b".to_owned(), 3);

        assert_eq!(vec![("b".to_owned(), 3), ("a".to_owned(), 2)], results);
    }
}
