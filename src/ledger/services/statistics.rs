use std::collections::{BTreeMap, HashMap};

use tracing::debug;
use uuid::Uuid;

use crate::{
    ledger::{
        domain::statistics::{
            insert_labelled, parse_amounts_query, totals_by_account,
            totals_by_account_and_category, totals_by_currency, AccountCategoryTotal, AmountRecord,
            AmountsResult, QueryInvalidity, TimeWindow, YearMonth, MAX_AMOUNTS_QUERY_ITEMS,
        },
        errors::{LedgerError, LedgerResult},
    },
    repos::{DynAccountRepo, DynTransactionRepo},
};

/// How the bounds of a statistics window are read.
#[derive(Clone, Copy, Debug)]
pub struct WindowOptions {
    /// The caller's UTC offset in minutes.
    pub client_utc_offset: i16,
    /// Judge every transaction against the window in the offset it was
    /// recorded with instead of by its instant.
    pub use_transaction_timezone: bool,
}

#[derive(Clone)]
pub struct StatisticsService {
    account_repo: DynAccountRepo,
    transaction_repo: DynTransactionRepo,
}

impl StatisticsService {
    pub fn new(account_repo: DynAccountRepo, transaction_repo: DynTransactionRepo) -> Self {
        Self {
            account_repo,
            transaction_repo,
        }
    }

    /// Sum income and expense per account over `window`. Transfers and
    /// balance modifications are not counted.
    ///
    /// # Returns
    ///
    /// The income totals and the expense totals, keyed by account id.
    pub async fn total_income_and_expense(
        &self,
        user_id: Uuid,
        window: TimeWindow,
        options: WindowOptions,
    ) -> LedgerResult<(HashMap<Uuid, i64>, HashMap<Uuid, i64>)> {
        let records = self.records_within(user_id, window, options).await?;

        Ok(totals_by_account(&records))
    }

    /// Sum income and expense for each account and category pair present in
    /// `window`.
    pub async fn accounts_and_categories_totals(
        &self,
        user_id: Uuid,
        window: TimeWindow,
        options: WindowOptions,
    ) -> LedgerResult<Vec<AccountCategoryTotal>> {
        let records = self.records_within(user_id, window, options).await?;

        Ok(totals_by_account_and_category(&records))
    }

    /// Account and category totals for every calendar month from `start`
    /// through `end`.
    ///
    /// # Returns
    ///
    /// One entry per month keyed by `year * 100 + month`. Months without
    /// income or expense are present with no totals.
    pub async fn monthly_income_and_expense(
        &self,
        user_id: Uuid,
        start: YearMonth,
        end: YearMonth,
        options: WindowOptions,
    ) -> LedgerResult<BTreeMap<i32, Vec<AccountCategoryTotal>>> {
        if start > end {
            return Err(LedgerError::invalid(QueryInvalidity::ReversedMonthRange));
        }

        let offset = options.client_utc_offset;
        let whole_range = TimeWindow::between(
            start.start_unix_time(offset),
            end.next().start_unix_time(offset),
        );
        let records = self
            .transaction_repo
            .list_amount_records(
                user_id,
                whole_range.storage_range(options.use_transaction_timezone),
            )
            .await?;

        let months = start.through(end);
        debug!(%user_id, months = months.len(), records = records.len(), "Aggregating monthly totals.");

        Ok(months
            .into_iter()
            .map(|month| {
                let window = TimeWindow::between(
                    month.start_unix_time(offset),
                    month.next().start_unix_time(offset),
                );
                let in_month = records
                    .iter()
                    .filter(|record| Self::within(&window, record, options));

                (month.key(), totals_by_account_and_category(in_month))
            })
            .collect())
    }

    /// Income and expense per currency for several labelled ranges.
    ///
    /// # Arguments
    ///
    /// * `query` - Ranges encoded as `label_start_end`, joined by `|`.
    ///
    /// # Returns
    ///
    /// One result per distinct label in the order the labels first appear.
    /// A repeated label keeps its first position and the last range given
    /// for it.
    pub async fn transaction_amounts(
        &self,
        user_id: Uuid,
        query: &str,
        options: WindowOptions,
    ) -> LedgerResult<Vec<(String, AmountsResult)>> {
        let items = parse_amounts_query(query).map_err(LedgerError::invalid)?;

        if items.is_empty() {
            return Err(LedgerError::EmptyItems);
        }

        if items.len() > MAX_AMOUNTS_QUERY_ITEMS {
            return Err(LedgerError::TooManyItems {
                max: MAX_AMOUNTS_QUERY_ITEMS,
            });
        }

        let account_currencies = self
            .account_repo
            .list_accounts(user_id)
            .await?
            .into_iter()
            .map(|account| (account.id, account.currency))
            .collect::<HashMap<_, _>>();

        let mut results = Vec::with_capacity(items.len());

        for item in items {
            let window = TimeWindow::between(item.start_time, item.end_time);
            let records = self.records_within(user_id, window, options).await?;

            insert_labelled(
                &mut results,
                item.name,
                AmountsResult {
                    start_time: item.start_time,
                    end_time: item.end_time,
                    amounts: totals_by_currency(&records, &account_currencies),
                },
            );
        }

        Ok(results)
    }

    async fn records_within(
        &self,
        user_id: Uuid,
        window: TimeWindow,
        options: WindowOptions,
    ) -> LedgerResult<Vec<AmountRecord>> {
        let records = self
            .transaction_repo
            .list_amount_records(user_id, window.storage_range(options.use_transaction_timezone))
            .await?;

        Ok(records
            .into_iter()
            .filter(|record| Self::within(&window, record, options))
            .collect())
    }

    fn within(window: &TimeWindow, record: &AmountRecord, options: WindowOptions) -> bool {
        window.contains(
            record.time.unix_time(),
            record.utc_offset,
            options.client_utc_offset,
            options.use_transaction_timezone,
        )
    }
}

#[cfg(test)]
mod test {
    use crate::ledger::{
        domain::{categories::CategoryType, edit_window::TransactionEditScope},
        services::fixtures::{self, Fixture, NOW},
    };

    use super::*;

    const UTC: WindowOptions = WindowOptions {
        client_utc_offset: 0,
        use_transaction_timezone: false,
    };

    #[tokio::test]
    async fn amounts_are_grouped_by_currency_in_label_order() {
        let fixture = Fixture::new(TransactionEditScope::All).await;
        let dollars = fixture.leaf_account_in("Dollars", "USD").await;
        let euros = fixture.leaf_account_in("Euros", "EUR").await;
        let salary = fixture.secondary_category(CategoryType::Income).await;
        let food = fixture.secondary_category(CategoryType::Expense).await;
        let transactions = fixture.transactions();
        let user_id = fixture.user.id;

        for data in [
            fixtures::income(salary.id, dollars.id, 1000, NOW - 60),
            fixtures::expense(food.id, dollars.id, 300, NOW - 60),
            fixtures::expense(food.id, euros.id, 200, NOW - 60),
            fixtures::expense(food.id, euros.id, 50, NOW - 7200),
        ] {
            transactions
                .create_transaction(user_id, 0, data, None)
                .await
                .unwrap();
        }

        let query = format!("today_{}_{}|recent_{}_{}", NOW - 3600, NOW, 0, NOW);
        let results = fixture
            .statistics()
            .transaction_amounts(user_id, &query, UTC)
            .await
            .expect("amounts are computed");

        let labels = results.iter().map(|(label, _)| label.as_str()).collect::<Vec<_>>();
        assert_eq!(vec!["today", "recent"], labels);

        let today = &results[0].1.amounts;
        assert_eq!(2, today.len());
        assert_eq!("EUR", today[0].currency);
        assert_eq!((0, 200), (today[0].income_amount, today[0].expense_amount));
        assert_eq!("USD", today[1].currency);
        assert_eq!((1000, 300), (today[1].income_amount, today[1].expense_amount));

        let recent = &results[1].1.amounts;
        assert_eq!(250, recent[0].expense_amount);
    }

    #[tokio::test]
    async fn amounts_query_size_is_bounded() {
        let fixture = Fixture::new(TransactionEditScope::All).await;
        let statistics = fixture.statistics();

        let too_many = (0..=MAX_AMOUNTS_QUERY_ITEMS)
            .map(|i| format!("range{}_0_10", i))
            .collect::<Vec<_>>()
            .join("|");
        let error = statistics
            .transaction_amounts(fixture.user.id, &too_many, UTC)
            .await
            .unwrap_err();
        assert!(matches!(error, LedgerError::TooManyItems { max: 20 }));

        let error = statistics
            .transaction_amounts(fixture.user.id, "", UTC)
            .await
            .unwrap_err();
        assert!(matches!(error, LedgerError::EmptyItems));
    }

    #[tokio::test]
    async fn monthly_totals_include_every_month() {
        let fixture = Fixture::new(TransactionEditScope::All).await;
        let cash = fixture.leaf_account("Cash").await;
        let food = fixture.secondary_category(CategoryType::Expense).await;
        let transactions = fixture.transactions();
        let user_id = fixture.user.id;

        // 2024-02-15 and 2024-03-15.
        for unix_time in [1_707_998_400, NOW - 60] {
            transactions
                .create_transaction(
                    user_id,
                    0,
                    fixtures::expense(food.id, cash.id, 400, unix_time),
                    None,
                )
                .await
                .unwrap();
        }

        let start = YearMonth::new(2024, 1).unwrap();
        let end = YearMonth::new(2024, 3).unwrap();
        let monthly = fixture
            .statistics()
            .monthly_income_and_expense(user_id, start, end, UTC)
            .await
            .unwrap();

        assert_eq!(vec![202401, 202402, 202403], monthly.keys().copied().collect::<Vec<_>>());
        assert!(monthly[&202401].is_empty());
        assert_eq!(
            vec![AccountCategoryTotal {
                account_id: cash.id,
                category_id: Some(food.id),
                income_amount: 0,
                expense_amount: 400,
            }],
            monthly[&202402]
        );

        let error = fixture
            .statistics()
            .monthly_income_and_expense(user_id, end, start, UTC)
            .await
            .unwrap_err();
        assert!(matches!(error, LedgerError::Invalid(_)));
    }

    #[tokio::test]
    async fn transfers_are_left_out_of_totals() {
        let fixture = Fixture::new(TransactionEditScope::All).await;
        let checking = fixture.leaf_account("Checking").await;
        let wallet = fixture.leaf_account("Wallet").await;
        let moving = fixture.secondary_category(CategoryType::Transfer).await;
        let salary = fixture.secondary_category(CategoryType::Income).await;
        let transactions = fixture.transactions();
        let user_id = fixture.user.id;

        transactions
            .create_transaction(
                user_id,
                0,
                fixtures::transfer(moving.id, checking.id, wallet.id, 5000),
                None,
            )
            .await
            .unwrap();
        transactions
            .create_transaction(
                user_id,
                0,
                fixtures::income(salary.id, checking.id, 900, NOW - 30),
                None,
            )
            .await
            .unwrap();

        let (income, expense) = fixture
            .statistics()
            .total_income_and_expense(user_id, TimeWindow::between(NOW - 3600, NOW), UTC)
            .await
            .unwrap();

        assert_eq!(Some(&900), income.get(&checking.id));
        assert!(income.get(&wallet.id).is_none());
        assert!(expense.is_empty());
    }
}
