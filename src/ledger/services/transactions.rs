use std::collections::{HashMap, HashSet};

use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    clock::DynClock,
    identities::domain::users::User,
    ledger::{
        domain::{
            accounts::Account,
            statistics::{QueryInvalidity, YearMonth},
            tags::dedup_tag_ids,
            transaction_time::TransactionTime,
            transactions::{
                check_account_usable, check_category_usable, Transaction, TransactionData,
                TransactionFields, TransactionRole, TransactionType,
            },
        },
        errors::{LedgerError, LedgerInvalidity, LedgerResult, Resource},
    },
    repos::{
        DynAccountRepo, DynCategoryRepo, DynTagRepo, DynTransactionRepo, DynUserRepo, TagChanges,
        TransactionQuery,
    },
};

use super::hierarchy::HierarchyResolver;

pub const MAX_PAGE_SIZE: u32 = 50;

/// A transaction as presented to its owner.
#[derive(Clone, Debug, PartialEq)]
pub struct TransactionDetail {
    pub transaction: Transaction,
    pub tag_ids: Vec<Uuid>,
    /// Whether the owner may still modify or delete the transaction.
    pub editable: bool,
}

/// Filters a caller can narrow a transaction listing with.
#[derive(Clone, Debug, Default)]
pub struct TransactionFilter {
    pub transaction_type: Option<TransactionType>,
    /// A category, primary categories stand for all of their children.
    pub category_id: Option<Uuid>,
    /// An account, containers stand for all of their sub-accounts.
    pub account_id: Option<Uuid>,
    pub keyword: Option<String>,
    /// Inclusive bounds in unix seconds.
    pub min_unix_time: Option<i64>,
    pub max_unix_time: Option<i64>,
    /// Return transfer-in rows as they are stored instead of as the
    /// transfer they belong to.
    pub include_transfer_in_rows: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TransactionPage {
    pub items: Vec<TransactionDetail>,
    /// The cursor to pass to fetch the next page, if there may be one.
    pub next_cursor: Option<TransactionTime>,
}

#[derive(Clone)]
pub struct TransactionService {
    account_repo: DynAccountRepo,
    category_repo: DynCategoryRepo,
    clock: DynClock,
    resolver: HierarchyResolver,
    tag_repo: DynTagRepo,
    transaction_repo: DynTransactionRepo,
    user_repo: DynUserRepo,
}

impl TransactionService {
    pub fn new(
        account_repo: DynAccountRepo,
        category_repo: DynCategoryRepo,
        clock: DynClock,
        tag_repo: DynTagRepo,
        transaction_repo: DynTransactionRepo,
        user_repo: DynUserRepo,
    ) -> Self {
        Self {
            resolver: HierarchyResolver::new(account_repo.clone(), category_repo.clone()),
            account_repo,
            category_repo,
            clock,
            tag_repo,
            transaction_repo,
            user_repo,
        }
    }

    /// Record a new transaction.
    ///
    /// # Arguments
    ///
    /// * `user_id` - The owner of the transaction.
    /// * `client_utc_offset` - The caller's UTC offset in minutes.
    /// * `data` - The transaction's type and fields.
    /// * `client_ip` - The address the request came from.
    ///
    /// # Returns
    ///
    /// The stored transaction. A transfer is stored as a transfer-out row and
    /// its transfer-in mirror; the transfer-out row is returned.
    pub async fn create_transaction(
        &self,
        user_id: Uuid,
        client_utc_offset: i16,
        data: TransactionData,
        client_ip: Option<String>,
    ) -> LedgerResult<TransactionDetail> {
        LedgerError::check(&data, LedgerInvalidity::Transaction)?;

        let user = self.user_repo.get_user(user_id).await?;
        let now = self.clock.now();

        let time = TransactionTime::min_for_unix_time(data.fields.unix_time);
        if !user.edit_policy().allows(time, now, data.fields.utc_offset) {
            return Err(LedgerError::EditWindowViolation);
        }

        let tag_ids = self
            .check_references(user_id, data.transaction_type, &data.fields)
            .await?;

        let transaction =
            data.into_transaction(Uuid::new_v4(), user_id, client_ip, self.clock.now_utc());
        let stored = self
            .transaction_repo
            .create_transaction(&transaction, &tag_ids)
            .await?;

        info!(%user_id, transaction_id = %stored.id, time = %stored.time, "Created transaction.");

        self.present_one(&user, client_utc_offset, stored).await
    }

    /// Replace the fields of a transaction.
    ///
    /// Transfers are modified through their transfer-out row, the transfer-in
    /// mirror follows. Both the current and the new time must lie within the
    /// owner's edit window, each judged in its own timezone, and the accounts
    /// the transaction currently uses must not be hidden.
    pub async fn modify_transaction(
        &self,
        user_id: Uuid,
        client_utc_offset: i16,
        transaction_id: Uuid,
        fields: TransactionFields,
    ) -> LedgerResult<TransactionDetail> {
        let current = self
            .transaction_repo
            .get_transaction(user_id, transaction_id)
            .await?;

        if current.is_transfer_in() {
            return Err(LedgerError::WrongType(TransactionRole::TransferIn));
        }

        let data = TransactionData {
            transaction_type: current.transaction_type,
            fields,
        };
        LedgerError::check(&data, LedgerInvalidity::Transaction)?;

        let user = self.user_repo.get_user(user_id).await?;
        let now = self.clock.now();
        let policy = user.edit_policy();

        let new_time = TransactionTime::min_for_unix_time(data.fields.unix_time);
        if !policy.allows(current.time, now, current.utc_offset)
            || !policy.allows(new_time, now, data.fields.utc_offset)
        {
            return Err(LedgerError::EditWindowViolation);
        }

        self.check_current_accounts(&current).await?;

        let tag_ids = self
            .check_references(user_id, data.transaction_type, &data.fields)
            .await?;

        let current_tag_ids = self
            .tag_repo
            .tag_ids_of_transactions(user_id, &[current.id])
            .await?
            .remove(&current.id)
            .unwrap_or_default();
        let tag_changes = TagChanges::between(&current_tag_ids, &tag_ids);

        let updated = current.with_changes(&data.fields, self.clock.now_utc());
        if updated.has_same_content(&current) && tag_changes.is_empty() {
            return Err(LedgerError::NoOp);
        }

        let stored = self
            .transaction_repo
            .modify_transaction(&updated, &tag_changes)
            .await?;

        info!(%user_id, %transaction_id, time = %stored.time, "Modified transaction.");

        self.present_one(&user, client_utc_offset, stored).await
    }

    /// Delete a transaction. Deleting a transfer-out row deletes the whole
    /// transfer.
    pub async fn delete_transaction(
        &self,
        user_id: Uuid,
        client_utc_offset: i16,
        transaction_id: Uuid,
    ) -> LedgerResult<()> {
        let current = self
            .transaction_repo
            .get_transaction(user_id, transaction_id)
            .await?;

        if current.is_transfer_in() {
            return Err(LedgerError::WrongType(TransactionRole::TransferIn));
        }

        let user = self.user_repo.get_user(user_id).await?;
        if !user
            .edit_policy()
            .allows(current.time, self.clock.now(), client_utc_offset)
        {
            return Err(LedgerError::EditWindowViolation);
        }

        self.check_current_accounts(&current).await?;

        self.transaction_repo
            .delete_transaction(user_id, transaction_id, self.clock.now_utc())
            .await?;

        info!(%user_id, %transaction_id, "Deleted transaction.");

        Ok(())
    }

    /// Fetch a single transaction. A transfer-in row is returned as the
    /// transfer it belongs to.
    pub async fn get_transaction(
        &self,
        user_id: Uuid,
        client_utc_offset: i16,
        transaction_id: Uuid,
    ) -> LedgerResult<TransactionDetail> {
        let user = self.user_repo.get_user(user_id).await?;
        let transaction = self
            .transaction_repo
            .get_transaction(user_id, transaction_id)
            .await?;

        self.present_one(&user, client_utc_offset, transaction).await
    }

    /// List transactions newest first, one page at a time.
    ///
    /// # Arguments
    ///
    /// * `before` - The cursor returned with the previous page.
    /// * `page_size` - The maximum number of rows to return, at most
    ///   [`MAX_PAGE_SIZE`].
    pub async fn list_transactions(
        &self,
        user_id: Uuid,
        client_utc_offset: i16,
        filter: &TransactionFilter,
        before: Option<TransactionTime>,
        page_size: u32,
    ) -> LedgerResult<TransactionPage> {
        if !(1..=MAX_PAGE_SIZE).contains(&page_size) {
            return Err(LedgerError::invalid(QueryInvalidity::PageSizeOutOfRange(
                MAX_PAGE_SIZE,
            )));
        }

        let user = self.user_repo.get_user(user_id).await?;

        let mut query = self.build_query(user_id, filter).await?;
        query.before = before;
        // One extra row tells whether another page follows.
        query.limit = Some(page_size + 1);

        let mut rows = self.transaction_repo.list_transactions(&query).await?;
        let next_cursor = if rows.len() > page_size as usize {
            rows.truncate(page_size as usize);
            rows.last().map(|row| row.time)
        } else {
            None
        };

        debug!(%user_id, rows = rows.len(), "Listed transactions.");

        let items = self
            .present(&user, client_utc_offset, rows, filter.include_transfer_in_rows)
            .await?;

        Ok(TransactionPage { items, next_cursor })
    }

    /// List every transaction of a calendar month, the month's boundaries
    /// being taken in the caller's timezone.
    pub async fn list_transactions_in_month(
        &self,
        user_id: Uuid,
        client_utc_offset: i16,
        filter: &TransactionFilter,
        month: YearMonth,
    ) -> LedgerResult<Vec<TransactionDetail>> {
        let user = self.user_repo.get_user(user_id).await?;

        let start = month.start_unix_time(client_utc_offset);
        let end = month.next().start_unix_time(client_utc_offset);

        let mut query = self.build_query(user_id, filter).await?;
        query.min_time = Some(TransactionTime::min_for_unix_time(start));
        query.max_time = Some(TransactionTime::max_for_unix_time(end - 1));

        let rows = self.transaction_repo.list_transactions(&query).await?;

        self.present(&user, client_utc_offset, rows, filter.include_transfer_in_rows)
            .await
    }

    /// Count the rows a listing with the same filter would return.
    pub async fn count_transactions(
        &self,
        user_id: Uuid,
        filter: &TransactionFilter,
    ) -> LedgerResult<i64> {
        let query = self.build_query(user_id, filter).await?;

        Ok(self.transaction_repo.count_transactions(&query).await?)
    }

    async fn build_query(
        &self,
        user_id: Uuid,
        filter: &TransactionFilter,
    ) -> LedgerResult<TransactionQuery> {
        if let (Some(min), Some(max)) = (filter.min_unix_time, filter.max_unix_time) {
            if min > max {
                return Err(LedgerError::invalid(QueryInvalidity::ReversedTimeRange));
            }
        }

        let account_ids = self
            .resolver
            .resolve_account_group(user_id, filter.account_id)
            .await?;
        let category_ids = self
            .resolver
            .resolve_category_group(user_id, filter.category_id)
            .await?;

        Ok(TransactionQuery {
            user_id,
            transaction_type: filter.transaction_type,
            category_ids,
            account_ids,
            keyword: filter
                .keyword
                .as_ref()
                .map(|keyword| keyword.trim().to_owned())
                .filter(|keyword| !keyword.is_empty()),
            min_time: filter.min_unix_time.map(TransactionTime::min_for_unix_time),
            max_time: filter.max_unix_time.map(TransactionTime::max_for_unix_time),
            before: None,
            include_transfer_in_rows: filter.include_transfer_in_rows,
            limit: None,
        })
    }

    /// Check that everything a transaction references belongs to the user
    /// and can be used.
    ///
    /// # Returns
    ///
    /// The de-duplicated tag ids.
    async fn check_references(
        &self,
        user_id: Uuid,
        transaction_type: TransactionType,
        fields: &TransactionFields,
    ) -> LedgerResult<Vec<Uuid>> {
        let mut account_ids = vec![fields.source_account_id];
        if transaction_type == TransactionType::Transfer {
            account_ids.extend(fields.destination_account_id);
        }

        for account_id in account_ids {
            let account = self.account_repo.get_account(user_id, account_id).await?;
            check_account_usable(&account).map_err(LedgerError::invalid)?;
        }

        if let Some(category_id) = fields.category_id {
            let category = self
                .category_repo
                .get_category(user_id, category_id)
                .await?;
            check_category_usable(transaction_type, &category).map_err(LedgerError::invalid)?;
        }

        let tag_ids = dedup_tag_ids(&fields.tag_ids);
        if !tag_ids.is_empty() {
            let tags = self.tag_repo.get_tags_by_ids(user_id, &tag_ids).await?;
            if tags.len() != tag_ids.len() {
                return Err(LedgerError::NotFound(Resource::Tag));
            }
        }

        Ok(tag_ids)
    }

    /// A transaction stays read-only while any account it is recorded
    /// against is hidden.
    async fn check_current_accounts(&self, current: &Transaction) -> LedgerResult<()> {
        let accounts = self
            .account_repo
            .get_accounts_by_ids(current.user_id, &current.account_ids())
            .await?;
        for account in &accounts {
            check_account_usable(account).map_err(LedgerError::invalid)?;
        }

        Ok(())
    }

    async fn present_one(
        &self,
        user: &User,
        client_utc_offset: i16,
        transaction: Transaction,
    ) -> LedgerResult<TransactionDetail> {
        self.present(user, client_utc_offset, vec![transaction], false)
            .await?
            .pop()
            .ok_or(LedgerError::NotFound(Resource::Account))
    }

    /// Turn stored rows into what the owner sees.
    ///
    /// Unless `keep_transfer_in_rows` is set, transfer-in rows are shown as
    /// their transfer and a transfer already present in `rows` is shown
    /// once. Rows whose accounts no longer exist are dropped.
    async fn present(
        &self,
        user: &User,
        client_utc_offset: i16,
        rows: Vec<Transaction>,
        keep_transfer_in_rows: bool,
    ) -> LedgerResult<Vec<TransactionDetail>> {
        let views = if keep_transfer_in_rows {
            rows
        } else {
            let mut seen = HashSet::new();

            rows.iter()
                .map(Transaction::as_transfer_out_view)
                .filter(|view| seen.insert(view.id))
                .collect::<Vec<_>>()
        };

        let mut account_ids = views
            .iter()
            .flat_map(|view| view.account_ids())
            .collect::<Vec<_>>();
        account_ids.sort();
        account_ids.dedup();

        let accounts: HashMap<Uuid, Account> = self
            .account_repo
            .get_accounts_by_ids(user.id, &account_ids)
            .await?
            .into_iter()
            .map(|account| (account.id, account))
            .collect();

        let views = views
            .into_iter()
            .filter(|view| view.account_ids().iter().all(|id| accounts.contains_key(id)))
            .collect::<Vec<_>>();

        let transaction_ids = views.iter().map(|view| view.id).collect::<Vec<_>>();
        let mut tag_ids = self
            .tag_repo
            .tag_ids_of_transactions(user.id, &transaction_ids)
            .await?;

        let policy = user.edit_policy();
        let now = self.clock.now();

        Ok(views
            .into_iter()
            .map(|view| {
                let account = accounts.get(&view.account_id);
                let related_account = view
                    .related_account_id
                    .and_then(|id| accounts.get(&id));
                let editable = !view.is_transfer_in()
                    && view.is_editable(&policy, now, client_utc_offset, account, related_account);

                TransactionDetail {
                    tag_ids: tag_ids.remove(&view.id).unwrap_or_default(),
                    transaction: view,
                    editable,
                }
            })
            .collect())
    }
}
