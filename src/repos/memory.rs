use std::{
    collections::HashMap,
    sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
    identities::domain::users::User,
    ledger::{
        domain::{
            accounts::{Account, AccountCategory},
            categories::{CategoryType, TransactionCategory},
            statistics::{AmountRecord, TimeWindow},
            tags::TransactionTag,
            transaction_time::TransactionTime,
            transactions::{net_balance_changes, Transaction, TransactionType},
        },
        errors::Resource,
    },
};

use super::{
    AccountRepo, CategoryRepo, RepoError, RepoResult, TagChanges, TagRepo, TransactionQuery,
    TransactionRepo, UserRepo,
};

struct Stored<T> {
    value: T,
    deleted: bool,
}

impl<T> Stored<T> {
    fn new(value: T) -> Self {
        Self {
            value,
            deleted: false,
        }
    }
}

struct TagIndexEntry {
    transaction_id: Uuid,
    tag_id: Uuid,
    user_id: Uuid,
}

#[derive(Default)]
struct Tables {
    users: HashMap<Uuid, Stored<(User, String)>>,
    accounts: HashMap<Uuid, Stored<Account>>,
    categories: HashMap<Uuid, Stored<TransactionCategory>>,
    tags: HashMap<Uuid, Stored<TransactionTag>>,
    transactions: HashMap<Uuid, Stored<Transaction>>,
    tag_index: Vec<TagIndexEntry>,
}

impl Tables {
    fn live_accounts(&self, user_id: Uuid) -> impl Iterator<Item = &Account> {
        self.accounts
            .values()
            .filter(move |a| !a.deleted && a.value.user_id == user_id)
            .map(|a| &a.value)
    }

    fn live_categories(&self, user_id: Uuid) -> impl Iterator<Item = &TransactionCategory> {
        self.categories
            .values()
            .filter(move |c| !c.deleted && c.value.user_id == user_id)
            .map(|c| &c.value)
    }

    fn live_tags(&self, user_id: Uuid) -> impl Iterator<Item = &TransactionTag> {
        self.tags
            .values()
            .filter(move |t| !t.deleted && t.value.user_id == user_id)
            .map(|t| &t.value)
    }

    fn live_transactions(&self, user_id: Uuid) -> impl Iterator<Item = &Transaction> {
        self.transactions
            .values()
            .filter(move |t| !t.deleted && t.value.user_id == user_id)
            .map(|t| &t.value)
    }

    fn live_transaction(&self, user_id: Uuid, transaction_id: Uuid) -> RepoResult<&Transaction> {
        self.transactions
            .get(&transaction_id)
            .filter(|t| !t.deleted && t.value.user_id == user_id)
            .map(|t| &t.value)
            .ok_or(RepoError::NotFound(Resource::Transaction))
    }

    fn allocate_time(&self, user_id: Uuid, unix_time: i64, slots: i64) -> RepoResult<TransactionTime> {
        let min = TransactionTime::min_for_unix_time(unix_time);
        let max = TransactionTime::max_for_unix_time(unix_time);

        // Deleted rows keep their slot.
        let latest = self
            .transactions
            .values()
            .map(|t| &t.value)
            .filter(|t| t.user_id == user_id && t.time >= min && t.time <= max)
            .map(|t| t.time)
            .max();

        TransactionTime::allocate(unix_time, latest, slots)
            .ok_or(RepoError::TooManyTransactionsInOneSecond)
    }

    fn apply_balance_changes(&mut self, user_id: Uuid, changes: &[(Uuid, i64)], now: DateTime<Utc>) {
        for (account_id, delta) in changes {
            if let Some(account) = self.accounts.get_mut(account_id) {
                if account.value.user_id == user_id {
                    account.value.balance += delta;
                    account.value.updated_at = now;
                }
            }
        }
    }

    fn attach_tags(&mut self, user_id: Uuid, transaction_id: Uuid, tag_ids: &[Uuid]) {
        for tag_id in tag_ids {
            let exists = self
                .tag_index
                .iter()
                .any(|e| e.transaction_id == transaction_id && e.tag_id == *tag_id);

            if !exists {
                self.tag_index.push(TagIndexEntry {
                    transaction_id,
                    tag_id: *tag_id,
                    user_id,
                });
            }
        }
    }

    fn soft_delete_transaction(&mut self, transaction_id: Uuid) {
        if let Some(stored) = self.transactions.get_mut(&transaction_id) {
            stored.deleted = true;
        }
    }
}

/// A store keeping every table in memory.
///
/// Each mutating call holds the write lock for its whole duration, so other
/// callers observe either none or all of its changes.
#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<RwLock<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RepoResult<RwLockReadGuard<'_, Tables>> {
        self.tables
            .read()
            .map_err(|_| RepoError::Other(anyhow!("memory store lock is poisoned")))
    }

    fn write(&self) -> RepoResult<RwLockWriteGuard<'_, Tables>> {
        self.tables
            .write()
            .map_err(|_| RepoError::Other(anyhow!("memory store lock is poisoned")))
    }
}

#[async_trait]
impl UserRepo for MemoryStore {
    async fn create_user(&self, user: &User, normalized_email: &str) -> RepoResult<()> {
        let mut tables = self.write()?;

        let duplicate = tables
            .users
            .values()
            .any(|u| !u.deleted && u.value.1 == normalized_email);
        if duplicate {
            return Err(RepoError::Duplicate(Resource::User));
        }

        tables.users.insert(
            user.id,
            Stored::new((user.clone(), normalized_email.to_owned())),
        );

        Ok(())
    }

    async fn get_user(&self, user_id: Uuid) -> RepoResult<User> {
        self.read()?
            .users
            .get(&user_id)
            .filter(|u| !u.deleted)
            .map(|u| u.value.0.clone())
            .ok_or(RepoError::NotFound(Resource::User))
    }

    async fn update_user(&self, user: &User) -> RepoResult<()> {
        let mut tables = self.write()?;

        let stored = tables
            .users
            .get_mut(&user.id)
            .filter(|u| !u.deleted)
            .ok_or(RepoError::NotFound(Resource::User))?;
        stored.value.0 = user.clone();

        Ok(())
    }
}

#[async_trait]
impl AccountRepo for MemoryStore {
    async fn list_accounts(&self, user_id: Uuid) -> RepoResult<Vec<Account>> {
        let tables = self.read()?;

        let mut accounts = tables.live_accounts(user_id).cloned().collect::<Vec<_>>();
        accounts.sort_by_key(|a| (a.parent_id.is_some(), a.display_order, a.id));

        Ok(accounts)
    }

    async fn get_account(&self, user_id: Uuid, account_id: Uuid) -> RepoResult<Account> {
        self.read()?
            .live_accounts(user_id)
            .find(|a| a.id == account_id)
            .cloned()
            .ok_or(RepoError::NotFound(Resource::Account))
    }

    async fn get_accounts_by_ids(
        &self,
        user_id: Uuid,
        account_ids: &[Uuid],
    ) -> RepoResult<Vec<Account>> {
        Ok(self
            .read()?
            .live_accounts(user_id)
            .filter(|a| account_ids.contains(&a.id))
            .cloned()
            .collect())
    }

    async fn get_sub_accounts(&self, user_id: Uuid, parent_id: Uuid) -> RepoResult<Vec<Account>> {
        let tables = self.read()?;

        let mut accounts = tables
            .live_accounts(user_id)
            .filter(|a| a.parent_id == Some(parent_id))
            .cloned()
            .collect::<Vec<_>>();
        accounts.sort_by_key(|a| (a.display_order, a.id));

        Ok(accounts)
    }

    async fn max_account_display_order(
        &self,
        user_id: Uuid,
        category: AccountCategory,
    ) -> RepoResult<Option<i32>> {
        Ok(self
            .read()?
            .live_accounts(user_id)
            .filter(|a| a.parent_id.is_none() && a.category == category)
            .map(|a| a.display_order)
            .max())
    }

    async fn create_accounts(
        &self,
        account: &Account,
        sub_accounts: &[Account],
        opening_transactions: &[Transaction],
    ) -> RepoResult<()> {
        let mut tables = self.write()?;

        if let Some(first) = opening_transactions.first() {
            let start = tables.allocate_time(
                first.user_id,
                first.time.unix_time(),
                opening_transactions.len() as i64,
            )?;

            for (index, transaction) in opening_transactions.iter().enumerate() {
                let opening = Transaction {
                    time: TransactionTime::from_packed(start.packed() + index as i64),
                    ..transaction.clone()
                };

                tables.transactions.insert(opening.id, Stored::new(opening));
            }
        }

        for new_account in std::iter::once(account).chain(sub_accounts) {
            tables
                .accounts
                .insert(new_account.id, Stored::new(new_account.clone()));
        }

        Ok(())
    }

    async fn modify_accounts(&self, accounts: &[Account]) -> RepoResult<()> {
        let mut tables = self.write()?;

        let all_exist = accounts.iter().all(|account| {
            matches!(
                tables.accounts.get(&account.id),
                Some(stored) if !stored.deleted && stored.value.user_id == account.user_id
            )
        });
        if !all_exist {
            return Err(RepoError::NotFound(Resource::Account));
        }

        for account in accounts {
            if let Some(stored) = tables.accounts.get_mut(&account.id) {
                stored.value = Account {
                    balance: stored.value.balance,
                    display_order: stored.value.display_order,
                    ..account.clone()
                };
            }
        }

        Ok(())
    }

    async fn hide_accounts(
        &self,
        user_id: Uuid,
        account_ids: &[Uuid],
        hidden: bool,
        now: DateTime<Utc>,
    ) -> RepoResult<()> {
        let mut tables = self.write()?;

        for account_id in account_ids {
            if let Some(stored) = tables.accounts.get_mut(account_id) {
                if !stored.deleted && stored.value.user_id == user_id {
                    stored.value.hidden = hidden;
                    stored.value.updated_at = now;
                }
            }
        }

        Ok(())
    }

    async fn set_display_orders(
        &self,
        user_id: Uuid,
        orders: &[(Uuid, i32)],
        now: DateTime<Utc>,
    ) -> RepoResult<()> {
        let mut tables = self.write()?;

        let all_exist = orders.iter().all(|(account_id, _)| {
            matches!(
                tables.accounts.get(account_id),
                Some(stored) if !stored.deleted && stored.value.user_id == user_id
            )
        });
        if !all_exist {
            return Err(RepoError::NotFound(Resource::Account));
        }

        for (account_id, display_order) in orders {
            if let Some(stored) = tables.accounts.get_mut(account_id) {
                stored.value.display_order = *display_order;
                stored.value.updated_at = now;
            }
        }

        Ok(())
    }

    async fn delete_accounts(
        &self,
        user_id: Uuid,
        account_ids: &[Uuid],
        now: DateTime<Utc>,
    ) -> RepoResult<()> {
        let mut tables = self.write()?;

        let in_use = tables.live_transactions(user_id).any(|t| {
            account_ids.contains(&t.account_id)
                || matches!(t.related_account_id, Some(id) if account_ids.contains(&id))
        });
        if in_use {
            return Err(RepoError::InUse(Resource::Account));
        }

        for account_id in account_ids {
            if let Some(stored) = tables.accounts.get_mut(account_id) {
                if stored.value.user_id == user_id {
                    stored.deleted = true;
                    stored.value.updated_at = now;
                }
            }
        }

        if let Some(stored) = tables.users.get_mut(&user_id) {
            let user = &mut stored.value.0;
            if matches!(user.default_account_id, Some(id) if account_ids.contains(&id)) {
                user.default_account_id = None;
                user.updated_at = now;
            }
        }

        Ok(())
    }
}

#[async_trait]
impl CategoryRepo for MemoryStore {
    async fn list_categories(
        &self,
        user_id: Uuid,
        category_type: Option<CategoryType>,
    ) -> RepoResult<Vec<TransactionCategory>> {
        let tables = self.read()?;

        let mut categories = tables
            .live_categories(user_id)
            .filter(|c| category_type.map_or(true, |t| c.category_type == t))
            .cloned()
            .collect::<Vec<_>>();
        categories.sort_by_key(|c| (c.parent_id.is_some(), c.display_order, c.id));

        Ok(categories)
    }

    async fn get_category(
        &self,
        user_id: Uuid,
        category_id: Uuid,
    ) -> RepoResult<TransactionCategory> {
        self.read()?
            .live_categories(user_id)
            .find(|c| c.id == category_id)
            .cloned()
            .ok_or(RepoError::NotFound(Resource::Category))
    }

    async fn get_sub_categories(
        &self,
        user_id: Uuid,
        parent_id: Uuid,
    ) -> RepoResult<Vec<TransactionCategory>> {
        let tables = self.read()?;

        let mut categories = tables
            .live_categories(user_id)
            .filter(|c| c.parent_id == Some(parent_id))
            .cloned()
            .collect::<Vec<_>>();
        categories.sort_by_key(|c| (c.display_order, c.id));

        Ok(categories)
    }

    async fn max_category_display_order(
        &self,
        user_id: Uuid,
        parent_id: Option<Uuid>,
        category_type: CategoryType,
    ) -> RepoResult<Option<i32>> {
        Ok(self
            .read()?
            .live_categories(user_id)
            .filter(|c| c.parent_id == parent_id && c.category_type == category_type)
            .map(|c| c.display_order)
            .max())
    }

    async fn create_category(&self, category: &TransactionCategory) -> RepoResult<()> {
        self.write()?
            .categories
            .insert(category.id, Stored::new(category.clone()));

        Ok(())
    }

    async fn hide_categories(
        &self,
        user_id: Uuid,
        category_ids: &[Uuid],
        hidden: bool,
        now: DateTime<Utc>,
    ) -> RepoResult<()> {
        let mut tables = self.write()?;

        for category_id in category_ids {
            if let Some(stored) = tables.categories.get_mut(category_id) {
                if !stored.deleted && stored.value.user_id == user_id {
                    stored.value.hidden = hidden;
                    stored.value.updated_at = now;
                }
            }
        }

        Ok(())
    }

    async fn delete_categories(
        &self,
        user_id: Uuid,
        category_ids: &[Uuid],
        now: DateTime<Utc>,
    ) -> RepoResult<()> {
        let mut tables = self.write()?;

        let in_use = tables
            .live_transactions(user_id)
            .any(|t| matches!(t.category_id, Some(id) if category_ids.contains(&id)));
        if in_use {
            return Err(RepoError::InUse(Resource::Category));
        }

        for category_id in category_ids {
            if let Some(stored) = tables.categories.get_mut(category_id) {
                if stored.value.user_id == user_id {
                    stored.deleted = true;
                    stored.value.updated_at = now;
                }
            }
        }

        Ok(())
    }
}

#[async_trait]
impl TagRepo for MemoryStore {
    async fn list_tags(&self, user_id: Uuid) -> RepoResult<Vec<TransactionTag>> {
        let tables = self.read()?;

        let mut tags = tables.live_tags(user_id).cloned().collect::<Vec<_>>();
        tags.sort_by_key(|t| (t.display_order, t.id));

        Ok(tags)
    }

    async fn get_tags_by_ids(
        &self,
        user_id: Uuid,
        tag_ids: &[Uuid],
    ) -> RepoResult<Vec<TransactionTag>> {
        Ok(self
            .read()?
            .live_tags(user_id)
            .filter(|t| tag_ids.contains(&t.id))
            .cloned()
            .collect())
    }

    async fn max_tag_display_order(&self, user_id: Uuid) -> RepoResult<Option<i32>> {
        Ok(self
            .read()?
            .live_tags(user_id)
            .map(|t| t.display_order)
            .max())
    }

    async fn create_tag(&self, tag: &TransactionTag) -> RepoResult<()> {
        let mut tables = self.write()?;

        if tables.live_tags(tag.user_id).any(|t| t.name == tag.name) {
            return Err(RepoError::Duplicate(Resource::Tag));
        }

        tables.tags.insert(tag.id, Stored::new(tag.clone()));

        Ok(())
    }

    async fn rename_tag(
        &self,
        user_id: Uuid,
        tag_id: Uuid,
        name: &str,
        now: DateTime<Utc>,
    ) -> RepoResult<()> {
        let mut tables = self.write()?;

        if tables
            .live_tags(user_id)
            .any(|t| t.id != tag_id && t.name == name)
        {
            return Err(RepoError::Duplicate(Resource::Tag));
        }

        let stored = tables
            .tags
            .get_mut(&tag_id)
            .filter(|t| !t.deleted && t.value.user_id == user_id)
            .ok_or(RepoError::NotFound(Resource::Tag))?;
        stored.value.name = name.to_owned();
        stored.value.updated_at = now;

        Ok(())
    }

    async fn delete_tag(&self, user_id: Uuid, tag_id: Uuid, now: DateTime<Utc>) -> RepoResult<()> {
        let mut tables = self.write()?;

        let stored = tables
            .tags
            .get_mut(&tag_id)
            .filter(|t| !t.deleted && t.value.user_id == user_id)
            .ok_or(RepoError::NotFound(Resource::Tag))?;
        stored.deleted = true;
        stored.value.updated_at = now;

        tables
            .tag_index
            .retain(|e| !(e.tag_id == tag_id && e.user_id == user_id));

        Ok(())
    }

    async fn tag_ids_of_transactions(
        &self,
        user_id: Uuid,
        transaction_ids: &[Uuid],
    ) -> RepoResult<HashMap<Uuid, Vec<Uuid>>> {
        let tables = self.read()?;

        let mut tag_ids: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
        for entry in tables.tag_index.iter().filter(|e| {
            e.user_id == user_id
                && transaction_ids.contains(&e.transaction_id)
                && matches!(tables.tags.get(&e.tag_id), Some(tag) if !tag.deleted)
        }) {
            tag_ids.entry(entry.transaction_id).or_default().push(entry.tag_id);
        }

        Ok(tag_ids)
    }
}

#[async_trait]
impl TransactionRepo for MemoryStore {
    async fn get_transaction(
        &self,
        user_id: Uuid,
        transaction_id: Uuid,
    ) -> RepoResult<Transaction> {
        self.read()?
            .live_transaction(user_id, transaction_id)
            .map(Clone::clone)
    }

    async fn list_transactions(&self, query: &TransactionQuery) -> RepoResult<Vec<Transaction>> {
        let tables = self.read()?;

        let mut transactions = tables
            .live_transactions(query.user_id)
            .filter(|t| query.matches(t))
            .cloned()
            .collect::<Vec<_>>();
        transactions.sort_by(|a, b| (b.time, b.id).cmp(&(a.time, a.id)));

        if let Some(limit) = query.limit {
            transactions.truncate(limit as usize);
        }

        Ok(transactions)
    }

    async fn count_transactions(&self, query: &TransactionQuery) -> RepoResult<i64> {
        let tables = self.read()?;

        Ok(tables
            .live_transactions(query.user_id)
            .filter(|t| query.matches(t))
            .count() as i64)
    }

    async fn list_amount_records(
        &self,
        user_id: Uuid,
        window: TimeWindow,
    ) -> RepoResult<Vec<AmountRecord>> {
        let tables = self.read()?;

        Ok(tables
            .live_transactions(user_id)
            .filter(|t| {
                matches!(
                    t.transaction_type,
                    TransactionType::Income | TransactionType::Expense
                )
            })
            .filter(|t| {
                let unix_time = t.time.unix_time();
                window.start.map_or(true, |start| unix_time >= start)
                    && window.end.map_or(true, |end| unix_time < end)
            })
            .map(|t| AmountRecord {
                account_id: t.account_id,
                category_id: t.category_id,
                transaction_type: t.transaction_type,
                time: t.time,
                utc_offset: t.utc_offset,
                amount: t.amount,
            })
            .collect())
    }

    async fn create_transaction(
        &self,
        transaction: &Transaction,
        tag_ids: &[Uuid],
    ) -> RepoResult<Transaction> {
        let mut tables = self.write()?;

        let slots = if transaction.is_transfer_out() { 2 } else { 1 };
        let time = tables.allocate_time(transaction.user_id, transaction.time.unix_time(), slots)?;

        let mut stored = Transaction {
            time,
            ..transaction.clone()
        };
        let mirror = stored.transfer_in_mirror(Uuid::new_v4());
        stored.related_id = mirror.as_ref().map(|mirror| mirror.id);

        tables
            .transactions
            .insert(stored.id, Stored::new(stored.clone()));
        if let Some(mirror) = mirror {
            tables.transactions.insert(mirror.id, Stored::new(mirror));
        }

        tables.apply_balance_changes(
            stored.user_id,
            &net_balance_changes(&[], &[&stored]),
            stored.created_at,
        );
        tables.attach_tags(stored.user_id, stored.id, tag_ids);

        Ok(stored)
    }

    async fn modify_transaction(
        &self,
        transaction: &Transaction,
        tag_changes: &TagChanges,
    ) -> RepoResult<Transaction> {
        let mut tables = self.write()?;

        let current = tables
            .live_transaction(transaction.user_id, transaction.id)?
            .clone();

        let time = if current.time.unix_time() == transaction.time.unix_time() {
            current.time
        } else {
            let slots = if current.is_transfer_out() { 2 } else { 1 };
            tables.allocate_time(transaction.user_id, transaction.time.unix_time(), slots)?
        };

        let stored = Transaction {
            time,
            related_id: current.related_id,
            ..transaction.clone()
        };
        let mirror = current
            .related_id
            .and_then(|mirror_id| stored.transfer_in_mirror(mirror_id));

        tables
            .transactions
            .insert(stored.id, Stored::new(stored.clone()));
        if let Some(mirror) = mirror {
            tables.transactions.insert(mirror.id, Stored::new(mirror));
        }

        tables.apply_balance_changes(
            stored.user_id,
            &net_balance_changes(&[&current], &[&stored]),
            stored.updated_at,
        );

        tables
            .tag_index
            .retain(|e| !(e.transaction_id == stored.id && tag_changes.remove.contains(&e.tag_id)));
        tables.attach_tags(stored.user_id, stored.id, &tag_changes.add);

        Ok(stored)
    }

    async fn delete_transaction(
        &self,
        user_id: Uuid,
        transaction_id: Uuid,
        now: DateTime<Utc>,
    ) -> RepoResult<()> {
        let mut tables = self.write()?;

        let current = tables.live_transaction(user_id, transaction_id)?.clone();

        tables.soft_delete_transaction(current.id);
        if let Some(related_id) = current.related_id {
            tables.soft_delete_transaction(related_id);
        }

        tables.apply_balance_changes(user_id, &net_balance_changes(&[&current], &[]), now);
        tables.tag_index.retain(|e| {
            e.transaction_id != current.id && Some(e.transaction_id) != current.related_id
        });

        Ok(())
    }

    async fn clear_user_data(&self, user_id: Uuid, now: DateTime<Utc>) -> RepoResult<()> {
        let mut tables = self.write()?;

        tables.tag_index.retain(|e| e.user_id != user_id);

        for stored in tables.transactions.values_mut() {
            if stored.value.user_id == user_id {
                stored.deleted = true;
            }
        }
        for stored in tables.accounts.values_mut() {
            if stored.value.user_id == user_id {
                stored.deleted = true;
            }
        }
        for stored in tables.categories.values_mut() {
            if stored.value.user_id == user_id {
                stored.deleted = true;
            }
        }
        for stored in tables.tags.values_mut() {
            if stored.value.user_id == user_id {
                stored.deleted = true;
            }
        }

        if let Some(stored) = tables.users.get_mut(&user_id) {
            stored.value.0.default_account_id = None;
            stored.value.0.updated_at = now;
        }

        Ok(())
    }
}
