use std::{convert::TryFrom, sync::Arc};

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use crate::{
    database::PostgresConnection,
    ledger::{
        domain::{
            accounts::{Account, AccountCategory, AccountType},
            transaction_time::TransactionTime,
            transactions::Transaction,
        },
        errors::Resource,
    },
};

use super::{
    transactions::{allocate_time, insert_transaction_row, lock_user},
    RepoError, RepoResult,
};

pub type DynAccountRepo = Arc<dyn AccountRepo + Send + Sync>;

#[async_trait]
pub trait AccountRepo {
    /// Every account of a user that has not been deleted.
    async fn list_accounts(&self, user_id: Uuid) -> RepoResult<Vec<Account>>;

    async fn get_account(&self, user_id: Uuid, account_id: Uuid) -> RepoResult<Account>;

    /// The user's accounts among `account_ids`. Unknown ids are skipped.
    async fn get_accounts_by_ids(
        &self,
        user_id: Uuid,
        account_ids: &[Uuid],
    ) -> RepoResult<Vec<Account>>;

    async fn get_sub_accounts(&self, user_id: Uuid, parent_id: Uuid) -> RepoResult<Vec<Account>>;

    /// The largest display order among the user's top-level accounts of a
    /// category.
    async fn max_account_display_order(
        &self,
        user_id: Uuid,
        category: AccountCategory,
    ) -> RepoResult<Option<i32>>;

    /// Store a new account with its sub-accounts.
    ///
    /// # Arguments
    ///
    /// * `account` - The top-level account.
    /// * `sub_accounts` - The sub-accounts of a container.
    /// * `opening_transactions` - Modify-balance rows recording the initial
    ///   balances. They are stored without touching the balances again, the
    ///   accounts already carry them.
    async fn create_accounts(
        &self,
        account: &Account,
        sub_accounts: &[Account],
        opening_transactions: &[Transaction],
    ) -> RepoResult<()>;

    /// Store the user editable fields of the given accounts.
    async fn modify_accounts(&self, accounts: &[Account]) -> RepoResult<()>;

    async fn hide_accounts(
        &self,
        user_id: Uuid,
        account_ids: &[Uuid],
        hidden: bool,
        now: DateTime<Utc>,
    ) -> RepoResult<()>;

    /// Apply a batch of display orders. Either every account is updated or,
    /// when one of them does not exist, none is.
    async fn set_display_orders(
        &self,
        user_id: Uuid,
        orders: &[(Uuid, i32)],
        now: DateTime<Utc>,
    ) -> RepoResult<()>;

    /// Soft delete accounts.
    ///
    /// # Returns
    ///
    /// [`RepoError::InUse`] if a transaction still references one of them.
    async fn delete_accounts(
        &self,
        user_id: Uuid,
        account_ids: &[Uuid],
        now: DateTime<Utc>,
    ) -> RepoResult<()>;
}

#[derive(FromRow)]
struct AccountRow {
    id: Uuid,
    user_id: Uuid,
    parent_id: Option<Uuid>,
    account_type: i16,
    category: i16,
    name: String,
    icon: i64,
    color: String,
    currency: String,
    balance: i64,
    display_order: i32,
    hidden: bool,
    comment: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<AccountRow> for Account {
    type Error = anyhow::Error;

    fn try_from(row: AccountRow) -> Result<Self, Self::Error> {
        Ok(Account {
            id: row.id,
            user_id: row.user_id,
            parent_id: row.parent_id,
            account_type: AccountType::try_from(row.account_type).map_err(|code| {
                anyhow!("account {} has an unknown type {}", row.id, code)
            })?,
            category: AccountCategory::try_from(row.category).map_err(|code| {
                anyhow!("account {} has an unknown category {}", row.id, code)
            })?,
            name: row.name,
            icon: row.icon,
            color: row.color,
            currency: row.currency,
            balance: row.balance,
            display_order: row.display_order,
            hidden: row.hidden,
            comment: row.comment,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn into_accounts(rows: Vec<AccountRow>) -> RepoResult<Vec<Account>> {
    Ok(rows
        .into_iter()
        .map(Account::try_from)
        .collect::<anyhow::Result<Vec<_>>>()?)
}

#[async_trait]
impl AccountRepo for PostgresConnection {
    async fn list_accounts(&self, user_id: Uuid) -> RepoResult<Vec<Account>> {
        let rows = sqlx::query_as::<_, AccountRow>(
            r#"
            SELECT *
            FROM account
            WHERE user_id = $1 AND NOT deleted
            ORDER BY parent_id NULLS FIRST, display_order, id
            "#,
        )
        .bind(user_id)
        .fetch_all(&**self)
        .await?;

        into_accounts(rows)
    }

    async fn get_account(&self, user_id: Uuid, account_id: Uuid) -> RepoResult<Account> {
        let row = sqlx::query_as::<_, AccountRow>(
            r#"
            SELECT *
            FROM account
            WHERE id = $1 AND user_id = $2 AND NOT deleted
            "#,
        )
        .bind(account_id)
        .bind(user_id)
        .fetch_optional(&**self)
        .await?
        .ok_or(RepoError::NotFound(Resource::Account))?;

        Ok(Account::try_from(row)?)
    }

    async fn get_accounts_by_ids(
        &self,
        user_id: Uuid,
        account_ids: &[Uuid],
    ) -> RepoResult<Vec<Account>> {
        let rows = sqlx::query_as::<_, AccountRow>(
            r#"
            SELECT *
            FROM account
            WHERE user_id = $1 AND NOT deleted AND id = ANY($2)
            "#,
        )
        .bind(user_id)
        .bind(account_ids)
        .fetch_all(&**self)
        .await?;

        into_accounts(rows)
    }

    async fn get_sub_accounts(&self, user_id: Uuid, parent_id: Uuid) -> RepoResult<Vec<Account>> {
        let rows = sqlx::query_as::<_, AccountRow>(
            r#"
            SELECT *
            FROM account
            WHERE user_id = $1 AND parent_id = $2 AND NOT deleted
            ORDER BY display_order, id
            "#,
        )
        .bind(user_id)
        .bind(parent_id)
        .fetch_all(&**self)
        .await?;

        into_accounts(rows)
    }

    async fn max_account_display_order(
        &self,
        user_id: Uuid,
        category: AccountCategory,
    ) -> RepoResult<Option<i32>> {
        let max = sqlx::query_scalar::<_, Option<i32>>(
            r#"
            SELECT MAX(display_order)
            FROM account
            WHERE user_id = $1 AND category = $2 AND parent_id IS NULL AND NOT deleted
            "#,
        )
        .bind(user_id)
        .bind(category.code())
        .fetch_one(&**self)
        .await?;

        Ok(max)
    }

    async fn create_accounts(
        &self,
        account: &Account,
        sub_accounts: &[Account],
        opening_transactions: &[Transaction],
    ) -> RepoResult<()> {
        let mut tx = self.begin().await?;
        lock_user(&mut tx, account.user_id).await?;

        for new_account in std::iter::once(account).chain(sub_accounts) {
            sqlx::query(
                r#"
                INSERT INTO account (
                    id, user_id, parent_id, account_type, category, name, icon,
                    color, currency, balance, display_order, hidden, comment,
                    created_at, updated_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
                "#,
            )
            .bind(new_account.id)
            .bind(new_account.user_id)
            .bind(new_account.parent_id)
            .bind(new_account.account_type.code())
            .bind(new_account.category.code())
            .bind(&new_account.name)
            .bind(new_account.icon)
            .bind(&new_account.color)
            .bind(&new_account.currency)
            .bind(new_account.balance)
            .bind(new_account.display_order)
            .bind(new_account.hidden)
            .bind(&new_account.comment)
            .bind(new_account.created_at)
            .bind(new_account.updated_at)
            .execute(&mut tx)
            .await?;
        }

        // Openings share the creation second and take consecutive slots.
        if let Some(first) = opening_transactions.first() {
            let start = allocate_time(
                &mut tx,
                first.user_id,
                first.time.unix_time(),
                opening_transactions.len() as i64,
            )
            .await?;

            for (index, transaction) in opening_transactions.iter().enumerate() {
                let opening = Transaction {
                    time: TransactionTime::from_packed(start.packed() + index as i64),
                    ..transaction.clone()
                };

                insert_transaction_row(&mut tx, &opening).await?;
            }
        }

        tx.commit().await?;

        Ok(())
    }

    async fn modify_accounts(&self, accounts: &[Account]) -> RepoResult<()> {
        let mut tx = self.begin().await?;

        for account in accounts {
            let result = sqlx::query(
                r#"
                UPDATE account
                SET name = $3, category = $4, icon = $5, color = $6, comment = $7,
                    hidden = $8, updated_at = $9
                WHERE id = $1 AND user_id = $2 AND NOT deleted
                "#,
            )
            .bind(account.id)
            .bind(account.user_id)
            .bind(&account.name)
            .bind(account.category.code())
            .bind(account.icon)
            .bind(&account.color)
            .bind(&account.comment)
            .bind(account.hidden)
            .bind(account.updated_at)
            .execute(&mut tx)
            .await?;

            if result.rows_affected() == 0 {
                return Err(RepoError::NotFound(Resource::Account));
            }
        }

        tx.commit().await?;

        Ok(())
    }

    async fn hide_accounts(
        &self,
        user_id: Uuid,
        account_ids: &[Uuid],
        hidden: bool,
        now: DateTime<Utc>,
    ) -> RepoResult<()> {
        sqlx::query(
            r#"
            UPDATE account
            SET hidden = $3, updated_at = $4
            WHERE user_id = $1 AND id = ANY($2) AND NOT deleted
            "#,
        )
        .bind(user_id)
        .bind(account_ids)
        .bind(hidden)
        .bind(now)
        .execute(&**self)
        .await?;

        Ok(())
    }

    async fn set_display_orders(
        &self,
        user_id: Uuid,
        orders: &[(Uuid, i32)],
        now: DateTime<Utc>,
    ) -> RepoResult<()> {
        let mut tx = self.begin().await?;

        for (account_id, display_order) in orders {
            let result = sqlx::query(
                r#"
                UPDATE account
                SET display_order = $3, updated_at = $4
                WHERE id = $1 AND user_id = $2 AND NOT deleted
                "#,
            )
            .bind(account_id)
            .bind(user_id)
            .bind(display_order)
            .bind(now)
            .execute(&mut tx)
            .await?;

            if result.rows_affected() == 0 {
                return Err(RepoError::NotFound(Resource::Account));
            }
        }

        tx.commit().await?;

        Ok(())
    }

    async fn delete_accounts(
        &self,
        user_id: Uuid,
        account_ids: &[Uuid],
        now: DateTime<Utc>,
    ) -> RepoResult<()> {
        let mut tx = self.begin().await?;
        lock_user(&mut tx, user_id).await?;

        let in_use = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS (
                SELECT 1
                FROM transaction
                WHERE user_id = $1 AND NOT deleted
                    AND (account_id = ANY($2) OR related_account_id = ANY($2))
            )
            "#,
        )
        .bind(user_id)
        .bind(account_ids)
        .fetch_one(&mut tx)
        .await?;

        if in_use {
            return Err(RepoError::InUse(Resource::Account));
        }

        sqlx::query(
            r#"
            UPDATE account
            SET deleted = TRUE, deleted_at = $3, updated_at = $3
            WHERE user_id = $1 AND id = ANY($2) AND NOT deleted
            "#,
        )
        .bind(user_id)
        .bind(account_ids)
        .bind(now)
        .execute(&mut tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE "user"
            SET default_account_id = NULL, updated_at = $3
            WHERE id = $1 AND default_account_id = ANY($2)
            "#,
        )
        .bind(user_id)
        .bind(account_ids)
        .bind(now)
        .execute(&mut tx)
        .await?;

        tx.commit().await?;

        Ok(())
    }
}
