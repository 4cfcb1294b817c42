use std::{convert::TryFrom, sync::Arc};

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, Postgres, QueryBuilder, Row};
use uuid::Uuid;

use crate::{
    database::PostgresConnection,
    ledger::{
        domain::{
            statistics::{AmountRecord, TimeWindow},
            transaction_time::TransactionTime,
            transactions::{
                decode_kind, encode_kind, net_balance_changes, GeoLocation, Transaction,
                TransactionRole, TransactionType,
            },
        },
        errors::Resource,
    },
};

use super::{
    tags::{insert_tag_index, TagChanges},
    RepoError, RepoResult,
};

/// Filters for listing a user's transactions. Empty id lists leave that
/// dimension unrestricted.
#[derive(Clone, Debug, Default)]
pub struct TransactionQuery {
    pub user_id: Uuid,
    pub transaction_type: Option<TransactionType>,
    pub category_ids: Vec<Uuid>,
    pub account_ids: Vec<Uuid>,
    /// Case insensitive substring of the comment.
    pub keyword: Option<String>,
    /// Inclusive lower bound.
    pub min_time: Option<TransactionTime>,
    /// Inclusive upper bound.
    pub max_time: Option<TransactionTime>,
    /// Exclusive upper bound, used as the pagination cursor.
    pub before: Option<TransactionTime>,
    pub include_transfer_in_rows: bool,
    pub limit: Option<u32>,
}

impl TransactionQuery {
    /// The stored kinds the query may return. An empty list means any kind.
    ///
    /// Transfer-in rows are only needed when filtering by account, where the
    /// destination side of a transfer has to match, or when the caller asks
    /// for them.
    pub fn kind_codes(&self) -> Vec<i16> {
        let wants_in_rows = self.include_transfer_in_rows || !self.account_ids.is_empty();

        match self.transaction_type {
            Some(TransactionType::Transfer) if wants_in_rows => vec![
                encode_kind(TransactionType::Transfer, TransactionRole::TransferOut),
                encode_kind(TransactionType::Transfer, TransactionRole::TransferIn),
            ],
            Some(TransactionType::Transfer) => vec![encode_kind(
                TransactionType::Transfer,
                TransactionRole::TransferOut,
            )],
            Some(other) => vec![other.code()],
            None if wants_in_rows => vec![],
            None => vec![
                TransactionType::ModifyBalance.code(),
                TransactionType::Income.code(),
                TransactionType::Expense.code(),
                encode_kind(TransactionType::Transfer, TransactionRole::TransferOut),
            ],
        }
    }

    /// Whether a row passes every filter other than the limit.
    pub fn matches(&self, transaction: &Transaction) -> bool {
        let kinds = self.kind_codes();
        let kind = encode_kind(transaction.transaction_type, transaction.role);
        let time = transaction.time;

        transaction.user_id == self.user_id
            && (kinds.is_empty() || kinds.contains(&kind))
            && (self.category_ids.is_empty()
                || matches!(transaction.category_id, Some(id) if self.category_ids.contains(&id)))
            && (self.account_ids.is_empty() || self.account_ids.contains(&transaction.account_id))
            && self.keyword.as_ref().map_or(true, |keyword| {
                transaction
                    .comment
                    .to_lowercase()
                    .contains(&keyword.to_lowercase())
            })
            && self.min_time.map_or(true, |min| time >= min)
            && self.max_time.map_or(true, |max| time <= max)
            && self.before.map_or(true, |before| time < before)
    }

    fn push_filters(&self, query_builder: &mut QueryBuilder<'_, Postgres>) {
        query_builder
            .push(" WHERE t.user_id = ")
            .push_bind(self.user_id)
            .push(" AND NOT t.deleted");

        let kinds = self.kind_codes();
        if !kinds.is_empty() {
            query_builder.push(" AND t.kind = ANY(").push_bind(kinds).push(")");
        }

        if !self.category_ids.is_empty() {
            query_builder
                .push(" AND t.category_id = ANY(")
                .push_bind(self.category_ids.clone())
                .push(")");
        }

        if !self.account_ids.is_empty() {
            query_builder
                .push(" AND t.account_id = ANY(")
                .push_bind(self.account_ids.clone())
                .push(")");
        }

        if let Some(keyword) = self.keyword.as_ref() {
            query_builder
                .push(" AND t.comment ILIKE ")
                .push_bind(format!("%{}%", escape_like(keyword)));
        }

        if let Some(min_time) = self.min_time {
            query_builder
                .push(" AND t.transaction_time >= ")
                .push_bind(min_time.packed());
        }

        if let Some(max_time) = self.max_time {
            query_builder
                .push(" AND t.transaction_time <= ")
                .push_bind(max_time.packed());
        }

        if let Some(before) = self.before {
            query_builder
                .push(" AND t.transaction_time < ")
                .push_bind(before.packed());
        }
    }
}

/// Escape the wildcard characters of a `LIKE` pattern.
fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());

    for c in value.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }

    escaped
}

pub type DynTransactionRepo = Arc<dyn TransactionRepo + Send + Sync>;

#[async_trait]
pub trait TransactionRepo {
    /// Fetch a single row that has not been deleted, of any kind.
    async fn get_transaction(&self, user_id: Uuid, transaction_id: Uuid)
        -> RepoResult<Transaction>;

    /// List rows matching `query`, newest first with ties broken by id.
    async fn list_transactions(&self, query: &TransactionQuery) -> RepoResult<Vec<Transaction>>;

    async fn count_transactions(&self, query: &TransactionQuery) -> RepoResult<i64>;

    /// Load the income and expense rows whose unix time lies within
    /// `window`.
    async fn list_amount_records(
        &self,
        user_id: Uuid,
        window: TimeWindow,
    ) -> RepoResult<Vec<AmountRecord>>;

    /// Store a new transaction.
    ///
    /// The row's packed time is assigned here, from the first free slots of
    /// its second. A transfer-out row is stored together with its transfer-in
    /// mirror. Account balances and the tag index are updated in the same
    /// storage transaction.
    ///
    /// # Returns
    ///
    /// The stored row, or [`RepoError::TooManyTransactionsInOneSecond`] if
    /// the second is full.
    async fn create_transaction(
        &self,
        transaction: &Transaction,
        tag_ids: &[Uuid],
    ) -> RepoResult<Transaction>;

    /// Replace a stored row with `transaction`.
    ///
    /// The row is read again under lock; moving it into another second
    /// assigns a new packed time. The transfer-in mirror, balances and tags
    /// follow in the same storage transaction.
    async fn modify_transaction(
        &self,
        transaction: &Transaction,
        tag_changes: &TagChanges,
    ) -> RepoResult<Transaction>;

    /// Soft delete a row, together with its transfer-in mirror, reverse its
    /// balance effects and remove its tag index rows.
    async fn delete_transaction(
        &self,
        user_id: Uuid,
        transaction_id: Uuid,
        now: DateTime<Utc>,
    ) -> RepoResult<()>;

    /// Remove every transaction, account, category and tag of a user.
    async fn clear_user_data(&self, user_id: Uuid, now: DateTime<Utc>) -> RepoResult<()>;
}

#[derive(FromRow)]
struct TransactionRow {
    id: Uuid,
    user_id: Uuid,
    kind: i16,
    category_id: Option<Uuid>,
    account_id: Uuid,
    transaction_time: i64,
    utc_offset: i16,
    amount: i64,
    related_id: Option<Uuid>,
    related_account_id: Option<Uuid>,
    related_account_amount: i64,
    hide_amount: bool,
    comment: String,
    geo_latitude: Option<f64>,
    geo_longitude: Option<f64>,
    created_ip: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<TransactionRow> for Transaction {
    type Error = anyhow::Error;

    fn try_from(row: TransactionRow) -> Result<Self, Self::Error> {
        let (transaction_type, role) = decode_kind(row.kind)
            .ok_or_else(|| anyhow!("transaction {} has an unknown kind {}", row.id, row.kind))?;

        let geo_location = match (row.geo_latitude, row.geo_longitude) {
            (Some(latitude), Some(longitude)) => Some(GeoLocation {
                latitude,
                longitude,
            }),
            _ => None,
        };

        Ok(Transaction {
            id: row.id,
            user_id: row.user_id,
            transaction_type,
            role,
            category_id: row.category_id,
            account_id: row.account_id,
            time: TransactionTime::from_packed(row.transaction_time),
            utc_offset: row.utc_offset,
            amount: row.amount,
            related_id: row.related_id,
            related_account_id: row.related_account_id,
            related_account_amount: row.related_account_amount,
            hide_amount: row.hide_amount,
            comment: row.comment,
            geo_location,
            created_ip: row.created_ip,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(FromRow)]
struct AmountRow {
    account_id: Uuid,
    category_id: Option<Uuid>,
    kind: i16,
    transaction_time: i64,
    utc_offset: i16,
    amount: i64,
}

impl TryFrom<AmountRow> for AmountRecord {
    type Error = anyhow::Error;

    fn try_from(row: AmountRow) -> Result<Self, Self::Error> {
        let (transaction_type, _) =
            decode_kind(row.kind).ok_or_else(|| anyhow!("unknown transaction kind {}", row.kind))?;

        Ok(AmountRecord {
            account_id: row.account_id,
            category_id: row.category_id,
            transaction_type,
            time: TransactionTime::from_packed(row.transaction_time),
            utc_offset: row.utc_offset,
            amount: row.amount,
        })
    }
}

type PgTransaction<'c> = sqlx::Transaction<'c, Postgres>;

/// Serialize ledger writes of one user for the rest of the storage
/// transaction.
pub(super) async fn lock_user(tx: &mut PgTransaction<'_>, user_id: Uuid) -> RepoResult<()> {
    sqlx::query(r#"SELECT id FROM "user" WHERE id = $1 FOR UPDATE"#)
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(RepoError::NotFound(Resource::User))?;

    Ok(())
}

/// Reserve `slots` consecutive packed times within `unix_time`'s second.
pub(super) async fn allocate_time(
    tx: &mut PgTransaction<'_>,
    user_id: Uuid,
    unix_time: i64,
    slots: i64,
) -> RepoResult<TransactionTime> {
    let latest = sqlx::query_scalar::<_, Option<i64>>(
        r#"
        SELECT MAX(transaction_time)
        FROM transaction
        WHERE user_id = $1 AND transaction_time BETWEEN $2 AND $3
        "#,
    )
    .bind(user_id)
    .bind(TransactionTime::min_for_unix_time(unix_time).packed())
    .bind(TransactionTime::max_for_unix_time(unix_time).packed())
    .fetch_one(&mut *tx)
    .await?;

    TransactionTime::allocate(unix_time, latest.map(TransactionTime::from_packed), slots)
        .ok_or(RepoError::TooManyTransactionsInOneSecond)
}

pub(super) async fn insert_transaction_row(
    tx: &mut PgTransaction<'_>,
    transaction: &Transaction,
) -> RepoResult<()> {
    sqlx::query(
        r#"
        INSERT INTO transaction (
            id, user_id, kind, category_id, account_id, transaction_time,
            utc_offset, amount, related_id, related_account_id,
            related_account_amount, hide_amount, comment, geo_latitude,
            geo_longitude, created_ip, created_at, updated_at
        )
        VALUES (
            $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15,
            $16, $17, $18
        )
        "#,
    )
    .bind(transaction.id)
    .bind(transaction.user_id)
    .bind(encode_kind(transaction.transaction_type, transaction.role))
    .bind(transaction.category_id)
    .bind(transaction.account_id)
    .bind(transaction.time.packed())
    .bind(transaction.utc_offset)
    .bind(transaction.amount)
    .bind(transaction.related_id)
    .bind(transaction.related_account_id)
    .bind(transaction.related_account_amount)
    .bind(transaction.hide_amount)
    .bind(&transaction.comment)
    .bind(transaction.geo_location.map(|geo| geo.latitude))
    .bind(transaction.geo_location.map(|geo| geo.longitude))
    .bind(&transaction.created_ip)
    .bind(transaction.created_at)
    .bind(transaction.updated_at)
    .execute(&mut *tx)
    .await?;

    Ok(())
}

async fn update_transaction_row(
    tx: &mut PgTransaction<'_>,
    transaction: &Transaction,
) -> RepoResult<()> {
    sqlx::query(
        r#"
        UPDATE transaction
        SET category_id = $3,
            account_id = $4,
            transaction_time = $5,
            utc_offset = $6,
            amount = $7,
            related_id = $8,
            related_account_id = $9,
            related_account_amount = $10,
            hide_amount = $11,
            comment = $12,
            geo_latitude = $13,
            geo_longitude = $14,
            updated_at = $15
        WHERE id = $1 AND user_id = $2 AND NOT deleted
        "#,
    )
    .bind(transaction.id)
    .bind(transaction.user_id)
    .bind(transaction.category_id)
    .bind(transaction.account_id)
    .bind(transaction.time.packed())
    .bind(transaction.utc_offset)
    .bind(transaction.amount)
    .bind(transaction.related_id)
    .bind(transaction.related_account_id)
    .bind(transaction.related_account_amount)
    .bind(transaction.hide_amount)
    .bind(&transaction.comment)
    .bind(transaction.geo_location.map(|geo| geo.latitude))
    .bind(transaction.geo_location.map(|geo| geo.longitude))
    .bind(transaction.updated_at)
    .execute(&mut *tx)
    .await?;

    Ok(())
}

pub(super) async fn apply_balance_changes(
    tx: &mut PgTransaction<'_>,
    user_id: Uuid,
    changes: &[(Uuid, i64)],
    now: DateTime<Utc>,
) -> RepoResult<()> {
    for (account_id, delta) in changes {
        sqlx::query(
            r#"
            UPDATE account
            SET balance = balance + $3, updated_at = $4
            WHERE id = $1 AND user_id = $2
            "#,
        )
        .bind(account_id)
        .bind(user_id)
        .bind(delta)
        .bind(now)
        .execute(&mut *tx)
        .await?;
    }

    Ok(())
}

async fn fetch_for_update(
    tx: &mut PgTransaction<'_>,
    user_id: Uuid,
    transaction_id: Uuid,
) -> RepoResult<Transaction> {
    let row = sqlx::query_as::<_, TransactionRow>(
        r#"
        SELECT *
        FROM transaction
        WHERE id = $1 AND user_id = $2 AND NOT deleted
        FOR UPDATE
        "#,
    )
    .bind(transaction_id)
    .bind(user_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(RepoError::NotFound(Resource::Transaction))?;

    Ok(Transaction::try_from(row)?)
}

#[async_trait]
impl TransactionRepo for PostgresConnection {
    async fn get_transaction(
        &self,
        user_id: Uuid,
        transaction_id: Uuid,
    ) -> RepoResult<Transaction> {
        let row = sqlx::query_as::<_, TransactionRow>(
            r#"
            SELECT *
            FROM transaction
            WHERE id = $1 AND user_id = $2 AND NOT deleted
            "#,
        )
        .bind(transaction_id)
        .bind(user_id)
        .fetch_optional(&**self)
        .await?
        .ok_or(RepoError::NotFound(Resource::Transaction))?;

        Ok(Transaction::try_from(row)?)
    }

    async fn list_transactions(&self, query: &TransactionQuery) -> RepoResult<Vec<Transaction>> {
        let mut query_builder: QueryBuilder<'_, Postgres> =
            QueryBuilder::new("SELECT t.* FROM transaction t");

        query.push_filters(&mut query_builder);
        query_builder.push(" ORDER BY t.transaction_time DESC, t.id DESC");

        if let Some(limit) = query.limit {
            query_builder.push(" LIMIT ").push_bind(i64::from(limit));
        }

        let rows = query_builder
            .build()
            .fetch_all(&**self)
            .await?
            .iter()
            .map(TransactionRow::from_row)
            .collect::<Result<Vec<_>, sqlx::Error>>()?;

        let transactions = rows
            .into_iter()
            .map(Transaction::try_from)
            .collect::<anyhow::Result<Vec<_>>>()?;

        Ok(transactions)
    }

    async fn count_transactions(&self, query: &TransactionQuery) -> RepoResult<i64> {
        let mut query_builder: QueryBuilder<'_, Postgres> =
            QueryBuilder::new("SELECT COUNT(*) FROM transaction t");

        query.push_filters(&mut query_builder);

        let count: i64 = query_builder.build().fetch_one(&**self).await?.try_get(0)?;

        Ok(count)
    }

    async fn list_amount_records(
        &self,
        user_id: Uuid,
        window: TimeWindow,
    ) -> RepoResult<Vec<AmountRecord>> {
        let mut query_builder: QueryBuilder<'_, Postgres> = QueryBuilder::new(
            r#"
            SELECT account_id, category_id, kind, transaction_time, utc_offset, amount
            FROM transaction
            WHERE user_id = "#,
        );

        query_builder
            .push_bind(user_id)
            .push(" AND NOT deleted AND kind = ANY(")
            .push_bind(vec![
                TransactionType::Income.code(),
                TransactionType::Expense.code(),
            ])
            .push(")");

        if let Some(start) = window.start {
            query_builder
                .push(" AND transaction_time >= ")
                .push_bind(TransactionTime::min_for_unix_time(start).packed());
        }

        if let Some(end) = window.end {
            query_builder
                .push(" AND transaction_time < ")
                .push_bind(TransactionTime::min_for_unix_time(end).packed());
        }

        let rows = query_builder
            .build()
            .fetch_all(&**self)
            .await?
            .iter()
            .map(AmountRow::from_row)
            .collect::<Result<Vec<_>, sqlx::Error>>()?;

        let records = rows
            .into_iter()
            .map(AmountRecord::try_from)
            .collect::<anyhow::Result<Vec<_>>>()?;

        Ok(records)
    }

    async fn create_transaction(
        &self,
        transaction: &Transaction,
        tag_ids: &[Uuid],
    ) -> RepoResult<Transaction> {
        let mut tx = self.begin().await?;
        lock_user(&mut tx, transaction.user_id).await?;

        let slots = if transaction.is_transfer_out() { 2 } else { 1 };
        let time = allocate_time(
            &mut tx,
            transaction.user_id,
            transaction.time.unix_time(),
            slots,
        )
        .await?;

        let mut stored = Transaction {
            time,
            ..transaction.clone()
        };
        let mirror = stored.transfer_in_mirror(Uuid::new_v4());
        stored.related_id = mirror.as_ref().map(|mirror| mirror.id);

        insert_transaction_row(&mut tx, &stored).await?;
        if let Some(mirror) = mirror.as_ref() {
            insert_transaction_row(&mut tx, mirror).await?;
        }

        apply_balance_changes(
            &mut tx,
            stored.user_id,
            &net_balance_changes(&[], &[&stored]),
            stored.created_at,
        )
        .await?;
        insert_tag_index(&mut tx, stored.user_id, stored.id, tag_ids, stored.created_at).await?;

        tx.commit().await?;

        Ok(stored)
    }

    async fn modify_transaction(
        &self,
        transaction: &Transaction,
        tag_changes: &TagChanges,
    ) -> RepoResult<Transaction> {
        let mut tx = self.begin().await?;
        lock_user(&mut tx, transaction.user_id).await?;

        let current = fetch_for_update(&mut tx, transaction.user_id, transaction.id).await?;

        let time = if current.time.unix_time() == transaction.time.unix_time() {
            current.time
        } else {
            let slots = if current.is_transfer_out() { 2 } else { 1 };
            allocate_time(
                &mut tx,
                transaction.user_id,
                transaction.time.unix_time(),
                slots,
            )
            .await?
        };

        let stored = Transaction {
            time,
            related_id: current.related_id,
            ..transaction.clone()
        };
        update_transaction_row(&mut tx, &stored).await?;

        if let Some(mirror) = current
            .related_id
            .and_then(|mirror_id| stored.transfer_in_mirror(mirror_id))
        {
            update_transaction_row(&mut tx, &mirror).await?;
        }

        apply_balance_changes(
            &mut tx,
            stored.user_id,
            &net_balance_changes(&[&current], &[&stored]),
            stored.updated_at,
        )
        .await?;

        if !tag_changes.remove.is_empty() {
            sqlx::query(
                "DELETE FROM transaction_tag_index WHERE transaction_id = $1 AND tag_id = ANY($2)",
            )
            .bind(stored.id)
            .bind(&tag_changes.remove)
            .execute(&mut tx)
            .await?;
        }
        insert_tag_index(
            &mut tx,
            stored.user_id,
            stored.id,
            &tag_changes.add,
            stored.updated_at,
        )
        .await?;

        tx.commit().await?;

        Ok(stored)
    }

    async fn delete_transaction(
        &self,
        user_id: Uuid,
        transaction_id: Uuid,
        now: DateTime<Utc>,
    ) -> RepoResult<()> {
        let mut tx = self.begin().await?;
        lock_user(&mut tx, user_id).await?;

        let current = fetch_for_update(&mut tx, user_id, transaction_id).await?;
        let ids = match current.related_id {
            Some(related_id) => vec![current.id, related_id],
            None => vec![current.id],
        };

        sqlx::query(
            r#"
            UPDATE transaction
            SET deleted = TRUE, deleted_at = $3, updated_at = $3
            WHERE user_id = $1 AND id = ANY($2)
            "#,
        )
        .bind(user_id)
        .bind(&ids)
        .bind(now)
        .execute(&mut tx)
        .await?;

        apply_balance_changes(&mut tx, user_id, &net_balance_changes(&[&current], &[]), now)
            .await?;

        sqlx::query("DELETE FROM transaction_tag_index WHERE transaction_id = ANY($1)")
            .bind(&ids)
            .execute(&mut tx)
            .await?;

        tx.commit().await?;

        Ok(())
    }

    async fn clear_user_data(&self, user_id: Uuid, now: DateTime<Utc>) -> RepoResult<()> {
        let mut tx = self.begin().await?;
        lock_user(&mut tx, user_id).await?;

        sqlx::query("DELETE FROM transaction_tag_index WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut tx)
            .await?;

        for table in [
            "transaction",
            "account",
            "transaction_category",
            "transaction_tag",
        ] {
            sqlx::query(&format!(
                "UPDATE {} SET deleted = TRUE, deleted_at = $2, updated_at = $2 \
                 WHERE user_id = $1 AND NOT deleted",
                table
            ))
            .bind(user_id)
            .bind(now)
            .execute(&mut tx)
            .await?;
        }

        sqlx::query(r#"UPDATE "user" SET default_account_id = NULL, updated_at = $2 WHERE id = $1"#)
            .bind(user_id)
            .bind(now)
            .execute(&mut tx)
            .await?;

        tx.commit().await?;

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn query() -> TransactionQuery {
        TransactionQuery {
            user_id: Uuid::new_v4(),
            ..Default::default()
        }
    }

    #[test]
    fn unfiltered_listing_skips_transfer_in_rows() {
        assert_eq!(vec![1, 2, 3, 4], query().kind_codes());
    }

    #[test]
    fn account_filter_includes_transfer_in_rows() {
        let mut query = query();
        query.account_ids = vec![Uuid::new_v4()];

        assert!(query.kind_codes().is_empty());

        query.transaction_type = Some(TransactionType::Transfer);
        assert_eq!(vec![4, 5], query.kind_codes());
    }

    #[test]
    fn transfer_filter_without_accounts_uses_out_rows() {
        let mut query = query();
        query.transaction_type = Some(TransactionType::Transfer);
        assert_eq!(vec![4], query.kind_codes());

        query.include_transfer_in_rows = true;
        assert_eq!(vec![4, 5], query.kind_codes());

        query.transaction_type = Some(TransactionType::Expense);
        assert_eq!(vec![3], query.kind_codes());
    }

    #[test]
    fn like_wildcards_are_escaped() {
        assert_eq!("50\\% off\\_now\\\\", escape_like("50% off_now\\"));
        assert_eq!("lunch", escape_like("lunch"));
    }
}
