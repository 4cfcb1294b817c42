use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::{
    database::PostgresConnection,
    ledger::{domain::tags::TransactionTag, errors::Resource},
};

use super::{duplicate_as, RepoError, RepoResult};

/// The tag ids to attach to and detach from a transaction.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TagChanges {
    pub add: Vec<Uuid>,
    pub remove: Vec<Uuid>,
}

impl TagChanges {
    /// The changes that turn the `current` tag set into the `wanted` one.
    pub fn between(current: &[Uuid], wanted: &[Uuid]) -> Self {
        Self {
            add: wanted
                .iter()
                .filter(|id| !current.contains(id))
                .copied()
                .collect(),
            remove: current
                .iter()
                .filter(|id| !wanted.contains(id))
                .copied()
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.remove.is_empty()
    }
}

pub type DynTagRepo = Arc<dyn TagRepo + Send + Sync>;

#[async_trait]
pub trait TagRepo {
    /// All of a user's tags ordered by display order.
    async fn list_tags(&self, user_id: Uuid) -> RepoResult<Vec<TransactionTag>>;

    /// The user's tags among `tag_ids`. Unknown ids are skipped.
    async fn get_tags_by_ids(
        &self,
        user_id: Uuid,
        tag_ids: &[Uuid],
    ) -> RepoResult<Vec<TransactionTag>>;

    async fn max_tag_display_order(&self, user_id: Uuid) -> RepoResult<Option<i32>>;

    /// # Returns
    ///
    /// [`RepoError::Duplicate`] if the user already has a tag with the same
    /// name.
    async fn create_tag(&self, tag: &TransactionTag) -> RepoResult<()>;

    async fn rename_tag(
        &self,
        user_id: Uuid,
        tag_id: Uuid,
        name: &str,
        now: DateTime<Utc>,
    ) -> RepoResult<()>;

    /// Soft delete a tag and detach it from every transaction.
    async fn delete_tag(&self, user_id: Uuid, tag_id: Uuid, now: DateTime<Utc>) -> RepoResult<()>;

    /// Batch load the tag ids of several transactions. Transactions without
    /// tags are absent from the map.
    async fn tag_ids_of_transactions(
        &self,
        user_id: Uuid,
        transaction_ids: &[Uuid],
    ) -> RepoResult<HashMap<Uuid, Vec<Uuid>>>;
}

#[derive(FromRow)]
struct TagRow {
    id: Uuid,
    user_id: Uuid,
    name: String,
    display_order: i32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<TagRow> for TransactionTag {
    fn from(row: TagRow) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
            name: row.name,
            display_order: row.display_order,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(FromRow)]
struct TagIndexRow {
    transaction_id: Uuid,
    tag_id: Uuid,
}

/// Attach tags to a transaction inside an open storage transaction.
pub(super) async fn insert_tag_index(
    tx: &mut sqlx::Transaction<'_, Postgres>,
    user_id: Uuid,
    transaction_id: Uuid,
    tag_ids: &[Uuid],
    now: DateTime<Utc>,
) -> RepoResult<()> {
    if tag_ids.is_empty() {
        return Ok(());
    }

    let mut query_builder: QueryBuilder<'_, Postgres> = QueryBuilder::new(
        "INSERT INTO transaction_tag_index (transaction_id, tag_id, user_id, created_at) ",
    );

    query_builder.push_values(tag_ids, |mut row, tag_id| {
        row.push_bind(transaction_id)
            .push_bind(*tag_id)
            .push_bind(user_id)
            .push_bind(now);
    });
    query_builder.push(" ON CONFLICT DO NOTHING");

    query_builder.build().execute(&mut *tx).await?;

    Ok(())
}

#[async_trait]
impl TagRepo for PostgresConnection {
    async fn list_tags(&self, user_id: Uuid) -> RepoResult<Vec<TransactionTag>> {
        let rows = sqlx::query_as::<_, TagRow>(
            r#"
            SELECT *
            FROM transaction_tag
            WHERE user_id = $1 AND NOT deleted
            ORDER BY display_order, id
            "#,
        )
        .bind(user_id)
        .fetch_all(&**self)
        .await?;

        Ok(rows.into_iter().map(TransactionTag::from).collect())
    }

    async fn get_tags_by_ids(
        &self,
        user_id: Uuid,
        tag_ids: &[Uuid],
    ) -> RepoResult<Vec<TransactionTag>> {
        let rows = sqlx::query_as::<_, TagRow>(
            r#"
            SELECT *
            FROM transaction_tag
            WHERE user_id = $1 AND NOT deleted AND id = ANY($2)
            "#,
        )
        .bind(user_id)
        .bind(tag_ids)
        .fetch_all(&**self)
        .await?;

        Ok(rows.into_iter().map(TransactionTag::from).collect())
    }

    async fn max_tag_display_order(&self, user_id: Uuid) -> RepoResult<Option<i32>> {
        let max = sqlx::query_scalar::<_, Option<i32>>(
            r#"
            SELECT MAX(display_order)
            FROM transaction_tag
            WHERE user_id = $1 AND NOT deleted
            "#,
        )
        .bind(user_id)
        .fetch_one(&**self)
        .await?;

        Ok(max)
    }

    async fn create_tag(&self, tag: &TransactionTag) -> RepoResult<()> {
        sqlx::query(
            r#"
            INSERT INTO transaction_tag (id, user_id, name, display_order, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(tag.id)
        .bind(tag.user_id)
        .bind(&tag.name)
        .bind(tag.display_order)
        .bind(tag.created_at)
        .bind(tag.updated_at)
        .execute(&**self)
        .await
        .map_err(duplicate_as(Resource::Tag))?;

        Ok(())
    }

    async fn rename_tag(
        &self,
        user_id: Uuid,
        tag_id: Uuid,
        name: &str,
        now: DateTime<Utc>,
    ) -> RepoResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE transaction_tag
            SET name = $3, updated_at = $4
            WHERE id = $1 AND user_id = $2 AND NOT deleted
            "#,
        )
        .bind(tag_id)
        .bind(user_id)
        .bind(name)
        .bind(now)
        .execute(&**self)
        .await
        .map_err(duplicate_as(Resource::Tag))?;

        if result.rows_affected() == 0 {
            return Err(RepoError::NotFound(Resource::Tag));
        }

        Ok(())
    }

    async fn delete_tag(&self, user_id: Uuid, tag_id: Uuid, now: DateTime<Utc>) -> RepoResult<()> {
        let mut tx = self.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE transaction_tag
            SET deleted = TRUE, deleted_at = $3, updated_at = $3
            WHERE id = $1 AND user_id = $2 AND NOT deleted
            "#,
        )
        .bind(tag_id)
        .bind(user_id)
        .bind(now)
        .execute(&mut tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepoError::NotFound(Resource::Tag));
        }

        sqlx::query("DELETE FROM transaction_tag_index WHERE tag_id = $1 AND user_id = $2")
            .bind(tag_id)
            .bind(user_id)
            .execute(&mut tx)
            .await?;

        tx.commit().await?;

        Ok(())
    }

    async fn tag_ids_of_transactions(
        &self,
        user_id: Uuid,
        transaction_ids: &[Uuid],
    ) -> RepoResult<HashMap<Uuid, Vec<Uuid>>> {
        if transaction_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let rows = sqlx::query_as::<_, TagIndexRow>(
            r#"
            SELECT i.transaction_id, i.tag_id
            FROM transaction_tag_index i
                JOIN transaction_tag t ON t.id = i.tag_id
            WHERE i.user_id = $1 AND i.transaction_id = ANY($2) AND NOT t.deleted
            ORDER BY t.display_order, t.id
            "#,
        )
        .bind(user_id)
        .bind(transaction_ids)
        .fetch_all(&**self)
        .await?;

        let mut tag_ids: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
        for row in rows {
            tag_ids.entry(row.transaction_id).or_default().push(row.tag_id);
        }

        Ok(tag_ids)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn tag_changes_between_sets() {
        let kept = Uuid::new_v4();
        let dropped = Uuid::new_v4();
        let added = Uuid::new_v4();

        let changes = TagChanges::between(&[kept, dropped], &[added, kept]);

        assert_eq!(vec![added], changes.add);
        assert_eq!(vec![dropped], changes.remove);
        assert!(TagChanges::between(&[kept], &[kept]).is_empty());
    }
}
