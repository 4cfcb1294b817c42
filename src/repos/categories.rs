use std::{convert::TryFrom, sync::Arc};

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::{
    database::PostgresConnection,
    ledger::{
        domain::categories::{CategoryType, TransactionCategory},
        errors::Resource,
    },
};

use super::{transactions::lock_user, RepoError, RepoResult};

pub type DynCategoryRepo = Arc<dyn CategoryRepo + Send + Sync>;

#[async_trait]
pub trait CategoryRepo {
    /// The user's categories, optionally restricted to one type.
    async fn list_categories(
        &self,
        user_id: Uuid,
        category_type: Option<CategoryType>,
    ) -> RepoResult<Vec<TransactionCategory>>;

    async fn get_category(
        &self,
        user_id: Uuid,
        category_id: Uuid,
    ) -> RepoResult<TransactionCategory>;

    async fn get_sub_categories(
        &self,
        user_id: Uuid,
        parent_id: Uuid,
    ) -> RepoResult<Vec<TransactionCategory>>;

    /// The largest display order among the siblings a category with the
    /// given parent and type would have.
    async fn max_category_display_order(
        &self,
        user_id: Uuid,
        parent_id: Option<Uuid>,
        category_type: CategoryType,
    ) -> RepoResult<Option<i32>>;

    async fn create_category(&self, category: &TransactionCategory) -> RepoResult<()>;

    async fn hide_categories(
        &self,
        user_id: Uuid,
        category_ids: &[Uuid],
        hidden: bool,
        now: DateTime<Utc>,
    ) -> RepoResult<()>;

    /// Soft delete categories.
    ///
    /// # Returns
    ///
    /// [`RepoError::InUse`] if a transaction still references one of them.
    async fn delete_categories(
        &self,
        user_id: Uuid,
        category_ids: &[Uuid],
        now: DateTime<Utc>,
    ) -> RepoResult<()>;
}

#[derive(FromRow)]
struct CategoryRow {
    id: Uuid,
    user_id: Uuid,
    parent_id: Option<Uuid>,
    category_type: i16,
    name: String,
    icon: i64,
    color: String,
    comment: String,
    display_order: i32,
    hidden: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<CategoryRow> for TransactionCategory {
    type Error = anyhow::Error;

    fn try_from(row: CategoryRow) -> Result<Self, Self::Error> {
        let category_type = CategoryType::try_from(row.category_type)
            .map_err(|code| anyhow!("category {} has an unknown type {}", row.id, code))?;

        Ok(TransactionCategory {
            id: row.id,
            user_id: row.user_id,
            parent_id: row.parent_id,
            category_type,
            name: row.name,
            icon: row.icon,
            color: row.color,
            comment: row.comment,
            display_order: row.display_order,
            hidden: row.hidden,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn into_categories(rows: Vec<CategoryRow>) -> RepoResult<Vec<TransactionCategory>> {
    Ok(rows
        .into_iter()
        .map(TransactionCategory::try_from)
        .collect::<anyhow::Result<Vec<_>>>()?)
}

#[async_trait]
impl CategoryRepo for PostgresConnection {
    async fn list_categories(
        &self,
        user_id: Uuid,
        category_type: Option<CategoryType>,
    ) -> RepoResult<Vec<TransactionCategory>> {
        let mut query_builder: QueryBuilder<'_, Postgres> =
            QueryBuilder::new("SELECT * FROM transaction_category WHERE user_id = ");

        query_builder.push_bind(user_id).push(" AND NOT deleted");

        if let Some(category_type) = category_type {
            query_builder
                .push(" AND category_type = ")
                .push_bind(category_type.code());
        }

        query_builder.push(" ORDER BY parent_id NULLS FIRST, display_order, id");

        let rows = query_builder
            .build()
            .fetch_all(&**self)
            .await?
            .iter()
            .map(CategoryRow::from_row)
            .collect::<Result<Vec<_>, sqlx::Error>>()?;

        into_categories(rows)
    }

    async fn get_category(
        &self,
        user_id: Uuid,
        category_id: Uuid,
    ) -> RepoResult<TransactionCategory> {
        let row = sqlx::query_as::<_, CategoryRow>(
            r#"
            SELECT *
            FROM transaction_category
            WHERE id = $1 AND user_id = $2 AND NOT deleted
            "#,
        )
        .bind(category_id)
        .bind(user_id)
        .fetch_optional(&**self)
        .await?
        .ok_or(RepoError::NotFound(Resource::Category))?;

        Ok(TransactionCategory::try_from(row)?)
    }

    async fn get_sub_categories(
        &self,
        user_id: Uuid,
        parent_id: Uuid,
    ) -> RepoResult<Vec<TransactionCategory>> {
        let rows = sqlx::query_as::<_, CategoryRow>(
            r#"
            SELECT *
            FROM transaction_category
            WHERE user_id = $1 AND parent_id = $2 AND NOT deleted
            ORDER BY display_order, id
            "#,
        )
        .bind(user_id)
        .bind(parent_id)
        .fetch_all(&**self)
        .await?;

        into_categories(rows)
    }

    async fn max_category_display_order(
        &self,
        user_id: Uuid,
        parent_id: Option<Uuid>,
        category_type: CategoryType,
    ) -> RepoResult<Option<i32>> {
        let max = sqlx::query_scalar::<_, Option<i32>>(
            r#"
            SELECT MAX(display_order)
            FROM transaction_category
            WHERE user_id = $1
                AND parent_id IS NOT DISTINCT FROM $2
                AND category_type = $3
                AND NOT deleted
            "#,
        )
        .bind(user_id)
        .bind(parent_id)
        .bind(category_type.code())
        .fetch_one(&**self)
        .await?;

        Ok(max)
    }

    async fn create_category(&self, category: &TransactionCategory) -> RepoResult<()> {
        sqlx::query(
            r#"
            INSERT INTO transaction_category (
                id, user_id, parent_id, category_type, name, icon, color,
                comment, display_order, hidden, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(category.id)
        .bind(category.user_id)
        .bind(category.parent_id)
        .bind(category.category_type.code())
        .bind(&category.name)
        .bind(category.icon)
        .bind(&category.color)
        .bind(&category.comment)
        .bind(category.display_order)
        .bind(category.hidden)
        .bind(category.created_at)
        .bind(category.updated_at)
        .execute(&**self)
        .await?;

        Ok(())
    }

    async fn hide_categories(
        &self,
        user_id: Uuid,
        category_ids: &[Uuid],
        hidden: bool,
        now: DateTime<Utc>,
    ) -> RepoResult<()> {
        sqlx::query(
            r#"
            UPDATE transaction_category
            SET hidden = $3, updated_at = $4
            WHERE user_id = $1 AND id = ANY($2) AND NOT deleted
            "#,
        )
        .bind(user_id)
        .bind(category_ids)
        .bind(hidden)
        .bind(now)
        .execute(&**self)
        .await?;

        Ok(())
    }

    async fn delete_categories(
        &self,
        user_id: Uuid,
        category_ids: &[Uuid],
        now: DateTime<Utc>,
    ) -> RepoResult<()> {
        let mut tx = self.begin().await?;
        lock_user(&mut tx, user_id).await?;

        let in_use = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS (
                SELECT 1
                FROM transaction
                WHERE user_id = $1 AND NOT deleted AND category_id = ANY($2)
            )
            "#,
        )
        .bind(user_id)
        .bind(category_ids)
        .fetch_one(&mut tx)
        .await?;

        if in_use {
            return Err(RepoError::InUse(Resource::Category));
        }

        sqlx::query(
            r#"
            UPDATE transaction_category
            SET deleted = TRUE, deleted_at = $3, updated_at = $3
            WHERE user_id = $1 AND id = ANY($2) AND NOT deleted
            "#,
        )
        .bind(user_id)
        .bind(category_ids)
        .bind(now)
        .execute(&mut tx)
        .await?;

        tx.commit().await?;

        Ok(())
    }
}
