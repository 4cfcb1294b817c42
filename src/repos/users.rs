use std::{convert::TryFrom, sync::Arc};

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use crate::{
    database::PostgresConnection,
    identities::domain::users::{weekday_code, weekday_from_code, User},
    ledger::{domain::edit_window::TransactionEditScope, errors::Resource},
};

use super::{duplicate_as, RepoError, RepoResult};

pub type DynUserRepo = Arc<dyn UserRepo + Send + Sync>;

#[async_trait]
pub trait UserRepo {
    /// Persist a newly registered user.
    ///
    /// # Arguments
    ///
    /// * `user` - The user to store.
    /// * `normalized_email` - The address used to detect duplicate
    ///   registrations.
    ///
    /// # Returns
    ///
    /// [`RepoError::Duplicate`] if another user already registered the
    /// normalized address.
    async fn create_user(&self, user: &User, normalized_email: &str) -> RepoResult<()>;

    async fn get_user(&self, user_id: Uuid) -> RepoResult<User>;

    /// Overwrite the stored profile and preferences of a user.
    async fn update_user(&self, user: &User) -> RepoResult<()>;
}

#[derive(FromRow)]
struct UserRow {
    id: Uuid,
    email: String,
    nickname: String,
    password_hash: String,
    default_currency: String,
    default_account_id: Option<Uuid>,
    transaction_edit_scope: i16,
    first_day_of_week: i16,
    language: String,
    disabled: bool,
    email_verified: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<UserRow> for User {
    type Error = anyhow::Error;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        let transaction_edit_scope = TransactionEditScope::try_from(row.transaction_edit_scope)
            .map_err(|error| anyhow!("user {} has an unknown edit scope {}", row.id, error.0))?;
        let first_day_of_week = weekday_from_code(row.first_day_of_week).ok_or_else(|| {
            anyhow!(
                "user {} has an unknown first day of week {}",
                row.id,
                row.first_day_of_week
            )
        })?;

        Ok(User {
            id: row.id,
            email: row.email,
            nickname: row.nickname,
            password_hash: row.password_hash,
            default_currency: row.default_currency,
            default_account_id: row.default_account_id,
            transaction_edit_scope,
            first_day_of_week,
            language: row.language,
            disabled: row.disabled,
            email_verified: row.email_verified,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[async_trait]
impl UserRepo for PostgresConnection {
    async fn create_user(&self, user: &User, normalized_email: &str) -> RepoResult<()> {
        sqlx::query(
            r#"
            INSERT INTO "user" (
                id, email, normalized_email, nickname, password_hash,
                default_currency, default_account_id, transaction_edit_scope,
                first_day_of_week, language, disabled, email_verified,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(user.id)
        .bind(&user.email)
        .bind(normalized_email)
        .bind(&user.nickname)
        .bind(&user.password_hash)
        .bind(&user.default_currency)
        .bind(user.default_account_id)
        .bind(user.transaction_edit_scope.code())
        .bind(weekday_code(user.first_day_of_week))
        .bind(&user.language)
        .bind(user.disabled)
        .bind(user.email_verified)
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(&**self)
        .await
        .map_err(duplicate_as(Resource::User))?;

        Ok(())
    }

    async fn get_user(&self, user_id: Uuid) -> RepoResult<User> {
        let row = sqlx::query_as::<_, UserRow>(
            r#"
            SELECT *
            FROM "user"
            WHERE id = $1 AND NOT deleted
            "#,
        )
        .bind(user_id)
        .fetch_optional(&**self)
        .await?
        .ok_or(RepoError::NotFound(Resource::User))?;

        Ok(User::try_from(row)?)
    }

    async fn update_user(&self, user: &User) -> RepoResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE "user"
            SET nickname = $2,
                default_currency = $3,
                default_account_id = $4,
                transaction_edit_scope = $5,
                first_day_of_week = $6,
                language = $7,
                updated_at = $8
            WHERE id = $1 AND NOT deleted
            "#,
        )
        .bind(user.id)
        .bind(&user.nickname)
        .bind(&user.default_currency)
        .bind(user.default_account_id)
        .bind(user.transaction_edit_scope.code())
        .bind(weekday_code(user.first_day_of_week))
        .bind(&user.language)
        .bind(user.updated_at)
        .execute(&**self)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepoError::NotFound(Resource::User));
        }

        Ok(())
    }
}
