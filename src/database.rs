use std::ops::Deref;

use sqlx::PgPool;

/// The Postgres backend of every repository.
///
/// All repository traits are implemented on this one handle, so a storage
/// transaction started through it may span accounts, transactions and the
/// tag index alike.
#[derive(Clone)]
pub struct PostgresConnection(PgPool);

impl PostgresConnection {
    pub fn new(pool: PgPool) -> Self {
        Self(pool)
    }
}

impl Deref for PostgresConnection {
    type Target = PgPool;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
