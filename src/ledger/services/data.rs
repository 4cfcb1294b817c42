use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    clock::DynClock,
    ledger::errors::{LedgerError, LedgerResult},
    repos::{DynTransactionRepo, DynUserRepo},
};

#[derive(Clone)]
pub struct DataService {
    clock: DynClock,
    transaction_repo: DynTransactionRepo,
    user_repo: DynUserRepo,
}

impl DataService {
    pub fn new(clock: DynClock, transaction_repo: DynTransactionRepo, user_repo: DynUserRepo) -> Self {
        Self {
            clock,
            transaction_repo,
            user_repo,
        }
    }

    /// Remove every transaction, account, category and tag of a user after
    /// checking their password once more.
    pub async fn clear_user_data(&self, user_id: Uuid, password: &str) -> LedgerResult<()> {
        let user = self.user_repo.get_user(user_id).await?;

        if !user.matches_password(password)? {
            warn!(%user_id, "Refusing to clear data with an incorrect password.");
            return Err(LedgerError::IncorrectPassword);
        }

        self.transaction_repo
            .clear_user_data(user_id, self.clock.now_utc())
            .await?;

        info!(%user_id, "Cleared user data.");

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use crate::{
        ledger::{
            domain::edit_window::TransactionEditScope,
            services::fixtures::{Fixture, PASSWORD},
        },
        repos::AccountRepo,
    };

    use super::*;

    #[tokio::test]
    async fn clearing_requires_password() {
        let fixture = Fixture::new(TransactionEditScope::All).await;
        let cash = fixture.leaf_account("Cash").await;
        let user_id = fixture.user.id;

        let error = fixture
            .data()
            .clear_user_data(user_id, "not the password")
            .await
            .unwrap_err();
        assert!(matches!(error, LedgerError::IncorrectPassword));
        assert!(fixture.store.get_account(user_id, cash.id).await.is_ok());

        fixture
            .data()
            .clear_user_data(user_id, PASSWORD)
            .await
            .expect("data is cleared");
        assert!(fixture.store.list_accounts(user_id).await.unwrap().is_empty());
    }
}
