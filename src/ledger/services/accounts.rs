use tracing::info;
use uuid::Uuid;

use crate::{
    clock::DynClock,
    ledger::{
        domain::{
            accounts::{Account, AccountChanges, AccountInvalidity, AccountTree, NewAccountData},
            transactions::Transaction,
        },
        errors::{LedgerError, LedgerInvalidity, LedgerResult, Resource},
    },
    repos::DynAccountRepo,
};

#[derive(Clone)]
pub struct AccountService {
    account_repo: DynAccountRepo,
    clock: DynClock,
}

impl AccountService {
    pub fn new(account_repo: DynAccountRepo, clock: DynClock) -> Self {
        Self {
            account_repo,
            clock,
        }
    }

    /// List the user's accounts as trees of containers and their
    /// sub-accounts.
    pub async fn list_accounts(&self, user_id: Uuid) -> LedgerResult<Vec<AccountTree>> {
        let accounts = self.account_repo.list_accounts(user_id).await?;

        Ok(AccountTree::build(accounts))
    }

    pub async fn get_account(&self, user_id: Uuid, account_id: Uuid) -> LedgerResult<AccountTree> {
        let account = self.account_repo.get_account(user_id, account_id).await?;
        let sub_accounts = self.sub_accounts_of(&account).await?;

        Ok(AccountTree {
            account,
            sub_accounts,
        })
    }

    /// Create an account, together with its sub-accounts for a container.
    ///
    /// Leaf accounts starting with a non-zero balance get a modify-balance
    /// transaction recording it.
    ///
    /// # Arguments
    ///
    /// * `user_id` - The owner of the new account.
    /// * `client_utc_offset` - The caller's UTC offset in minutes, recorded on
    ///   the opening transactions.
    /// * `data` - The account to create.
    pub async fn create_account(
        &self,
        user_id: Uuid,
        client_utc_offset: i16,
        data: NewAccountData,
    ) -> LedgerResult<AccountTree> {
        LedgerError::check(&data, LedgerInvalidity::Account)?;

        let display_order = self
            .account_repo
            .max_account_display_order(user_id, data.category)
            .await?
            .unwrap_or(0)
            + 1;

        let now = self.clock.now_utc();
        let (account, sub_accounts) = data.into_accounts(user_id, display_order, now);

        let openings = std::iter::once(&account)
            .chain(&sub_accounts)
            .filter(|a| !a.is_container() && a.balance != 0)
            .map(|a| Transaction::opening_balance(a, client_utc_offset, now))
            .collect::<Vec<_>>();

        self.account_repo
            .create_accounts(&account, &sub_accounts, &openings)
            .await?;

        info!(
            %user_id,
            account_id = %account.id,
            sub_accounts = sub_accounts.len(),
            "Created account."
        );

        Ok(AccountTree {
            account,
            sub_accounts,
        })
    }

    /// Update the user editable fields of an account. The sub-accounts of a
    /// container follow its category.
    pub async fn modify_account(
        &self,
        user_id: Uuid,
        account_id: Uuid,
        changes: AccountChanges,
    ) -> LedgerResult<AccountTree> {
        LedgerError::check(&changes, LedgerInvalidity::Account)?;

        let account = self.account_repo.get_account(user_id, account_id).await?;

        if account.parent_id.is_some() && changes.category != account.category {
            return Err(LedgerError::invalid(
                AccountInvalidity::SubAccountCategoryMismatch,
            ));
        }

        if account.is_unchanged_by(&changes) {
            return Err(LedgerError::NoOp);
        }

        let now = self.clock.now_utc();
        let updated = account.with_changes(&changes, now);
        let mut sub_accounts = self.sub_accounts_of(&account).await?;
        let mut batch = vec![updated.clone()];

        if account.category != updated.category {
            for sub in &mut sub_accounts {
                sub.category = updated.category;
                sub.updated_at = now;
            }
            batch.extend(sub_accounts.iter().cloned());
        }

        self.account_repo.modify_accounts(&batch).await?;

        info!(%user_id, %account_id, "Modified account.");

        Ok(AccountTree {
            account: updated,
            sub_accounts,
        })
    }

    /// Hide or show an account. A container takes its sub-accounts along.
    pub async fn hide_account(
        &self,
        user_id: Uuid,
        account_id: Uuid,
        hidden: bool,
    ) -> LedgerResult<()> {
        let account = self.account_repo.get_account(user_id, account_id).await?;
        let ids = self.with_sub_account_ids(&account).await?;

        self.account_repo
            .hide_accounts(user_id, &ids, hidden, self.clock.now_utc())
            .await?;

        info!(%user_id, %account_id, hidden, "Changed account visibility.");

        Ok(())
    }

    /// Apply new display orders to a group of sibling accounts.
    ///
    /// # Arguments
    ///
    /// * `orders` - Pairs of account id and display order. The accounts must
    ///   share their container and category.
    pub async fn move_accounts(&self, user_id: Uuid, orders: &[(Uuid, i32)]) -> LedgerResult<()> {
        if orders.is_empty() {
            return Err(LedgerError::NoOp);
        }

        let ids = orders.iter().map(|(id, _)| *id).collect::<Vec<_>>();
        let accounts = self
            .account_repo
            .get_accounts_by_ids(user_id, &ids)
            .await?;

        if accounts.len() != ids.len() {
            return Err(LedgerError::NotFound(Resource::Account));
        }

        let first = &accounts[0];
        if accounts
            .iter()
            .any(|a| a.parent_id != first.parent_id || a.category != first.category)
        {
            return Err(LedgerError::invalid(AccountInvalidity::MixedDisplayGroups));
        }

        self.account_repo
            .set_display_orders(user_id, orders, self.clock.now_utc())
            .await?;

        info!(%user_id, accounts = orders.len(), "Moved accounts.");

        Ok(())
    }

    /// Delete an account, and the sub-accounts of a container. Accounts
    /// that transactions still reference cannot be deleted.
    pub async fn delete_account(&self, user_id: Uuid, account_id: Uuid) -> LedgerResult<()> {
        let account = self.account_repo.get_account(user_id, account_id).await?;
        let ids = self.with_sub_account_ids(&account).await?;

        self.account_repo
            .delete_accounts(user_id, &ids, self.clock.now_utc())
            .await?;

        info!(%user_id, %account_id, "Deleted account.");

        Ok(())
    }

    async fn sub_accounts_of(&self, account: &Account) -> LedgerResult<Vec<Account>> {
        if !account.is_container() {
            return Ok(Vec::new());
        }

        Ok(self
            .account_repo
            .get_sub_accounts(account.user_id, account.id)
            .await?)
    }

    async fn with_sub_account_ids(&self, account: &Account) -> LedgerResult<Vec<Uuid>> {
        let mut ids = vec![account.id];
        ids.extend(self.sub_accounts_of(account).await?.iter().map(|a| a.id));

        Ok(ids)
    }
}
