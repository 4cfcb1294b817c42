use uuid::Uuid;

use crate::{
    ledger::errors::LedgerResult,
    repos::{DynAccountRepo, DynCategoryRepo},
};

/// Translates an account or category filter into the concrete ids
/// transactions are booked on.
#[derive(Clone)]
pub struct HierarchyResolver {
    account_repo: DynAccountRepo,
    category_repo: DynCategoryRepo,
}

impl HierarchyResolver {
    pub fn new(account_repo: DynAccountRepo, category_repo: DynCategoryRepo) -> Self {
        Self {
            account_repo,
            category_repo,
        }
    }

    /// Resolve an account filter.
    ///
    /// # Returns
    ///
    /// Nothing when there is no filter, which means no restriction. The ids
    /// of the sub-accounts of a container. The id itself otherwise, including
    /// for unknown ids, which then simply match no transactions.
    pub async fn resolve_account_group(
        &self,
        user_id: Uuid,
        account_id: Option<Uuid>,
    ) -> LedgerResult<Vec<Uuid>> {
        let account_id = match account_id {
            Some(id) => id,
            None => return Ok(Vec::new()),
        };

        let sub_accounts = self.account_repo.get_sub_accounts(user_id, account_id).await?;

        if sub_accounts.is_empty() {
            Ok(vec![account_id])
        } else {
            Ok(sub_accounts.into_iter().map(|a| a.id).collect())
        }
    }

    /// Resolve a category filter, the same way accounts are resolved.
    pub async fn resolve_category_group(
        &self,
        user_id: Uuid,
        category_id: Option<Uuid>,
    ) -> LedgerResult<Vec<Uuid>> {
        let category_id = match category_id {
            Some(id) => id,
            None => return Ok(Vec::new()),
        };

        let sub_categories = self
            .category_repo
            .get_sub_categories(user_id, category_id)
            .await?;

        if sub_categories.is_empty() {
            Ok(vec![category_id])
        } else {
            Ok(sub_categories.into_iter().map(|c| c.id).collect())
        }
    }
}

#[cfg(test)]
mod test {
    use crate::ledger::{
        domain::{categories::CategoryType, edit_window::TransactionEditScope},
        services::fixtures::Fixture,
    };

    use super::*;

    fn resolver(fixture: &Fixture) -> HierarchyResolver {
        let store = std::sync::Arc::new(fixture.store.clone());

        HierarchyResolver::new(store.clone(), store)
    }

    #[tokio::test]
    async fn container_resolves_to_sub_accounts_only() {
        let fixture = Fixture::new(TransactionEditScope::All).await;
        let (bank, subs) = fixture.container_account("Bank", &["Euro", "Dollar"]).await;

        let mut resolved = resolver(&fixture)
            .resolve_account_group(fixture.user.id, Some(bank.id))
            .await
            .unwrap();
        resolved.sort();

        let mut expected = subs.iter().map(|sub| sub.id).collect::<Vec<_>>();
        expected.sort();

        assert_eq!(expected, resolved);
        assert!(!resolved.contains(&bank.id));
    }

    #[tokio::test]
    async fn leaf_and_unknown_ids_resolve_to_themselves() {
        let fixture = Fixture::new(TransactionEditScope::All).await;
        let cash = fixture.leaf_account("Cash").await;
        let unknown = Uuid::new_v4();
        let resolver = resolver(&fixture);
        let user_id = fixture.user.id;

        assert_eq!(
            vec![cash.id],
            resolver.resolve_account_group(user_id, Some(cash.id)).await.unwrap()
        );
        assert_eq!(
            vec![unknown],
            resolver.resolve_account_group(user_id, Some(unknown)).await.unwrap()
        );
        assert!(resolver.resolve_account_group(user_id, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn primary_category_resolves_to_children() {
        let fixture = Fixture::new(TransactionEditScope::All).await;
        let food = fixture.category(CategoryType::Expense, None).await;
        let lunch = fixture.category(CategoryType::Expense, Some(food.id)).await;

        let resolved = resolver(&fixture)
            .resolve_category_group(fixture.user.id, Some(food.id))
            .await
            .unwrap();

        assert_eq!(vec![lunch.id], resolved);
    }
}
