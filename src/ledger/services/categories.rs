use tracing::info;
use uuid::Uuid;

use crate::{
    clock::DynClock,
    ledger::{
        domain::categories::{CategoryTree, CategoryType, NewCategoryData, TransactionCategory},
        errors::{LedgerError, LedgerInvalidity, LedgerResult},
    },
    repos::DynCategoryRepo,
};

#[derive(Clone)]
pub struct CategoryService {
    category_repo: DynCategoryRepo,
    clock: DynClock,
}

impl CategoryService {
    pub fn new(category_repo: DynCategoryRepo, clock: DynClock) -> Self {
        Self {
            category_repo,
            clock,
        }
    }

    /// List the user's categories as primary categories holding their
    /// secondary ones.
    pub async fn list_categories(
        &self,
        user_id: Uuid,
        category_type: Option<CategoryType>,
    ) -> LedgerResult<Vec<CategoryTree>> {
        let categories = self
            .category_repo
            .list_categories(user_id, category_type)
            .await?;

        Ok(CategoryTree::build(categories))
    }

    /// Create a primary category, or a secondary one when a parent is given.
    /// The parent must be a primary category of the same type.
    pub async fn create_category(
        &self,
        user_id: Uuid,
        data: NewCategoryData,
    ) -> LedgerResult<TransactionCategory> {
        LedgerError::check(&data, LedgerInvalidity::Category)?;

        if let Some(parent_id) = data.parent_id {
            let parent = self.category_repo.get_category(user_id, parent_id).await?;

            data.check_parent(&parent)
                .map_err(|context| LedgerError::from_context(context, LedgerInvalidity::Category))?;
        }

        let display_order = self
            .category_repo
            .max_category_display_order(user_id, data.parent_id, data.category_type)
            .await?
            .unwrap_or(0)
            + 1;

        let category = data.into_category(user_id, display_order, self.clock.now_utc());
        self.category_repo.create_category(&category).await?;

        info!(%user_id, category_id = %category.id, "Created transaction category.");

        Ok(category)
    }

    /// Hide or show a category. A primary category takes its children along.
    pub async fn hide_category(
        &self,
        user_id: Uuid,
        category_id: Uuid,
        hidden: bool,
    ) -> LedgerResult<()> {
        let ids = self.with_child_ids(user_id, category_id).await?;

        self.category_repo
            .hide_categories(user_id, &ids, hidden, self.clock.now_utc())
            .await?;

        info!(%user_id, %category_id, hidden, "Changed transaction category visibility.");

        Ok(())
    }

    /// Delete a category, and the children of a primary category. Categories
    /// that transactions still reference cannot be deleted.
    pub async fn delete_category(&self, user_id: Uuid, category_id: Uuid) -> LedgerResult<()> {
        let ids = self.with_child_ids(user_id, category_id).await?;

        self.category_repo
            .delete_categories(user_id, &ids, self.clock.now_utc())
            .await?;

        info!(%user_id, %category_id, "Deleted transaction category.");

        Ok(())
    }

    async fn with_child_ids(&self, user_id: Uuid, category_id: Uuid) -> LedgerResult<Vec<Uuid>> {
        let category = self.category_repo.get_category(user_id, category_id).await?;
        let mut ids = vec![category.id];

        if category.is_primary() {
            ids.extend(
                self.category_repo
                    .get_sub_categories(user_id, category.id)
                    .await?
                    .iter()
                    .map(|c| c.id),
            );
        }

        Ok(ids)
    }
}

#[cfg(test)]
mod test {
    use crate::ledger::{
        domain::{categories::CategoryInvalidity, edit_window::TransactionEditScope},
        errors::LedgerInvalidity,
        services::fixtures::{self, Fixture, NOW},
    };

    use super::*;

    fn named(name: &str, category_type: CategoryType, parent_id: Option<Uuid>) -> NewCategoryData {
        NewCategoryData {
            name: name.to_owned(),
            category_type,
            parent_id,
            icon: 1,
            color: "ff0000".to_owned(),
            comment: String::new(),
        }
    }

    #[tokio::test]
    async fn secondary_categories_are_listed_under_parent() {
        let fixture = Fixture::new(TransactionEditScope::All).await;
        let service = fixture.categories();
        let user_id = fixture.user.id;

        let food = service
            .create_category(user_id, named("Food", CategoryType::Expense, None))
            .await
            .unwrap();
        let lunch = service
            .create_category(user_id, named("Lunch", CategoryType::Expense, Some(food.id)))
            .await
            .unwrap();
        let dinner = service
            .create_category(user_id, named("Dinner", CategoryType::Expense, Some(food.id)))
            .await
            .unwrap();
        service
            .create_category(user_id, named("Salary", CategoryType::Income, None))
            .await
            .unwrap();

        assert_eq!((1, 2), (lunch.display_order, dinner.display_order));

        let trees = service
            .list_categories(user_id, Some(CategoryType::Expense))
            .await
            .unwrap();

        assert_eq!(1, trees.len());
        assert_eq!(food.id, trees[0].category.id);
        assert_eq!(
            vec![lunch.id, dinner.id],
            trees[0].sub_categories.iter().map(|c| c.id).collect::<Vec<_>>()
        );
    }

    #[tokio::test]
    async fn parent_must_share_type() {
        let fixture = Fixture::new(TransactionEditScope::All).await;
        let user_id = fixture.user.id;
        let salary = fixture.category(CategoryType::Income, None).await;

        let error = fixture
            .categories()
            .create_category(user_id, named("Lunch", CategoryType::Expense, Some(salary.id)))
            .await
            .unwrap_err();

        assert_eq!(
            vec![LedgerInvalidity::Category(CategoryInvalidity::ParentTypeMismatch)],
            error.invalidities()
        );
    }

    #[tokio::test]
    async fn referenced_categories_are_kept() {
        let fixture = Fixture::new(TransactionEditScope::All).await;
        let cash = fixture.leaf_account("Cash").await;
        let food = fixture.category(CategoryType::Expense, None).await;
        let lunch = fixture.category(CategoryType::Expense, Some(food.id)).await;
        let user_id = fixture.user.id;

        fixture
            .transactions()
            .create_transaction(
                user_id,
                0,
                fixtures::expense(lunch.id, cash.id, 100, NOW - 60),
                None,
            )
            .await
            .unwrap();

        let error = fixture
            .categories()
            .delete_category(user_id, food.id)
            .await
            .unwrap_err();

        assert_eq!(
            vec![LedgerInvalidity::Category(CategoryInvalidity::InUse)],
            error.invalidities()
        );
    }

    #[tokio::test]
    async fn deleting_primary_category_removes_children() {
        let fixture = Fixture::new(TransactionEditScope::All).await;
        let food = fixture.category(CategoryType::Expense, None).await;
        fixture.category(CategoryType::Expense, Some(food.id)).await;
        let user_id = fixture.user.id;

        fixture
            .categories()
            .delete_category(user_id, food.id)
            .await
            .expect("category is deleted");

        let trees = fixture.categories().list_categories(user_id, None).await.unwrap();
        assert!(trees.is_empty());
    }
}
