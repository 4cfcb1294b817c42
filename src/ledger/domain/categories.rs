use std::convert::TryFrom;

use chrono::{DateTime, Utc};
use semval::prelude::*;
use uuid::Uuid;

const MAX_NAME_LENGTH: usize = 64;
const MAX_COMMENT_LENGTH: usize = 255;

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum CategoryType {
    Income,
    Expense,
    Transfer,
}

impl CategoryType {
    pub fn code(self) -> i16 {
        match self {
            Self::Income => 1,
            Self::Expense => 2,
            Self::Transfer => 3,
        }
    }
}

impl TryFrom<i16> for CategoryType {
    type Error = i16;

    fn try_from(code: i16) -> Result<Self, Self::Error> {
        match code {
            1 => Ok(Self::Income),
            2 => Ok(Self::Expense),
            3 => Ok(Self::Transfer),
            other => Err(other),
        }
    }
}

/// A per-user category. Categories nest at most one level deep: primary
/// categories group secondary ones, and transactions reference secondary
/// categories.
#[derive(Clone, Debug, PartialEq)]
pub struct TransactionCategory {
    pub id: Uuid,
    pub user_id: Uuid,
    pub parent_id: Option<Uuid>,
    pub category_type: CategoryType,
    pub name: String,
    pub icon: i64,
    pub color: String,
    pub comment: String,
    pub display_order: i32,
    pub hidden: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TransactionCategory {
    pub fn is_primary(&self) -> bool {
        self.parent_id.is_none()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct CategoryTree {
    pub category: TransactionCategory,
    pub sub_categories: Vec<TransactionCategory>,
}

impl CategoryTree {
    pub fn build(mut categories: Vec<TransactionCategory>) -> Vec<CategoryTree> {
        categories.sort_by(|a, b| {
            (a.category_type, a.display_order, a.id).cmp(&(b.category_type, b.display_order, b.id))
        });

        let (primary, secondary): (Vec<_>, Vec<_>) =
            categories.into_iter().partition(TransactionCategory::is_primary);

        primary
            .into_iter()
            .map(|category| {
                let sub_categories = secondary
                    .iter()
                    .filter(|c| c.parent_id == Some(category.id))
                    .cloned()
                    .collect();

                CategoryTree {
                    category,
                    sub_categories,
                }
            })
            .collect()
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CategoryInvalidity {
    UnknownType,
    NameRequired,
    NameTooLong(usize),
    CommentTooLong(usize),
    ParentMustBePrimary,
    ParentTypeMismatch,
    InUse,
}

#[derive(Clone, Debug, PartialEq)]
pub struct NewCategoryData {
    pub name: String,
    pub category_type: CategoryType,
    pub parent_id: Option<Uuid>,
    pub icon: i64,
    pub color: String,
    pub comment: String,
}

impl NewCategoryData {
    pub fn into_category(
        self,
        user_id: Uuid,
        display_order: i32,
        now: DateTime<Utc>,
    ) -> TransactionCategory {
        TransactionCategory {
            id: Uuid::new_v4(),
            user_id,
            parent_id: self.parent_id,
            category_type: self.category_type,
            name: self.name.trim().to_owned(),
            icon: self.icon,
            color: self.color,
            comment: self.comment,
            display_order,
            hidden: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Check that `parent` can hold the new category.
    pub fn check_parent(&self, parent: &TransactionCategory) -> ValidationResult<CategoryInvalidity> {
        ValidationContext::new()
            .invalidate_if(!parent.is_primary(), CategoryInvalidity::ParentMustBePrimary)
            .invalidate_if(
                parent.category_type != self.category_type,
                CategoryInvalidity::ParentTypeMismatch,
            )
            .into()
    }
}

impl Validate for NewCategoryData {
    type Invalidity = CategoryInvalidity;

    fn validate(&self) -> ValidationResult<Self::Invalidity> {
        let name_length = self.name.trim().chars().count();

        ValidationContext::new()
            .invalidate_if(name_length == 0, CategoryInvalidity::NameRequired)
            .invalidate_if(
                name_length > MAX_NAME_LENGTH,
                CategoryInvalidity::NameTooLong(MAX_NAME_LENGTH),
            )
            .invalidate_if(
                self.comment.chars().count() > MAX_COMMENT_LENGTH,
                CategoryInvalidity::CommentTooLong(MAX_COMMENT_LENGTH),
            )
            .into()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn data(parent_id: Option<Uuid>) -> NewCategoryData {
        NewCategoryData {
            name: "Food".to_owned(),
            category_type: CategoryType::Expense,
            parent_id,
            icon: 1,
            color: "ff0000".to_owned(),
            comment: String::new(),
        }
    }

    #[test]
    fn blank_name_is_rejected() {
        let mut new_category = data(None);
        new_category.name = "   ".to_owned();

        let context = new_category.validate().expect_err("name is blank");

        assert_eq!(
            vec![CategoryInvalidity::NameRequired],
            context.into_iter().collect::<Vec<_>>()
        );
    }

    #[test]
    fn parent_must_be_primary_of_same_type() {
        let user_id = Uuid::new_v4();
        let primary = data(None).into_category(user_id, 1, Utc::now());
        let secondary = data(Some(primary.id)).into_category(user_id, 1, Utc::now());

        assert!(data(Some(primary.id)).check_parent(&primary).is_ok());

        let context = data(Some(secondary.id))
            .check_parent(&secondary)
            .expect_err("parent is secondary");
        assert_eq!(
            vec![CategoryInvalidity::ParentMustBePrimary],
            context.into_iter().collect::<Vec<_>>()
        );

        let mut income = data(Some(primary.id));
        income.category_type = CategoryType::Income;
        let context = income.check_parent(&primary).expect_err("types differ");
        assert_eq!(
            vec![CategoryInvalidity::ParentTypeMismatch],
            context.into_iter().collect::<Vec<_>>()
        );
    }

    #[test]
    fn build_tree_nests_secondary_categories() {
        let user_id = Uuid::new_v4();
        let primary = data(None).into_category(user_id, 1, Utc::now());
        let secondary = data(Some(primary.id)).into_category(user_id, 1, Utc::now());

        let trees = CategoryTree::build(vec![secondary.clone(), primary.clone()]);

        assert_eq!(1, trees.len());
        assert_eq!(primary, trees[0].category);
        assert_eq!(vec![secondary], trees[0].sub_categories);
    }
}
