use semval::prelude::*;
use tracing::info;
use uuid::Uuid;

use crate::{
    clock::DynClock,
    ledger::{
        domain::tags::{TagName, TransactionTag},
        errors::{LedgerError, LedgerInvalidity, LedgerResult, Resource},
    },
    repos::DynTagRepo,
};

#[derive(Clone)]
pub struct TagService {
    clock: DynClock,
    tag_repo: DynTagRepo,
}

impl TagService {
    pub fn new(clock: DynClock, tag_repo: DynTagRepo) -> Self {
        Self { clock, tag_repo }
    }

    pub async fn list_tags(&self, user_id: Uuid) -> LedgerResult<Vec<TransactionTag>> {
        Ok(self.tag_repo.list_tags(user_id).await?)
    }

    /// Create a tag. Names are unique among a user's tags.
    pub async fn create_tag(&self, user_id: Uuid, name: &str) -> LedgerResult<TransactionTag> {
        let name = parse_name(name)?;

        let display_order = self
            .tag_repo
            .max_tag_display_order(user_id)
            .await?
            .unwrap_or(0)
            + 1;
        let now = self.clock.now_utc();

        let tag = TransactionTag {
            id: Uuid::new_v4(),
            user_id,
            name: name.into_string(),
            display_order,
            created_at: now,
            updated_at: now,
        };
        self.tag_repo.create_tag(&tag).await?;

        info!(%user_id, tag_id = %tag.id, "Created transaction tag.");

        Ok(tag)
    }

    pub async fn rename_tag(
        &self,
        user_id: Uuid,
        tag_id: Uuid,
        name: &str,
    ) -> LedgerResult<TransactionTag> {
        let name = parse_name(name)?;

        let current = self
            .tag_repo
            .get_tags_by_ids(user_id, &[tag_id])
            .await?
            .pop()
            .ok_or(LedgerError::NotFound(Resource::Tag))?;

        if current.name == name.as_str() {
            return Err(LedgerError::NoOp);
        }

        let now = self.clock.now_utc();
        self.tag_repo
            .rename_tag(user_id, tag_id, name.as_str(), now)
            .await?;

        info!(%user_id, %tag_id, "Renamed transaction tag.");

        Ok(TransactionTag {
            name: name.into_string(),
            updated_at: now,
            ..current
        })
    }

    /// Delete a tag and detach it from every transaction.
    pub async fn delete_tag(&self, user_id: Uuid, tag_id: Uuid) -> LedgerResult<()> {
        self.tag_repo
            .delete_tag(user_id, tag_id, self.clock.now_utc())
            .await?;

        info!(%user_id, %tag_id, "Deleted transaction tag.");

        Ok(())
    }
}

fn parse_name(raw: &str) -> LedgerResult<TagName> {
    TagName::validated_from(raw)
        .map_err(|(_, context)| LedgerError::from_context(context, LedgerInvalidity::Tag))
}

#[cfg(test)]
mod test {
    use crate::ledger::{
        domain::{categories::CategoryType, edit_window::TransactionEditScope, tags::TagInvalidity},
        errors::LedgerInvalidity,
        services::fixtures::{self, Fixture, NOW},
    };

    use super::*;

    #[tokio::test]
    async fn names_are_unique_per_user() {
        let fixture = Fixture::new(TransactionEditScope::All).await;
        let service = fixture.tags();
        let user_id = fixture.user.id;

        let first = service.create_tag(user_id, "  travel ").await.unwrap();
        assert_eq!("travel", first.name);

        let error = service.create_tag(user_id, "travel").await.unwrap_err();
        assert_eq!(
            vec![LedgerInvalidity::Tag(TagInvalidity::DuplicateName)],
            error.invalidities()
        );

        let other = Fixture::new(TransactionEditScope::All).await;
        assert!(other.tags().create_tag(other.user.id, "travel").await.is_ok());
    }

    #[tokio::test]
    async fn blank_names_are_rejected() {
        let fixture = Fixture::new(TransactionEditScope::All).await;

        let error = fixture
            .tags()
            .create_tag(fixture.user.id, "   ")
            .await
            .unwrap_err();

        assert_eq!(
            vec![LedgerInvalidity::Tag(TagInvalidity::NameRequired)],
            error.invalidities()
        );
    }

    #[tokio::test]
    async fn renaming_to_same_name_is_rejected() {
        let fixture = Fixture::new(TransactionEditScope::All).await;
        let tag = fixture.tag("travel").await;
        let service = fixture.tags();

        let error = service
            .rename_tag(fixture.user.id, tag.id, "travel")
            .await
            .unwrap_err();
        assert!(matches!(error, LedgerError::NoOp));

        let renamed = service
            .rename_tag(fixture.user.id, tag.id, "holiday")
            .await
            .unwrap();
        assert_eq!("holiday", renamed.name);
    }

    #[tokio::test]
    async fn deleted_tags_leave_transactions() {
        let fixture = Fixture::new(TransactionEditScope::All).await;
        let cash = fixture.leaf_account("Cash").await;
        let category = fixture.secondary_category(CategoryType::Expense).await;
        let tag = fixture.tag("travel").await;
        let transactions = fixture.transactions();
        let user_id = fixture.user.id;

        let mut data = fixtures::expense(category.id, cash.id, 100, NOW - 60);
        data.fields.tag_ids = vec![tag.id];
        let created = transactions
            .create_transaction(user_id, 0, data, None)
            .await
            .unwrap();

        fixture.tags().delete_tag(user_id, tag.id).await.unwrap();

        let detail = transactions
            .get_transaction(user_id, 0, created.transaction.id)
            .await
            .unwrap();
        assert!(detail.tag_ids.is_empty());
        assert!(fixture.tags().list_tags(user_id).await.unwrap().is_empty());
    }
}
