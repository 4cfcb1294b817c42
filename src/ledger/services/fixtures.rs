use std::sync::Arc;

use chrono::{DateTime, FixedOffset, TimeZone, Utc, Weekday};
use uuid::Uuid;

use crate::{
    clock::{DynClock, FixedClock},
    identities::domain::users::User,
    ledger::domain::{
        accounts::{Account, AccountCategory, AccountType},
        categories::{CategoryType, TransactionCategory},
        edit_window::TransactionEditScope,
        tags::TransactionTag,
        transactions::{TransactionData, TransactionFields, TransactionType},
    },
    passwords::{Digest, Password},
    repos::{AccountRepo, CategoryRepo, MemoryStore, TagRepo, UserRepo},
};

use super::{
    AccountService, CategoryService, DataService, StatisticsService, TagService,
    TransactionService,
};

pub const PASSWORD: &str = "correct horse battery";

/// 2024-03-15 12:00:00 UTC, a Friday.
pub const NOW: i64 = 1_710_504_000;

/// A memory backed store holding one user, with services wired to a fixed
/// clock.
pub struct Fixture {
    pub store: MemoryStore,
    pub clock: DynClock,
    pub user: User,
}

impl Fixture {
    pub async fn new(scope: TransactionEditScope) -> Self {
        let store = MemoryStore::new();
        let now = Utc.timestamp_opt(NOW, 0).single().expect("valid timestamp");
        let digest = Digest::of(&Password::unvalidated(PASSWORD.to_owned())).expect("hashable");

        let user = User {
            id: Uuid::new_v4(),
            email: "ledger@example.com".to_owned(),
            nickname: "Ledger".to_owned(),
            password_hash: digest.as_str().to_owned(),
            default_currency: "USD".to_owned(),
            default_account_id: None,
            transaction_edit_scope: scope,
            first_day_of_week: Weekday::Sun,
            language: "en".to_owned(),
            disabled: false,
            email_verified: true,
            created_at: now,
            updated_at: now,
        };
        store
            .create_user(&user, &user.email)
            .await
            .expect("user is stored");

        Self {
            store,
            clock: Arc::new(FixedClock(now_in_utc())),
            user,
        }
    }

    pub async fn leaf_account(&self, name: &str) -> Account {
        self.leaf_account_in(name, "USD").await
    }

    pub async fn leaf_account_in(&self, name: &str, currency: &str) -> Account {
        let account = self.account(name, AccountType::Single, None, currency);
        self.store
            .create_accounts(&account, &[], &[])
            .await
            .expect("account is stored");

        account
    }

    pub async fn container_account(&self, name: &str, sub_names: &[&str]) -> (Account, Vec<Account>) {
        let container = self.account(name, AccountType::MultiSubAccounts, None, "---");
        let subs = sub_names
            .iter()
            .map(|sub| self.account(sub, AccountType::Single, Some(container.id), "USD"))
            .collect::<Vec<_>>();

        self.store
            .create_accounts(&container, &subs, &[])
            .await
            .expect("accounts are stored");

        (container, subs)
    }

    pub async fn category(&self, category_type: CategoryType, parent_id: Option<Uuid>) -> TransactionCategory {
        let category = TransactionCategory {
            id: Uuid::new_v4(),
            user_id: self.user.id,
            parent_id,
            category_type,
            name: format!("{:?}", category_type),
            icon: 1,
            color: "000000".to_owned(),
            comment: String::new(),
            display_order: 1,
            hidden: false,
            created_at: self.user.created_at,
            updated_at: self.user.created_at,
        };
        self.store
            .create_category(&category)
            .await
            .expect("category is stored");

        category
    }

    /// A secondary category of `category_type` under a fresh primary one.
    pub async fn secondary_category(&self, category_type: CategoryType) -> TransactionCategory {
        let primary = self.category(category_type, None).await;

        self.category(category_type, Some(primary.id)).await
    }

    pub async fn tag(&self, name: &str) -> TransactionTag {
        let tag = TransactionTag {
            id: Uuid::new_v4(),
            user_id: self.user.id,
            name: name.to_owned(),
            display_order: 1,
            created_at: self.user.created_at,
            updated_at: self.user.created_at,
        };
        self.store.create_tag(&tag).await.expect("tag is stored");

        tag
    }

    pub fn transactions(&self) -> TransactionService {
        let store = Arc::new(self.store.clone());

        TransactionService::new(
            store.clone(),
            store.clone(),
            self.clock.clone(),
            store.clone(),
            store.clone(),
            store,
        )
    }

    pub fn accounts(&self) -> AccountService {
        AccountService::new(Arc::new(self.store.clone()), self.clock.clone())
    }

    pub fn categories(&self) -> CategoryService {
        CategoryService::new(Arc::new(self.store.clone()), self.clock.clone())
    }

    pub fn tags(&self) -> TagService {
        TagService::new(self.clock.clone(), Arc::new(self.store.clone()))
    }

    pub fn statistics(&self) -> StatisticsService {
        let store = Arc::new(self.store.clone());

        StatisticsService::new(store.clone(), store)
    }

    pub fn data(&self) -> DataService {
        let store = Arc::new(self.store.clone());

        DataService::new(self.clock.clone(), store.clone(), store)
    }

    fn account(
        &self,
        name: &str,
        account_type: AccountType,
        parent_id: Option<Uuid>,
        currency: &str,
    ) -> Account {
        Account {
            id: Uuid::new_v4(),
            user_id: self.user.id,
            parent_id,
            account_type,
            category: AccountCategory::Checking,
            name: name.to_owned(),
            icon: 1,
            color: "000000".to_owned(),
            currency: currency.to_owned(),
            balance: 0,
            display_order: 1,
            hidden: false,
            comment: String::new(),
            created_at: self.user.created_at,
            updated_at: self.user.created_at,
        }
    }
}

pub fn now_in_utc() -> DateTime<FixedOffset> {
    FixedOffset::east_opt(0)
        .and_then(|utc| utc.timestamp_opt(NOW, 0).single())
        .expect("valid timestamp")
}

pub fn fields(source_account_id: Uuid, amount: i64, unix_time: i64) -> TransactionFields {
    TransactionFields {
        category_id: None,
        unix_time,
        utc_offset: 0,
        source_account_id,
        source_amount: amount,
        destination_account_id: None,
        destination_amount: 0,
        hide_amount: false,
        tag_ids: Vec::new(),
        comment: String::new(),
        geo_location: None,
    }
}

pub fn transfer(
    category_id: Uuid,
    source_account_id: Uuid,
    destination_account_id: Uuid,
    amount: i64,
) -> TransactionData {
    TransactionData {
        transaction_type: TransactionType::Transfer,
        fields: TransactionFields {
            category_id: Some(category_id),
            destination_account_id: Some(destination_account_id),
            destination_amount: amount,
            ..fields(source_account_id, amount, NOW - 60)
        },
    }
}

pub fn expense(category_id: Uuid, account_id: Uuid, amount: i64, unix_time: i64) -> TransactionData {
    TransactionData {
        transaction_type: TransactionType::Expense,
        fields: TransactionFields {
            category_id: Some(category_id),
            ..fields(account_id, amount, unix_time)
        },
    }
}

pub fn income(category_id: Uuid, account_id: Uuid, amount: i64, unix_time: i64) -> TransactionData {
    TransactionData {
        transaction_type: TransactionType::Income,
        ..expense(category_id, account_id, amount, unix_time)
    }
}
