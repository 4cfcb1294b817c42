use semval::{context::Context as ValidationContext, prelude::*};
use thiserror::Error;
use tracing::{error, info};
use uuid::Uuid;

use crate::{
    clock::DynClock,
    ledger::errors::Resource,
    notifications::{Message, NotificationQueue},
    repos::{DynAccountRepo, DynUserRepo, RepoError},
};

use super::domain::users::{
    NewUser, NewUserData, NewUserInvalidity, PreferencesInvalidity, PreferencesUpdate, User,
};

#[derive(Debug, Error)]
pub enum UserError {
    /// The provided registration data is invalid.
    #[error("invalid user data: {0:?}")]
    InvalidUser(ValidationContext<NewUserInvalidity>),

    #[error("invalid preferences: {0:?}")]
    InvalidPreferences(ValidationContext<PreferencesInvalidity>),

    #[error("email address is already registered")]
    DuplicateEmail,

    /// The chosen default account does not exist or belongs to someone
    /// else.
    #[error("default account not found")]
    DefaultAccountNotFound,

    #[error("user not found")]
    NotFound,

    #[error("nothing will be updated")]
    NoOp,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<RepoError> for UserError {
    fn from(error: RepoError) -> Self {
        match error {
            RepoError::NotFound(Resource::User) => Self::NotFound,
            RepoError::NotFound(Resource::Account) => Self::DefaultAccountNotFound,
            RepoError::Duplicate(Resource::User) => Self::DuplicateEmail,
            RepoError::Other(error) => Self::Other(error),
            other => Self::Other(anyhow::Error::from(other)),
        }
    }
}

pub type UserResult<T> = Result<T, UserError>;

/// A service object providing functionality relating to users.
#[derive(Clone)]
pub struct UserService {
    account_repo: DynAccountRepo,
    clock: DynClock,
    notifications: NotificationQueue,
    user_repo: DynUserRepo,
}

impl UserService {
    /// Create a new user service.
    ///
    /// # Arguments
    ///
    /// * `account_repo` - Used to check the default account a user picks.
    /// * `clock` - The source of timestamps.
    /// * `notifications` - The queue welcome messages are submitted to.
    /// * `user_repo` - The repository used to persist and query user
    ///   information.
    pub fn new(
        account_repo: DynAccountRepo,
        clock: DynClock,
        notifications: NotificationQueue,
        user_repo: DynUserRepo,
    ) -> Self {
        Self {
            account_repo,
            clock,
            notifications,
            user_repo,
        }
    }

    /// Register a new user.
    ///
    /// Once the user is stored, a welcome message asking them to verify
    /// their address is queued. Its delivery does not influence the result.
    pub async fn register(&self, data: NewUserData) -> UserResult<User> {
        let new_user = NewUser::validated_from(data)
            .map_err(|(_, context)| UserError::InvalidUser(context))?;
        let normalized_email = new_user.email().normalized_address();

        let user = new_user.into_user(self.clock.now_utc())?;

        if let Err(error) = self.user_repo.create_user(&user, &normalized_email).await {
            if !matches!(error, RepoError::Duplicate(_)) {
                error!(?error, "Failed to persist new user.");
            }

            return Err(error.into());
        }

        info!(user_id = %user.id, "Registered user.");

        self.notifications.submit(Message {
            to: user.email.clone(),
            subject: "Welcome, please confirm your email".to_owned(),
            text: format!(
                "Hi {},\n\nyour ledger is ready. Please confirm {} to finish signing up.",
                display_name(&user),
                user.email
            ),
        });

        Ok(user)
    }

    pub async fn get_user(&self, user_id: Uuid) -> UserResult<User> {
        Ok(self.user_repo.get_user(user_id).await?)
    }

    /// Apply a partial preferences update.
    ///
    /// # Returns
    ///
    /// The updated user, or [`UserError::NoOp`] if no field changes.
    pub async fn update_preferences(
        &self,
        user_id: Uuid,
        update: PreferencesUpdate,
    ) -> UserResult<User> {
        update.validate().map_err(UserError::InvalidPreferences)?;

        let user = self.user_repo.get_user(user_id).await?;

        if let Some(account_id) = update.default_account_id {
            self.account_repo.get_account(user_id, account_id).await?;
        }

        let updated = user
            .with_preferences(&update, self.clock.now_utc())
            .ok_or(UserError::NoOp)?;

        self.user_repo.update_user(&updated).await?;

        info!(%user_id, "Updated user preferences.");

        Ok(updated)
    }
}

fn display_name(user: &User) -> &str {
    if user.nickname.is_empty() {
        &user.email
    } else {
        &user.nickname
    }
}

#[cfg(test)]
mod test {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use chrono::Weekday;

    use crate::{
        ledger::{
            domain::edit_window::TransactionEditScope,
            services::fixtures::{self, Fixture},
        },
        notifications::EmailClient,
        repos::MemoryStore,
    };

    use super::*;

    #[derive(Default)]
    struct RecordingClient {
        sent: Mutex<Vec<Message>>,
    }

    #[async_trait]
    impl EmailClient for RecordingClient {
        async fn send(&self, message: &Message) -> anyhow::Result<()> {
            self.sent.lock().unwrap().push(message.clone());

            Ok(())
        }
    }

    fn service(store: &MemoryStore, client: Arc<RecordingClient>) -> (UserService, NotificationQueue) {
        let store = Arc::new(store.clone());
        let (queue, _) = NotificationQueue::start(client, 8);
        let clock = Arc::new(crate::clock::FixedClock(fixtures::now_in_utc()));

        (
            UserService::new(store.clone(), clock, queue.clone(), store),
            queue,
        )
    }

    fn registration(email: &str) -> NewUserData {
        NewUserData {
            email: email.to_owned(),
            password: "CorrectHorseBatteryStaple".to_owned(),
            nickname: "Tester".to_owned(),
            default_currency: "EUR".to_owned(),
            language: "en".to_owned(),
        }
    }

    #[tokio::test]
    async fn registration_queues_welcome_message() {
        let store = MemoryStore::new();
        let client = Arc::new(RecordingClient::default());
        let (service, _queue) = service(&store, client.clone());

        let user = service
            .register(registration("new@example.com"))
            .await
            .expect("user is registered");
        assert!(!user.email_verified);

        let stored = service.get_user(user.id).await.unwrap();
        assert_eq!(user, stored);

        for _ in 0..100 {
            if !client.sent.lock().unwrap().is_empty() {
                break;
            }
            tokio::task::yield_now().await;
        }
        let sent = client.sent.lock().unwrap();
        assert_eq!(1, sent.len());
        assert_eq!("new@example.com", sent[0].to);
    }

    #[tokio::test]
    async fn duplicate_email_is_rejected() {
        let store = MemoryStore::new();
        let (service, _queue) = service(&store, Arc::new(RecordingClient::default()));

        service.register(registration("dup@example.com")).await.unwrap();
        let error = service
            .register(registration("dup@EXAMPLE.com"))
            .await
            .unwrap_err();

        assert!(matches!(error, UserError::DuplicateEmail));
    }

    #[tokio::test]
    async fn invalid_registration_is_rejected() {
        let store = MemoryStore::new();
        let (service, _queue) = service(&store, Arc::new(RecordingClient::default()));

        let mut data = registration("no-at-sign");
        data.password = "short".to_owned();
        let error = service.register(data).await.unwrap_err();

        match error {
            UserError::InvalidUser(context) => assert_eq!(3, context.into_iter().count()),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn preferences_are_updated_once() {
        let fixture = Fixture::new(TransactionEditScope::All).await;
        let cash = fixture.leaf_account("Cash").await;
        let (service, _queue) = service(&fixture.store, Arc::new(RecordingClient::default()));
        let user_id = fixture.user.id;

        let update = PreferencesUpdate {
            default_account_id: Some(cash.id),
            transaction_edit_scope: Some(TransactionEditScope::TodayOrLater),
            first_day_of_week: Some(Weekday::Mon),
            ..Default::default()
        };
        let updated = service
            .update_preferences(user_id, update.clone())
            .await
            .expect("preferences are updated");

        assert_eq!(Some(cash.id), updated.default_account_id);
        assert_eq!(Weekday::Mon, updated.first_day_of_week);

        let error = service.update_preferences(user_id, update).await.unwrap_err();
        assert!(matches!(error, UserError::NoOp));
    }

    #[tokio::test]
    async fn default_account_must_exist() {
        let fixture = Fixture::new(TransactionEditScope::All).await;
        let (service, _queue) = service(&fixture.store, Arc::new(RecordingClient::default()));

        let update = PreferencesUpdate {
            default_account_id: Some(Uuid::new_v4()),
            ..Default::default()
        };
        let error = service
            .update_preferences(fixture.user.id, update)
            .await
            .unwrap_err();

        assert!(matches!(error, UserError::DefaultAccountNotFound));
    }
}
