use anyhow::Result;
use chrono::{DateTime, Utc, Weekday};
use semval::prelude::*;
use uuid::Uuid;

use crate::{
    ledger::domain::edit_window::{EditPolicy, TransactionEditScope},
    passwords::{self, Password, PasswordInvalidity},
};

use super::email::{Email, EmailInvalidity};

const MAX_NICKNAME_LENGTH: usize = 64;
const MAX_LANGUAGE_LENGTH: usize = 10;

#[derive(Clone, Debug, PartialEq)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub nickname: String,
    pub password_hash: String,
    pub default_currency: String,
    pub default_account_id: Option<Uuid>,
    pub transaction_edit_scope: TransactionEditScope,
    pub first_day_of_week: Weekday,
    pub language: String,
    pub disabled: bool,
    pub email_verified: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn edit_policy(&self) -> EditPolicy {
        EditPolicy {
            scope: self.transaction_edit_scope,
            first_day_of_week: self.first_day_of_week,
        }
    }

    pub fn matches_password(&self, raw_password: &str) -> Result<bool> {
        passwords::Digest::parse(&self.password_hash)?.verify(raw_password)
    }

    /// Apply a preferences update.
    ///
    /// # Returns
    ///
    /// The updated user, or [`None`] if the update would not change anything.
    pub fn with_preferences(&self, update: &PreferencesUpdate, now: DateTime<Utc>) -> Option<User> {
        let updated = User {
            nickname: update.nickname.clone().unwrap_or_else(|| self.nickname.clone()),
            default_currency: update
                .default_currency
                .clone()
                .unwrap_or_else(|| self.default_currency.clone()),
            default_account_id: update.default_account_id.or(self.default_account_id),
            transaction_edit_scope: update
                .transaction_edit_scope
                .unwrap_or(self.transaction_edit_scope),
            first_day_of_week: update.first_day_of_week.unwrap_or(self.first_day_of_week),
            language: update.language.clone().unwrap_or_else(|| self.language.clone()),
            updated_at: self.updated_at,
            ..self.clone()
        };

        if updated == *self {
            None
        } else {
            Some(User {
                updated_at: now,
                ..updated
            })
        }
    }
}

/// Weekdays are stored counting from Sunday.
pub fn weekday_code(day: Weekday) -> i16 {
    day.num_days_from_sunday() as i16
}

pub fn weekday_from_code(code: i16) -> Option<Weekday> {
    match code {
        0 => Some(Weekday::Sun),
        1 => Some(Weekday::Mon),
        2 => Some(Weekday::Tue),
        3 => Some(Weekday::Wed),
        4 => Some(Weekday::Thu),
        5 => Some(Weekday::Fri),
        6 => Some(Weekday::Sat),
        _ => None,
    }
}

#[derive(Debug)]
pub struct NewUser {
    id: Uuid,
    email: Email,
    password: Password,
    nickname: String,
    default_currency: String,
    language: String,
}

impl NewUser {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn email(&self) -> &Email {
        &self.email
    }

    /// Hash the password and build the user record to persist.
    pub fn into_user(self, now: DateTime<Utc>) -> Result<User> {
        let password_hash = passwords::Digest::of(&self.password)?;

        Ok(User {
            id: self.id,
            email: self.email.address().to_owned(),
            nickname: self.nickname,
            password_hash: password_hash.as_str().to_owned(),
            default_currency: self.default_currency,
            default_account_id: None,
            transaction_edit_scope: TransactionEditScope::default(),
            first_day_of_week: Weekday::Sun,
            language: self.language,
            disabled: false,
            email_verified: false,
            created_at: now,
            updated_at: now,
        })
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum NewUserInvalidity {
    Email(EmailInvalidity),
    Password(PasswordInvalidity),
    Preferences(PreferencesInvalidity),
}

impl Validate for NewUser {
    type Invalidity = NewUserInvalidity;

    fn validate(&self) -> ValidationResult<Self::Invalidity> {
        let preferences = PreferencesUpdate {
            nickname: Some(self.nickname.clone()),
            default_currency: Some(self.default_currency.clone()),
            language: Some(self.language.clone()),
            ..Default::default()
        };

        ValidationContext::new()
            .validate_with(&self.email, NewUserInvalidity::Email)
            .validate_with(&self.password, NewUserInvalidity::Password)
            .validate_with(&preferences, NewUserInvalidity::Preferences)
            .into()
    }
}

#[derive(Clone, Debug)]
pub struct NewUserData {
    pub email: String,
    pub password: String,
    pub nickname: String,
    pub default_currency: String,
    pub language: String,
}

impl ValidatedFrom<NewUserData> for NewUser {
    fn validated_from(from: NewUserData) -> ValidatedResult<Self> {
        let into = NewUser {
            id: Uuid::new_v4(),
            email: Email::unvalidated(from.email.trim().to_owned()),
            password: Password::unvalidated(from.password),
            nickname: from.nickname.trim().to_owned(),
            default_currency: from.default_currency,
            language: from.language,
        };

        match into.validate() {
            Ok(()) => Ok(into),
            Err(context) => Err((into, context)),
        }
    }
}

/// A partial update of a user's preferences. Fields left as [`None`] keep
/// their current value.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PreferencesUpdate {
    pub nickname: Option<String>,
    pub default_currency: Option<String>,
    pub default_account_id: Option<Uuid>,
    pub transaction_edit_scope: Option<TransactionEditScope>,
    pub first_day_of_week: Option<Weekday>,
    pub language: Option<String>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PreferencesInvalidity {
    NicknameTooLong(usize),
    InvalidCurrency,
    InvalidLanguage,
    UnknownEditScope,
    UnknownWeekday,
}

impl Validate for PreferencesUpdate {
    type Invalidity = PreferencesInvalidity;

    fn validate(&self) -> ValidationResult<Self::Invalidity> {
        let nickname_too_long = self
            .nickname
            .as_ref()
            .map_or(false, |n| n.chars().count() > MAX_NICKNAME_LENGTH);
        let invalid_currency = self
            .default_currency
            .as_ref()
            .map_or(false, |c| c.len() != 3 || !c.chars().all(|ch| ch.is_ascii_uppercase()));
        let invalid_language = self
            .language
            .as_ref()
            .map_or(false, |l| l.is_empty() || l.len() > MAX_LANGUAGE_LENGTH);

        ValidationContext::new()
            .invalidate_if(
                nickname_too_long,
                PreferencesInvalidity::NicknameTooLong(MAX_NICKNAME_LENGTH),
            )
            .invalidate_if(invalid_currency, PreferencesInvalidity::InvalidCurrency)
            .invalidate_if(invalid_language, PreferencesInvalidity::InvalidLanguage)
            .into()
    }
}
