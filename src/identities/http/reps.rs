use std::convert::TryFrom;

use semval::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    identities::{
        domain::{
            email::EmailInvalidity,
            users::{
                weekday_code, weekday_from_code, NewUserData, NewUserInvalidity,
                PreferencesInvalidity, PreferencesUpdate, User,
            },
        },
        services::UserError,
    },
    ledger::domain::edit_window::TransactionEditScope,
    passwords::PasswordInvalidity,
};

#[derive(Deserialize)]
pub struct NewUserRequest {
    email: String,
    password: String,
    #[serde(default)]
    nickname: String,
    default_currency: String,
    #[serde(default = "default_language")]
    language: String,
}

fn default_language() -> String {
    "en".to_owned()
}

impl From<NewUserRequest> for NewUserData {
    fn from(rep: NewUserRequest) -> Self {
        Self {
            email: rep.email,
            password: rep.password,
            nickname: rep.nickname,
            default_currency: rep.default_currency,
            language: rep.language,
        }
    }
}

#[derive(Serialize)]
pub struct UserResponse {
    pub id: Uuid,
    pub email: String,
    pub nickname: String,
    pub default_currency: String,
    pub default_account_id: Option<Uuid>,
    pub transaction_edit_scope: i16,
    pub first_day_of_week: i16,
    pub language: String,
    pub email_verified: bool,
}

impl From<&User> for UserResponse {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            email: user.email.clone(),
            nickname: user.nickname.clone(),
            default_currency: user.default_currency.clone(),
            default_account_id: user.default_account_id,
            transaction_edit_scope: user.transaction_edit_scope.code(),
            first_day_of_week: weekday_code(user.first_day_of_week),
            language: user.language.clone(),
            email_verified: user.email_verified,
        }
    }
}

#[derive(Default, Deserialize)]
pub struct PreferencesRequest {
    nickname: Option<String>,
    default_currency: Option<String>,
    default_account_id: Option<Uuid>,
    transaction_edit_scope: Option<i16>,
    first_day_of_week: Option<i16>,
    language: Option<String>,
}

impl TryFrom<PreferencesRequest> for PreferencesUpdate {
    type Error = UserError;

    fn try_from(rep: PreferencesRequest) -> Result<Self, Self::Error> {
        let transaction_edit_scope = rep
            .transaction_edit_scope
            .map(TransactionEditScope::try_from)
            .transpose();
        let first_day_of_week = rep
            .first_day_of_week
            .map(|code| weekday_from_code(code).ok_or(code))
            .transpose();

        let context = ValidationContext::new()
            .invalidate_if(
                transaction_edit_scope.is_err(),
                PreferencesInvalidity::UnknownEditScope,
            )
            .invalidate_if(first_day_of_week.is_err(), PreferencesInvalidity::UnknownWeekday);
        let result: ValidationResult<PreferencesInvalidity> = context.into();
        result.map_err(UserError::InvalidPreferences)?;

        Ok(Self {
            nickname: rep.nickname,
            default_currency: rep.default_currency,
            default_account_id: rep.default_account_id,
            transaction_edit_scope: transaction_edit_scope.ok().flatten(),
            first_day_of_week: first_day_of_week.ok().flatten(),
            language: rep.language,
        })
    }
}

pub fn describe_new_user(invalidity: NewUserInvalidity) -> String {
    match invalidity {
        NewUserInvalidity::Email(EmailInvalidity::MissingDomain) => {
            "Email is missing a domain.".to_owned()
        }
        NewUserInvalidity::Email(EmailInvalidity::MissingSeparator) => {
            "Email is missing an '@' symbol.".to_owned()
        }
        NewUserInvalidity::Password(PasswordInvalidity::MaxLength(max)) => format!(
            "Passwords may not contain more than {} characters.",
            max
        ),
        NewUserInvalidity::Password(PasswordInvalidity::MinLength(min)) => {
            format!("Passwords must contain at least {} characters.", min)
        }
        NewUserInvalidity::Password(PasswordInvalidity::Blank) => {
            "Passwords may not consist of whitespace only.".to_owned()
        }
        NewUserInvalidity::Preferences(invalidity) => describe_preferences(invalidity),
    }
}

pub fn describe_preferences(invalidity: PreferencesInvalidity) -> String {
    match invalidity {
        PreferencesInvalidity::NicknameTooLong(max) => {
            format!("Nicknames may not contain more than {} characters.", max)
        }
        PreferencesInvalidity::InvalidCurrency => "The currency is not a valid code.".to_owned(),
        PreferencesInvalidity::InvalidLanguage => "The language is not valid.".to_owned(),
        PreferencesInvalidity::UnknownEditScope => "Unknown transaction edit scope.".to_owned(),
        PreferencesInvalidity::UnknownWeekday => {
            "The first day of the week must be between 0 (Sunday) and 6 (Saturday).".to_owned()
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn unknown_codes_are_collected() {
        let request = PreferencesRequest {
            transaction_edit_scope: Some(42),
            first_day_of_week: Some(7),
            ..Default::default()
        };

        let error = PreferencesUpdate::try_from(request).expect_err("codes are unknown");

        match error {
            UserError::InvalidPreferences(context) => assert_eq!(
                vec![
                    PreferencesInvalidity::UnknownEditScope,
                    PreferencesInvalidity::UnknownWeekday
                ],
                context.into_iter().collect::<Vec<_>>()
            ),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn codes_are_decoded() {
        let request = PreferencesRequest {
            transaction_edit_scope: Some(2),
            first_day_of_week: Some(1),
            ..Default::default()
        };

        let update = PreferencesUpdate::try_from(request).expect("codes are known");

        assert_eq!(
            Some(TransactionEditScope::TodayOrLater),
            update.transaction_edit_scope
        );
        assert_eq!(Some(chrono::Weekday::Mon), update.first_day_of_week);
    }
}
