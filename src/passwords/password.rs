use std::fmt;

use semval::prelude::*;

const MIN_PASSWORD_CHARS: usize = 8;
const MAX_PASSWORD_CHARS: usize = 128;

/// A password as typed by a user. Never printed.
pub struct Password(String);

impl Password {
    /// Wrap a password without checking it, so that it can be validated as
    /// part of a larger object.
    pub fn unvalidated(password: String) -> Self {
        Self(password)
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PasswordInvalidity {
    /// Longer than the contained number of characters.
    MaxLength(usize),
    /// Shorter than the contained number of characters.
    MinLength(usize),
    Blank,
}

impl Validate for Password {
    type Invalidity = PasswordInvalidity;

    fn validate(&self) -> ValidationResult<Self::Invalidity> {
        let length = self.0.chars().count();

        ValidationContext::new()
            .invalidate_if(
                length < MIN_PASSWORD_CHARS,
                PasswordInvalidity::MinLength(MIN_PASSWORD_CHARS),
            )
            .invalidate_if(
                length > MAX_PASSWORD_CHARS,
                PasswordInvalidity::MaxLength(MAX_PASSWORD_CHARS),
            )
            .invalidate_if(
                length >= MIN_PASSWORD_CHARS && self.0.trim().is_empty(),
                PasswordInvalidity::Blank,
            )
            .into()
    }
}

impl fmt::Debug for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Password(********)")
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn invalidities(raw: &str) -> Vec<PasswordInvalidity> {
        match Password::unvalidated(raw.to_owned()).validate() {
            Ok(()) => vec![],
            Err(context) => context.into_iter().collect(),
        }
    }

    #[test]
    fn debug_hides_value() {
        let password = Password::unvalidated("swordfish-123".to_owned());

        assert!(!format!("{:?}", password).contains("swordfish"));
    }

    #[test]
    fn length_counts_characters() {
        assert!(invalidities("pässwörd").is_empty());
        assert_eq!(vec![PasswordInvalidity::MinLength(8)], invalidities("äöü"));
        assert_eq!(
            vec![PasswordInvalidity::MaxLength(128)],
            invalidities(&"x".repeat(129))
        );
    }

    #[test]
    fn whitespace_only_is_blank() {
        assert_eq!(vec![PasswordInvalidity::Blank], invalidities("          "));
    }
}
