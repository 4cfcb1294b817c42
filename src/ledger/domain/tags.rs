use chrono::{DateTime, Utc};
use semval::prelude::*;
use uuid::Uuid;

const MAX_NAME_LENGTH: usize = 64;

#[derive(Clone, Debug, PartialEq)]
pub struct TransactionTag {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub display_order: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TagInvalidity {
    NameRequired,
    NameTooLong(usize),
    DuplicateName,
}

/// The name of a tag, trimmed of surrounding whitespace.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TagName(String);

impl TagName {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl Validate for TagName {
    type Invalidity = TagInvalidity;

    fn validate(&self) -> ValidationResult<Self::Invalidity> {
        let length = self.0.chars().count();

        ValidationContext::new()
            .invalidate_if(length == 0, TagInvalidity::NameRequired)
            .invalidate_if(
                length > MAX_NAME_LENGTH,
                TagInvalidity::NameTooLong(MAX_NAME_LENGTH),
            )
            .into()
    }
}

impl ValidatedFrom<&str> for TagName {
    fn validated_from(from: &str) -> ValidatedResult<Self> {
        let into = Self(from.trim().to_owned());

        match into.validate() {
            Ok(()) => Ok(into),
            Err(context) => Err((into, context)),
        }
    }
}

/// Remove repeated ids while keeping the first occurrence of each.
pub fn dedup_tag_ids(tag_ids: &[Uuid]) -> Vec<Uuid> {
    let mut seen = std::collections::HashSet::new();

    tag_ids
        .iter()
        .filter(|id| seen.insert(**id))
        .copied()
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn name_is_trimmed() {
        let name = TagName::validated_from("  travel ").expect("name is valid");

        assert_eq!("travel", name.as_str());
    }

    #[test]
    fn blank_name_is_rejected() {
        let (_, context) = TagName::validated_from("   ").expect_err("name is blank");

        assert_eq!(
            vec![TagInvalidity::NameRequired],
            context.into_iter().collect::<Vec<_>>()
        );
    }

    #[test]
    fn long_name_is_rejected() {
        let (_, context) = TagName::validated_from("a".repeat(65).as_str()).expect_err("name is long");

        assert_eq!(
            vec![TagInvalidity::NameTooLong(64)],
            context.into_iter().collect::<Vec<_>>()
        );
    }

    #[test]
    fn dedup_keeps_first_occurrence() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        assert_eq!(vec![a, b], dedup_tag_ids(&[a, b, a, b]));
    }
}
