use semval::prelude::*;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Email(String);

impl Email {
    /// Create an unvalidated email.
    ///
    /// This can be useful when constructing an object that contains an email
    /// but has not been validated yet.
    ///
    /// # Arguments
    ///
    /// * `address` - The email's address.
    pub fn unvalidated(address: String) -> Self {
        Self(address)
    }

    pub fn address(&self) -> &str {
        &self.0
    }

    /// The address used to detect duplicates. Only the domain of an address
    /// is case insensitive, and the last `@` separates it from the local part.
    pub fn normalized_address(&self) -> String {
        match self.0.rsplit_once('@') {
            Some((local_part, domain)) => format!("{}@{}", local_part, domain.to_lowercase()),
            None => self.0.clone(),
        }
    }

    fn has_domain(&self) -> bool {
        match self.0.rfind('@') {
            Some(index) => index < self.0.len() - 1,
            None => false,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EmailInvalidity {
    /// The address does not have a domain portion.
    MissingDomain,

    /// The address is missing the `@` symbol separating the local and domain
    /// parts.
    MissingSeparator,
}

impl Validate for Email {
    type Invalidity = EmailInvalidity;

    fn validate(&self) -> ValidationResult<Self::Invalidity> {
        ValidationContext::new()
            .invalidate_if(!self.0.contains('@'), EmailInvalidity::MissingSeparator)
            .invalidate_if(!self.has_domain(), EmailInvalidity::MissingDomain)
            .into()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn invalidities(address: &str) -> Vec<EmailInvalidity> {
        match Email::unvalidated(address.to_owned()).validate() {
            Ok(()) => vec![],
            Err(context) => context.into_iter().collect(),
        }
    }

    #[test]
    fn missing_at_symbol() {
        assert_eq!(
            vec![
                EmailInvalidity::MissingSeparator,
                EmailInvalidity::MissingDomain
            ],
            invalidities("missing-an-at-symbol")
        );
    }

    #[test]
    fn missing_domain() {
        assert_eq!(vec![EmailInvalidity::MissingDomain], invalidities("someone@"));
    }

    #[test]
    fn valid_address() {
        assert!(invalidities("someone@somewhere").is_empty());
    }

    #[test]
    fn normalizes_domain_only() {
        let email = Email::unvalidated("TeSt@ExAmPlE.com".to_owned());

        assert_eq!("TeSt@ExAmPlE.com", email.address());
        assert_eq!("TeSt@example.com", email.normalized_address());
    }
}
