use anyhow::Result;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use password_hash::SaltString;
use rand_core::OsRng;

use super::Password;

/// An argon2 digest of a password in PHC string format.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Digest(String);

impl Digest {
    /// Digest a password with a fresh random salt.
    pub fn of(password: &Password) -> Result<Self> {
        let salt = SaltString::generate(&mut OsRng);
        let digest = Argon2::default()
            .hash_password(password.as_bytes(), salt.as_ref())?
            .to_string();

        Ok(Self(digest))
    }

    /// Wrap a stored digest, failing if it is not a PHC string.
    pub fn parse(stored: &str) -> Result<Self> {
        PasswordHash::new(stored)?;

        Ok(Self(stored.to_owned()))
    }

    /// Check a password a user typed against the digest.
    ///
    /// # Returns
    ///
    /// `Ok(false)` for a wrong password. Errors are reserved for digests
    /// argon2 cannot process.
    pub fn verify(&self, raw_password: &str) -> Result<bool> {
        let parsed = PasswordHash::new(&self.0)?;

        match Argon2::default().verify_password(raw_password.as_bytes(), &parsed) {
            Ok(()) => Ok(true),
            Err(password_hash::Error::Password) => Ok(false),
            Err(other) => Err(other.into()),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn digest_verifies_only_its_password() {
        let digest = Digest::of(&Password::unvalidated("open sesame".to_owned()))
            .expect("password digests");

        assert!(digest.verify("open sesame").expect("digest is valid"));
        assert!(!digest.verify("open sesame!").expect("digest is valid"));
    }

    #[test]
    fn stored_digest_round_trips() {
        let digest = Digest::of(&Password::unvalidated("open sesame".to_owned()))
            .expect("password digests");

        let parsed = Digest::parse(digest.as_str()).expect("stored digest parses");

        assert_eq!(digest, parsed);
        assert!(parsed.verify("open sesame").expect("digest is valid"));
    }

    #[test]
    fn garbage_is_not_a_digest() {
        assert!(Digest::parse("plaintext").is_err());
    }
}
