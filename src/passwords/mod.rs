//! User passwords and the argon2 digests they are stored as.
mod digest;
mod password;

pub use digest::Digest;
pub use password::{Password, PasswordInvalidity};
