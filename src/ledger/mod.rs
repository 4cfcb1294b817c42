//! Accounts, categories, tags and the transactions booked against them.
pub mod domain;
pub mod errors;
pub mod http;
pub mod services;
