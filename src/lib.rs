pub mod authentication;
pub mod cli;
pub mod client_ip;
pub mod clock;
pub mod database;
pub mod http_err;
pub mod identities;
pub mod ledger;
pub mod notifications;
pub mod passwords;
pub mod repos;
pub mod server;
