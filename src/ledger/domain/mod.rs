pub mod accounts;
pub mod categories;
pub mod edit_window;
pub mod statistics;
pub mod tags;
pub mod transaction_time;
pub mod transactions;
