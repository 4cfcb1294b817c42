mod accounts;
mod categories;
mod data;
mod hierarchy;
mod statistics;
mod tags;
mod transactions;

#[cfg(test)]
pub(crate) mod fixtures;

pub use accounts::AccountService;
pub use categories::CategoryService;
pub use data::DataService;
pub use hierarchy::HierarchyResolver;
pub use statistics::{StatisticsService, WindowOptions};
pub use tags::TagService;
pub use transactions::{
    TransactionDetail, TransactionFilter, TransactionPage, TransactionService, MAX_PAGE_SIZE,
};
