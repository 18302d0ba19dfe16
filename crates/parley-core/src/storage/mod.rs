pub mod schema;
pub mod store;

pub use store::{RunDescription, RunStore, RunSummary, Store, TestDescription, TestSummary};
