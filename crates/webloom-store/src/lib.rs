pub mod cookies;
pub mod store;
pub mod tasks;
pub mod workflows;

pub use store::SqliteStore;
