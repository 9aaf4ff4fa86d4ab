//! Mocks and fixtures shared by the webloom test suites.

pub mod browser;
pub mod fixtures;
pub mod sink;
pub mod transport;

pub use browser::{PageCall, ScriptedPage, ScriptedProvider};
pub use sink::RecordingSink;
pub use transport::MemoryTransport;
