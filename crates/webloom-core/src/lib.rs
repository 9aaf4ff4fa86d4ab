pub mod config;
pub mod cookie;
pub mod error;
pub mod event;
pub mod records;
pub mod traits;
pub mod types;

pub use config::AppConfig;
pub use error::{Result, ValidationError, WebloomError};
pub use event::EventBus;
pub use types::*;
