pub mod executor;
pub mod graph;
pub mod pool;
pub mod runs;
pub mod tasks;

pub use executor::{ExecutionEngine, PreparedRun, RunOutcome};
pub use graph::{plan, ExecutionOrder, Graph};
pub use pool::{PooledSession, SessionPool, SessionSlot};
pub use runs::{ActiveRun, RunRegistry};
pub use tasks::{validate_trigger, TaskScheduler};
