//! Runtime layer: the engine, node executor, step events, and the
//! checkpoint persistence stack.

pub mod checkpointer;
#[cfg(feature = "sqlite")]
pub mod checkpointer_sqlite;
pub mod engine;
pub mod events;
pub mod executor;
pub mod persistence;

pub use checkpointer::{
    Checkpoint, Checkpointer, CheckpointerError, DEFAULT_CHECKPOINT_TTL, InMemoryCheckpointer,
};
#[cfg(feature = "sqlite")]
pub use checkpointer_sqlite::SqliteCheckpointer;
pub use engine::{EngineError, WorkflowEngine, WorkflowEngineBuilder};
pub use events::{EventEmitter, ExecutionStream, StepEvent};
pub use executor::NodeExecutor;
pub use persistence::{PersistedCheckpoint, PersistenceError};
