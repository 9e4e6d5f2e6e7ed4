pub mod config;
pub mod error;
pub mod event;
pub mod schema;
pub mod traits;
pub mod types;

pub use config::EngineConfig;
pub use error::{Result, SchemaValidationError, SchemaViolation, TaskGraphError};
pub use event::EventBus;
pub use schema::{EdgeDefinition, NodeDefinition, WorkflowSchema};
pub use traits::TaskExecutor;
pub use types::*;
