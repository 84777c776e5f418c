pub mod commands;
pub mod executor;
pub mod metrics;
pub mod reconciler;
pub mod resolver;

pub use commands::{Command, CommandKind};
pub use executor::{
    CommandExecutor, ExecutorError, Fault, MockExecutor, MongoExecutor, RecordedCall,
};
pub use reconciler::{ApplyOutcome, Reconciler};
pub use resolver::resolve;
