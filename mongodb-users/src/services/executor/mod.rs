pub mod mock;
pub mod mongo;

use super::commands::Command;
use async_trait::async_trait;
use mongodb::bson::{Bson, Document};
use thiserror::Error;

pub use mock::{Fault, MockExecutor, RecordedCall};
pub use mongo::MongoExecutor;

#[derive(Debug, Error)]
pub enum ExecutorError {
    /// The server ran the command and rejected it.
    #[error("Command failed with {code_name} ({code}): {message}")]
    Command {
        code: i32,
        code_name: String,
        message: String,
    },

    /// The command never completed: network, selection timeout, auth, I/O.
    #[error("Transport error: {0}")]
    Transport(#[source] anyhow::Error),
}

/// One admin command against one database, no retries.
///
/// Implementations hold no state between calls beyond the connection they
/// wrap, and surface failures unchanged.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn execute(&self, database: &str, command: &Command) -> Result<Document, ExecutorError>;
    async fn health_check(&self) -> Result<(), ExecutorError>;
}

/// Whether a raw command reply reports `ok: 1`.
///
/// Servers send `ok` as a double, but older versions and proxies have been
/// seen to send integers or booleans.
pub fn command_succeeded(reply: &Document) -> bool {
    match reply.get("ok") {
        Some(Bson::Double(ok)) => (*ok - 1.0).abs() < f64::EPSILON,
        Some(Bson::Int32(ok)) => *ok == 1,
        Some(Bson::Int64(ok)) => *ok == 1,
        Some(Bson::Boolean(ok)) => *ok,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson::doc;

    #[test]
    fn test_command_succeeded_accepts_numeric_and_bool_ok() {
        assert!(command_succeeded(&doc! { "ok": 1.0 }));
        assert!(command_succeeded(&doc! { "ok": 1 }));
        assert!(command_succeeded(&doc! { "ok": 1_i64 }));
        assert!(command_succeeded(&doc! { "ok": true }));
    }

    #[test]
    fn test_command_succeeded_rejects_failure_and_missing_ok() {
        assert!(!command_succeeded(&doc! { "ok": 0.0, "errmsg": "nope" }));
        assert!(!command_succeeded(&doc! { "ok": 0 }));
        assert!(!command_succeeded(&doc! { "ok": "1" }));
        assert!(!command_succeeded(&doc! {}));
    }
}
