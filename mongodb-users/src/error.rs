use crate::models::UserKey;
use crate::services::executor::ExecutorError;
use service_core::error::AppError;
use std::fmt;
use thiserror::Error;

/// Lifecycle operation an error occurred in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Create,
    Read,
    Update,
    Delete,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Create => "create",
            Phase::Read => "read",
            Phase::Update => "update",
            Phase::Delete => "delete",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Rejected before any command was sent.
    #[error("Invalid user spec: {0}")]
    InvalidSpec(String),

    /// The server answered but reported failure, or the reply could not be decoded.
    #[error("{phase} of user {key} rejected by server: {message}")]
    RemoteCommand {
        phase: Phase,
        key: UserKey,
        code: Option<i32>,
        message: String,
    },

    /// The command could not be completed at all.
    #[error("{phase} of user {key} failed in transport: {source}")]
    Transport {
        phase: Phase,
        key: UserKey,
        #[source]
        source: anyhow::Error,
    },

    /// `usersInfo` matched no record. Signals absence, not failure.
    #[error("User {0} not found")]
    NotFound(UserKey),

    #[error("Ambiguous read-back for user {key}: {count} matching records")]
    AmbiguousResult { key: UserKey, count: usize },

    #[error("Malformed import id {0:?}: expected \"<database>.<user>\"")]
    MalformedImportId(String),

    /// The mutating command committed but the follow-up read-back failed.
    /// The user is left as the server has it.
    #[error("{phase} of user {key} committed but read-back failed: {source}")]
    ReadBackFailed {
        phase: Phase,
        key: UserKey,
        #[source]
        source: Box<ReconcileError>,
    },
}

impl ReconcileError {
    pub(crate) fn from_executor(phase: Phase, key: &UserKey, err: ExecutorError) -> Self {
        match err {
            ExecutorError::Command {
                code,
                code_name,
                message,
            } => ReconcileError::RemoteCommand {
                phase,
                key: key.clone(),
                code: Some(code),
                message: format!("{} ({}): {}", code_name, code, message),
            },
            ExecutorError::Transport(source) => ReconcileError::Transport {
                phase,
                key: key.clone(),
                source,
            },
        }
    }

    /// True only for a plain `NotFound`; a read-back that found nothing after
    /// a mutation is a `ReadBackFailed`, not an absence signal.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ReconcileError::NotFound(_))
    }

    pub fn key(&self) -> Option<&UserKey> {
        match self {
            ReconcileError::RemoteCommand { key, .. }
            | ReconcileError::Transport { key, .. }
            | ReconcileError::AmbiguousResult { key, .. }
            | ReconcileError::ReadBackFailed { key, .. }
            | ReconcileError::NotFound(key) => Some(key),
            ReconcileError::InvalidSpec(_) | ReconcileError::MalformedImportId(_) => None,
        }
    }

    /// Metric label for the error kind.
    pub fn label(&self) -> &'static str {
        match self {
            ReconcileError::InvalidSpec(_) => "invalid_spec",
            ReconcileError::RemoteCommand { .. } => "remote_command",
            ReconcileError::Transport { .. } => "transport",
            ReconcileError::NotFound(_) => "not_found",
            ReconcileError::AmbiguousResult { .. } => "ambiguous_result",
            ReconcileError::MalformedImportId(_) => "malformed_import_id",
            ReconcileError::ReadBackFailed { .. } => "read_back_failed",
        }
    }
}

impl From<ReconcileError> for AppError {
    fn from(err: ReconcileError) -> Self {
        match err {
            ReconcileError::InvalidSpec(_) | ReconcileError::MalformedImportId(_) => {
                AppError::BadRequest(anyhow::Error::new(err))
            }
            ReconcileError::NotFound(_) => AppError::NotFound(anyhow::Error::new(err)),
            ReconcileError::RemoteCommand { .. } | ReconcileError::Transport { .. } => {
                AppError::DatabaseError(anyhow::Error::new(err))
            }
            ReconcileError::AmbiguousResult { .. } | ReconcileError::ReadBackFailed { .. } => {
                AppError::InternalError(anyhow::Error::new(err))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> UserKey {
        UserKey::new("alice", "test")
    }

    #[test]
    fn test_command_error_maps_to_remote_command() {
        let err = ReconcileError::from_executor(
            Phase::Update,
            &key(),
            ExecutorError::Command {
                code: 11,
                code_name: "UserNotFound".to_string(),
                message: "Could not find user \"alice\" for db \"test\"".to_string(),
            },
        );

        match err {
            ReconcileError::RemoteCommand {
                phase, code, ref message, ..
            } => {
                assert_eq!(phase, Phase::Update);
                assert_eq!(code, Some(11));
                assert!(message.starts_with("UserNotFound (11)"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_transport_error_keeps_source() {
        let err = ReconcileError::from_executor(
            Phase::Create,
            &key(),
            ExecutorError::Transport(anyhow::anyhow!("connection reset")),
        );
        assert!(matches!(err, ReconcileError::Transport { phase: Phase::Create, .. }));
        assert_eq!(
            err.to_string(),
            "create of user \"alice\" in database \"test\" failed in transport: connection reset"
        );
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_read_back_failure_is_not_an_absence_signal() {
        let err = ReconcileError::ReadBackFailed {
            phase: Phase::Create,
            key: key(),
            source: Box::new(ReconcileError::NotFound(key())),
        };
        assert!(!err.is_not_found());
        assert_eq!(err.key(), Some(&key()));
        assert_eq!(err.label(), "read_back_failed");
    }

    #[test]
    fn test_app_error_mapping() {
        let app: AppError = ReconcileError::NotFound(key()).into();
        assert!(matches!(app, AppError::NotFound(_)));

        let app: AppError = ReconcileError::MalformedImportId("test".to_string()).into();
        assert!(matches!(app, AppError::BadRequest(_)));

        let app: AppError = ReconcileError::AmbiguousResult { key: key(), count: 2 }.into();
        assert!(matches!(app, AppError::InternalError(_)));
    }
}
