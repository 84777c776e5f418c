//! Lifecycle orchestration for declared users.
//!
//! Each operation is one sequential unit of work: at most one mutating
//! command followed by one `usersInfo` read-back, each awaited before the
//! next is sent. Nothing is retried and nothing is rolled back; a user that
//! was created but could not be read back is left on the server and reported
//! as [`ReconcileError::ReadBackFailed`].

use super::commands::{build_create, build_drop, build_update, validate, Command};
use super::executor::{command_succeeded, CommandExecutor};
use super::metrics::record_operation;
use super::resolver::resolve;
use crate::error::{Phase, ReconcileError};
use crate::models::{Drift, ImportKey, ReconciledUser, UserKey, UserSpec};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::instrument;

/// Result of [`Reconciler::apply`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum ApplyOutcome {
    Created { user: ReconciledUser },
    /// `drift` is what the server had before the update; empty when only
    /// the password was re-submitted.
    Updated { user: ReconciledUser, drift: Drift },
}

impl ApplyOutcome {
    pub fn user(&self) -> &ReconciledUser {
        match self {
            ApplyOutcome::Created { user } | ApplyOutcome::Updated { user, .. } => user,
        }
    }
}

#[derive(Clone)]
pub struct Reconciler {
    executor: Arc<dyn CommandExecutor>,
}

impl Reconciler {
    pub fn new(executor: Arc<dyn CommandExecutor>) -> Self {
        Self { executor }
    }

    #[instrument(skip(self, spec), fields(user = %spec.user, database = %spec.database))]
    pub async fn create(&self, spec: &UserSpec) -> Result<ReconciledUser, ReconcileError> {
        let start = Instant::now();
        let result = self.mutate_and_resolve(Phase::Create, spec, build_create).await;
        record_outcome("create", &result, start);
        result
    }

    /// Refresh state from the server.
    ///
    /// [`ReconcileError::NotFound`] means the user no longer exists upstream
    /// and should be planned for re-creation, not treated as a failure.
    #[instrument(skip(self, key), fields(user = %key.user, database = %key.database))]
    pub async fn read(&self, key: &UserKey) -> Result<ReconciledUser, ReconcileError> {
        let start = Instant::now();
        let result = resolve(self.executor.as_ref(), key).await;
        match &result {
            Err(e) if e.is_not_found() => {
                tracing::info!("User absent upstream; treating as drift");
            }
            Err(e) => tracing::error!(error = %e, "Read failed"),
            Ok(_) => {}
        }
        record_outcome("read", &result, start);
        result
    }

    /// Full replace of password and roles; no diff against the old role set
    /// is computed.
    #[instrument(skip(self, spec), fields(user = %spec.user, database = %spec.database))]
    pub async fn update(&self, spec: &UserSpec) -> Result<ReconciledUser, ReconcileError> {
        let start = Instant::now();
        let result = self.mutate_and_resolve(Phase::Update, spec, build_update).await;
        record_outcome("update", &result, start);
        result
    }

    /// Drop the user. A user that is already gone surfaces as whatever error
    /// the server returns for it.
    #[instrument(skip(self, key), fields(user = %key.user, database = %key.database))]
    pub async fn delete(&self, key: &UserKey) -> Result<(), ReconcileError> {
        let start = Instant::now();
        let result = self.run(Phase::Delete, key, &build_drop(&key.user)).await;
        match &result {
            Ok(()) => tracing::info!("User dropped"),
            Err(e) => tracing::error!(error = %e, "Delete failed"),
        }
        record_outcome("delete", &result, start);
        result
    }

    /// Parse an import token of the form `"<database>.<user>"`.
    pub fn import(token: &str) -> Result<ImportKey, ReconcileError> {
        token.parse()
    }

    /// Import followed by Read. The password is not recoverable and stays
    /// unknown until the next declared update.
    #[instrument(skip(self))]
    pub async fn import_state(&self, token: &str) -> Result<ReconciledUser, ReconcileError> {
        let key: UserKey = Self::import(token)?.into();
        self.read(&key).await
    }

    /// Converge the server on `spec`: create when absent, otherwise update.
    ///
    /// The password cannot be read back, so an existing user is always
    /// re-submitted in full; role drift is only reported.
    #[instrument(skip(self, spec), fields(user = %spec.user, database = %spec.database))]
    pub async fn apply(&self, spec: &UserSpec) -> Result<ApplyOutcome, ReconcileError> {
        validate(spec)?;

        match self.read(&spec.key()).await {
            Err(e) if e.is_not_found() => {
                let user = self.create(spec).await?;
                Ok(ApplyOutcome::Created { user })
            }
            Err(e) => Err(e),
            Ok(current) => {
                let drift = current.drift_from(spec).unwrap_or_default();
                if !drift.is_empty() {
                    tracing::info!(%drift, "Role drift detected");
                }
                let user = self.update(spec).await?;
                Ok(ApplyOutcome::Updated { user, drift })
            }
        }
    }

    async fn mutate_and_resolve(
        &self,
        phase: Phase,
        spec: &UserSpec,
        build: fn(&UserSpec) -> Result<Command, ReconcileError>,
    ) -> Result<ReconciledUser, ReconcileError> {
        let command = build(spec)?;
        let key = spec.key();

        self.run(phase, &key, &command).await?;
        tracing::info!(command = command.name(), "Command committed; reading back identity");

        match resolve(self.executor.as_ref(), &key).await {
            Ok(user) => {
                tracing::info!(id = %user.id, roles = user.roles.len(), "User reconciled");
                Ok(user)
            }
            Err(source) => {
                tracing::error!(
                    error = %source,
                    "Read-back failed after committed {}; user left as-is on server",
                    phase
                );
                Err(ReconcileError::ReadBackFailed {
                    phase,
                    key,
                    source: Box::new(source),
                })
            }
        }
    }

    /// Execute one mutating command and require `ok: 1`.
    async fn run(
        &self,
        phase: Phase,
        key: &UserKey,
        command: &Command,
    ) -> Result<(), ReconcileError> {
        let reply = self
            .executor
            .execute(&key.database, command)
            .await
            .map_err(|e| ReconcileError::from_executor(phase, key, e))?;

        if !command_succeeded(&reply) {
            return Err(ReconcileError::RemoteCommand {
                phase,
                key: key.clone(),
                code: reply.get_i32("code").ok(),
                message: format!(
                    "{} did not report ok: 1 ({})",
                    command.name(),
                    reply.get_str("errmsg").unwrap_or("no errmsg")
                ),
            });
        }
        Ok(())
    }
}

fn record_outcome<T>(operation: &'static str, result: &Result<T, ReconcileError>, start: Instant) {
    let outcome = match result {
        Ok(_) => "success",
        Err(e) => e.label(),
    };
    record_operation(operation, outcome, start.elapsed());
}
