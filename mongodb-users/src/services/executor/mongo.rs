use super::{CommandExecutor, ExecutorError};
use crate::config::ProviderConfig;
use crate::services::commands::Command;
use crate::services::metrics::record_command;
use async_trait::async_trait;
use mongodb::{
    bson::{doc, Document},
    error::{Error as MongoError, ErrorKind},
    Client as MongoClient,
};
use service_core::error::AppError;

/// Executor backed by a live `mongodb::Client`.
///
/// The client is owned by the caller's configuration layer; cloning the
/// executor shares it.
#[derive(Clone)]
pub struct MongoExecutor {
    client: MongoClient,
}

impl MongoExecutor {
    pub fn new(client: MongoClient) -> Self {
        Self { client }
    }

    /// Build a client from `config` and verify it with a `ping`.
    pub async fn connect(config: &ProviderConfig) -> Result<Self, AppError> {
        tracing::info!(host = %config.host, username = %config.username, "Connecting to MongoDB");

        let options = config.client_options().await?;
        let client = MongoClient::with_options(options).map_err(|e| {
            tracing::error!("Failed to build MongoDB client for {}: {}", config.host, e);
            AppError::from(e)
        })?;

        let executor = Self::new(client);
        executor.health_check().await.map_err(|e| {
            tracing::error!("MongoDB at {} is not reachable: {}", config.host, e);
            AppError::DatabaseError(anyhow::Error::new(e))
        })?;

        tracing::info!(host = %config.host, "Successfully connected to MongoDB");
        Ok(executor)
    }
}

#[async_trait]
impl CommandExecutor for MongoExecutor {
    async fn execute(&self, database: &str, command: &Command) -> Result<Document, ExecutorError> {
        tracing::debug!(
            database = %database,
            command = command.name(),
            body = %command.redacted(),
            "Running admin command"
        );

        match self
            .client
            .database(database)
            .run_command(command.document().clone(), None)
            .await
        {
            Ok(reply) => {
                record_command(command.name(), "ok");
                Ok(reply)
            }
            Err(e) => {
                let err = classify(e);
                record_command(
                    command.name(),
                    match err {
                        ExecutorError::Command { .. } => "rejected",
                        ExecutorError::Transport(_) => "transport_error",
                    },
                );
                tracing::warn!(
                    database = %database,
                    command = command.name(),
                    error = %err,
                    "Admin command failed"
                );
                Err(err)
            }
        }
    }

    async fn health_check(&self) -> Result<(), ExecutorError> {
        self.client
            .database("admin")
            .run_command(doc! { "ping": 1 }, None)
            .await
            .map_err(classify)?;
        Ok(())
    }
}

/// Server-side rejections keep their code; everything else is transport.
fn classify(err: MongoError) -> ExecutorError {
    if let ErrorKind::Command(command_error) = err.kind.as_ref() {
        return ExecutorError::Command {
            code: command_error.code,
            code_name: command_error.code_name.clone(),
            message: command_error.message.clone(),
        };
    }
    ExecutorError::Transport(anyhow::Error::new(err))
}
