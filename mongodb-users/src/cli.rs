use crate::config::{
    ProviderSettings, AUTH_MECHANISM_ENV, AUTH_SOURCE_ENV, HOST_ENV, PASSWORD_ENV, USERNAME_ENV,
};
use crate::models::{UserKey, UserSpec};
use clap::{Args, Parser, Subcommand};
use secrecy::Secret;
use service_core::error::AppError;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "mongodb-users")]
#[command(version)]
#[command(about = "Reconcile declared MongoDB users against a live server", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(flatten)]
    pub connection: ConnectionArgs,

    #[command(subcommand)]
    pub command: Commands,
}

/// Connection flags; each falls back to its `MONGODB_*` variable.
#[derive(Args)]
pub struct ConnectionArgs {
    /// Server address as `host[:port]`
    #[arg(long, global = true, env = HOST_ENV)]
    pub host: Option<String>,

    #[arg(long, global = true, env = USERNAME_ENV)]
    pub username: Option<String>,

    #[arg(long, global = true, env = PASSWORD_ENV, hide_env_values = true)]
    pub password: Option<String>,

    /// e.g. SCRAM-SHA-256
    #[arg(long, global = true, env = AUTH_MECHANISM_ENV)]
    pub auth_mechanism: Option<String>,

    /// Database holding the admin credentials
    #[arg(long, global = true, env = AUTH_SOURCE_ENV)]
    pub auth_source: Option<String>,

    /// Seconds to wait for the initial connection
    #[arg(long, global = true)]
    pub connect_timeout: Option<u64>,
}

impl ConnectionArgs {
    pub fn into_settings(self) -> ProviderSettings {
        ProviderSettings {
            host: self.host,
            username: self.username,
            password: self.password.map(Secret::new),
            auth_mechanism: self.auth_mechanism,
            auth_source: self.auth_source,
            connect_timeout_secs: self.connect_timeout,
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create a user from a declaration file
    Create(SpecArgs),

    /// Show the server's current state of a user
    Read(KeyArgs),

    /// Replace a user's password and roles from a declaration file
    Update(SpecArgs),

    /// Drop a user
    Delete(KeyArgs),

    /// Adopt an existing user by its `<database>.<user>` id
    Import {
        /// Import id, split at the first '.'
        token: String,
    },

    /// Create the user if absent, otherwise re-submit it in full
    Apply(SpecArgs),
}

#[derive(Args)]
pub struct SpecArgs {
    /// JSON file with `user`, `password`, `db` and `roles`
    #[arg(long)]
    pub spec: PathBuf,
}

impl SpecArgs {
    pub fn load(&self) -> Result<UserSpec, AppError> {
        let raw = std::fs::read_to_string(&self.spec).map_err(|e| {
            AppError::BadRequest(anyhow::anyhow!(
                "cannot read {}: {}",
                self.spec.display(),
                e
            ))
        })?;
        Ok(serde_json::from_str(&raw)?)
    }
}

#[derive(Args)]
pub struct KeyArgs {
    #[arg(long)]
    pub user: String,

    #[arg(long)]
    pub database: String,
}

impl From<KeyArgs> for UserKey {
    fn from(args: KeyArgs) -> Self {
        UserKey::new(args.user, args.database)
    }
}
