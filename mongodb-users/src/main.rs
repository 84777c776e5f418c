use clap::Parser;
use mongodb_users::cli::{Cli, Commands};
use mongodb_users::config::ProviderConfig;
use mongodb_users::models::UserKey;
use mongodb_users::services::{MongoExecutor, Reconciler};
use serde::Serialize;
use serde_json::json;
use service_core::config::Config;
use service_core::error::AppError;
use service_core::observability::{init_tracing, shutdown_tracing};
use std::sync::Arc;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(e.exit_code());
        }
    };
    init_tracing(
        "mongodb-users",
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    );

    let code = match run(cli).await {
        Ok(()) => 0,
        Err(e) => {
            tracing::error!(error = %e, exit_code = e.exit_code(), "Command failed");
            eprintln!("{}", e);
            e.exit_code()
        }
    };

    shutdown_tracing();
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<(), AppError> {
    let provider = ProviderConfig::resolve(cli.connection.into_settings())?;
    let executor = MongoExecutor::connect(&provider).await?;
    let reconciler = Reconciler::new(Arc::new(executor));

    match cli.command {
        Commands::Create(args) => {
            let spec = args.load()?;
            print_json(&reconciler.create(&spec).await?)
        }
        Commands::Read(args) => {
            let key: UserKey = args.into();
            print_json(&reconciler.read(&key).await?)
        }
        Commands::Update(args) => {
            let spec = args.load()?;
            print_json(&reconciler.update(&spec).await?)
        }
        Commands::Delete(args) => {
            let key: UserKey = args.into();
            reconciler.delete(&key).await?;
            print_json(&json!({ "deleted": { "user": key.user, "db": key.database } }))
        }
        Commands::Import { token } => print_json(&reconciler.import_state(&token).await?),
        Commands::Apply(args) => {
            let spec = args.load()?;
            print_json(&reconciler.apply(&spec).await?)
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), AppError> {
    let out = serde_json::to_string_pretty(value)
        .map_err(|e| AppError::InternalError(anyhow::Error::new(e)))?;
    println!("{}", out);
    Ok(())
}
