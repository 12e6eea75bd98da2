//! Repokit connectivity check.
//!
//! Loads configuration, builds the configured persistence provider, and
//! verifies that a unit of work can be opened against it.

use tracing_subscriber::{EnvFilter, fmt};

use repokit_core::config::AppConfig;
use repokit_core::error::AppError;
use repokit_database::RepositoryServices;

#[tokio::main]
async fn main() {
    let env = std::env::var("REPOKIT_ENV").unwrap_or_else(|_| "development".to_string());
    let config = match AppConfig::load(&env) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    init_logging(&config);
    tracing::info!(env = %env, "Loaded configuration");

    if let Err(e) = run(&config).await {
        tracing::error!(error = %e, "Repository check failed");
        std::process::exit(1);
    }
}

/// Initialize the tracing subscriber. `RUST_LOG` overrides the configured
/// level.
fn init_logging(config: &AppConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format.as_str() {
        "json" => {
            fmt()
                .json()
                .with_env_filter(filter)
                .with_target(true)
                .with_thread_ids(true)
                .init();
        }
        _ => {
            fmt().pretty().with_env_filter(filter).with_target(true).init();
        }
    }
}

async fn run(config: &AppConfig) -> Result<(), AppError> {
    tracing::info!(
        provider = %config.repository.provider,
        default_tracking = config.repository.default_tracking,
        "Starting Repokit v{}",
        env!("CARGO_PKG_VERSION")
    );

    let services = RepositoryServices::from_config(config).await?;
    services.health_check().await?;

    let scope = services.scope();
    let affected = scope.commit().await?;
    tracing::info!(affected, "Persistence provider is reachable");
    Ok(())
}
