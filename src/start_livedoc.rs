//! Startup for the livedoc server binary.

use std::process::ExitCode;

use crate::document::core::config::AppConfig;
use crate::server::{self, AppState};

/// Run the server until Ctrl-C.
///
/// # Returns
/// `ExitCode::SUCCESS` on graceful shutdown, `1` on failure.
#[must_use]
pub fn run() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    tracing::info!("Starting livedoc v{}", env!("CARGO_PKG_VERSION"));

    let config = match AppConfig::load() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Invalid configuration: {e}");
            return ExitCode::from(1);
        }
    };
    tracing::info!(
        db = %config.storage.sqlite_path.display(),
        provider = %config.llm.default_provider,
        model = %config.llm.default_model,
        "configuration loaded"
    );

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!("Failed to create runtime: {e}");
            return ExitCode::from(1);
        }
    };

    rt.block_on(async move {
        let state = match AppState::new(config).await {
            Ok(state) => state,
            Err(e) => {
                tracing::error!("Failed to create state: {e}");
                return ExitCode::from(1);
            }
        };

        if let Err(e) = server::run_server_with_shutdown(state, shutdown_signal()).await {
            tracing::error!("Server error: {e}");
            return ExitCode::from(1);
        }
        tracing::info!("Server stopped");
        ExitCode::SUCCESS
    })
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Cannot listen for Ctrl-C: {e}");
        std::future::pending::<()>().await;
    }
}
