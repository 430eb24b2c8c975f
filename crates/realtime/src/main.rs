//! Main application entry point for the realtime server.
//!
//! Parses the command line, loads the TOML configuration, installs the
//! tracing subscriber and runs the server until SIGINT or SIGTERM, saving
//! the store before exiting.

mod cli;
mod config;
mod signals;

use anyhow::anyhow;
use cli::CliArgs;
use config::{AppConfig, LoggingSettings};
use realtime_server::RealtimeServer;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize logging system.
///
/// `RUST_LOG` takes precedence over the configured level.
fn setup_logging(config: &LoggingSettings) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let registry = tracing_subscriber::registry().with(filter);

    if config.json_format {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_file(false)
                    .with_line_number(false)
                    .with_thread_ids(true),
            )
            .try_init()?;
    } else {
        registry
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_file(false)
                    .with_line_number(false)
                    .with_thread_ids(true),
            )
            .try_init()?;
    }

    info!("🔧 Logging initialized with level: {}", config.level);
    Ok(())
}

async fn run(args: CliArgs) -> anyhow::Result<()> {
    let (mut config, created) = AppConfig::load_from_file(&args.config_path).await?;
    let env_port = std::env::var("PORT").ok();
    config.apply_overrides(&args, env_port.as_deref());
    config
        .validate()
        .map_err(|e| anyhow!("Configuration validation failed: {e}"))?;

    setup_logging(&config.logging)?;
    if created {
        info!("Created default configuration file: {}", args.config_path.display());
    }

    info!("🌟 RealTime server v{}", env!("CARGO_PKG_VERSION"));
    info!("📋 Configuration: {}", args.config_path.display());
    info!("  👥 Max connections: {}", config.server.max_connections);
    info!("  ⏱️ Connection timeout: {}s", config.server.connection_timeout);
    info!(
        "  📨 Outbound queue: {} messages ({:?} on overflow)",
        config.websocket.outbound_queue_capacity, config.websocket.overflow_policy
    );

    let server = Arc::new(RealtimeServer::new(config.to_server_config()?).await?);
    let listener = server.bind()?;

    let mut serve_task = {
        let server = server.clone();
        tokio::spawn(async move { server.serve(listener).await })
    };

    info!("🛑 Press Ctrl+C to gracefully shutdown");

    tokio::select! {
        result = &mut serve_task => {
            // The accept loop only returns on its own after a fatal error.
            return match result {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(e.into()),
                Err(e) => Err(anyhow!("Server task failed: {e}")),
            };
        }
        signal = signals::wait_for_shutdown_signal() => signal?,
    }

    info!("🛑 Shutdown signal received, initiating graceful shutdown...");
    let saved = server.shutdown().await;
    if let Err(e) = serve_task.await {
        error!("Server task failed during shutdown: {}", e);
    }
    saved?;

    info!("👋 RealTime server stopped");
    Ok(())
}

#[tokio::main(flavor = "multi_thread")]
async fn main() {
    let args = CliArgs::parse();

    if let Err(e) = run(args).await {
        error!("❌ Application error: {:?}", e);
        eprintln!("❌ Failed to run server: {e:#}");
        std::process::exit(1);
    }
}
