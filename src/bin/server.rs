//! binpatch-server - Main entry point for the update server
//!
//! Serves stored binaries, deltas and signed envelopes over HTTP.

use anyhow::{Context, Result};
use binpatch_lib::engine::{
    api::{create_router, ApiState},
    cli::ServerCli,
    config::{ConfigError, ServerConfig},
    logging,
};
use clap::Parser;
use tracing::{info, warn};

fn load_config(cli: &ServerCli) -> Result<ServerConfig> {
    let mut config = match &cli.config {
        Some(path) => ServerConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => match ServerConfig::load(&std::env::current_dir()?) {
            Ok(config) => config,
            Err(ConfigError::NotFound(_)) => ServerConfig::default(),
            Err(e) => return Err(e).context("Failed to load config from current directory"),
        },
    };

    if let Some(host) = &cli.host {
        config.host = host.clone();
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(base_dir) = &cli.base_dir {
        config.base_dir = base_dir.clone();
    }
    config.validate()?;
    Ok(config)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutting down");
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = ServerCli::parse();
    logging::init(cli.debug);

    let config = load_config(&cli)?;
    let state = ApiState::new(&config);
    if !state.check_dependencies() {
        warn!(
            "Serving with /healthz unavailable until {} exists; restart once it does",
            config.base_dir.display()
        );
    }
    for platform in config.supported_platforms.iter() {
        info!("Supporting {}", platform);
    }

    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Listening on http://{}", addr);

    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;
    Ok(())
}
