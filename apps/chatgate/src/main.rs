use anyhow::Context;
use clap::Parser;
use tracing::info;

use chatgate_core::Core;

mod cli;

use crate::cli::Cli;

#[tokio::main]
async fn main() {
    init_tracing();
    if let Err(err) = run().await {
        eprintln!("chatgate failed: {err:#}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let config = Cli::parse()
        .into_patch()
        .into_config()
        .context("invalid configuration")?;
    info!(
        host = %config.host,
        port = config.port,
        base_url = %config.base_url,
        default_model = %config.default_model,
        fallback_model = %config.fallback_model.as_deref().unwrap_or(""),
        fallback_enabled = config.fallback_enabled,
        timeout_ms = config.timeout_ms,
        proxy = %config.proxy.as_deref().unwrap_or(""),
        "config loaded"
    );

    let bind = format!("{}:{}", config.host, config.port);
    let core = Core::from_config(config).context("failed to build upstream client")?;
    let app = core.router();

    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    info!(addr = %bind, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;
    info!("shutdown complete");
    Ok(())
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new("chatgate=info,chatgate_core=info")
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        // Without a signal handler, run until the listener fails.
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
