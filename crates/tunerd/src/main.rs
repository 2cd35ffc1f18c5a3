mod gateway;

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;
use tunerd_core::{OrchestratorBuilder, Settings};

use crate::gateway::AppState;

const DEFAULT_FILTER: &str = "tunerd=debug,tunerd_core=debug,tower_http=info,axum=info";

/// Tuning-run orchestrator with live log streaming.
#[derive(Debug, Parser)]
#[command(name = "tunerd", version)]
struct Cli {
    /// YAML settings file (defaults apply when omitted)
    #[arg(long, env = "TUNERD_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address, e.g. 127.0.0.1:3001
    #[arg(long, env = "TUNERD_BIND")]
    bind: Option<String>,

    /// Directory the launcher script, template and storage paths are relative to
    #[arg(long, env = "TUNERD_PROJECT_ROOT")]
    project_root: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER)),
        )
        .init();

    let cli = Cli::parse();
    let mut settings = Settings::load(cli.config.as_deref())
        .await
        .context("loading settings")?;
    if let Some(bind) = cli.bind {
        settings.bind = bind;
    }
    if let Some(root) = cli.project_root {
        settings.project_root = root;
    }

    let orchestrator = OrchestratorBuilder::new(settings)
        .build()
        .await
        .context("starting orchestrator")?;
    let bind = orchestrator.settings.bind.clone();
    let app = gateway::build_router(AppState::new(orchestrator));

    let listener = TcpListener::bind(&bind)
        .await
        .with_context(|| format!("binding {bind}"))?;
    info!(addr = %listener.local_addr()?, "tunerd listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    // 監視中の実行は切り離されているので動き続ける
    info!("tunerd stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "could not listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}
