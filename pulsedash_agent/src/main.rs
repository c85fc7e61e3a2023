//! pulsedash agent binary: sample this host and stream snapshots over SSE.

use anyhow::Context;
use pulsedash_agent::config::{AgentConfig, CliAction};
use pulsedash_agent::http::router;
use pulsedash_agent::sampler::spawn_sampler;
use pulsedash_agent::sources::SystemSources;
use pulsedash_agent::state::AppState;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cfg = match AgentConfig::load().context("invalid configuration")? {
        CliAction::Help(text) => {
            println!("{text}");
            return Ok(());
        }
        CliAction::Run(cfg) => cfg,
    };
    let addr = cfg.addr();

    let sources = Arc::new(SystemSources::new(&cfg));
    let state = AppState::new(cfg, sources);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;

    let token = CancellationToken::new();
    let sampler = spawn_sampler(state.clone(), token.clone());

    info!("pulsedash agent listening on http://{addr}");
    let shutdown = token.clone();
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
            info!("shutting down");
            shutdown.cancel();
        })
        .await
        .context("server error")?;

    token.cancel();
    if let Err(e) = sampler.await {
        warn!(error = %e, "sampler task ended abnormally");
    }
    Ok(())
}
