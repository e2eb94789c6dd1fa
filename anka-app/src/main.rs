mod routes;
mod settings;

use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anka_core::{AssistantController, Collaborators, EventBus};
use anyhow::Context;
use tracing::{info, warn};

use crate::routes::AppState;
use crate::settings::{default_settings_path, load_settings};

fn main() -> anyhow::Result<()> {
    // ── Tracing ───────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("anka=info,anka_core=info")),
        )
        .init();

    // ── Configuration ─────────────────────────────────────────────────────
    let settings_path = default_settings_path();
    let settings = load_settings(&settings_path, |key| std::env::var(key).ok());
    info!(
        path = %settings_path.display(),
        wake_word = %settings.wake_word,
        language = %settings.language,
        "Anka starting"
    );
    let port = settings.port;
    let config = settings.into_assistant_config();

    // ── Assistant ─────────────────────────────────────────────────────────
    // Built outside the async runtime: the blocking HTTP clients inside it
    // must not be created or dropped on a runtime thread.
    let collaborators = Collaborators::from_config(&config)?;
    let controller = Arc::new(AssistantController::new(
        config,
        EventBus::new(),
        collaborators,
    ));

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build async runtime")?;
    let served = runtime.block_on(serve(Arc::clone(&controller), port));
    runtime.shutdown_timeout(Duration::from_secs(2));

    controller.stop();
    info!("Anka stopped");
    served
}

async fn serve(controller: Arc<AssistantController>, port: u16) -> anyhow::Result<()> {
    let closing = Arc::new(AtomicBool::new(false));
    let state = Arc::new(AppState {
        controller,
        closing: Arc::clone(&closing),
    });
    let app = routes::router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "control surface listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(closing))
        .await
        .context("server error")?;
    Ok(())
}

async fn shutdown_signal(closing: Arc<AtomicBool>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for ctrl-c: {e}");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
    closing.store(true, Ordering::SeqCst);
}
