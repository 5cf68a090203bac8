//! Manifold gateway: a multimodal assistant backend that drives each
//! user turn through a planning graph, parallel lane workers, and one
//! ordered SSE stream.

mod api;
mod bus;
mod cancel;
mod graph;
mod state;

use tracing_subscriber::EnvFilter;

use mf_domain::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env();
    std::fs::create_dir_all(config.uploads_dir())?;
    std::fs::create_dir_all(config.sessions_dir())?;

    let bind_addr = config.bind_addr.clone();
    let state = state::AppState::new(config)?;

    tracing::info!(
        bind_addr = %bind_addr,
        boot_id = mf_sessions::server_boot_id(),
        graph_v2 = state.config.graph_v2_enabled,
        "manifold gateway starting"
    );

    let router = api::build_router(state);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, router).await?;
    Ok(())
}
