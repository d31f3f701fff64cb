use anyhow::Context;
use dotenvy::dotenv;
use log::{error, info};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use learnportal::core::config::AppConfig;
use learnportal::core::shared::state::{create_backend, AppState};
use learnportal::learn::configure_learn_routes;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .write_style(env_logger::WriteStyle::Always)
        .init();

    let config = AppConfig::load().context("Failed to load configuration")?;
    let auth = create_backend(&config.backend)
        .await
        .context("Failed to set up the backend")?;
    let state = Arc::new(AppState::new(config, auth));

    #[cfg(feature = "realtime")]
    {
        use learnportal::learn::notifications::NotificationPoller;
        let interval =
            std::time::Duration::from_secs(state.config.notifications.poll_interval_seconds);
        NotificationPoller::new(Arc::clone(&state.sessions), state.feed.clone(), interval).spawn();
    }

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    let app = configure_learn_routes()
        .layer(cors)
        .with_state(Arc::clone(&state));

    let addr = state.config.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("learnportal listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;
    info!("learnportal stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}
