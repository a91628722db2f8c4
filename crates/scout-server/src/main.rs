mod configuration;
mod error;
mod routes;
mod state;

use anyhow::Result;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::configuration::Settings;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing for logging
    tracing_subscriber::fmt::init();

    let settings = Settings::new()?;
    let addr = settings.server.socket_addr()?;

    let state = AppState {
        provider_config: settings.provider,
        knowledge_base_config: settings.knowledge_base,
    };

    // Create router with CORS support
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = routes::configure(state).layer(cors);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
