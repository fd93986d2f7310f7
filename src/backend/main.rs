//! Sync Server Entry Point
//!
//! Starts the HTTP sync server: loads configuration, builds the app, and
//! serves until the process is stopped. The persistence worker's timers live
//! for the lifetime of the process.

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables from .env file if present
    dotenv::dotenv().ok();

    let env_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "coscribe=info,tower_http=info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(&env_filter))
        .init();

    let config = coscribe::backend::server::config::ServerConfig::load();
    let bind_addr = config.bind_addr.clone();

    // The worker must outlive the server: dropping it aborts the flush and
    // eviction timers.
    let (app, _coordinator, _worker) =
        coscribe::backend::server::init::create_app(config).await;

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("[Server] Listening on {}", bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}
