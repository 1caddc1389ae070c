use dotenvy::dotenv;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use ticketing_server::config::Config;
use ticketing_server::payment::SimulatedGateway;
use ticketing_server::routes::create_routes;
use ticketing_server::state::AppState;
use ticketing_server::store::{MemoryStore, PgStore, Store};

const DEFAULT_LOG_FILTER: &str = "ticketing_server=info,tower_http=info";

#[tokio::main]
async fn main() {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .init();

    let config = Config::from_env().expect("Invalid configuration");

    let store: Arc<dyn Store> = match &config.database_url {
        Some(database_url) => Arc::new(
            PgStore::connect(database_url, config.database_max_connections)
                .await
                .expect("Failed to initialise database"),
        ),
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory store with demo data");
            Arc::new(MemoryStore::with_demo_data().await)
        }
    };

    if config.enable_debug_endpoints {
        tracing::warn!("Debug endpoints enabled: tickets can be marked paid without payment");
    }

    let addr = config.bind_addr();
    let app = create_routes(AppState::new(config, store, Arc::new(SimulatedGateway)));

    tracing::info!("🚀 Server running at http://{}/api", addr);

    let listener = TcpListener::bind(addr)
        .await
        .expect("Failed to bind address");

    axum::serve(listener, app).await.expect("Server failed");
}
