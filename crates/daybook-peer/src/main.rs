mod config;
mod error;
mod routes;

use std::sync::Arc;

use daybook_core::{standard_registry, Store};

use config::AppConfig;
use routes::{app_router, AppState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Only load .env in development; production uses platform-native env injection.
    #[cfg(debug_assertions)]
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("daybook_peer=info".parse().expect("valid directive")),
        )
        .init();

    let config = AppConfig::from_env()?;
    tracing::info!("Starting daybook-peer with config: {:?}", config);

    let store = Arc::new(Store::open(&config.db_path, Arc::new(standard_registry()))?);
    let router = app_router(AppState { store });

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("daybook-peer listening on {}", config.bind_addr);
    axum::serve(listener, router).await?;
    Ok(())
}
