#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::unwrap_used))]

//! Pediu API Server
//!
//! Serves order commits and subscription access checks, and exposes the
//! billing sweep to an external scheduler.

use std::net::SocketAddr;

use axum::http::{header, HeaderName, HeaderValue, Method};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pediu_api::{create_router, AppState, Config};
use pediu_billing::BillingPolicy;
use pediu_shared::{create_migration_pool, create_pool};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,pediu_api=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Pediu API Server v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;
    let policy = BillingPolicy::from_env()?;
    tracing::info!("Configuration loaded");

    let pool = create_pool(&config.database_url).await?;
    tracing::info!("Database connection established");

    if config.run_migrations {
        let migration_pool = create_migration_pool(&config.database_url).await?;
        pediu_shared::run_migrations(&migration_pool).await?;
        migration_pool.close().await;
        tracing::info!("Database migrations applied");
    }

    let allowed_origins: Vec<HeaderValue> = config
        .allowed_origins
        .iter()
        .filter_map(|s| s.parse().ok())
        .collect();
    tracing::info!(
        allowed_origins = ?allowed_origins,
        "CORS configured with {} allowed origins",
        allowed_origins.len()
    );

    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed_origins))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            header::ACCEPT,
            HeaderName::from_static("idempotency-key"),
        ])
        .expose_headers([
            header::CONTENT_TYPE,
            header::RETRY_AFTER,
            HeaderName::from_static("x-idempotency-replay"),
            HeaderName::from_static("x-billing-mode"),
            HeaderName::from_static("x-billing-reason"),
            HeaderName::from_static("x-grace-days-remaining"),
        ]);

    let state = AppState::new(pool, config.clone(), policy);
    let app = create_router(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = config.bind_address.parse()?;
    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
