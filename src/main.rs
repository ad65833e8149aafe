mod config;
mod contact;
mod db;
mod error;
mod ids;
mod models;
mod repo;
mod routes;
mod scheduling;

use crate::{
    config::{Config, StorageBackend},
    models::AppState,
};

use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use axum::http::header;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let cfg = Config::from_env()?;

    let state = match (cfg.storage, cfg.database_url.as_deref()) {
        (StorageBackend::Postgres, Some(url)) => {
            let pool = db::connect_pg(url, cfg.db_max_connections).await?;
            if cfg.run_migrations {
                db::migrate(&pool).await?;
            }
            AppState::postgres(pool)
        }
        (StorageBackend::Postgres, None) => anyhow::bail!("DATABASE_URL is not set"),
        (StorageBackend::Memory, _) => {
            tracing::warn!("using in-memory storage; data is lost on restart");
            AppState::in_memory()
        }
    };

    // Browser clients (dashboards, kiosk) call the API cross-origin.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::ACCEPT,
        ]);

    let app = routes::router(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    tracing::info!(storage = ?cfg.storage, "Listening on http://{}", cfg.bind_addr);
    let listener = tokio::net::TcpListener::bind(&cfg.bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
