mod config;

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::info;

use courier_api::auth::{AppState, AppStateInner};
use courier_api::unread::UnreadCache;

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "courier=debug,courier_api=debug,courier_db=info,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;

    // Init database
    let db = courier_db::Database::open(&config.db_path)?;

    let state: AppState = Arc::new(AppStateInner {
        db,
        jwt_secret: config.jwt_secret.clone(),
        unread_cache: UnreadCache::new(config.unread_cache_ttl, config.unread_cache_scope),
        thread_limits: config.thread_limits,
    });

    let app = courier_api::router(state);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("Courier server listening on {}", addr);
    info!(
        "Unread cache: {:?} scope, {}s TTL; thread limits: {} messages, {} levels",
        config.unread_cache_scope,
        config.unread_cache_ttl.as_secs(),
        config.thread_limits.max_nodes,
        config.thread_limits.max_depth
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
