use std::net::SocketAddr;
use std::sync::Arc;

use tracing::info;

use motorchat_db::{Database, SqliteStore};
use motorchat_server::{Config, build_app};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "motorchat=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;

    let db = Database::open(&config.db_path)?;
    let store = Arc::new(SqliteStore::new(db));
    let (app, _dispatcher) = build_app(&config, store);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("motorchat listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
