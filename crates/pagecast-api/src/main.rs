//! pagecast server: ingestion API and edge file server.

use clap::{Parser, ValueEnum};
use pagecast_api::{AppState, edge, routes};
use pagecast_config::SystemConfig;
use pagecast_db::{PgJobQueue, PgStatusStore, create_pool};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pagecast-server")]
#[command(about = "Serve the pagecast ingestion API and edge file server")]
struct Args {
    /// Configuration file (KDL)
    #[arg(long, env = "PAGECAST_CONFIG")]
    config: Option<PathBuf>,

    /// Log output format
    #[arg(long, value_enum, default_value = "text", env = "PAGECAST_LOG_FORMAT")]
    log_format: LogFormat,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match args.log_format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt().json().with_env_filter(filter).init(),
    }

    let config = SystemConfig::load(args.config.as_deref())?;
    let store = pagecast_storage::from_config(&config.storage)?;
    info!(storage = store.name(), "Object store ready");

    info!("Connecting to database...");
    let pool = create_pool(&config.queue.database_url).await?;
    info!("Database connected");

    let queue = Arc::new(PgJobQueue::new(pool.clone(), config.queue.poll_interval));
    let status = Arc::new(PgStatusStore::new(pool));
    let state = AppState::new(
        store.clone(),
        queue,
        status,
        config.worker.workspace.join("clones"),
    );

    let api = routes::router(state).layer(TraceLayer::new_for_http()).layer(
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
    );
    let edge = edge::router(store).layer(TraceLayer::new_for_http());

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutdown requested");
            }
            shutdown.cancel();
        }
    });

    let api_listener = TcpListener::bind(config.http.api_addr).await?;
    let edge_listener = TcpListener::bind(config.http.edge_addr).await?;
    info!(api = %config.http.api_addr, edge = %config.http.edge_addr, "Starting servers");

    let api_shutdown = shutdown.clone();
    let edge_shutdown = shutdown.clone();
    tokio::try_join!(
        async move {
            axum::serve(api_listener, api)
                .with_graceful_shutdown(async move { api_shutdown.cancelled().await })
                .await
        },
        async move {
            axum::serve(edge_listener, edge)
                .with_graceful_shutdown(async move { edge_shutdown.cancelled().await })
                .await
        },
    )?;

    Ok(())
}
