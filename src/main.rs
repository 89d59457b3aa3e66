use std::path::PathBuf;

use scg_server::ServerConfig;
use scg_store::Database;

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    tracing::info!("Starting OpenSCG server");

    // Database path
    let db_path = std::env::var("SCG_DB_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_home().join(".openscg").join("openscg.db"));

    let db = Database::open(&db_path).expect("Failed to open database");

    let config = ServerConfig {
        port: std::env::var("SCG_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(8000),
        resample_broadcast: std::env::var("SCG_RESAMPLE_BROADCAST")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false),
        ..Default::default()
    };

    let handle = scg_server::start(config, db)
        .await
        .expect("Failed to start server");

    tracing::info!(port = handle.port, "OpenSCG server ready");

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to listen for ctrl+c");

    tracing::info!("Shutting down");
}

fn dirs_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}
