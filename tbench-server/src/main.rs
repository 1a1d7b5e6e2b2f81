#![deny(clippy::expect_used, clippy::unwrap_used)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use clap::Parser;
use tbench_storage::{Persistence, RunCoordinator};
use tracing::{error, info, warn};

mod api_models;
mod error;
mod eviction;
mod handlers;
mod middleware;
mod routes;
mod state;

use routes::build_app;
use state::AppState;

const DEV_API_KEY: &str = "tbench-local-dev-key";

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Host to bind to
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    host: String,

    /// Port to bind to
    #[arg(long, env = "PORT", default_value_t = 2500)]
    port: u16,

    /// Shared secret agents send in the X-API-KEY header
    #[arg(long, env = "API_KEY", default_value = DEV_API_KEY, hide_env_values = true, hide_default_value = true)]
    api_key: String,

    /// Directory holding the results and emergency files
    #[arg(long, env = "DATA_DIR", default_value = ".")]
    data_dir: PathBuf,

    #[arg(long, env = "RESULTS_FILE", default_value = "results.csv")]
    results_file: String,

    #[arg(long, env = "EMERGENCY_FILE", default_value = "emergency.csv")]
    emergency_file: String,

    /// Finalize runs without any report for this many seconds (disabled when unset)
    #[arg(long, env = "RUN_IDLE_TIMEOUT_SECS")]
    run_idle_timeout_secs: Option<u64>,

    #[arg(long, env = "EVICTION_INTERVAL_SECS", default_value_t = 60)]
    eviction_interval_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .with_env_filter(
            match tracing_subscriber::EnvFilter::try_from_default_env() {
                Ok(filter) => filter,
                Err(_) => tracing_subscriber::EnvFilter::new("info"),
            },
        )
        .init();
    let args = Args::parse();

    if args.api_key == DEV_API_KEY {
        warn!("API_KEY not set, using the development key. Set API_KEY in production.");
    }

    let persistence =
        Persistence::csv_files(&args.data_dir, &args.results_file, &args.emergency_file);
    info!(
        "Writing results to {} (emergency: {})",
        args.data_dir.join(&args.results_file).display(),
        args.data_dir.join(&args.emergency_file).display()
    );
    let coordinator = Arc::new(RunCoordinator::new(persistence));

    if let Some(secs) = args.run_idle_timeout_secs {
        eviction::spawn_idle_eviction(
            coordinator.clone(),
            Duration::from_secs(secs),
            Duration::from_secs(args.eviction_interval_secs.max(1)),
        );
    }

    let state = Arc::new(AppState {
        coordinator: coordinator.clone(),
        api_key: args.api_key.clone(),
    });
    let app: Router = build_app(state);

    let addr = format!("{}:{}", args.host, args.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Listening on {}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let unfinished = coordinator.active_ids();
    if !unfinished.is_empty() {
        warn!(
            "Shutting down with {} unfinished run(s), their data is lost: {:?}",
            unfinished.len(),
            unfinished.iter().map(|id| id.to_string()).collect::<Vec<_>>()
        );
    }
    info!("Collector stopped");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
