//! Report engine server binary: loads configuration, wires up the Mongo,
//! Redis, and object-storage collaborators, and runs the HTTP intake
//! surface, the job worker pool, and the schedule ticker side by side
//! until a termination signal arrives.

use clap::Parser;
use mongodb::Client as MongoClient;
use report_engine::config::AppConfig;
use report_engine::intake::{build_router, AppState};
use report_engine::metrics::EngineMetrics;
use report_engine::processor::{run_worker_pool, Processor};
use report_engine::queue::ReportQueue;
use report_engine::storage::ObjectStorage;
use report_engine::store::{ApiKeyStore, JobStore, ScheduleStore};
use report_engine::ticker::Ticker;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// CLI overrides layered on top of `AppConfig::load()`, mirroring the
/// override-after-load pattern the teacher's notification server uses.
#[derive(Debug, Parser)]
#[command(name = "report-engine-server", version, about = "Multi-tenant report generation engine")]
struct Cli {
    #[arg(long, env = "REPORT_ENGINE_HOST")]
    host: Option<String>,

    #[arg(long, env = "REPORT_ENGINE_PORT")]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    init_tracing();

    let cli = Cli::parse();
    let mut config = AppConfig::load()?;
    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    let config = Arc::new(config);

    info!(host = %config.server.host, port = config.server.port, "starting report engine");

    let write_client = MongoClient::with_uri_str(&config.database.write_uri).await?;
    let write_database = write_client.database(&config.database.database_name);
    let read_client = MongoClient::with_uri_str(&config.database.read_uri).await?;
    let read_database = read_client.database(&config.database.database_name);

    let job_store = JobStore::new(&write_database);
    let schedule_store = ScheduleStore::new(&write_database);
    let api_key_store = ApiKeyStore::new(&write_database);
    let queue = ReportQueue::connect(config.queue.clone()).await?;
    let storage = ObjectStorage::new(config.storage.clone()).await?;
    let metrics = Arc::new(EngineMetrics::new()?);

    let processor = Arc::new(Processor::new(
        Arc::clone(&config),
        read_database,
        job_store.clone(),
        storage.clone(),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let worker_task = tokio::spawn(run_worker_pool(
        Arc::clone(&processor),
        queue.clone(),
        config.worker.max_job_concurrency,
        shutdown_rx.clone(),
    ));

    let ticker = Arc::new(Ticker::new(
        schedule_store.clone(),
        job_store.clone(),
        queue.clone(),
        config.ticker.clone(),
    ));
    let ticker_task = tokio::spawn(Arc::clone(&ticker).run(shutdown_rx.clone()));

    let state = AppState {
        config: Arc::clone(&config),
        api_keys: api_key_store,
        jobs: job_store,
        schedules: schedule_store,
        queue,
        storage,
        metrics,
    };
    let app = build_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await.map_err(|e| {
        error!(error = %e, addr = %addr, "failed to bind HTTP listener");
        e
    })?;
    info!(addr = %addr, "intake surface listening");

    let mut server_shutdown_rx = shutdown_rx.clone();
    let server_task = tokio::spawn(async move {
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = server_shutdown_rx.changed().await;
            })
            .await;
        if let Err(err) = result {
            error!(error = %err, "intake server error");
        }
    });

    wait_for_shutdown_signal().await;
    info!("shutdown signal received, draining background tasks");
    let _ = shutdown_tx.send(true);

    if let Err(err) = server_task.await {
        error!(error = %err, "intake server task panicked during shutdown");
    }
    if let Err(err) = ticker_task.await {
        error!(error = %err, "ticker task panicked during shutdown");
    }
    if let Err(err) = worker_task.await {
        error!(error = %err, "worker pool task panicked during shutdown");
    }

    info!("report engine stopped gracefully");
    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "report_engine=info,tower_http=info,axum=info,mongodb=warn,redis=warn".into());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true))
        .init();
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C"),
        _ = terminate => info!("received SIGTERM"),
    }
}
