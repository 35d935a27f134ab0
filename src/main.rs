use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use judge_worker::admin;
use judge_worker::config::WorkerConfig;
use judge_worker::core::problem::{PayloadResolver, ProblemLibrary};
use judge_worker::engine::{EngineConfig, GradingEngine};
use judge_worker::executor::ExecutorRegistry;
use judge_worker::intake::{self, JobQueue};
use judge_worker::languages::LanguageTable;
use judge_worker::reporter::RedisReporter;
use judge_worker::sandbox::is_cgroups_available;
use judge_worker::storage::{DataStore, StorageClient};

const POP_TIMEOUT_SECS: f64 = 1.0;
const PACKET_FLUSH_GRACE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("judge_worker=info".parse()?),
        )
        .init();

    dotenvy::dotenv().ok();
    let config = WorkerConfig::from_env()?;

    info!("Starting judge worker {}...", config.worker_name);

    let languages = LanguageTable::load(&config.languages_config)?;
    info!(
        "Loaded languages from {:?}: {}",
        config.languages_config,
        languages.tags().join(", ")
    );

    if is_cgroups_available().await {
        info!("Confirmed isolate cgroup support is available");
    }

    let executors = ExecutorRegistry::from_languages(&languages, config.sandbox.clone());
    let store = StorageClient::from_env().map(|client| Arc::new(client) as Arc<dyn DataStore>);
    if store.is_none() {
        info!("MINIO_ENDPOINT not set; only inline test data is available");
    }

    let library = config.problems_dir.as_ref().map(ProblemLibrary::new);
    let resolver = PayloadResolver::new(library).with_output_limit(config.output_limit);
    let reporter = Arc::new(
        RedisReporter::connect(
            &config.redis_url,
            config.packet_queue.as_str(),
            config.packet_channel.as_str(),
        )
        .await?,
    );

    let engine = Arc::new(GradingEngine::new(
        executors,
        Arc::new(resolver),
        reporter.clone(),
        store,
        EngineConfig {
            submission_type: config.submission_type.clone(),
            worker: config.worker_name.clone(),
            output_limit: config.output_limit,
        },
    ));

    let listener = tokio::net::TcpListener::bind(config.admin_addr)
        .await
        .with_context(|| format!("Failed to bind admin API on {}", config.admin_addr))?;
    info!("Admin API listening on {}", config.admin_addr);
    let router = admin::routes(engine.clone());
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            error!("Admin API stopped: {}", e);
        }
    });

    spawn_refresh_on_sigusr2(engine.clone())?;
    if let Err(e) = engine.refresh_problems().await {
        warn!("Failed to announce supported problems: {:#}", e);
    }

    let shutdown = CancellationToken::new();
    spawn_shutdown_listener(shutdown.clone())?;

    let mut queue = JobQueue::connect(&config.redis_url, config.job_queue.as_str()).await?;
    info!("Waiting for jobs...");

    intake::serve(&engine, &mut queue, &shutdown, POP_TIMEOUT_SECS).await?;

    if engine.request_termination().await {
        info!("Active job terminated");
    }
    engine.wait_idle().await;
    reporter.shutdown(PACKET_FLUSH_GRACE).await;
    info!("Judge worker stopped");
    Ok(())
}

/// SIGINT/SIGTERM stop the worker
fn spawn_shutdown_listener(shutdown: CancellationToken) -> Result<()> {
    let mut sigterm = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("Received SIGINT"),
            _ = sigterm.recv() => info!("Received SIGTERM"),
        }
        shutdown.cancel();
    });
    Ok(())
}

/// SIGUSR2 re-announces the supported problems
fn spawn_refresh_on_sigusr2(engine: Arc<GradingEngine>) -> Result<()> {
    let mut usr2 =
        signal(SignalKind::user_defined2()).context("Failed to install SIGUSR2 handler")?;
    tokio::spawn(async move {
        while usr2.recv().await.is_some() {
            info!("Received SIGUSR2, refreshing supported problems");
            if let Err(e) = engine.refresh_problems().await {
                warn!("Failed to refresh supported problems: {:#}", e);
            }
        }
    });
    Ok(())
}
