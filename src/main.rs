mod cli;
mod metric_defs;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::Parser;
use cli::LogFormat;
use colored::Colorize;
use corelib::config::{Config, ConfigLoader, RunnerKind};
use corelib::database::backfill_store::SqlBackfillStore;
use corelib::database::config_store::SqlRuntimeConfigStore;
use corelib::database::event_store::{EventStore, SqlEventStore};
use corelib::database::workflow_store::{SqlWorkflowStore, WorkflowStore};
use corelib::database::Database;
use corelib::netutils::parse_addr;
use corelib::shutdown::Shutdown;
use engine::backfill::BackfillEngine;
use engine::handlers::{
    DockerRunnerHandler, ExecutionDescriptionHandler, LoggingPublisher, MonitoringHandler, OutputHandler,
    PublisherHandler, TerminationHandler, TransitionLogger,
};
use engine::rate_limiter::RateLimiter;
use engine::replayer::Replayer;
use engine::retry::RetryPolicy;
use engine::runner::{LocalProcessRunner, Runner};
use engine::scheduler_tick::SchedulerTick;
use engine::state_manager::StateManager;
use engine::trigger_manager::TriggerManager;
use metrics_exporter_prometheus::PrometheusBuilder;
use metrics_util::MetricKindMask;
use tokio::task::JoinSet;
use tokio::{select, time};
use tracing::{debug, error, info, trace, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Layer};

/// Builds the stdout layer plus a daily-rolling file sink for the
/// `transitions` target (the `TransitionLogger` handler's output), so
/// state-transition history survives independently of whatever the
/// operator's stdout retention policy is.
fn setup_logging_subscriber(
    f: &LogFormat,
    log_dir: &str,
) -> tracing_appender::non_blocking::WorkerGuard {
    let stdout_layer = {
        let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "conductord=debug,api=debug,engine=debug,tower_http=debug".into());
        let layer = tracing_subscriber::fmt::layer().with_thread_names(true);
        let layer: Box<dyn Layer<_> + Send + Sync> = match f {
            | LogFormat::Pretty => layer.pretty().boxed(),
            | LogFormat::Compact => layer.compact().boxed(),
            | LogFormat::Json => layer.json().boxed(),
        };
        layer.with_filter(env_filter)
    };

    let file_appender = tracing_appender::rolling::daily(log_dir, "conductor_transitions.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let transitions_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("off,transitions=info"));

    tracing_subscriber::registry().with(stdout_layer).with(transitions_layer).init();
    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    match dotenvy::dotenv() {
        | Ok(_) => {}
        | Err(e) if e.not_found() => {}
        | Err(e) => bail!("failed to load .env file: {e}"),
    }

    let opts = cli::CliOpts::parse();
    let mut shutdown = Shutdown::default();

    let _tracing_file_guard = setup_logging_subscriber(&opts.log_format, &opts.log_dir);

    debug!("** {} **", "workflow scheduler core".magenta());
    trace!(config = ?opts.config, "loading configuration");
    let config = ConfigLoader::from_path(&opts.config)?.load()?;

    let prometheus_sockaddr = parse_addr(&config.main.prometheus_address, config.main.prometheus_port)?;
    info!(%prometheus_sockaddr, "prometheus http listener");
    PrometheusBuilder::new()
        .idle_timeout(MetricKindMask::HISTOGRAM, Some(Duration::from_secs(120)))
        .with_http_listener(prometheus_sockaddr)
        .install()
        .expect("failed to install prometheus recorder");
    metric_defs::install_metrics();

    let db = Database::connect(&config.storage.database_uri).await?;
    let workflow_store: Arc<dyn WorkflowStore> = Arc::new(SqlWorkflowStore::new(db.clone()));
    let event_store: Arc<dyn EventStore> = Arc::new(SqlEventStore::new(db.clone()));
    let backfill_store = Arc::new(SqlBackfillStore::new(db.clone()));
    let runtime_config_store = Arc::new(SqlRuntimeConfigStore::new(db.clone()));

    let runner = build_runner(&config);
    let rate_limiter = Arc::new(RateLimiter::new(config.scheduler.default_submission_rate_per_sec));
    let retry_policy = RetryPolicy {
        base_delay_ms: config.scheduler.base_retry_delay_ms,
        max_exponent: config.scheduler.max_retry_exponent,
        max_delay: config.scheduler.max_retry_delay,
    };

    let handlers: Vec<Box<dyn OutputHandler>> = vec![
        Box::new(TransitionLogger),
        Box::new(MonitoringHandler),
        Box::new(ExecutionDescriptionHandler::new(workflow_store.clone())),
        Box::new(DockerRunnerHandler::new(runner, rate_limiter.clone(), workflow_store.clone())),
        Box::new(TerminationHandler::new(retry_policy, config.scheduler.max_retry_attempts)),
        Box::new(PublisherHandler::new(Box::new(LoggingPublisher))),
    ];

    let state_manager = StateManager::new(config.scheduler.state_manager_shard_count, event_store.clone(), handlers);

    let replayer = Replayer::new(event_store.as_ref());
    let active_states = replayer.restore_active_states().await?;
    info!(count = active_states.len(), "restoring active instances");
    state_manager.restore(active_states).await?;
    state_manager.open();

    let backfill_engine = Arc::new(BackfillEngine::new(
        backfill_store,
        workflow_store.clone(),
        event_store.clone(),
        state_manager.clone(),
    ));

    let mut services = JoinSet::new();

    services.spawn({
        let rate_limiter = rate_limiter.clone();
        let update_interval = Duration::from_secs(config.scheduler.runtime_config_update_interval_s);
        let shutdown = shutdown.clone();
        async move {
            rate_limiter.run_refill_loop(runtime_config_store, update_interval, shutdown).await;
            Ok::<(), anyhow::Error>(())
        }
    });

    services.spawn({
        let tick = Arc::new(SchedulerTick::new(
            event_store.clone(),
            state_manager.clone(),
            Arc::new(config.scheduler.clone()),
        ));
        let interval = Duration::from_secs(config.scheduler.scheduler_tick_interval_s);
        let shutdown = shutdown.clone();
        async move {
            tick.run(interval, shutdown).await;
            Ok::<(), anyhow::Error>(())
        }
    });

    services.spawn({
        let manager = Arc::new(TriggerManager::new(workflow_store.clone(), state_manager.clone()));
        let interval = Duration::from_secs(config.scheduler.trigger_manager_tick_interval_s);
        let shutdown = shutdown.clone();
        async move {
            manager.run(interval, shutdown).await;
            Ok::<(), anyhow::Error>(())
        }
    });

    services.spawn({
        let engine = backfill_engine.clone();
        let interval = Duration::from_secs(config.scheduler.scheduler_tick_interval_s);
        let shutdown = shutdown.clone();
        async move {
            engine.run(interval, shutdown).await;
            Ok::<(), anyhow::Error>(())
        }
    });

    services.spawn({
        let addr = parse_addr(&config.api.address, config.api.port)?;
        let backfill_engine = backfill_engine.clone();
        let workflow_store = workflow_store.clone();
        let shutdown = shutdown.clone();
        api::start_api_server(addr, backfill_engine, workflow_store, shutdown)
    });

    select! {
        _ = shutdown.recv() => {
            warn!("received shutdown signal from a downstream service");
        },
        _ = tokio::signal::ctrl_c() => {
            warn!("received ctrl+c (SIGINT)");
            shutdown.broadcast_shutdown();
        }
    };

    info!("waiting (10s) for services to shut down cleanly...");
    if (time::timeout(Duration::from_secs(10), async {
        while services.join_next().await.is_some() {
            info!("need to wait for {} services to terminate", services.len());
        }
    })
    .await)
        .is_err()
    {
        error!("timed out awaiting {} services to shut down", services.len());
        services.shutdown().await;
        bail!("some services were not terminated cleanly");
    }
    info!("bye!");

    Ok(())
}

fn build_runner(config: &Config) -> Arc<dyn Runner> {
    match config.runner.kind {
        | RunnerKind::LocalProcess => Arc::new(LocalProcessRunner),
    }
}
