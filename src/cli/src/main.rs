//! Entrypoint for the repo-guardian GitHub App.
//!
//! Wires configuration, the GitHub client, rule registry, template store,
//! compliance engine, work queue, scheduler, and the two HTTP listeners,
//! then runs until a shutdown signal arrives.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use repo_guardian::metrics::Metrics;
use repo_guardian::rules::{Registry, TemplateStore, DEFAULT_RULES};
use repo_guardian::server::{main_router, metrics_router, normalize_listen_addr, AppState};
use repo_guardian::webhook;
use repo_guardian::{Config, Engine, GitHubClient, Queue, Scheduler};
use tokio::net::TcpListener;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Grace period for HTTP servers and in-flight jobs on shutdown.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(15);

#[tokio::main]
async fn main() -> ExitCode {
    let config = Config::parse();

    init_tracing(&config.log_level);

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "fatal error");
            ExitCode::FAILURE
        }
    }
}

/// Initializes the global tracing subscriber.
///
/// Uses compact single-line formatting; `RUST_LOG` overrides the configured
/// `LOG_LEVEL` when set.
fn init_tracing(log_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));

    tracing_subscriber::registry()
        .with(fmt::layer().compact().with_target(false))
        .with(filter)
        .init();
}

async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    info!(
        listen_addr = %config.listen_addr,
        metrics_addr = %config.metrics_addr,
        dry_run = config.dry_run,
        worker_count = config.worker_count,
        properties_mode = %config.custom_properties_mode,
        "starting repo-guardian"
    );

    let registry = prometheus::Registry::new();
    let metrics = Arc::new(Metrics::new(&registry)?);

    let client = GitHubClient::new(
        config.github_app_id,
        &config.github_private_key_path,
        &config.github_api_url,
        config.rate_limit_threshold,
        metrics.clone(),
    )?;

    let rules = Registry::new(DEFAULT_RULES);

    let mut templates = TemplateStore::new();
    templates.load(&config.template_dir)?;

    let engine = Arc::new(Engine::new(
        rules,
        templates,
        metrics.clone(),
        config.skip_forks,
        config.skip_archived,
        config.dry_run,
        config.custom_properties_mode,
    ));

    let queue = Arc::new(Queue::new(config.queue_size));

    let cancel = CancellationToken::new();

    queue.start(config.worker_count, engine, client.clone(), &cancel);

    let scheduler = Scheduler::new(
        client,
        queue.clone(),
        config.schedule_interval,
        config.skip_forks,
        config.skip_archived,
    );
    let scheduler_handle = tokio::spawn(scheduler.run(cancel.child_token()));

    let webhook_handler = Arc::new(webhook::Handler::new(
        &config.github_webhook_secret,
        queue.clone(),
        metrics.clone(),
    ));
    let state = AppState {
        webhook: webhook_handler,
        queue: queue.clone(),
    };

    let main_listener = TcpListener::bind(normalize_listen_addr(&config.listen_addr)).await?;
    let metrics_listener = TcpListener::bind(normalize_listen_addr(&config.metrics_addr)).await?;

    let main_server = spawn_server("main", main_listener, main_router(state), &cancel);
    let metrics_server = spawn_server("metrics", metrics_listener, metrics_router(registry), &cancel);

    await_shutdown(&cancel).await?;
    cancel.cancel();

    info!("shutting down");

    let drained = tokio::time::timeout(SHUTDOWN_TIMEOUT, async {
        let _ = main_server.await;
        let _ = metrics_server.await;
        let _ = scheduler_handle.await;
    })
    .await;

    if drained.is_err() {
        error!("shutdown grace period elapsed before servers drained");
    }

    queue.stop().await;
    info!("repo-guardian stopped");

    Ok(())
}

/// Serves a router on the listener until the token is cancelled. A server
/// error triggers root cancellation so the whole process shuts down.
fn spawn_server(
    name: &'static str,
    listener: TcpListener,
    router: axum::Router,
    cancel: &CancellationToken,
) -> tokio::task::JoinHandle<()> {
    let cancel = cancel.clone();

    tokio::spawn(async move {
        let addr = listener
            .local_addr()
            .map(|a| a.to_string())
            .unwrap_or_default();
        info!(name, addr, "server listening");

        let shutdown = cancel.clone();
        let result = axum::serve(listener, router)
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await;

        if let Err(e) = result {
            error!(name, error = %e, "server error");
            cancel.cancel();
        }
    })
}

/// Waits for SIGINT, SIGTERM, or internal cancellation.
async fn await_shutdown(cancel: &CancellationToken) -> std::io::Result<()> {
    let mut sigterm = signal(SignalKind::terminate())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("received interrupt signal"),
        _ = sigterm.recv() => info!("received SIGTERM"),
        _ = cancel.cancelled() => info!("internal shutdown requested"),
    }

    Ok(())
}
