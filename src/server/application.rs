// src/server/application.rs

//! Application lifecycle: the serve-until-shutdown loop and the daemon
//! wrapper that retries transient startup failures.

use crate::config::Config;
use crate::core::adaptor::Adaptor;
use crate::core::errors::FeedgateError;
use crate::core::transform::TransformRegistry;
use crate::server::http;
use crate::server::initialization::{self, ServerContext};
use crate::server::logbuffer::LogBuffer;
use crate::server::spawner;
use crate::server::stream::TlsListener;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use tracing_subscriber::{filter::EnvFilter, reload};

/// Transient startup failures are retried this many times before the
/// process gives up.
const MAX_STARTUP_RETRIES: u32 = 10;
const STARTUP_RETRY_DELAY: Duration = Duration::from_secs(15);

/// Waits for a shutdown signal based on the operating system.
/// On Unix, it listens for SIGINT and SIGTERM.
#[cfg(unix)]
async fn await_shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};
    let mut sigint = signal(SignalKind::interrupt()).expect("Failed to create SIGINT stream");
    let mut sigterm = signal(SignalKind::terminate()).expect("Failed to create SIGTERM stream");
    tokio::select! {
        _ = sigint.recv() => info!("SIGINT received, initiating graceful shutdown."),
        _ = sigterm.recv() => info!("SIGTERM received, initiating graceful shutdown."),
    }
}

#[cfg(not(unix))]
async fn await_shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to create Ctrl+C stream");
    info!("Ctrl-C received, initiating graceful shutdown.");
}

/// Runs the application until a shutdown signal arrives or a critical
/// background task dies.
pub async fn run(
    config: Arc<Config>,
    adaptor: Arc<dyn Adaptor>,
    transforms: &TransformRegistry,
    log_reload: Arc<reload::Handle<EnvFilter, tracing_subscriber::Registry>>,
    log_buffer: Arc<LogBuffer>,
) -> Result<(), FeedgateError> {
    let mut ctx =
        initialization::setup(config, adaptor, transforms, log_reload, log_buffer).await?;
    spawner::spawn_all(&mut ctx)
        .await
        .map_err(|e| FeedgateError::StartupFatal(e.to_string()))?;
    serve_until_shutdown(ctx).await;
    Ok(())
}

async fn serve_until_shutdown(ctx: ServerContext) {
    let ServerContext {
        state,
        listener,
        tls_acceptor,
        shutdown_tx,
        background_tasks,
        push_cancel,
        ..
    } = ctx;

    let background_tasks = Arc::new(tokio::sync::Mutex::new(background_tasks));
    let shutdown_timeout = state.settings.shutdown_timeout;

    // The graceful-shutdown future doubles as the monitor for background
    // tasks: a dead critical task brings the server down.
    let graceful = {
        let state = state.clone();
        let shutdown_tx = shutdown_tx.clone();
        let push_cancel = push_cancel.clone();
        let background_tasks = background_tasks.clone();
        async move {
            {
                let mut tasks = background_tasks.lock().await;
                tokio::select! {
                    biased;

                    _ = await_shutdown_signal() => {}

                    Some(res) = tasks.join_next() => {
                        match res {
                            Ok(Ok(())) => info!("A background task has completed."),
                            Ok(Err(e)) => error!("CRITICAL: Background task failed: {e}. Shutting down."),
                            Err(e) => error!("CRITICAL: Background task panicked: {e:?}. Shutting down."),
                        }
                    }
                }
            }

            // New exchanges are rejected from here on; in-flight ones are
            // interrupted and waited for.
            info!("Shutting down. Sending signal to all tasks.");
            let _ = shutdown_tx.send(());
            push_cancel.cancel();
            if !state.shutdown_waiter.shutdown(shutdown_timeout).await {
                warn!("Some exchanges did not finish within the shutdown deadline.");
            }
        }
    };

    let serve_result = match tls_acceptor {
        Some(acceptor) => {
            let tls_listener = TlsListener::new(listener, acceptor);
            axum::serve(
                tls_listener,
                http::content_router(state.clone())
                    .into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(graceful)
            .await
        }
        None => {
            axum::serve(
                listener,
                http::content_router(state.clone())
                    .into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(graceful)
            .await
        }
    };
    if let Err(e) = serve_result {
        error!("Content listener terminated abnormally: {e}");
    }

    state.adaptor.destroy().await;
    drain_background_tasks(background_tasks, shutdown_timeout).await;
    info!("Server shutdown complete.");
}

async fn drain_background_tasks(
    background_tasks: Arc<tokio::sync::Mutex<JoinSet<anyhow::Result<()>>>>,
    timeout: Duration,
) {
    info!("Waiting for background tasks to finish...");
    let drained = tokio::time::timeout(timeout, async {
        let mut tasks = background_tasks.lock().await;
        while tasks.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        warn!("Timed out waiting for background tasks to finish cleanly.");
        background_tasks.lock().await.abort_all();
    }
}

/// Daemon entry: retries transient startup failures, maps fatal ones to
/// exit codes. Returns the process exit code.
pub async fn run_daemon(
    config: Arc<Config>,
    adaptor: Arc<dyn Adaptor>,
    transforms: &TransformRegistry,
    log_reload: Arc<reload::Handle<EnvFilter, tracing_subscriber::Registry>>,
    log_buffer: Arc<LogBuffer>,
) -> i32 {
    let mut attempt = 0;
    loop {
        match run(
            config.clone(),
            adaptor.clone(),
            transforms,
            log_reload.clone(),
            log_buffer.clone(),
        )
        .await
        {
            Ok(()) => return 0,
            Err(FeedgateError::InvalidConfiguration(e)) => {
                error!("Invalid configuration: {e}");
                return 2;
            }
            Err(FeedgateError::StartupTransient(e)) => {
                attempt += 1;
                if attempt > MAX_STARTUP_RETRIES {
                    error!("Giving up after {attempt} startup attempts: {e}");
                    return 1;
                }
                warn!(
                    "Startup attempt {attempt} failed ({e}); retrying in {}s.",
                    STARTUP_RETRY_DELAY.as_secs()
                );
                tokio::time::sleep(STARTUP_RETRY_DELAY).await;
            }
            Err(e) => {
                error!("Fatal startup failure: {e}");
                return 1;
            }
        }
    }
}
