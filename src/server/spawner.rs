// src/server/spawner.rs

//! Spawns all of the server's long-running background tasks.

use super::initialization::ServerContext;
use crate::core::metrics;
use crate::server::http;
use chrono::Utc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

/// How often the config file's modification time is checked.
const CONFIG_RELOAD_PERIOD: Duration = Duration::from_secs(15);

/// Spawns all critical background tasks into the context's JoinSet.
pub async fn spawn_all(ctx: &mut ServerContext) -> anyhow::Result<()> {
    let state = &ctx.state;
    let shutdown_tx = &ctx.shutdown_tx;

    // --- Dashboard server ---
    if let Some(listener) = ctx.dashboard_listener.take() {
        let router = http::dashboard_router(state.clone());
        let mut shutdown_rx = shutdown_tx.subscribe();
        ctx.background_tasks.spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    shutdown_rx.recv().await.ok();
                    info!("Dashboard server shutting down.");
                })
                .await?;
            Ok(())
        });
    }

    // --- Async push worker ---
    if let Some(worker) = ctx.push_worker.take() {
        let cancel = ctx.push_cancel.clone();
        ctx.background_tasks.spawn(async move {
            worker.run(cancel).await;
            Ok(())
        });
    }

    // --- Session evictor ---
    {
        let sessions = state.sessions.clone();
        let shutdown_rx = shutdown_tx.subscribe();
        ctx.background_tasks.spawn(async move {
            sessions.run_evictor(shutdown_rx).await;
            Ok(())
        });
    }

    // --- Config hot-reload poller ---
    {
        let config = state.config.clone();
        let mut shutdown_rx = shutdown_tx.subscribe();
        ctx.background_tasks.spawn(async move {
            let mut interval = tokio::time::interval(CONFIG_RELOAD_PERIOD);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        match config.ensure_latest_config_loaded() {
                            Ok(true) => info!("Configuration file reloaded."),
                            Ok(false) => {}
                            Err(e) => warn!("Configuration reload rejected: {e}"),
                        }
                    }
                    _ = shutdown_rx.recv() => return Ok(()),
                }
            }
        });
    }

    // --- Full push scheduler ---
    {
        let state = state.clone();
        let mut shutdown_rx = shutdown_tx.subscribe();
        let push_on_startup = state.config.get_bool("adaptor.pushDocIdsOnStartup")?;
        let schedule_expr = state.config.get_value("adaptor.fullListingSchedule")?;
        ctx.background_tasks.spawn(async move {
            if push_on_startup {
                run_full_push(&state).await;
            }
            if schedule_expr.trim().is_empty() {
                info!("No full listing schedule configured.");
                return Ok(());
            }
            loop {
                // The schedule is re-read every round so a hot reload takes
                // effect at the next occurrence.
                let expr = state
                    .config
                    .get_value("adaptor.fullListingSchedule")
                    .unwrap_or_else(|_| schedule_expr.clone());
                let schedule = match crate::config::parse_cron(&expr) {
                    Ok(schedule) => schedule,
                    Err(e) => {
                        error!("Bad full listing schedule '{expr}': {e}");
                        return Ok(());
                    }
                };
                let Some(next) = schedule.upcoming(Utc).next() else {
                    return Ok(());
                };
                let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
                info!("Next full push scheduled at {next}.");
                tokio::select! {
                    _ = tokio::time::sleep(wait) => run_full_push(&state).await,
                    _ = shutdown_rx.recv() => return Ok(()),
                }
            }
        });
    }

    // --- Incremental poller ---
    if state.adaptor.incremental_lister().is_some() {
        let state = state.clone();
        let mut shutdown_rx = shutdown_tx.subscribe();
        let period =
            Duration::from_secs(state.config.get_int("adaptor.incrementalPollPeriodSecs")?.max(1) as u64);
        ctx.background_tasks.spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately; incremental changes wait a
            // full period after startup instead.
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(e) = state
                            .doc_id_sender
                            .push_incremental_doc_ids_from_adaptor(&*state.adaptor, None)
                            .await
                        {
                            warn!("Incremental push failed: {e}");
                        }
                    }
                    _ = shutdown_rx.recv() => return Ok(()),
                }
            }
        });
    }

    // --- Session gauge refresher ---
    {
        let state = state.clone();
        let mut shutdown_rx: broadcast::Receiver<()> = shutdown_tx.subscribe();
        ctx.background_tasks.spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(30));
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        metrics::LIVE_SESSIONS.set(state.sessions.len() as f64);
                    }
                    _ = shutdown_rx.recv() => return Ok(()),
                }
            }
        });
    }

    info!("All background tasks have been spawned.");
    Ok(())
}

async fn run_full_push(state: &std::sync::Arc<crate::server::context::AppState>) {
    match state
        .doc_id_sender
        .push_full_doc_ids_from_adaptor(&*state.adaptor, None)
        .await
    {
        Ok(()) => {}
        Err(e) => warn!("Full push did not complete: {e}"),
    }
}
