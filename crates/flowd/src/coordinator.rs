//! Coordinator mode: opens the state store, wires the executor to real
//! worker RPC clients, and drives it from four tickers while serving the
//! HTTP API.
//!
//! Tick loops:
//! 1. Scheduling: health-check workers, assign pending streams
//! 2. Monitoring: reconcile waiting and running assignments
//! 3. Heartbeat reaper: deactivate workers that stopped reporting
//! 4. Lease checker: stop running assignments whose lease ran out

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use flowgrid_coordinator::{CoordinatorExecutor, Repositories};
use flowgrid_rpc::GrpcConnector;
use flowgrid_state::StateStore;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use crate::config::CoordinatorConfig;

pub async fn run_coordinator(config: CoordinatorConfig) -> anyhow::Result<()> {
    info!("FlowGrid coordinator starting");

    std::fs::create_dir_all(&config.data_dir)?;
    let db_path = config.data_dir.join("flowgrid.redb");

    // ── State store ──────────────────────────────────────────────
    let store = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    // ── Executor ─────────────────────────────────────────────────
    let connector = Arc::new(GrpcConnector::new(config.rpc_timeout, config.connect_timeout));
    let executor = Arc::new(CoordinatorExecutor::new(
        Repositories::from_store(store),
        connector,
    ));
    info!(routes = executor.routing().len(), "coordinator executor initialized");

    // ── Background tasks ─────────────────────────────────────────
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let assign_handle = {
        let executor = Arc::clone(&executor);
        spawn_ticker("scheduler", config.assign_interval, shutdown_rx.clone(), move || {
            let executor = Arc::clone(&executor);
            async move {
                match executor.check_workers_and_assign_streams().await {
                    Ok(summary) if summary.pending > 0 => info!(
                        pending = summary.pending,
                        assigned = summary.assigned,
                        failed = summary.failed,
                        "assignment pass"
                    ),
                    Ok(_) => {}
                    Err(e) => error!(error = %e, "assignment pass failed"),
                }
            }
        })
    };

    let monitor_handle = {
        let executor = Arc::clone(&executor);
        spawn_ticker("monitor", config.monitor_interval, shutdown_rx.clone(), move || {
            let executor = Arc::clone(&executor);
            async move {
                match executor.check_worker_streams().await {
                    Ok(summary) => debug!(?summary, "monitor pass"),
                    Err(e) => error!(error = %e, "monitor pass failed"),
                }
            }
        })
    };

    let reaper_handle = {
        let executor = Arc::clone(&executor);
        let timeout = config.heartbeat_timeout;
        spawn_ticker(
            "heartbeat reaper",
            config.heartbeat_check_interval,
            shutdown_rx.clone(),
            move || {
                let executor = Arc::clone(&executor);
                async move {
                    match executor.check_worker_heartbeats(timeout) {
                        Ok(0) => {}
                        Ok(count) => info!(count, "deactivated workers with expired heartbeats"),
                        Err(e) => error!(error = %e, "heartbeat check failed"),
                    }
                }
            },
        )
    };

    let lease_handle = {
        let executor = Arc::clone(&executor);
        spawn_ticker("lease checker", config.lease_check_interval, shutdown_rx.clone(), move || {
            let executor = Arc::clone(&executor);
            async move {
                match executor.check_stream_leases() {
                    Ok(0) => {}
                    Ok(count) => info!(count, "stopped worker streams with expired leases"),
                    Err(e) => error!(error = %e, "stream lease check failed"),
                }
            }
        })
    };

    // ── HTTP API ─────────────────────────────────────────────────
    let router = flowgrid_api::build_router(executor);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.http_port));

    info!(%addr, "API server starting");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    let server = axum::serve(listener, router).with_graceful_shutdown(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for shutdown signal");
        }
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    server.await?;

    let _ = assign_handle.await;
    let _ = monitor_handle.await;
    let _ = reaper_handle.await;
    let _ = lease_handle.await;

    info!("coordinator stopped");
    Ok(())
}

/// Run `tick` every `period` until shutdown. A slow tick delays the next
/// one instead of bursting to catch up.
fn spawn_ticker<F, Fut>(
    name: &'static str,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
    mut tick: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    tokio::spawn(async move {
        info!(task = name, period_ms = period.as_millis() as u64, "ticker started");
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => tick().await,
                _ = shutdown.changed() => {
                    info!(task = name, "ticker shutting down");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn ticker_runs_until_shutdown() {
        let (tx, rx) = watch::channel(false);
        let ticks = Arc::new(AtomicU32::new(0));

        let counter = Arc::clone(&ticks);
        let handle = spawn_ticker("test", Duration::from_secs(1), rx, move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_millis(3500)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();

        // Immediate first tick plus one per elapsed second.
        assert_eq!(ticks.load(Ordering::SeqCst), 4);
    }
}
