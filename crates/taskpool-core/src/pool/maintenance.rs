//! Background maintenance: periodic rebalance and metrics refresh.
//!
//! Each loop is a tokio task driven by `interval`; a shared `watch` channel
//! stops both. A late tick pushes the schedule back instead of firing a burst.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use super::manager::TaskPoolManager;

/// Handle for the periodic rebalance and metrics loops.
/// - dropping the handle stops both loops at their next wakeup
/// - `shutdown_and_join()` stops them and waits
pub struct MaintenanceHandle {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl MaintenanceHandle {
    /// Ask both loops to stop after their current tick.
    pub fn request_shutdown(&self) {
        // receivers may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    /// Stop both loops and wait for them.
    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for j in self.joins {
            let _ = j.await;
        }
    }
}

/// Start the rebalance loop (`rebalance_interval_secs`) and the metrics loop
/// (`metrics_interval_secs`). The first run of each happens one full interval
/// after spawning.
pub fn spawn_maintenance(pool: TaskPoolManager) -> MaintenanceHandle {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let config = pool.config().clone();

    let rebalance = {
        let pool = pool.clone();
        spawn_ticker(
            "rebalance",
            config.rebalance_interval(),
            shutdown_rx.clone(),
            move || {
                let pool = pool.clone();
                async move {
                    pool.rebalance().await;
                }
            },
        )
    };

    let metrics = spawn_ticker(
        "metrics",
        config.metrics_interval(),
        shutdown_rx,
        move || {
            let pool = pool.clone();
            async move {
                pool.refresh_metrics().await;
            }
        },
    );

    info!(
        rebalance_secs = config.rebalance_interval_secs,
        metrics_secs = config.metrics_interval_secs,
        "maintenance loops started"
    );
    MaintenanceHandle {
        shutdown_tx,
        joins: vec![rebalance, metrics],
    }
}

fn spawn_ticker<F, Fut>(
    name: &'static str,
    period: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
    mut tick: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // interval() fires immediately; skip that one
        interval.tick().await;

        loop {
            if *shutdown_rx.borrow() {
                break;
            }
            tokio::select! {
                // shutdown requested, or the handle was dropped
                _ = shutdown_rx.changed() => break,
                _ = interval.tick() => {
                    tick().await;
                }
            }
        }
        debug!(loop_name = name, "maintenance loop stopped");
    })
}
