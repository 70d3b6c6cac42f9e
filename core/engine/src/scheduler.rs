//! Periodic and on-demand hybrid tiering sweeps.

use std::future::Future;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

use tessera_common::{Error, Result};
use tessera_storage::hybrid::SweepReport;

enum SweepRequest {
    Sweep(oneshot::Sender<SweepReport>),
    Shutdown,
}

/// Client side of the tiering scheduler.
#[derive(Clone)]
pub struct TieringScheduler {
    request_tx: mpsc::Sender<SweepRequest>,
}

impl TieringScheduler {
    /// Create a scheduler sweeping every `period`.
    pub fn new(period: Duration) -> (Self, TieringSchedulerHandle) {
        let (request_tx, request_rx) = mpsc::channel(16);
        (
            Self { request_tx },
            TieringSchedulerHandle { period, request_rx },
        )
    }

    /// Run a sweep now and wait for its report.
    ///
    /// # Errors
    /// - `Cancelled` if the scheduler is not running
    pub async fn request_sweep(&self) -> Result<SweepReport> {
        let (response_tx, response_rx) = oneshot::channel();
        self.request_tx
            .send(SweepRequest::Sweep(response_tx))
            .await
            .map_err(|_| Error::Cancelled("Tiering scheduler not running".to_string()))?;

        response_rx
            .await
            .map_err(|_| Error::Cancelled("Tiering scheduler stopped mid-sweep".to_string()))
    }

    /// Stop the background task.
    pub async fn shutdown(&self) {
        let _ = self.request_tx.send(SweepRequest::Shutdown).await;
    }
}

/// Background half of the scheduler; spawn [`run`](Self::run).
pub struct TieringSchedulerHandle {
    period: Duration,
    request_rx: mpsc::Receiver<SweepRequest>,
}

impl TieringSchedulerHandle {
    /// Loop until shutdown, calling `sweep_fn` on every tick and request.
    pub async fn run<F, Fut>(mut self, sweep_fn: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = SweepReport> + Send,
    {
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires immediately.
        ticker.tick().await;

        info!("Tiering scheduler started (every {:?})", self.period);

        loop {
            tokio::select! {
                request = self.request_rx.recv() => match request {
                    Some(SweepRequest::Sweep(response_tx)) => {
                        debug!("Processing sweep request");
                        let _ = response_tx.send(sweep_fn().await);
                    }
                    Some(SweepRequest::Shutdown) | None => {
                        info!("Tiering scheduler shutting down");
                        break;
                    }
                },

                _ = ticker.tick() => {
                    let report = sweep_fn().await;
                    if report.candidates > 0 {
                        info!(
                            "Periodic sweep: {} demoted, {} failed of {} candidates",
                            report.demoted, report.failed, report.candidates
                        );
                    }
                }
            }
        }
    }
}
