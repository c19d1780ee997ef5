use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

use super::remote::SyncSink;
use super::sync_queue::{FlushReport, SyncQueue};

/// Flushes the outbox on a fixed interval.
pub struct SyncWorker {
    queue: Arc<SyncQueue>,
    sink: Arc<dyn SyncSink>,
    interval: Duration,
}

impl SyncWorker {
    pub fn new(queue: Arc<SyncQueue>, sink: Arc<dyn SyncSink>, interval: Duration) -> Self {
        Self {
            queue,
            sink,
            interval,
        }
    }

    pub async fn run(&self) {
        self.run_until(std::future::pending::<()>()).await
    }

    /// Ticks until `shutdown` resolves; an in-progress flush is finished first.
    pub async fn run_until<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        info!(
            "Starting sync worker loop (interval {}s)",
            self.interval.as_secs()
        );
        tokio::pin!(shutdown);

        loop {
            let report = self.run_once().await;
            if report.failed > 0 {
                warn!(
                    "Sync worker tick left {} items queued for retry",
                    report.failed
                );
            }

            tokio::select! {
                _ = &mut shutdown => {
                    info!("Sync worker shutting down");
                    return;
                }
                _ = sleep(self.interval) => {}
            }
        }
    }

    pub async fn run_once(&self) -> FlushReport {
        self.queue.flush(self.sink.as_ref()).await
    }
}
