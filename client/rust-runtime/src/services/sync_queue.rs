//! Persisted outbox of mutations waiting for the remote store.
//!
//! The queue is the source of truth until the remote side acknowledges an
//! item. Every enqueue is written through before returning, and each
//! acknowledged item is removed on its own, so a crash mid-flush leaves only
//! the unsent remainder.

use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use super::remote::SyncSink;
use crate::error::StoreError;
use crate::metrics::{SYNC_FLUSHES_TOTAL, SYNC_ITEMS_TOTAL, SYNC_QUEUE_DEPTH};
use crate::models::{QueuedSyncItem, SyncPayload};
use crate::storage::{read_json, write_json, KeyValueStore};

pub const SYNC_QUEUE_KEY: &str = "sync:queue";

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FlushReport {
    pub attempted: usize,
    pub sent: usize,
    pub failed: usize,
    /// Another flush was already running; nothing was sent.
    pub skipped: bool,
}

pub struct SyncQueue {
    store: Arc<dyn KeyValueStore>,
    write_lock: Mutex<()>,
    flushing: AtomicBool,
}

struct FlushGuard<'a>(&'a AtomicBool);

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl SyncQueue {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            write_lock: Mutex::new(()),
            flushing: AtomicBool::new(false),
        }
    }

    /// Appends a new item and persists the queue before returning it.
    pub fn enqueue(&self, payload: SyncPayload) -> Result<QueuedSyncItem, StoreError> {
        let item = QueuedSyncItem {
            id: Uuid::new_v4().to_string(),
            kind: payload.kind(),
            payload: payload.to_value()?,
            created_at: Utc::now(),
        };

        let _guard = self.write_lock.lock().map_err(|_| StoreError::Poisoned)?;
        let mut items = self.load()?;
        items.push(item.clone());
        self.save(&items)?;

        tracing::debug!(
            "Enqueued {} sync item {} ({} pending)",
            item.kind.as_str(),
            item.id,
            items.len()
        );
        Ok(item)
    }

    pub fn pending(&self) -> Result<Vec<QueuedSyncItem>, StoreError> {
        let _guard = self.write_lock.lock().map_err(|_| StoreError::Poisoned)?;
        self.load()
    }

    pub fn len(&self) -> Result<usize, StoreError> {
        Ok(self.pending()?.len())
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }

    pub fn is_flushing(&self) -> bool {
        self.flushing.load(Ordering::Acquire)
    }

    /// Sends a snapshot of the queue in enqueue order. At most one flush runs
    /// at a time; a concurrent call returns a skipped report. Failed items stay
    /// queued and do not stop the pass. Items enqueued during the pass wait for
    /// the next flush.
    pub async fn flush(&self, sink: &dyn SyncSink) -> FlushReport {
        if self
            .flushing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("Sync flush already in progress, skipping");
            SYNC_FLUSHES_TOTAL.with_label_values(&["skipped"]).inc();
            return FlushReport {
                skipped: true,
                ..FlushReport::default()
            };
        }
        let _flushing = FlushGuard(&self.flushing);

        let snapshot = match self.pending() {
            Ok(items) => items,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read sync queue, flush deferred");
                SYNC_FLUSHES_TOTAL.with_label_values(&["error"]).inc();
                return FlushReport::default();
            }
        };

        let mut report = FlushReport {
            attempted: snapshot.len(),
            ..FlushReport::default()
        };

        for item in &snapshot {
            match sink.send(item).await {
                Ok(()) => {
                    report.sent += 1;
                    SYNC_ITEMS_TOTAL
                        .with_label_values(&[item.kind.as_str(), "sent"])
                        .inc();
                    if let Err(e) = self.remove(&item.id) {
                        // Left in place; the remote side tolerates redelivery.
                        tracing::warn!(error = %e, "Failed to remove acknowledged sync item {}", item.id);
                    }
                }
                Err(e) => {
                    report.failed += 1;
                    SYNC_ITEMS_TOTAL
                        .with_label_values(&[item.kind.as_str(), "failed"])
                        .inc();
                    tracing::warn!(error = %e, "Sync item {} not delivered, keeping it queued", item.id);
                }
            }
        }

        let status = if report.failed == 0 { "complete" } else { "partial" };
        SYNC_FLUSHES_TOTAL.with_label_values(&[status]).inc();
        if report.attempted > 0 {
            tracing::info!(
                "Sync flush finished: {} sent, {} failed",
                report.sent,
                report.failed
            );
        }
        report
    }

    /// Drops every queued item ("reset my data").
    pub fn clear(&self) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().map_err(|_| StoreError::Poisoned)?;
        self.store.remove(SYNC_QUEUE_KEY)?;
        SYNC_QUEUE_DEPTH.set(0);
        tracing::info!("Sync queue cleared");
        Ok(())
    }

    fn remove(&self, id: &str) -> Result<bool, StoreError> {
        let _guard = self.write_lock.lock().map_err(|_| StoreError::Poisoned)?;
        let mut items = self.load()?;
        let before = items.len();
        items.retain(|item| item.id != id);
        if items.len() == before {
            return Ok(false);
        }
        self.save(&items)?;
        Ok(true)
    }

    fn load(&self) -> Result<Vec<QueuedSyncItem>, StoreError> {
        Ok(read_json(self.store.as_ref(), SYNC_QUEUE_KEY)?.unwrap_or_default())
    }

    fn save(&self, items: &[QueuedSyncItem]) -> Result<(), StoreError> {
        write_json(self.store.as_ref(), SYNC_QUEUE_KEY, items)?;
        SYNC_QUEUE_DEPTH.set(items.len() as i64);
        Ok(())
    }
}
