//! Sequential audio arbitration.
//!
//! Every caller routes playback through one [`AudioQueue`]; a single driver
//! task owns the playing slot, so at most one clip is audible at any instant.
//! Pending requests are ordered by priority (highest first), ties by arrival.
//! A playing clip is never pre-empted; only [`AudioQueue::stop_all`] cancels it.

use async_trait::async_trait;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::{oneshot, watch, Notify};
use tokio::task::JoinHandle;

use crate::error::PlaybackError;
use crate::metrics::AUDIO_PLAYBACKS_TOTAL;

/// Caller conventions; the queue only compares numbers.
pub mod priority {
    pub const SOUND_EFFECT: i32 = 100;
    pub const FEEDBACK: i32 = 50;
    pub const NARRATION: i32 = 10;
}

/// Host audio primitive.
#[async_trait]
pub trait AudioPlayer: Send + Sync {
    /// Resolves when the clip ends naturally or fails.
    async fn play(&self, source: &str) -> Result<(), PlaybackError>;
    /// Halts and rewinds whatever is currently playing.
    fn stop(&self);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackOutcome {
    Finished,
    Failed(PlaybackError),
    TimedOut,
    /// Cleared or halted by `stop_all`.
    Cancelled,
}

impl PlaybackOutcome {
    fn label(&self) -> &'static str {
        match self {
            PlaybackOutcome::Finished => "finished",
            PlaybackOutcome::Failed(_) => "failed",
            PlaybackOutcome::TimedOut => "timed_out",
            PlaybackOutcome::Cancelled => "cancelled",
        }
    }
}

/// Completion signal for one `play` request.
pub struct PlaybackTicket {
    rx: oneshot::Receiver<PlaybackOutcome>,
}

impl Future for PlaybackTicket {
    type Output = PlaybackOutcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|result| result.unwrap_or(PlaybackOutcome::Cancelled))
    }
}

struct PendingRequest {
    seq: u64,
    source: String,
    priority: i32,
    done: oneshot::Sender<PlaybackOutcome>,
}

#[derive(Default)]
struct QueueState {
    pending: Vec<PendingRequest>,
    next_seq: u64,
    playing: Option<u64>,
    /// Bumped by every `stop_all`.
    epoch: u64,
}

struct Shared {
    state: Mutex<QueueState>,
    wake: Notify,
    stop_tx: watch::Sender<u64>,
    player: Arc<dyn AudioPlayer>,
    timeout: Option<Duration>,
}

impl Shared {
    fn lock_state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_request(&self) -> Option<(PendingRequest, u64)> {
        let mut state = self.lock_state();
        if state.pending.is_empty() {
            return None;
        }
        let request = state.pending.remove(0);
        state.playing = Some(request.seq);
        Some((request, state.epoch))
    }

    fn finish(&self, seq: u64) {
        let mut state = self.lock_state();
        if state.playing == Some(seq) {
            state.playing = None;
        }
    }

    async fn play_one(&self, source: &str, epoch: u64) -> PlaybackOutcome {
        let mut stop_rx = self.stop_tx.subscribe();
        if self.lock_state().epoch != epoch {
            return PlaybackOutcome::Cancelled;
        }

        let playback = async {
            match self.timeout {
                Some(limit) => tokio::time::timeout(limit, self.player.play(source))
                    .await
                    .ok(),
                None => Some(self.player.play(source).await),
            }
        };

        tokio::select! {
            result = playback => match result {
                Some(Ok(())) => PlaybackOutcome::Finished,
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "Audio clip {} failed", source);
                    PlaybackOutcome::Failed(e)
                }
                None => {
                    tracing::warn!("Audio clip {} timed out, freeing playback slot", source);
                    self.player.stop();
                    PlaybackOutcome::TimedOut
                }
            },
            _ = stop_rx.changed() => PlaybackOutcome::Cancelled,
        }
    }
}

async fn run_driver(shared: Arc<Shared>) {
    loop {
        shared.wake.notified().await;

        while let Some((request, epoch)) = shared.next_request() {
            tracing::debug!(
                "Playing audio clip {} (priority {})",
                request.source,
                request.priority
            );
            let outcome = shared.play_one(&request.source, epoch).await;
            shared.finish(request.seq);

            AUDIO_PLAYBACKS_TOTAL
                .with_label_values(&[outcome.label()])
                .inc();
            let _ = request.done.send(outcome);
        }
    }
}

pub struct AudioQueue {
    shared: Arc<Shared>,
    driver: JoinHandle<()>,
}

impl AudioQueue {
    /// Spawns the playback driver; must be called inside a Tokio runtime.
    /// `timeout` frees the slot if the player never calls back.
    pub fn new(player: Arc<dyn AudioPlayer>, timeout: Option<Duration>) -> Self {
        let (stop_tx, _) = watch::channel(0);
        let shared = Arc::new(Shared {
            state: Mutex::new(QueueState::default()),
            wake: Notify::new(),
            stop_tx,
            player,
            timeout,
        });
        let driver = tokio::spawn(run_driver(shared.clone()));
        Self { shared, driver }
    }

    /// Queues `source`. Playback starts once the driver next runs and every
    /// higher-priority (or earlier equal-priority) request has finished.
    pub fn play(&self, source: impl Into<String>, priority: i32) -> PlaybackTicket {
        let (done, rx) = oneshot::channel();
        {
            let mut state = self.shared.lock_state();
            let seq = state.next_seq;
            state.next_seq += 1;
            let position = state
                .pending
                .iter()
                .position(|pending| pending.priority < priority)
                .unwrap_or(state.pending.len());
            state.pending.insert(
                position,
                PendingRequest {
                    seq,
                    source: source.into(),
                    priority,
                    done,
                },
            );
        }
        self.shared.wake.notify_one();
        PlaybackTicket { rx }
    }

    /// Drops every pending request and halts the playing clip. All of their
    /// tickets resolve as `Cancelled`.
    pub fn stop_all(&self) {
        let (drained, was_playing, epoch) = {
            let mut state = self.shared.lock_state();
            state.epoch += 1;
            (
                std::mem::take(&mut state.pending),
                state.playing.is_some(),
                state.epoch,
            )
        };

        let cleared = drained.len();
        for request in drained {
            AUDIO_PLAYBACKS_TOTAL
                .with_label_values(&["cancelled"])
                .inc();
            let _ = request.done.send(PlaybackOutcome::Cancelled);
        }

        self.shared.stop_tx.send_replace(epoch);
        if was_playing {
            self.shared.player.stop();
        }
        tracing::info!(
            "Audio stopped ({} pending cleared, playing={})",
            cleared,
            was_playing
        );
    }

    pub fn is_playing(&self) -> bool {
        self.shared.lock_state().playing.is_some()
    }

    pub fn pending_len(&self) -> usize {
        self.shared.lock_state().pending.len()
    }
}

impl Drop for AudioQueue {
    fn drop(&mut self) {
        self.driver.abort();
    }
}
