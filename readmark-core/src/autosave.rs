//! Write coalescing for one open document.
//!
//! Updates arrive far more often than the store should be written. Each `schedule` replaces
//! the pending record and restarts the debounce timer; when the timer fires the write is
//! further held back until `min_write_interval` has passed since the last successful write.
//! Transient write failures keep the pending record and retry after a fixed backoff,
//! forever. Any other failure also keeps the record but waits for the next update.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, warn};

use crate::config::AutoSaveConfig;
use crate::record::ProgressRecord;
use crate::store::ProgressSink;
use crate::timer::{Timer, TimerTask};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing was pending.
    Idle,
    Saved,
    /// The write failed; the record stays pending.
    Failed,
}

pub struct AutoSaveScheduler {
    shared: Arc<Shared>,
}

struct Shared {
    document_id: String,
    sink: Arc<dyn ProgressSink>,
    config: AutoSaveConfig,
    state: Mutex<SchedulerState>,
}

#[derive(Default)]
struct SchedulerState {
    pending: Option<Pending>,
    next_seq: u64,
    last_write_at: Option<Instant>,
    timer: Timer,
}

#[derive(Clone)]
struct Pending {
    seq: u64,
    record: ProgressRecord,
}

impl AutoSaveScheduler {
    pub fn new(
        document_id: impl Into<String>,
        sink: Arc<dyn ProgressSink>,
        config: AutoSaveConfig,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                document_id: document_id.into(),
                sink,
                config,
                state: Mutex::new(SchedulerState::default()),
            }),
        }
    }

    pub fn document_id(&self) -> &str {
        &self.shared.document_id
    }

    /// Replaces the pending record and restarts the debounce window. Needs a tokio runtime.
    pub fn schedule(&self, record: ProgressRecord) {
        let mut state = self.shared.state.lock();
        state.next_seq += 1;
        let seq = state.next_seq;
        if state.pending.is_some() {
            debug!(document_id = %self.shared.document_id, "coalescing pending update");
        }
        state.pending = Some(Pending { seq, record });
        Shared::arm(&self.shared, &mut state, self.shared.config.debounce_delay);
    }

    /// Writes the pending record now, ignoring both the debounce window and the rate limit.
    pub async fn force_save(&self) -> FlushOutcome {
        let pending = {
            let mut state = self.shared.state.lock();
            state.timer.cancel();
            state.pending.clone()
        };
        match pending {
            None => FlushOutcome::Idle,
            Some(pending) => {
                if Arc::clone(&self.shared).attempt(pending).await {
                    FlushOutcome::Saved
                } else {
                    FlushOutcome::Failed
                }
            }
        }
    }

    /// Cancels the armed timer without writing. A write already in flight still completes.
    pub fn stop(&self) {
        self.shared.state.lock().timer.cancel();
    }

    pub fn pending(&self) -> Option<ProgressRecord> {
        self.shared
            .state
            .lock()
            .pending
            .as_ref()
            .map(|pending| pending.record.clone())
    }

    pub fn last_write_at(&self) -> Option<Instant> {
        self.shared.state.lock().last_write_at
    }

    pub fn is_timer_armed(&self) -> bool {
        self.shared.state.lock().timer.is_armed()
    }
}

impl Drop for AutoSaveScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Shared {
    fn arm(this: &Arc<Self>, state: &mut SchedulerState, delay: Duration) {
        let shared = Arc::clone(this);
        state
            .timer
            .arm(delay, move |generation| shared.fire(generation));
    }

    fn fire(self: Arc<Self>, generation: u64) -> TimerTask {
        Box::pin(async move {
            let pending = {
                let mut state = self.state.lock();
                if !state.timer.claim(generation) {
                    return;
                }
                let Some(pending) = state.pending.clone() else {
                    return;
                };
                if let Some(wait) = self.rate_limit_wait(&state) {
                    debug!(
                        document_id = %self.document_id,
                        wait_ms = wait.as_millis() as u64,
                        "write rate limited, deferring"
                    );
                    Shared::arm(&self, &mut state, wait);
                    return;
                }
                pending
            };
            self.attempt(pending).await;
        })
    }

    fn rate_limit_wait(&self, state: &SchedulerState) -> Option<Duration> {
        let last = state.last_write_at?;
        let elapsed = Instant::now().saturating_duration_since(last);
        self.config.min_write_interval.checked_sub(elapsed).filter(|wait| !wait.is_zero())
    }

    async fn attempt(self: Arc<Self>, pending: Pending) -> bool {
        let started = Instant::now();
        let result = self.sink.persist(&self.document_id, &pending.record).await;

        let mut state = self.state.lock();
        match result {
            Ok(()) => {
                state.last_write_at = Some(started);
                let superseded = state
                    .pending
                    .as_ref()
                    .map_or(true, |current| current.seq != pending.seq);
                if !superseded {
                    state.pending = None;
                }
                debug!(
                    document_id = %self.document_id,
                    chapter = pending.record.chapter_index,
                    position = pending.record.position_fraction,
                    "progress saved"
                );
                true
            }
            Err(err) if err.is_transient() => {
                warn!(
                    document_id = %self.document_id,
                    error = %err,
                    retry_ms = self.config.retry_backoff.as_millis() as u64,
                    "auto-save failed, will retry"
                );
                if !state.timer.is_armed() {
                    Shared::arm(&self, &mut state, self.config.retry_backoff);
                }
                false
            }
            Err(err) => {
                // Kept pending for the next schedule or force save.
                error!(
                    document_id = %self.document_id,
                    error = %err,
                    "auto-save failed, not retrying"
                );
                false
            }
        }
    }
}
