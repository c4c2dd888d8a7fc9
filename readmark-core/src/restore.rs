use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, instrument};

use crate::config::RestoreConfig;
use crate::error::Result;
use crate::record::ProgressRecord;

/// Requests the coordinator issues to the presentation layer.
pub trait RestorationTarget: Send + Sync {
    fn displayed_chapter(&self) -> usize;
    fn set_chapter_index(&self, chapter_index: usize);
    fn show_notification(&self, text: &str, duration: Duration);
    /// Whether the surface for `chapter_index` has content laid out and can be scrolled.
    fn is_surface_ready(&self, chapter_index: usize) -> bool;
    fn scroll_surface(&self, chapter_index: usize, offset: f64) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScrollTarget {
    pub chapter_index: usize,
    pub offset: f64,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RestorationPlan {
    pub notification: Option<String>,
    pub chapter_change: Option<usize>,
    pub scroll: Option<ScrollTarget>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreOutcome {
    /// The record carried no scroll offset to apply.
    NothingToRestore,
    /// Offset applied on this (0-based) attempt.
    Restored { attempt: u32 },
    /// The surface never became ready.
    Abandoned,
}

#[derive(Debug, Clone, Default)]
pub struct RestorationCoordinator {
    config: RestoreConfig,
}

impl RestorationCoordinator {
    pub fn new(config: RestoreConfig) -> Self {
        Self { config }
    }

    pub fn plan(&self, record: &ProgressRecord, displayed_chapter: usize) -> RestorationPlan {
        let notification = (record.position_fraction > self.config.notify_threshold)
            .then(|| resume_message(record));
        let chapter_change =
            (record.chapter_index != displayed_chapter).then_some(record.chapter_index);
        let scroll = (record.scroll_offset > 0.0).then_some(ScrollTarget {
            chapter_index: record.chapter_index,
            offset: record.scroll_offset,
        });
        RestorationPlan {
            notification,
            chapter_change,
            scroll,
        }
    }

    /// Wait before the given 0-based attempt.
    pub fn attempt_delay(&self, attempt: u32) -> Duration {
        self.config.first_attempt_delay + self.config.attempt_delay_step * attempt
    }

    #[instrument(skip(self, record, target), fields(document_id = %record.document_id))]
    pub async fn restore(
        &self,
        record: &ProgressRecord,
        target: &dyn RestorationTarget,
    ) -> RestoreOutcome {
        let plan = self.plan(record, target.displayed_chapter());
        if let Some(text) = &plan.notification {
            target.show_notification(text, self.config.notification_duration);
        }
        if let Some(chapter_index) = plan.chapter_change {
            target.set_chapter_index(chapter_index);
        }
        let Some(scroll) = plan.scroll else {
            return RestoreOutcome::NothingToRestore;
        };

        let mut attempt = 0;
        while attempt < self.config.max_attempts {
            tokio::time::sleep(self.attempt_delay(attempt)).await;
            if target.is_surface_ready(scroll.chapter_index) {
                match target.scroll_surface(scroll.chapter_index, scroll.offset) {
                    Ok(()) => {
                        debug!(attempt, "scroll position restored");
                        return RestoreOutcome::Restored { attempt };
                    }
                    Err(err) => debug!(attempt, error = %err, "scroll restore attempt failed"),
                }
            } else {
                debug!(attempt, chapter = scroll.chapter_index, "surface not ready");
            }
            attempt += 1;
        }
        debug!(attempts = attempt, "giving up on scroll restoration");
        RestoreOutcome::Abandoned
    }

    /// Runs [`restore`](Self::restore) as a background task.
    pub fn spawn(
        &self,
        record: ProgressRecord,
        target: Arc<dyn RestorationTarget>,
    ) -> RestorationHandle {
        let coordinator = self.clone();
        RestorationHandle {
            handle: tokio::spawn(
                async move { coordinator.restore(&record, target.as_ref()).await },
            ),
        }
    }
}

pub struct RestorationHandle {
    handle: JoinHandle<RestoreOutcome>,
}

impl RestorationHandle {
    pub fn cancel(&self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// `None` when the task was cancelled.
    pub async fn outcome(self) -> Option<RestoreOutcome> {
        self.handle.await.ok()
    }
}

pub fn resume_message(record: &ProgressRecord) -> String {
    format!(
        "Resuming from {}% (Chapter {})",
        record.percent(),
        record.chapter_index + 1
    )
}
