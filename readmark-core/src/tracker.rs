use std::sync::Arc;

use tracing::{debug, info, instrument};

use crate::autosave::{AutoSaveScheduler, FlushOutcome};
use crate::calculator;
use crate::config::AutoSaveConfig;
use crate::record::ProgressRecord;
use crate::session::{ReadingSession, ReadingSnapshot};
use crate::store::ProgressSink;

/// Progress bookkeeping for one open document: a reading session plus its auto-save
/// scheduler. Create it when the document opens and call [`close`](Self::close) when it
/// goes away.
pub struct ReadingTracker {
    document_id: String,
    total_chapters: usize,
    prior_time_spent: u64,
    session: ReadingSession,
    autosave: AutoSaveScheduler,
    last: ReadingSnapshot,
    closed: bool,
}

impl ReadingTracker {
    pub fn open(
        document_id: impl Into<String>,
        total_chapters: usize,
        initial: Option<&ProgressRecord>,
        sink: Arc<dyn ProgressSink>,
        config: AutoSaveConfig,
    ) -> Self {
        let document_id = document_id.into();
        let total_chapters = total_chapters.max(1);
        let last = initial
            .map(|record| seed_snapshot(record, total_chapters))
            .unwrap_or_default();
        let prior_time_spent = initial.map_or(0, |record| record.time_spent_seconds);
        debug!(%document_id, total_chapters, prior_time_spent, "opening reading tracker");
        Self {
            session: ReadingSession::start(document_id.clone()),
            autosave: AutoSaveScheduler::new(document_id.clone(), sink, config),
            document_id,
            total_chapters,
            prior_time_spent,
            last,
            closed: false,
        }
    }

    pub fn document_id(&self) -> &str {
        &self.document_id
    }

    pub fn total_chapters(&self) -> usize {
        self.total_chapters
    }

    pub fn session(&self) -> &ReadingSession {
        &self.session
    }

    pub fn autosave(&self) -> &AutoSaveScheduler {
        &self.autosave
    }

    pub fn last_observed(&self) -> ReadingSnapshot {
        self.last
    }

    pub fn position_fraction(&self) -> f64 {
        self.last.position_fraction
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// A scroll position reported by the view. Ignored after close.
    pub fn report_scroll(
        &mut self,
        scroll_offset: f64,
        chapter_index: usize,
        scroll_fraction: f64,
    ) {
        if self.closed {
            return;
        }
        let record = ProgressRecord::at_position(
            self.document_id.as_str(),
            chapter_index,
            self.total_chapters,
            scroll_offset,
            scroll_fraction,
        );
        self.last = ReadingSnapshot {
            chapter_index: record.chapter_index,
            scroll_offset: record.scroll_offset,
            scroll_fraction: record.scroll_fraction,
            position_fraction: record.position_fraction,
        };
        self.session.update(self.last);
        self.autosave
            .schedule(record.with_time_spent(self.time_spent(0)));
    }

    /// The view moved to another chapter; its scroll position starts over at the top.
    pub fn change_chapter(&mut self, chapter_index: usize) {
        if chapter_index == self.last.chapter_index {
            return;
        }
        self.report_scroll(0.0, chapter_index, 0.0);
    }

    pub fn current_record(&self) -> ProgressRecord {
        self.record_with_time(self.time_spent(0))
    }

    /// Ends the session, then force-saves the final position and stops the scheduler.
    /// Later calls do nothing.
    #[instrument(skip(self), fields(document_id = %self.document_id))]
    pub async fn close(&mut self) -> FlushOutcome {
        if self.closed {
            return FlushOutcome::Idle;
        }
        self.closed = true;
        let session_seconds = self.session.end();
        let record = self.record_with_time(self.time_spent(session_seconds));
        let time_spent = record.time_spent_seconds;
        self.autosave.schedule(record);
        let outcome = self.autosave.force_save().await;
        self.autosave.stop();
        info!(
            started_at = %self.session.started_at(),
            session_seconds,
            time_spent,
            ?outcome,
            "reading tracker closed"
        );
        outcome
    }

    fn time_spent(&self, additional: u64) -> u64 {
        self.prior_time_spent + self.session.current_duration_seconds() + additional
    }

    fn record_with_time(&self, time_spent_seconds: u64) -> ProgressRecord {
        ProgressRecord::at_position(
            self.document_id.as_str(),
            self.last.chapter_index,
            self.total_chapters,
            self.last.scroll_offset,
            self.last.scroll_fraction,
        )
        .with_time_spent(time_spent_seconds)
    }
}

/// Position to resume from. A saved chapter past the end of the document (it has since
/// lost chapters) falls back to the top of the last chapter.
fn seed_snapshot(record: &ProgressRecord, total_chapters: usize) -> ReadingSnapshot {
    if record.chapter_index >= total_chapters {
        let chapter_index = total_chapters - 1;
        return ReadingSnapshot {
            chapter_index,
            scroll_offset: 0.0,
            scroll_fraction: 0.0,
            position_fraction: calculator::calculate(chapter_index, total_chapters, 0.0),
        };
    }
    ReadingSnapshot {
        chapter_index: record.chapter_index,
        scroll_offset: record.scroll_offset,
        scroll_fraction: record.scroll_fraction,
        position_fraction: calculator::calculate(
            record.chapter_index,
            total_chapters,
            record.scroll_fraction,
        ),
    }
}
