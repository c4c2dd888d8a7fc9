use std::time::{Duration, Instant};

use readmark_core::ReadingTracker;
use readmark_tty::ScrollCoalescer;

use crate::viewer::ViewPosition;

/// Feeds view positions to the tracker. Chapter changes are reported at once; scrolling goes
/// through the coalescer.
pub struct ScrollCapture {
    coalescer: ScrollCoalescer<ViewPosition>,
    reported: ViewPosition,
}

impl ScrollCapture {
    pub fn new(window: Duration, initial: ViewPosition) -> Self {
        Self {
            coalescer: ScrollCoalescer::new(window),
            reported: initial,
        }
    }

    /// With `hold` set the position is taken as already known and nothing is reported. The
    /// restoration task moves the view this way.
    pub fn observe(
        &mut self,
        position: ViewPosition,
        now: Instant,
        hold: bool,
        tracker: &mut ReadingTracker,
    ) {
        if hold {
            self.coalescer.flush();
            self.reported = position;
            return;
        }
        if position != self.reported {
            if position.chapter != self.reported.chapter {
                if let Some(pending) = self.coalescer.flush() {
                    report(tracker, pending);
                }
                tracker.change_chapter(position.chapter);
            }
            self.coalescer.push(position, now);
            self.reported = position;
        }
        if let Some(settled) = self.coalescer.poll(now) {
            report(tracker, settled);
        }
    }

    /// How long the caller may wait before the next coalesced report is due.
    pub fn next_deadline(&self, now: Instant) -> Option<Duration> {
        self.coalescer.time_until_ready(now)
    }

    pub fn finish(&mut self, tracker: &mut ReadingTracker) {
        if let Some(pending) = self.coalescer.flush() {
            report(tracker, pending);
        }
    }
}

fn report(tracker: &mut ReadingTracker, position: ViewPosition) {
    tracker.report_scroll(
        position.top_line as f64,
        position.chapter,
        position.scroll_fraction,
    );
}
