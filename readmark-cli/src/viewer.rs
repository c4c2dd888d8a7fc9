use std::time::{Duration, Instant};

use parking_lot::Mutex;
use readmark_core::error::Result as ProgressResult;
use readmark_core::{ProgressError, RestorationTarget};
use readmark_tty::ViewCommand;

/// Where the reader is looking. `scroll_fraction` is 1.0 when the whole chapter fits.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewPosition {
    pub chapter: usize,
    pub top_line: usize,
    pub scroll_fraction: f64,
}

struct Notification {
    text: String,
    expires_at: Instant,
}

struct ViewerState {
    chapter: usize,
    top_line: usize,
    viewport_rows: usize,
    chapter_lines: Vec<usize>,
    laid_out: Vec<bool>,
    notification: Option<Notification>,
    dirty: bool,
}

impl ViewerState {
    fn max_top(&self) -> usize {
        let lines = self.chapter_lines.get(self.chapter).copied().unwrap_or(0);
        lines.saturating_sub(self.viewport_rows)
    }

    fn scroll_by(&mut self, delta: isize) {
        let target = if delta < 0 {
            self.top_line.saturating_sub(delta.unsigned_abs())
        } else {
            self.top_line.saturating_add(delta.unsigned_abs())
        };
        self.set_top(target);
    }

    fn set_top(&mut self, line: usize) {
        let line = line.min(self.max_top());
        if line != self.top_line {
            self.top_line = line;
            self.dirty = true;
        }
    }

    fn set_chapter(&mut self, chapter: usize) {
        let chapter = chapter.min(self.chapter_lines.len().saturating_sub(1));
        if chapter != self.chapter {
            self.chapter = chapter;
            self.top_line = 0;
            self.dirty = true;
        }
    }
}

/// Scroll state of the terminal view, shared between the input loop and the restoration task.
pub struct Viewer {
    state: Mutex<ViewerState>,
}

impl Viewer {
    pub fn new(chapter_lines: Vec<usize>, chapter: usize, viewport_rows: usize) -> Self {
        let chapter_lines = if chapter_lines.is_empty() {
            vec![0]
        } else {
            chapter_lines
        };
        let laid_out = vec![false; chapter_lines.len()];
        let chapter = chapter.min(chapter_lines.len() - 1);
        Self {
            state: Mutex::new(ViewerState {
                chapter,
                top_line: 0,
                viewport_rows: viewport_rows.max(1),
                chapter_lines,
                laid_out,
                notification: None,
                dirty: true,
            }),
        }
    }

    pub fn apply(&self, command: ViewCommand) {
        let mut state = self.state.lock();
        match command {
            ViewCommand::ScrollLines { delta } => state.scroll_by(delta),
            ViewCommand::ScrollPages { delta } => {
                let page = state.viewport_rows.saturating_sub(1).max(1) as isize;
                state.scroll_by(delta.saturating_mul(page));
            }
            ViewCommand::NextChapter { count } => {
                let chapter = state.chapter.saturating_add(count);
                state.set_chapter(chapter);
            }
            ViewCommand::PrevChapter { count } => {
                let chapter = state.chapter.saturating_sub(count);
                state.set_chapter(chapter);
            }
            ViewCommand::Top => state.set_top(0),
            ViewCommand::Bottom => {
                let bottom = state.max_top();
                state.set_top(bottom);
            }
        }
    }

    pub fn position(&self) -> ViewPosition {
        let state = self.state.lock();
        let max_top = state.max_top();
        let scroll_fraction = if max_top == 0 {
            1.0
        } else {
            state.top_line as f64 / max_top as f64
        };
        ViewPosition {
            chapter: state.chapter,
            top_line: state.top_line,
            scroll_fraction,
        }
    }

    /// Updates the text area height, keeping the top line inside the chapter.
    pub fn set_viewport_rows(&self, rows: usize) {
        let mut state = self.state.lock();
        state.viewport_rows = rows.max(1);
        let top = state.top_line;
        state.set_top(top);
    }

    pub fn mark_laid_out(&self, chapter: usize) {
        if let Some(flag) = self.state.lock().laid_out.get_mut(chapter) {
            *flag = true;
        }
    }

    /// Returns whether a redraw was requested since the last call.
    pub fn take_dirty(&self) -> bool {
        std::mem::take(&mut self.state.lock().dirty)
    }

    pub fn mark_dirty(&self) {
        self.state.lock().dirty = true;
    }

    /// The active notification, dropping it once it has expired.
    pub fn notification(&self, now: Instant) -> Option<String> {
        let mut state = self.state.lock();
        match &state.notification {
            Some(notification) if notification.expires_at > now => {
                Some(notification.text.clone())
            }
            Some(_) => {
                state.notification = None;
                state.dirty = true;
                None
            }
            None => None,
        }
    }
}

impl RestorationTarget for Viewer {
    fn displayed_chapter(&self) -> usize {
        self.state.lock().chapter
    }

    fn set_chapter_index(&self, chapter_index: usize) {
        self.state.lock().set_chapter(chapter_index);
    }

    fn show_notification(&self, text: &str, duration: Duration) {
        let mut state = self.state.lock();
        state.notification = Some(Notification {
            text: text.to_owned(),
            expires_at: Instant::now() + duration,
        });
        state.dirty = true;
    }

    fn is_surface_ready(&self, chapter_index: usize) -> bool {
        let state = self.state.lock();
        state.chapter == chapter_index && state.laid_out.get(chapter_index).copied() == Some(true)
    }

    fn scroll_surface(&self, chapter_index: usize, offset: f64) -> ProgressResult<()> {
        let mut state = self.state.lock();
        let ready =
            state.chapter == chapter_index && state.laid_out.get(chapter_index) == Some(&true);
        if !ready {
            return Err(ProgressError::SurfaceNotReady { chapter_index });
        }
        let line = if offset.is_finite() && offset > 0.0 {
            offset.round() as usize
        } else {
            0
        };
        state.set_top(line);
        Ok(())
    }
}
