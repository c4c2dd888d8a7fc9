//! Converts a chapter/scroll position into a single completion fraction.
//!
//! Every chapter owns an equal-width slice (`1 / total_chapters`) of the document regardless
//! of its real length; the within-chapter scroll fraction fills part of the current slice.

/// Position fraction at or above which a document counts as finished.
pub const COMPLETION_THRESHOLD: f64 = 0.95;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Progress {
    pub position_fraction: f64,
    pub completed: bool,
}

/// Overall completion in `[0, 1]`. Zero chapters yields 0 instead of dividing by zero.
pub fn calculate(chapter_index: usize, total_chapters: usize, scroll_fraction: f64) -> f64 {
    if total_chapters == 0 {
        return 0.0;
    }
    let total = total_chapters as f64;
    let chapter_part = chapter_index as f64 / total;
    let within_part = clamp_fraction(scroll_fraction) / total;
    (chapter_part + within_part).min(1.0)
}

pub fn is_completed(position_fraction: f64) -> bool {
    position_fraction >= COMPLETION_THRESHOLD
}

pub fn evaluate(chapter_index: usize, total_chapters: usize, scroll_fraction: f64) -> Progress {
    let position_fraction = calculate(chapter_index, total_chapters, scroll_fraction);
    Progress {
        position_fraction,
        completed: is_completed(position_fraction),
    }
}

/// Clamps to `[0, 1]`, mapping NaN to 0.
pub fn clamp_fraction(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Whole percent, rounding halves up.
pub fn percent(position_fraction: f64) -> u32 {
    (clamp_fraction(position_fraction) * 100.0 + 0.5).floor() as u32
}
