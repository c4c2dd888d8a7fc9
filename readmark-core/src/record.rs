use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::calculator::{self, clamp_fraction};

/// Persisted snapshot of where a reader is within one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProgressRecord {
    pub document_id: String,
    pub position_fraction: f64,
    pub chapter_index: usize,
    pub scroll_offset: f64,
    pub scroll_fraction: f64,
    pub last_read_at: DateTime<Utc>,
    pub completed: bool,
    pub total_chapters: usize,
    pub time_spent_seconds: u64,
}

impl Default for ProgressRecord {
    fn default() -> Self {
        Self {
            document_id: String::new(),
            position_fraction: 0.0,
            chapter_index: 0,
            scroll_offset: 0.0,
            scroll_fraction: 0.0,
            last_read_at: Utc::now(),
            completed: false,
            total_chapters: 1,
            time_spent_seconds: 0,
        }
    }
}

/// Partial payload; every absent field falls back to the record default.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressUpdate {
    pub position_fraction: Option<f64>,
    pub chapter_index: Option<usize>,
    pub scroll_offset: Option<f64>,
    pub scroll_fraction: Option<f64>,
    pub last_read_at: Option<DateTime<Utc>>,
    pub total_chapters: Option<usize>,
    pub time_spent_seconds: Option<u64>,
}

impl ProgressRecord {
    /// Builds a record from a reader position, deriving the position fraction.
    pub fn at_position(
        document_id: impl Into<String>,
        chapter_index: usize,
        total_chapters: usize,
        scroll_offset: f64,
        scroll_fraction: f64,
    ) -> Self {
        let scroll_fraction = clamp_fraction(scroll_fraction);
        let progress = calculator::evaluate(chapter_index, total_chapters, scroll_fraction);
        Self {
            document_id: document_id.into(),
            position_fraction: progress.position_fraction,
            chapter_index,
            scroll_offset: sanitize_offset(scroll_offset),
            scroll_fraction,
            last_read_at: Utc::now(),
            completed: progress.completed,
            total_chapters: total_chapters.max(1),
            time_spent_seconds: 0,
        }
    }

    pub fn from_update(document_id: impl Into<String>, update: ProgressUpdate) -> Self {
        let record = Self {
            document_id: document_id.into(),
            position_fraction: update.position_fraction.unwrap_or(0.0),
            chapter_index: update.chapter_index.unwrap_or(0),
            scroll_offset: update.scroll_offset.unwrap_or(0.0),
            scroll_fraction: update.scroll_fraction.unwrap_or(0.0),
            last_read_at: update.last_read_at.unwrap_or_else(Utc::now),
            completed: false,
            total_chapters: update.total_chapters.unwrap_or(1),
            time_spent_seconds: update.time_spent_seconds.unwrap_or(0),
        };
        record.normalized()
    }

    pub fn with_time_spent(mut self, seconds: u64) -> Self {
        self.time_spent_seconds = seconds;
        self
    }

    /// Clamps every field into its valid range and re-derives `completed`.
    pub fn normalized(mut self) -> Self {
        self.position_fraction = clamp_fraction(self.position_fraction);
        self.scroll_fraction = clamp_fraction(self.scroll_fraction);
        self.scroll_offset = sanitize_offset(self.scroll_offset);
        self.total_chapters = self.total_chapters.max(1);
        self.completed = calculator::is_completed(self.position_fraction);
        self
    }

    pub fn percent(&self) -> u32 {
        calculator::percent(self.position_fraction)
    }
}

fn sanitize_offset(offset: f64) -> f64 {
    if offset.is_finite() && offset > 0.0 {
        offset
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_update_fills_defaults() {
        let record = ProgressRecord::from_update("n1", ProgressUpdate::default());
        assert_eq!(record.document_id, "n1");
        assert_eq!(record.position_fraction, 0.0);
        assert_eq!(record.chapter_index, 0);
        assert_eq!(record.scroll_offset, 0.0);
        assert_eq!(record.total_chapters, 1);
        assert_eq!(record.time_spent_seconds, 0);
        assert!(!record.completed);
    }

    #[test]
    fn update_values_are_sanitized() {
        let update = ProgressUpdate {
            position_fraction: Some(1.4),
            scroll_offset: Some(-20.0),
            scroll_fraction: Some(f64::NAN),
            total_chapters: Some(0),
            ..ProgressUpdate::default()
        };
        let record = ProgressRecord::from_update("n1", update);
        assert_eq!(record.position_fraction, 1.0);
        assert_eq!(record.scroll_offset, 0.0);
        assert_eq!(record.scroll_fraction, 0.0);
        assert_eq!(record.total_chapters, 1);
        assert!(record.completed);
    }

    #[test]
    fn at_position_derives_fraction() {
        let record = ProgressRecord::at_position("n1", 3, 10, 120.0, 0.5);
        assert!((record.position_fraction - 0.35).abs() < 1e-9);
        assert_eq!(record.chapter_index, 3);
        assert_eq!(record.scroll_offset, 120.0);
        assert!(!record.completed);
    }

    #[test]
    fn missing_fields_deserialize_to_defaults() {
        let record: ProgressRecord =
            serde_json::from_str(r#"{"documentId":"n1","chapterIndex":2}"#).unwrap();
        assert_eq!(record.chapter_index, 2);
        assert_eq!(record.total_chapters, 1);
        assert_eq!(record.scroll_fraction, 0.0);
        assert!(!record.completed);
    }

    #[test]
    fn serializes_with_camel_case_keys() {
        let record = ProgressRecord::at_position("n1", 0, 2, 0.0, 0.0);
        let value = serde_json::to_value(&record).unwrap();
        assert!(value.get("positionFraction").is_some());
        assert!(value.get("timeSpentSeconds").is_some());
        assert!(value.get("position_fraction").is_none());
    }
}
