use chrono::{DateTime, Utc};
use tokio::time::Instant;

/// Last reported reader position.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ReadingSnapshot {
    pub chapter_index: usize,
    pub scroll_offset: f64,
    pub scroll_fraction: f64,
    pub position_fraction: f64,
}

/// Time spent actively viewing one document, measured independently of when saves happen.
#[derive(Debug)]
pub struct ReadingSession {
    document_id: String,
    started_at: DateTime<Utc>,
    started: Instant,
    last_update: Instant,
    last_observed: Option<ReadingSnapshot>,
    active: bool,
}

impl ReadingSession {
    pub fn start(document_id: impl Into<String>) -> Self {
        let now = Instant::now();
        Self {
            document_id: document_id.into(),
            started_at: Utc::now(),
            started: now,
            last_update: now,
            last_observed: None,
            active: true,
        }
    }

    pub fn document_id(&self) -> &str {
        &self.document_id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn last_observed(&self) -> Option<&ReadingSnapshot> {
        self.last_observed.as_ref()
    }

    pub fn last_update(&self) -> Instant {
        self.last_update
    }

    pub fn update(&mut self, snapshot: ReadingSnapshot) {
        if !self.active {
            return;
        }
        self.last_update = Instant::now();
        self.last_observed = Some(snapshot);
    }

    /// Whole seconds since start, or 0 once ended.
    pub fn current_duration_seconds(&self) -> u64 {
        if !self.active {
            return 0;
        }
        self.started.elapsed().as_secs()
    }

    /// Ends the session and returns its whole-second duration. Only the first call reports
    /// time; later calls return 0.
    pub fn end(&mut self) -> u64 {
        if !self.active {
            return 0;
        }
        let duration = self.current_duration_seconds();
        self.active = false;
        duration
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn duration_counts_whole_seconds() {
        let session = ReadingSession::start("n1");
        tokio::time::sleep(Duration::from_millis(2_900)).await;
        assert_eq!(session.current_duration_seconds(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn end_reports_once() {
        let mut session = ReadingSession::start("n1");
        tokio::time::sleep(Duration::from_secs(75)).await;
        assert_eq!(session.end(), 75);
        assert_eq!(session.end(), 0);
        assert!(!session.is_active());
        assert_eq!(session.current_duration_seconds(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn updates_are_ignored_after_end() {
        let mut session = ReadingSession::start("n1");
        let first = ReadingSnapshot {
            chapter_index: 2,
            scroll_offset: 40.0,
            scroll_fraction: 0.1,
            position_fraction: 0.21,
        };
        tokio::time::sleep(Duration::from_secs(1)).await;
        session.update(first);
        assert_eq!(session.last_observed(), Some(&first));
        assert!(session.last_update() > session.started);

        session.end();
        session.update(ReadingSnapshot {
            chapter_index: 9,
            ..first
        });
        assert_eq!(session.last_observed(), Some(&first));
    }

    #[tokio::test(start_paused = true)]
    async fn start_time_is_wall_clock() {
        let before = Utc::now();
        let mut session = ReadingSession::start("n1");
        tokio::time::sleep(Duration::from_secs(5)).await;
        session.end();

        assert!(session.started_at() >= before);
        assert!(session.started_at() <= Utc::now());
    }
}
