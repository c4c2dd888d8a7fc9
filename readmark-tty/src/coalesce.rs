use std::time::{Duration, Instant};

/// Event-capture debounce for scroll reports: keeps only the latest value and releases it
/// once no new value has arrived for `window`. Driven by the caller's poll loop.
#[derive(Debug)]
pub struct ScrollCoalescer<T> {
    window: Duration,
    pending: Option<(T, Instant)>,
}

impl<T> ScrollCoalescer<T> {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: None,
        }
    }

    pub fn push(&mut self, value: T, now: Instant) {
        self.pending = Some((value, now));
    }

    /// Returns the pending value once it has been quiet for the full window.
    pub fn poll(&mut self, now: Instant) -> Option<T> {
        let (_, at) = self.pending.as_ref()?;
        if now.saturating_duration_since(*at) < self.window {
            return None;
        }
        self.pending.take().map(|(value, _)| value)
    }

    /// Releases the pending value regardless of the window.
    pub fn flush(&mut self) -> Option<T> {
        self.pending.take().map(|(value, _)| value)
    }

    /// Time left until the pending value is released.
    pub fn time_until_ready(&self, now: Instant) -> Option<Duration> {
        let (_, at) = self.pending.as_ref()?;
        Some(self.window.saturating_sub(now.saturating_duration_since(*at)))
    }
}
