use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tokio::task::JoinHandle;

pub type TimerTask = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// A single cancelable one-shot timer slot. Arming replaces whatever was armed before, so at
/// most one callback is ever pending.
///
/// Each arming gets a generation number. The callback must call [`Timer::claim`] with its
/// generation before doing work; once claimed the callback can no longer be aborted by
/// [`Timer::cancel`] and runs to completion.
#[derive(Debug, Default)]
pub struct Timer {
    generation: u64,
    handle: Option<JoinHandle<()>>,
}

impl Timer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Must be called from within a tokio runtime.
    pub fn arm<F>(&mut self, delay: Duration, task: F) -> u64
    where
        F: FnOnce(u64) -> TimerTask,
    {
        self.cancel();
        self.generation = self.generation.wrapping_add(1);
        let generation = self.generation;
        let callback = task(generation);
        self.handle = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            callback.await;
        }));
        generation
    }

    pub fn cancel(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    /// Detaches the timer if `generation` is still the armed one. Returns false for stale
    /// callbacks, which must then do nothing.
    pub fn claim(&mut self, generation: u64) -> bool {
        if self.generation == generation && self.handle.is_some() {
            self.handle = None;
            true
        } else {
            false
        }
    }

    pub fn is_armed(&self) -> bool {
        self.handle.is_some()
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use parking_lot::Mutex;

    fn recording(log: &Arc<Mutex<Vec<u64>>>) -> impl FnOnce(u64) -> TimerTask {
        let log = Arc::clone(log);
        move |generation| {
            Box::pin(async move {
                log.lock().push(generation);
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn rearming_cancels_previous_callback() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut timer = Timer::new();
        timer.arm(Duration::from_millis(100), recording(&log));
        let second = timer.arm(Duration::from_millis(100), recording(&log));

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(*log.lock(), vec![second]);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_prevents_firing() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut timer = Timer::new();
        timer.arm(Duration::from_millis(100), recording(&log));
        assert!(timer.is_armed());
        timer.cancel();
        assert!(!timer.is_armed());

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(log.lock().is_empty());
    }

    #[test]
    fn stale_generations_cannot_claim() {
        let mut timer = Timer::new();
        assert!(!timer.claim(0));
        assert!(!timer.claim(1));
    }
}
