use async_trait::async_trait;
use std::time::Duration;
use tokio::time::Instant;

/// Monotonic high-resolution time source, injectable so scheduler/worker logic
/// can be driven by something other than real wall-clock time in tests.
///
/// Implementations must not use wall-clock time for elapsed measurements.
#[async_trait]
pub trait Clock: Send + Sync + 'static {
    /// Monotonic microsecond timestamp. Not comparable across processes.
    fn now_micros(&self) -> i64;

    /// Park the calling task for at least `dur` when `dur >= 1ms`; for
    /// sub-millisecond durations, yield to other ready tasks instead of
    /// relying on the OS timer's granularity.
    async fn sleep(&self, dur: Duration);
}

/// Default `Clock` backed by `tokio::time`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock {
    epoch: Option<Instant>,
}

impl TokioClock {
    pub fn new() -> Self {
        Self {
            epoch: Some(Instant::now()),
        }
    }
}

#[async_trait]
impl Clock for TokioClock {
    fn now_micros(&self) -> i64 {
        let epoch = self.epoch.unwrap_or_else(Instant::now);
        Instant::now().duration_since(epoch).as_micros() as i64
    }

    async fn sleep(&self, dur: Duration) {
        if dur >= Duration::from_millis(1) {
            tokio::time::sleep(dur).await;
        } else {
            tokio::task::yield_now().await;
        }
    }
}
