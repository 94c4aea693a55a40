// Liveness tracking: last inbound activity plus a sticky failure flag
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Shared between a connection's background threads (which `touch` it when
/// traffic arrives, or `mark_broken` it on a fatal transport error) and the
/// application thread polling `is_timed_out`.
#[derive(Debug)]
pub struct Liveness {
    origin: Instant,
    // Milliseconds since `origin` of the most recent inbound activity
    last_activity_ms: AtomicU64,
    broken: AtomicBool,
    timeout: Duration,
}

impl Liveness {
    /// Creation counts as activity. A zero `timeout` disables the
    /// inactivity check; `mark_broken` still applies.
    pub fn new(timeout: Duration) -> Self {
        Liveness {
            origin: Instant::now(),
            last_activity_ms: AtomicU64::new(0),
            broken: AtomicBool::new(false),
            timeout,
        }
    }

    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }

    pub fn touch(&self) {
        self.last_activity_ms.fetch_max(self.now_ms(), Ordering::Relaxed);
    }

    pub fn mark_broken(&self) {
        self.broken.store(true, Ordering::Relaxed);
    }

    pub fn is_broken(&self) -> bool {
        self.broken.load(Ordering::Relaxed)
    }

    pub fn idle_for(&self) -> Duration {
        let last = self.last_activity_ms.load(Ordering::Relaxed);
        Duration::from_millis(self.now_ms().saturating_sub(last))
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn is_timed_out(&self) -> bool {
        if self.is_broken() {
            return true;
        }
        !self.timeout.is_zero() && self.idle_for() > self.timeout
    }
}
