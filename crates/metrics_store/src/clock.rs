use std::time::{
    SystemTime,
    UNIX_EPOCH,
};

use crate::types::TimestampMs;

/// Source of "now" for retention cutoffs.
pub trait Clock: Send + Sync + 'static {
    fn now_ms(&self) -> TimestampMs;
}

#[derive(Copy, Clone, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> TimestampMs {
        // A clock before the epoch is treated as the epoch.
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as TimestampMs)
            .unwrap_or(0)
    }
}

#[cfg(any(test, feature = "testing"))]
pub use manual::ManualClock;

#[cfg(any(test, feature = "testing"))]
mod manual {
    use std::sync::{
        atomic::{
            AtomicI64,
            Ordering,
        },
        Arc,
    };

    use super::Clock;
    use crate::types::TimestampMs;

    /// Clock that only moves when told to. Clones share the same time.
    #[derive(Clone, Debug, Default)]
    pub struct ManualClock {
        now: Arc<AtomicI64>,
    }

    impl ManualClock {
        pub fn new(now: TimestampMs) -> Self {
            Self {
                now: Arc::new(AtomicI64::new(now)),
            }
        }

        pub fn set(&self, now: TimestampMs) {
            self.now.store(now, Ordering::SeqCst);
        }

        pub fn advance(&self, by_ms: i64) {
            self.now.fetch_add(by_ms, Ordering::SeqCst);
        }
    }

    impl Clock for ManualClock {
        fn now_ms(&self) -> TimestampMs {
            self.now.load(Ordering::SeqCst)
        }
    }
}
