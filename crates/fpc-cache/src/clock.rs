use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use fpc_types::Stamp;

/// Source of wall-clock time, injected into the store.
pub trait Clock: Send + Sync {
    /// Current time in milliseconds since the UNIX epoch.
    fn now_ms(&self) -> u64;
}

/// The real system clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ms: AtomicU64,
}

impl ManualClock {
    /// Create a clock frozen at `now_ms`.
    pub fn new(now_ms: u64) -> Self {
        Self {
            now_ms: AtomicU64::new(now_ms),
        }
    }

    /// Jump to an absolute time.
    pub fn set(&self, now_ms: u64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }

    /// Move forward by `delta_ms`.
    pub fn advance(&self, delta_ms: u64) {
        self.now_ms.fetch_add(delta_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

/// Issues strictly increasing [`Stamp`]s.
///
/// Hybrid-logical-clock rules over an injected [`Clock`]:
///
/// - **Issue**: `physical = max(wall_clock, last.physical)`. If physical
///   advanced, `logical = 0`; otherwise `logical = last.logical + 1`.
/// - **Observe**: `last = max(last, observed)`, so every later stamp is
///   strictly greater than a stamp loaded from disk.
///
/// A frozen or backwards-running wall clock therefore never reissues a stamp
/// a journal on disk might already carry.
pub struct StampClock {
    clock: Arc<dyn Clock>,
    last: Stamp,
}

impl StampClock {
    /// Wrap a wall clock.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            last: Stamp::zero(),
        }
    }

    /// Issue a fresh stamp.
    pub fn next(&mut self) -> Stamp {
        let wall = self.clock.now_ms();
        let physical_ms = wall.max(self.last.physical_ms);

        let logical = if physical_ms > self.last.physical_ms {
            0
        } else {
            self.last.logical.saturating_add(1)
        };

        self.last = Stamp::new(physical_ms, logical);
        self.last
    }

    /// Record a stamp produced elsewhere.
    pub fn observe(&mut self, stamp: Stamp) {
        if stamp > self.last {
            self.last = stamp;
        }
    }

    /// The most recent stamp issued or observed.
    pub fn last(&self) -> Stamp {
        self.last
    }
}

impl std::fmt::Debug for StampClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StampClock").field("last", &self.last).finish()
    }
}
