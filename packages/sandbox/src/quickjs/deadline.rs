use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

const DISARMED: u64 = u64::MAX;

/// Wall-clock limit shared between the host thread and the QuickJS
/// interrupt handler.
///
/// Once the limit passes, `expired` keeps returning true and the tripped
/// flag stays set until the deadline is re-armed.
#[derive(Clone, Debug)]
pub(crate) struct Deadline {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    origin: Instant,
    limit_ms: AtomicU64,
    tripped: AtomicBool,
}

impl Deadline {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                origin: Instant::now(),
                limit_ms: AtomicU64::new(DISARMED),
                tripped: AtomicBool::new(false),
            }),
        }
    }

    fn elapsed_ms(&self) -> u64 {
        self.inner.origin.elapsed().as_millis() as u64
    }

    /// Start a new phase that may run for `budget` from now.
    pub fn arm(&self, budget: Duration) {
        let limit = self.elapsed_ms().saturating_add(budget.as_millis() as u64);
        self.inner.limit_ms.store(limit, Ordering::SeqCst);
        self.inner.tripped.store(false, Ordering::SeqCst);
    }

    /// Lift the limit, e.g. to read diagnostics after a timeout.
    pub fn disarm(&self) {
        self.inner.limit_ms.store(DISARMED, Ordering::SeqCst);
        self.inner.tripped.store(false, Ordering::SeqCst);
    }

    pub fn expired(&self) -> bool {
        if self.elapsed_ms() >= self.inner.limit_ms.load(Ordering::SeqCst) {
            self.inner.tripped.store(true, Ordering::SeqCst);
            return true;
        }
        false
    }

    /// Whether the interrupt handler has fired since the last `arm`.
    pub fn tripped(&self) -> bool {
        self.inner.tripped.load(Ordering::SeqCst)
    }

    pub fn remaining(&self) -> Duration {
        let limit = self.inner.limit_ms.load(Ordering::SeqCst);
        Duration::from_millis(limit.saturating_sub(self.elapsed_ms()))
    }
}
