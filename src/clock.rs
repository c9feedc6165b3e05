use crate::model::Ms;

/// Injected time source so slot filtering and completion checks are
/// deterministic under test.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> Ms;
}

/// Wall-clock time, interpreted as operating-timezone milliseconds.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> Ms {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as Ms)
            .unwrap_or(0)
    }
}

/// Manually advanced clock for tests.
#[derive(Debug)]
pub struct ManualClock(std::sync::atomic::AtomicI64);

impl ManualClock {
    pub fn new(start: Ms) -> Self {
        Self(std::sync::atomic::AtomicI64::new(start))
    }

    pub fn set(&self, t: Ms) {
        self.0.store(t, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn advance(&self, by: Ms) {
        self.0.fetch_add(by, std::sync::atomic::Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> Ms {
        self.0.load(std::sync::atomic::Ordering::SeqCst)
    }
}
