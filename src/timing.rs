use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Source of monotonic instants for [`Stopwatch`].
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to. Intended for tests.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            origin: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        })
    }

    pub fn advance(&self, by: Duration) {
        let mut offset = self.offset.lock().unwrap_or_else(|e| e.into_inner());
        *offset += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        let offset = *self.offset.lock().unwrap_or_else(|e| e.into_inner());
        self.origin + offset
    }
}

/// Elapsed-time measurement.
///
/// The start instant is read once from the clock; after [`stop`](Self::stop)
/// the elapsed value is frozen and later calls return it unchanged.
#[derive(Clone)]
pub struct Stopwatch {
    clock: Arc<dyn Clock>,
    started: Instant,
    frozen: Option<Duration>,
}

impl std::fmt::Debug for Stopwatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stopwatch")
            .field("elapsed", &self.elapsed())
            .field("running", &self.is_running())
            .finish()
    }
}

impl Stopwatch {
    pub fn start() -> Self {
        Self::start_with(Arc::new(SystemClock))
    }

    pub fn start_with(clock: Arc<dyn Clock>) -> Self {
        let started = clock.now();
        Self {
            clock,
            started,
            frozen: None,
        }
    }

    pub fn elapsed(&self) -> Duration {
        match self.frozen {
            Some(elapsed) => elapsed,
            None => self.clock.now().saturating_duration_since(self.started),
        }
    }

    pub fn elapsed_ms(&self) -> u128 {
        self.elapsed().as_millis()
    }

    /// Stop and return the frozen elapsed time. Idempotent.
    pub fn stop(&mut self) -> Duration {
        let elapsed = self.elapsed();
        self.frozen = Some(elapsed);
        elapsed
    }

    /// Reset to zero and start measuring again.
    pub fn restart(&mut self) {
        self.started = self.clock.now();
        self.frozen = None;
    }

    pub fn is_running(&self) -> bool {
        self.frozen.is_none()
    }

    /// Time a closure on a fresh stopwatch sharing this one's clock.
    pub fn time<T>(&self, f: impl FnOnce() -> T) -> (T, Duration) {
        let mut sw = Stopwatch::start_with(Arc::clone(&self.clock));
        let out = f();
        (out, sw.stop())
    }
}
