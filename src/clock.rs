use std::cell::Cell;
use std::rc::Rc;
use std::time::Instant;

/// Monotonic session time in seconds.
///
/// Every stateful component takes `now` as an argument instead of reading a
/// global clock, so the session decides where time comes from.
pub trait Clock {
    fn now(&self) -> f64;
}

/// Seconds elapsed since construction.
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

/// Hand-driven clock. Clones share the same time.
#[derive(Clone, Default)]
pub struct ManualClock {
    now: Rc<Cell<f64>>,
}

impl ManualClock {
    pub fn new(start: f64) -> Self {
        Self {
            now: Rc::new(Cell::new(start)),
        }
    }

    pub fn set(&self, seconds: f64) {
        self.now.set(seconds);
    }

    pub fn advance(&self, seconds: f64) {
        self.now.set(self.now.get() + seconds);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> f64 {
        self.now.get()
    }
}
