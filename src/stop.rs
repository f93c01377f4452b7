use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Cooperative stop request shared between the session and whoever may
/// interrupt it (Ctrl-C handler, tests).
///
/// Suspension points sleep through [`StopSignal::sleep`] so a stop request
/// wakes them immediately instead of after the full wait.
#[derive(Clone, Default)]
pub struct StopSignal {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        let (lock, cvar) = &*self.inner;
        *self.flag(lock) = true;
        cvar.notify_all();
    }

    pub fn is_triggered(&self) -> bool {
        let (lock, _) = &*self.inner;
        *self.flag(lock)
    }

    /// Sleeps for `duration` unless stopped first.
    /// Returns `true` if the full duration elapsed.
    pub fn sleep(&self, duration: Duration) -> bool {
        let (lock, cvar) = &*self.inner;
        let deadline = Instant::now() + duration;
        let mut stopped = self.flag(lock);
        while !*stopped {
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            stopped = cvar
                .wait_timeout(stopped, deadline - now)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|poisoned| poisoned.into_inner().0);
        }
        false
    }

    fn flag<'a>(&self, lock: &'a Mutex<bool>) -> MutexGuard<'a, bool> {
        lock.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    #[test]
    fn sleep_completes_when_not_stopped() {
        let stop = StopSignal::new();
        assert!(stop.sleep(Duration::from_millis(5)));
        assert!(!stop.is_triggered());
    }
    #[test]
    fn trigger_wakes_a_sleeper_early() {
        let stop = StopSignal::new();
        let remote = stop.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            remote.trigger();
        });
        let started = Instant::now();
        assert!(!stop.sleep(Duration::from_secs(10)));
        assert!(started.elapsed() < Duration::from_secs(5));
        handle.join().unwrap();
        assert!(stop.is_triggered());
    }
    #[test]
    fn sleep_returns_immediately_once_stopped() {
        let stop = StopSignal::new();
        stop.trigger();
        assert!(!stop.sleep(Duration::from_secs(10)));
    }
}
