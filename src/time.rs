//! Monotonic clock and synchronization primitives (spec.md §4.A).
//!
//! `Instant` is already monotonic on every tier-1 target, but the original
//! `OSTime`/`OSThread::Sleep` pairing (`CFCore/OSThread.cpp`) was written
//! against a wall clock that could jump backward, and `Sleep` explicitly
//! bails out when it detects that. We keep the same defensive shape here:
//! nothing downstream should need to reason about clock monotonicity itself,
//! but `sleep` still treats "elapsed went backward" as "done" rather than
//! looping forever.

use std::sync::{Condvar as StdCondvar, Mutex as StdMutex, MutexGuard};
use std::time::{Duration, Instant};

/// Milliseconds elapsed since an arbitrary but fixed process-wide epoch.
pub fn monotonic_millis() -> i64 {
    EPOCH.elapsed().as_millis() as i64
}

/// Microseconds elapsed since the same epoch as [`monotonic_millis`].
pub fn monotonic_micros() -> i64 {
    EPOCH.elapsed().as_micros() as i64
}

static EPOCH_ONCE: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();

struct Epoch;
impl std::ops::Deref for Epoch {
    type Target = Instant;
    fn deref(&self) -> &Instant {
        EPOCH_ONCE.get_or_init(Instant::now)
    }
}
static EPOCH: Epoch = Epoch;

/// A plain, non-recursive mutex with a scoped-acquisition guard that always
/// releases on drop, matching the original's `OSMutexLocker` RAII wrapper
/// (`OSMutexLocker locker(&sMaxFDPosMutex)` in `epollev.cpp`) — `Drop`
/// already gives us that for free, including on an unwind.
pub struct Mutex<T> {
    inner: StdMutex<T>,
}

impl<T> Mutex<T> {
    pub fn new(value: T) -> Self {
        Mutex {
            inner: StdMutex::new(value),
        }
    }

    /// Acquires the lock, recovering from poisoning the way a long-lived
    /// scheduler process must: a panic inside one task's critical section
    /// must not wedge every other task that shares this lock forever.
    pub fn lock(&self) -> MutexGuard<'_, T> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// A condition variable bound to one [`Mutex`], exposing a `wait` that can
/// distinguish "timed out" from "woken up" the way spec §4.A requires.
pub struct Condvar {
    inner: StdCondvar,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitResult {
    Signalled,
    TimedOut,
}

impl Condvar {
    pub fn new() -> Self {
        Condvar {
            inner: StdCondvar::new(),
        }
    }

    pub fn wait<'a, T>(
        &self,
        guard: MutexGuard<'a, T>,
        timeout_millis: u64,
    ) -> (MutexGuard<'a, T>, WaitResult) {
        let (guard, timed_out) = match self
            .inner
            .wait_timeout(guard, Duration::from_millis(timeout_millis))
        {
            Ok((guard, result)) => (guard, result.timed_out()),
            Err(poisoned) => {
                let (guard, result) = poisoned.into_inner();
                (guard, result.timed_out())
            }
        };
        let result = if timed_out {
            WaitResult::TimedOut
        } else {
            WaitResult::Signalled
        };
        (guard, result)
    }

    pub fn signal(&self) {
        self.inner.notify_one();
    }

    pub fn broadcast(&self) {
        self.inner.notify_all();
    }
}

impl Default for Condvar {
    fn default() -> Self {
        Condvar::new()
    }
}

/// Blocks the calling thread for at least `ms` monotonic milliseconds,
/// robust against spurious early wakeup — translated directly from
/// `OSThread::Sleep`'s `do { ... usleep ... } while (timeSlept < inMsec)`
/// loop, including its early-exit when the clock appears to run backward.
pub fn sleep(ms: u64) {
    if ms == 0 {
        return;
    }
    let start = monotonic_millis();
    loop {
        let slept = monotonic_millis() - start;
        if slept < 0 {
            // Clock moved backward; original OSThread::Sleep bails here too.
            return;
        }
        let remaining = ms as i64 - slept;
        if remaining < 1 {
            return;
        }
        std::thread::sleep(Duration::from_millis(remaining as u64));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monotonic_never_goes_backward() {
        let a = monotonic_millis();
        std::thread::sleep(Duration::from_millis(5));
        let b = monotonic_millis();
        assert!(b >= a);
    }

    #[test]
    fn sleep_lower_bound() {
        let start = monotonic_millis();
        sleep(30);
        let elapsed = monotonic_millis() - start;
        assert!(elapsed >= 30, "elapsed={elapsed}");
    }

    #[test]
    fn sleep_zero_returns_immediately() {
        let start = monotonic_millis();
        sleep(0);
        assert!(monotonic_millis() - start < 20);
    }

    #[test]
    fn condvar_wait_times_out() {
        let mutex = Mutex::new(());
        let cv = Condvar::new();
        let guard = mutex.lock();
        let (_guard, result) = cv.wait(guard, 20);
        assert_eq!(result, WaitResult::TimedOut);
    }

    #[test]
    fn condvar_wait_woken_by_signal() {
        use std::sync::Arc;
        let mutex = Arc::new(Mutex::new(false));
        let cv = Arc::new(Condvar::new());

        let m2 = mutex.clone();
        let cv2 = cv.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            let mut guard = m2.lock();
            *guard = true;
            cv2.signal();
        });

        let mut guard = mutex.lock();
        while !*guard {
            let (g, result) = cv.wait(guard, 2_000);
            guard = g;
            if result == WaitResult::TimedOut && !*guard {
                panic!("condvar wait timed out before signal arrived");
            }
        }
        handle.join().unwrap();
    }
}
