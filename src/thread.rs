//! Cooperative thread abstraction (spec.md §4.C), ported from
//! `CFCore/OSThread.cpp`. `OSThread` wraps a pthread/Win32 handle with a
//! thread-local "current thread" lookup (`gMainKey` + `pthread_getspecific`
//! on POSIX, a `TlsAlloc`'d slot on Win32); `std::thread` plus
//! `thread_local!` gives the same shape without the `#ifdef` forest.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

thread_local! {
    static CURRENT: std::cell::RefCell<Option<Arc<ThreadHandle>>> = const { std::cell::RefCell::new(None) };
}

/// Per-thread identity and cancellation flag, set into thread-local storage
/// by the spawned thread's entry trampoline — the Rust analog of
/// `OSThread::_Entry` calling `pthread_setspecific(OSThread::gMainKey, this)`.
pub struct ThreadHandle {
    name: String,
    stop_requested: AtomicBool,
}

impl ThreadHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::Acquire)
    }

    fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::Release);
    }
}

/// Returns the calling thread's handle, or `None` on a thread this module
/// never spawned — matching `OSThread::GetCurrent()` returning `nullptr`
/// for the main thread (spec §4.C: "exposes a single `mainThreadData` slot").
pub fn current_thread() -> Option<Arc<ThreadHandle>> {
    CURRENT.with(|c| c.borrow().clone())
}

/// A joinable worker thread. `start` spawns the OS thread and runs `entry`
/// on it; `stop_and_join` requests cooperative termination (via
/// [`ThreadHandle::stop_requested`], observed on the entry closure's own
/// schedule) and blocks until it exits.
pub struct Thread {
    handle: Arc<ThreadHandle>,
    join: Option<JoinHandle<()>>,
}

impl Thread {
    /// Spawns `entry` on a new OS thread. `entry` receives the thread's own
    /// [`ThreadHandle`] so it can poll `stop_requested()` between units of
    /// work — there is no preemptive cancellation, matching spec §5
    /// "Cancellation is cooperative".
    pub fn start<F>(name: impl Into<String>, entry: F) -> Thread
    where
        F: FnOnce(Arc<ThreadHandle>) + Send + 'static,
    {
        let name = name.into();
        let handle = Arc::new(ThreadHandle {
            name: name.clone(),
            stop_requested: AtomicBool::new(false),
        });
        let handle_for_thread = handle.clone();
        let join = std::thread::Builder::new()
            .name(name)
            .spawn(move || {
                CURRENT.with(|c| *c.borrow_mut() = Some(handle_for_thread.clone()));
                entry(handle_for_thread);
            })
            .expect("failed to spawn OS thread");
        Thread {
            handle,
            join: Some(join),
        }
    }

    pub fn name(&self) -> &str {
        self.handle.name()
    }

    pub fn handle(&self) -> Arc<ThreadHandle> {
        self.handle.clone()
    }

    /// Sets `stop_requested` and blocks until the thread has exited. Per
    /// spec §5, a thread blocked in a long `wait(timeoutMillis)` call is not
    /// interrupted by this — it observes the flag on its next loop turn.
    pub fn stop_and_join(&mut self) {
        self.handle.request_stop();
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

impl Drop for Thread {
    fn drop(&mut self) {
        if self.join.is_some() {
            self.stop_and_join();
        }
    }
}

/// Cooperative yield point, used by a worker's dispatch loop when a pass
/// found nothing to run before it commits to a timed condvar wait —
/// translated from `OSThread::ThreadYield`'s `sched_yield()` call.
pub fn yield_now() {
    std::thread::yield_now();
}

/// Blocks for at least `ms` monotonic milliseconds; thin re-export so
/// callers of this module don't need to also import [`crate::time`].
pub fn sleep(ms: u64) {
    crate::time::sleep(ms);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn current_thread_is_none_on_unmanaged_thread() {
        assert!(current_thread().is_none());
    }

    #[test]
    fn spawned_thread_observes_its_own_handle() {
        let (tx, rx) = mpsc::channel();
        let mut thread = Thread::start("probe", move |handle| {
            tx.send(handle.name().to_string()).unwrap();
            assert!(current_thread().is_some());
        });
        assert_eq!(rx.recv().unwrap(), "probe");
        thread.stop_and_join();
    }

    #[test]
    fn stop_and_join_sets_flag_before_join_returns() {
        let (ready_tx, ready_rx) = mpsc::channel();
        let mut thread = Thread::start("loopy", move |handle| {
            ready_tx.send(()).unwrap();
            while !handle.stop_requested() {
                std::thread::sleep(std::time::Duration::from_millis(2));
            }
        });
        ready_rx.recv().unwrap();
        thread.stop_and_join();
    }
}
