//! TaskThread worker loop and TaskPool scheduler (spec.md §4.E), ported in
//! spirit from the original's worker-thread dispatch model — the provided
//! excerpt doesn't include the C++ scheduler source itself (only
//! `OSThread.cpp`'s thread primitives and `OSHeap.h`'s heap), so this
//! module follows spec §4.E's main-loop description directly, using the
//! heap ([`crate::heap`]) and thread ([`crate::thread`]) primitives already
//! ported from those files.

use crate::config::PoolConfig;
use crate::error::CfError;
use crate::event::{self, EventNotifier, Interest, WaitOutcome};
use crate::heap::Heap;
use crate::task::{EventFlags, Task, TaskHandle, KILL, RESCHEDULE_NOW};
use crate::thread::{self, Thread};
use crate::time::{monotonic_millis, Condvar, Mutex as CfMutex};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, Weak};

/// Simple condvar-gated heartbeat a worker sleeps on between dispatch
/// passes (spec §4.E step 3); the pool signals it after pushing a task
/// into that worker's queue so the worker doesn't oversleep.
struct Heartbeat {
    mutex: CfMutex<()>,
    condvar: Condvar,
}

impl Heartbeat {
    fn new() -> Self {
        Heartbeat {
            mutex: CfMutex::new(()),
            condvar: Condvar::new(),
        }
    }

    fn wake(&self) {
        self.condvar.signal();
    }

    fn sleep(&self, millis: u64) {
        let guard = self.mutex.lock();
        let _ = self.condvar.wait(guard, millis);
    }
}

struct Worker {
    sender: Sender<Arc<TaskHandle>>,
    heartbeat: Arc<Heartbeat>,
    thread: Mutex<Option<Thread>>,
}

/// Process-wide task scheduler: `worker_count` cooperative `TaskThread`s
/// plus one dedicated event-routing thread, constructed once via
/// [`TaskPool::new`] — never a lazily-initialized global, per spec §9
/// "Process-wide singletons ... created by an explicit initialize()".
pub struct TaskPool {
    workers: Vec<Worker>,
    routing_thread: Mutex<Option<Thread>>,
    notifier: Arc<dyn EventNotifier>,
    cookies: Mutex<HashMap<usize, Weak<TaskHandle>>>,
    round_robin: AtomicUsize,
    config: PoolConfig,
}

impl TaskPool {
    pub fn new(config: PoolConfig) -> Result<Arc<TaskPool>, CfError> {
        let notifier: Arc<dyn EventNotifier> = Arc::from(event::new_platform_notifier()?);

        let mut workers = Vec::with_capacity(config.worker_count);
        for index in 0..config.worker_count {
            let (tx, rx) = mpsc::channel::<Arc<TaskHandle>>();
            let heartbeat = Arc::new(Heartbeat::new());
            let self_sender = tx.clone();
            let worker_heartbeat = heartbeat.clone();
            let worker_config = config.clone();
            let thread = Thread::start(format!("cf-worker-{index}"), move |stop| {
                let mut worker = TaskThread {
                    heap: Heap::new(),
                    queue_rx: rx,
                    self_sender,
                    heartbeat: worker_heartbeat,
                    config: worker_config,
                };
                worker.run(&stop);
            });
            workers.push(Worker {
                sender: tx,
                heartbeat,
                thread: Mutex::new(Some(thread)),
            });
        }

        let pool = Arc::new(TaskPool {
            workers,
            routing_thread: Mutex::new(None),
            notifier,
            cookies: Mutex::new(HashMap::new()),
            round_robin: AtomicUsize::new(0),
            config,
        });

        // A Weak ref, not a clone: the routing thread must never keep the
        // pool alive by itself, or TaskPool's Drop (which joins this very
        // thread) would never run.
        let weak_pool = Arc::downgrade(&pool);
        let routing_thread = Thread::start("cf-event-routing", move |stop| {
            TaskPool::event_routing_loop(weak_pool, &stop);
        });
        *pool.routing_thread.lock().expect("routing thread mutex poisoned") = Some(routing_thread);

        Ok(pool)
    }

    /// Registers `task` under a freshly minted id, without scheduling it —
    /// matching spec §3 "created externally ... inserted into a worker's
    /// ready queue on signal". Call [`TaskPool::signal`] to actually start
    /// it running.
    pub fn spawn(&self, task: Box<dyn Task>) -> Arc<TaskHandle> {
        self.spawn_inner(task, None)
    }

    /// Like [`TaskPool::spawn`], but pins the task to one worker
    /// (spec §3 `useThisThread`).
    pub fn spawn_pinned(&self, task: Box<dyn Task>, worker_index: usize) -> Arc<TaskHandle> {
        self.spawn_inner(task, Some(worker_index % self.workers.len().max(1)))
    }

    fn spawn_inner(&self, task: Box<dyn Task>, pinned: Option<usize>) -> Arc<TaskHandle> {
        Arc::new(match pinned {
            Some(worker) => TaskHandle::pinned_to(task, worker),
            None => TaskHandle::new(task),
        })
    }

    /// ORs `bits` into the task's pending flags and, if it was quiescent,
    /// enqueues it onto its pinned worker (or a round-robin pick).
    pub fn signal(&self, handle: &Arc<TaskHandle>, bits: EventFlags) {
        handle.signal(bits);
        if !handle.try_leave_quiescent() {
            return;
        }
        let worker_index = handle
            .use_this_thread()
            .unwrap_or_else(|| self.round_robin.fetch_add(1, Ordering::Relaxed) % self.workers.len().max(1));
        let worker = &self.workers[worker_index];
        let _ = worker.sender.send(handle.clone());
        worker.heartbeat.wake();
    }

    /// Registers `cookie` (an fd-derived identifier, by convention the fd
    /// itself cast to `usize` — see [`crate::socket::Socket`]) so the
    /// event-routing thread can resolve a delivered readiness event back to
    /// its owning task.
    pub fn register_cookie(&self, cookie: usize, task: Arc<TaskHandle>) {
        self.cookies
            .lock()
            .expect("cookie map poisoned")
            .insert(cookie, Arc::downgrade(&task));
    }

    pub fn unregister_cookie(&self, cookie: usize) {
        self.cookies.lock().expect("cookie map poisoned").remove(&cookie);
    }

    pub fn notifier(&self) -> Arc<dyn EventNotifier> {
        self.notifier.clone()
    }

    /// Body of the dedicated event-routing thread. Takes a `Weak` rather
    /// than `&self`/`Arc<Self>`: re-upgraded once per iteration, so the
    /// pool can still be dropped (and this thread stopped and joined by
    /// that very Drop) while the thread is parked in `notifier.wait`.
    fn event_routing_loop(pool: Weak<TaskPool>, stop: &Arc<crate::thread::ThreadHandle>) {
        while !stop.stop_requested() {
            let Some(pool) = pool.upgrade() else {
                return;
            };
            match pool.notifier.wait(pool.config.notifier_wait_cap_millis) {
                Ok(WaitOutcome::Ready(ev)) => {
                    let task = pool
                        .cookies
                        .lock()
                        .expect("cookie map poisoned")
                        .get(&ev.cookie)
                        .and_then(Weak::upgrade);
                    if let Some(task) = task {
                        let bits = match ev.interest {
                            Interest::Read => EventFlags::READ,
                            Interest::Write => EventFlags::WRITE,
                            Interest::Remove => EventFlags::empty(),
                        };
                        pool.signal(&task, bits);
                    }
                }
                Ok(WaitOutcome::TimedOut) => {}
                Err(_) => thread::sleep(1),
            }
        }
    }

    /// Stops and joins every thread in reverse creation order (spec §5:
    /// threads are joined in reverse creation order at shutdown). The
    /// event-routing thread was spawned last, so it is stopped first; the
    /// worker threads follow in reverse index order. Idempotent: a second
    /// call finds every `Mutex<Option<Thread>>` already emptied and is a
    /// no-op.
    pub fn shutdown(&self) {
        if let Some(mut routing) = self
            .routing_thread
            .lock()
            .expect("routing thread mutex poisoned")
            .take()
        {
            routing.stop_and_join();
        }
        for worker in self.workers.iter().rev() {
            worker.heartbeat.wake();
            if let Some(mut thread) = worker.thread.lock().expect("worker thread mutex poisoned").take() {
                thread.stop_and_join();
            }
        }
    }
}

impl Drop for TaskPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct TaskThread {
    heap: Heap<Arc<TaskHandle>>,
    queue_rx: Receiver<Arc<TaskHandle>>,
    self_sender: Sender<Arc<TaskHandle>>,
    heartbeat: Arc<Heartbeat>,
    config: PoolConfig,
}

impl TaskThread {
    fn run(&mut self, stop: &Arc<crate::thread::ThreadHandle>) {
        while !stop.stop_requested() {
            let mut dispatched_any = false;

            // Step 1: drain the ready queue.
            while let Ok(task) = self.queue_rx.try_recv() {
                dispatched_any |= self.dispatch(task);
            }

            // Step 2: dispatch every timer entry whose deadline has passed.
            loop {
                let due = matches!(self.heap.peek_min(), Some((deadline, _)) if deadline <= monotonic_millis());
                if !due {
                    break;
                }
                if let Some((_, task)) = self.heap.extract_min() {
                    dispatched_any |= self.dispatch(task);
                } else {
                    break;
                }
            }

            if dispatched_any {
                continue;
            }

            // Step 3: sleep until the next deadline, or a wake-up signal.
            let sleep_ms = match self.heap.peek_min() {
                Some((deadline, _)) => (deadline - monotonic_millis()).max(0) as u64,
                None => self.config.idle_sleep_millis,
            };
            thread::yield_now();
            self.heartbeat.sleep(sleep_ms);
        }
    }

    /// Dispatches one task: clears its queued status, claims the
    /// single-runner slot (requeuing if another worker already holds it),
    /// calls `run`, and routes the return value per spec §4.E.
    fn dispatch(&mut self, task: Arc<TaskHandle>) -> bool {
        if !task.try_claim_running() {
            let _ = self.self_sender.send(task);
            return false;
        }
        let result = task.run();
        task.release_running();

        match result {
            KILL => {
                // Scheduler drops its reference; the task destroyed itself
                // on this turn per spec's kill-sentinel contract.
            }
            RESCHEDULE_NOW => {
                let _ = self.self_sender.send(task);
            }
            n if n > 0 => {
                let deadline = monotonic_millis() + n;
                let handle = self.heap.insert(deadline, task);
                let _ = handle;
            }
            _ => {
                // Orphaned: the task pledges to signal itself later. Mark it
                // quiescent so the next signal() actually re-enqueues it
                // instead of seeing a stale "already enqueued" flag.
                task.mark_quiescent();
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::sync::mpsc::channel;
    use std::time::Duration;

    struct TimerTask {
        fired_once: Arc<AtomicBool>,
        done_tx: mpsc::Sender<i64>,
        first_call_at: Mutex<Option<i64>>,
    }

    impl Task for TimerTask {
        fn run(&mut self) -> i64 {
            let now = monotonic_millis();
            if !self.fired_once.swap(true, Ordering::AcqRel) {
                *self.first_call_at.lock().unwrap() = Some(now);
                return 50;
            }
            let first = self.first_call_at.lock().unwrap().unwrap();
            let _ = self.done_tx.send(now - first);
            KILL
        }
    }

    #[test]
    fn task_timer_reschedules_after_requested_delay() {
        let pool = TaskPool::new(PoolConfig {
            worker_count: 2,
            ..PoolConfig::default()
        })
        .unwrap();

        let (tx, rx) = channel();
        let task = pool.spawn(Box::new(TimerTask {
            fired_once: Arc::new(AtomicBool::new(false)),
            done_tx: tx,
            first_call_at: Mutex::new(None),
        }));
        pool.signal(&task, EventFlags::USER_0);

        let elapsed = rx.recv_timeout(Duration::from_millis(500)).unwrap();
        assert!(elapsed >= 50, "elapsed={elapsed}");
        assert!(elapsed < 200, "elapsed={elapsed}");
    }

    struct OrphanThenKill {
        signalled: Arc<AtomicBool>,
    }

    impl Task for OrphanThenKill {
        fn run(&mut self) -> i64 {
            if self.signalled.load(Ordering::Acquire) {
                KILL
            } else {
                -1
            }
        }
    }

    #[test]
    fn orphaned_task_waits_for_external_signal() {
        let pool = TaskPool::new(PoolConfig {
            worker_count: 1,
            ..PoolConfig::default()
        })
        .unwrap();
        let signalled = Arc::new(AtomicBool::new(false));
        let task = pool.spawn(Box::new(OrphanThenKill {
            signalled: signalled.clone(),
        }));
        pool.signal(&task, EventFlags::USER_0);
        std::thread::sleep(Duration::from_millis(50));
        signalled.store(true, Ordering::Release);
        pool.signal(&task, EventFlags::USER_0);
        std::thread::sleep(Duration::from_millis(50));
    }
}
