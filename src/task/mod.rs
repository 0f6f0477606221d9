//! Task abstraction and sentinels (spec.md §3 "Task", §4.E). `Task` is a
//! trait object rather than a virtual base class, per spec §9 "Virtual
//! entry/run hooks ... Avoid inheritance" — the scheduler only ever holds
//! `Box<dyn Task + Send>` behind a [`TaskHandle`].

pub mod pool;

use bitflags::bitflags;
use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};
use std::sync::Mutex;

bitflags! {
    /// Pending-signal bit-set (spec §3 "Task ... eventFlags"), directly
    /// replacing the original's `#define EV_RE 0x2` / `EV_WR 0x4` constants.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EventFlags: u32 {
        const READ    = 0b0000_0001;
        const WRITE   = 0b0000_0010;
        const TIMEOUT = 0b0000_0100;
        const KILLED  = 0b0000_1000;
        /// Start of the range a Task subclass may repurpose for its own
        /// signals, per spec §3 "user-defined" bits.
        const USER_0  = 0b0001_0000;
        const USER_1  = 0b0010_0000;
        const USER_2  = 0b0100_0000;
        const USER_3  = 0b1000_0000;
    }
}

/// Returned by [`Task::run`] to mean "requeue me immediately" (spec §3:
/// "0 = immediately requeue").
pub const RESCHEDULE_NOW: i64 = 0;

/// Returned by [`Task::run`] to mean "the scheduler will forget me; I will
/// free myself" (spec §3 "kill sentinel", GLOSSARY).
pub const KILL: i64 = i64::MIN;

/// A unit of cooperatively scheduled work. The scheduler calls `run` at
/// most once per scheduling turn and never concurrently with another call
/// to the same Task's `run` (spec §3 single-runner invariant, enforced by
/// [`TaskHandle`]'s atomic `running` bit, not by this trait).
pub trait Task: Send {
    /// Runs one turn of work. The return value means:
    /// - [`RESCHEDULE_NOW`] (`0`): requeue immediately.
    /// - a positive `N`: reschedule after `N` milliseconds.
    /// - [`KILL`]: terminal. The scheduler drops its reference; `self` must
    ///   not be touched again (it is expected to free itself on this turn).
    /// - any other negative value: leave orphaned; the Task pledges to
    ///   re-signal itself later (spec §3 "negative sentinel").
    fn run(&mut self) -> i64;

    /// Diagnostic label (spec §3 "taskName"). Defaults to a generic name so
    /// implementers aren't forced to override it.
    fn name(&self) -> &str {
        "task"
    }
}

/// A reference to a scheduled [`Task`] plus the bookkeeping the scheduler
/// needs around it: pending signal bits, the single-runner guard, and an
/// optional pin to one worker. Non-owning from the scheduler's point of
/// view per spec §3 ownership rules ("the scheduler holds non-owning
/// references to Tasks; Tasks own themselves").
pub struct TaskHandle {
    task: Mutex<Box<dyn Task>>,
    flags: AtomicU32,
    /// `0` bit means "idle", `1` means "running or queued to run" — enforces
    /// the single-runner invariant: dispatch sets it, and if it was already
    /// set the task is handed straight back to the queue instead of run.
    running: AtomicI32,
    /// `true` once the task is parked outside every worker's queue and heap,
    /// waiting purely for an external [`TaskHandle::try_leave_quiescent`]
    /// caller (spec §4.E's "orphaned" return value) to re-enqueue it. Starts
    /// `true`: a freshly spawned, unsignalled task is quiescent by
    /// definition.
    quiescent: std::sync::atomic::AtomicBool,
    use_this_thread: Option<usize>,
    name: String,
    write_lock: bool,
}

impl TaskHandle {
    pub fn new(task: Box<dyn Task>) -> Self {
        let name = task.name().to_string();
        TaskHandle {
            task: Mutex::new(task),
            flags: AtomicU32::new(0),
            running: AtomicI32::new(0),
            quiescent: std::sync::atomic::AtomicBool::new(true),
            use_this_thread: None,
            name,
            write_lock: true,
        }
    }

    pub fn pinned_to(task: Box<dyn Task>, worker_index: usize) -> Self {
        let mut handle = TaskHandle::new(task);
        handle.use_this_thread = Some(worker_index);
        handle
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn use_this_thread(&self) -> Option<usize> {
        self.use_this_thread
    }

    /// ORs `bits` into the pending-flags set. Idempotent per scheduling
    /// turn: signalling an already-pending bit again is a no-op observable
    /// difference (spec §4.E "Signals are idempotent per turn").
    pub fn signal(&self, bits: EventFlags) {
        self.flags.fetch_or(bits.bits(), Ordering::AcqRel);
    }

    pub fn take_flags(&self) -> EventFlags {
        let bits = self.flags.swap(0, Ordering::AcqRel);
        EventFlags::from_bits_truncate(bits)
    }

    pub fn peek_flags(&self) -> EventFlags {
        EventFlags::from_bits_truncate(self.flags.load(Ordering::Acquire))
    }

    /// Attempts to claim the single-runner slot. Returns `false` if another
    /// worker already holds it — the caller must requeue rather than run.
    pub fn try_claim_running(&self) -> bool {
        self.running
            .compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn release_running(&self) {
        self.running.store(0, Ordering::Release);
    }

    pub fn write_lock(&self) -> bool {
        self.write_lock
    }

    /// Atomically clears the quiescent flag, returning whether it was set
    /// beforehand. The scheduler enqueues a task only when this returns
    /// `true` — a task that was already non-quiescent (queued, parked on a
    /// worker's timer heap, or running) must not be enqueued a second time.
    pub fn try_leave_quiescent(&self) -> bool {
        self.quiescent.swap(false, Ordering::AcqRel)
    }

    /// Marks the task quiescent again, matching spec §3's "negative
    /// sentinel: ... leave orphaned; caller pledges to re-signal" — the next
    /// `signal` call must be able to enqueue it again.
    pub fn mark_quiescent(&self) {
        self.quiescent.store(true, Ordering::Release);
    }

    /// Runs the wrapped task's `run` once. Must only be called while this
    /// handle holds the single-runner slot.
    pub fn run(&self) -> i64 {
        let mut task = self.task.lock().expect("task mutex poisoned");
        task.run()
    }
}
