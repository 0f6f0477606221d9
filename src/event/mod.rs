//! Event-driven socket layer, the abstract half (spec.md §4.D). Ported from
//! `CFSocket/epollev.cpp`: a single mutex-serialized registry mapping
//! `fd -> cookie`, one-shot delivery (the notifier de-registers an fd the
//! instant it hands back a readiness event), and a gate flag that avoids
//! busy-polling the kernel when nothing is registered.
//!
//! Two backends implement [`EventNotifier`]: [`epoll_backend`] on Linux,
//! [`poll_backend`] everywhere else, selected in [`new_platform_notifier`].
//! Per spec §9 "the scheduler is backend-agnostic" — nothing above this
//! module ever names a backend type directly.

pub mod epoll_backend;
pub mod poll_backend;

/// What a caller is registering interest in. `Remove` cancels a prior
/// registration outright rather than waiting for it to fire once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interest {
    Read,
    Write,
    Remove,
}

/// One delivered readiness event: the fd, which interest fired, and the
/// cookie supplied at `watch` time — returned verbatim so the caller can
/// route it back to the owning socket without its own fd-keyed lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadyEvent {
    pub fd: i32,
    pub interest: Interest,
    pub cookie: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Ready(ReadyEvent),
    TimedOut,
}

/// Fixed fd capacity every backend enforces, taken directly from the
/// original's `#define MAX_EPOLL_FD 20000`.
pub const MAX_EVENTS: usize = 20_000;

/// The notifier contract spec §4.D names: `watch`, `wait`, `remove`, plus
/// one-shot delivery and a busy-poll gate the *implementation* maintains
/// internally (callers never see it directly).
pub trait EventNotifier: Send + Sync {
    /// Registers interest in `fd`, replacing any prior registration for it.
    /// `Interest::Remove` just cancels the registration.
    fn watch(&self, fd: i32, interest: Interest, cookie: usize) -> crate::error::CfResult<()>;

    /// Cancels any registration for `fd` outright.
    fn remove(&self, fd: i32) -> crate::error::CfResult<()>;

    /// Blocks up to `timeout_millis` for the next ready event. After
    /// delivering one, the notifier has already de-registered that
    /// `(fd, interest)` pair — callers re-arm via `watch`.
    fn wait(&self, timeout_millis: u64) -> crate::error::CfResult<WaitOutcome>;
}

/// Builds whichever backend is appropriate for the host OS.
#[cfg(target_os = "linux")]
pub fn new_platform_notifier() -> crate::error::CfResult<Box<dyn EventNotifier>> {
    Ok(Box::new(epoll_backend::EpollNotifier::new()?))
}

#[cfg(not(target_os = "linux"))]
pub fn new_platform_notifier() -> crate::error::CfResult<Box<dyn EventNotifier>> {
    Ok(Box::new(poll_backend::PollNotifier::new()))
}
