//! Session scaffolding (spec.md §4.I), ported from `CFCore`'s base HTTP/RTSP
//! session object stripped of everything protocol-specific — spec §1 treats
//! the session's request-parsing and protocol semantics as an external
//! collaborator; only the plumbing it needs (a socket, a task identity, a
//! unique id, buffered I/O, a reusable timeout task) lives here.
//!
//! `input`/`output` are plain growable byte buffers rather than
//! `std::io::BufReader`/`BufWriter`: both of those own their inner reader
//! by value, which would make `Session` self-referential once it also
//! needs to call straight through to the same `Socket` for
//! `request_event`. A hand-rolled buffer gets the same batching behavior
//! spec §4.I asks for without that borrow conflict.
//!
//! `read`'s request-body clamp/decrement is ported from
//! `HTTPUtilitiesLib/HTTPSessionInterface.cpp`'s `HTTPSessionInterface::Read`:
//! `fRequestBodyLen == 0` refuses further reads, a positive remaining count
//! caps the requested length, and `fRequestBodyLen == -1` ("not known") never
//! caps or decrements. `AtomicI64` keeps that same three-way sentinel
//! (`-1`/`0`/positive) instead of splitting it into an `Option<u64>`, since
//! the original's exact comparisons (`> 0`, `>= 0`) map one for one onto
//! signed arithmetic here.

use crate::event::Interest;
use crate::socket::{IoOutcome, Socket};
use crate::task::TaskHandle;
use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

/// Process-global session id counter. Starts at an arbitrary but fixed
/// non-zero base (spec §4.I "a server-chosen first value") so id `0` stays
/// reserved, matching the original's own convention of starting serial
/// counters away from zero.
static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1000);

/// Growable read buffer over a [`Socket`]: `fill` pulls more bytes in from
/// the socket, `take` drains already-buffered bytes without a syscall.
#[derive(Default)]
struct InputBuffer {
    bytes: Vec<u8>,
    pos: usize,
}

impl InputBuffer {
    fn available(&self) -> usize {
        self.bytes.len() - self.pos
    }

    fn take(&mut self, out: &mut [u8]) -> usize {
        let n = out.len().min(self.available());
        out[..n].copy_from_slice(&self.bytes[self.pos..self.pos + n]);
        self.pos += n;
        if self.pos == self.bytes.len() {
            self.bytes.clear();
            self.pos = 0;
        }
        n
    }

    fn fill(&mut self, socket: &Socket) -> crate::error::CfResult<IoOutcome> {
        let mut chunk = [0u8; 8192];
        let outcome = socket.read(&mut chunk)?;
        if let IoOutcome::Transferred(n) = outcome {
            self.bytes.extend_from_slice(&chunk[..n]);
        }
        Ok(outcome)
    }
}

/// Write-side buffer; `flush` pushes as much as the non-blocking socket
/// will currently accept, leaving the remainder buffered for the next
/// write-ready event.
#[derive(Default)]
struct OutputBuffer {
    bytes: Vec<u8>,
}

impl OutputBuffer {
    fn queue(&mut self, data: &[u8]) {
        self.bytes.extend_from_slice(data);
    }

    fn flush(&mut self, socket: &Socket) -> crate::error::CfResult<IoOutcome> {
        if self.bytes.is_empty() {
            return Ok(IoOutcome::Transferred(0));
        }
        let outcome = socket.write(&self.bytes)?;
        if let IoOutcome::Transferred(n) = outcome {
            self.bytes.drain(..n);
        }
        Ok(outcome)
    }

    fn pending(&self) -> usize {
        self.bytes.len()
    }
}

/// Owns a [`Socket`], a task identity, and a unique monotonic id (spec
/// §3 "Session"). `object_holders` lets external subsystems pin the
/// session; reaching zero is necessary but not sufficient for teardown —
/// the session never asserts on it itself, it just exposes the count for
/// an external reaper to consult, exactly as spec prose states.
pub struct Session {
    id: u64,
    socket: Socket,
    input: InputBuffer,
    output: OutputBuffer,
    timeout_task: Arc<TaskHandle>,
    object_holders: AtomicU32,
    /// `-1` = request body length not known (never capped or decremented),
    /// `0` = no more request body bytes may be read, `>0` = bytes remaining
    /// to be read. Mirrors `HTTPSessionInterface::fRequestBodyLen`'s own
    /// three-way sentinel exactly (see module doc comment).
    request_body_remaining: AtomicI64,
}

impl Session {
    pub fn new(socket: Socket, timeout_task: Arc<TaskHandle>) -> Session {
        Session {
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            socket,
            input: InputBuffer::default(),
            output: OutputBuffer::default(),
            timeout_task,
            object_holders: AtomicU32::new(0),
            request_body_remaining: AtomicI64::new(-1),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn socket(&self) -> &Socket {
        &self.socket
    }

    pub fn socket_mut(&mut self) -> &mut Socket {
        &mut self.socket
    }

    /// Drains already-buffered bytes first; pulls more from the socket only
    /// once the buffer is empty. Matches spec §4.I "exposes `read`/`write`
    /// ... delegating to buffered input/output streams", with the same
    /// request-body clamp `HTTPSessionInterface::Read` applies: a `0`
    /// remaining count refuses the read outright, a positive count caps
    /// `buf` to at most that many bytes, and `-1` ("not known") never caps
    /// or decrements anything.
    pub fn read(&mut self, buf: &mut [u8]) -> crate::error::CfResult<usize> {
        let remaining = self.request_body_remaining.load(Ordering::Acquire);
        if remaining == 0 {
            return Ok(0);
        }
        let cap = if remaining > 0 {
            (remaining as usize).min(buf.len())
        } else {
            buf.len()
        };

        if self.input.available() == 0 {
            self.input.fill(&self.socket)?;
        }
        let read = self.input.take(&mut buf[..cap]);

        if remaining >= 0 {
            self.request_body_remaining
                .store(remaining - read as i64, Ordering::Release);
        }
        Ok(read)
    }

    pub fn write(&mut self, data: &[u8]) -> crate::error::CfResult<()> {
        self.output.queue(data);
        self.output.flush(&self.socket)?;
        Ok(())
    }

    /// Queues and flushes several buffers in sequence — spec §4.I
    /// `writeVec`, the scatter-write companion to `write`.
    pub fn write_vec(&mut self, parts: &[&[u8]]) -> crate::error::CfResult<()> {
        for part in parts {
            self.output.queue(part);
        }
        self.output.flush(&self.socket)?;
        Ok(())
    }

    /// Bytes still queued for a future write-ready event.
    pub fn pending_write_bytes(&self) -> usize {
        self.output.pending()
    }

    /// Forwards to the socket (spec §4.I `requestEvent`).
    pub fn request_event(&self, interest: Interest) -> crate::error::CfResult<()> {
        self.socket.request_event(interest)
    }

    pub fn timeout_task(&self) -> &Arc<TaskHandle> {
        &self.timeout_task
    }

    pub fn object_holders(&self) -> u32 {
        self.object_holders.load(Ordering::Acquire)
    }

    pub fn add_object_holder(&self) -> u32 {
        self.object_holders.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Returns the new count; `0` means teardown may now proceed, subject
    /// to whatever other conditions the owning reaper checks.
    pub fn release_object_holder(&self) -> u32 {
        self.object_holders
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                Some(n.saturating_sub(1))
            })
            .map(|prev| prev.saturating_sub(1))
            .unwrap_or(0)
    }

    /// `-1` means "not known" (unbounded), matching
    /// `HTTPSessionInterface::fRequestBodyLen`'s own default.
    pub fn request_body_remaining(&self) -> i64 {
        self.request_body_remaining.load(Ordering::Acquire)
    }

    /// Sets the remaining request-body byte count `read()` will clamp to and
    /// decrement from; pass `-1` to mark the length as not known.
    pub fn set_request_body_remaining(&self, remaining: i64) {
        self.request_body_remaining.store(remaining, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;
    use crate::task::pool::TaskPool;
    use crate::task::{Task, KILL};

    struct NoopTask;
    impl Task for NoopTask {
        fn run(&mut self) -> i64 {
            KILL
        }
    }

    #[test]
    fn ids_are_monotonic_and_start_above_zero() {
        let pool = TaskPool::new(PoolConfig {
            worker_count: 1,
            ..PoolConfig::default()
        })
        .unwrap();
        let owner = pool.spawn(Box::new(NoopTask));
        let timeout = pool.spawn(Box::new(NoopTask));
        let a = Session::new(Socket::new(pool.clone(), owner.clone()), timeout.clone());
        let b = Session::new(Socket::new(pool.clone(), owner), timeout);
        assert!(b.id() > a.id());
        assert!(a.id() >= 1000);
    }

    #[test]
    fn object_holders_round_trip_to_zero() {
        let pool = TaskPool::new(PoolConfig {
            worker_count: 1,
            ..PoolConfig::default()
        })
        .unwrap();
        let owner = pool.spawn(Box::new(NoopTask));
        let timeout = pool.spawn(Box::new(NoopTask));
        let session = Session::new(Socket::new(pool, owner), timeout);
        assert_eq!(session.object_holders(), 0);
        session.add_object_holder();
        session.add_object_holder();
        assert_eq!(session.object_holders(), 2);
        assert_eq!(session.release_object_holder(), 1);
        assert_eq!(session.release_object_holder(), 0);
        assert_eq!(session.release_object_holder(), 0, "never underflows");
    }

    /// Builds a connected loopback pair: a [`Session`] wrapping the accepted
    /// side, and a plain [`Socket`] for the test to write through as the peer.
    fn connected_session_and_peer() -> (Session, Socket, Arc<TaskHandle>) {
        let pool = TaskPool::new(PoolConfig {
            worker_count: 1,
            ..PoolConfig::default()
        })
        .unwrap();
        let owner = pool.spawn(Box::new(NoopTask));

        let mut listener = Socket::new(pool.clone(), owner.clone());
        listener.open().unwrap();
        listener.bind(std::net::Ipv4Addr::LOCALHOST, 0).unwrap();
        listener.listen(16).unwrap();
        let (_, port) = listener.local_addr().unwrap();

        let mut peer = Socket::new(pool.clone(), owner.clone());
        peer.open().unwrap();
        peer.connect(std::net::Ipv4Addr::LOCALHOST, port).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(50));

        let accepted_fd = listener.accept().unwrap().expect("peer already connected");
        let accepted = Socket::from_accepted_fd(pool.clone(), owner.clone(), accepted_fd);
        let timeout = pool.spawn(Box::new(NoopTask));
        (Session::new(accepted, timeout), peer, owner)
    }

    #[test]
    fn read_with_unknown_body_length_is_uncapped_and_never_decrements() {
        let (mut session, peer, _owner) = connected_session_and_peer();
        assert_eq!(session.request_body_remaining(), -1);
        peer.write(b"hello").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));

        let mut buf = [0u8; 16];
        let n = session.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"hello");
        assert_eq!(
            session.request_body_remaining(),
            -1,
            "an unknown body length must never be decremented"
        );
    }

    #[test]
    fn read_refuses_once_body_remaining_hits_zero() {
        let (mut session, peer, _owner) = connected_session_and_peer();
        session.set_request_body_remaining(0);
        peer.write(b"hello").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));

        let mut buf = [0u8; 16];
        let n = session.read(&mut buf).unwrap();
        assert_eq!(n, 0, "zero remaining must refuse the read outright");
    }

    #[test]
    fn read_caps_to_remaining_and_decrements_by_bytes_actually_read() {
        let (mut session, peer, _owner) = connected_session_and_peer();
        session.set_request_body_remaining(3);
        peer.write(b"hello").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));

        let mut buf = [0u8; 16];
        let n = session.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"hel", "read must be capped to the remaining count");
        assert_eq!(session.request_body_remaining(), 0);

        let n2 = session.read(&mut buf).unwrap();
        assert_eq!(n2, 0, "body is now exhausted");
    }
}
