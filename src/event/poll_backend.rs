//! Portable `poll(2)`-based fallback backend for [`super::EventNotifier`],
//! used on any host without epoll. Same one-shot/gate contract as
//! [`super::epoll_backend`], built on `libc::poll` instead of
//! `epoll_create1`/`epoll_ctl`/`epoll_wait` — spec §9 names this pairing
//! explicitly ("concrete backends for kqueue, epoll, IOCP, and a
//! poll-based fallback").

use crate::error::{CfError, CfResult};
use crate::event::{EventNotifier, Interest, ReadyEvent, WaitOutcome};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

struct Registration {
    interest: Interest,
    cookie: usize,
}

struct State {
    registrations: HashMap<i32, Registration>,
    pending: VecDeque<ReadyEvent>,
}

pub struct PollNotifier {
    state: Mutex<State>,
    may_have_events: AtomicBool,
}

impl PollNotifier {
    pub fn new() -> Self {
        PollNotifier {
            state: Mutex::new(State {
                registrations: HashMap::new(),
                pending: VecDeque::new(),
            }),
            may_have_events: AtomicBool::new(false),
        }
    }

    fn poll_events(interest: Interest) -> i16 {
        match interest {
            Interest::Read => libc::POLLIN | libc::POLLHUP | libc::POLLERR,
            Interest::Write => libc::POLLOUT,
            Interest::Remove => 0,
        }
    }
}

impl Default for PollNotifier {
    fn default() -> Self {
        PollNotifier::new()
    }
}

impl EventNotifier for PollNotifier {
    fn watch(&self, fd: i32, interest: Interest, cookie: usize) -> CfResult<()> {
        if interest == Interest::Remove {
            return self.remove(fd);
        }
        let mut state = self.state.lock().expect("poll state poisoned");
        state.registrations.insert(fd, Registration { interest, cookie });
        self.may_have_events.store(true, Ordering::Release);
        Ok(())
    }

    fn remove(&self, fd: i32) -> CfResult<()> {
        let mut state = self.state.lock().expect("poll state poisoned");
        state.registrations.remove(&fd);
        self.may_have_events.store(true, Ordering::Release);
        Ok(())
    }

    fn wait(&self, timeout_millis: u64) -> CfResult<WaitOutcome> {
        let mut state = self.state.lock().expect("poll state poisoned");

        if let Some(event) = state.pending.pop_front() {
            state.registrations.remove(&event.fd);
            self.may_have_events.store(true, Ordering::Release);
            return Ok(WaitOutcome::Ready(event));
        }

        if !self.may_have_events.load(Ordering::Acquire) || state.registrations.is_empty() {
            return Ok(WaitOutcome::TimedOut);
        }

        let fds: Vec<i32> = state.registrations.keys().copied().collect();
        let mut pollfds: Vec<libc::pollfd> = fds
            .iter()
            .map(|&fd| libc::pollfd {
                fd,
                events: Self::poll_events(state.registrations[&fd].interest),
                revents: 0,
            })
            .collect();

        let capped = timeout_millis.min(15_000) as i32;
        let nfds = unsafe { libc::poll(pollfds.as_mut_ptr(), pollfds.len() as libc::nfds_t, capped) };

        if nfds < 0 {
            let errno = std::io::Error::last_os_error().raw_os_error().unwrap_or(-1);
            if errno == libc::EINTR {
                return Ok(WaitOutcome::TimedOut);
            }
            return Err(CfError::from_last_errno());
        }
        if nfds == 0 {
            return Ok(WaitOutcome::TimedOut);
        }

        let mut ready: Vec<ReadyEvent> = Vec::new();
        for pfd in &pollfds {
            if pfd.revents == 0 {
                continue;
            }
            let Some(reg) = state.registrations.get(&pfd.fd) else {
                continue;
            };
            let wanted = Self::poll_events(reg.interest);
            if pfd.revents & wanted != 0 {
                ready.push(ReadyEvent {
                    fd: pfd.fd,
                    interest: reg.interest,
                    cookie: reg.cookie,
                });
            }
        }

        if ready.is_empty() {
            return Ok(WaitOutcome::TimedOut);
        }

        let first = ready[0];
        state.registrations.remove(&first.fd);
        for extra in ready.into_iter().skip(1) {
            state.pending.push_back(extra);
        }
        self.may_have_events.store(true, Ordering::Release);
        Ok(WaitOutcome::Ready(first))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{TcpListener, TcpStream};
    use std::os::unix::io::AsRawFd;

    #[test]
    fn one_shot_requires_rearm() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let _client = TcpStream::connect(addr).unwrap();
        let (server_side, _) = listener.accept().unwrap();
        server_side.set_nonblocking(true).unwrap();
        let mut writer = TcpStream::connect(addr).unwrap();
        writer.set_nonblocking(true).unwrap();
        let (server_peer, _) = listener.accept().unwrap();
        server_peer.set_nonblocking(true).unwrap();

        let notifier = PollNotifier::new();
        let fd = writer.as_raw_fd();
        notifier.watch(fd, Interest::Write, 42).unwrap();

        let outcome = notifier.wait(1_000).unwrap();
        match outcome {
            WaitOutcome::Ready(ev) => {
                assert_eq!(ev.fd, fd);
                assert_eq!(ev.cookie, 42);
                assert_eq!(ev.interest, Interest::Write);
            }
            WaitOutcome::TimedOut => panic!("expected a write-ready event"),
        }

        // Without re-arming, the fd has no registration left.
        assert!(!notifier
            .state
            .lock()
            .unwrap()
            .registrations
            .contains_key(&fd));

        notifier.watch(fd, Interest::Write, 42).unwrap();
        let outcome2 = notifier.wait(1_000).unwrap();
        assert!(matches!(outcome2, WaitOutcome::Ready(_)));
    }

    #[test]
    fn gate_avoids_syscall_when_nothing_registered() {
        let notifier = PollNotifier::new();
        let outcome = notifier.wait(50).unwrap();
        assert_eq!(outcome, WaitOutcome::TimedOut);
    }
}
