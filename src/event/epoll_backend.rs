//! Linux epoll backend for [`super::EventNotifier`], ported directly from
//! `CFSocket/epollev.cpp`. Level-triggered epoll is turned into one-shot
//! delivery by de-registering the fd (`epoll_ctl(EPOLL_CTL_DEL)`) the
//! instant an event is handed back, exactly as the original's
//! `select_waitevent` calls `select_removeevent` before returning.
//!
//! Per spec §9's flagged bug: the original matches delivered events with
//! `events == EPOLLIN || EPOLLHUP || EPOLLERR` (equality, not a bitmask),
//! which silently drops any readiness where more than one of those bits is
//! set at once. This port uses a bitmask `.intersects()`-style check
//! instead, per the spec's explicit correction.

use crate::error::{CfError, CfResult};
use crate::event::{EventNotifier, Interest, ReadyEvent, WaitOutcome, MAX_EVENTS};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

struct Registration {
    interest: Interest,
    cookie: usize,
}

pub struct EpollNotifier {
    epfd: i32,
    registrations: Mutex<HashMap<i32, Registration>>,
    /// "There may be events" gate: set by `watch`/`remove`, cleared by
    /// `wait` before it blocks, matching `epollev.cpp`'s `canEpoll`.
    may_have_events: AtomicBool,
}

// Safety: epfd is a plain fd only ever touched through epoll_ctl/epoll_wait,
// both of which are safe to call from multiple threads concurrently; the
// registrations map has its own mutex.
unsafe impl Send for EpollNotifier {}
unsafe impl Sync for EpollNotifier {}

impl EpollNotifier {
    pub fn new() -> CfResult<Self> {
        let epfd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if epfd < 0 {
            return Err(CfError::from_last_errno());
        }
        Ok(EpollNotifier {
            epfd,
            registrations: Mutex::new(HashMap::new()),
            may_have_events: AtomicBool::new(false),
        })
    }

    fn interest_events(interest: Interest) -> u32 {
        match interest {
            // read listens for read-ready, hang-up and error, spec §4.D.
            Interest::Read => (libc::EPOLLIN | libc::EPOLLHUP | libc::EPOLLERR) as u32,
            Interest::Write => libc::EPOLLOUT as u32,
            Interest::Remove => 0,
        }
    }

    fn ctl(&self, op: i32, fd: i32, events: u32) -> CfResult<()> {
        let mut ev = libc::epoll_event {
            events,
            u64: fd as u64,
        };
        let ev_ptr = if op == libc::EPOLL_CTL_DEL {
            std::ptr::null_mut()
        } else {
            &mut ev as *mut _
        };
        let rc = unsafe { libc::epoll_ctl(self.epfd, op, fd, ev_ptr) };
        if rc < 0 {
            return Err(CfError::from_last_errno());
        }
        Ok(())
    }
}

impl EventNotifier for EpollNotifier {
    fn watch(&self, fd: i32, interest: Interest, cookie: usize) -> CfResult<()> {
        if interest == Interest::Remove {
            return self.remove(fd);
        }
        let mut registrations = self.registrations.lock().expect("registrations poisoned");
        let op = if registrations.contains_key(&fd) {
            libc::EPOLL_CTL_MOD
        } else {
            libc::EPOLL_CTL_ADD
        };
        self.ctl(op, fd, Self::interest_events(interest))?;
        registrations.insert(fd, Registration { interest, cookie });
        self.may_have_events.store(true, Ordering::Release);
        Ok(())
    }

    fn remove(&self, fd: i32) -> CfResult<()> {
        let mut registrations = self.registrations.lock().expect("registrations poisoned");
        if registrations.remove(&fd).is_some() {
            // ENOENT here would mean the kernel already forgot this fd
            // (e.g. it was closed); that's fine, not an error for us.
            let _ = self.ctl(libc::EPOLL_CTL_DEL, fd, 0);
        }
        self.may_have_events.store(true, Ordering::Release);
        Ok(())
    }

    fn wait(&self, timeout_millis: u64) -> CfResult<WaitOutcome> {
        if !self.may_have_events.load(Ordering::Acquire) {
            return Ok(WaitOutcome::TimedOut);
        }

        let capped = timeout_millis.min(15_000) as i32;
        let mut events: Vec<libc::epoll_event> = vec![libc::epoll_event { events: 0, u64: 0 }; MAX_EVENTS.min(1024)];
        let nfds = unsafe {
            libc::epoll_wait(self.epfd, events.as_mut_ptr(), events.len() as i32, capped)
        };

        if nfds < 0 {
            let errno = std::io::Error::last_os_error().raw_os_error().unwrap_or(-1);
            if errno == libc::EINTR {
                return Ok(WaitOutcome::TimedOut);
            }
            return Err(CfError::from_last_errno());
        }
        if nfds == 0 {
            // Matches `nfds == 0` branch in epollev.cpp: keep polling.
            return Ok(WaitOutcome::TimedOut);
        }

        let mut registrations = self.registrations.lock().expect("registrations poisoned");
        for raw in &events[..nfds as usize] {
            let fd = raw.u64 as i32;
            let Some(reg) = registrations.get(&fd) else {
                continue;
            };
            let bits = raw.events;
            let matched = match reg.interest {
                Interest::Read => {
                    (bits & (libc::EPOLLIN | libc::EPOLLHUP | libc::EPOLLERR) as u32) != 0
                }
                Interest::Write => (bits & libc::EPOLLOUT as u32) != 0,
                Interest::Remove => false,
            };
            if !matched {
                continue;
            }
            let event = ReadyEvent {
                fd,
                interest: reg.interest,
                cookie: reg.cookie,
            };
            registrations.remove(&fd);
            drop(registrations);
            let _ = self.ctl(libc::EPOLL_CTL_DEL, fd, 0);
            self.may_have_events.store(true, Ordering::Release);
            return Ok(WaitOutcome::Ready(event));
        }

        Ok(WaitOutcome::TimedOut)
    }
}

impl Drop for EpollNotifier {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.epfd);
        }
    }
}
