//! Normalized error kinds (spec.md §7). Every syscall wrapper in this crate
//! converts a platform-native error code into exactly one of these variants
//! before it crosses a module boundary; nothing here unwinds across a thread.

use std::io;

/// Platform-independent error surface for every operation in this crate.
///
/// `WouldBlock` is not a failure: callers of [`crate::socket::Socket::read`]
/// / `write` treat it as "re-arm interest and yield". `ConnectionReset`,
/// `NotConnected` and `Interrupted` are terminal for the owning session;
/// everything else propagates.
#[derive(Debug, thiserror::Error)]
pub enum CfError {
    #[error("no error")]
    NoError,
    #[error("not connected")]
    NotConnected,
    #[error("interrupted")]
    Interrupted,
    #[error("would block")]
    WouldBlock,
    #[error("address in use")]
    AddressInUse,
    #[error("address not available")]
    AddressNotAvailable,
    #[error("connection reset")]
    ConnectionReset,
    #[error("operation in progress")]
    InProgress,
    #[error("too many descriptors")]
    TooManyDescriptors,
    #[error("not found")]
    NotFound,
    #[error("unexpected os error: {0}")]
    Unexpected(i32),
}

impl CfError {
    /// `true` for the three kinds spec §7 calls terminal for a session.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CfError::ConnectionReset | CfError::NotConnected | CfError::Interrupted
        )
    }

    fn from_errno(errno: i32) -> CfError {
        match errno {
            0 => CfError::NoError,
            libc::ENOTCONN => CfError::NotConnected,
            libc::EINTR => CfError::Interrupted,
            libc::EAGAIN | libc::EWOULDBLOCK => CfError::WouldBlock,
            libc::EADDRINUSE => CfError::AddressInUse,
            libc::EADDRNOTAVAIL => CfError::AddressNotAvailable,
            libc::ECONNRESET | libc::EPIPE => CfError::ConnectionReset,
            libc::EINPROGRESS => CfError::InProgress,
            libc::EMFILE | libc::ENFILE => CfError::TooManyDescriptors,
            libc::ENOENT => CfError::NotFound,
            other => CfError::Unexpected(other),
        }
    }

    /// Normalizes whatever the calling thread's `errno` currently holds.
    pub fn from_last_errno() -> CfError {
        CfError::from_errno(io::Error::last_os_error().raw_os_error().unwrap_or(-1))
    }
}

impl From<nix::errno::Errno> for CfError {
    fn from(e: nix::errno::Errno) -> CfError {
        CfError::from_errno(e as i32)
    }
}

impl From<io::Error> for CfError {
    fn from(e: io::Error) -> CfError {
        match e.raw_os_error() {
            Some(errno) => CfError::from_errno(errno),
            None => CfError::Unexpected(-1),
        }
    }
}

pub type CfResult<T> = Result<T, CfError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_common_errnos() {
        assert!(matches!(
            CfError::from_errno(libc::EAGAIN),
            CfError::WouldBlock
        ));
        assert!(matches!(
            CfError::from_errno(libc::ECONNRESET),
            CfError::ConnectionReset
        ));
        assert!(matches!(CfError::from_errno(libc::EPIPE), CfError::ConnectionReset));
    }

    #[test]
    fn terminal_kinds() {
        assert!(CfError::ConnectionReset.is_terminal());
        assert!(CfError::NotConnected.is_terminal());
        assert!(CfError::Interrupted.is_terminal());
        assert!(!CfError::WouldBlock.is_terminal());
    }
}
