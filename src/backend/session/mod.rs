//!
//! Abstraction of privileged device access.
//!
//! Input device nodes usually require elevated privileges to open. A
//! [`Session`] is the broker through which the evdev backend opens and
//! closes them, so that the policy (direct open, logind, seat daemon, ...)
//! stays with the host. The backend itself never touches a path directly.

use std::fmt;
use std::os::unix::io::OwnedFd;
use std::path::Path;

use rustix::fs::{Mode, OFlags};
use rustix::io::Errno;
use tracing::instrument;

/// General session interface.
///
/// Provides a way to open and close device nodes on behalf of the backend.
pub trait Session {
    /// Error type of the implementation
    type Error: AsErrno + fmt::Debug;

    /// Opens a device at the given `path` with the given flags.
    fn open(&mut self, path: &Path, flags: OFlags) -> Result<OwnedFd, Self::Error>;
    /// Closes a file descriptor previously returned by [`Session::open`].
    fn close(&mut self, fd: OwnedFd) -> Result<(), Self::Error>;

    /// Which seat this session is on
    fn seat(&self) -> String;
}

/// Allows errors to be described by an error number
pub trait AsErrno {
    /// Returns the error number representing this error, if any
    fn as_errno(&self) -> Option<i32>;
}

impl AsErrno for Errno {
    fn as_errno(&self) -> Option<i32> {
        Some(self.raw_os_error())
    }
}

/// [`Session`] that opens devices with the privileges of the calling
/// process.
///
/// Suitable for tests and for hosts running as root or with direct access
/// to the input group; everyone else should broker through their session
/// manager instead.
#[derive(Debug, Clone)]
pub struct DirectSession {
    seat: String,
}

impl DirectSession {
    /// Creates a direct session for the given seat name.
    pub fn new<N: Into<String>>(seat: N) -> DirectSession {
        DirectSession { seat: seat.into() }
    }
}

impl Session for DirectSession {
    type Error = Errno;

    #[instrument(level = "debug", skip(self), fields(seat = %self.seat))]
    fn open(&mut self, path: &Path, flags: OFlags) -> Result<OwnedFd, Self::Error> {
        rustix::fs::open(path, flags | OFlags::CLOEXEC, Mode::empty())
    }

    fn close(&mut self, fd: OwnedFd) -> Result<(), Self::Error> {
        drop(fd);
        Ok(())
    }

    fn seat(&self) -> String {
        self.seat.clone()
    }
}

impl<S: Session> Session for &mut S {
    type Error = S::Error;

    fn open(&mut self, path: &Path, flags: OFlags) -> Result<OwnedFd, Self::Error> {
        (**self).open(path, flags)
    }

    fn close(&mut self, fd: OwnedFd) -> Result<(), Self::Error> {
        (**self).close(fd)
    }

    fn seat(&self) -> String {
        (**self).seat()
    }
}
