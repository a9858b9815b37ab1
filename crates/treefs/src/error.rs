//! Error types for tree operations and capability calls.
//!
//! Two kinds of failure flow through this crate:
//!
//! - [`Errno`]: the outcome of a filesystem request. Capability objects
//!   return these and the bridge forwards them to the kernel verbatim.
//! - [`TreeError`]: misuse of the inode tree itself (linking a directory
//!   below its own descendant, reusing a live inode number). These are
//!   programming errors of the filesystem author, not filesystem-visible
//!   outcomes.

use std::fmt;
use std::io;
use thiserror::Error;

/// A POSIX error number returned by a filesystem operation.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Errno(i32);

impl Errno {
    pub const ENOENT: Errno = Errno(libc::ENOENT);
    pub const EIO: Errno = Errno(libc::EIO);
    pub const EBADF: Errno = Errno(libc::EBADF);
    pub const EAGAIN: Errno = Errno(libc::EAGAIN);
    pub const EACCES: Errno = Errno(libc::EACCES);
    pub const EEXIST: Errno = Errno(libc::EEXIST);
    pub const EXDEV: Errno = Errno(libc::EXDEV);
    pub const ENOTDIR: Errno = Errno(libc::ENOTDIR);
    pub const EISDIR: Errno = Errno(libc::EISDIR);
    pub const EINVAL: Errno = Errno(libc::EINVAL);
    pub const EROFS: Errno = Errno(libc::EROFS);
    pub const ERANGE: Errno = Errno(libc::ERANGE);
    pub const ENOSYS: Errno = Errno(libc::ENOSYS);
    pub const ENOTEMPTY: Errno = Errno(libc::ENOTEMPTY);
    pub const ENOTSUP: Errno = Errno(libc::ENOTSUP);
    pub const ENOTCONN: Errno = Errno(libc::ENOTCONN);
    pub const EINTR: Errno = Errno(libc::EINTR);
    pub const E2BIG: Errno = Errno(libc::E2BIG);

    /// "No such attribute": `ENODATA` on Linux, `ENOATTR` on the BSDs.
    #[cfg(target_os = "linux")]
    pub const ENOATTR: Errno = Errno(libc::ENODATA);
    #[cfg(not(target_os = "linux"))]
    pub const ENOATTR: Errno = Errno(libc::ENOATTR);

    /// Wraps a raw error number.
    pub const fn from_raw(code: i32) -> Self {
        Errno(code)
    }

    /// Returns the raw error number, suitable for a kernel reply.
    pub const fn raw(self) -> i32 {
        self.0
    }
}

impl fmt::Debug for Errno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Errno({}: {})", self.0, io::Error::from_raw_os_error(self.0))
    }
}

impl fmt::Display for Errno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&io::Error::from_raw_os_error(self.0), f)
    }
}

impl std::error::Error for Errno {}

impl From<io::Error> for Errno {
    fn from(e: io::Error) -> Self {
        io_error_to_errno(&e)
    }
}

impl From<Errno> for io::Error {
    fn from(e: Errno) -> Self {
        io::Error::from_raw_os_error(e.0)
    }
}

/// Result type for filesystem operations.
pub type OpResult<T> = Result<T, Errno>;

/// Converts an I/O error to an [`Errno`], falling back to EIO when the
/// error does not carry an OS error number.
pub fn io_error_to_errno(e: &io::Error) -> Errno {
    e.raw_os_error().map_or(Errno::EIO, Errno)
}

/// Extension trait to convert errors to errno.
pub trait ToErrno {
    /// Converts this error to an [`Errno`].
    fn to_errno(&self) -> Errno;
}

impl ToErrno for io::Error {
    fn to_errno(&self) -> Errno {
        io_error_to_errno(self)
    }
}

impl ToErrno for Errno {
    fn to_errno(&self) -> Errno {
        *self
    }
}

/// Violations of the inode tree's structural invariants.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TreeError {
    /// The name is already taken and overwrite was not requested.
    #[error("name {name:?} already exists in directory {parent}")]
    Exists { parent: u64, name: String },

    /// Children can only be linked below a directory.
    #[error("inode {0} is not a directory")]
    NotDirectory(u64),

    /// The link would make a directory its own descendant.
    #[error("linking inode {child} below {parent} would create a cycle")]
    WouldCycle { parent: u64, child: u64 },

    /// An explicit inode number collides with a live inode.
    #[error("inode number {0} is already in use")]
    DuplicateIno(u64),

    /// The session owning the inode has been dropped.
    #[error("the session owning this inode has been dropped")]
    Detached,
}

impl TreeError {
    /// Converts this error to the errno closest in meaning.
    pub fn to_errno(&self) -> Errno {
        match self {
            TreeError::Exists { .. } => Errno::EEXIST,
            TreeError::NotDirectory(_) => Errno::ENOTDIR,
            TreeError::WouldCycle { .. } => Errno::EINVAL,
            TreeError::DuplicateIno(_) => Errno::EIO,
            TreeError::Detached => Errno::ENOTCONN,
        }
    }
}

impl ToErrno for TreeError {
    fn to_errno(&self) -> Errno {
        TreeError::to_errno(self)
    }
}
