//! Errors raised while mounting or unmounting a session.

use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Mount lifecycle errors.
///
/// Request-level failures never show up here; they travel back to the
/// kernel as an errno.
#[derive(Debug, Error)]
pub enum MountError {
    /// The mount syscall (or fusermount) failed.
    #[error("failed to mount filesystem: {0}")]
    Mount(#[from] io::Error),

    /// The mountpoint is missing or not a directory.
    #[error("mountpoint is not a directory: {}", .0.display())]
    NotADirectory(PathBuf),

    /// The mount call did not return in time, usually because of a stale
    /// mount at the same path.
    #[error("mount did not complete within {0:?}")]
    Timeout(Duration),

    /// The mount thread went away without reporting back.
    #[error("mount thread terminated unexpectedly")]
    ThreadLost,
}

/// Result type for mount operations.
pub type MountResult<T> = Result<T, MountError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_names_the_path() {
        let err = MountError::NotADirectory(PathBuf::from("/nowhere/mnt"));
        assert_eq!(err.to_string(), "mountpoint is not a directory: /nowhere/mnt");
    }

    #[test]
    fn test_io_errors_convert() {
        let err: MountError = io::Error::from_raw_os_error(libc::EPERM).into();
        assert!(matches!(err, MountError::Mount(_)));
    }
}
