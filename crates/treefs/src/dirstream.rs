//! Directory streams returned by `readdir`.

use std::collections::VecDeque;

use crate::error::{Errno, OpResult};
use crate::types::DirEntry;

/// A finite, lazily consumed sequence of directory entries.
///
/// `has_next` may be called again after exhaustion or after `close`;
/// `next` is only valid right after `has_next` returned true. `close` is
/// idempotent.
pub trait DirStream: Send {
    fn has_next(&mut self) -> bool;

    fn next(&mut self) -> OpResult<DirEntry>;

    fn close(&mut self) {}
}

/// A stream over a list materialized up front.
#[derive(Debug, Default)]
pub struct ListDirStream {
    entries: VecDeque<DirEntry>,
    closed: bool,
}

impl ListDirStream {
    pub fn new(entries: Vec<DirEntry>) -> Self {
        Self {
            entries: entries.into(),
            closed: false,
        }
    }

    /// Number of entries not yet consumed.
    pub fn remaining(&self) -> usize {
        self.entries.len()
    }
}

impl From<Vec<DirEntry>> for ListDirStream {
    fn from(entries: Vec<DirEntry>) -> Self {
        Self::new(entries)
    }
}

impl DirStream for ListDirStream {
    fn has_next(&mut self) -> bool {
        !self.closed && !self.entries.is_empty()
    }

    fn next(&mut self) -> OpResult<DirEntry> {
        if self.closed {
            return Err(Errno::EBADF);
        }
        self.entries.pop_front().ok_or(Errno::EINVAL)
    }

    fn close(&mut self) {
        self.closed = true;
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FileKind;

    #[test]
    fn test_list_stream_drains_in_order() {
        let mut stream = ListDirStream::new(vec![
            DirEntry::new("a", 10, FileKind::RegularFile),
            DirEntry::new("b", 11, FileKind::Directory),
        ]);
        assert!(stream.has_next());
        assert_eq!(stream.next().unwrap().name, "a");
        assert!(stream.has_next());
        assert_eq!(stream.next().unwrap().name, "b");
        assert!(!stream.has_next());
        assert!(!stream.has_next());
        assert_eq!(stream.next(), Err(Errno::EINVAL));
    }

    #[test]
    fn test_close_is_idempotent() {
        let mut stream = ListDirStream::new(vec![DirEntry::new("a", 1, FileKind::RegularFile)]);
        stream.close();
        stream.close();
        assert!(!stream.has_next());
        assert_eq!(stream.remaining(), 0);
    }
}
