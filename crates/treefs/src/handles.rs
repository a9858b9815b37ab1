//! Open file and directory handles.
//!
//! Files and directories share one id space, so a handle id identifies
//! its kind unambiguously. Id 0 is never issued.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::dirstream::DirStream;
use crate::node::FileHandle;
use crate::types::{DirEntry, OpenFlags};

/// Concurrent map from handle ids to values, with auto-assigned ids.
#[derive(Debug)]
pub(crate) struct HandleTable<V> {
    handles: DashMap<u64, V>,
    next_id: AtomicU64,
}

impl<V> HandleTable<V> {
    pub(crate) fn new() -> Self {
        Self {
            handles: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Inserts `value` under a fresh id and returns the id.
    pub(crate) fn insert(&self, value: V) -> u64 {
        let mut value = Some(value);
        loop {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            if id == 0 {
                continue;
            }
            if let Entry::Vacant(entry) = self.handles.entry(id) {
                entry.insert(value.take().expect("value is inserted at most once"));
                return id;
            }
        }
    }

    pub(crate) fn remove(&self, id: u64) -> Option<V> {
        self.handles.remove(&id).map(|(_, v)| v)
    }

    pub(crate) fn len(&self) -> usize {
        self.handles.len()
    }
}

impl<V: Clone> HandleTable<V> {
    pub(crate) fn get(&self, id: u64) -> Option<V> {
        self.handles.get(&id).map(|r| r.value().clone())
    }
}

/// State of an open regular file.
pub(crate) struct OpenFile {
    pub(crate) ino: u64,
    pub(crate) handle: Option<Arc<dyn FileHandle>>,
    pub(crate) flags: OpenFlags,
}

impl OpenFile {
    pub(crate) fn handle(&self) -> Option<&dyn FileHandle> {
        self.handle.as_deref()
    }
}

/// State of an open directory listing.
pub(crate) struct OpenDir {
    pub(crate) ino: u64,
    /// The listing in progress; `None` until the first read, or after a
    /// restart.
    pub(crate) stream: Option<Box<dyn DirStream>>,
    /// An entry that was taken from the stream but did not fit into the
    /// previous reply.
    pub(crate) pending: Option<DirEntry>,
    /// Offset of the next entry to emit.
    pub(crate) position: i64,
}

impl OpenDir {
    pub(crate) fn new(ino: u64) -> Self {
        Self {
            ino,
            stream: None,
            pending: None,
            position: 0,
        }
    }

    /// Drops the listing so the next read starts from scratch.
    pub(crate) fn reset(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.close();
        }
        self.pending = None;
        self.position = 0;
    }
}

impl Drop for OpenDir {
    fn drop(&mut self) {
        if let Some(stream) = self.stream.as_mut() {
            stream.close();
        }
    }
}

#[derive(Clone)]
pub(crate) enum OpenHandle {
    File(Arc<OpenFile>),
    Dir(Arc<Mutex<OpenDir>>),
}
