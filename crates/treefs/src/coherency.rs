//! Kernel cache coherency.
//!
//! The controller does two things:
//!
//! - It turns the session options (and per-reply overrides) into the
//!   entry, attribute and negative-lookup timeouts sent to the kernel.
//! - It sends cache invalidations to the transport through an
//!   [`InvalidationSink`].
//!
//! # Invalidation precedence
//!
//! An open that returns `KEEP_CACHE` lets the kernel serve the next open
//! from pages it already has. Those pages are dropped in two ways:
//!
//! 1. Explicitly, by [`Inode::notify_content`](crate::Inode::notify_content).
//!    This is forwarded to the transport immediately, regardless of any
//!    attribute state. It is the only way to drop content whose size and
//!    mtime did not change.
//! 2. Automatically, when a `getattr`, `lookup` or `setattr` reply reports a
//!    size or mtime for a regular file that differs from the last one seen.
//!    The controller then invalidates the whole file before the reply is
//!    handed back, so the kernel never pairs the new attributes with stale
//!    pages.
//!
//! Both paths tolerate the transport not knowing the inode any more: the
//! automatic path logs and continues, the explicit path reports the errno
//! to the caller.

use dashmap::DashMap;
use std::ffi::OsStr;
use std::io;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, SystemTime};
use tracing::{debug, trace};

use crate::config::Options;
use crate::error::{Errno, OpResult, io_error_to_errno};
use crate::types::{Attr, FileKind};

/// The outbound side of the transport: requests to drop kernel caches.
///
/// Implemented by the FUSE adapter on top of the kernel notification
/// channel. Both calls fail (typically with ENOENT) when the kernel does
/// not hold the inode.
pub trait InvalidationSink: Send + Sync {
    /// Drops cached pages of `ino` in `[offset, offset + len)`. A `len`
    /// of 0 means "to the end of the file"; a negative offset drops only
    /// the cached attributes.
    fn inval_inode(&self, ino: u64, offset: i64, len: i64) -> io::Result<()>;

    /// Drops the cached lookup of `name` in directory `parent`.
    fn inval_entry(&self, parent: u64, name: &OsStr) -> io::Result<()>;
}

/// The attributes that decide whether cached content is still valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ContentStamp {
    size: u64,
    mtime: SystemTime,
}

/// Computes cache timeouts and issues invalidations.
pub struct CacheController {
    entry_timeout: Option<Duration>,
    attr_timeout: Option<Duration>,
    negative_timeout: Option<Duration>,
    sink: OnceLock<Arc<dyn InvalidationSink>>,
    stamps: DashMap<u64, ContentStamp>,
}

impl CacheController {
    pub(crate) fn new(options: &Options) -> Self {
        Self {
            entry_timeout: options.entry_timeout,
            attr_timeout: options.attr_timeout,
            negative_timeout: options.negative_timeout,
            sink: OnceLock::new(),
            stamps: DashMap::new(),
        }
    }

    /// Connects the transport. Only the first call takes effect; returns
    /// false if a sink was already attached.
    pub fn attach(&self, sink: Arc<dyn InvalidationSink>) -> bool {
        let attached = self.sink.set(sink).is_ok();
        if attached {
            debug!("invalidation sink attached");
        }
        attached
    }

    pub fn is_attached(&self) -> bool {
        self.sink.get().is_some()
    }

    /// Entry timeout for a reply: the override, else the session option,
    /// else zero.
    pub fn entry_timeout(&self, override_timeout: Option<Duration>) -> Duration {
        override_timeout
            .or(self.entry_timeout)
            .unwrap_or(Duration::ZERO)
    }

    /// Attribute timeout for a reply, resolved like
    /// [`CacheController::entry_timeout`].
    pub fn attr_timeout(&self, override_timeout: Option<Duration>) -> Duration {
        override_timeout
            .or(self.attr_timeout)
            .unwrap_or(Duration::ZERO)
    }

    /// Timeout for negative lookups, if negative caching is enabled.
    pub fn negative_timeout(&self) -> Option<Duration> {
        self.negative_timeout.filter(|t| !t.is_zero())
    }

    /// Records the size and mtime in a reply and invalidates the file's
    /// content if they changed since the last reply.
    pub(crate) fn observe(&self, attr: &Attr) {
        if attr.kind != FileKind::RegularFile {
            return;
        }
        let stamp = ContentStamp {
            size: attr.size,
            mtime: attr.mtime,
        };
        let previous = self.stamps.insert(attr.ino, stamp);
        if let Some(previous) = previous
            && previous != stamp
        {
            debug!(
                inode = attr.ino,
                old_size = previous.size,
                new_size = stamp.size,
                "content changed, invalidating cached pages"
            );
            if let Err(e) = self.send_inval_inode(attr.ino, 0, 0) {
                debug!(inode = attr.ino, error = %e, "automatic invalidation failed");
            }
        }
    }

    /// Forwards an explicit content invalidation.
    pub fn notify_content(&self, ino: u64, offset: i64, len: i64) -> OpResult<()> {
        trace!(inode = ino, offset, len, "notify_content");
        self.send_inval_inode(ino, offset, len).inspect_err(|e| {
            debug!(inode = ino, error = %e, "content invalidation not delivered");
        })
    }

    /// Forwards an explicit entry invalidation.
    pub fn notify_entry(&self, parent: u64, name: &str) -> OpResult<()> {
        trace!(parent, name, "notify_entry");
        let sink = self.sink.get().ok_or(Errno::ENOTCONN)?;
        sink.inval_entry(parent, OsStr::new(name))
            .map_err(|e| io_error_to_errno(&e))
            .inspect_err(|e| {
                debug!(parent, name, error = %e, "entry invalidation not delivered");
            })
    }

    fn send_inval_inode(&self, ino: u64, offset: i64, len: i64) -> OpResult<()> {
        let sink = self.sink.get().ok_or(Errno::ENOTCONN)?;
        sink.inval_inode(ino, offset, len)
            .map_err(|e| io_error_to_errno(&e))
    }

    /// Drops bookkeeping for a reclaimed inode.
    pub(crate) fn forget(&self, ino: u64) {
        self.stamps.remove(&ino);
    }
}
