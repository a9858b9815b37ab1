//! Capability contracts implemented by filesystem authors.
//!
//! Every node implements [`Node`], the base capability. The optional
//! capability sets ([`XattrOps`], [`SymlinkOps`], [`FileOps`], [`LockOps`],
//! [`DirOps`], [`MutableDirOps`]) are opted into by overriding the matching
//! `as_*` probe on [`Node`] to return `Some(self)`:
//!
//! ```ignore
//! impl Node for Hello {
//!     fn getattr(&self, _ctx: &Context, _node: &Inode) -> OpResult<Attr> {
//!         Ok(Attr { size: 5, perm: 0o444, ..Attr::default() })
//!     }
//!
//!     fn as_file(self: Arc<Self>) -> Option<Arc<dyn FileOps>> {
//!         Some(self)
//!     }
//! }
//!
//! impl FileOps for Hello {
//!     fn open(&self, _ctx: &Context, _node: &Inode, _flags: i32) -> OpResult<Opened> {
//!         Ok(Opened::stateless(OpenFlags::KEEP_CACHE))
//!     }
//!     // read() defaults to the handle, so override it too.
//! }
//! ```
//!
//! Probes are evaluated once when the inode is created. A [`LockOps`]
//! implementation also counts as [`FileOps`], and [`MutableDirOps`] as
//! [`DirOps`]. Every method has a default, so an implementation only
//! overrides what it supports; see the module docs of
//! [`defaults`](crate::defaults) for the fallback table.

use bytes::Bytes;
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::context::Context;
use crate::defaults;
use crate::dirstream::DirStream;
use crate::error::{Errno, OpResult};
use crate::inode::{Inode, InodeRef};
use crate::types::{Attr, EntryOut, FileLock, OpenFlags, SetAttr, StatFs};

/// The base capability every node implements.
pub trait Node: Send + Sync + 'static {
    /// Filesystem statistics. Defaults to a zeroed record, which some
    /// kernels require to accept the mount at all.
    fn statfs(&self, _ctx: &Context, _node: &Inode) -> OpResult<StatFs> {
        Ok(StatFs::default())
    }

    /// Checks whether the caller may access the node with `mask`
    /// (`R_OK`/`W_OK`/`X_OK` bits). Defaults to a POSIX permission check
    /// against [`Node::getattr`].
    fn access(&self, ctx: &Context, node: &Inode, mask: u32) -> OpResult<()> {
        let attr = self.getattr(ctx, node)?;
        defaults::check_access(ctx, &attr, mask)
    }

    /// Reads attributes. The bridge fills in `ino` and `kind`.
    fn getattr(&self, _ctx: &Context, _node: &Inode) -> OpResult<Attr> {
        Ok(Attr::default())
    }

    /// Changes attributes and returns the resulting ones.
    fn setattr(&self, _ctx: &Context, _node: &Inode, _changes: &SetAttr) -> OpResult<Attr> {
        Err(Errno::EROFS)
    }

    /// Called once, right after this object is attached to its inode.
    fn on_add(&self, _ctx: &Context, _node: &Inode) {}

    fn as_xattr(self: Arc<Self>) -> Option<Arc<dyn XattrOps>> {
        None
    }

    fn as_symlink(self: Arc<Self>) -> Option<Arc<dyn SymlinkOps>> {
        None
    }

    fn as_file(self: Arc<Self>) -> Option<Arc<dyn FileOps>> {
        None
    }

    fn as_lock(self: Arc<Self>) -> Option<Arc<dyn LockOps>> {
        None
    }

    fn as_dir(self: Arc<Self>) -> Option<Arc<dyn DirOps>> {
        None
    }

    fn as_mutable_dir(self: Arc<Self>) -> Option<Arc<dyn MutableDirOps>> {
        None
    }
}

/// Extended attributes. The bridge handles buffer size negotiation, so
/// implementations always return the complete value or name list.
pub trait XattrOps: Node {
    fn getxattr(&self, _ctx: &Context, _node: &Inode, _name: &OsStr) -> OpResult<Vec<u8>> {
        Err(Errno::ENOATTR)
    }

    fn setxattr(
        &self,
        _ctx: &Context,
        _node: &Inode,
        _name: &OsStr,
        _value: &[u8],
        _flags: i32,
    ) -> OpResult<()> {
        Err(Errno::EROFS)
    }

    fn removexattr(&self, _ctx: &Context, _node: &Inode, _name: &OsStr) -> OpResult<()> {
        Err(Errno::ENOATTR)
    }

    fn listxattr(&self, _ctx: &Context, _node: &Inode) -> OpResult<Vec<OsString>> {
        Ok(Vec::new())
    }
}

/// Symbolic links.
pub trait SymlinkOps: Node {
    fn readlink(&self, ctx: &Context, node: &Inode) -> OpResult<PathBuf>;
}

/// What a successful `open` hands back.
pub struct Opened {
    /// Per-open state. Without one, file calls go to the node itself.
    pub handle: Option<Box<dyn FileHandle>>,
    pub flags: OpenFlags,
}

impl Opened {
    /// An open without per-open state.
    pub fn stateless(flags: OpenFlags) -> Self {
        Self {
            handle: None,
            flags,
        }
    }

    /// An open backed by `handle`.
    pub fn with_handle(handle: impl FileHandle + 'static, flags: OpenFlags) -> Self {
        Self {
            handle: Some(Box::new(handle)),
            flags,
        }
    }
}

impl std::fmt::Debug for Opened {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Opened")
            .field("handle", &self.handle.is_some())
            .field("flags", &self.flags)
            .finish()
    }
}

/// Regular file operations.
///
/// Every call receives the [`FileHandle`] returned by `open`/`create`, if
/// there was one. The defaults forward to that handle and fail with
/// ENOTSUP (EROFS for writes) when there is none.
pub trait FileOps: Node {
    fn open(&self, _ctx: &Context, _node: &Inode, _flags: i32) -> OpResult<Opened> {
        Err(Errno::ENOTSUP)
    }

    fn read(
        &self,
        ctx: &Context,
        _node: &Inode,
        fh: Option<&dyn FileHandle>,
        offset: u64,
        size: u32,
    ) -> OpResult<Bytes> {
        fh.map_or(Err(Errno::ENOTSUP), |h| h.read(ctx, offset, size))
    }

    fn write(
        &self,
        ctx: &Context,
        _node: &Inode,
        fh: Option<&dyn FileHandle>,
        offset: u64,
        data: &[u8],
    ) -> OpResult<u32> {
        fh.map_or(Err(Errno::EROFS), |h| h.write(ctx, offset, data))
    }

    fn fsync(
        &self,
        ctx: &Context,
        _node: &Inode,
        fh: Option<&dyn FileHandle>,
        datasync: bool,
    ) -> OpResult<()> {
        fh.map_or(Err(Errno::ENOTSUP), |h| h.fsync(ctx, datasync))
    }

    fn flush(&self, ctx: &Context, _node: &Inode, fh: Option<&dyn FileHandle>) -> OpResult<()> {
        fh.map_or(Err(Errno::ENOTSUP), |h| h.flush(ctx))
    }

    fn release(&self, ctx: &Context, _node: &Inode, fh: Option<&dyn FileHandle>) -> OpResult<()> {
        fh.map_or(Err(Errno::ENOTSUP), |h| h.release(ctx))
    }

    fn allocate(
        &self,
        ctx: &Context,
        _node: &Inode,
        fh: Option<&dyn FileHandle>,
        offset: u64,
        length: u64,
        mode: i32,
    ) -> OpResult<()> {
        fh.map_or(Err(Errno::ENOTSUP), |h| h.allocate(ctx, offset, length, mode))
    }

    /// `lseek` for `SEEK_DATA`/`SEEK_HOLE`. Without a handle the file is
    /// treated as having no holes and the offset is returned unchanged.
    fn lseek(
        &self,
        ctx: &Context,
        _node: &Inode,
        fh: Option<&dyn FileHandle>,
        offset: u64,
        whence: i32,
    ) -> OpResult<u64> {
        match fh {
            Some(h) => h.lseek(ctx, offset, whence),
            None if whence == libc::SEEK_DATA || whence == libc::SEEK_HOLE => Ok(offset),
            None => Err(Errno::ENOTSUP),
        }
    }

    /// `getattr` on an open file. Tries the handle first and falls back to
    /// the node when the handle has no opinion (ENOTSUP).
    fn fgetattr(&self, ctx: &Context, node: &Inode, fh: Option<&dyn FileHandle>) -> OpResult<Attr> {
        if let Some(h) = fh {
            match h.getattr(ctx) {
                Err(Errno::ENOTSUP) => {}
                other => return other,
            }
        }
        node.operations().getattr(ctx, node)
    }

    /// `setattr` on an open file, e.g. `ftruncate`. Same fallback rule as
    /// [`FileOps::fgetattr`].
    fn fsetattr(
        &self,
        ctx: &Context,
        node: &Inode,
        fh: Option<&dyn FileHandle>,
        changes: &SetAttr,
    ) -> OpResult<Attr> {
        if let Some(h) = fh {
            match h.setattr(ctx, changes) {
                Err(Errno::ENOTSUP) => {}
                other => return other,
            }
        }
        node.operations().setattr(ctx, node, changes)
    }

    #[allow(clippy::too_many_arguments)]
    fn copy_file_range(
        &self,
        _ctx: &Context,
        _node: &Inode,
        _fh_in: Option<&dyn FileHandle>,
        _offset_in: u64,
        _out: &Inode,
        _fh_out: Option<&dyn FileHandle>,
        _offset_out: u64,
        _len: u64,
        _flags: u32,
    ) -> OpResult<u32> {
        Err(Errno::EROFS)
    }
}

/// POSIX record locks. Implementing this implies [`FileOps`].
pub trait LockOps: FileOps {
    fn getlk(
        &self,
        ctx: &Context,
        _node: &Inode,
        fh: Option<&dyn FileHandle>,
        owner: u64,
        lock: &FileLock,
        flags: u32,
    ) -> OpResult<FileLock> {
        fh.map_or(Err(Errno::ENOTSUP), |h| h.getlk(ctx, owner, lock, flags))
    }

    fn setlk(
        &self,
        ctx: &Context,
        _node: &Inode,
        fh: Option<&dyn FileHandle>,
        owner: u64,
        lock: &FileLock,
        flags: u32,
    ) -> OpResult<()> {
        fh.map_or(Err(Errno::ENOTSUP), |h| h.setlk(ctx, owner, lock, flags))
    }

    /// Blocking variant of [`LockOps::setlk`].
    fn setlkw(
        &self,
        ctx: &Context,
        _node: &Inode,
        fh: Option<&dyn FileHandle>,
        owner: u64,
        lock: &FileLock,
        flags: u32,
    ) -> OpResult<()> {
        fh.map_or(Err(Errno::ENOTSUP), |h| h.setlkw(ctx, owner, lock, flags))
    }
}

/// Read-only directory operations.
pub trait DirOps: Node {
    /// Resolves `name`. The returned inode is linked under this directory
    /// by the bridge; do not link it yourself. Defaults to the children
    /// already in the tree.
    fn lookup(&self, ctx: &Context, node: &Inode, name: &str) -> OpResult<EntryOut> {
        defaults::lookup_child(ctx, node, name)
    }

    fn opendir(&self, _ctx: &Context, _node: &Inode) -> OpResult<()> {
        Ok(())
    }

    /// Lists the directory. Defaults to a snapshot of the tree's children.
    fn readdir(&self, _ctx: &Context, node: &Inode) -> OpResult<Box<dyn DirStream>> {
        Ok(defaults::list_children(node))
    }
}

/// What a successful `create` hands back.
pub struct Created {
    pub entry: EntryOut,
    pub handle: Option<Box<dyn FileHandle>>,
    pub flags: OpenFlags,
}

impl Created {
    pub fn new(entry: EntryOut, handle: Option<Box<dyn FileHandle>>, flags: OpenFlags) -> Self {
        Self {
            entry,
            handle,
            flags,
        }
    }
}

/// Directory mutations. Implementing this implies [`DirOps`].
///
/// Inodes returned from the creating calls are linked by the bridge once
/// the call succeeds; successful `unlink`, `rmdir` and `rename` calls have
/// their edges removed or moved by the bridge as well.
pub trait MutableDirOps: DirOps {
    fn mkdir(&self, _ctx: &Context, _node: &Inode, _name: &str, _mode: u32) -> OpResult<EntryOut> {
        Err(Errno::EROFS)
    }

    fn mknod(
        &self,
        _ctx: &Context,
        _node: &Inode,
        _name: &str,
        _mode: u32,
        _rdev: u32,
    ) -> OpResult<EntryOut> {
        Err(Errno::EROFS)
    }

    fn create(
        &self,
        _ctx: &Context,
        _node: &Inode,
        _name: &str,
        _flags: i32,
        _mode: u32,
    ) -> OpResult<Created> {
        Err(Errno::EROFS)
    }

    fn symlink(
        &self,
        _ctx: &Context,
        _node: &Inode,
        _target: &Path,
        _name: &str,
    ) -> OpResult<EntryOut> {
        Err(Errno::EROFS)
    }

    /// Creates a hard link to `target`. Return `target` itself in the
    /// entry to add a second edge to the same inode.
    fn link(
        &self,
        _ctx: &Context,
        _node: &Inode,
        _target: &InodeRef,
        _name: &str,
    ) -> OpResult<EntryOut> {
        Err(Errno::EROFS)
    }

    fn unlink(&self, _ctx: &Context, _node: &Inode, _name: &str) -> OpResult<()> {
        Err(Errno::EROFS)
    }

    fn rmdir(&self, _ctx: &Context, _node: &Inode, _name: &str) -> OpResult<()> {
        Err(Errno::EROFS)
    }

    /// Renames `name` to `new_name` in `new_parent`. Must reject moves of
    /// a directory below itself.
    fn rename(
        &self,
        _ctx: &Context,
        _node: &Inode,
        _name: &str,
        _new_parent: &Inode,
        _new_name: &str,
        _flags: u32,
    ) -> OpResult<()> {
        Err(Errno::EROFS)
    }
}

/// Per-open state returned by `open` or `create`.
///
/// Every method defaults to ENOTSUP.
pub trait FileHandle: Send + Sync {
    fn read(&self, _ctx: &Context, _offset: u64, _size: u32) -> OpResult<Bytes> {
        Err(Errno::ENOTSUP)
    }

    fn write(&self, _ctx: &Context, _offset: u64, _data: &[u8]) -> OpResult<u32> {
        Err(Errno::ENOTSUP)
    }

    fn getlk(&self, _ctx: &Context, _owner: u64, _lock: &FileLock, _flags: u32) -> OpResult<FileLock> {
        Err(Errno::ENOTSUP)
    }

    fn setlk(&self, _ctx: &Context, _owner: u64, _lock: &FileLock, _flags: u32) -> OpResult<()> {
        Err(Errno::ENOTSUP)
    }

    fn setlkw(&self, _ctx: &Context, _owner: u64, _lock: &FileLock, _flags: u32) -> OpResult<()> {
        Err(Errno::ENOTSUP)
    }

    fn lseek(&self, _ctx: &Context, _offset: u64, _whence: i32) -> OpResult<u64> {
        Err(Errno::ENOTSUP)
    }

    fn flush(&self, _ctx: &Context) -> OpResult<()> {
        Err(Errno::ENOTSUP)
    }

    fn fsync(&self, _ctx: &Context, _datasync: bool) -> OpResult<()> {
        Err(Errno::ENOTSUP)
    }

    fn release(&self, _ctx: &Context) -> OpResult<()> {
        Err(Errno::ENOTSUP)
    }

    fn getattr(&self, _ctx: &Context) -> OpResult<Attr> {
        Err(Errno::ENOTSUP)
    }

    fn setattr(&self, _ctx: &Context, _changes: &SetAttr) -> OpResult<Attr> {
        Err(Errno::ENOTSUP)
    }

    fn allocate(&self, _ctx: &Context, _offset: u64, _length: u64, _mode: i32) -> OpResult<()> {
        Err(Errno::ENOTSUP)
    }
}
