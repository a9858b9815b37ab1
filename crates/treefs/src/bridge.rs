//! The capability dispatch bridge.
//!
//! A [`Session`] owns one mounted tree. The transport hands it parsed
//! requests keyed by inode number (and file handle, where the protocol
//! has one); the session resolves the inode, routes the call to the
//! node's capability object or to the fallback for capabilities the node
//! lacks, and applies the structural side effects of successful calls:
//!
//! - inodes returned by `lookup`, `mkdir`, `mknod`, `create`, `symlink`
//!   and `link` are linked under the requested name and gain one kernel
//!   reference;
//! - `unlink` and `rmdir` remove the edge, `rename` moves or swaps it.
//!
//! Edits happen only after the capability call succeeded, and the errno a
//! capability returns is passed through untouched.

use bytes::Bytes;
use parking_lot::Mutex;
use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

use crate::coherency::{CacheController, InvalidationSink};
use crate::config::Options;
use crate::context::Context;
use crate::error::{Errno, OpResult};
use crate::handles::{HandleTable, OpenDir, OpenFile, OpenHandle};
use crate::inode::{Inode, InodeRef};
use crate::node::Node;
use crate::tree::InodeTree;
use crate::types::{Attr, DirEntry, EntryOut, FileKind, FileLock, OpenFlags, SetAttr, StatFs};

/// `rename` flag: atomically swap source and destination.
pub const RENAME_EXCHANGE: u32 = 1 << 1;

/// Reply to a call that hands an inode to the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryReply {
    /// 0 for a negative entry.
    pub ino: u64,
    pub generation: u64,
    pub attr: Attr,
    pub entry_timeout: Duration,
    pub attr_timeout: Duration,
}

impl EntryReply {
    /// A cached "does not exist" answer.
    pub fn negative(timeout: Duration) -> Self {
        Self {
            ino: 0,
            generation: 0,
            attr: Attr::default(),
            entry_timeout: timeout,
            attr_timeout: Duration::ZERO,
        }
    }

    pub fn is_negative(&self) -> bool {
        self.ino == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttrReply {
    pub attr: Attr,
    pub timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenReply {
    pub fh: u64,
    pub flags: OpenFlags,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreateReply {
    pub entry: EntryReply,
    pub fh: u64,
    pub flags: OpenFlags,
}

/// Reply to `getxattr`/`listxattr`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XattrReply {
    /// The caller asked for the size only (buffer size 0).
    Size(u32),
    Data(Vec<u8>),
}

/// One mounted tree: the inode table, open handles and cache policy.
pub struct Session {
    tree: Arc<InodeTree>,
    root: InodeRef,
    handles: HandleTable<OpenHandle>,
    options: Options,
}

impl Session {
    /// Builds the tree around `root` (inode 1).
    pub fn new(root: Arc<dyn Node>, options: Options) -> Self {
        let tree = Arc::new(InodeTree::new(&options));
        let root = tree.create_root(root);
        info!(
            entry_timeout = ?options.entry_timeout,
            attr_timeout = ?options.attr_timeout,
            negative_timeout = ?options.negative_timeout,
            "session created"
        );
        Self {
            tree,
            root,
            handles: HandleTable::new(),
            options,
        }
    }

    pub fn root(&self) -> &InodeRef {
        &self.root
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn cache(&self) -> &CacheController {
        self.tree.cache()
    }

    /// Connects the transport's invalidation channel.
    pub fn attach_notifier(&self, sink: Arc<dyn InvalidationSink>) -> bool {
        self.cache().attach(sink)
    }

    /// The live inode with this number.
    pub fn inode(&self, ino: u64) -> Option<InodeRef> {
        self.tree.get(ino)
    }

    /// Number of live inodes, the root included.
    pub fn inode_count(&self) -> usize {
        self.tree.len()
    }

    /// Number of open file and directory handles.
    pub fn open_handles(&self) -> usize {
        self.handles.len()
    }

    fn node(&self, ino: u64) -> OpResult<InodeRef> {
        self.tree.get(ino).ok_or(Errno::ENOENT)
    }

    fn dir_node(&self, ino: u64) -> OpResult<InodeRef> {
        let node = self.node(ino)?;
        if node.is_dir() {
            Ok(node)
        } else {
            Err(Errno::ENOTDIR)
        }
    }

    fn open_file(&self, ino: u64, fh: u64) -> OpResult<Arc<OpenFile>> {
        match self.handles.get(fh) {
            Some(OpenHandle::File(file)) if file.ino == ino => Ok(file),
            _ => {
                warn!(inode = ino, fh, "unknown file handle");
                Err(Errno::EBADF)
            }
        }
    }

    fn open_dir(&self, ino: u64, fh: u64) -> OpResult<Arc<Mutex<OpenDir>>> {
        match self.handles.get(fh) {
            Some(OpenHandle::Dir(dir)) if dir.lock().ino == ino => Ok(dir),
            _ => {
                warn!(inode = ino, fh, "unknown directory handle");
                Err(Errno::EBADF)
            }
        }
    }

    /// The file handle for attribute calls. Directory and unknown handles
    /// are ignored there, since the kernel may pass either.
    fn attr_handle(&self, ino: u64, fh: Option<u64>) -> Option<Arc<OpenFile>> {
        match self.handles.get(fh?) {
            Some(OpenHandle::File(file)) if file.ino == ino => Some(file),
            _ => None,
        }
    }

    fn fix_attr(&self, node: &Inode, attr: &mut Attr) {
        attr.ino = node.ino();
        attr.kind = node.kind();
        self.cache().observe(attr);
    }

    /// Links the inode a capability produced and turns it into a reply.
    ///
    /// # Panics
    ///
    /// If the inode cannot be linked as `name` (it is an ancestor of
    /// `parent`, or belongs to another session's tree).
    fn link_new_child(&self, parent: &Inode, name: &str, entry: EntryOut) -> EntryReply {
        let EntryOut {
            inode,
            mut attr,
            entry_timeout,
            attr_timeout,
        } = entry;
        if let Err(e) = parent.add_child(name, &inode, true) {
            panic!(
                "capability returned inode {} that cannot be linked as {name:?} under {}: {e}",
                inode.ino(),
                parent.ino()
            );
        }
        InodeTree::add_ref(&inode);
        self.fix_attr(&inode, &mut attr);
        EntryReply {
            ino: inode.ino(),
            generation: inode.generation(),
            attr,
            entry_timeout: self.cache().entry_timeout(entry_timeout),
            attr_timeout: self.cache().attr_timeout(attr_timeout),
        }
    }

    pub fn lookup(&self, ctx: &Context, parent: u64, name: &str) -> OpResult<EntryReply> {
        trace!(parent, name, "lookup");
        let dir = self.dir_node(parent)?;
        match dir.caps().dir().lookup(ctx, &dir, name) {
            Ok(entry) => Ok(self.link_new_child(&dir, name, entry)),
            Err(Errno::ENOENT) => match self.cache().negative_timeout() {
                Some(timeout) => Ok(EntryReply::negative(timeout)),
                None => Err(Errno::ENOENT),
            },
            Err(e) => Err(e),
        }
    }

    pub fn forget(&self, ino: u64, nlookup: u64) {
        trace!(inode = ino, nlookup, "forget");
        match self.tree.get(ino) {
            Some(node) => node.forget(nlookup),
            None => warn!(inode = ino, nlookup, "forget for unknown inode"),
        }
    }

    pub fn batch_forget(&self, nodes: &[(u64, u64)]) {
        trace!(count = nodes.len(), "batch_forget");
        for &(ino, nlookup) in nodes {
            self.forget(ino, nlookup);
        }
    }

    pub fn getattr(&self, ctx: &Context, ino: u64, fh: Option<u64>) -> OpResult<AttrReply> {
        trace!(inode = ino, ?fh, "getattr");
        let node = self.node(ino)?;
        let file = self.attr_handle(ino, fh);
        let mut attr = node
            .caps()
            .file()
            .fgetattr(ctx, &node, file.as_ref().and_then(|f| f.handle()))?;
        self.fix_attr(&node, &mut attr);
        Ok(AttrReply {
            attr,
            timeout: self.cache().attr_timeout(None),
        })
    }

    pub fn setattr(
        &self,
        ctx: &Context,
        ino: u64,
        fh: Option<u64>,
        changes: &SetAttr,
    ) -> OpResult<AttrReply> {
        trace!(inode = ino, ?fh, ?changes, "setattr");
        let node = self.node(ino)?;
        let file = self.attr_handle(ino, fh);
        let mut attr = node.caps().file().fsetattr(
            ctx,
            &node,
            file.as_ref().and_then(|f| f.handle()),
            changes,
        )?;
        self.fix_attr(&node, &mut attr);
        Ok(AttrReply {
            attr,
            timeout: self.cache().attr_timeout(None),
        })
    }

    pub fn access(&self, ctx: &Context, ino: u64, mask: u32) -> OpResult<()> {
        trace!(inode = ino, mask, "access");
        let node = self.node(ino)?;
        node.operations().access(ctx, &node, mask)
    }

    pub fn statfs(&self, ctx: &Context, ino: u64) -> OpResult<StatFs> {
        trace!(inode = ino, "statfs");
        let node = self.node(ino)?;
        node.operations().statfs(ctx, &node)
    }

    pub fn readlink(&self, ctx: &Context, ino: u64) -> OpResult<PathBuf> {
        trace!(inode = ino, "readlink");
        let node = self.node(ino)?;
        node.caps().symlink().readlink(ctx, &node)
    }

    pub fn open(&self, ctx: &Context, ino: u64, flags: i32) -> OpResult<OpenReply> {
        trace!(inode = ino, flags, "open");
        let node = self.node(ino)?;
        if node.is_dir() {
            return Err(Errno::EISDIR);
        }
        let opened = node.caps().file().open(ctx, &node, flags)?;
        let fh = self.handles.insert(OpenHandle::File(Arc::new(OpenFile {
            ino,
            handle: opened.handle.map(Arc::from),
            flags: opened.flags,
        })));
        Ok(OpenReply {
            fh,
            flags: opened.flags,
        })
    }

    pub fn read(&self, ctx: &Context, ino: u64, fh: u64, offset: u64, size: u32) -> OpResult<Bytes> {
        trace!(inode = ino, fh, offset, size, "read");
        let node = self.node(ino)?;
        let file = self.open_file(ino, fh)?;
        node.caps().file().read(ctx, &node, file.handle(), offset, size)
    }

    pub fn write(&self, ctx: &Context, ino: u64, fh: u64, offset: u64, data: &[u8]) -> OpResult<u32> {
        trace!(inode = ino, fh, offset, len = data.len(), "write");
        let node = self.node(ino)?;
        let file = self.open_file(ino, fh)?;
        node.caps().file().write(ctx, &node, file.handle(), offset, data)
    }

    pub fn fsync(&self, ctx: &Context, ino: u64, fh: u64, datasync: bool) -> OpResult<()> {
        trace!(inode = ino, fh, datasync, "fsync");
        let node = self.node(ino)?;
        let file = self.open_file(ino, fh)?;
        node.caps().file().fsync(ctx, &node, file.handle(), datasync)
    }

    pub fn flush(&self, ctx: &Context, ino: u64, fh: u64) -> OpResult<()> {
        trace!(inode = ino, fh, "flush");
        let node = self.node(ino)?;
        let file = self.open_file(ino, fh)?;
        node.caps().file().flush(ctx, &node, file.handle())
    }

    /// Closes an open file. The handle id is retired whatever the
    /// capability returns.
    pub fn release(&self, ctx: &Context, ino: u64, fh: u64) -> OpResult<()> {
        trace!(inode = ino, fh, "release");
        let file = self.open_file(ino, fh)?;
        self.handles.remove(fh);
        let node = self.node(ino)?;
        node.caps().file().release(ctx, &node, file.handle())
    }

    pub fn fallocate(
        &self,
        ctx: &Context,
        ino: u64,
        fh: u64,
        offset: u64,
        length: u64,
        mode: i32,
    ) -> OpResult<()> {
        trace!(inode = ino, fh, offset, length, mode, "fallocate");
        let node = self.node(ino)?;
        let file = self.open_file(ino, fh)?;
        node.caps()
            .file()
            .allocate(ctx, &node, file.handle(), offset, length, mode)
    }

    pub fn lseek(&self, ctx: &Context, ino: u64, fh: u64, offset: u64, whence: i32) -> OpResult<u64> {
        trace!(inode = ino, fh, offset, whence, "lseek");
        let node = self.node(ino)?;
        let file = self.open_file(ino, fh)?;
        node.caps().file().lseek(ctx, &node, file.handle(), offset, whence)
    }

    pub fn getlk(
        &self,
        ctx: &Context,
        ino: u64,
        fh: u64,
        owner: u64,
        lock: &FileLock,
    ) -> OpResult<FileLock> {
        trace!(inode = ino, fh, owner, ?lock, "getlk");
        let node = self.node(ino)?;
        let file = self.open_file(ino, fh)?;
        node.caps().lock().getlk(ctx, &node, file.handle(), owner, lock, 0)
    }

    /// Acquires or releases a record lock. With `sleep` set the call may
    /// block until the lock is available.
    pub fn setlk(
        &self,
        ctx: &Context,
        ino: u64,
        fh: u64,
        owner: u64,
        lock: &FileLock,
        sleep: bool,
    ) -> OpResult<()> {
        trace!(inode = ino, fh, owner, ?lock, sleep, "setlk");
        let node = self.node(ino)?;
        let file = self.open_file(ino, fh)?;
        let ops = node.caps().lock();
        if sleep {
            ops.setlkw(ctx, &node, file.handle(), owner, lock, 0)
        } else {
            ops.setlk(ctx, &node, file.handle(), owner, lock, 0)
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn copy_file_range(
        &self,
        ctx: &Context,
        ino_in: u64,
        fh_in: u64,
        offset_in: u64,
        ino_out: u64,
        fh_out: u64,
        offset_out: u64,
        len: u64,
        flags: u32,
    ) -> OpResult<u32> {
        trace!(ino_in, fh_in, offset_in, ino_out, fh_out, offset_out, len, "copy_file_range");
        let node_in = self.node(ino_in)?;
        let node_out = self.node(ino_out)?;
        let file_in = self.open_file(ino_in, fh_in)?;
        let file_out = self.open_file(ino_out, fh_out)?;
        node_in.caps().file().copy_file_range(
            ctx,
            &node_in,
            file_in.handle(),
            offset_in,
            &node_out,
            file_out.handle(),
            offset_out,
            len,
            flags,
        )
    }

    pub fn opendir(&self, ctx: &Context, ino: u64) -> OpResult<OpenReply> {
        trace!(inode = ino, "opendir");
        let node = self.dir_node(ino)?;
        node.caps().dir().opendir(ctx, &node)?;
        let fh = self
            .handles
            .insert(OpenHandle::Dir(Arc::new(Mutex::new(OpenDir::new(ino)))));
        Ok(OpenReply {
            fh,
            flags: OpenFlags::NONE,
        })
    }

    /// Lists a directory from `offset` on.
    ///
    /// Offsets number the entries: 0 is ".", 1 is "..", the listing
    /// follows. `filler` receives each entry with the offset of the entry
    /// after it and returns true once the reply buffer is full; that
    /// entry is kept and emitted first by the next call. Offset 0, or an
    /// offset that does not continue the previous call, restarts the
    /// listing from a fresh snapshot.
    pub fn readdir(
        &self,
        ctx: &Context,
        ino: u64,
        fh: u64,
        offset: i64,
        filler: &mut dyn FnMut(&DirEntry, i64) -> bool,
    ) -> OpResult<()> {
        trace!(inode = ino, fh, offset, "readdir");
        let node = self.dir_node(ino)?;
        let dir = self.open_dir(ino, fh)?;
        let mut open = dir.lock();

        if offset == 0 || offset != open.position {
            if offset != 0 {
                debug!(inode = ino, fh, offset, position = open.position, "readdir seek, restarting listing");
            }
            open.reset();
            while open.position < offset {
                if self.next_dir_entry(ctx, &node, &mut open)?.is_none() {
                    return Ok(());
                }
                open.position += 1;
            }
        }

        let mut emitted = 0usize;
        loop {
            let entry = match self.next_dir_entry(ctx, &node, &mut open) {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) if emitted > 0 => {
                    debug!(inode = ino, fh, error = %e, "readdir stream failed, returning partial listing");
                    break;
                }
                Err(e) => return Err(e),
            };
            let next = open.position + 1;
            if filler(&entry, next) {
                if open.position >= 2 {
                    open.pending = Some(entry);
                }
                break;
            }
            open.position = next;
            emitted += 1;
        }
        Ok(())
    }

    fn next_dir_entry(&self, ctx: &Context, node: &Inode, open: &mut OpenDir) -> OpResult<Option<DirEntry>> {
        match open.position {
            0 => Ok(Some(DirEntry::new(".", node.ino(), FileKind::Directory))),
            1 => {
                let parent = node.parent().map_or(node.ino(), |(_, p)| p.ino());
                Ok(Some(DirEntry::new("..", parent, FileKind::Directory)))
            }
            _ => {
                if let Some(entry) = open.pending.take() {
                    return Ok(Some(entry));
                }
                if open.stream.is_none() {
                    open.stream = Some(node.caps().dir().readdir(ctx, node)?);
                }
                let Some(stream) = open.stream.as_mut() else {
                    return Ok(None);
                };
                if stream.has_next() {
                    stream.next().map(Some)
                } else {
                    Ok(None)
                }
            }
        }
    }

    pub fn releasedir(&self, _ctx: &Context, ino: u64, fh: u64) -> OpResult<()> {
        trace!(inode = ino, fh, "releasedir");
        self.open_dir(ino, fh)?;
        // Dropping the handle closes the stream.
        self.handles.remove(fh);
        Ok(())
    }

    pub fn fsyncdir(&self, _ctx: &Context, ino: u64, fh: u64, datasync: bool) -> OpResult<()> {
        trace!(inode = ino, fh, datasync, "fsyncdir");
        self.open_dir(ino, fh).map(|_| ())
    }

    pub fn mkdir(&self, ctx: &Context, parent: u64, name: &str, mode: u32) -> OpResult<EntryReply> {
        trace!(parent, name, mode, "mkdir");
        let dir = self.dir_node(parent)?;
        let entry = dir.caps().mutable_dir().mkdir(ctx, &dir, name, mode)?;
        Ok(self.link_new_child(&dir, name, entry))
    }

    pub fn mknod(
        &self,
        ctx: &Context,
        parent: u64,
        name: &str,
        mode: u32,
        rdev: u32,
    ) -> OpResult<EntryReply> {
        trace!(parent, name, mode, rdev, "mknod");
        let dir = self.dir_node(parent)?;
        let entry = dir.caps().mutable_dir().mknod(ctx, &dir, name, mode, rdev)?;
        Ok(self.link_new_child(&dir, name, entry))
    }

    pub fn create(
        &self,
        ctx: &Context,
        parent: u64,
        name: &str,
        flags: i32,
        mode: u32,
    ) -> OpResult<CreateReply> {
        trace!(parent, name, flags, mode, "create");
        let dir = self.dir_node(parent)?;
        let created = dir.caps().mutable_dir().create(ctx, &dir, name, flags, mode)?;
        let entry = self.link_new_child(&dir, name, created.entry);
        let fh = self.handles.insert(OpenHandle::File(Arc::new(OpenFile {
            ino: entry.ino,
            handle: created.handle.map(Arc::from),
            flags: created.flags,
        })));
        Ok(CreateReply {
            entry,
            fh,
            flags: created.flags,
        })
    }

    pub fn symlink(
        &self,
        ctx: &Context,
        parent: u64,
        name: &str,
        target: &Path,
    ) -> OpResult<EntryReply> {
        trace!(parent, name, target = %target.display(), "symlink");
        let dir = self.dir_node(parent)?;
        let entry = dir.caps().mutable_dir().symlink(ctx, &dir, target, name)?;
        Ok(self.link_new_child(&dir, name, entry))
    }

    /// Creates a hard link to `ino` as `new_parent/new_name`.
    pub fn link(
        &self,
        ctx: &Context,
        ino: u64,
        new_parent: u64,
        new_name: &str,
    ) -> OpResult<EntryReply> {
        trace!(inode = ino, new_parent, new_name, "link");
        let target = self.node(ino)?;
        let dir = self.dir_node(new_parent)?;
        let entry = dir.caps().mutable_dir().link(ctx, &dir, &target, new_name)?;
        Ok(self.link_new_child(&dir, new_name, entry))
    }

    pub fn unlink(&self, ctx: &Context, parent: u64, name: &str) -> OpResult<()> {
        trace!(parent, name, "unlink");
        let dir = self.dir_node(parent)?;
        dir.caps().mutable_dir().unlink(ctx, &dir, name)?;
        dir.rm_child(name);
        Ok(())
    }

    pub fn rmdir(&self, ctx: &Context, parent: u64, name: &str) -> OpResult<()> {
        trace!(parent, name, "rmdir");
        let dir = self.dir_node(parent)?;
        dir.caps().mutable_dir().rmdir(ctx, &dir, name)?;
        dir.rm_child(name);
        Ok(())
    }

    /// Renames `parent/name` to `new_parent/new_name`.
    ///
    /// # Panics
    ///
    /// If the capability accepted a move of a directory below itself.
    pub fn rename(
        &self,
        ctx: &Context,
        parent: u64,
        name: &str,
        new_parent: u64,
        new_name: &str,
        flags: u32,
    ) -> OpResult<()> {
        trace!(parent, name, new_parent, new_name, flags, "rename");
        let src = self.dir_node(parent)?;
        let dst = self.dir_node(new_parent)?;
        src.caps()
            .mutable_dir()
            .rename(ctx, &src, name, &dst, new_name, flags)?;

        if flags & RENAME_EXCHANGE != 0 {
            if !src.exchange_child(name, &dst, new_name) {
                // One side was never looked up; drop what the tree knows
                // so the next lookup asks the node again.
                src.rm_child(name);
                dst.rm_child(new_name);
            }
            return Ok(());
        }
        match src.mv_child(name, &dst, new_name, true) {
            Ok(true) => {}
            // The source was never looked up, but whatever the tree had at
            // the destination is gone now.
            Ok(false) => {
                dst.rm_child(new_name);
            }
            Err(e) => panic!(
                "rename of {name:?} in {parent} to {new_name:?} in {new_parent} succeeded but violates the tree: {e}"
            ),
        }
        Ok(())
    }

    pub fn getxattr(&self, ctx: &Context, ino: u64, name: &OsStr, size: u32) -> OpResult<XattrReply> {
        trace!(inode = ino, name = %name.to_string_lossy(), size, "getxattr");
        let node = self.node(ino)?;
        let value = node.caps().xattr().getxattr(ctx, &node, name)?;
        xattr_reply(value, size)
    }

    pub fn listxattr(&self, ctx: &Context, ino: u64, size: u32) -> OpResult<XattrReply> {
        trace!(inode = ino, size, "listxattr");
        let node = self.node(ino)?;
        let names = node.caps().xattr().listxattr(ctx, &node)?;
        let mut data = Vec::new();
        for name in &names {
            data.extend_from_slice(name.as_bytes());
            data.push(0);
        }
        xattr_reply(data, size)
    }

    pub fn setxattr(
        &self,
        ctx: &Context,
        ino: u64,
        name: &OsStr,
        value: &[u8],
        flags: i32,
    ) -> OpResult<()> {
        trace!(inode = ino, name = %name.to_string_lossy(), len = value.len(), flags, "setxattr");
        let node = self.node(ino)?;
        node.caps().xattr().setxattr(ctx, &node, name, value, flags)
    }

    pub fn removexattr(&self, ctx: &Context, ino: u64, name: &OsStr) -> OpResult<()> {
        trace!(inode = ino, name = %name.to_string_lossy(), "removexattr");
        let node = self.node(ino)?;
        node.caps().xattr().removexattr(ctx, &node, name)
    }
}

/// Size negotiation for xattr replies: a zero-sized request asks for the
/// length, a buffer that is too small fails with ERANGE.
fn xattr_reply(data: Vec<u8>, size: u32) -> OpResult<XattrReply> {
    let len = u32::try_from(data.len()).map_err(|_| Errno::E2BIG)?;
    if size == 0 {
        Ok(XattrReply::Size(len))
    } else if len > size {
        Err(Errno::ERANGE)
    } else {
        Ok(XattrReply::Data(data))
    }
}
