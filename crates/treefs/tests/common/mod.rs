//! Shared fixtures for the integration tests.
//!
//! Provides an in-memory filesystem built from `treefs` nodes and a
//! `SimKernel` that drives a `Session` the way the kernel would: it
//! resolves paths with lookups, keeps a page cache that honours
//! `KEEP_CACHE` and invalidations, and tracks the references it holds.

// Not every test binary uses every helper
#![allow(dead_code)]

use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::ffi::{OsStr, OsString};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use treefs::{
    Attr, Caller, Context, Created, DirEntry, DirOps, EntryOut, Errno, FileHandle, FileKind, FileOps, Inode,
    InodeRef, InvalidationSink, MutableDirOps, Node, NodeAttr, OpResult, OpenFlags, Opened,
    Options, Session, SetAttr, SymlinkOps, XattrOps,
};

pub fn ctx() -> Context {
    Context::new(Caller {
        uid: 1000,
        gid: 1000,
        pid: 4242,
    })
}

/// A session over an empty, writable in-memory root.
pub fn mem_session(options: Options) -> Arc<Session> {
    Arc::new(Session::new(Arc::new(MemDir::default()), options))
}

/// Whether `candidate` is `node` or one of its ancestors.
fn is_ancestor(candidate: &Inode, node: &InodeRef) -> bool {
    let mut current = Some(Arc::clone(node));
    let mut hops = 0;
    while let Some(n) = current {
        if n.ino() == candidate.ino() {
            return true;
        }
        hops += 1;
        if hops > 1024 {
            return false;
        }
        current = n.parent().map(|(_, p)| p);
    }
    false
}

/// A writable directory. Structure lives in the tree itself.
#[derive(Default)]
pub struct MemDir {
    xattrs: Mutex<HashMap<OsString, Vec<u8>>>,
}

impl Node for MemDir {
    fn getattr(&self, _ctx: &Context, node: &Inode) -> OpResult<Attr> {
        Ok(Attr {
            perm: 0o755,
            nlink: 2,
            uid: 1000,
            gid: 1000,
            size: node.children().len() as u64,
            ..Attr::default()
        })
    }

    fn as_mutable_dir(self: Arc<Self>) -> Option<Arc<dyn MutableDirOps>> {
        Some(self)
    }

    fn as_xattr(self: Arc<Self>) -> Option<Arc<dyn XattrOps>> {
        Some(self)
    }
}

impl XattrOps for MemDir {
    fn getxattr(&self, _ctx: &Context, _node: &Inode, name: &OsStr) -> OpResult<Vec<u8>> {
        self.xattrs.lock().get(name).cloned().ok_or(Errno::ENOATTR)
    }

    fn setxattr(
        &self,
        _ctx: &Context,
        _node: &Inode,
        name: &OsStr,
        value: &[u8],
        _flags: i32,
    ) -> OpResult<()> {
        self.xattrs.lock().insert(name.to_owned(), value.to_vec());
        Ok(())
    }

    fn removexattr(&self, _ctx: &Context, _node: &Inode, name: &OsStr) -> OpResult<()> {
        self.xattrs.lock().remove(name).map(|_| ()).ok_or(Errno::ENOATTR)
    }

    fn listxattr(&self, _ctx: &Context, _node: &Inode) -> OpResult<Vec<OsString>> {
        let mut names: Vec<_> = self.xattrs.lock().keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}

impl DirOps for MemDir {}

impl MutableDirOps for MemDir {
    fn mkdir(&self, ctx: &Context, node: &Inode, name: &str, mode: u32) -> OpResult<EntryOut> {
        if node.get_child(name).is_some() {
            return Err(Errno::EEXIST);
        }
        let child = node.new_inode(Arc::new(MemDir::default()), NodeAttr::dir());
        let mut attr = child.operations().getattr(ctx, &child)?;
        attr.set_mode(mode);
        Ok(EntryOut::new(child, attr))
    }

    fn create(
        &self,
        ctx: &Context,
        node: &Inode,
        name: &str,
        _flags: i32,
        _mode: u32,
    ) -> OpResult<Created> {
        if node.get_child(name).is_some() {
            return Err(Errno::EEXIST);
        }
        let child = node.new_inode(Arc::new(MemFile::default()), NodeAttr::file());
        let attr = child.operations().getattr(ctx, &child)?;
        Ok(Created::new(EntryOut::new(child, attr), None, OpenFlags::NONE))
    }

    fn symlink(&self, ctx: &Context, node: &Inode, target: &Path, name: &str) -> OpResult<EntryOut> {
        if node.get_child(name).is_some() {
            return Err(Errno::EEXIST);
        }
        let child = node.new_inode(
            Arc::new(MemLink {
                target: target.to_path_buf(),
            }),
            NodeAttr::symlink(),
        );
        let attr = child.operations().getattr(ctx, &child)?;
        Ok(EntryOut::new(child, attr))
    }

    fn link(&self, ctx: &Context, node: &Inode, target: &InodeRef, name: &str) -> OpResult<EntryOut> {
        if node.get_child(name).is_some() {
            return Err(Errno::EEXIST);
        }
        if target.is_dir() {
            return Err(Errno::from_raw(libc::EPERM));
        }
        let attr = target.operations().getattr(ctx, target)?;
        Ok(EntryOut::new(Arc::clone(target), attr))
    }

    fn unlink(&self, _ctx: &Context, node: &Inode, name: &str) -> OpResult<()> {
        match node.get_child(name) {
            None => Err(Errno::ENOENT),
            Some(child) if child.is_dir() => Err(Errno::EISDIR),
            Some(_) => Ok(()),
        }
    }

    fn rmdir(&self, _ctx: &Context, node: &Inode, name: &str) -> OpResult<()> {
        match node.get_child(name) {
            None => Err(Errno::ENOENT),
            Some(child) if !child.is_dir() => Err(Errno::ENOTDIR),
            Some(child) if !child.children().is_empty() => Err(Errno::ENOTEMPTY),
            Some(_) => Ok(()),
        }
    }

    fn rename(
        &self,
        _ctx: &Context,
        node: &Inode,
        name: &str,
        new_parent: &Inode,
        _new_name: &str,
        _flags: u32,
    ) -> OpResult<()> {
        let moved = node.get_child(name).ok_or(Errno::ENOENT)?;
        let dst = node.find_inode(new_parent.ino()).ok_or(Errno::ENOENT)?;
        if moved.is_dir() && is_ancestor(&moved, &dst) {
            return Err(Errno::EINVAL);
        }
        Ok(())
    }
}

/// A regular file held in memory. Opens are stateless.
pub struct MemFile {
    content: Mutex<Vec<u8>>,
    mtime: Mutex<SystemTime>,
}

impl Default for MemFile {
    fn default() -> Self {
        Self::with_content(b"")
    }
}

impl MemFile {
    pub fn with_content(content: &[u8]) -> Self {
        Self {
            content: Mutex::new(content.to_vec()),
            mtime: Mutex::new(UNIX_EPOCH + Duration::from_secs(1_000)),
        }
    }

    /// Replaces the content and bumps mtime, as an out-of-band writer
    /// would.
    pub fn replace(&self, content: &[u8]) {
        *self.content.lock() = content.to_vec();
        *self.mtime.lock() += Duration::from_secs(1);
    }
}

impl Node for MemFile {
    fn getattr(&self, _ctx: &Context, node: &Inode) -> OpResult<Attr> {
        Ok(Attr {
            size: self.content.lock().len() as u64,
            mtime: *self.mtime.lock(),
            perm: 0o644,
            nlink: u32::try_from(node.parents().len()).unwrap_or(u32::MAX),
            uid: 1000,
            gid: 1000,
            ..Attr::default()
        })
    }

    fn setattr(&self, ctx: &Context, node: &Inode, changes: &SetAttr) -> OpResult<Attr> {
        if let Some(size) = changes.size {
            let len = usize::try_from(size).map_err(|_| Errno::EINVAL)?;
            self.content.lock().resize(len, 0);
            *self.mtime.lock() += Duration::from_secs(1);
        }
        let mut attr = self.getattr(ctx, node)?;
        changes.apply_to(&mut attr);
        Ok(attr)
    }

    fn as_file(self: Arc<Self>) -> Option<Arc<dyn FileOps>> {
        Some(self)
    }
}

impl FileOps for MemFile {
    fn open(&self, _ctx: &Context, _node: &Inode, _flags: i32) -> OpResult<Opened> {
        Ok(Opened::stateless(OpenFlags::NONE))
    }

    fn read(
        &self,
        _ctx: &Context,
        _node: &Inode,
        _fh: Option<&dyn FileHandle>,
        offset: u64,
        size: u32,
    ) -> OpResult<Bytes> {
        let content = self.content.lock();
        let start = usize::try_from(offset).unwrap_or(usize::MAX).min(content.len());
        let end = start.saturating_add(size as usize).min(content.len());
        Ok(Bytes::copy_from_slice(&content[start..end]))
    }

    fn write(
        &self,
        _ctx: &Context,
        _node: &Inode,
        _fh: Option<&dyn FileHandle>,
        offset: u64,
        data: &[u8],
    ) -> OpResult<u32> {
        let mut content = self.content.lock();
        let start = usize::try_from(offset).map_err(|_| Errno::EINVAL)?;
        let end = start + data.len();
        if end > content.len() {
            content.resize(end, 0);
        }
        content[start..end].copy_from_slice(data);
        *self.mtime.lock() += Duration::from_secs(1);
        u32::try_from(data.len()).map_err(|_| Errno::EINVAL)
    }

    fn flush(&self, _ctx: &Context, _node: &Inode, _fh: Option<&dyn FileHandle>) -> OpResult<()> {
        Ok(())
    }

    fn release(&self, _ctx: &Context, _node: &Inode, _fh: Option<&dyn FileHandle>) -> OpResult<()> {
        Ok(())
    }
}

pub struct MemLink {
    pub target: PathBuf,
}

impl Node for MemLink {
    fn getattr(&self, _ctx: &Context, _node: &Inode) -> OpResult<Attr> {
        Ok(Attr {
            size: self.target.as_os_str().len() as u64,
            perm: 0o777,
            ..Attr::default()
        })
    }

    fn as_symlink(self: Arc<Self>) -> Option<Arc<dyn SymlinkOps>> {
        Some(self)
    }
}

impl SymlinkOps for MemLink {
    fn readlink(&self, _ctx: &Context, _node: &Inode) -> OpResult<PathBuf> {
        Ok(self.target.clone())
    }
}

/// A file whose content changes on every read, without changing size or
/// mtime: `format!("{:010x}", n)` for the n-th read.
pub struct CountingFile {
    keep_cache: bool,
    reads: AtomicU64,
}

/// Length of the content of a [`CountingFile`].
pub const COUNTING_FILE_LEN: u64 = 10;

impl CountingFile {
    pub fn new(keep_cache: bool) -> Self {
        Self {
            keep_cache,
            reads: AtomicU64::new(0),
        }
    }

    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::SeqCst)
    }
}

impl Node for CountingFile {
    fn getattr(&self, _ctx: &Context, _node: &Inode) -> OpResult<Attr> {
        Ok(Attr {
            size: COUNTING_FILE_LEN,
            mtime: UNIX_EPOCH + Duration::from_secs(77),
            perm: 0o444,
            nlink: 1,
            ..Attr::default()
        })
    }

    fn as_file(self: Arc<Self>) -> Option<Arc<dyn FileOps>> {
        Some(self)
    }
}

impl FileOps for CountingFile {
    fn open(&self, _ctx: &Context, _node: &Inode, _flags: i32) -> OpResult<Opened> {
        let flags = if self.keep_cache {
            OpenFlags::KEEP_CACHE
        } else {
            OpenFlags::NONE
        };
        Ok(Opened::stateless(flags))
    }

    fn read(
        &self,
        _ctx: &Context,
        _node: &Inode,
        _fh: Option<&dyn FileHandle>,
        offset: u64,
        size: u32,
    ) -> OpResult<Bytes> {
        let n = self.reads.fetch_add(1, Ordering::SeqCst);
        let content = format!("{n:010x}").into_bytes();
        let start = usize::try_from(offset).unwrap_or(usize::MAX).min(content.len());
        let end = start.saturating_add(size as usize).min(content.len());
        Ok(Bytes::copy_from_slice(&content[start..end]))
    }

    fn release(&self, _ctx: &Context, _node: &Inode, _fh: Option<&dyn FileHandle>) -> OpResult<()> {
        Ok(())
    }
}

/// A per-open handle serving a snapshot taken at open time.
pub struct SnapshotHandle {
    pub data: Bytes,
    pub released: Arc<AtomicBool>,
}

impl FileHandle for SnapshotHandle {
    fn read(&self, _ctx: &Context, offset: u64, size: u32) -> OpResult<Bytes> {
        let start = usize::try_from(offset).unwrap_or(usize::MAX).min(self.data.len());
        let end = start.saturating_add(size as usize).min(self.data.len());
        Ok(self.data.slice(start..end))
    }

    fn release(&self, _ctx: &Context) -> OpResult<()> {
        self.released.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// A file that hands out [`SnapshotHandle`]s.
pub struct SnapshotFile {
    pub content: Mutex<Vec<u8>>,
    pub released: Arc<AtomicBool>,
}

impl SnapshotFile {
    pub fn new(content: &[u8]) -> Self {
        Self {
            content: Mutex::new(content.to_vec()),
            released: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl Node for SnapshotFile {
    fn getattr(&self, _ctx: &Context, _node: &Inode) -> OpResult<Attr> {
        Ok(Attr {
            size: self.content.lock().len() as u64,
            perm: 0o644,
            ..Attr::default()
        })
    }

    fn as_file(self: Arc<Self>) -> Option<Arc<dyn FileOps>> {
        Some(self)
    }
}

impl FileOps for SnapshotFile {
    fn open(&self, _ctx: &Context, _node: &Inode, _flags: i32) -> OpResult<Opened> {
        Ok(Opened::with_handle(
            SnapshotHandle {
                data: Bytes::from(self.content.lock().clone()),
                released: Arc::clone(&self.released),
            },
            OpenFlags::NONE,
        ))
    }
}

/// The kernel's view: cached pages and held references.
#[derive(Default)]
pub struct PageCache {
    pages: Mutex<HashMap<u64, Bytes>>,
    refs: Mutex<HashMap<u64, u64>>,
    entry_invalidations: Mutex<Vec<(u64, OsString)>>,
    inode_invalidations: Mutex<Vec<(u64, i64, i64)>>,
}

impl PageCache {
    fn knows(&self, ino: u64) -> bool {
        ino == treefs::ROOT_INODE || self.refs.lock().contains_key(&ino)
    }

    pub fn cached(&self, ino: u64) -> Option<Bytes> {
        self.pages.lock().get(&ino).cloned()
    }

    pub fn inode_invalidations(&self) -> Vec<(u64, i64, i64)> {
        self.inode_invalidations.lock().clone()
    }

    pub fn entry_invalidations(&self) -> Vec<(u64, OsString)> {
        self.entry_invalidations.lock().clone()
    }
}

impl InvalidationSink for PageCache {
    fn inval_inode(&self, ino: u64, offset: i64, len: i64) -> io::Result<()> {
        if !self.knows(ino) {
            return Err(io::Error::from_raw_os_error(libc::ENOENT));
        }
        self.inode_invalidations.lock().push((ino, offset, len));
        if offset >= 0 {
            self.pages.lock().remove(&ino);
        }
        Ok(())
    }

    fn inval_entry(&self, parent: u64, name: &OsStr) -> io::Result<()> {
        if !self.knows(parent) {
            return Err(io::Error::from_raw_os_error(libc::ENOENT));
        }
        self.entry_invalidations
            .lock()
            .push((parent, name.to_owned()));
        Ok(())
    }
}

/// Drives a session the way the kernel does.
pub struct SimKernel {
    pub session: Arc<Session>,
    pub cache: Arc<PageCache>,
}

impl SimKernel {
    pub fn new(session: Arc<Session>) -> Self {
        let cache = Arc::new(PageCache::default());
        assert!(session.attach_notifier(Arc::clone(&cache) as Arc<dyn InvalidationSink>));
        Self { session, cache }
    }

    /// Resolves `path` component by component, taking one reference per
    /// successful lookup.
    pub fn resolve(&self, path: &str) -> OpResult<u64> {
        let mut ino = treefs::ROOT_INODE;
        for name in path.split('/').filter(|s| !s.is_empty()) {
            let reply = self.session.lookup(&ctx(), ino, name)?;
            if reply.is_negative() {
                return Err(Errno::ENOENT);
            }
            *self.cache.refs.lock().entry(reply.ino).or_default() += 1;
            ino = reply.ino;
        }
        Ok(ino)
    }

    /// Opens, reads and closes `path`, serving from the page cache when
    /// the open allows it.
    pub fn read_file(&self, path: &str) -> OpResult<Bytes> {
        let ino = self.resolve(path)?;
        let attr = self.session.getattr(&ctx(), ino, None)?.attr;
        let open = self.session.open(&ctx(), ino, libc::O_RDONLY)?;
        if !open.flags.contains(OpenFlags::KEEP_CACHE) {
            self.cache.pages.lock().remove(&ino);
        }
        let data = match self.cache.cached(ino) {
            Some(data) => data,
            None => {
                let size = u32::try_from(attr.size).unwrap_or(u32::MAX);
                let data = self.session.read(&ctx(), ino, open.fh, 0, size)?;
                self.cache.pages.lock().insert(ino, data.clone());
                data
            }
        };
        self.session.release(&ctx(), ino, open.fh)?;
        Ok(data)
    }

    /// References the kernel holds on `ino`.
    pub fn refs(&self, ino: u64) -> u64 {
        self.cache.refs.lock().get(&ino).copied().unwrap_or(0)
    }

    /// Forgets every reference, as on unmount or memory pressure.
    pub fn forget_all(&self) {
        let refs: Vec<(u64, u64)> = self.cache.refs.lock().drain().collect();
        self.cache.pages.lock().clear();
        self.session.batch_forget(&refs);
    }

    /// Forgets the references on one inode.
    pub fn forget(&self, ino: u64) {
        if let Some(count) = self.cache.refs.lock().remove(&ino) {
            self.cache.pages.lock().remove(&ino);
            self.session.forget(ino, count);
        }
    }

    /// Full directory listing through opendir/readdir/releasedir with a
    /// reply buffer that fits `per_call` entries.
    pub fn list(&self, ino: u64, per_call: usize) -> OpResult<Vec<(String, u64)>> {
        let open = self.session.opendir(&ctx(), ino)?;
        let mut entries = Vec::new();
        let mut offset = 0;
        loop {
            let mut batch = Vec::new();
            let mut next_offset = offset;
            self.session.readdir(&ctx(), ino, open.fh, offset, &mut |entry: &DirEntry, next: i64| {
                if batch.len() == per_call {
                    return true;
                }
                batch.push((entry.name.clone(), entry.ino));
                next_offset = next;
                false
            })?;
            if batch.is_empty() {
                break;
            }
            entries.extend(batch);
            offset = next_offset;
        }
        self.session.releasedir(&ctx(), ino, open.fh)?;
        Ok(entries)
    }
}

/// Names of a listing without "." and "..", sorted.
pub fn names(entries: &[(String, u64)]) -> Vec<String> {
    let mut names: Vec<String> = entries
        .iter()
        .map(|(n, _)| n.clone())
        .filter(|n| n != "." && n != "..")
        .collect();
    names.sort();
    names
}

/// Distinct inode numbers in a set of replies.
pub fn distinct(inos: &[u64]) -> usize {
    inos.iter().collect::<HashSet<_>>().len()
}

/// Links a prebuilt file under the root, bypassing the capability calls.
pub fn add_file(session: &Session, name: &str, ops: Arc<dyn Node>) -> InodeRef {
    let root = session.root();
    let child = root.new_inode(ops, NodeAttr::new(FileKind::RegularFile));
    root.add_child(name, &child, false)
        .expect("name is free in the fixture");
    child
}
