//! A small writable in-memory tree owned by the mounting user.

#![allow(dead_code)]

use bytes::Bytes;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use treefs::{
    Attr, Context, Created, DirOps, EntryOut, Errno, FileHandle, FileKind, FileOps, Inode,
    MutableDirOps, Node, NodeAttr, OpResult, OpenFlags, Opened, SetAttr, SymlinkOps,
};

fn owned(kind: FileKind, perm: u16, size: u64, mtime: SystemTime) -> Attr {
    Attr {
        size,
        blocks: size.div_ceil(512),
        atime: mtime,
        mtime,
        ctime: mtime,
        kind,
        perm,
        nlink: 1,
        uid: nix::unistd::getuid().as_raw(),
        gid: nix::unistd::getgid().as_raw(),
        blksize: 4096,
        ..Attr::default()
    }
}

/// A writable directory. Structure lives in the tree itself.
#[derive(Default)]
pub struct MemDir;

impl Node for MemDir {
    fn getattr(&self, _ctx: &Context, node: &Inode) -> OpResult<Attr> {
        let mut attr = owned(
            FileKind::Directory,
            0o755,
            node.children().len() as u64,
            SystemTime::UNIX_EPOCH,
        );
        attr.nlink = 2;
        Ok(attr)
    }

    fn as_mutable_dir(self: Arc<Self>) -> Option<Arc<dyn MutableDirOps>> {
        Some(self)
    }
}

impl DirOps for MemDir {}

impl MutableDirOps for MemDir {
    fn mkdir(&self, ctx: &Context, node: &Inode, name: &str, mode: u32) -> OpResult<EntryOut> {
        if node.get_child(name).is_some() {
            return Err(Errno::EEXIST);
        }
        let child = node.new_inode(Arc::new(MemDir), NodeAttr::dir());
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
        let child = node.new_inode(Arc::new(MemFile::new(b"", false)), NodeAttr::file());
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
        _new_parent: &Inode,
        _new_name: &str,
        _flags: u32,
    ) -> OpResult<()> {
        node.get_child(name).map(|_| ()).ok_or(Errno::ENOENT)
    }
}

/// A regular file held in memory. Opens are stateless.
pub struct MemFile {
    state: Mutex<(Vec<u8>, SystemTime)>,
    keep_cache: bool,
}

impl MemFile {
    pub fn new(content: &[u8], keep_cache: bool) -> Self {
        Self {
            state: Mutex::new((content.to_vec(), SystemTime::now())),
            keep_cache,
        }
    }

    /// Overwrites the content in place, leaving size and mtime alone, so
    /// the kernel has no attribute change to notice.
    pub fn overwrite_silently(&self, content: &[u8]) {
        let mut state = self.state.lock();
        let end = content.len().min(state.0.len());
        state.0[..end].copy_from_slice(&content[..end]);
    }
}

impl Node for MemFile {
    fn getattr(&self, _ctx: &Context, node: &Inode) -> OpResult<Attr> {
        let state = self.state.lock();
        let mut attr = owned(FileKind::RegularFile, 0o644, state.0.len() as u64, state.1);
        attr.nlink = u32::try_from(node.parents().len().max(1)).unwrap_or(u32::MAX);
        Ok(attr)
    }

    fn setattr(&self, ctx: &Context, node: &Inode, changes: &SetAttr) -> OpResult<Attr> {
        if let Some(size) = changes.size {
            let len = usize::try_from(size).map_err(|_| Errno::EINVAL)?;
            let mut state = self.state.lock();
            state.0.resize(len, 0);
            state.1 = SystemTime::now();
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
        let state = self.state.lock();
        let content = &state.0;
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
        let mut state = self.state.lock();
        let start = usize::try_from(offset).map_err(|_| Errno::EINVAL)?;
        let end = start + data.len();
        if end > state.0.len() {
            state.0.resize(end, 0);
        }
        state.0[start..end].copy_from_slice(data);
        state.1 = SystemTime::now();
        u32::try_from(data.len()).map_err(|_| Errno::EINVAL)
    }

    fn fsync(
        &self,
        _ctx: &Context,
        _node: &Inode,
        _fh: Option<&dyn FileHandle>,
        _datasync: bool,
    ) -> OpResult<()> {
        Ok(())
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
        Ok(owned(
            FileKind::Symlink,
            0o777,
            self.target.as_os_str().len() as u64,
            SystemTime::UNIX_EPOCH,
        ))
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
