//! `fuser::Filesystem` on top of a [`Session`].
//!
//! Each callback copies what it needs out of the request, packages the
//! session call and the reply object into a job and hands it to the
//! [`DispatchPool`]. The worker translates the outcome into the fuser
//! reply. `forget` and `batch_forget` have no reply and only touch the
//! tree, so they run on the session thread.

use bytes::Bytes;
use fuser::{
    FileAttr, FileType, Filesystem, KernelConfig, ReplyAttr, ReplyCreate, ReplyData,
    ReplyDirectory, ReplyEmpty, ReplyEntry, ReplyLock, ReplyLseek, ReplyOpen, ReplyStatfs,
    ReplyWrite, ReplyXattr, Request, TimeOrNow,
};
use libc::c_int;
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{info, trace, warn};
use treefs::{
    Attr, Caller, Context, DirEntry, EntryReply, Errno, FileKind, FileLock, OpenFlags, SetAttr, SetTime,
    Session, XattrReply,
};

use crate::executor::DispatchPool;

/// Inode number reported for listing entries whose number is unknown.
/// Some libc implementations skip entries with `d_ino == 0`.
const UNKNOWN_INO: u64 = 0xffff_ffff;

/// Converts an attribute record to the fuser layout.
pub fn to_file_attr(attr: &Attr) -> FileAttr {
    FileAttr {
        ino: attr.ino,
        size: attr.size,
        blocks: attr.blocks,
        atime: attr.atime,
        mtime: attr.mtime,
        ctime: attr.ctime,
        crtime: attr.ctime,
        kind: to_file_type(attr.kind),
        perm: attr.perm,
        nlink: attr.nlink,
        uid: attr.uid,
        gid: attr.gid,
        rdev: attr.rdev,
        blksize: attr.blksize,
        flags: 0,
    }
}

pub fn to_file_type(kind: FileKind) -> FileType {
    match kind {
        FileKind::RegularFile => FileType::RegularFile,
        FileKind::Directory => FileType::Directory,
        FileKind::Symlink => FileType::Symlink,
        FileKind::BlockDevice => FileType::BlockDevice,
        FileKind::CharDevice => FileType::CharDevice,
        FileKind::NamedPipe => FileType::NamedPipe,
        FileKind::Socket => FileType::Socket,
    }
}

/// Open flags as the kernel's `FOPEN_*` bits.
pub fn to_fopen_flags(flags: OpenFlags) -> u32 {
    const FOPEN_CACHE_DIR: u32 = 1 << 3;
    let mut bits = 0;
    if flags.contains(OpenFlags::DIRECT_IO) {
        bits |= fuser::consts::FOPEN_DIRECT_IO;
    }
    if flags.contains(OpenFlags::KEEP_CACHE) {
        bits |= fuser::consts::FOPEN_KEEP_CACHE;
    }
    if flags.contains(OpenFlags::NONSEEKABLE) {
        bits |= fuser::consts::FOPEN_NONSEEKABLE;
    }
    if flags.contains(OpenFlags::CACHE_DIR) {
        bits |= FOPEN_CACHE_DIR;
    }
    bits
}

fn to_set_time(time: TimeOrNow) -> SetTime {
    match time {
        TimeOrNow::Now => SetTime::Now,
        TimeOrNow::SpecificTime(t) => SetTime::At(t),
    }
}

fn context(req: &Request<'_>) -> Context {
    Context::new(Caller {
        uid: req.uid(),
        gid: req.gid(),
        pid: req.pid(),
    })
}

/// Names must be UTF-8 to enter the tree.
fn utf8_name(name: &OsStr) -> Result<String, c_int> {
    name.to_str().map(str::to_owned).ok_or(libc::EINVAL)
}

fn to_offset(offset: i64) -> Result<u64, c_int> {
    u64::try_from(offset).map_err(|_| libc::EINVAL)
}

/// The single TTL fuser sends as both `entry_valid` and `attr_valid`.
///
/// A positive entry must not let the kernel keep its attributes longer
/// than the attribute timeout, so it gets the shorter of the two. A
/// negative entry carries no attributes and caches the miss for
/// `entry_timeout`.
pub fn entry_ttl(entry: &EntryReply) -> Duration {
    if entry.is_negative() {
        entry.entry_timeout
    } else {
        entry.entry_timeout.min(entry.attr_timeout)
    }
}

fn reply_entry(reply: ReplyEntry, result: Result<EntryReply, Errno>) {
    match result {
        Ok(entry) => {
            let mut attr = to_file_attr(&entry.attr);
            attr.ino = entry.ino;
            reply.entry(&entry_ttl(&entry), &attr, entry.generation);
        }
        Err(e) => reply.error(e.raw()),
    }
}

fn reply_empty(reply: ReplyEmpty, result: Result<(), Errno>) {
    match result {
        Ok(()) => reply.ok(),
        Err(e) => reply.error(e.raw()),
    }
}

fn reply_xattr(reply: ReplyXattr, result: Result<XattrReply, Errno>) {
    match result {
        Ok(XattrReply::Size(size)) => reply.size(size),
        Ok(XattrReply::Data(data)) => reply.data(&data),
        Err(e) => reply.error(e.raw()),
    }
}

/// The transport adapter. Owns nothing but shared handles, so it can be
/// moved into the fuser session thread.
pub struct FuseAdapter {
    session: Arc<Session>,
    pool: Arc<DispatchPool>,
}

impl FuseAdapter {
    pub fn new(session: Arc<Session>, pool: Arc<DispatchPool>) -> Self {
        Self { session, pool }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Runs `f` with the session on a worker.
    fn dispatch<F>(&self, f: F)
    where
        F: FnOnce(&Session) + Send + 'static,
    {
        let session = Arc::clone(&self.session);
        self.pool.run(Box::new(move || f(&session)));
    }
}

impl Filesystem for FuseAdapter {
    fn init(&mut self, _req: &Request<'_>, config: &mut KernelConfig) -> Result<(), c_int> {
        info!("FUSE session initialized");
        // Reads are answered from worker threads, possibly out of order.
        if let Err(unsupported) = config.add_capabilities(fuser::consts::FUSE_ASYNC_READ) {
            warn!(unsupported, "kernel does not support async reads");
        }
        Ok(())
    }

    fn destroy(&mut self) {
        info!(inodes = self.session.inode_count(), "FUSE session destroyed");
        self.pool.shutdown();
    }

    fn lookup(&mut self, req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        trace!(parent, name = %name.to_string_lossy(), "lookup");
        let ctx = context(req);
        let name = match utf8_name(name) {
            Ok(name) => name,
            Err(e) => return reply.error(e),
        };
        self.dispatch(move |s| reply_entry(reply, s.lookup(&ctx, parent, &name)));
    }

    fn forget(&mut self, _req: &Request<'_>, ino: u64, nlookup: u64) {
        trace!(inode = ino, nlookup, "forget");
        self.session.forget(ino, nlookup);
    }

    fn batch_forget(&mut self, _req: &Request<'_>, nodes: &[fuser::fuse_forget_one]) {
        trace!(count = nodes.len(), "batch_forget");
        let nodes: Vec<(u64, u64)> = nodes.iter().map(|n| (n.nodeid, n.nlookup)).collect();
        self.session.batch_forget(&nodes);
    }

    fn getattr(&mut self, req: &Request<'_>, ino: u64, fh: Option<u64>, reply: ReplyAttr) {
        trace!(inode = ino, ?fh, "getattr");
        let ctx = context(req);
        self.dispatch(move |s| match s.getattr(&ctx, ino, fh) {
            Ok(out) => reply.attr(&out.timeout, &to_file_attr(&out.attr)),
            Err(e) => reply.error(e.raw()),
        });
    }

    fn setattr(
        &mut self,
        req: &Request<'_>,
        ino: u64,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
        ctime: Option<SystemTime>,
        fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        trace!(inode = ino, ?mode, ?uid, ?gid, ?size, ?fh, "setattr");
        let ctx = context(req);
        let changes = SetAttr {
            mode,
            uid,
            gid,
            size,
            atime: atime.map(to_set_time),
            mtime: mtime.map(to_set_time),
            ctime,
        };
        self.dispatch(move |s| match s.setattr(&ctx, ino, fh, &changes) {
            Ok(out) => reply.attr(&out.timeout, &to_file_attr(&out.attr)),
            Err(e) => reply.error(e.raw()),
        });
    }

    fn readlink(&mut self, req: &Request<'_>, ino: u64, reply: ReplyData) {
        trace!(inode = ino, "readlink");
        let ctx = context(req);
        self.dispatch(move |s| match s.readlink(&ctx, ino) {
            Ok(target) => {
                use std::os::unix::ffi::OsStrExt;
                reply.data(target.as_os_str().as_bytes());
            }
            Err(e) => reply.error(e.raw()),
        });
    }

    fn mknod(
        &mut self,
        req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        rdev: u32,
        reply: ReplyEntry,
    ) {
        trace!(parent, name = %name.to_string_lossy(), mode, rdev, "mknod");
        let ctx = context(req);
        let name = match utf8_name(name) {
            Ok(name) => name,
            Err(e) => return reply.error(e),
        };
        self.dispatch(move |s| reply_entry(reply, s.mknod(&ctx, parent, &name, mode, rdev)));
    }

    fn mkdir(
        &mut self,
        req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        trace!(parent, name = %name.to_string_lossy(), mode, "mkdir");
        let ctx = context(req);
        let name = match utf8_name(name) {
            Ok(name) => name,
            Err(e) => return reply.error(e),
        };
        self.dispatch(move |s| reply_entry(reply, s.mkdir(&ctx, parent, &name, mode)));
    }

    fn unlink(&mut self, req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        trace!(parent, name = %name.to_string_lossy(), "unlink");
        let ctx = context(req);
        let name = match utf8_name(name) {
            Ok(name) => name,
            Err(e) => return reply.error(e),
        };
        self.dispatch(move |s| reply_empty(reply, s.unlink(&ctx, parent, &name)));
    }

    fn rmdir(&mut self, req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        trace!(parent, name = %name.to_string_lossy(), "rmdir");
        let ctx = context(req);
        let name = match utf8_name(name) {
            Ok(name) => name,
            Err(e) => return reply.error(e),
        };
        self.dispatch(move |s| reply_empty(reply, s.rmdir(&ctx, parent, &name)));
    }

    fn symlink(
        &mut self,
        req: &Request<'_>,
        parent: u64,
        link_name: &OsStr,
        target: &Path,
        reply: ReplyEntry,
    ) {
        trace!(parent, name = %link_name.to_string_lossy(), target = %target.display(), "symlink");
        let ctx = context(req);
        let name = match utf8_name(link_name) {
            Ok(name) => name,
            Err(e) => return reply.error(e),
        };
        let target: PathBuf = target.to_path_buf();
        self.dispatch(move |s| reply_entry(reply, s.symlink(&ctx, parent, &name, &target)));
    }

    fn rename(
        &mut self,
        req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        flags: u32,
        reply: ReplyEmpty,
    ) {
        trace!(
            parent,
            name = %name.to_string_lossy(),
            newparent,
            newname = %newname.to_string_lossy(),
            flags,
            "rename"
        );
        let ctx = context(req);
        let (name, newname) = match (utf8_name(name), utf8_name(newname)) {
            (Ok(name), Ok(newname)) => (name, newname),
            (Err(e), _) | (_, Err(e)) => return reply.error(e),
        };
        self.dispatch(move |s| {
            reply_empty(reply, s.rename(&ctx, parent, &name, newparent, &newname, flags));
        });
    }

    fn link(
        &mut self,
        req: &Request<'_>,
        ino: u64,
        newparent: u64,
        newname: &OsStr,
        reply: ReplyEntry,
    ) {
        trace!(inode = ino, newparent, newname = %newname.to_string_lossy(), "link");
        let ctx = context(req);
        let name = match utf8_name(newname) {
            Ok(name) => name,
            Err(e) => return reply.error(e),
        };
        self.dispatch(move |s| reply_entry(reply, s.link(&ctx, ino, newparent, &name)));
    }

    fn open(&mut self, req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        trace!(inode = ino, flags, "open");
        let ctx = context(req);
        self.dispatch(move |s| match s.open(&ctx, ino, flags) {
            Ok(out) => reply.opened(out.fh, to_fopen_flags(out.flags)),
            Err(e) => reply.error(e.raw()),
        });
    }

    fn read(
        &mut self,
        req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        trace!(inode = ino, fh, offset, size, "read");
        let ctx = context(req);
        let offset = match to_offset(offset) {
            Ok(offset) => offset,
            Err(e) => return reply.error(e),
        };
        self.dispatch(move |s| match s.read(&ctx, ino, fh, offset, size) {
            Ok(data) => reply.data(&data),
            Err(e) => reply.error(e.raw()),
        });
    }

    fn write(
        &mut self,
        req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        trace!(inode = ino, fh, offset, size = data.len(), "write");
        let ctx = context(req);
        let offset = match to_offset(offset) {
            Ok(offset) => offset,
            Err(e) => return reply.error(e),
        };
        let data = Bytes::copy_from_slice(data);
        self.dispatch(move |s| match s.write(&ctx, ino, fh, offset, &data) {
            Ok(written) => reply.written(written),
            Err(e) => reply.error(e.raw()),
        });
    }

    fn flush(&mut self, req: &Request<'_>, ino: u64, fh: u64, _lock_owner: u64, reply: ReplyEmpty) {
        trace!(inode = ino, fh, "flush");
        let ctx = context(req);
        self.dispatch(move |s| reply_empty(reply, s.flush(&ctx, ino, fh)));
    }

    fn release(
        &mut self,
        req: &Request<'_>,
        ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        trace!(inode = ino, fh, "release");
        let ctx = context(req);
        self.dispatch(move |s| reply_empty(reply, s.release(&ctx, ino, fh)));
    }

    fn fsync(&mut self, req: &Request<'_>, ino: u64, fh: u64, datasync: bool, reply: ReplyEmpty) {
        trace!(inode = ino, fh, datasync, "fsync");
        let ctx = context(req);
        self.dispatch(move |s| reply_empty(reply, s.fsync(&ctx, ino, fh, datasync)));
    }

    fn opendir(&mut self, req: &Request<'_>, ino: u64, _flags: i32, reply: ReplyOpen) {
        trace!(inode = ino, "opendir");
        let ctx = context(req);
        self.dispatch(move |s| match s.opendir(&ctx, ino) {
            Ok(out) => reply.opened(out.fh, to_fopen_flags(out.flags)),
            Err(e) => reply.error(e.raw()),
        });
    }

    fn readdir(
        &mut self,
        req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        trace!(inode = ino, fh, offset, "readdir");
        let ctx = context(req);
        self.dispatch(move |s| {
            let result = s.readdir(&ctx, ino, fh, offset, &mut |entry: &DirEntry, next: i64| {
                let ino = if entry.ino == 0 { UNKNOWN_INO } else { entry.ino };
                reply.add(ino, next, to_file_type(entry.kind), &entry.name)
            });
            match result {
                Ok(()) => reply.ok(),
                Err(e) => reply.error(e.raw()),
            }
        });
    }

    fn releasedir(&mut self, req: &Request<'_>, ino: u64, fh: u64, _flags: i32, reply: ReplyEmpty) {
        trace!(inode = ino, fh, "releasedir");
        let ctx = context(req);
        self.dispatch(move |s| reply_empty(reply, s.releasedir(&ctx, ino, fh)));
    }

    fn fsyncdir(&mut self, req: &Request<'_>, ino: u64, fh: u64, datasync: bool, reply: ReplyEmpty) {
        trace!(inode = ino, fh, datasync, "fsyncdir");
        let ctx = context(req);
        self.dispatch(move |s| reply_empty(reply, s.fsyncdir(&ctx, ino, fh, datasync)));
    }

    fn statfs(&mut self, req: &Request<'_>, ino: u64, reply: ReplyStatfs) {
        trace!(inode = ino, "statfs");
        let ctx = context(req);
        self.dispatch(move |s| match s.statfs(&ctx, ino) {
            Ok(st) => reply.statfs(
                st.blocks, st.bfree, st.bavail, st.files, st.ffree, st.bsize, st.namelen, st.frsize,
            ),
            Err(e) => reply.error(e.raw()),
        });
    }

    fn setxattr(
        &mut self,
        req: &Request<'_>,
        ino: u64,
        name: &OsStr,
        value: &[u8],
        flags: i32,
        _position: u32,
        reply: ReplyEmpty,
    ) {
        trace!(inode = ino, name = %name.to_string_lossy(), len = value.len(), "setxattr");
        let ctx = context(req);
        let name: OsString = name.to_owned();
        let value = value.to_vec();
        self.dispatch(move |s| reply_empty(reply, s.setxattr(&ctx, ino, &name, &value, flags)));
    }

    fn getxattr(&mut self, req: &Request<'_>, ino: u64, name: &OsStr, size: u32, reply: ReplyXattr) {
        trace!(inode = ino, name = %name.to_string_lossy(), size, "getxattr");
        let ctx = context(req);
        let name: OsString = name.to_owned();
        self.dispatch(move |s| reply_xattr(reply, s.getxattr(&ctx, ino, &name, size)));
    }

    fn listxattr(&mut self, req: &Request<'_>, ino: u64, size: u32, reply: ReplyXattr) {
        trace!(inode = ino, size, "listxattr");
        let ctx = context(req);
        self.dispatch(move |s| reply_xattr(reply, s.listxattr(&ctx, ino, size)));
    }

    fn removexattr(&mut self, req: &Request<'_>, ino: u64, name: &OsStr, reply: ReplyEmpty) {
        trace!(inode = ino, name = %name.to_string_lossy(), "removexattr");
        let ctx = context(req);
        let name: OsString = name.to_owned();
        self.dispatch(move |s| reply_empty(reply, s.removexattr(&ctx, ino, &name)));
    }

    fn access(&mut self, req: &Request<'_>, ino: u64, mask: i32, reply: ReplyEmpty) {
        trace!(inode = ino, mask, "access");
        let ctx = context(req);
        #[allow(clippy::cast_sign_loss)]
        let mask = mask as u32;
        self.dispatch(move |s| reply_empty(reply, s.access(&ctx, ino, mask)));
    }

    fn create(
        &mut self,
        req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        flags: i32,
        reply: ReplyCreate,
    ) {
        trace!(parent, name = %name.to_string_lossy(), mode, flags, "create");
        let ctx = context(req);
        let name = match utf8_name(name) {
            Ok(name) => name,
            Err(e) => return reply.error(e),
        };
        self.dispatch(move |s| match s.create(&ctx, parent, &name, flags, mode) {
            Ok(out) => reply.created(
                &entry_ttl(&out.entry),
                &to_file_attr(&out.entry.attr),
                out.entry.generation,
                out.fh,
                to_fopen_flags(out.flags),
            ),
            Err(e) => reply.error(e.raw()),
        });
    }

    fn getlk(
        &mut self,
        req: &Request<'_>,
        ino: u64,
        fh: u64,
        lock_owner: u64,
        start: u64,
        end: u64,
        typ: i32,
        pid: u32,
        reply: ReplyLock,
    ) {
        trace!(inode = ino, fh, lock_owner, start, end, typ, "getlk");
        let ctx = context(req);
        let lock = FileLock { start, end, typ, pid };
        self.dispatch(move |s| match s.getlk(&ctx, ino, fh, lock_owner, &lock) {
            Ok(found) => reply.locked(found.start, found.end, found.typ, found.pid),
            Err(e) => reply.error(e.raw()),
        });
    }

    fn setlk(
        &mut self,
        req: &Request<'_>,
        ino: u64,
        fh: u64,
        lock_owner: u64,
        start: u64,
        end: u64,
        typ: i32,
        pid: u32,
        sleep: bool,
        reply: ReplyEmpty,
    ) {
        trace!(inode = ino, fh, lock_owner, start, end, typ, sleep, "setlk");
        let ctx = context(req);
        let lock = FileLock { start, end, typ, pid };
        self.dispatch(move |s| reply_empty(reply, s.setlk(&ctx, ino, fh, lock_owner, &lock, sleep)));
    }

    fn fallocate(
        &mut self,
        req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        length: i64,
        mode: i32,
        reply: ReplyEmpty,
    ) {
        trace!(inode = ino, fh, offset, length, mode, "fallocate");
        let ctx = context(req);
        let (offset, length) = match (to_offset(offset), to_offset(length)) {
            (Ok(offset), Ok(length)) => (offset, length),
            (Err(e), _) | (_, Err(e)) => return reply.error(e),
        };
        self.dispatch(move |s| reply_empty(reply, s.fallocate(&ctx, ino, fh, offset, length, mode)));
    }

    fn lseek(
        &mut self,
        req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        whence: i32,
        reply: ReplyLseek,
    ) {
        trace!(inode = ino, fh, offset, whence, "lseek");
        let ctx = context(req);
        let offset = match to_offset(offset) {
            Ok(offset) => offset,
            Err(e) => return reply.error(e),
        };
        self.dispatch(move |s| match s.lseek(&ctx, ino, fh, offset, whence) {
            Ok(pos) => match i64::try_from(pos) {
                Ok(pos) => reply.offset(pos),
                Err(_) => reply.error(libc::EOVERFLOW),
            },
            Err(e) => reply.error(e.raw()),
        });
    }

    fn copy_file_range(
        &mut self,
        req: &Request<'_>,
        ino_in: u64,
        fh_in: u64,
        offset_in: i64,
        ino_out: u64,
        fh_out: u64,
        offset_out: i64,
        len: u64,
        flags: u32,
        reply: ReplyWrite,
    ) {
        trace!(ino_in, fh_in, offset_in, ino_out, fh_out, offset_out, len, "copy_file_range");
        let ctx = context(req);
        let (offset_in, offset_out) = match (to_offset(offset_in), to_offset(offset_out)) {
            (Ok(a), Ok(b)) => (a, b),
            (Err(e), _) | (_, Err(e)) => return reply.error(e),
        };
        self.dispatch(move |s| {
            match s.copy_file_range(&ctx, ino_in, fh_in, offset_in, ino_out, fh_out, offset_out, len, flags) {
                Ok(copied) => reply.written(copied),
                Err(e) => reply.error(e.raw()),
            }
        });
    }
}
