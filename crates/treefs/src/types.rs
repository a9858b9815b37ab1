//! Plain data exchanged between the bridge and capability objects.

use bitflags::bitflags;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::inode::InodeRef;

const S_IFMT: u32 = 0o170_000;
const S_IFSOCK: u32 = 0o140_000;
const S_IFLNK: u32 = 0o120_000;
const S_IFREG: u32 = 0o100_000;
const S_IFBLK: u32 = 0o060_000;
const S_IFDIR: u32 = 0o040_000;
const S_IFCHR: u32 = 0o020_000;
const S_IFIFO: u32 = 0o010_000;

/// The type of a node. Fixed for the lifetime of an inode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileKind {
    RegularFile,
    Directory,
    Symlink,
    BlockDevice,
    CharDevice,
    NamedPipe,
    Socket,
}

impl FileKind {
    /// The `S_IFMT` bits for this kind.
    pub const fn type_bits(self) -> u32 {
        match self {
            FileKind::RegularFile => S_IFREG,
            FileKind::Directory => S_IFDIR,
            FileKind::Symlink => S_IFLNK,
            FileKind::BlockDevice => S_IFBLK,
            FileKind::CharDevice => S_IFCHR,
            FileKind::NamedPipe => S_IFIFO,
            FileKind::Socket => S_IFSOCK,
        }
    }

    /// Extracts the kind from a full `st_mode` value.
    pub const fn from_mode(mode: u32) -> Option<FileKind> {
        match mode & S_IFMT {
            S_IFREG => Some(FileKind::RegularFile),
            S_IFDIR => Some(FileKind::Directory),
            S_IFLNK => Some(FileKind::Symlink),
            S_IFBLK => Some(FileKind::BlockDevice),
            S_IFCHR => Some(FileKind::CharDevice),
            S_IFIFO => Some(FileKind::NamedPipe),
            S_IFSOCK => Some(FileKind::Socket),
            _ => None,
        }
    }
}

/// Attributes of a node, as reported by `getattr`.
///
/// The bridge overwrites `ino` and `kind` with the inode's own values
/// before replying, so capability objects need not fill them in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attr {
    pub ino: u64,
    pub size: u64,
    pub blocks: u64,
    pub atime: SystemTime,
    pub mtime: SystemTime,
    pub ctime: SystemTime,
    pub kind: FileKind,
    /// Permission bits (the low 12 bits of `st_mode`).
    pub perm: u16,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub rdev: u32,
    pub blksize: u32,
}

impl Default for Attr {
    fn default() -> Self {
        Self {
            ino: 0,
            size: 0,
            blocks: 0,
            atime: UNIX_EPOCH,
            mtime: UNIX_EPOCH,
            ctime: UNIX_EPOCH,
            kind: FileKind::RegularFile,
            perm: 0,
            nlink: 0,
            uid: 0,
            gid: 0,
            rdev: 0,
            blksize: 0,
        }
    }
}

impl Attr {
    /// The full `st_mode` value: type bits plus permission bits.
    pub fn mode(&self) -> u32 {
        self.kind.type_bits() | u32::from(self.perm & 0o7777)
    }

    /// Sets the permission bits from a full or partial mode value.
    #[allow(clippy::cast_possible_truncation)]
    pub fn set_mode(&mut self, mode: u32) {
        self.perm = (mode & 0o7777) as u16;
    }
}

/// A timestamp in a setattr request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetTime {
    Now,
    At(SystemTime),
}

impl SetTime {
    /// Resolves to a concrete time.
    pub fn resolve(self) -> SystemTime {
        match self {
            SetTime::Now => SystemTime::now(),
            SetTime::At(t) => t,
        }
    }
}

/// The fields a setattr request wants changed. `None` leaves a field alone.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetAttr {
    pub mode: Option<u32>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub size: Option<u64>,
    pub atime: Option<SetTime>,
    pub mtime: Option<SetTime>,
    pub ctime: Option<SystemTime>,
}

impl SetAttr {
    /// Returns true if no field is set.
    pub fn is_empty(&self) -> bool {
        *self == SetAttr::default()
    }

    /// Applies the requested changes to `attr`.
    pub fn apply_to(&self, attr: &mut Attr) {
        if let Some(mode) = self.mode {
            attr.set_mode(mode);
        }
        if let Some(uid) = self.uid {
            attr.uid = uid;
        }
        if let Some(gid) = self.gid {
            attr.gid = gid;
        }
        if let Some(size) = self.size {
            attr.size = size;
        }
        if let Some(atime) = self.atime {
            attr.atime = atime.resolve();
        }
        if let Some(mtime) = self.mtime {
            attr.mtime = mtime.resolve();
        }
        if let Some(ctime) = self.ctime {
            attr.ctime = ctime;
        }
    }
}

/// Filesystem statistics. Defaults to all zeroes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatFs {
    pub blocks: u64,
    pub bfree: u64,
    pub bavail: u64,
    pub files: u64,
    pub ffree: u64,
    pub bsize: u32,
    pub namelen: u32,
    pub frsize: u32,
}

/// A POSIX record lock.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileLock {
    pub start: u64,
    pub end: u64,
    /// `F_RDLCK`, `F_WRLCK` or `F_UNLCK`.
    pub typ: i32,
    pub pid: u32,
}

/// One entry of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    /// Inode number reported to the kernel; may be 0 if unknown.
    pub ino: u64,
    pub kind: FileKind,
}

impl DirEntry {
    pub fn new(name: impl Into<String>, ino: u64, kind: FileKind) -> Self {
        Self {
            name: name.into(),
            ino,
            kind,
        }
    }
}

/// Identity of a node that is about to be created.
///
/// Leave `ino` unset to get the next automatic inode number, and
/// `generation` unset to draw one from the session's counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeAttr {
    pub kind: FileKind,
    pub ino: Option<u64>,
    pub generation: Option<u64>,
}

impl NodeAttr {
    pub fn new(kind: FileKind) -> Self {
        Self {
            kind,
            ino: None,
            generation: None,
        }
    }

    pub fn file() -> Self {
        Self::new(FileKind::RegularFile)
    }

    pub fn dir() -> Self {
        Self::new(FileKind::Directory)
    }

    pub fn symlink() -> Self {
        Self::new(FileKind::Symlink)
    }

    /// Requests an explicit inode number.
    #[must_use]
    pub fn with_ino(mut self, ino: u64) -> Self {
        self.ino = Some(ino);
        self
    }

    /// Requests an explicit generation number.
    #[must_use]
    pub fn with_generation(mut self, generation: u64) -> Self {
        self.generation = Some(generation);
        self
    }
}

bitflags! {
    /// Flags returned from `open`, `create` and `opendir`.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    pub struct OpenFlags: u32 {
        /// Bypass the page cache for this open.
        const DIRECT_IO   = 1 << 0;
        /// Keep previously cached content across opens.
        const KEEP_CACHE  = 1 << 1;
        /// The file is not seekable.
        const NONSEEKABLE = 1 << 2;
        /// Allow the kernel to cache directory listings.
        const CACHE_DIR   = 1 << 3;
    }
}

impl OpenFlags {
    pub const NONE: OpenFlags = OpenFlags::empty();
}

/// The result of a call that produces a (new or existing) child node.
///
/// The timeouts override the session options for this reply only.
#[derive(Debug, Clone)]
pub struct EntryOut {
    pub inode: InodeRef,
    pub attr: Attr,
    pub entry_timeout: Option<Duration>,
    pub attr_timeout: Option<Duration>,
}

impl EntryOut {
    pub fn new(inode: InodeRef, attr: Attr) -> Self {
        Self {
            inode,
            attr,
            entry_timeout: None,
            attr_timeout: None,
        }
    }

    #[must_use]
    pub fn with_entry_timeout(mut self, timeout: Duration) -> Self {
        self.entry_timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn with_attr_timeout(mut self, timeout: Duration) -> Self {
        self.attr_timeout = Some(timeout);
        self
    }
}
