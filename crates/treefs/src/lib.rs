//! Inode tree and capability dispatch for user-space filesystems.
//!
//! `treefs` lets a filesystem author describe a filesystem as a tree of
//! nodes, each backed by a small capability object, and takes care of the
//! rest: stable inode numbers, hard links, kernel reference counting and
//! reclaim, POSIX defaults for everything a node does not implement, open
//! handle bookkeeping, and kernel cache coherency.
//!
//! The pieces:
//!
//! - [`Node`] and the optional capability traits ([`FileOps`], [`DirOps`],
//!   [`MutableDirOps`], ...) are what an author implements.
//! - [`Inode`] is a node of the tree. Capability calls receive the inode
//!   they were made on and use it to create and link children.
//! - [`Session`] is the bridge a transport drives: it resolves inode
//!   numbers, dispatches to capabilities, and edits the tree after
//!   successful calls.
//! - [`CacheController`] turns [`Options`] into cache timeouts and
//!   forwards invalidations to an [`InvalidationSink`].
//!
//! The FUSE transport lives in the `treefs-fuse` crate.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use treefs::{Attr, Context, Node, Options, Session};
//!
//! struct Root;
//! impl Node for Root {
//!     fn getattr(&self, _ctx: &Context, _node: &treefs::Inode) -> treefs::OpResult<Attr> {
//!         Ok(Attr { perm: 0o755, ..Attr::default() })
//!     }
//! }
//!
//! let session = Session::new(Arc::new(Root), Options::default());
//! let reply = session.getattr(&Context::background(), 1, None).unwrap();
//! assert_eq!(reply.attr.perm, 0o755);
//! ```

pub mod bridge;
pub mod capability;
pub mod coherency;
pub mod config;
pub mod context;
pub mod defaults;
pub mod dirstream;
pub mod error;
mod handles;
pub mod inode;
pub mod node;
mod tree;
pub mod types;

pub use bridge::{
    AttrReply, CreateReply, EntryReply, OpenReply, RENAME_EXCHANGE, Session, XattrReply,
};
pub use capability::CapabilitySet;
pub use coherency::{CacheController, InvalidationSink};
pub use config::{DEFAULT_FIRST_AUTOMATIC_INO, Options};
pub use context::{Caller, Context};
pub use defaults::Fallback;
pub use dirstream::{DirStream, ListDirStream};
pub use error::{Errno, OpResult, ToErrno, TreeError};
pub use inode::{Inode, InodeRef, ROOT_INODE};
pub use node::{
    Created, DirOps, FileHandle, FileOps, LockOps, MutableDirOps, Node, Opened, SymlinkOps,
    XattrOps,
};
pub use types::{
    Attr, DirEntry, EntryOut, FileKind, FileLock, NodeAttr, OpenFlags, SetAttr, SetTime, StatFs,
};
