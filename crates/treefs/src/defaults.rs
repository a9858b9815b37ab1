//! Fallback behavior for capabilities a node does not implement.
//!
//! | Call family | Without the capability |
//! |---|---|
//! | access | POSIX check against `getattr`; EINVAL without a caller |
//! | lookup | existing child, else ENOENT |
//! | mkdir, mknod, create, symlink, link, unlink, rmdir, rename, setattr | EROFS |
//! | read, fsync, flush, release, allocate, lseek, locks | the open handle, else ENOTSUP |
//! | write | the open handle, else EROFS |
//! | lseek `SEEK_DATA`/`SEEK_HOLE` without handle | offset unchanged |
//! | opendir | OK |
//! | readdir | snapshot of the children in the tree |
//! | getxattr, removexattr | ENOATTR |
//! | setxattr | EROFS |
//! | listxattr | empty |
//! | readlink | ENOTSUP |
//! | statfs | zeroed record |
//!
//! The defaults are the trait methods' default bodies. For nodes that lack
//! an optional capability entirely, the bridge routes to [`Fallback`],
//! which implements every set with nothing overridden.

use std::path::PathBuf;

use crate::context::Context;
use crate::dirstream::{DirStream, ListDirStream};
use crate::error::{Errno, OpResult};
use crate::inode::Inode;
use crate::node::{DirOps, FileOps, LockOps, MutableDirOps, Node, SymlinkOps, XattrOps};
use crate::types::{Attr, DirEntry, EntryOut};

const R_OK: u32 = 4;
const W_OK: u32 = 2;
const X_OK: u32 = 1;

/// POSIX permission check for `mask` against the owner, group and other
/// bits of `perm`.
///
/// The caller's class is chosen first (owner, then group, then other) and
/// every requested bit must be granted to that class. Root passes every
/// check, as does an empty mask (`F_OK`).
pub fn has_access(
    caller_uid: u32,
    caller_gid: u32,
    owner_uid: u32,
    owner_gid: u32,
    perm: u16,
    mask: u32,
) -> bool {
    if caller_uid == 0 {
        return true;
    }
    let mask = mask & (R_OK | W_OK | X_OK);
    if mask == 0 {
        return true;
    }
    let perm = u32::from(perm);
    let granted = if caller_uid == owner_uid {
        (perm >> 6) & 7
    } else if caller_gid == owner_gid {
        (perm >> 3) & 7
    } else {
        perm & 7
    };
    granted & mask == mask
}

/// The default `access` implementation.
pub fn check_access(ctx: &Context, attr: &Attr, mask: u32) -> OpResult<()> {
    let caller = ctx.caller().ok_or(Errno::EINVAL)?;
    if has_access(caller.uid, caller.gid, attr.uid, attr.gid, attr.perm, mask) {
        Ok(())
    } else {
        Err(Errno::EACCES)
    }
}

/// The default `lookup`: resolves names already linked in the tree.
pub fn lookup_child(ctx: &Context, node: &Inode, name: &str) -> OpResult<EntryOut> {
    let child = node.get_child(name).ok_or(Errno::ENOENT)?;
    let attr = child.operations().getattr(ctx, &child)?;
    Ok(EntryOut::new(child, attr))
}

/// The default `readdir`: a snapshot of the node's children.
pub fn list_children(node: &Inode) -> Box<dyn DirStream> {
    let entries = node
        .children()
        .into_iter()
        .map(|(name, child)| DirEntry::new(name, child.ino(), child.kind()))
        .collect();
    Box::new(ListDirStream::new(entries))
}

/// Stands in for every optional capability a node lacks.
#[derive(Debug, Clone, Copy, Default)]
pub struct Fallback;

impl Node for Fallback {}

impl XattrOps for Fallback {}

impl SymlinkOps for Fallback {
    fn readlink(&self, _ctx: &Context, _node: &Inode) -> OpResult<PathBuf> {
        Err(Errno::ENOTSUP)
    }
}

impl FileOps for Fallback {}

impl LockOps for Fallback {}

impl DirOps for Fallback {}

impl MutableDirOps for Fallback {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Caller;

    fn ctx(uid: u32, gid: u32) -> Context {
        Context::new(Caller { uid, gid, pid: 1 })
    }

    #[test]
    fn test_owner_bits() {
        assert!(has_access(1000, 1000, 1000, 0, 0o600, R_OK | W_OK));
        assert!(!has_access(1000, 1000, 1000, 0, 0o400, R_OK | W_OK));
        assert!(!has_access(1000, 1000, 1000, 0, 0o077, R_OK));
    }

    #[test]
    fn test_group_and_other_bits() {
        assert!(has_access(1001, 50, 1000, 50, 0o640, R_OK));
        assert!(!has_access(1001, 50, 1000, 50, 0o640, W_OK));
        assert!(has_access(1002, 60, 1000, 50, 0o604, R_OK));
        assert!(!has_access(1002, 60, 1000, 50, 0o640, R_OK));
    }

    #[test]
    fn test_root_and_exists_always_pass() {
        assert!(has_access(0, 0, 1000, 1000, 0o000, R_OK | W_OK | X_OK));
        assert!(has_access(1000, 1000, 0, 0, 0o000, 0));
    }

    #[test]
    fn test_check_access_errors() {
        let attr = Attr {
            uid: 1000,
            gid: 1000,
            perm: 0o700,
            ..Attr::default()
        };
        assert_eq!(check_access(&ctx(1000, 1000), &attr, X_OK), Ok(()));
        assert_eq!(check_access(&ctx(1001, 1001), &attr, R_OK), Err(Errno::EACCES));
        assert_eq!(
            check_access(&Context::background(), &attr, R_OK),
            Err(Errno::EINVAL)
        );
    }
}
