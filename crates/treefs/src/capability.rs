//! Resolution of which optional capability sets a node implements.

use std::sync::Arc;

use crate::defaults::Fallback;
use crate::node::{DirOps, FileOps, LockOps, MutableDirOps, Node, SymlinkOps, XattrOps};

/// Which optional capability sets a node implements.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CapabilitySet {
    pub xattr: bool,
    pub symlink: bool,
    pub file: bool,
    pub lock: bool,
    pub dir: bool,
    pub mutable_dir: bool,
}

/// A node's capability object plus its resolved optional sets.
///
/// Built once per inode. Accessors return [`Fallback`] for absent sets,
/// so callers never branch on presence.
pub(crate) struct Capabilities {
    node: Arc<dyn Node>,
    xattr: Option<Arc<dyn XattrOps>>,
    symlink: Option<Arc<dyn SymlinkOps>>,
    file: Option<Arc<dyn FileOps>>,
    lock: Option<Arc<dyn LockOps>>,
    dir: Option<Arc<dyn DirOps>>,
    mutable_dir: Option<Arc<dyn MutableDirOps>>,
}

impl Capabilities {
    pub(crate) fn probe(node: Arc<dyn Node>) -> Self {
        let xattr = Arc::clone(&node).as_xattr();
        let symlink = Arc::clone(&node).as_symlink();
        let lock = Arc::clone(&node).as_lock();
        let file = Arc::clone(&node)
            .as_file()
            .or_else(|| lock.clone().map(|l| l as Arc<dyn FileOps>));
        let mutable_dir = Arc::clone(&node).as_mutable_dir();
        let dir = Arc::clone(&node)
            .as_dir()
            .or_else(|| mutable_dir.clone().map(|m| m as Arc<dyn DirOps>));
        Self {
            node,
            xattr,
            symlink,
            file,
            lock,
            dir,
            mutable_dir,
        }
    }

    pub(crate) fn set(&self) -> CapabilitySet {
        CapabilitySet {
            xattr: self.xattr.is_some(),
            symlink: self.symlink.is_some(),
            file: self.file.is_some(),
            lock: self.lock.is_some(),
            dir: self.dir.is_some(),
            mutable_dir: self.mutable_dir.is_some(),
        }
    }

    pub(crate) fn node(&self) -> &Arc<dyn Node> {
        &self.node
    }

    pub(crate) fn xattr(&self) -> &dyn XattrOps {
        self.xattr.as_deref().unwrap_or(&Fallback)
    }

    pub(crate) fn symlink(&self) -> &dyn SymlinkOps {
        self.symlink.as_deref().unwrap_or(&Fallback)
    }

    pub(crate) fn file(&self) -> &dyn FileOps {
        self.file.as_deref().unwrap_or(&Fallback)
    }

    pub(crate) fn lock(&self) -> &dyn LockOps {
        self.lock.as_deref().unwrap_or(&Fallback)
    }

    pub(crate) fn dir(&self) -> &dyn DirOps {
        self.dir.as_deref().unwrap_or(&Fallback)
    }

    pub(crate) fn mutable_dir(&self) -> &dyn MutableDirOps {
        self.mutable_dir.as_deref().unwrap_or(&Fallback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Plain;
    impl Node for Plain {}

    struct Locking;
    impl Node for Locking {
        fn as_lock(self: Arc<Self>) -> Option<Arc<dyn LockOps>> {
            Some(self)
        }
    }
    impl FileOps for Locking {}
    impl LockOps for Locking {}

    struct Writable;
    impl Node for Writable {
        fn as_mutable_dir(self: Arc<Self>) -> Option<Arc<dyn MutableDirOps>> {
            Some(self)
        }
        fn as_xattr(self: Arc<Self>) -> Option<Arc<dyn XattrOps>> {
            Some(self)
        }
    }
    impl XattrOps for Writable {}
    impl DirOps for Writable {}
    impl MutableDirOps for Writable {}

    #[test]
    fn test_plain_node_has_no_optional_sets() {
        let caps = Capabilities::probe(Arc::new(Plain));
        assert_eq!(caps.set(), CapabilitySet::default());
    }

    #[test]
    fn test_lock_implies_file() {
        let caps = Capabilities::probe(Arc::new(Locking));
        let set = caps.set();
        assert!(set.lock);
        assert!(set.file);
        assert!(!set.dir);
    }

    #[test]
    fn test_mutable_dir_implies_dir() {
        let set = Capabilities::probe(Arc::new(Writable)).set();
        assert!(set.mutable_dir);
        assert!(set.dir);
        assert!(set.xattr);
        assert!(!set.file);
    }
}
