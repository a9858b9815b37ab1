//! Inodes: the nodes of the filesystem tree.
//!
//! An [`Inode`] pairs a stable identity (inode number, generation, kind)
//! with the author's capability object and the structural state the tree
//! maintains for it: the set of `(parent, name)` edges it is reachable
//! through (more than one for hard links), its children if it is a
//! directory, and the number of references the kernel holds.
//!
//! Inodes are shared as [`InodeRef`] (`Arc<Inode>`). Parents own their
//! children; children refer to their parents by inode number only, so the
//! graph has no ownership cycles.

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Weak};

use crate::capability::{Capabilities, CapabilitySet};
use crate::error::{Errno, OpResult, TreeError};
use crate::node::Node;
use crate::tree::{self, InodeTree};
use crate::types::{FileKind, NodeAttr};

/// The root inode number (FUSE convention).
pub const ROOT_INODE: u64 = 1;

/// Shared reference to an inode.
pub type InodeRef = Arc<Inode>;

/// One `(parent inode number, name)` edge.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct ParentEdge {
    pub(crate) parent: u64,
    pub(crate) name: String,
}

impl ParentEdge {
    pub(crate) fn new(parent: u64, name: &str) -> Self {
        Self {
            parent,
            name: name.to_owned(),
        }
    }
}

/// Structural state, guarded by the inode's lock.
#[derive(Default)]
pub(crate) struct InodeState {
    pub(crate) parents: HashSet<ParentEdge>,
    /// `Some` exactly for directories.
    pub(crate) children: Option<HashMap<String, InodeRef>>,
    /// References held by the kernel (lookups minus forgets).
    pub(crate) lookup_count: u64,
    /// Whether the inode is registered in the session's inode table.
    pub(crate) registered: bool,
}

impl InodeState {
    fn for_kind(kind: FileKind) -> Self {
        Self {
            children: (kind == FileKind::Directory).then(HashMap::new),
            ..Self::default()
        }
    }
}

/// A node of the filesystem tree.
pub struct Inode {
    ino: u64,
    generation: u64,
    kind: FileKind,
    persistent: bool,
    caps: Capabilities,
    tree: Weak<InodeTree>,
    pub(crate) state: Mutex<InodeState>,
}

impl Inode {
    pub(crate) fn new(
        ino: u64,
        generation: u64,
        kind: FileKind,
        persistent: bool,
        ops: Arc<dyn Node>,
        tree: Weak<InodeTree>,
    ) -> Self {
        Self {
            ino,
            generation,
            kind,
            persistent,
            caps: Capabilities::probe(ops),
            tree,
            state: Mutex::new(InodeState::for_kind(kind)),
        }
    }

    pub fn ino(&self) -> u64 {
        self.ino
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn kind(&self) -> FileKind {
        self.kind
    }

    pub fn is_dir(&self) -> bool {
        self.kind == FileKind::Directory
    }

    pub fn is_root(&self) -> bool {
        self.ino == ROOT_INODE
    }

    /// Persistent inodes are never reclaimed.
    pub fn is_persistent(&self) -> bool {
        self.persistent
    }

    /// The capability object backing this inode.
    pub fn operations(&self) -> &Arc<dyn Node> {
        self.caps.node()
    }

    /// Which optional capability sets the capability object implements.
    pub fn capabilities(&self) -> CapabilitySet {
        self.caps.set()
    }

    pub(crate) fn caps(&self) -> &Capabilities {
        &self.caps
    }

    pub(crate) fn tree(&self) -> Option<Arc<InodeTree>> {
        self.tree.upgrade()
    }

    /// References currently held by the kernel.
    pub fn lookup_count(&self) -> u64 {
        self.state.lock().lookup_count
    }

    /// Whether the inode is currently known to the session, i.e. linked
    /// into the tree or referenced by the kernel.
    pub fn is_live(&self) -> bool {
        self.state.lock().registered
    }

    /// Creates a new inode in the same session, ready to be returned from
    /// a lookup or linked with [`Inode::add_child`].
    ///
    /// # Panics
    ///
    /// If `attr` requests an inode number already used by a live inode,
    /// or the session has been dropped. Use [`Inode::try_new_inode`] to
    /// handle those cases.
    pub fn new_inode(&self, ops: Arc<dyn Node>, attr: NodeAttr) -> InodeRef {
        self.try_new_inode(ops, attr)
            .unwrap_or_else(|e| panic!("cannot create inode: {e}"))
    }

    /// Like [`Inode::new_inode`], but the inode is never reclaimed, even
    /// when unlinked and forgotten by the kernel.
    pub fn new_persistent_inode(&self, ops: Arc<dyn Node>, attr: NodeAttr) -> InodeRef {
        self.try_create(ops, attr, true)
            .unwrap_or_else(|e| panic!("cannot create inode: {e}"))
    }

    /// Fallible variant of [`Inode::new_inode`].
    pub fn try_new_inode(&self, ops: Arc<dyn Node>, attr: NodeAttr) -> Result<InodeRef, TreeError> {
        self.try_create(ops, attr, false)
    }

    fn try_create(
        &self,
        ops: Arc<dyn Node>,
        attr: NodeAttr,
        persistent: bool,
    ) -> Result<InodeRef, TreeError> {
        let tree = self.tree().ok_or(TreeError::Detached)?;
        tree.create(ops, attr, persistent)
    }

    /// Looks up a live inode of this session by number.
    pub fn find_inode(&self, ino: u64) -> Option<InodeRef> {
        self.tree()?.get(ino)
    }

    /// Links `child` under this directory as `name`.
    ///
    /// If `name` is taken by a different inode, fails with
    /// [`TreeError::Exists`] unless `overwrite` is set, in which case the
    /// previous occupant's edge is removed first.
    pub fn add_child(&self, name: &str, child: &InodeRef, overwrite: bool) -> Result<(), TreeError> {
        tree::link(self, name, child, overwrite)
    }

    /// Returns the child linked as `name`.
    pub fn get_child(&self, name: &str) -> Option<InodeRef> {
        self.state.lock().children.as_ref()?.get(name).cloned()
    }

    /// Snapshot of the children, in no particular order.
    pub fn children(&self) -> Vec<(String, InodeRef)> {
        self.state.lock().children.as_ref().map_or_else(Vec::new, |c| {
            c.iter().map(|(name, child)| (name.clone(), Arc::clone(child))).collect()
        })
    }

    /// Removes the edge `name` and returns the inode it pointed to.
    pub fn rm_child(&self, name: &str) -> Option<InodeRef> {
        tree::unlink(self, name)
    }

    /// Moves the child `name` to `new_parent` as `new_name`.
    ///
    /// Returns `Ok(false)` if `name` is not linked here. An existing
    /// `new_name` is replaced only with `overwrite`.
    pub fn mv_child(
        &self,
        name: &str,
        new_parent: &Inode,
        new_name: &str,
        overwrite: bool,
    ) -> Result<bool, TreeError> {
        tree::move_child(self, name, new_parent, new_name, overwrite)
    }

    /// Swaps the children `name` and `new_name` of `new_parent`.
    ///
    /// Returns false if either name is not linked.
    pub fn exchange_child(&self, name: &str, new_parent: &Inode, new_name: &str) -> bool {
        tree::exchange(self, name, new_parent, new_name)
    }

    /// Snapshot of the `(parent inode number, name)` edges.
    pub fn parents(&self) -> Vec<(u64, String)> {
        let mut edges: Vec<_> = self
            .state
            .lock()
            .parents
            .iter()
            .map(|e| (e.parent, e.name.clone()))
            .collect();
        edges.sort();
        edges
    }

    /// One parent of this inode (the lowest edge), with the name it is
    /// linked as.
    pub fn parent(&self) -> Option<(String, InodeRef)> {
        let tree = self.tree()?;
        self.parents()
            .into_iter()
            .find_map(|(ino, name)| tree.get(ino).map(|p| (name, p)))
    }

    /// A path from the root, following [`Inode::parent`]. Inodes that are
    /// no longer reachable from the root are prefixed with `.deleted/`.
    pub fn path(&self) -> String {
        let mut segments = Vec::new();
        let mut reached_root = self.is_root();
        let mut current = self.parent();
        let mut steps = 0;
        while let Some((name, parent)) = current {
            segments.push(name);
            if parent.is_root() {
                reached_root = true;
                break;
            }
            steps += 1;
            if steps > tree::MAX_PATH_DEPTH {
                break;
            }
            current = parent.parent();
        }
        segments.reverse();
        let path = segments.join("/");
        if reached_root {
            path
        } else {
            format!(".deleted/{path}")
        }
    }

    /// Drops `count` kernel references. Subtracting more than are held is
    /// clamped to zero.
    pub fn forget(&self, count: u64) {
        tree::forget(self, count);
    }

    /// Asks the kernel to drop cached content in `[offset, offset + len)`.
    /// A `len` of 0 means "to the end of the file".
    ///
    /// Fails if the transport does not know the inode (for example because
    /// the kernel just forgot it); callers should tolerate that.
    pub fn notify_content(&self, offset: i64, len: i64) -> OpResult<()> {
        let tree = self.tree().ok_or(Errno::ENOTCONN)?;
        tree.cache().notify_content(self.ino, offset, len)
    }

    /// Asks the kernel to drop its cached lookup of `name` in this
    /// directory.
    pub fn notify_entry(&self, name: &str) -> OpResult<()> {
        let tree = self.tree().ok_or(Errno::ENOTCONN)?;
        tree.cache().notify_entry(self.ino, name)
    }
}

impl fmt::Debug for Inode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Inode")
            .field("ino", &self.ino)
            .field("generation", &self.generation)
            .field("kind", &self.kind)
            .field("persistent", &self.persistent)
            .finish_non_exhaustive()
    }
}
