//! The inode table and the structural operations on the tree.
//!
//! # Locking
//!
//! Every inode has its own mutex over its structural state. An operation
//! that touches several inodes (linking spans the parent, the child and a
//! replaced occupant; a move spans two parents as well) locks all of them
//! through [`LockedSet`], which acquires the mutexes in ascending
//! `(inode number, address)` order. Because every multi-inode operation
//! uses the same total order, they cannot deadlock, even on graphs with
//! hard links.
//!
//! The set of inodes to lock depends on the current occupant of a name,
//! which can change until the locks are held. Operations therefore read
//! the occupant, lock, re-check it, and retry if it moved in between.
//!
//! The inode table (a `DashMap`) is only touched while holding inode
//! locks, never the other way around: nothing locks an inode while holding
//! a table shard.
//!
//! # Reclaim
//!
//! An inode leaves the table once it is not persistent, the kernel holds
//! no references, it has no parent edges and no children. The check runs
//! whenever one of those four drops.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::MutexGuard;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, trace, warn};

use crate::coherency::CacheController;
use crate::config::Options;
use crate::context::Context;
use crate::error::TreeError;
use crate::inode::{Inode, InodeRef, InodeState, ParentEdge, ROOT_INODE};
use crate::node::Node;
use crate::types::{FileKind, NodeAttr};

/// Upper bound on parent hops when rendering paths.
pub(crate) const MAX_PATH_DEPTH: usize = 4096;

/// All live inodes of one session, keyed by inode number.
pub(crate) struct InodeTree {
    nodes: DashMap<u64, InodeRef>,
    next_ino: AtomicU64,
    next_generation: AtomicU64,
    cache: CacheController,
}

impl InodeTree {
    pub(crate) fn new(options: &Options) -> Self {
        Self {
            nodes: DashMap::new(),
            next_ino: AtomicU64::new(options.first_automatic_ino.max(ROOT_INODE + 1)),
            next_generation: AtomicU64::new(1),
            cache: CacheController::new(options),
        }
    }

    pub(crate) fn cache(&self) -> &CacheController {
        &self.cache
    }

    /// Creates and registers the root directory.
    pub(crate) fn create_root(self: &Arc<Self>, ops: Arc<dyn Node>) -> InodeRef {
        let root = Arc::new(Inode::new(
            ROOT_INODE,
            0,
            FileKind::Directory,
            true,
            ops,
            Arc::downgrade(self),
        ));
        {
            let mut state = root.state.lock();
            // The kernel holds the root implicitly and never looks it up.
            state.lookup_count = 1;
            register(&root, &mut state);
        }
        root.operations().on_add(&Context::background(), &root);
        root
    }

    /// Creates an inode that is not yet linked anywhere.
    ///
    /// The inode enters the table when it is first linked or returned to
    /// the kernel.
    pub(crate) fn create(
        self: &Arc<Self>,
        ops: Arc<dyn Node>,
        attr: NodeAttr,
        persistent: bool,
    ) -> Result<InodeRef, TreeError> {
        let ino = match attr.ino {
            Some(ino) if ino == ROOT_INODE || self.nodes.contains_key(&ino) => {
                return Err(TreeError::DuplicateIno(ino));
            }
            Some(ino) => ino,
            None => self.allocate_ino(),
        };
        let generation = attr
            .generation
            .unwrap_or_else(|| self.next_generation.fetch_add(1, Ordering::Relaxed));
        let node = Arc::new(Inode::new(
            ino,
            generation,
            attr.kind,
            persistent,
            ops,
            Arc::downgrade(self),
        ));
        trace!(inode = ino, generation, kind = ?attr.kind, persistent, "inode created");
        node.operations().on_add(&Context::background(), &node);
        Ok(node)
    }

    fn allocate_ino(&self) -> u64 {
        loop {
            let ino = self.next_ino.fetch_add(1, Ordering::Relaxed);
            if ino > ROOT_INODE && !self.nodes.contains_key(&ino) {
                return ino;
            }
        }
    }

    /// Returns the live inode with this number.
    pub(crate) fn get(&self, ino: u64) -> Option<InodeRef> {
        self.nodes.get(&ino).map(|r| Arc::clone(r.value()))
    }

    pub(crate) fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Records one more kernel reference to `node`.
    pub(crate) fn add_ref(node: &InodeRef) {
        let mut state = node.state.lock();
        state.lookup_count += 1;
        register(node, &mut state);
    }
}

/// Locks for several inodes, acquired in the tree's total order.
struct LockedSet<'a> {
    guards: Vec<(&'a Inode, MutexGuard<'a, InodeState>)>,
}

impl<'a> LockedSet<'a> {
    fn lock(nodes: &[&'a Inode]) -> Self {
        let mut ordered = nodes.to_vec();
        ordered.sort_by_key(|n| (n.ino(), std::ptr::from_ref::<Inode>(n).addr()));
        ordered.dedup_by(|a, b| std::ptr::eq(*a, *b));
        let guards = ordered.into_iter().map(|n| (n, n.state.lock())).collect();
        Self { guards }
    }

    fn get(&mut self, node: &Inode) -> &mut InodeState {
        self.guards
            .iter_mut()
            .find(|(n, _)| std::ptr::eq(*n, node))
            .map(|(_, guard)| &mut **guard)
            .expect("inode is part of the locked set")
    }
}

/// Whether `name` in `dir` currently points at `expected`.
fn slot_is(dir: &InodeState, name: &str, expected: Option<&InodeRef>) -> bool {
    let current = dir.children.as_ref().and_then(|c| c.get(name));
    match (current, expected) {
        (None, None) => true,
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        _ => false,
    }
}

/// Puts `node` into the table if it is not there yet.
///
/// # Panics
///
/// If a different live inode already uses the same number.
fn register(node: &InodeRef, state: &mut InodeState) {
    if state.registered {
        return;
    }
    let Some(tree) = node.tree() else {
        return;
    };
    match tree.nodes.entry(node.ino()) {
        Entry::Vacant(entry) => {
            entry.insert(Arc::clone(node));
        }
        Entry::Occupied(entry) if Arc::ptr_eq(entry.get(), node) => {}
        Entry::Occupied(_) => panic!("{}", TreeError::DuplicateIno(node.ino())),
    }
    state.registered = true;
}

/// Drops `node` from the table if nothing keeps it alive any more.
fn reclaim_if_unused(node: &Inode, state: &mut InodeState) {
    if !state.registered
        || node.is_persistent()
        || state.lookup_count > 0
        || !state.parents.is_empty()
        || state.children.as_ref().is_some_and(|c| !c.is_empty())
    {
        return;
    }
    state.registered = false;
    if let Some(tree) = node.tree() {
        tree.nodes
            .remove_if(&node.ino(), |_, v| std::ptr::eq(Arc::as_ptr(v), node));
        tree.cache.forget(node.ino());
    }
    debug!(inode = node.ino(), "inode reclaimed");
}

/// Whether `candidate` is `start` or one of its ancestors.
fn is_ancestor_or_self(candidate: &Inode, start: &Inode) -> bool {
    if std::ptr::eq(candidate, start) {
        return true;
    }
    let Some(tree) = start.tree() else {
        return false;
    };
    let mut seen = HashSet::new();
    let mut pending: Vec<u64> = start.parents().into_iter().map(|(p, _)| p).collect();
    while let Some(ino) = pending.pop() {
        if ino == candidate.ino() {
            return true;
        }
        if !seen.insert(ino) {
            continue;
        }
        if let Some(parent) = tree.get(ino) {
            pending.extend(parent.parents().into_iter().map(|(p, _)| p));
        }
    }
    false
}

pub(crate) fn link(
    parent: &Inode,
    name: &str,
    child: &InodeRef,
    overwrite: bool,
) -> Result<(), TreeError> {
    if !parent.is_dir() {
        return Err(TreeError::NotDirectory(parent.ino()));
    }
    if child.is_dir() && is_ancestor_or_self(child, parent) {
        return Err(TreeError::WouldCycle {
            parent: parent.ino(),
            child: child.ino(),
        });
    }

    loop {
        let occupant = parent.get_child(name);
        if let Some(existing) = &occupant {
            if Arc::ptr_eq(existing, child) {
                return Ok(());
            }
            if !overwrite {
                return Err(TreeError::Exists {
                    parent: parent.ino(),
                    name: name.to_owned(),
                });
            }
        }

        let mut nodes: Vec<&Inode> = vec![parent, &**child];
        if let Some(old) = &occupant {
            nodes.push(old);
        }
        let mut locked = LockedSet::lock(&nodes);
        if !slot_is(locked.get(parent), name, occupant.as_ref()) {
            trace!(parent = parent.ino(), name, "occupant changed while locking, retrying");
            continue;
        }

        let edge = ParentEdge::new(parent.ino(), name);
        if let Some(old) = &occupant {
            locked.get(old).parents.remove(&edge);
        }
        if let Some(children) = locked.get(parent).children.as_mut() {
            children.insert(name.to_owned(), Arc::clone(child));
        }
        let state = locked.get(child);
        state.parents.insert(edge);
        register(child, state);
        if let Some(old) = &occupant {
            reclaim_if_unused(old, locked.get(old));
        }
        trace!(parent = parent.ino(), name, child = child.ino(), "child linked");
        return Ok(());
    }
}

pub(crate) fn unlink(parent: &Inode, name: &str) -> Option<InodeRef> {
    loop {
        let child = parent.get_child(name)?;
        let mut locked = LockedSet::lock(&[parent, &*child]);
        if !slot_is(locked.get(parent), name, Some(&child)) {
            continue;
        }
        if let Some(children) = locked.get(parent).children.as_mut() {
            children.remove(name);
        }
        let state = locked.get(&child);
        state.parents.remove(&ParentEdge::new(parent.ino(), name));
        reclaim_if_unused(&child, state);
        reclaim_if_unused(parent, locked.get(parent));
        trace!(parent = parent.ino(), name, child = child.ino(), "child unlinked");
        drop(locked);
        return Some(child);
    }
}

pub(crate) fn move_child(
    src: &Inode,
    name: &str,
    dst: &Inode,
    new_name: &str,
    overwrite: bool,
) -> Result<bool, TreeError> {
    if !dst.is_dir() {
        return Err(TreeError::NotDirectory(dst.ino()));
    }

    loop {
        let Some(child) = src.get_child(name) else {
            return Ok(false);
        };
        if child.is_dir() && is_ancestor_or_self(&child, dst) {
            return Err(TreeError::WouldCycle {
                parent: dst.ino(),
                child: child.ino(),
            });
        }
        let occupant = dst.get_child(new_name);
        if let Some(existing) = &occupant {
            // Renaming onto another link of the same inode changes nothing.
            if Arc::ptr_eq(existing, &child) {
                return Ok(true);
            }
            if !overwrite {
                return Err(TreeError::Exists {
                    parent: dst.ino(),
                    name: new_name.to_owned(),
                });
            }
        }

        let mut nodes: Vec<&Inode> = vec![src, dst, &*child];
        if let Some(old) = &occupant {
            nodes.push(old);
        }
        let mut locked = LockedSet::lock(&nodes);
        if !slot_is(locked.get(src), name, Some(&child))
            || !slot_is(locked.get(dst), new_name, occupant.as_ref())
        {
            continue;
        }

        let old_edge = ParentEdge::new(src.ino(), name);
        let new_edge = ParentEdge::new(dst.ino(), new_name);
        if let Some(old) = &occupant {
            locked.get(old).parents.remove(&new_edge);
        }
        if let Some(children) = locked.get(src).children.as_mut() {
            children.remove(name);
        }
        if let Some(children) = locked.get(dst).children.as_mut() {
            children.insert(new_name.to_owned(), Arc::clone(&child));
        }
        let state = locked.get(&child);
        state.parents.remove(&old_edge);
        state.parents.insert(new_edge);
        if let Some(old) = &occupant {
            reclaim_if_unused(old, locked.get(old));
        }
        // An unlinked source directory may have just lost its last child.
        reclaim_if_unused(src, locked.get(src));
        trace!(
            src = src.ino(),
            name,
            dst = dst.ino(),
            new_name,
            child = child.ino(),
            "child moved"
        );
        return Ok(true);
    }
}

pub(crate) fn exchange(src: &Inode, name: &str, dst: &Inode, new_name: &str) -> bool {
    loop {
        let (Some(a), Some(b)) = (src.get_child(name), dst.get_child(new_name)) else {
            return false;
        };
        let mut locked = LockedSet::lock(&[src, dst, &*a, &*b]);
        if !slot_is(locked.get(src), name, Some(&a)) || !slot_is(locked.get(dst), new_name, Some(&b)) {
            continue;
        }

        let edge_a = ParentEdge::new(src.ino(), name);
        let edge_b = ParentEdge::new(dst.ino(), new_name);
        locked.get(&a).parents.remove(&edge_a);
        locked.get(&b).parents.remove(&edge_b);
        locked.get(&a).parents.insert(edge_b);
        locked.get(&b).parents.insert(edge_a);
        if let Some(children) = locked.get(src).children.as_mut() {
            children.insert(name.to_owned(), Arc::clone(&b));
        }
        if let Some(children) = locked.get(dst).children.as_mut() {
            children.insert(new_name.to_owned(), Arc::clone(&a));
        }
        trace!(src = src.ino(), name, dst = dst.ino(), new_name, "children exchanged");
        return true;
    }
}

pub(crate) fn forget(node: &Inode, count: u64) {
    let mut state = node.state.lock();
    if count > state.lookup_count {
        warn!(
            inode = node.ino(),
            held = state.lookup_count,
            count,
            "forget exceeds lookup count, clamping to zero"
        );
    }
    state.lookup_count = state.lookup_count.saturating_sub(count);
    trace!(inode = node.ino(), remaining = state.lookup_count, "forget");
    reclaim_if_unused(node, &mut state);
}
