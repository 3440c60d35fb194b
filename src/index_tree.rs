//! `IndexTree`: the per-container hierarchical node store.
//!
//! A tree is one `RwLock<TreeInner>`. Every access to node attributes, hints,
//! or the child map goes through a [`TreeReadGuard`] or [`TreeWriteGuard`]
//! borrowed from the lock, so the lock is always held for the duration of
//! whatever the caller does with the node data it hands back.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};
use crate::node::{Arena, FileNode, NodeData, NodeId, NodeState, Scope, TaskHandle};

fn split_path(path: &str) -> Vec<&str> {
    path.split('/').filter(|c| !c.is_empty() && *c != ".").collect()
}

struct TreeInner {
    arena: Arena,
    root: NodeId,
}

pub struct IndexTree {
    /// Stable identifier used to name the persisted snapshot file.
    pub container_id: String,
    inner: RwLock<TreeInner>,
}

impl IndexTree {
    pub fn new(container_id: impl Into<String>) -> Self {
        let mut arena = Arena::new();
        let root = arena.insert(NodeData::new_folder("."));
        IndexTree {
            container_id: container_id.into(),
            inner: RwLock::new(TreeInner { arena, root }),
        }
    }

    pub fn read(&self) -> TreeReadGuard<'_> {
        TreeReadGuard {
            guard: self.inner.read().expect("index tree lock poisoned"),
        }
    }

    pub fn write(&self) -> TreeWriteGuard<'_> {
        TreeWriteGuard {
            guard: self.inner.write().expect("index tree lock poisoned"),
        }
    }

    pub fn browse_all_non_sync_nodes(&self) -> BrowseIter<'_> {
        BrowseIter {
            tree: TreeRef::Borrowed(self),
            stack: Vec::new(),
            yielded_in_pass: false,
            started_pass: false,
            finished: false,
        }
    }

    /// Same walk as [`Self::browse_all_non_sync_nodes`], but the iterator
    /// owns an `Arc` clone of the tree instead of borrowing it. Used by
    /// [`crate::scheduler::SyncScheduler`], which keeps one generator alive
    /// per tree across calls (§4.7) and so cannot hold a borrow of a tree it
    /// only has behind an `Arc`.
    pub fn browse_all_non_sync_nodes_owned(self: &Arc<Self>) -> BrowseIter<'static> {
        BrowseIter {
            tree: TreeRef::Owned(Arc::clone(self)),
            stack: Vec::new(),
            yielded_in_pass: false,
            started_pass: false,
            finished: false,
        }
    }
}

/// How a [`BrowseIter`] reaches its tree: borrowed for the common case, or
/// an owned `Arc` when the iterator must outlive the stack frame that
/// created it (§4.7's persistent per-tree generator).
enum TreeRef<'t> {
    Borrowed(&'t IndexTree),
    Owned(Arc<IndexTree>),
}

impl<'t> TreeRef<'t> {
    fn get(&self) -> &IndexTree {
        match self {
            TreeRef::Borrowed(t) => t,
            TreeRef::Owned(t) => t,
        }
    }
}

/// Read-only view over a locked tree.
pub struct TreeReadGuard<'t> {
    guard: RwLockReadGuard<'t, TreeInner>,
}

impl<'t> TreeReadGuard<'t> {
    pub fn root(&self) -> NodeId {
        self.guard.root
    }

    pub fn node(&self, id: NodeId) -> Option<&NodeData> {
        self.guard.arena.get(id)
    }

    pub fn get_node_by_path(&self, path: &str) -> Option<NodeId> {
        let mut current = self.guard.root;
        for component in split_path(path) {
            let node = self.guard.arena.get(current)?;
            current = *node.children.get(component)?;
        }
        Some(current)
    }

    pub fn export_data(&self) -> PersistedTree {
        PersistedTree {
            version: 2,
            root: export_node(&self.guard.arena, self.guard.root),
        }
    }
}

/// Mutable view over a locked tree. All mutation goes through here so that
/// dirty propagation and pruning stay centralised.
pub struct TreeWriteGuard<'t> {
    guard: RwLockWriteGuard<'t, TreeInner>,
}

impl<'t> TreeWriteGuard<'t> {
    pub fn root(&self) -> NodeId {
        self.guard.root
    }

    pub fn node(&self, id: NodeId) -> Option<&NodeData> {
        self.guard.arena.get(id)
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut NodeData> {
        self.guard.arena.get_mut(id)
    }

    pub fn node_pair_mut(&mut self, a: NodeId, b: NodeId) -> Option<(&mut NodeData, &mut NodeData)> {
        self.guard.arena.get_pair_mut(a, b)
    }

    pub fn get_node_by_path(&self, path: &str) -> Option<NodeId> {
        let mut current = self.guard.root;
        for component in split_path(path) {
            let node = self.guard.arena.get(current)?;
            current = *node.children.get(component)?;
        }
        Some(current)
    }

    /// Creates any missing intermediate `FolderNode`s; the leaf is produced
    /// by `leaf_factory` only if it does not already exist.
    pub fn get_or_create_node_by_path(
        &mut self,
        path: &str,
        leaf_factory: impl FnOnce(&str) -> NodeData,
    ) -> NodeId {
        let components = split_path(path);
        let mut current = self.guard.root;
        let Some((leaf_name, folders)) = components.split_last() else {
            return current;
        };
        for name in folders {
            current = self.child_or_insert(current, name, || NodeData::new_folder(*name));
        }
        current = self.child_or_insert(current, leaf_name, || leaf_factory(leaf_name));
        current
    }

    fn child_or_insert(
        &mut self,
        parent: NodeId,
        name: &str,
        make: impl FnOnce() -> NodeData,
    ) -> NodeId {
        if let Some(existing) = self
            .guard
            .arena
            .get(parent)
            .and_then(|p| p.children.get(name))
            .copied()
        {
            return existing;
        }
        self.add_child(parent, name, make())
    }

    pub fn add_child(&mut self, parent: NodeId, name: &str, mut data: NodeData) -> NodeId {
        data.parent = Some(parent);
        let id = self.guard.arena.insert(data);
        if let Some(p) = self.guard.arena.get_mut(parent) {
            p.children.insert(name.to_string(), id);
        }
        self.propagate_dirty(id);
        id
    }

    /// Removes a node and its subtree from its parent's child map. Does not
    /// check whether detaching is appropriate; callers use [`Self::release`]
    /// for the conditional prune, or call this directly once they've already
    /// established the node is eligible (e.g. hint merging cancels a
    /// create-then-delete pair).
    pub fn detach(&mut self, id: NodeId) {
        let parent = self.guard.arena.get(id).and_then(|n| n.parent);
        if let Some(parent_id) = parent {
            if let Some(parent_node) = self.guard.arena.get_mut(parent_id) {
                parent_node.children.retain(|_, child| *child != id);
            }
        }
        self.guard.arena.remove(id);
        if let Some(parent_id) = parent {
            self.propagate_dirty(parent_id);
        }
    }

    /// Sets `sync` on a node and recomputes `dirty` up the ancestor chain
    /// until the flag stabilises (invariant 3/4 of the data model).
    pub fn set_sync(&mut self, id: NodeId, sync: bool) {
        if let Some(node) = self.guard.arena.get_mut(id) {
            node.set_sync_raw(sync);
        }
        self.propagate_dirty(id);
    }

    fn propagate_dirty(&mut self, mut id: NodeId) {
        loop {
            let new_dirty = match self.guard.arena.get(id) {
                Some(node) => {
                    !node.sync()
                        || node
                            .children
                            .values()
                            .any(|c| self.guard.arena.get(*c).map(|n| n.dirty()).unwrap_or(false))
                }
                None => return,
            };
            let Some(node) = self.guard.arena.get_mut(id) else {
                return;
            };
            let changed = node.dirty() != new_dirty;
            node.set_dirty_raw(new_dirty);
            if !changed {
                return;
            }
            match self.guard.arena.get(id).and_then(|n| n.parent) {
                Some(parent) => id = parent,
                None => return,
            }
        }
    }

    /// Marks every node in the tree non-sync, forcing a full rescan.
    pub fn set_tree_not_sync(&mut self) {
        let ids: Vec<NodeId> = self.all_ids();
        for id in &ids {
            if let Some(node) = self.guard.arena.get_mut(*id) {
                node.set_dirty_raw(true);
                node.set_sync_raw(false);
            }
        }
    }

    fn all_ids(&self) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![self.guard.root];
        while let Some(id) = stack.pop() {
            out.push(id);
            if let Some(node) = self.guard.arena.get(id) {
                stack.extend(node.children.values().copied());
            }
        }
        out
    }

    /// Reserves a node for a task: fails if already reserved, otherwise
    /// clears both hints and stores the handle (invariant 5).
    pub fn acquire(&mut self, id: NodeId, handle: TaskHandle) -> Result<()> {
        let node = self.guard.arena.get_mut(id).ok_or(SyncError::NodeNotFound)?;
        if node.task.is_some() {
            return Err(SyncError::NodeAlreadyAcquired);
        }
        node.task = Some(handle);
        node.local_hint = None;
        node.remote_hint = None;
        Ok(())
    }

    /// Releases a task's hold on a node (§4.2 `release()` contract).
    pub fn release(&mut self, id: NodeId) -> Result<()> {
        let node = self.guard.arena.get_mut(id).ok_or(SyncError::NodeNotFound)?;
        node.task = None;
        let unhinted = node.local_hint.is_none() && node.remote_hint.is_none();
        if unhinted {
            self.set_sync(id, true);
            let node = self.guard.arena.get(id).ok_or(SyncError::NodeNotFound)?;
            if !node.exists() && node.children.is_empty() {
                self.detach(id);
            }
        }
        Ok(())
    }

    /// Releases a task's hold on a node after it failed (§4.6, §7): clears
    /// `task` like [`Self::release`], but never marks the node `sync` even if
    /// it ended up unhinted, so the scheduler revisits it on the next pass
    /// instead of treating the failed attempt as a clean sync.
    pub fn release_after_failure(&mut self, id: NodeId) -> Result<()> {
        let node = self.guard.arena.get_mut(id).ok_or(SyncError::NodeNotFound)?;
        node.task = None;
        Ok(())
    }

    pub fn set_hint(&mut self, id: NodeId, scope: Scope, hint: Option<crate::hints::Hint>) {
        if let Some(node) = self.guard.arena.get_mut(id) {
            node.set_hint(scope, hint);
        }
        self.propagate_dirty(id);
    }

    /// §4.6/§7 quarantine bookkeeping: bumps the node's consecutive-failure
    /// counter and, once it reaches `quarantine_after`, marks the node
    /// quarantined for `quarantine_duration` so the browse iterator skips it
    /// until the cool-down elapses. Returns whether this call quarantined
    /// the node.
    pub fn record_task_failure(
        &mut self,
        id: NodeId,
        quarantine_after: u32,
        quarantine_duration: std::time::Duration,
    ) -> bool {
        let Some(node) = self.guard.arena.get_mut(id) else {
            return false;
        };
        node.failure_count += 1;
        if node.failure_count >= quarantine_after {
            node.quarantined_until = Some(Instant::now() + quarantine_duration);
            true
        } else {
            false
        }
    }

    /// Clears a node's failure counter and quarantine after a successful
    /// sync pass.
    pub fn record_task_success(&mut self, id: NodeId) {
        if let Some(node) = self.guard.arena.get_mut(id) {
            node.failure_count = 0;
            node.quarantined_until = None;
        }
    }

    /// Replaces the whole tree with a freshly-loaded one.
    pub fn load(&mut self, raw: &str) -> Result<()> {
        let value: serde_json::Value = serde_json::from_str(raw)?;
        let mut arena = Arena::new();
        let root = if value.get("version").is_some() && value.get("root").is_some() {
            let persisted: PersistedTree = serde_json::from_value(value)?;
            import_node(&mut arena, &persisted.root, ".")
        } else {
            let flat: BTreeMap<String, (String, String)> = serde_json::from_value(value)?;
            import_legacy(&mut arena, &flat)
        };
        self.guard.arena = arena;
        self.guard.root = root;
        Ok(())
    }
}

fn export_node(arena: &Arena, id: NodeId) -> PersistedNode {
    let node = arena.get(id).expect("node referenced by tree must exist");
    let children = node
        .children
        .iter()
        .map(|(name, child)| (name.clone(), export_node(arena, *child)))
        .collect();
    match &node.kind {
        crate::node::NodeKind::Folder(_) => PersistedNode {
            kind: PersistedKind::Folder,
            state: None,
            children,
        },
        crate::node::NodeKind::File(f) => PersistedNode {
            kind: PersistedKind::File,
            state: match (&f.local_hash, &f.remote_hash) {
                (Some(l), Some(r)) => Some(PersistedFileState {
                    local_hash: l.clone(),
                    remote_hash: r.clone(),
                }),
                _ => None,
            },
            children,
        },
    }
}

fn import_node(arena: &mut Arena, node: &PersistedNode, name: &str) -> NodeId {
    let mut data = match node.kind {
        PersistedKind::Folder => NodeData::new_folder(name),
        PersistedKind::File => {
            let mut file = NodeData::new_file(name);
            if let Some(state) = &node.state {
                if let Some(f) = file.as_file_mut() {
                    *f = FileNode {
                        local_hash: Some(state.local_hash.clone()),
                        remote_hash: Some(state.remote_hash.clone()),
                    };
                }
            }
            file
        }
    };
    data.set_sync_raw(true);
    data.set_dirty_raw(false);
    let id = arena.insert(data);
    for (child_name, child_node) in &node.children {
        let child_id = import_node(arena, child_node, child_name);
        if let Some(child) = arena.get_mut(child_id) {
            child.parent = Some(id);
        }
        if let Some(parent) = arena.get_mut(id) {
            parent.children.insert(child_name.clone(), child_id);
        }
    }
    id
}

fn import_legacy(arena: &mut Arena, flat: &BTreeMap<String, (String, String)>) -> NodeId {
    let mut root_data = NodeData::new_folder(".");
    root_data.set_sync_raw(true);
    root_data.set_dirty_raw(false);
    let root = arena.insert(root_data);
    for (path, (local_hash, remote_hash)) in flat {
        let components: Vec<&str> = split_path(path);
        let Some((leaf, folders)) = components.split_last() else {
            continue;
        };
        let mut current = root;
        for name in folders {
            current = legacy_child_or_insert(arena, current, name, || {
                let mut d = NodeData::new_folder(*name);
                d.set_sync_raw(true);
                d.set_dirty_raw(false);
                d
            });
        }
        legacy_child_or_insert(arena, current, leaf, || {
            let mut d = NodeData::new_file(*leaf);
            if let Some(f) = d.as_file_mut() {
                f.local_hash = Some(local_hash.clone());
                f.remote_hash = Some(remote_hash.clone());
            }
            d.set_sync_raw(true);
            d.set_dirty_raw(false);
            d
        });
    }
    root
}

fn legacy_child_or_insert(
    arena: &mut Arena,
    parent: NodeId,
    name: &str,
    make: impl FnOnce() -> NodeData,
) -> NodeId {
    if let Some(existing) = arena.get(parent).and_then(|p| p.children.get(name)).copied() {
        return existing;
    }
    let mut data = make();
    data.parent = Some(parent);
    let id = arena.insert(data);
    if let Some(p) = arena.get_mut(parent) {
        p.children.insert(name.to_string(), id);
    }
    id
}

/// The value yielded by [`BrowseIter`]: either a node ready for dispatch, or
/// the sentinel meaning every remaining dirty node is already owned by a
/// task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrowseItem {
    Node(NodeId),
    WaitForTask,
}

struct Frame {
    node: NodeId,
    self_checked: bool,
    children: Vec<NodeId>,
    next_child_idx: usize,
}

/// Lazy, restartable depth-first walk over a tree's dirty nodes (§4.1).
///
/// Each call to [`Iterator::next`] acquires the tree's read lock only for
/// the small step it needs, then releases it before returning — the
/// equivalent, in a thread-and-lock world, of a generator that releases its
/// lock at every `yield`.
pub struct BrowseIter<'t> {
    tree: TreeRef<'t>,
    stack: Vec<Frame>,
    yielded_in_pass: bool,
    started_pass: bool,
    finished: bool,
}

impl<'t> Iterator for BrowseIter<'t> {
    type Item = BrowseItem;

    fn next(&mut self) -> Option<BrowseItem> {
        if self.finished {
            return None;
        }
        loop {
            if self.stack.is_empty() {
                let guard = self.tree.get().inner.read().expect("index tree lock poisoned");
                let root = guard.root;
                let root_dirty = guard.arena.get(root).map(|n| n.dirty()).unwrap_or(false);
                if !root_dirty {
                    self.finished = true;
                    return None;
                }
                drop(guard);
                if self.started_pass && !self.yielded_in_pass {
                    self.started_pass = false;
                    return Some(BrowseItem::WaitForTask);
                }
                self.stack.push(Frame {
                    node: root,
                    self_checked: false,
                    children: Vec::new(),
                    next_child_idx: 0,
                });
                self.yielded_in_pass = false;
                self.started_pass = true;
                continue;
            }

            let top = self.stack.len() - 1;
            let guard = self.tree.get().inner.read().expect("index tree lock poisoned");
            let node_id = self.stack[top].node;
            let Some(node) = guard.arena.get(node_id) else {
                drop(guard);
                self.stack.pop();
                continue;
            };

            if !self.stack[top].self_checked {
                self.stack[top].self_checked = true;
                let quarantined = node
                    .quarantined_until
                    .map(|until| until > Instant::now())
                    .unwrap_or(false);
                let eligible = !node.sync() && node.task.is_none() && !quarantined;
                self.stack[top].children = node.children.values().copied().collect();
                drop(guard);
                if eligible {
                    self.yielded_in_pass = true;
                    return Some(BrowseItem::Node(node_id));
                }
                continue;
            }

            let idx = self.stack[top].next_child_idx;
            if idx >= self.stack[top].children.len() {
                drop(guard);
                self.stack.pop();
                continue;
            }
            self.stack[top].next_child_idx += 1;
            let child_id = self.stack[top].children[idx];
            let child_dirty = guard.arena.get(child_id).map(|n| n.dirty()).unwrap_or(false);
            drop(guard);
            if child_dirty {
                self.stack.push(Frame {
                    node: child_id,
                    self_checked: false,
                    children: Vec::new(),
                    next_child_idx: 0,
                });
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedTree {
    pub version: u32,
    pub root: PersistedNode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PersistedKind {
    #[serde(rename = "FILE")]
    File,
    #[serde(rename = "FOLDER")]
    Folder,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedFileState {
    pub local_hash: String,
    pub remote_hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedNode {
    #[serde(rename = "type")]
    pub kind: PersistedKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<PersistedFileState>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub children: BTreeMap<String, PersistedNode>,
}

/// Snapshot of a node's content identity used by [`crate::hint_builder`]
/// when it needs to stash the prior state of a node that a hint overwrote.
pub fn state_of(node: &NodeData) -> NodeState {
    node.state()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_or_create_builds_intermediate_folders() {
        let tree = IndexTree::new("c1");
        let mut w = tree.write();
        let leaf = w.get_or_create_node_by_path("a/b/file.txt", |n| NodeData::new_file(n));
        let a = w.get_node_by_path("a").unwrap();
        let b = w.get_node_by_path("a/b").unwrap();
        assert!(w.node(a).unwrap().is_folder());
        assert!(w.node(b).unwrap().is_folder());
        assert!(!w.node(leaf).unwrap().is_folder());
        assert_eq!(w.get_node_by_path("a/b/file.txt"), Some(leaf));
    }

    #[test]
    fn dirty_propagates_to_ancestors() {
        let tree = IndexTree::new("c1");
        let leaf = {
            let mut w = tree.write();
            let leaf = w.get_or_create_node_by_path("a/b/file.txt", |n| NodeData::new_file(n));
            w.set_sync(w.get_node_by_path("a").unwrap(), true);
            w.set_sync(w.get_node_by_path("a/b").unwrap(), true);
            w.set_sync(leaf, true);
            leaf
        };
        {
            let r = tree.read();
            assert!(!r.node(r.root()).unwrap().dirty());
        }
        let mut w = tree.write();
        w.set_sync(leaf, false);
        assert!(w.node(w.get_node_by_path("a/b").unwrap()).unwrap().dirty());
        assert!(w.node(w.root()).unwrap().dirty());
    }

    #[test]
    fn browse_yields_only_free_dirty_nodes() {
        let tree = IndexTree::new("c1");
        {
            let mut w = tree.write();
            w.get_or_create_node_by_path("a/file.txt", |n| NodeData::new_file(n));
        }
        let items: Vec<_> = tree.browse_all_non_sync_nodes().collect();
        assert!(items
            .iter()
            .any(|i| matches!(i, BrowseItem::Node(_) | BrowseItem::WaitForTask)));
    }

    #[test]
    fn browse_waits_when_every_dirty_node_is_busy() {
        let tree = IndexTree::new("c1");
        let leaf = {
            let mut w = tree.write();
            let leaf = w.get_or_create_node_by_path("file.txt", |n| NodeData::new_file(n));
            w.set_sync(w.root(), true);
            w.acquire(leaf, TaskHandle(1)).unwrap();
            leaf
        };
        let mut iter = tree.browse_all_non_sync_nodes();
        assert_eq!(iter.next(), Some(BrowseItem::WaitForTask));
        let _ = leaf;
    }

    #[test]
    fn repeated_failures_quarantine_node_until_cooldown() {
        let tree = IndexTree::new("c1");
        let leaf = {
            let mut w = tree.write();
            let leaf = w.get_or_create_node_by_path("flaky.txt", |n| NodeData::new_file(n));
            w.set_sync(w.root(), true);
            leaf
        };
        let mut w = tree.write();
        assert!(!w.record_task_failure(leaf, 3, std::time::Duration::from_secs(3600)));
        assert!(!w.record_task_failure(leaf, 3, std::time::Duration::from_secs(3600)));
        assert!(w.record_task_failure(leaf, 3, std::time::Duration::from_secs(3600)));
        assert!(w.node(leaf).unwrap().quarantined_until.is_some());
        drop(w);

        // a quarantined node is dirty (never marked sync) but must not be
        // yielded by the browse iterator until the cool-down elapses.
        let mut iter = tree.browse_all_non_sync_nodes();
        assert_eq!(iter.next(), Some(BrowseItem::WaitForTask));

        let mut w = tree.write();
        w.record_task_success(leaf);
        assert!(w.node(leaf).unwrap().quarantined_until.is_none());
        drop(w);

        let mut iter = tree.browse_all_non_sync_nodes();
        assert_eq!(iter.next(), Some(BrowseItem::Node(leaf)));
    }

    #[test]
    fn release_after_failure_clears_task_without_marking_sync() {
        let tree = IndexTree::new("c1");
        let leaf = {
            let mut w = tree.write();
            let leaf = w.get_or_create_node_by_path("retry.txt", |n| NodeData::new_file(n));
            w.acquire(leaf, TaskHandle(1)).unwrap();
            leaf
        };
        let mut w = tree.write();
        w.release_after_failure(leaf).unwrap();
        assert!(w.node(leaf).unwrap().task.is_none());
        assert!(!w.node(leaf).unwrap().sync());
        assert!(w.node(leaf).unwrap().dirty());
    }

    #[test]
    fn release_prunes_absent_unhinted_childless_node() {
        let tree = IndexTree::new("c1");
        let leaf = {
            let mut w = tree.write();
            let leaf = w.get_or_create_node_by_path("gone.txt", |n| NodeData::new_file(n));
            w.acquire(leaf, TaskHandle(7)).unwrap();
            leaf
        };
        let mut w = tree.write();
        w.release(leaf).unwrap();
        assert_eq!(w.get_node_by_path("gone.txt"), None);
    }

    #[test]
    fn legacy_load_lifts_flat_map() {
        let tree = IndexTree::new("c1");
        let mut w = tree.write();
        w.load(r#"{"deep/nested/file":["h1","h2"]}"#).unwrap();
        let folder = w.get_node_by_path("deep/nested").unwrap();
        assert!(w.node(folder).unwrap().is_folder());
        let leaf = w.get_node_by_path("deep/nested/file").unwrap();
        let file = w.node(leaf).unwrap().as_file().unwrap();
        assert_eq!(file.get_hashes(), (Some("h1"), Some("h2")));
    }

    #[test]
    fn round_trip_export_then_load() {
        let tree = IndexTree::new("c1");
        {
            let mut w = tree.write();
            w.get_or_create_node_by_path("a/b/file.txt", |n| {
                let mut d = NodeData::new_file(n);
                d.as_file_mut().unwrap().set_hashes(Some("x".into()), Some("y".into())).unwrap();
                d
            });
        }
        let exported = tree.read().export_data();
        let json = serde_json::to_string(&exported).unwrap();
        let tree2 = IndexTree::new("c1");
        tree2.write().load(&json).unwrap();
        let leaf = tree2.write().get_node_by_path("a/b/file.txt").unwrap();
        let file = tree2.read().node(leaf).unwrap().as_file().unwrap();
        assert_eq!(file.get_hashes(), (Some("x"), Some("y")));
    }
}
