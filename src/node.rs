//! Arena-backed node storage for an [`crate::index_tree::IndexTree`].
//!
//! Nodes reference their parent and children by [`NodeId`], a stable index
//! into the tree's arena, rather than by owning pointer. This sidesteps the
//! cyclic-ownership problem a `Rc<RefCell<..>>` tree runs into: the parent
//! link is just an integer, never a second owner of the child.

use std::collections::BTreeMap;

use crate::hints::Hint;

/// Stable identifier of a node inside one [`crate::index_tree::IndexTree`]'s
/// arena. Never reused while the node it names is still reachable; once a
/// node is pruned its id may be handed out again to a later node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub(crate) u32);

/// Opaque handle stored in [`NodeData::task`]. A non-`None` value means the
/// node is reserved by exactly that task; nothing else may acquire it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskHandle(pub(crate) u64);

impl TaskHandle {
    /// Builds a handle from an embedder-chosen id. Callers typically reuse
    /// the id their own task executor already assigned the job (e.g.
    /// [`crate::executor::TaskId`]), so the handle on the node and the
    /// in-flight job on the executor share one identity.
    pub fn new(id: u64) -> Self {
        TaskHandle(id)
    }
}

/// Which half of a sync pair a piece of state or a hint belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    Local,
    Remote,
}

/// Candidate content identity carried by a `Modified` hint, or read back from
/// a node's last-known state. Folder and file nodes have different shapes of
/// state, so this is a closed sum rather than an associated type: hints must
/// be able to name either kind without the caller knowing which node variant
/// they are attached to ahead of time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeState {
    Folder { exists: bool },
    File {
        local_hash: Option<String>,
        remote_hash: Option<String>,
    },
}

/// The two node variants an [`crate::index_tree::IndexTree`] holds. The
/// server has no notion of a folder, so `FolderNode.remote_state` is always
/// absent; that asymmetry is exactly what this tag carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    Folder(FolderNode),
    File(FileNode),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FolderNode {
    /// `true` when the directory was present on disk at the last sync.
    pub local_state: bool,
}

impl Default for FolderNode {
    fn default() -> Self {
        FolderNode { local_state: true }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileNode {
    pub local_hash: Option<String>,
    pub remote_hash: Option<String>,
}

impl FileNode {
    pub fn get_hashes(&self) -> (Option<&str>, Option<&str>) {
        (self.local_hash.as_deref(), self.remote_hash.as_deref())
    }

    /// Both hashes must be set, or both cleared. Mixed values are a logic
    /// error in the caller (§4.2): a file can't be half-synced.
    pub fn set_hashes(
        &mut self,
        local_hash: Option<String>,
        remote_hash: Option<String>,
    ) -> Result<(), crate::error::SyncError> {
        match (&local_hash, &remote_hash) {
            (Some(_), Some(_)) | (None, None) => {
                self.local_hash = local_hash;
                self.remote_hash = remote_hash;
                Ok(())
            }
            _ => Err(crate::error::SyncError::InvalidState(
                "file node must have both hashes set or both cleared".into(),
            )),
        }
    }
}

/// One member of the tree: a name, a parent link, a child map, the sync
/// bookkeeping flags, and whichever hints are currently pending.
#[derive(Debug, Clone)]
pub struct NodeData {
    pub name: String,
    pub parent: Option<NodeId>,
    pub children: BTreeMap<String, NodeId>,
    sync: bool,
    dirty: bool,
    pub task: Option<TaskHandle>,
    pub local_hint: Option<Hint>,
    pub remote_hint: Option<Hint>,
    pub kind: NodeKind,
    /// Consecutive permanent-failure count for quarantine bookkeeping
    /// (§4.6, §7); not part of the distilled spec's Node fields but needed
    /// to implement the quarantine policy those sections describe.
    pub failure_count: u32,
    pub quarantined_until: Option<std::time::Instant>,
}

impl NodeData {
    pub fn new_folder(name: impl Into<String>) -> Self {
        NodeData {
            name: name.into(),
            parent: None,
            children: BTreeMap::new(),
            sync: false,
            dirty: true,
            task: None,
            local_hint: None,
            remote_hint: None,
            kind: NodeKind::Folder(FolderNode::default()),
            failure_count: 0,
            quarantined_until: None,
        }
    }

    pub fn new_file(name: impl Into<String>) -> Self {
        NodeData {
            name: name.into(),
            parent: None,
            children: BTreeMap::new(),
            sync: false,
            dirty: true,
            task: None,
            local_hint: None,
            remote_hint: None,
            kind: NodeKind::File(FileNode::default()),
            failure_count: 0,
            quarantined_until: None,
        }
    }

    pub fn is_folder(&self) -> bool {
        matches!(self.kind, NodeKind::Folder(_))
    }

    pub fn as_folder(&self) -> Option<&FolderNode> {
        match &self.kind {
            NodeKind::Folder(f) => Some(f),
            NodeKind::File(_) => None,
        }
    }

    pub fn as_folder_mut(&mut self) -> Option<&mut FolderNode> {
        match &mut self.kind {
            NodeKind::Folder(f) => Some(f),
            NodeKind::File(_) => None,
        }
    }

    pub fn as_file(&self) -> Option<&FileNode> {
        match &self.kind {
            NodeKind::File(f) => Some(f),
            NodeKind::Folder(_) => None,
        }
    }

    pub fn as_file_mut(&mut self) -> Option<&mut FileNode> {
        match &mut self.kind {
            NodeKind::File(f) => Some(f),
            NodeKind::Folder(_) => None,
        }
    }

    /// True iff the node was present, at the target side, the last time it
    /// was synced. Ignores pending hints on purpose (§3 Lifecycles).
    pub fn exists(&self) -> bool {
        match &self.kind {
            NodeKind::Folder(f) => f.local_state,
            NodeKind::File(f) => f.local_hash.is_some() || f.remote_hash.is_some(),
        }
    }

    pub fn sync(&self) -> bool {
        self.sync
    }

    pub fn dirty(&self) -> bool {
        self.dirty
    }

    pub(crate) fn set_dirty_raw(&mut self, dirty: bool) {
        self.dirty = dirty;
    }

    pub(crate) fn set_sync_raw(&mut self, sync: bool) {
        self.sync = sync;
    }

    pub fn hint(&self, scope: Scope) -> Option<&Hint> {
        match scope {
            Scope::Local => self.local_hint.as_ref(),
            Scope::Remote => self.remote_hint.as_ref(),
        }
    }

    pub fn set_hint(&mut self, scope: Scope, hint: Option<Hint>) {
        match scope {
            Scope::Local => self.local_hint = hint,
            Scope::Remote => self.remote_hint = hint,
        }
    }

    pub fn state(&self) -> NodeState {
        match &self.kind {
            NodeKind::Folder(f) => NodeState::Folder { exists: f.local_state },
            NodeKind::File(f) => NodeState::File {
                local_hash: f.local_hash.clone(),
                remote_hash: f.remote_hash.clone(),
            },
        }
    }
}

/// Slot storage backing an [`crate::index_tree::IndexTree`]. Freed slots are
/// tracked on a free list so ids can be recycled instead of letting the
/// arena grow unboundedly across a long-running sync.
#[derive(Debug, Default)]
pub struct Arena {
    slots: Vec<Option<NodeData>>,
    free: Vec<u32>,
}

impl Arena {
    pub fn new() -> Self {
        Arena::default()
    }

    pub fn insert(&mut self, data: NodeData) -> NodeId {
        if let Some(idx) = self.free.pop() {
            self.slots[idx as usize] = Some(data);
            NodeId(idx)
        } else {
            let idx = self.slots.len() as u32;
            self.slots.push(Some(data));
            NodeId(idx)
        }
    }

    pub fn remove(&mut self, id: NodeId) -> Option<NodeData> {
        let slot = self.slots.get_mut(id.0 as usize)?;
        let removed = slot.take();
        if removed.is_some() {
            self.free.push(id.0);
        }
        removed
    }

    pub fn get(&self, id: NodeId) -> Option<&NodeData> {
        self.slots.get(id.0 as usize).and_then(|s| s.as_ref())
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut NodeData> {
        self.slots.get_mut(id.0 as usize).and_then(|s| s.as_mut())
    }

    /// Split-borrow two distinct nodes mutably at once, needed when a move
    /// hint touches both endpoints in the same operation.
    pub fn get_pair_mut(&mut self, a: NodeId, b: NodeId) -> Option<(&mut NodeData, &mut NodeData)> {
        if a == b {
            return None;
        }
        let (lo, hi) = if a.0 < b.0 { (a.0, b.0) } else { (b.0, a.0) };
        let (left, right) = self.slots.split_at_mut(hi as usize);
        let lo_slot = left.get_mut(lo as usize)?.as_mut()?;
        let hi_slot = right.first_mut()?.as_mut()?;
        if a.0 < b.0 {
            Some((lo_slot, hi_slot))
        } else {
            Some((hi_slot, lo_slot))
        }
    }
}
