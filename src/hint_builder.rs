//! Event-to-hint merging (§4.3): turns raw local/remote change notifications
//! into the hint(s) stored on tree nodes, keeping the merge table's
//! invariants (move pairing, create/delete cancellation, chain collapsing)
//! under a single tree-lock critical section per event.

use log::trace;

use crate::hints::Hint;
use crate::index_tree::IndexTree;
use crate::index_tree::TreeWriteGuard;
use crate::node::{NodeData, NodeId, NodeState, Scope};

/// Which kind of leaf to create when an event names a path the tree has
/// never seen before. The distilled event stream (`modified(path, state?)`)
/// doesn't always carry enough information to infer this on its own, so
/// callers (the filesystem watcher adapter, the remote feed adapter,
/// `FolderTask`) state it explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NewNodeKind {
    File,
    Folder,
}

pub struct HintBuilder;

impl HintBuilder {
    pub fn modified(
        tree: &IndexTree,
        scope: Scope,
        path: &str,
        kind: NewNodeKind,
        new_state: Option<NodeState>,
    ) {
        let mut w = tree.write();
        let node_id = w.get_or_create_node_by_path(path, |name| match kind {
            NewNodeKind::File => NodeData::new_file(name),
            NewNodeKind::Folder => NodeData::new_folder(name),
        });
        trace!("hint modified scope={:?} path={} node={:?}", scope, path, node_id);
        apply_modified(&mut w, node_id, scope, new_state);
    }

    pub fn deleted(tree: &IndexTree, scope: Scope, path: &str) {
        let mut w = tree.write();
        let Some(node_id) = w.get_node_by_path(path) else {
            // deleting something the tree never heard of is a no-op (§4.3).
            return;
        };
        trace!("hint deleted scope={:?} path={} node={:?}", scope, path, node_id);
        apply_deleted(&mut w, node_id, scope);
    }

    pub fn moved(tree: &IndexTree, scope: Scope, src_path: &str, dst_path: &str, kind: NewNodeKind) {
        let mut w = tree.write();
        let Some(src_id) = w.get_node_by_path(src_path) else {
            // nothing known at the source: treat as a plain creation at dst.
            let dst_id = w.get_or_create_node_by_path(dst_path, |name| match kind {
                NewNodeKind::File => NodeData::new_file(name),
                NewNodeKind::Folder => NodeData::new_folder(name),
            });
            apply_modified(&mut w, dst_id, scope, None);
            return;
        };
        let dst_id = w.get_or_create_node_by_path(dst_path, |name| match kind {
            NewNodeKind::File => NodeData::new_file(name),
            NewNodeKind::Folder => NodeData::new_folder(name),
        });
        trace!(
            "hint move scope={:?} src={} ({:?}) dst={} ({:?})",
            scope,
            src_path,
            src_id,
            dst_path,
            dst_id
        );
        apply_move(&mut w, src_id, dst_id, scope);
    }

    /// Converts a move-pair hint on `node_id` into (`Deleted`, `Modified`)
    /// on the two endpoints. `scope = None` breaks both scopes. TaskBuilder
    /// calls this before handing a non-move task a node that is currently
    /// one end of a move (§4.3, S5).
    pub fn break_coupled_hints(tree: &IndexTree, node_id: NodeId, scope: Option<Scope>) {
        let mut w = tree.write();
        let scopes: &[Scope] = match scope {
            Some(s) => std::slice::from_ref(leak_scope(s)),
            None => &[Scope::Local, Scope::Remote],
        };
        for &s in scopes {
            let hint = w.node(node_id).and_then(|n| n.hint(s)).cloned();
            match hint {
                Some(Hint::SourceMove(dest)) => {
                    let state = w.node(node_id).map(|n| n.state());
                    w.set_hint(node_id, s, Some(Hint::Deleted));
                    w.set_hint(dest, s, Some(Hint::Modified(state)));
                }
                Some(Hint::DestMove(source)) => {
                    let state = w.node(source).map(|n| n.state());
                    w.set_hint(source, s, Some(Hint::Deleted));
                    w.set_hint(node_id, s, Some(Hint::Modified(state)));
                }
                _ => {}
            }
        }
    }
}

fn leak_scope(s: Scope) -> &'static Scope {
    match s {
        Scope::Local => &Scope::Local,
        Scope::Remote => &Scope::Remote,
    }
}

fn apply_modified(w: &mut TreeWriteGuard, node_id: NodeId, scope: Scope, new_state: Option<NodeState>) {
    let existing = w.node(node_id).and_then(|n| n.hint(scope)).cloned();
    match existing {
        None | Some(Hint::Modified(_)) | Some(Hint::Deleted) => {
            w.set_hint(node_id, scope, Some(Hint::Modified(new_state)));
        }
        Some(Hint::SourceMove(dest)) => {
            let old_state = w.node(node_id).map(|n| n.state());
            w.set_hint(dest, scope, Some(Hint::Modified(old_state)));
            w.set_hint(node_id, scope, Some(Hint::Modified(new_state)));
        }
        Some(Hint::DestMove(source)) => {
            w.set_hint(source, scope, Some(Hint::Deleted));
            w.set_hint(node_id, scope, Some(Hint::Modified(new_state)));
        }
    }
}

fn apply_deleted(w: &mut TreeWriteGuard, node_id: NodeId, scope: Scope) {
    let existing = w.node(node_id).and_then(|n| n.hint(scope)).cloned();
    match existing {
        None | Some(Hint::Modified(_)) => {
            let prunable = w
                .node(node_id)
                .map(|n| !n.exists() && n.children.is_empty())
                .unwrap_or(false);
            if prunable {
                w.detach(node_id);
            } else {
                w.set_hint(node_id, scope, Some(Hint::Deleted));
            }
        }
        Some(Hint::Deleted) => {}
        Some(Hint::SourceMove(_)) => {
            // unusual per §4.3: keep the move hint, source is already absent.
        }
        Some(Hint::DestMove(source)) => {
            w.set_hint(source, scope, Some(Hint::Deleted));
            w.detach(node_id);
        }
    }
}

fn apply_move(w: &mut TreeWriteGuard, src_id: NodeId, dst_id: NodeId, scope: Scope) {
    let existing = w.node(src_id).and_then(|n| n.hint(scope)).cloned();
    match existing {
        None => pair(w, src_id, dst_id, scope),
        Some(Hint::Modified(prev)) => {
            w.set_hint(src_id, scope, Some(Hint::Deleted));
            w.set_hint(dst_id, scope, Some(Hint::Modified(prev)));
        }
        Some(Hint::Deleted) => {
            w.set_hint(dst_id, scope, Some(Hint::Modified(None)));
        }
        Some(Hint::SourceMove(old_dest)) => {
            // this node already named another destination; that pairing is
            // superseded. Per §4.3 this is a fork, not a chain: the old
            // destination becomes freshly modified, the source is dropped
            // (Deleted) rather than re-paired, and the new destination wins
            // as a fresh modification of its own.
            w.set_hint(old_dest, scope, Some(Hint::Modified(None)));
            w.set_hint(src_id, scope, Some(Hint::Deleted));
            w.set_hint(dst_id, scope, Some(Hint::Modified(None)));
        }
        Some(Hint::DestMove(old_source)) => {
            if old_source == dst_id {
                // A -> B then B -> A: the round trip cancels (§4.3).
                w.set_hint(old_source, scope, None);
                w.detach(src_id);
            } else {
                // A -> B -> C collapses to A -> C; B (src_id) was a relay.
                w.set_hint(old_source, scope, Some(Hint::SourceMove(dst_id)));
                w.set_hint(dst_id, scope, Some(Hint::DestMove(old_source)));
                w.set_hint(src_id, scope, None);
                let prunable = w
                    .node(src_id)
                    .map(|n| !n.exists() && n.children.is_empty() && n.hint(scope.other()).is_none())
                    .unwrap_or(false);
                if prunable {
                    w.detach(src_id);
                }
            }
        }
    }
}

fn pair(w: &mut TreeWriteGuard, src_id: NodeId, dst_id: NodeId, scope: Scope) {
    w.set_hint(src_id, scope, Some(Hint::SourceMove(dst_id)));
    w.set_hint(dst_id, scope, Some(Hint::DestMove(src_id)));
}

impl Scope {
    fn other(self) -> Scope {
        match self {
            Scope::Local => Scope::Remote,
            Scope::Remote => Scope::Local,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modified_sets_hint_on_fresh_node() {
        let tree = IndexTree::new("c1");
        HintBuilder::modified(&tree, Scope::Local, "a.txt", NewNodeKind::File, None);
        let r = tree.read();
        let id = r.get_node_by_path("a.txt").unwrap();
        assert_eq!(r.node(id).unwrap().hint(Scope::Local), Some(&Hint::Modified(None)));
    }

    #[test]
    fn move_then_reverse_move_cancels() {
        let tree = IndexTree::new("c1");
        HintBuilder::modified(&tree, Scope::Local, "a.txt", NewNodeKind::File, None);
        {
            let mut w = tree.write();
            let a = w.get_node_by_path("a.txt").unwrap();
            w.set_hint(a, Scope::Local, None);
        }
        HintBuilder::moved(&tree, Scope::Local, "a.txt", "b.txt", NewNodeKind::File);
        HintBuilder::moved(&tree, Scope::Local, "b.txt", "a.txt", NewNodeKind::File);
        let r = tree.read();
        let a = r.get_node_by_path("a.txt").unwrap();
        assert_eq!(r.node(a).unwrap().hint(Scope::Local), None);
        assert_eq!(r.get_node_by_path("b.txt"), None);
    }

    #[test]
    fn chained_move_collapses() {
        let tree = IndexTree::new("c1");
        HintBuilder::modified(&tree, Scope::Local, "a.txt", NewNodeKind::File, None);
        {
            let mut w = tree.write();
            let a = w.get_node_by_path("a.txt").unwrap();
            w.set_hint(a, Scope::Local, None);
        }
        HintBuilder::moved(&tree, Scope::Local, "a.txt", "b.txt", NewNodeKind::File);
        HintBuilder::moved(&tree, Scope::Local, "b.txt", "c.txt", NewNodeKind::File);
        let r = tree.read();
        let a = r.get_node_by_path("a.txt").unwrap();
        let c = r.get_node_by_path("c.txt").unwrap();
        assert_eq!(r.node(a).unwrap().hint(Scope::Local), Some(&Hint::SourceMove(c)));
        assert_eq!(r.node(c).unwrap().hint(Scope::Local), Some(&Hint::DestMove(a)));
    }

    #[test]
    fn break_coupled_hints_matches_scenario_s5() {
        let tree = IndexTree::new("c1");
        HintBuilder::modified(&tree, Scope::Local, "x.txt", NewNodeKind::File, None);
        {
            let mut w = tree.write();
            let x = w.get_node_by_path("x.txt").unwrap();
            w.set_hint(x, Scope::Local, None);
        }
        HintBuilder::moved(&tree, Scope::Local, "x.txt", "y.txt", NewNodeKind::File);
        let (x, y) = {
            let r = tree.read();
            (
                r.get_node_by_path("x.txt").unwrap(),
                r.get_node_by_path("y.txt").unwrap(),
            )
        };
        HintBuilder::break_coupled_hints(&tree, x, Some(Scope::Local));
        let r = tree.read();
        assert_eq!(r.node(x).unwrap().hint(Scope::Local), Some(&Hint::Deleted));
        assert!(matches!(r.node(y).unwrap().hint(Scope::Local), Some(Hint::Modified(_))));
    }
}
