//! `SyncScheduler` (§4.7): fair round-robin over `IndexTree`s, handing the
//! coordinator the next node ready to be worked.

use std::sync::Arc;

use log::trace;

use crate::index_tree::{BrowseItem, BrowseIter, IndexTree};
use crate::node::NodeId;

struct TreeCursor {
    tree: Arc<IndexTree>,
    iter: Option<BrowseIter<'static>>,
}

/// Holds one active generator per tree, exactly like the original's
/// `self._generators` list (§4.7): a tree keeps its iterator across calls so
/// a partially-drained dirty subtree doesn't restart its walk from the root
/// on every `get_node()`. Each cursor's iterator owns an `Arc` clone of its
/// tree (see `IndexTree::browse_all_non_sync_nodes_owned`), so it can live in
/// `self.trees` across calls without borrowing from a temporary.
pub struct SyncScheduler {
    trees: Vec<TreeCursor>,
    next_tree: usize,
}

impl SyncScheduler {
    pub fn new() -> Self {
        SyncScheduler { trees: Vec::new(), next_tree: 0 }
    }

    pub fn add_index_tree(&mut self, tree: Arc<IndexTree>) {
        self.trees.push(TreeCursor { tree, iter: None });
    }

    /// Removes a tree from the rotation, closing its active iterator and
    /// rewinding `next_tree` if it's now out of bounds (§4.7).
    pub fn remove_index_tree(&mut self, tree: &Arc<IndexTree>) {
        if let Some(pos) = self.trees.iter().position(|c| Arc::ptr_eq(&c.tree, tree)) {
            self.trees.remove(pos);
            if self.next_tree >= self.trees.len() {
                self.next_tree = 0;
            }
        }
    }

    pub fn tree_count(&self) -> usize {
        self.trees.len()
    }

    /// Returns the next `(tree, node)` pair with no assigned task, or
    /// `None` if every tree is clean or every dirty node is currently busy
    /// (§4.7). Never blocks.
    ///
    /// Polls exactly one tree's stored cursor per call, then advances
    /// `next_tree`: no single tree is visited twice before every other tree
    /// in the rotation has been visited once (§4.7 fairness), regardless of
    /// how much dirty work that tree keeps producing.
    pub fn get_node(&mut self) -> Option<(Arc<IndexTree>, NodeId)> {
        if self.trees.is_empty() {
            return None;
        }

        let start = self.next_tree;
        loop {
            let idx = self.next_tree;
            self.next_tree = (self.next_tree + 1) % self.trees.len();

            if self.trees[idx].iter.is_none() {
                let tree = self.trees[idx].tree.clone();
                let iter: BrowseIter<'static> = tree.browse_all_non_sync_nodes_owned();
                self.trees[idx].iter = Some(iter);
            }

            let item = self.trees[idx].iter.as_mut().unwrap().next();
            match item {
                Some(BrowseItem::Node(id)) => {
                    let tree = self.trees[idx].tree.clone();
                    trace!("scheduler dispatching node from tree {}", tree.container_id);
                    return Some((tree, id));
                }
                Some(BrowseItem::WaitForTask) => {}
                None => self.trees[idx].iter = None,
            }

            if self.next_tree == start {
                return None;
            }
        }
    }
}

impl Default for SyncScheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{NodeData, TaskHandle};

    #[test]
    fn s6_all_nodes_busy_returns_none_without_blocking() {
        let t1 = Arc::new(IndexTree::new("c1"));
        let t2 = Arc::new(IndexTree::new("c2"));
        for t in [&t1, &t2] {
            let mut w = t.write();
            let leaf = w.get_or_create_node_by_path("file.txt", NodeData::new_file);
            w.acquire(leaf, TaskHandle(1)).unwrap();
        }
        let mut sched = SyncScheduler::new();
        sched.add_index_tree(t1);
        sched.add_index_tree(t2);
        assert!(sched.get_node().is_none());
    }

    #[test]
    fn fair_across_two_dirty_trees() {
        let t1 = Arc::new(IndexTree::new("c1"));
        let t2 = Arc::new(IndexTree::new("c2"));
        {
            let mut w = t1.write();
            w.get_or_create_node_by_path("a.txt", NodeData::new_file);
        }
        {
            let mut w = t2.write();
            w.get_or_create_node_by_path("b.txt", NodeData::new_file);
        }
        let mut sched = SyncScheduler::new();
        sched.add_index_tree(t1.clone());
        sched.add_index_tree(t2.clone());

        let (first_tree, first_node) = sched.get_node().unwrap();
        first_tree.write().acquire(first_node, TaskHandle(1)).unwrap();
        let (second_tree, _second_node) = sched.get_node().unwrap();
        assert!(!Arc::ptr_eq(&first_tree, &second_tree));
    }

    #[test]
    fn remove_tree_closes_its_iterator() {
        let t1 = Arc::new(IndexTree::new("c1"));
        let mut sched = SyncScheduler::new();
        sched.add_index_tree(t1.clone());
        let _ = sched.get_node();
        sched.remove_index_tree(&t1);
        assert_eq!(sched.tree_count(), 0);
    }
}
