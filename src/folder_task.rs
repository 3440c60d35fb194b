//! `FolderTask`: the archetypal sync task (§4.5). Reconciles one directory
//! listing with its `FolderNode`, seeding hints on newly-discovered children
//! but never touching descendants' content directly — that's left to the
//! next sync pass.

use std::io;
use std::path::{Path, PathBuf};

use log::{debug, trace, warn};

use crate::error::Result;
use crate::hint_builder::{HintBuilder, NewNodeKind};
use crate::hints::Hint;
use crate::index_tree::IndexTree;
use crate::node::{NodeId, Scope};

/// Result of listing a directory (§4.5 step 4): file names, then folder
/// names, present at the time of the scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirListing {
    pub files: Vec<String>,
    pub folders: Vec<String>,
}

pub struct FolderTask<'a> {
    pub container_root: &'a Path,
    pub tree: &'a IndexTree,
    pub node: NodeId,
    pub exclude_hidden_files: bool,
}

impl<'a> FolderTask<'a> {
    /// Runs the full task: list the directory (or remove it if empty and
    /// absent), then reconcile the listing with the tree under the tree
    /// lock, then release the node.
    pub fn run(&self) -> Result<DirListing> {
        let (rel_path, node_exists, local_hint) = {
            let r = self.tree.read();
            let node = r.node(self.node).ok_or(crate::error::SyncError::NodeNotFound)?;
            (full_path(&r, self.node), node.exists(), node.hint(Scope::Local).cloned())
        };
        trace!("FolderTask run path={}", rel_path);

        let listing = match Self::execute(self.container_root, &rel_path, node_exists, local_hint.as_ref()) {
            Ok(listing) => listing,
            Err(e) => {
                warn!("FolderTask execute failed for {}: {}", rel_path, e);
                self.tree.write().release_after_failure(self.node)?;
                return Err(e);
            }
        };

        let mut w = self.tree.write();
        Self::diff_node_and_apply_result(&mut w, self.node, &listing, self.exclude_hidden_files);
        w.release(self.node)?;
        Ok(listing)
    }

    /// §4.5 steps 1-2: resolve the absolute path; if the node is marked
    /// absent and wasn't just (re)created, try to remove the now-empty
    /// directory rather than list it.
    pub fn execute(
        container_root: &Path,
        rel_path: &str,
        node_exists: bool,
        local_hint: Option<&Hint>,
    ) -> Result<DirListing> {
        let dir_path = resolve(container_root, rel_path);
        debug!("FolderTask execute dir={}", dir_path.display());

        let just_created = matches!(local_hint, Some(Hint::Modified(_)));
        if !node_exists && !just_created {
            match std::fs::remove_dir(&dir_path) {
                Ok(()) => {
                    trace!("removed empty folder {}", dir_path.display());
                    return Ok(DirListing::default());
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    trace!("folder {} already gone", dir_path.display());
                    return Ok(DirListing::default());
                }
                Err(e) if is_not_empty(&e) => {
                    // a file appeared between the hint firing and now; fall
                    // through to listing.
                }
                Err(e) => return Err(e.into()),
            }
        }
        Self::list_dir(container_root, rel_path)
    }

    /// §4.5 step 3: iterate directory entries, filter, classify by stat.
    pub fn list_dir(container_root: &Path, rel_path: &str) -> Result<DirListing> {
        let dir_path = resolve(container_root, rel_path);
        let entries = match std::fs::read_dir(&dir_path) {
            Ok(e) => e,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(DirListing::default()),
            Err(e) => return Err(e.into()),
        };

        let mut listing = DirListing::default();
        for entry in entries {
            let entry = match entry {
                Ok(e) => e,
                Err(_) => continue,
            };
            let name = entry.file_name().to_string_lossy().into_owned();

            if !crate::paths::is_name_allowed(&name) {
                continue;
            }

            let file_type = match entry.file_type() {
                Ok(ft) => ft,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => {
                    warn!("file \"{}\" unreadable by stat: {}", name, e);
                    continue;
                }
            };

            if file_type.is_dir() {
                listing.folders.push(name);
            } else if file_type.is_file() {
                listing.files.push(name);
            } else {
                trace!("non-regular entry {} ignored", name);
            }
        }
        Ok(listing)
    }

    /// §4.5 `diff_node_and_apply_result`: under the tree lock, reconcile the
    /// node's children with the fresh listing. Deleted children get a local
    /// `Deleted` hint; newly discovered names get a fresh child node with a
    /// local `Modified` hint. Must be called with the tree write-locked.
    pub fn diff_node_and_apply_result(
        w: &mut crate::index_tree::TreeWriteGuard<'_>,
        node: NodeId,
        listing: &DirListing,
        exclude_hidden_files: bool,
    ) {
        let rel_path = full_path(w, node);

        let existing_children: Vec<(String, NodeId)> = w
            .node(node)
            .map(|n| n.children.iter().map(|(k, v)| (k.clone(), *v)).collect())
            .unwrap_or_default();

        let mut seen_files: std::collections::HashSet<&str> = listing.files.iter().map(|s| s.as_str()).collect();
        let mut seen_folders: std::collections::HashSet<&str> =
            listing.folders.iter().map(|s| s.as_str()).collect();

        for (name, child_id) in &existing_children {
            if seen_files.remove(name.as_str()) || seen_folders.remove(name.as_str()) {
                continue;
            }
            apply_deleted_child(w, *child_id);
        }

        for name in &listing.files {
            if existing_children.iter().any(|(n, _)| n == name) {
                continue;
            }
            let child_rel = join(&rel_path, name);
            if !crate::paths::is_path_allowed(&child_rel, exclude_hidden_files) {
                continue;
            }
            let child = w.add_child(node, name, crate::node::NodeData::new_file(name));
            w.set_hint(child, Scope::Local, Some(Hint::Modified(None)));
        }
        for name in &listing.folders {
            if existing_children.iter().any(|(n, _)| n == name) {
                continue;
            }
            let child_rel = join(&rel_path, name);
            if !crate::paths::is_path_allowed(&child_rel, exclude_hidden_files) {
                continue;
            }
            let child = w.add_child(node, name, crate::node::NodeData::new_folder(name));
            w.set_hint(child, Scope::Local, Some(Hint::Modified(None)));
        }
    }
}

fn apply_deleted_child(w: &mut crate::index_tree::TreeWriteGuard<'_>, child_id: NodeId) {
    let existing = w.node(child_id).and_then(|n| n.hint(Scope::Local)).cloned();
    match existing {
        Some(Hint::Deleted) => {}
        _ => w.set_hint(child_id, Scope::Local, Some(Hint::Deleted)),
    }
}

fn is_not_empty(e: &io::Error) -> bool {
    // `ErrorKind::DirectoryNotEmpty` is unstable pre-1.0 on some targets;
    // fall back to the raw OS error code for ENOTEMPTY (39 on Unix).
    e.raw_os_error() == Some(39) || e.to_string().to_lowercase().contains("not empty")
}

fn resolve(container_root: &Path, rel_path: &str) -> PathBuf {
    if rel_path == "." {
        container_root.to_path_buf()
    } else {
        container_root.join(rel_path)
    }
}

fn join(parent: &str, name: &str) -> String {
    if parent == "." {
        name.to_string()
    } else {
        format!("{}/{}", parent, name)
    }
}

/// Walks parent links to rebuild the node's path, relative to the root
/// (`"."` for the root itself).
fn full_path(r: &impl NodeLookup, mut id: NodeId) -> String {
    let mut parts = Vec::new();
    loop {
        let Some(node) = r.lookup(id) else { break };
        let Some(parent) = node.parent else { break };
        parts.push(node.name.clone());
        id = parent;
    }
    if parts.is_empty() {
        ".".to_string()
    } else {
        parts.reverse();
        parts.join("/")
    }
}

trait NodeLookup {
    fn lookup(&self, id: NodeId) -> Option<&crate::node::NodeData>;
}

impl<'t> NodeLookup for crate::index_tree::TreeReadGuard<'t> {
    fn lookup(&self, id: NodeId) -> Option<&crate::node::NodeData> {
        self.node(id)
    }
}

impl<'t> NodeLookup for crate::index_tree::TreeWriteGuard<'t> {
    fn lookup(&self, id: NodeId) -> Option<&crate::node::NodeData> {
        self.node(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeData;

    #[test]
    fn s1_empty_folder_removal() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("node")).unwrap();

        let tree = IndexTree::new("c1");
        {
            let mut w = tree.write();
            w.add_child(w.root(), "node", NodeData::new_folder("node"));
        }
        let node = tree.read().get_node_by_path("node").unwrap();

        let listing = FolderTask::execute(dir.path(), "node", false, None).unwrap();
        assert_eq!(listing, DirListing::default());
        assert!(!dir.path().join("node").exists());
        let _ = node;
    }

    #[test]
    fn s2_new_file_discovered() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("target_dir")).unwrap();
        std::fs::write(dir.path().join("target_dir").join("file"), b"hi").unwrap();

        let tree = IndexTree::new("c1");
        let node = {
            let mut w = tree.write();
            w.add_child(w.root(), "target_dir", NodeData::new_folder("target_dir"))
        };
        {
            let mut w = tree.write();
            w.set_sync(node, true);
        }

        let listing = FolderTask::execute(dir.path(), "target_dir", true, None).unwrap();
        assert_eq!(listing.files, vec!["file".to_string()]);
        assert!(listing.folders.is_empty());

        let mut w = tree.write();
        FolderTask::diff_node_and_apply_result(&mut w, node, &listing, true);
        let child = w.get_node_by_path("target_dir/file").unwrap();
        assert_eq!(w.node(child).unwrap().hint(Scope::Local), Some(&Hint::Modified(None)));
    }

    #[test]
    fn vanished_child_gets_deleted_hint() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("d")).unwrap();

        let tree = IndexTree::new("c1");
        let node = {
            let mut w = tree.write();
            w.add_child(w.root(), "d", NodeData::new_folder("d"))
        };
        let child = {
            let mut w = tree.write();
            let c = w.add_child(node, "gone.txt", NodeData::new_file("gone.txt"));
            w.set_sync(c, true);
            c
        };

        let listing = DirListing::default();
        let mut w = tree.write();
        FolderTask::diff_node_and_apply_result(&mut w, node, &listing, true);
        assert_eq!(w.node(child).unwrap().hint(Scope::Local), Some(&Hint::Deleted));
    }
}
