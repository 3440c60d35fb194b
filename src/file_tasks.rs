//! File sync tasks (§4.6): the five task kinds `TaskBuilder` dispatches onto
//! a `FileNode`. Each is a design-level contract over the `Container` and
//! `EncryptionService` traits; none of them know about the tree lock beyond
//! the single state-update call at the end of a successful run.

use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use log::{debug, info, trace, warn};
use sha2::{Digest, Sha256};

use crate::container::{Container, EncryptionService, Recipient};
use crate::error::{Result, SyncError};
use crate::index_tree::IndexTree;
use crate::node::NodeId;

/// Streaming content hash used throughout the file tasks to decide whether a
/// transfer is actually needed and to verify what came back over the wire.
pub fn content_hash(mut reader: impl Read) -> io::Result<String> {
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex(&hasher.finalize()))
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

fn resolve(container_root: &Path, rel_path: &str) -> PathBuf {
    container_root.join(rel_path)
}

/// Uploads a locally-added or locally-modified file (§4.6): hash, skip if
/// unchanged, otherwise encrypt and upload, then record the new hash pair.
pub struct AddedLocalFilesTask<'a> {
    pub container_root: &'a Path,
    pub tree: &'a IndexTree,
    pub node: NodeId,
    pub rel_path: String,
    pub container: &'a dyn Container,
    pub encryption: &'a dyn EncryptionService,
    pub recipients: &'a [Recipient],
}

impl<'a> AddedLocalFilesTask<'a> {
    pub fn run(&self) -> Result<()> {
        let abs_path = resolve(self.container_root, &self.rel_path);
        trace!("AddedLocalFilesTask {}", abs_path.display());

        let file = match std::fs::File::open(&abs_path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("{} vanished before upload; pruning", self.rel_path);
                self.mark_absent()?;
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        let local_hash = content_hash(&file)?;
        let (stored_local, stored_remote) = {
            let r = self.tree.read();
            let file_node = r
                .node(self.node)
                .and_then(|n| n.as_file())
                .ok_or(SyncError::NodeNotFound)?;
            let (l, rm) = file_node.get_hashes();
            (l.map(str::to_string), rm.map(str::to_string))
        };

        if stored_remote.is_some() && stored_local.as_deref() == Some(local_hash.as_str()) {
            debug!("{} unchanged, skipping upload", self.rel_path);
            return Ok(());
        }

        let reopened: Box<dyn Read + Send> = Box::new(std::fs::File::open(&abs_path)?);
        let encrypted = self.encryption.encrypt(reopened, self.recipients)?;
        let new_remote_hash = self.container.upload(&self.rel_path, encrypted)?;
        info!("uploaded {} -> {}", self.rel_path, new_remote_hash);

        let mut w = self.tree.write();
        if let Some(f) = w.node_mut(self.node).and_then(|n| n.as_file_mut()) {
            f.set_hashes(Some(local_hash), Some(new_remote_hash))?;
        }
        Ok(())
    }

    fn mark_absent(&self) -> Result<()> {
        let mut w = self.tree.write();
        if let Some(f) = w.node_mut(self.node).and_then(|n| n.as_file_mut()) {
            f.set_hashes(None, None)?;
        }
        Ok(())
    }
}

/// Removes a file from the remote container (§4.6). A 404-equivalent from
/// the container is already folded into `Ok(())` by the `Container`
/// implementation, matching "absent at the destination" being success.
pub struct RemovedLocalFilesTask<'a> {
    pub tree: &'a IndexTree,
    pub node: NodeId,
    pub rel_path: String,
    pub container: &'a dyn Container,
}

impl<'a> RemovedLocalFilesTask<'a> {
    pub fn run(&self) -> Result<()> {
        trace!("RemovedLocalFilesTask {}", self.rel_path);
        self.container.remove(&self.rel_path)?;
        let mut w = self.tree.write();
        if let Some(f) = w.node_mut(self.node).and_then(|n| n.as_file_mut()) {
            f.set_hashes(None, None)?;
        }
        Ok(())
    }
}

/// Downloads a remotely-added or remotely-modified file (§4.6): download,
/// verify the server-advertised hash, decrypt, write atomically.
pub struct AddedRemoteFilesTask<'a> {
    pub container_root: &'a Path,
    pub tree: &'a IndexTree,
    pub node: NodeId,
    pub rel_path: String,
    pub container: &'a dyn Container,
    pub encryption: &'a dyn EncryptionService,
    pub decrypt_key: Option<&'a [u8]>,
    pub passphrase: Option<&'a str>,
    pub expected_remote_hash: String,
}

impl<'a> AddedRemoteFilesTask<'a> {
    pub fn run(&self) -> Result<()> {
        let abs_path = resolve(self.container_root, &self.rel_path);
        trace!("AddedRemoteFilesTask {}", abs_path.display());

        let encrypted = self.container.download(&self.rel_path)?;
        let mut buf = Vec::new();
        let mut encrypted = encrypted;
        encrypted.read_to_end(&mut buf)?;
        let got_hash = content_hash(buf.as_slice())?;
        if got_hash != self.expected_remote_hash {
            warn!(
                "remote hash mismatch for {}: expected {} got {}",
                self.rel_path, self.expected_remote_hash, got_hash
            );
            return Err(SyncError::InterruptedDownload);
        }

        let mut decrypted = self
            .encryption
            .decrypt(Box::new(io::Cursor::new(buf)), self.decrypt_key, self.passphrase)?;

        if let Some(parent) = abs_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp_path = abs_path.with_extension("bajoo-download-tmp");
        let local_hash;
        {
            let mut tmp = std::fs::File::create(&tmp_path)?;
            let mut hasher = Sha256::new();
            let mut chunk = [0u8; 64 * 1024];
            loop {
                let n = decrypted.read(&mut chunk)?;
                if n == 0 {
                    break;
                }
                hasher.update(&chunk[..n]);
                tmp.write_all(&chunk[..n])?;
            }
            tmp.sync_all()?;
            local_hash = hex(&hasher.finalize());
        }
        crate::platform::atomic_replace(&tmp_path, &abs_path)?;

        let mut w = self.tree.write();
        if let Some(f) = w.node_mut(self.node).and_then(|n| n.as_file_mut()) {
            f.set_hashes(Some(local_hash), Some(self.expected_remote_hash.clone()))?;
        }
        Ok(())
    }
}

/// Removes a local file that disappeared remotely (§4.6). `ENOENT` is
/// folded into success — the file is already gone, which is the goal.
pub struct RemovedRemoteFilesTask<'a> {
    pub container_root: &'a Path,
    pub tree: &'a IndexTree,
    pub node: NodeId,
    pub rel_path: String,
}

impl<'a> RemovedRemoteFilesTask<'a> {
    pub fn run(&self) -> Result<()> {
        let abs_path = resolve(self.container_root, &self.rel_path);
        trace!("RemovedRemoteFilesTask {}", abs_path.display());
        match std::fs::remove_file(&abs_path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        let mut w = self.tree.write();
        if let Some(f) = w.node_mut(self.node).and_then(|n| n.as_file_mut()) {
            f.set_hashes(None, None)?;
        }
        Ok(())
    }
}

/// Moves a file on the remote by deleting the old path and uploading the
/// new one — the server has no rename primitive (§4.6). Acquires both
/// endpoint nodes; `TaskBuilder` is responsible for that before `run` is
/// called.
pub struct MovedLocalFilesTask<'a> {
    pub container_root: &'a Path,
    pub tree: &'a IndexTree,
    pub source_node: NodeId,
    pub dest_node: NodeId,
    pub source_rel_path: String,
    pub dest_rel_path: String,
    pub container: &'a dyn Container,
    pub encryption: &'a dyn EncryptionService,
    pub recipients: &'a [Recipient],
}

impl<'a> MovedLocalFilesTask<'a> {
    pub fn run(&self) -> Result<()> {
        trace!("MovedLocalFilesTask {} -> {}", self.source_rel_path, self.dest_rel_path);
        self.container.remove(&self.source_rel_path)?;

        let upload = AddedLocalFilesTask {
            container_root: self.container_root,
            tree: self.tree,
            node: self.dest_node,
            rel_path: self.dest_rel_path.clone(),
            container: self.container,
            encryption: self.encryption,
            recipients: self.recipients,
        };
        upload.run()?;

        let mut w = self.tree.write();
        if let Some(f) = w.node_mut(self.source_node).and_then(|n| n.as_file_mut()) {
            f.set_hashes(None, None)?;
        }
        Ok(())
    }
}
