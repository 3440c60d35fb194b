//! External interfaces the sync core consumes (§1, §6): the remote
//! `Container`, the `EncryptionService`, and the event shapes produced by the
//! filesystem watcher and the remote change feed. These are trait objects
//! the embedder implements against its real HTTP client, GPG process, and OS
//! watcher — none of which are this crate's concern.

use std::io::Read;

use crate::error::Result;

/// A readable byte stream returned by [`Container::download`] or produced by
/// [`EncryptionService::encrypt`]/[`decrypt`](EncryptionService::decrypt).
pub type ByteStream = Box<dyn Read + Send>;

/// A remote encrypted container: `upload`/`download`/`remove`/`list_files`
/// (§1). Implementations talk to the actual cloud storage HTTP API; this
/// crate only ever calls through the trait.
pub trait Container: Send + Sync {
    /// Uploads `stream` to `path`, returning the server's new content hash.
    fn upload(&self, path: &str, stream: Box<dyn Read + Send>) -> Result<String>;

    /// Opens a stream of `path`'s current content.
    fn download(&self, path: &str) -> Result<ByteStream>;

    /// Removes `path`. Per §4.6, a 404-equivalent response is success, which
    /// implementations should fold into `Ok(())` rather than an error.
    fn remove(&self, path: &str) -> Result<()>;

    /// Full remote listing: `(path, remote_hash)` pairs.
    fn list_files(&self) -> Result<Vec<(String, String)>>;
}

/// Recipient identity used to encrypt a file for a container's members.
pub type Recipient = String;

/// The encryption process's contract (§1, §4.9, §9): encrypt for a set of
/// recipients, decrypt with either a key or an interactive passphrase.
/// Implementations cross a process boundary to the GPG subprocess; see
/// [`crate::encryption`] for the channel shape that carries the request
/// there and the response back.
pub trait EncryptionService: Send + Sync {
    fn encrypt(&self, stream: Box<dyn Read + Send>, recipients: &[Recipient]) -> Result<ByteStream>;

    fn decrypt(
        &self,
        stream: Box<dyn Read + Send>,
        key: Option<&[u8]>,
        passphrase: Option<&str>,
    ) -> Result<ByteStream>;
}

/// Candidate state attached to a filesystem-watcher `modified` event, when
/// the watcher already knows it cheaply (e.g. a hash computed at watch
/// time). `None` means "recheck on execution" (§3 Hint grammar).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchedState {
    pub local_hash: Option<String>,
}

/// One filesystem-watcher notification (§1, §6). Paths are already
/// normalised to forward-slash form and made relative to the container root
/// before being fed to [`crate::hint_builder::HintBuilder`]; directory
/// events are not represented here because folders are re-derived by
/// [`crate::folder_task::FolderTask`] rather than watched directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FsEvent {
    Created { path: String },
    Modified { path: String },
    Deleted { path: String },
    Moved { src: String, dst: String },
}

/// One remote change-feed notification (§6). Moves are not expressed
/// natively by the feed; reconstructing a `delete(src)+add(dst)` pair with a
/// matching hash as a move is an optional optimisation handled by the feed
/// adapter, not by this type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteEvent {
    Added { path: String, remote_hash: String },
    Modified { path: String, remote_hash: String },
    Deleted { path: String },
}
