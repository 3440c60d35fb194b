//! `IndexSaver` (§4.8): debounces index persistence so a burst of tree
//! mutations coalesces into one atomic write after activity settles.
//!
//! Grounded on `index/index_saver.py`'s `_short_timer_saving`/`_save`: a
//! `trigger_save` call (re)starts a debounce window; if nothing else
//! triggers before it elapses, the tree is serialised to a temp file in the
//! cache dir and swapped into place with [`crate::platform::atomic_replace`].
//! Repeated triggers restart the window up to `save_max_restarts` times,
//! after which the save goes ahead anyway so a constantly-busy tree still
//! gets flushed periodically.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, error, warn};

use crate::config::SyncConfig;
use crate::index_tree::IndexTree;

struct SaverState {
    last_update: Instant,
    pending: bool,
    timer_restart_count: u32,
    stop: bool,
}

/// Resolves the on-disk path for one container's index file, under the
/// platform cache directory (`directories::ProjectDirs`), named
/// `.bajoo-<container_id>.idx` as in the original.
pub fn index_path_for(cache_dir: &Path, container_id: &str) -> PathBuf {
    cache_dir.join(format!(".bajoo-{}.idx", container_id))
}

/// The platform cache directory this crate persists indexes under, via
/// `directories::ProjectDirs`. Callers that already manage their own cache
/// location can skip this and build a path directly.
pub fn default_cache_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("net", "bajoo", "bajoo")
        .map(|dirs| dirs.cache_dir().to_path_buf())
}

pub struct IndexSaver {
    index_path: PathBuf,
    state: Arc<(Mutex<SaverState>, Condvar)>,
    handle: Option<JoinHandle<()>>,
}

impl IndexSaver {
    /// Spawns the background debounce thread for `tree`, persisting to
    /// `cache_dir/.bajoo-<tree.container_id>.idx`.
    pub fn spawn(tree: Arc<IndexTree>, cache_dir: PathBuf, config: &SyncConfig) -> Self {
        let index_path = index_path_for(&cache_dir, &tree.container_id);
        let state = Arc::new((
            Mutex::new(SaverState {
                last_update: Instant::now(),
                pending: false,
                timer_restart_count: 0,
                stop: false,
            }),
            Condvar::new(),
        ));

        let thread_state = state.clone();
        let thread_index_path = index_path.clone();
        let save_debounce = config.save_debounce;
        let save_max_restarts = config.save_max_restarts;
        let max_save_retries = config.max_save_retries;
        let handle = thread::Builder::new()
            .name(format!("index-saver-{}", tree.container_id))
            .spawn(move || run(tree, cache_dir, thread_index_path, save_debounce, save_max_restarts, max_save_retries, thread_state))
            .expect("failed to spawn index saver thread");

        IndexSaver { index_path, state, handle: Some(handle) }
    }

    pub fn index_path(&self) -> &Path {
        &self.index_path
    }

    /// Marks the tree dirty and (re)starts the debounce window. Safe to call
    /// from any thread, any number of times; only the last one before the
    /// window elapses actually triggers a write.
    pub fn trigger_save(&self) {
        let (lock, cvar) = &*self.state;
        let mut guard = lock.lock().expect("index saver state poisoned");
        guard.last_update = Instant::now();
        guard.pending = true;
        cvar.notify_all();
    }

    /// Stops the background thread, forcing a synchronous save first if one
    /// was still pending (mirrors the original's `stop()`).
    pub fn stop(&mut self) {
        {
            let (lock, cvar) = &*self.state;
            let mut guard = lock.lock().expect("index saver state poisoned");
            guard.stop = true;
            cvar.notify_all();
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for IndexSaver {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.stop();
        }
    }
}

fn run(
    tree: Arc<IndexTree>,
    cache_dir: PathBuf,
    index_path: PathBuf,
    save_debounce: Duration,
    save_max_restarts: u32,
    max_save_retries: u32,
    state: Arc<(Mutex<SaverState>, Condvar)>,
) {
    let (lock, cvar) = &*state;
    loop {
        let mut guard = lock.lock().expect("index saver state poisoned");
        while !guard.pending && !guard.stop {
            guard = cvar.wait(guard).expect("index saver state poisoned");
        }
        if guard.stop && !guard.pending {
            break;
        }

        loop {
            let (g, wait_result) = cvar
                .wait_timeout(guard, save_debounce)
                .expect("index saver state poisoned");
            guard = g;
            if guard.stop {
                break;
            }
            if wait_result.timed_out() {
                break;
            }
            guard.timer_restart_count += 1;
            if guard.timer_restart_count >= save_max_restarts {
                break;
            }
        }

        guard.pending = false;
        guard.timer_restart_count = 0;
        let should_stop = guard.stop;
        drop(guard);

        save_with_retries(&tree, &cache_dir, &index_path, max_save_retries, &state);

        if should_stop {
            break;
        }
    }
}

/// Base delay an exponential back-off attempt starts from; doubled per
/// subsequent attempt (§4.8: "exponential back-off up to a max of 6
/// attempts").
const SAVE_RETRY_BASE_DELAY: Duration = Duration::from_millis(200);

/// Performs one save attempt; on failure, retries in-place with a doubling
/// delay between attempts, up to `max_save_retries` attempts total, before
/// giving up until the next `trigger_save()` (§4.8). The delay is waited out
/// on the saver's own condvar so `stop()` can cut a retry short.
fn save_with_retries(
    tree: &IndexTree,
    cache_dir: &Path,
    index_path: &Path,
    max_save_retries: u32,
    state: &Arc<(Mutex<SaverState>, Condvar)>,
) {
    let mut attempt = 0;
    loop {
        debug!("saving index to {} (attempt {})", index_path.display(), attempt + 1);
        match save_once(tree, cache_dir, index_path) {
            Ok(()) => return,
            Err(e) => {
                error!("unable to save index {}: {}", index_path.display(), e);
                attempt += 1;
                if attempt >= max_save_retries {
                    warn!("stopped retrying saving index {}", index_path.display());
                    return;
                }
                let delay = SAVE_RETRY_BASE_DELAY * 2u32.pow(attempt - 1);
                let (lock, cvar) = &**state;
                let guard = lock.lock().expect("index saver state poisoned");
                let (guard, _) = cvar.wait_timeout(guard, delay).expect("index saver state poisoned");
                if guard.stop {
                    warn!("index saver stopping mid-retry for {}", index_path.display());
                    return;
                }
            }
        }
    }
}

fn save_once(tree: &IndexTree, cache_dir: &Path, index_path: &Path) -> crate::error::Result<()> {
    std::fs::create_dir_all(cache_dir)?;
    let data = tree.read().export_data();
    let mut tmp = tempfile::Builder::new().prefix(".bajoo-idx-").tempfile_in(cache_dir)?;
    serde_json::to_writer(&mut tmp, &data)?;
    use std::io::Write;
    tmp.flush()?;
    let tmp_path = tmp.into_temp_path();
    crate::platform::atomic_replace(&tmp_path, index_path)?;
    crate::platform::hide_file(index_path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeData;
    use std::time::Duration as StdDuration;

    fn tiny_config() -> SyncConfig {
        let mut cfg = SyncConfig::default();
        cfg.save_debounce = StdDuration::from_millis(20);
        cfg.save_max_restarts = 3;
        cfg.max_save_retries = 2;
        cfg
    }

    #[test]
    fn trigger_save_writes_file_after_debounce() {
        let dir = tempfile::tempdir().unwrap();
        let tree = Arc::new(IndexTree::new("c1"));
        {
            let mut w = tree.write();
            w.get_or_create_node_by_path("a.txt", NodeData::new_file);
        }
        let cfg = tiny_config();
        let mut saver = IndexSaver::spawn(tree.clone(), dir.path().to_path_buf(), &cfg);
        saver.trigger_save();
        std::thread::sleep(StdDuration::from_millis(200));
        assert!(saver.index_path().exists());
        saver.stop();
    }

    #[test]
    fn stop_forces_pending_save() {
        let dir = tempfile::tempdir().unwrap();
        let tree = Arc::new(IndexTree::new("c2"));
        let cfg = tiny_config();
        let mut saver = IndexSaver::spawn(tree, dir.path().to_path_buf(), &cfg);
        saver.trigger_save();
        saver.stop();
        assert!(saver.index_path().exists());
    }

    #[test]
    fn index_path_for_matches_naming_convention() {
        let path = index_path_for(Path::new("/tmp/cache"), "abc123");
        assert_eq!(path, PathBuf::from("/tmp/cache/.bajoo-abc123.idx"));
    }
}
