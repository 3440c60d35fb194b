//! Parent side of the encryption process boundary (§4.9, §9): the
//! `TaskExecutor` analogue, but talking to a spawned child process instead
//! of native threads.
//!
//! Grounded on `original_source/bajoo/encryption/task_executor.py`'s
//! `TaskExecutor`: a task lane (here, the child's stdin) carries requests
//! out, a result lane (the child's stdout) carries responses back, and a
//! lobby thread drains the result lane and resolves the promise matching
//! each response's task id. The shape is identical to [`crate::executor`]'s
//! in-process pool; only the transport differs.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

use log::{debug, trace, warn};

use super::protocol::{read_frame, write_frame, EncryptionAction, EncryptionOutcome, EncryptionRequest, EncryptionResponse, EncryptionTaskId};
use crate::error::{Result, SyncError};

type PromiseSlot = Arc<(Mutex<Option<Result<Vec<u8>>>>, Condvar)>;

/// Handle to one in-flight request's eventual result.
pub struct EncryptionPromise {
    slot: PromiseSlot,
}

impl EncryptionPromise {
    fn new() -> (Self, PromiseSlot) {
        let slot: PromiseSlot = Arc::new((Mutex::new(None), Condvar::new()));
        (EncryptionPromise { slot: slot.clone() }, slot)
    }

    pub fn wait(self) -> Result<Vec<u8>> {
        let (lock, cvar) = &*self.slot;
        let mut guard = lock.lock().expect("encryption promise poisoned");
        while guard.is_none() {
            guard = cvar.wait(guard).expect("encryption promise poisoned");
        }
        guard.take().expect("resolved promise with no value")
    }
}

fn resolve(slot: &PromiseSlot, result: Result<Vec<u8>>) {
    let (lock, cvar) = &**slot;
    let mut guard = lock.lock().expect("encryption promise poisoned");
    *guard = Some(result);
    cvar.notify_all();
}

fn outcome_to_result(outcome: EncryptionOutcome) -> Result<Vec<u8>> {
    match outcome {
        EncryptionOutcome::Ok(bytes) => Ok(bytes),
        EncryptionOutcome::DecryptFailed => Err(SyncError::DecryptFailed),
        EncryptionOutcome::PassphraseRequired => Err(SyncError::PassphraseRequired),
        EncryptionOutcome::PassphraseAborted => Err(SyncError::PassphraseAborted),
        EncryptionOutcome::Err(msg) => Err(SyncError::Encryption(msg)),
    }
}

struct Shared {
    pending: Mutex<HashMap<EncryptionTaskId, PromiseSlot>>,
    next_id: AtomicU64,
    stopped: AtomicBool,
}

/// Parent-side handle to the encryption subprocess (§9). Owns the child
/// process (when spawned via [`Self::spawn_child_process`]) and the lobby
/// thread draining its result lane.
pub struct EncryptionProcess {
    shared: Arc<Shared>,
    stdin: Mutex<Box<dyn Write + Send>>,
    child: Option<Child>,
    lobby: Option<JoinHandle<()>>,
}

impl EncryptionProcess {
    /// Spawns the real child process: `command` must be configured to run
    /// something implementing [`crate::encryption::worker_loop::run_loop`]
    /// against its stdin/stdout (the demo binary's `--encryption-worker`
    /// mode does this).
    pub fn spawn_child_process(mut command: Command) -> std::io::Result<Self> {
        command.stdin(Stdio::piped()).stdout(Stdio::piped());
        let mut child = command.spawn()?;
        let stdin = child.stdin.take().expect("child spawned with piped stdin");
        let stdout = child.stdout.take().expect("child spawned with piped stdout");
        let mut process = Self::spawn_with_io(Box::new(stdin), Box::new(stdout));
        process.child = Some(child);
        Ok(process)
    }

    /// Generic constructor over any duplex transport; used directly by
    /// tests with an in-memory pipe, and internally by
    /// [`Self::spawn_child_process`] with real pipe handles.
    pub fn spawn_with_io(writer: Box<dyn Write + Send>, reader: Box<dyn Read + Send>) -> Self {
        let shared = Arc::new(Shared {
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            stopped: AtomicBool::new(false),
        });

        let lobby_shared = shared.clone();
        let lobby = thread::Builder::new()
            .name("encryption-lobby".to_string())
            .spawn(move || lobby_loop(lobby_shared, reader))
            .expect("failed to spawn encryption lobby thread");

        EncryptionProcess { shared, stdin: Mutex::new(writer), child: None, lobby: Some(lobby) }
    }

    pub fn encrypt(&self, recipients: Vec<String>, data: Vec<u8>) -> Result<EncryptionPromise> {
        self.submit(EncryptionAction::Encrypt { recipients, data })
    }

    pub fn decrypt(&self, key: Option<Vec<u8>>, passphrase: Option<String>, data: Vec<u8>) -> Result<EncryptionPromise> {
        self.submit(EncryptionAction::Decrypt { key, passphrase, data })
    }

    fn submit(&self, action: EncryptionAction) -> Result<EncryptionPromise> {
        if self.shared.stopped.load(Ordering::SeqCst) {
            return Err(SyncError::ServiceStopping);
        }
        let id = self.shared.next_id.fetch_add(1, Ordering::SeqCst);
        let (promise, slot) = EncryptionPromise::new();
        self.shared.pending.lock().expect("pending map poisoned").insert(id, slot);

        let mut stdin = self.stdin.lock().expect("encryption stdin lock poisoned");
        if let Err(e) = write_frame(&mut *stdin, &EncryptionRequest { id, action }) {
            warn!("encryption process transport error on submit: {}", e);
            drop(stdin);
            let slot = self.shared.pending.lock().expect("pending map poisoned").remove(&id);
            if let Some(slot) = slot {
                resolve(&slot, Err(SyncError::ServiceUnavailable));
            }
            return Err(SyncError::ServiceUnavailable);
        }
        trace!("submitted encryption task {}", id);
        Ok(promise)
    }

    /// Closes the task lane, which the worker loop observes as a clean stop
    /// signal (§9), then joins the child process and the lobby thread.
    /// Idempotent.
    pub fn stop(&mut self) {
        if self.shared.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!("encryption process stopping");
        {
            // Dropping the writer closes the pipe; replace it with a sink so
            // `submit` still observes `stopped` rather than panicking on a
            // poisoned/missing mutex contents.
            let mut stdin = self.stdin.lock().expect("encryption stdin lock poisoned");
            *stdin = Box::new(std::io::sink());
        }
        if let Some(mut child) = self.child.take() {
            let _ = child.wait();
        }
        if let Some(handle) = self.lobby.take() {
            let _ = handle.join();
        }
        let mut pending = self.shared.pending.lock().expect("pending map poisoned");
        for (id, slot) in pending.drain() {
            trace!("rejecting orphaned encryption task {} on stop", id);
            resolve(&slot, Err(SyncError::ServiceUnavailable));
        }
    }
}

impl Drop for EncryptionProcess {
    fn drop(&mut self) {
        if !self.shared.stopped.load(Ordering::SeqCst) {
            self.stop();
        }
    }
}

fn lobby_loop(shared: Arc<Shared>, mut reader: Box<dyn Read + Send>) {
    loop {
        let frame: std::io::Result<Option<EncryptionResponse>> = read_frame(&mut reader);
        match frame {
            Ok(Some(resp)) => {
                let slot = shared.pending.lock().expect("pending map poisoned").remove(&resp.id);
                if let Some(slot) = slot {
                    resolve(&slot, outcome_to_result(resp.outcome));
                }
            }
            Ok(None) => {
                trace!("encryption lobby: worker closed its end");
                break;
            }
            Err(e) => {
                warn!("encryption lobby transport error: {}", e);
                break;
            }
        }
    }
    // transport gone: every still-pending promise is unresolved (§4.9).
    let mut pending = shared.pending.lock().expect("pending map poisoned");
    for (_, slot) in pending.drain() {
        resolve(&slot, Err(SyncError::ServiceUnavailable));
    }
}
