//! Task executor (§4.9): a bounded pool of worker threads dispatching
//! submitted jobs and resolving a promise per job exactly once.
//!
//! Grounded on the teacher's work-broker/worker-pool shape (`src/broker.rs`,
//! `src/worker.rs`: a shared queue plus a fixed pool of threads draining it
//! until the channel closes) generalized from one fixed job (delete this
//! directory) to arbitrary typed tasks carrying an id, a priority, and a
//! result that flows back through a single "lobby" thread rather than being
//! read directly off a per-call channel — matching §4.9's two-lane shape
//! (task lane in, result lane out) and the exactly-once resolve/reject
//! contract.

use std::any::Any;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, trace, warn};

use crate::error::{Result, SyncError};

pub type TaskId = u64;

type AnyResult = Result<Box<dyn Any + Send>>;

struct QueuedTask {
    id: TaskId,
    priority: i32,
    seq: u64,
    job: Box<dyn FnOnce() -> AnyResult + Send>,
}

impl PartialEq for QueuedTask {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}
impl Eq for QueuedTask {}

impl PartialOrd for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedTask {
    /// `BinaryHeap` is a max-heap; lower `priority` must dispatch first, and
    /// among equal priorities, the earlier `seq` must dispatch first (FIFO
    /// within one priority, per §4.9). Both comparisons are therefore
    /// reversed.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// A resolver stored per in-flight task id, erased over the job's concrete
/// result type; downcasts back to it when the result arrives.
type Resolver = Box<dyn FnOnce(AnyResult) + Send>;

struct Shared {
    queue: Mutex<BinaryHeap<QueuedTask>>,
    queue_cvar: Condvar,
    stopped: AtomicBool,
    next_id: AtomicU64,
    next_seq: AtomicU64,
    result_tx: Sender<(TaskId, AnyResult)>,
    pending: Mutex<HashMap<TaskId, Resolver>>,
}

/// Bounded-queue worker pool plus a lobby thread resolving promises (§4.9).
///
/// `submit` is the task lane; the worker threads send results to the lobby
/// thread over a `crossbeam_channel`, which is the result lane. Both lanes
/// are drained to completion on `stop()`.
pub struct Executor {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
    lobby: Option<JoinHandle<()>>,
}

/// A future-ish handle to a submitted task's eventual result. Call
/// [`Promise::wait`] to block for it; unlike a channel receiver this can be
/// polled from exactly one place since the underlying slot is single-shot.
pub struct Promise<T> {
    inner: Arc<(Mutex<Option<Result<T>>>, Condvar)>,
}

impl<T: Send + 'static> Promise<T> {
    fn new() -> (Self, Resolver)
    where
        T: 'static,
    {
        let inner = Arc::new((Mutex::new(None), Condvar::new()));
        let resolver_inner = inner.clone();
        let resolver: Resolver = Box::new(move |result: AnyResult| {
            let downcast = match result {
                Ok(boxed) => match boxed.downcast::<T>() {
                    Ok(value) => Ok(*value),
                    Err(_) => Err(SyncError::ServiceUnavailable),
                },
                Err(e) => Err(e),
            };
            let (lock, cvar) = &*resolver_inner;
            let mut slot = lock.lock().expect("promise state poisoned");
            *slot = Some(downcast);
            cvar.notify_all();
        });
        (Promise { inner }, resolver)
    }

    /// Blocks until the task resolves or rejects.
    pub fn wait(self) -> Result<T> {
        let (lock, cvar) = &*self.inner;
        let mut slot = lock.lock().expect("promise state poisoned");
        while slot.is_none() {
            slot = cvar.wait(slot).expect("promise state poisoned");
        }
        slot.take().expect("promise resolved with no value")
    }
}

impl Executor {
    /// Spawns `worker_count` worker threads (§5: default ≈ CPU count) plus
    /// one lobby thread.
    pub fn start(worker_count: usize) -> Self {
        let (result_tx, result_rx) = unbounded();
        let shared = Arc::new(Shared {
            queue: Mutex::new(BinaryHeap::new()),
            queue_cvar: Condvar::new(),
            stopped: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
            next_seq: AtomicU64::new(0),
            result_tx,
            pending: Mutex::new(HashMap::new()),
        });

        let workers = (0..worker_count.max(1))
            .map(|i| {
                let shared = shared.clone();
                thread::Builder::new()
                    .name(format!("sync-worker-{}", i))
                    .spawn(move || worker_loop(shared))
                    .expect("failed to spawn executor worker thread")
            })
            .collect();

        let lobby_shared = shared.clone();
        let lobby = thread::Builder::new()
            .name("sync-executor-lobby".to_string())
            .spawn(move || lobby_loop(lobby_shared, result_rx))
            .expect("failed to spawn executor lobby thread");

        Executor { shared, workers, lobby: Some(lobby) }
    }

    /// Submits a job at the default (medium) priority. See [`Self::submit_with_priority`].
    pub fn submit<T, F>(&self, job: F) -> Result<Promise<T>>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        self.submit_with_priority(0, job)
    }

    /// Submits a job; lower `priority` values dispatch first (§4.9). Rejects
    /// immediately with [`SyncError::ServiceStopping`] once [`Self::stop`]
    /// has been called.
    pub fn submit_with_priority<T, F>(&self, priority: i32, job: F) -> Result<Promise<T>>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        if self.shared.stopped.load(AtomicOrdering::SeqCst) {
            return Err(SyncError::ServiceStopping);
        }
        let id = self.shared.next_id.fetch_add(1, AtomicOrdering::SeqCst);
        let seq = self.shared.next_seq.fetch_add(1, AtomicOrdering::SeqCst);
        let (promise, resolver) = Promise::new();

        {
            let mut pending = self.shared.pending.lock().expect("pending map poisoned");
            pending.insert(id, resolver);
        }

        let boxed_job: Box<dyn FnOnce() -> AnyResult + Send> =
            Box::new(move || job().map(|v| Box::new(v) as Box<dyn Any + Send>));

        let mut queue = self.shared.queue.lock().expect("task queue poisoned");
        if self.shared.stopped.load(AtomicOrdering::SeqCst) {
            drop(queue);
            let mut pending = self.shared.pending.lock().expect("pending map poisoned");
            pending.remove(&id);
            return Err(SyncError::ServiceStopping);
        }
        queue.push(QueuedTask { id, priority, seq, job: boxed_job });
        drop(queue);
        self.shared.queue_cvar.notify_one();
        trace!("submitted task {} at priority {}", id, priority);
        Ok(promise)
    }

    /// Idempotent. Rejects all queued and in-flight tasks with
    /// [`SyncError::ServiceStopping`], wakes every worker so it can observe
    /// the stop flag, and joins every thread.
    pub fn stop(&mut self) {
        if self.shared.stopped.swap(true, AtomicOrdering::SeqCst) {
            return;
        }
        debug!("executor stopping");
        {
            let mut queue = self.shared.queue.lock().expect("task queue poisoned");
            while let Some(task) = queue.pop() {
                Self::reject(&self.shared, task.id, SyncError::ServiceStopping);
            }
        }
        self.shared.queue_cvar.notify_all();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
        // the lobby thread polls `stopped` on its own recv timeout and exits
        // once it has drained whatever results are already in the channel.
        if let Some(handle) = self.lobby.take() {
            let _ = handle.join();
        }
        // anything still pending (e.g. a result already in flight when the
        // channel closed) is a transport error per §4.9/§5.
        let mut pending = self.shared.pending.lock().expect("pending map poisoned");
        for (id, resolver) in pending.drain() {
            trace!("rejecting orphaned task {} on stop", id);
            resolver(Err(SyncError::ServiceUnavailable));
        }
    }

    fn reject(shared: &Shared, id: TaskId, err: SyncError) {
        let resolver = shared.pending.lock().expect("pending map poisoned").remove(&id);
        if let Some(resolver) = resolver {
            resolver(Err(err));
        }
    }
}

impl Drop for Executor {
    fn drop(&mut self) {
        if !self.shared.stopped.load(AtomicOrdering::SeqCst) {
            self.stop();
        }
    }
}

fn worker_loop(shared: Arc<Shared>) {
    loop {
        let task = {
            let mut queue = shared.queue.lock().expect("task queue poisoned");
            loop {
                if let Some(task) = queue.pop() {
                    break Some(task);
                }
                if shared.stopped.load(AtomicOrdering::SeqCst) {
                    break None;
                }
                queue = shared.queue_cvar.wait(queue).expect("task queue poisoned");
            }
        };
        let Some(task) = task else { return };
        let result = (task.job)();
        if shared.result_tx.send((task.id, result)).is_err() {
            warn!("result channel closed; worker {} stopping", task.id);
            return;
        }
    }
}

fn lobby_loop(shared: Arc<Shared>, result_rx: Receiver<(TaskId, AnyResult)>) {
    // The lobby resolves promises in the order results arrive, not in
    // submission order (§5) -- it simply drains the channel as-is.
    loop {
        match result_rx.recv_timeout(std::time::Duration::from_millis(50)) {
            Ok((id, result)) => {
                let resolver = shared.pending.lock().expect("pending map poisoned").remove(&id);
                if let Some(resolver) = resolver {
                    resolver(result);
                }
            }
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                if shared.stopped.load(AtomicOrdering::SeqCst) {
                    // give any already-queued results one last drain pass.
                    while let Ok((id, result)) = result_rx.try_recv() {
                        let resolver = shared.pending.lock().expect("pending map poisoned").remove(&id);
                        if let Some(resolver) = resolver {
                            resolver(result);
                        }
                    }
                    return;
                }
            }
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering as AO};

    #[test]
    fn submitted_task_resolves_exactly_once() {
        let executor = Executor::start(2);
        let promise = executor.submit(|| Ok(21 * 2)).unwrap();
        assert_eq!(promise.wait().unwrap(), 42);
    }

    #[test]
    fn failing_task_rejects_with_its_error() {
        let executor = Executor::start(1);
        let promise = executor.submit::<(), _>(|| Err(SyncError::NetworkTimeout)).unwrap();
        assert!(matches!(promise.wait(), Err(SyncError::NetworkTimeout)));
    }

    #[test]
    fn many_tasks_each_resolve_exactly_once() {
        let executor = Executor::start(4);
        let counter = Arc::new(AtomicUsize::new(0));
        let promises: Vec<_> = (0..50)
            .map(|i| {
                let counter = counter.clone();
                executor
                    .submit(move || {
                        counter.fetch_add(1, AO::SeqCst);
                        Ok(i)
                    })
                    .unwrap()
            })
            .collect();
        let mut results: Vec<i32> = promises.into_iter().map(|p| p.wait().unwrap()).collect();
        results.sort();
        assert_eq!(results, (0..50).collect::<Vec<_>>());
        assert_eq!(counter.load(AO::SeqCst), 50);
    }

    #[test]
    fn stop_is_idempotent_and_rejects_new_submissions() {
        let mut executor = Executor::start(1);
        executor.stop();
        executor.stop();
        let result = executor.submit(|| Ok(1));
        assert!(matches!(result, Err(SyncError::ServiceStopping)));
    }

    #[test]
    fn stop_rejects_queued_work() {
        let executor = Executor::start(1);
        // saturate the single worker so the second submission stays queued.
        let (tx, rx) = std::sync::mpsc::channel::<()>();
        let blocker = executor
            .submit(move || {
                rx.recv().ok();
                Ok(())
            })
            .unwrap();
        let queued = executor.submit(|| Ok(1)).unwrap();
        let mut executor = executor;
        drop(tx); // let the blocker's job proceed so stop() can join workers.
        executor.stop();
        let _ = blocker.wait();
        assert!(matches!(queued.wait(), Err(SyncError::ServiceStopping) | Err(SyncError::ServiceUnavailable)));
    }
}
