//! The encryption process boundary (§4.9, §9): a task-in/result-out channel
//! carried across a real process rather than threads, because the GPG
//! backend this crate's embedders use is not thread-safe and the original
//! design isolates it in its own process for that reason.
//!
//! [`protocol`] frames messages on the wire, [`worker_loop`] is the pure
//! per-message logic run on the child side, and [`process_worker`] is the
//! parent-side handle that spawns the child and resolves promises — the
//! same task/result/lobby shape as [`crate::executor`], just over a pipe
//! instead of in-process channels.

pub mod process_worker;
pub mod protocol;
pub mod worker_loop;

pub use process_worker::{EncryptionProcess, EncryptionPromise};
pub use protocol::{EncryptionAction, EncryptionOutcome, EncryptionRequest, EncryptionResponse, EncryptionTaskId};
pub use worker_loop::{Backend, XorDemoBackend};
