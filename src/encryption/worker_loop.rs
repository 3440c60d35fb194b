//! Per-message processing logic run inside the encryption process (§1, §9).
//!
//! Kept separate from [`crate::encryption::process_worker`] (which owns the
//! actual `std::process::Child` and lobby thread) so it can be exercised
//! directly against in-memory buffers instead of a real child process,
//! mirroring how the original's `_EncryptionProcess._run_worker_thread` was
//! itself separable from process bootstrap.
//!
//! The GPG call itself is out of this crate's scope (§1 Non-goals: "GPG
//! process details beyond its task-in/result-out contract"); [`Backend`] is
//! the seam an embedder fills in with the real thing. The crate ships only
//! a reversible XOR placeholder so the channel plumbing is exercisable
//! end-to-end without a GPG dependency.

use std::io::{Read, Write};

use log::{trace, warn};

use super::protocol::{read_frame, write_frame, EncryptionAction, EncryptionOutcome, EncryptionRequest, EncryptionResponse};
use crate::error::SyncError;

/// The encryption process's actual cryptographic backend. Implementations
/// talk to the real GPG process (out of scope here, §1); the crate ships
/// [`XorDemoBackend`] only so the channel plumbing can be exercised without
/// one.
pub trait Backend: Send + Sync {
    fn encrypt(&self, data: &[u8], recipients: &[String]) -> Result<Vec<u8>, SyncError>;
    fn decrypt(&self, data: &[u8], key: Option<&[u8]>, passphrase: Option<&str>) -> Result<Vec<u8>, SyncError>;
}

/// Reversible XOR "encryption" keyed by the joined recipient list (or the
/// passphrase on decrypt). Not secure; exists only to give the demo binary
/// and the process-boundary tests something to round-trip through.
pub struct XorDemoBackend;

fn xor_key(material: &str) -> u8 {
    material.bytes().fold(0x5au8, |acc, b| acc ^ b)
}

impl Backend for XorDemoBackend {
    fn encrypt(&self, data: &[u8], recipients: &[String]) -> Result<Vec<u8>, SyncError> {
        let key = xor_key(&recipients.join(","));
        Ok(data.iter().map(|b| b ^ key).collect())
    }

    fn decrypt(&self, data: &[u8], key: Option<&[u8]>, passphrase: Option<&str>) -> Result<Vec<u8>, SyncError> {
        let material = match (key, passphrase) {
            (Some(k), _) => String::from_utf8_lossy(k).into_owned(),
            (None, Some(p)) => p.to_string(),
            (None, None) => return Err(SyncError::PassphraseRequired),
        };
        let xk = xor_key(&material);
        Ok(data.iter().map(|b| b ^ xk).collect())
    }
}

/// Processes one request against `backend`, never panicking on a backend
/// error: every [`SyncError`] variant the backend can raise maps to an
/// [`EncryptionOutcome`] so a failed task still gets a well-formed response
/// frame back to the parent.
pub fn handle_request(req: EncryptionRequest, backend: &dyn Backend) -> EncryptionResponse {
    let outcome = match req.action {
        EncryptionAction::Encrypt { recipients, data } => match backend.encrypt(&data, &recipients) {
            Ok(bytes) => EncryptionOutcome::Ok(bytes),
            Err(e) => map_error(e),
        },
        EncryptionAction::Decrypt { key, passphrase, data } => {
            match backend.decrypt(&data, key.as_deref(), passphrase.as_deref()) {
                Ok(bytes) => EncryptionOutcome::Ok(bytes),
                Err(e) => map_error(e),
            }
        }
    };
    EncryptionResponse { id: req.id, outcome }
}

fn map_error(err: SyncError) -> EncryptionOutcome {
    match err {
        SyncError::DecryptFailed => EncryptionOutcome::DecryptFailed,
        SyncError::PassphraseRequired => EncryptionOutcome::PassphraseRequired,
        SyncError::PassphraseAborted => EncryptionOutcome::PassphraseAborted,
        other => EncryptionOutcome::Err(other.to_string()),
    }
}

/// Entry point of the encryption process's main loop (§9: "both sides watch
/// the other's closing as a stop signal"). Reads requests from `reader`
/// until a clean EOF, dispatching each to `backend` and writing the
/// response to `writer`. Returns once the parent closes its end.
pub fn run_loop(reader: &mut impl Read, writer: &mut impl Write, backend: &dyn Backend) -> std::io::Result<()> {
    loop {
        let request: Option<EncryptionRequest> = read_frame(reader)?;
        let Some(request) = request else {
            trace!("encryption worker loop: parent closed its end, stopping");
            return Ok(());
        };
        trace!("encryption worker handling task {}", request.id);
        let response = handle_request(request, backend);
        if let Err(e) = write_frame(writer, &response) {
            warn!("encryption worker: failed writing response: {}", e);
            return Err(e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn xor_backend_round_trips() {
        let backend = XorDemoBackend;
        let recipients = vec!["alice@example.com".to_string()];
        let plaintext = b"hello, bajoo".to_vec();
        let encrypted = backend.encrypt(&plaintext, &recipients).unwrap();
        assert_ne!(encrypted, plaintext);
        let decrypted = backend
            .decrypt(&encrypted, None, Some("alice@example.com"))
            .unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn decrypt_without_key_or_passphrase_requires_one() {
        let backend = XorDemoBackend;
        assert!(matches!(
            backend.decrypt(b"data", None, None),
            Err(SyncError::PassphraseRequired)
        ));
    }

    #[test]
    fn run_loop_processes_requests_until_eof() {
        let backend = XorDemoBackend;
        let mut input = Vec::new();
        super::write_frame(
            &mut input,
            &EncryptionRequest {
                id: 1,
                action: EncryptionAction::Encrypt { recipients: vec!["a".into()], data: vec![9, 9] },
            },
        )
        .unwrap();
        let mut reader = Cursor::new(input);
        let mut output = Vec::new();
        run_loop(&mut reader, &mut output, &backend).unwrap();

        let mut out_cursor = Cursor::new(output);
        let resp: EncryptionResponse = read_frame(&mut out_cursor).unwrap().unwrap();
        assert_eq!(resp.id, 1);
        assert!(matches!(resp.outcome, EncryptionOutcome::Ok(_)));
    }
}
