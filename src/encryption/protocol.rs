//! Wire protocol for the encryption process boundary (§4.9, §9).
//!
//! Grounded on `original_source/bajoo/encryption/process_transmission.py`:
//! that module frames one Python object per message over a `Connection`.
//! Lacking Python's pickle, messages here are length-prefixed `bincode`
//! frames instead — a `u32` little-endian byte count followed by that many
//! bytes. Both the parent (`process_worker`) and child (`worker_loop`) sides
//! read and write the same framing, so either end can be tested by handing
//! it an in-memory buffer instead of a real pipe.

use std::io::{self, Read, Write};

use serde::{Deserialize, Serialize};

pub type EncryptionTaskId = u64;

/// One task sent down the task lane (parent -> encryption process).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptionRequest {
    pub id: EncryptionTaskId,
    pub action: EncryptionAction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EncryptionAction {
    Encrypt { recipients: Vec<String>, data: Vec<u8> },
    Decrypt { key: Option<Vec<u8>>, passphrase: Option<String>, data: Vec<u8> },
}

/// One result sent back down the result lane (encryption process -> parent).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptionResponse {
    pub id: EncryptionTaskId,
    pub outcome: EncryptionOutcome,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EncryptionOutcome {
    Ok(Vec<u8>),
    DecryptFailed,
    PassphraseRequired,
    PassphraseAborted,
    Err(String),
}

fn bincode_config() -> bincode::config::Configuration {
    bincode::config::standard()
}

/// Writes one length-prefixed frame. Used identically for requests (parent
/// writer) and responses (child writer).
pub fn write_frame<T: Serialize>(writer: &mut impl Write, value: &T) -> io::Result<()> {
    let bytes = bincode::serde::encode_to_vec(value, bincode_config())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = u32::try_from(bytes.len()).map_err(|_| {
        io::Error::new(io::ErrorKind::InvalidData, "encryption frame too large")
    })?;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&bytes)?;
    writer.flush()
}

/// Reads one length-prefixed frame, or `Ok(None)` on a clean EOF between
/// frames (the other side closed its end — the stop signal described in
/// §9's process-boundary note).
pub fn read_frame<T: for<'de> Deserialize<'de>>(reader: &mut impl Read) -> io::Result<Option<T>> {
    let mut len_buf = [0u8; 4];
    match read_exact_or_eof(reader, &mut len_buf)? {
        false => return Ok(None),
        true => {}
    }
    let len = u32::from_le_bytes(len_buf) as usize;
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload)?;
    let (value, _) = bincode::serde::decode_from_slice(&payload, bincode_config())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    Ok(Some(value))
}

/// Like `read_exact`, but returns `Ok(false)` instead of erroring when the
/// stream is exhausted before a single byte is read (and still errors if it
/// ends partway through the length prefix, which is a genuine transport
/// fault rather than an orderly close).
fn read_exact_or_eof(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => {
                return if filled == 0 {
                    Ok(false)
                } else {
                    Err(io::Error::new(io::ErrorKind::UnexpectedEof, "truncated frame header"))
                };
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(true)
}
