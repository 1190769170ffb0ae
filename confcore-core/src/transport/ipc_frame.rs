//! Frame A: the internal IPC request/reply frame (spec.md §4.3, §6).
//!
//! ```text
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                 total-length (bytes, big-endian)              |
//! |                 session-id    (bytes, big-endian)             |
//! |                 body (UTF-8, NUL-terminated)                  |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```

use std::io::{self, Read, Write};

use confcore_contracts::{Category, ConfcoreError, Result};

pub const HEADER_LEN: usize = 8;
/// Defends against a corrupt or hostile length field; no legitimate
/// configuration-management frame approaches this size.
pub const MAX_BODY_LEN: usize = 64 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpcFrame {
    pub session_id: u32,
    pub body: String,
}

impl IpcFrame {
    pub fn new(session_id: u32, body: impl Into<String>) -> Self {
        Self { session_id, body: body.into() }
    }

    pub fn encode(&self) -> Vec<u8> {
        let body_bytes = self.body.as_bytes();
        let total_len = HEADER_LEN + body_bytes.len() + 1;
        let mut out = Vec::with_capacity(total_len);
        out.extend_from_slice(&(total_len as u32).to_be_bytes());
        out.extend_from_slice(&self.session_id.to_be_bytes());
        out.extend_from_slice(body_bytes);
        out.push(0);
        out
    }
}

/// Outcome of a `recv` call: either a complete frame, or a clean
/// end-of-file with nothing read (peer closed between frames).
#[derive(Debug)]
pub enum RecvOutcome {
    Frame(IpcFrame),
    Eof,
}

fn is_eof_like(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionReset | io::ErrorKind::BrokenPipe | io::ErrorKind::UnexpectedEof
    ) || err.raw_os_error() == Some(libc_ebadf())
}

fn libc_ebadf() -> i32 {
    9 // EBADF is stable across every platform nix/libc target here.
}

/// Restarting read of exactly `buf.len()` bytes; retries on `EINTR`
/// (`io::ErrorKind::Interrupted`) and `EAGAIN`/`EWOULDBLOCK`. Returns the
/// number of bytes actually read before a clean EOF (`Ok(0)` from the
/// reader) so the caller can distinguish "no bytes at all" from "closed
/// mid-frame".
fn read_exact_retrying<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted || e.kind() == io::ErrorKind::WouldBlock => continue,
            Err(e) if is_eof_like(&e) => break,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}

/// Restarting write-all, retrying short writes on `EINTR`/`EAGAIN`.
fn write_all_retrying<W: Write>(writer: &mut W, buf: &[u8]) -> Result<()> {
    let mut written = 0;
    while written < buf.len() {
        match writer.write(&buf[written..]) {
            Ok(0) => {
                return Err(ConfcoreError::new(Category::Unix, "write returned 0 with data remaining"))
            }
            Ok(n) => written += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted || e.kind() == io::ErrorKind::WouldBlock => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

pub fn send<W: Write>(writer: &mut W, frame: &IpcFrame) -> Result<()> {
    write_all_retrying(writer, &frame.encode())
}

pub fn recv<R: Read>(reader: &mut R) -> Result<RecvOutcome> {
    let mut header = [0u8; HEADER_LEN];
    let header_read = read_exact_retrying(reader, &mut header)?;
    if header_read == 0 {
        return Ok(RecvOutcome::Eof);
    }
    if header_read < HEADER_LEN {
        return Err(ConfcoreError::new(Category::Proto, "short header: connection closed mid-frame"));
    }

    let total_len = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
    let session_id = u32::from_be_bytes([header[4], header[5], header[6], header[7]]);

    if total_len < HEADER_LEN {
        return Err(ConfcoreError::new(Category::Proto, "malformed length field: shorter than header"));
    }
    let body_len = total_len - HEADER_LEN;
    if body_len == 0 {
        return Err(ConfcoreError::new(Category::Proto, "malformed length field: missing NUL terminator"));
    }
    if body_len > MAX_BODY_LEN {
        return Err(ConfcoreError::new(Category::Proto, "oversize body"));
    }

    let mut body = vec![0u8; body_len];
    let body_read = read_exact_retrying(reader, &mut body)?;
    if body_read < body_len {
        return Err(ConfcoreError::new(Category::Proto, "short body: connection closed mid-frame"));
    }

    if body.pop() != Some(0) {
        return Err(ConfcoreError::new(Category::Proto, "body is not NUL-terminated"));
    }
    let body = String::from_utf8(body)
        .map_err(|e| ConfcoreError::new(Category::Proto, format!("body is not valid UTF-8: {e}")))?;

    Ok(RecvOutcome::Frame(IpcFrame { session_id, body }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn round_trip_preserves_session_id_and_body() {
        let frame = IpcFrame::new(42, "<rpc/>");
        let encoded = frame.encode();
        let mut cursor = Cursor::new(encoded);
        match recv(&mut cursor).unwrap() {
            RecvOutcome::Frame(decoded) => assert_eq!(decoded, frame),
            RecvOutcome::Eof => panic!("expected a frame"),
        }
    }

    #[test]
    fn empty_nul_free_body_round_trips() {
        let frame = IpcFrame::new(0, "");
        let mut cursor = Cursor::new(frame.encode());
        match recv(&mut cursor).unwrap() {
            RecvOutcome::Frame(decoded) => assert_eq!(decoded.body, ""),
            RecvOutcome::Eof => panic!("expected a frame"),
        }
    }

    #[test]
    fn clean_eof_before_any_bytes() {
        let mut cursor = Cursor::new(Vec::<u8>::new());
        assert!(matches!(recv(&mut cursor).unwrap(), RecvOutcome::Eof));
    }

    #[test]
    fn short_header_is_fatal() {
        let mut cursor = Cursor::new(vec![0u8, 1, 2]);
        assert!(recv(&mut cursor).is_err());
    }

    #[test]
    fn malformed_length_field_is_fatal() {
        let mut header = Vec::new();
        header.extend_from_slice(&3u32.to_be_bytes()); // shorter than HEADER_LEN
        header.extend_from_slice(&0u32.to_be_bytes());
        let mut cursor = Cursor::new(header);
        assert!(recv(&mut cursor).is_err());
    }
}
