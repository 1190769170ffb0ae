//! Connection establishment for the two transports spec.md §4.3 names:
//! an `AF_UNIX` path socket for the IPC frame, and TCP (v4 or v6) for the
//! NETCONF frame.

use std::io;
use std::net::{TcpStream, ToSocketAddrs};
use std::os::unix::net::UnixStream;
use std::path::Path;

use confcore_contracts::{Category, ConfcoreError, Result};

/// Endpoint to dial: a unix-domain socket path, or a host/port pair
/// resolved through the standard resolver.
#[derive(Debug, Clone)]
pub enum Endpoint {
    Unix(std::path::PathBuf),
    Tcp(String),
}

pub enum Connection {
    Unix(UnixStream),
    Tcp(TcpStream),
}

impl io::Read for Connection {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Connection::Unix(s) => s.read(buf),
            Connection::Tcp(s) => s.read(buf),
        }
    }
}

impl io::Write for Connection {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Connection::Unix(s) => s.write(buf),
            Connection::Tcp(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Connection::Unix(s) => s.flush(),
            Connection::Tcp(s) => s.flush(),
        }
    }
}

/// Translates a connect failure into a diagnostic that distinguishes
/// "permission denied, probably a group-membership issue" (the most
/// common real-world cause for a refused `AF_UNIX` management socket)
/// from a generic refusal.
fn diagnose_unix_connect_error(path: &Path, err: io::Error) -> ConfcoreError {
    let errno = err.raw_os_error().unwrap_or(0);
    match err.kind() {
        io::ErrorKind::PermissionDenied => ConfcoreError::with_errno(
            Category::Unix,
            errno,
            format!(
                "permission denied connecting to {}: the socket exists but is not \
                 accessible to this process, which usually means the process is not \
                 a member of the group that owns it",
                path.display()
            ),
        ),
        io::ErrorKind::ConnectionRefused => ConfcoreError::with_errno(
            Category::Unix,
            errno,
            format!("connection refused by {}: no listener is bound there", path.display()),
        ),
        io::ErrorKind::NotFound => ConfcoreError::with_errno(
            Category::Unix,
            errno,
            format!("no socket at {}", path.display()),
        ),
        _ => ConfcoreError::with_errno(
            Category::Unix,
            errno,
            format!("failed to connect to {}: {err}", path.display()),
        ),
    }
}

fn diagnose_tcp_connect_error(addr: &str, err: io::Error) -> ConfcoreError {
    let errno = err.raw_os_error().unwrap_or(0);
    match err.kind() {
        io::ErrorKind::PermissionDenied => ConfcoreError::with_errno(
            Category::Unix,
            errno,
            format!("permission denied connecting to {addr}: check firewall/capability policy"),
        ),
        io::ErrorKind::ConnectionRefused => ConfcoreError::with_errno(
            Category::Unix,
            errno,
            format!("connection refused by {addr}: no listener is bound there"),
        ),
        _ => ConfcoreError::with_errno(Category::Unix, errno, format!("failed to connect to {addr}: {err}")),
    }
}

pub fn connect(endpoint: &Endpoint) -> Result<Connection> {
    match endpoint {
        Endpoint::Unix(path) => UnixStream::connect(path)
            .map(Connection::Unix)
            .map_err(|e| diagnose_unix_connect_error(path, e)),
        Endpoint::Tcp(addr) => {
            let mut resolved = addr
                .to_socket_addrs()
                .map_err(|e| ConfcoreError::new(Category::Unix, format!("cannot resolve {addr}: {e}")))?;
            let mut last_err = None;
            for sock_addr in resolved.by_ref() {
                match TcpStream::connect(sock_addr) {
                    Ok(stream) => return Ok(Connection::Tcp(stream)),
                    Err(e) => last_err = Some(e),
                }
            }
            Err(diagnose_tcp_connect_error(
                addr,
                last_err.unwrap_or_else(|| io::Error::from(io::ErrorKind::AddrNotAvailable)),
            ))
        }
    }
}

/// Binds a listening `AF_UNIX` socket at `path`, removing a stale socket
/// file left behind by a prior, now-dead process (the same advisory
/// cleanup libc-based NETCONF back-ends perform before `bind(2)`).
pub fn bind_unix_listener(path: &Path) -> Result<std::os::unix::net::UnixListener> {
    if path.exists() {
        std::fs::remove_file(path)
            .map_err(|e| ConfcoreError::new(Category::Unix, format!("removing stale socket {}: {e}", path.display())))?;
    }
    std::os::unix::net::UnixListener::bind(path)
        .map_err(|e| ConfcoreError::new(Category::Unix, format!("binding {}: {e}", path.display())))
}

pub fn bind_tcp_listener(addr: &str) -> Result<std::net::TcpListener> {
    std::net::TcpListener::bind(addr)
        .map_err(|e| ConfcoreError::new(Category::Unix, format!("binding {addr}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};

    #[test]
    fn unix_round_trip_via_tempdir_socket() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("confcore.sock");
        let listener = bind_unix_listener(&path).unwrap();

        let accept_thread = std::thread::spawn(move || {
            let (mut sock, _) = listener.accept().unwrap();
            let mut buf = [0u8; 5];
            sock.read_exact(&mut buf).unwrap();
            sock.write_all(&buf).unwrap();
        });

        let mut conn = connect(&Endpoint::Unix(path)).unwrap();
        conn.write_all(b"hello").unwrap();
        let mut buf = [0u8; 5];
        conn.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"hello");

        accept_thread.join().unwrap();
    }

    #[test]
    fn unix_connect_to_missing_path_reports_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("does-not-exist.sock");
        let err = connect(&Endpoint::Unix(path)).unwrap_err();
        assert_eq!(err.category(), Category::Unix);
    }

    #[test]
    fn rebinding_removes_stale_socket_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("confcore.sock");
        let first = bind_unix_listener(&path).unwrap();
        drop(first);
        assert!(path.exists(), "socket file should still be on disk after drop");
        let _second = bind_unix_listener(&path).unwrap();
    }
}
