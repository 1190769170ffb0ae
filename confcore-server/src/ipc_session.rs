//! Wires the C3 IPC frame transport and C4 RPC dispatch into the C2
//! event loop: accepts connections on the configured `AF_UNIX` socket,
//! reads one length-prefixed frame per readable wake, dispatches it, and
//! writes the framed reply back. Connection teardown releases every
//! datastore lock the session held (spec.md §4.7's `unlock-all`, wired
//! to the transport layer per SPEC_FULL §11).

use std::io::Write;
use std::os::fd::{AsRawFd, FromRawFd, IntoRawFd, RawFd};
use std::os::unix::net::{UnixListener, UnixStream};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use confcore_contracts::OwnerId;
use confcore_core::event::{Dispatcher, DispatcherError, Priority, ReadableCallback};
use confcore_core::transport::{ipc_frame, IpcFrame, RecvOutcome};
use confcore_core::{datastore::persist, Engine, RpcDispatch};

use crate::handlers::CurrentOwner;

const LISTENER_LABEL: &str = "confcore-ipc-listener";
const CONNECTION_LABEL: &str = "confcore-ipc-connection";

/// Connection fds whose peer closed and must be released: deregistered
/// from the dispatcher's poll set and unlocked from every datastore they
/// held. The per-connection callback's signature (`FnMut(RawFd)`) has no
/// way to reach the dispatcher directly, so teardown is queued here and
/// drained by the main loop after each iteration — the same shape as
/// [`PendingRegistrations`] for the opposite direction.
#[derive(Clone, Default)]
pub struct CloseQueue(Arc<Mutex<Vec<(RawFd, OwnerId)>>>);

impl CloseQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, fd: RawFd, owner: OwnerId) {
        self.0.lock().push((fd, owner));
    }

    /// Drains every pending close: unregisters its fd (the connection's
    /// `UnixStream` is dropped, and so already closed, by the time its
    /// callback pushes here) and releases its locks.
    pub fn drain(&self, dispatcher: &mut Dispatcher, engine: &Engine) {
        for (fd, owner) in std::mem::take(&mut *self.0.lock()) {
            dispatcher.unreg_fd(fd, CONNECTION_LABEL);
            engine.unlock_all(owner);
        }
    }
}

/// Fd registrations queued by the listener's accept callback, since that
/// callback cannot itself borrow the `Dispatcher` it runs inside of.
/// Drained by the main loop after each iteration.
#[derive(Clone, Default)]
pub struct PendingRegistrations(Arc<Mutex<Vec<(RawFd, ReadableCallback)>>>);

impl PendingRegistrations {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, fd: RawFd, callback: ReadableCallback) {
        self.0.lock().push((fd, callback));
    }

    pub fn drain(&self, dispatcher: &mut Dispatcher) -> Result<(), DispatcherError> {
        for (fd, callback) in std::mem::take(&mut *self.0.lock()) {
            dispatcher.reg_fd(fd, callback, CONNECTION_LABEL, Priority::Normal)?;
        }
        Ok(())
    }
}

/// Registers the listener's accept loop on `dispatcher`. Each accepted
/// connection is assigned its own incrementing [`OwnerId`] (the IPC
/// frame's `session-id` is an independent, client-chosen request tag;
/// the owner id used for locking is the server's own per-session
/// counter, per spec.md §4.7's "identified by an integer session/owner
/// id") and queued onto `pending` for registration on the next drain.
pub fn listen(
    dispatcher: &mut Dispatcher,
    listener: UnixListener,
    dispatch: Arc<Mutex<RpcDispatch>>,
    current_owner: CurrentOwner,
    pending: PendingRegistrations,
    close_queue: CloseQueue,
) -> Result<(), DispatcherError> {
    let next_owner = Arc::new(AtomicU64::new(1));
    let listener_fd = listener.as_raw_fd();

    dispatcher.reg_fd(
        listener_fd,
        Box::new(move |_fd| {
            accept_one(&listener, &dispatch, &current_owner, &next_owner, &pending, &close_queue);
        }),
        LISTENER_LABEL,
        Priority::Normal,
    )
}

fn accept_one(
    listener: &UnixListener,
    dispatch: &Arc<Mutex<RpcDispatch>>,
    current_owner: &CurrentOwner,
    next_owner: &Arc<AtomicU64>,
    pending: &PendingRegistrations,
    close_queue: &CloseQueue,
) {
    let (stream, _addr) = match listener.accept() {
        Ok(pair) => pair,
        Err(e) => {
            tracing::warn!(error = %e, "accept failed");
            return;
        }
    };

    let owner = OwnerId(next_owner.fetch_add(1, Ordering::SeqCst));
    tracing::info!(owner = %owner, "connection accepted");

    let fd = stream.into_raw_fd();
    let dispatch = dispatch.clone();
    let current_owner = current_owner.clone();
    let close_queue = close_queue.clone();
    // SAFETY: `fd` was just produced by `stream.into_raw_fd()` above and
    // is not reused elsewhere; this closure becomes its sole owner.
    let mut stream = unsafe { UnixStream::from_raw_fd(fd) };
    let mut closed = false;

    pending.push(
        fd,
        Box::new(move |_fd| {
            if closed {
                return;
            }
            match read_and_dispatch(&mut stream, &dispatch, &current_owner, owner) {
                Ok(true) => {}
                Ok(false) => {
                    close_queue.push(fd, owner);
                    closed = true;
                }
                Err(e) => {
                    tracing::warn!(error = %e, owner = %owner, "connection error, closing");
                    close_queue.push(fd, owner);
                    closed = true;
                }
            }
        }),
    );
}

/// Reads and dispatches exactly one frame. Returns `Ok(false)` on a clean
/// EOF (peer closed between frames): the caller should tear the
/// connection down without treating it as an error.
///
/// `current_owner` is the single cell every lock/unlock handler reads
/// (they were registered once, against the whole `RpcDispatch`, at
/// startup — not per connection). Setting it to this connection's
/// `owner` immediately before `dispatch.call` is race-free because the
/// event loop is single-threaded and cooperative: no other connection's
/// callback can run between the set and the call it guards.
fn read_and_dispatch(
    stream: &mut UnixStream,
    dispatch: &Arc<Mutex<RpcDispatch>>,
    current_owner: &CurrentOwner,
    owner: OwnerId,
) -> confcore_contracts::Result<bool> {
    let request = match ipc_frame::recv(stream)? {
        RecvOutcome::Frame(frame) => frame,
        RecvOutcome::Eof => return Ok(false),
    };

    current_owner.set(owner);
    let reply_body = handle_request(dispatch, &request);

    let reply = IpcFrame::new(request.session_id, reply_body);
    ipc_frame::send(stream, &reply)?;
    stream.flush().ok();
    Ok(true)
}

fn handle_request(dispatch: &Arc<Mutex<RpcDispatch>>, request: &IpcFrame) -> String {
    let envelope = match persist::read_xml(&request.body) {
        Ok(node) => node,
        Err(e) => return error_body(&e),
    };

    match dispatch.lock().call(&envelope) {
        Ok((body, _invoked)) => body,
        Err(e) => error_body(&e),
    }
}

fn error_body(err: &confcore_contracts::ConfcoreError) -> String {
    let diag = err.netconf_diagnostic();
    format!(
        "<rpc-error><error-type>{}</error-type><error-tag>{}</error-tag><error-message>{}</error-message></rpc-error>",
        diag.error_type, diag.error_tag, escape(&diag.error_message)
    )
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}
