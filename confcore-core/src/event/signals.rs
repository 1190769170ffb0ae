//! Async-signal-safe bridging from OS signals into the dispatcher's
//! readiness loop.
//!
//! `signal_hook::low_level::register` lets us run a tiny, signal-safe
//! closure (an atomic store) directly in the signal handler; a
//! self-pipe (`signal_hook::low_level::pipe::register`) guarantees the
//! blocked `mio::Poll::poll` wakes up promptly even if the platform
//! happens to restart the underlying syscall across the signal. This is
//! the same split other `mio`+`signal-hook` reactors in the wild use
//! instead of depending on raw `EINTR` propagation.

use std::io;
use std::os::fd::RawFd;
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;

/// What a registered signal should do to the dispatcher's exit counter
/// or flags (spec.md §4.2's `exit`, `child`, `ignore`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalAction {
    /// Request loop exit: sets the exit counter to 1 if it is currently 0.
    Exit,
    /// Mark that children should be reaped on the next wake.
    Child,
    /// Mark the signal as handled-and-ignored (clears on next wake).
    Ignore,
}

#[derive(Debug, Default)]
pub struct SignalFlags {
    pub exit_counter: AtomicI64,
    pub child: std::sync::atomic::AtomicBool,
    pub ignore: std::sync::atomic::AtomicBool,
}

impl SignalFlags {
    pub fn request_exit(&self, n: i64) {
        // 0 means "run"; a signal handler always asks for at least one
        // more iteration before exit.
        self.exit_counter.store(n.max(1), Ordering::SeqCst);
    }

    pub fn exit_state(&self) -> i64 {
        self.exit_counter.load(Ordering::SeqCst)
    }

    /// Called once per loop iteration before doing any work: decrements
    /// a counter > 1 by one, leaves 0 and 1 alone.
    pub fn tick(&self) -> i64 {
        let current = self.exit_counter.load(Ordering::SeqCst);
        if current > 1 {
            self.exit_counter.store(current - 1, Ordering::SeqCst);
        }
        current
    }
}

/// Owns the self-pipe write end and the registered signal ids so they can
/// be unregistered on shutdown.
pub struct SignalBridge {
    _write_end: UnixStream,
    read_end: UnixStream,
    ids: Vec<signal_hook::SigId>,
    flags: Arc<SignalFlags>,
}

impl SignalBridge {
    pub fn new() -> io::Result<Self> {
        let (read_end, write_end) = UnixStream::pair()?;
        read_end.set_nonblocking(true)?;
        write_end.set_nonblocking(true)?;
        Ok(Self {
            _write_end: write_end,
            read_end,
            ids: Vec::new(),
            flags: Arc::new(SignalFlags::default()),
        })
    }

    pub fn flags(&self) -> Arc<SignalFlags> {
        self.flags.clone()
    }

    pub fn read_fd(&self) -> RawFd {
        use std::os::fd::AsRawFd;
        self.read_end.as_raw_fd()
    }

    /// Registers `signal` so that it both wakes the poll loop (via the
    /// self-pipe) and records `action` for the dispatcher to act on.
    pub fn register(&mut self, signal: i32, action: SignalAction) -> io::Result<()> {
        use std::os::fd::AsRawFd;

        let pipe_id = unsafe {
            signal_hook::low_level::pipe::register(signal, self._write_end.as_raw_fd())?
        };
        self.ids.push(pipe_id);

        let flags = self.flags.clone();
        let action_id = unsafe {
            signal_hook::low_level::register(signal, move || match action {
                SignalAction::Exit => {
                    let current = flags.exit_counter.load(Ordering::SeqCst);
                    if current == 0 {
                        flags.exit_counter.store(1, Ordering::SeqCst);
                    }
                }
                SignalAction::Child => flags.child.store(true, Ordering::SeqCst),
                SignalAction::Ignore => flags.ignore.store(true, Ordering::SeqCst),
            })?
        };
        self.ids.push(action_id);
        Ok(())
    }

    /// Drains every queued wakeup byte. Called from the dispatcher's
    /// readability callback for the bridge's fd.
    pub fn drain(&mut self) {
        use std::io::Read;
        let mut buf = [0u8; 64];
        loop {
            match self.read_end.read(&mut buf) {
                Ok(0) => break,
                Ok(_) => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(_) => break,
            }
        }
    }
}

impl Drop for SignalBridge {
    fn drop(&mut self) {
        for id in self.ids.drain(..) {
            signal_hook::low_level::unregister(id);
        }
    }
}

/// Reaps all currently-exited children, matching spec.md §4.2's
/// `child` flag handling (delegated to the OS process-management
/// collaborator rather than this crate owning process lifecycle).
pub fn reap_children() {
    loop {
        match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) | Err(nix::errno::Errno::ECHILD) => break,
            Ok(_) => continue,
            Err(_) => break,
        }
    }
}
