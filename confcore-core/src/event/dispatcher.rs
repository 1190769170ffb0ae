//! C2: the process-wide, single-threaded, cooperative event loop.

use std::collections::HashMap;
use std::io;
use std::os::fd::RawFd;
use std::time::{Duration, Instant};

use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token};
use thiserror::Error;

use super::fds::{FdRegistration, FdTable, Priority, ReadableCallback};
use super::signals::{reap_children, SignalAction, SignalBridge};
use super::timers::{TimerRegistration, TimerWheel, TimeoutCallback};

const SIGNAL_BRIDGE_LABEL: &str = "__confcore_signal_bridge";

#[derive(Debug, Error)]
pub enum DispatcherError {
    #[error("event loop I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("unexpected interruption: {0}")]
    Signal(String),
}

/// The C2 dispatcher. One instance per process; owns the poll set, the
/// timer wheel, and the signal bridge.
pub struct Dispatcher {
    poll: Poll,
    events: Events,
    fds: FdTable,
    timers: TimerWheel,
    tokens: HashMap<RawFd, usize>,
    signal_bridge: Option<SignalBridge>,
}

impl Dispatcher {
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            poll: Poll::new()?,
            events: Events::with_capacity(256),
            fds: FdTable::new(),
            timers: TimerWheel::new(),
            tokens: HashMap::new(),
            signal_bridge: None,
        })
    }

    /// Installs signal handling for `signal` with the given action and
    /// registers the bridge's wakeup pipe as a prioritised fd, exactly
    /// once regardless of how many signals are installed.
    pub fn install_signal(&mut self, signal: i32, action: SignalAction) -> Result<(), DispatcherError> {
        if self.signal_bridge.is_none() {
            let bridge = SignalBridge::new()?;
            let fd = bridge.read_fd();
            self.signal_bridge = Some(bridge);
            self.reg_fd(fd, Self::signal_callback(), SIGNAL_BRIDGE_LABEL, Priority::Prio)?;
        }
        self.signal_bridge.as_mut().expect("just installed").register(signal, action)?;
        Ok(())
    }

    fn signal_callback() -> ReadableCallback {
        // The bridge itself is drained in run_iteration once the fd is
        // reported ready, since draining needs &mut SignalBridge, which
        // this callback (stored inside FdTable) cannot borrow.
        Box::new(|_fd| {})
    }

    pub fn exit_flags(&self) -> Option<std::sync::Arc<super::signals::SignalFlags>> {
        self.signal_bridge.as_ref().map(|b| b.flags())
    }

    pub fn reg_fd(
        &mut self,
        fd: RawFd,
        callback: ReadableCallback,
        label: &'static str,
        priority: Priority,
    ) -> Result<(), DispatcherError> {
        let refcount = self.tokens.entry(fd).or_insert(0);
        if *refcount == 0 {
            self.poll
                .registry()
                .register(&mut SourceFd(&fd), Token(fd as usize), Interest::READABLE)?;
        }
        *refcount += 1;
        self.fds.register(FdRegistration { fd, label, priority, callback });
        Ok(())
    }

    /// Idempotent on absence, per spec.md §4.2.
    pub fn unreg_fd(&mut self, fd: RawFd, label: &str) -> bool {
        let removed = self.fds.unregister(fd, label);
        if removed {
            if let Some(refcount) = self.tokens.get_mut(&fd) {
                *refcount -= 1;
                if *refcount == 0 {
                    self.tokens.remove(&fd);
                    let _ = self.poll.registry().deregister(&mut SourceFd(&fd));
                }
            }
        }
        removed
    }

    pub fn reg_timeout(
        &mut self,
        deadline: Instant,
        callback: TimeoutCallback,
        label: &'static str,
        arg: u64,
    ) {
        self.timers.insert(TimerRegistration { deadline, label, arg, callback });
    }

    /// Idempotent on absence, per spec.md §4.2.
    pub fn unreg_timeout(&mut self, label: &str, arg: u64) -> bool {
        self.timers.unregister(label, arg)
    }

    fn compute_timeout(&self) -> Option<Duration> {
        self.timers.earliest_deadline().map(|deadline| {
            let now = Instant::now();
            if deadline > now {
                deadline - now
            } else {
                Duration::ZERO
            }
        })
    }

    /// Runs until the exit counter reaches 1 (spec.md §4.2): 0 means
    /// "run", 1 means "exit after current iteration", N≥2 decrements
    /// once per iteration.
    pub fn run(&mut self) -> Result<i32, DispatcherError> {
        loop {
            if let Some(flags) = self.exit_flags() {
                let state = flags.tick();
                if state == 1 {
                    return Ok(0);
                }
            }
            self.run_iteration()?;
        }
    }

    /// Runs exactly one iteration; exposed separately so tests can drive
    /// the loop deterministically without a real signal.
    pub fn run_iteration(&mut self) -> Result<(), DispatcherError> {
        let timeout = self.compute_timeout();
        match self.poll.poll(&mut self.events, timeout) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {
                return self.handle_eintr();
            }
            Err(e) => return Err(DispatcherError::Io(e)),
        }

        let ready: Vec<RawFd> = self.events.iter().map(|e| e.token().0 as RawFd).collect();

        if ready.iter().any(|fd| self.is_signal_bridge_fd(*fd)) {
            if let Some(bridge) = self.signal_bridge.as_mut() {
                bridge.drain();
            }
            if let Some(flags) = self.exit_flags() {
                if flags.child.swap(false, std::sync::atomic::Ordering::SeqCst) {
                    reap_children();
                }
                flags.ignore.store(false, std::sync::atomic::Ordering::SeqCst);
            }
        }

        self.fire_expired_timers();
        self.dispatch_ready(&ready);
        Ok(())
    }

    fn is_signal_bridge_fd(&self, fd: RawFd) -> bool {
        self.signal_bridge.as_ref().map(|b| b.read_fd() == fd).unwrap_or(false)
    }

    fn fire_expired_timers(&mut self) {
        let now = Instant::now();
        while let Some(timer) = self.timers.pop_expired(now) {
            (timer.callback)();
        }
    }

    /// Dispatches ready fds: prioritised class first, then normal class.
    /// A pass aborts (rather than touching a possibly-freed registration)
    /// as soon as the relevant list's length changes mid-pass, since that
    /// means a callback deregistered itself or a sibling.
    fn dispatch_ready(&mut self, ready: &[RawFd]) {
        let mut i = 0;
        while i < self.fds.prio().len() {
            let fd = self.fds.prio()[i].fd;
            let before = self.fds.prio().len();
            if ready.contains(&fd) {
                let cb = &mut self.fds.prio_mut()[i].callback;
                cb(fd);
            }
            if self.fds.prio().len() != before {
                break;
            }
            i += 1;
        }

        let mut i = 0;
        while i < self.fds.normal_mut().len() {
            let fd = self.fds.normal_mut()[i].fd;
            let before = self.fds.normal_mut().len();
            if ready.contains(&fd) {
                let cb = &mut self.fds.normal_mut()[i].callback;
                cb(fd);
                if self.fds.has_prio() {
                    break;
                }
            }
            if self.fds.normal_mut().len() != before {
                break;
            }
            i += 1;
        }
    }

    fn handle_eintr(&mut self) -> Result<(), DispatcherError> {
        let flags = match self.exit_flags() {
            Some(f) => f,
            None => return Err(DispatcherError::Signal("EINTR with no signal bridge installed".into())),
        };
        if flags.exit_state() == 1 {
            return Ok(());
        }
        if flags.child.swap(false, std::sync::atomic::Ordering::SeqCst) {
            reap_children();
            return Ok(());
        }
        if flags.ignore.swap(false, std::sync::atomic::Ordering::SeqCst) {
            return Ok(());
        }
        Err(DispatcherError::Signal("EINTR with no pending signal state".into()))
    }

    /// Point query: does `fd` currently have pending input, without
    /// waiting (spec.md §4.2's `poll` primitive).
    pub fn poll_fd(fd: RawFd) -> Result<bool, DispatcherError> {
        use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
        use std::os::fd::BorrowedFd;

        let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
        let mut fds = [PollFd::new(borrowed, PollFlags::POLLIN)];
        let n = poll(&mut fds, PollTimeout::ZERO).map_err(|e| DispatcherError::Io(io::Error::from(e)))?;
        Ok(n > 0)
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::unistd::{pipe, write};
    use std::os::fd::{AsRawFd, OwnedFd};
    use std::sync::Arc;

    fn leak_fd(fd: OwnedFd) -> RawFd {
        use std::os::fd::IntoRawFd;
        fd.into_raw_fd()
    }

    #[test]
    fn prio_fd_runs_before_normal_fd_in_same_wake() {
        let mut dispatcher = Dispatcher::new().unwrap();
        let (r_prio, w_prio) = pipe().unwrap();
        let (r_normal, w_normal) = pipe().unwrap();
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let fd_prio = leak_fd(r_prio);
        let fd_normal = leak_fd(r_normal);

        let order_p = order.clone();
        dispatcher
            .reg_fd(
                fd_prio,
                Box::new(move |_| order_p.lock().push("prio")),
                "prio",
                Priority::Prio,
            )
            .unwrap();
        let order_n = order.clone();
        dispatcher
            .reg_fd(
                fd_normal,
                Box::new(move |_| order_n.lock().push("normal")),
                "normal",
                Priority::Normal,
            )
            .unwrap();

        write(&w_prio, b"x").unwrap();
        write(&w_normal, b"x").unwrap();

        dispatcher.run_iteration().unwrap();

        assert_eq!(*order.lock(), vec!["prio", "normal"]);
    }

    #[test]
    fn timer_fires_in_deadline_order_within_one_run() {
        let mut dispatcher = Dispatcher::new().unwrap();
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let now = Instant::now();

        for (label, delay) in [("c", 30u64), ("a", 10), ("b", 20)] {
            let order = order.clone();
            dispatcher.reg_timeout(
                now + Duration::from_millis(delay),
                Box::new(move || order.lock().push(label)),
                label,
                0,
            );
        }

        std::thread::sleep(Duration::from_millis(35));
        dispatcher.run_iteration().unwrap();

        assert_eq!(*order.lock(), vec!["a", "b", "c"]);
    }

    #[test]
    fn unreg_fd_is_idempotent_on_absence() {
        let mut dispatcher = Dispatcher::new().unwrap();
        assert!(!dispatcher.unreg_fd(99, "nope"));
    }

    #[test]
    fn point_poll_reports_pending_bytes() {
        let (r, w) = pipe().unwrap();
        let fd = r.as_raw_fd();
        assert!(!Dispatcher::poll_fd(fd).unwrap());
        write(&w, b"x").unwrap();
        assert!(Dispatcher::poll_fd(fd).unwrap());
    }

    #[test]
    fn exit_counter_delays_n_minus_one_iterations() {
        let mut dispatcher = Dispatcher::new().unwrap();
        dispatcher.install_signal(libc_sigusr1(), SignalAction::Ignore).unwrap();
        let flags = dispatcher.exit_flags().unwrap();
        flags.request_exit(3);
        assert_eq!(flags.tick(), 3);
        assert_eq!(flags.exit_state(), 2);
        assert_eq!(flags.tick(), 2);
        assert_eq!(flags.exit_state(), 1);
        assert_eq!(flags.tick(), 1);
    }

    fn libc_sigusr1() -> i32 {
        10
    }
}
