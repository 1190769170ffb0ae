use std::os::fd::RawFd;

/// Two priority classes for fd callbacks (spec.md §4.2): prioritised fds
/// are drained before normal fds within one wake, and a normal-priority
/// callback completing while any prioritised fd remains registered
/// truncates the rest of the normal pass so the loop re-examines
/// prioritised fds on the next iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    Prio,
    Normal,
}

pub type ReadableCallback = Box<dyn FnMut(RawFd) + Send>;

pub struct FdRegistration {
    pub fd: RawFd,
    pub label: &'static str,
    pub priority: Priority,
    pub callback: ReadableCallback,
}

impl std::fmt::Debug for FdRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FdRegistration")
            .field("fd", &self.fd)
            .field("label", &self.label)
            .field("priority", &self.priority)
            .finish()
    }
}

/// Registered fd callbacks, split by priority class. Registration order
/// within a class is preserved (append-only Vec), matching the FIFO
/// ordering invariant in spec.md §5.
#[derive(Default)]
pub struct FdTable {
    prio: Vec<FdRegistration>,
    normal: Vec<FdRegistration>,
}

impl FdTable {
    pub fn new() -> Self {
        Self { prio: Vec::new(), normal: Vec::new() }
    }

    pub fn register(&mut self, registration: FdRegistration) {
        match registration.priority {
            Priority::Prio => self.prio.push(registration),
            Priority::Normal => self.normal.push(registration),
        }
    }

    /// Matches on `(fd, label)` ignoring nothing else; idempotent on
    /// absence (spec.md §4.2's `unreg_fd` matches on `(fd, cb)` ignoring
    /// `arg` — `label` stands in for callback identity here since
    /// closures capture their own state instead of taking an explicit
    /// `arg`).
    pub fn unregister(&mut self, fd: RawFd, label: &str) -> bool {
        let before = self.prio.len() + self.normal.len();
        self.prio.retain(|r| !(r.fd == fd && r.label == label));
        self.normal.retain(|r| !(r.fd == fd && r.label == label));
        self.prio.len() + self.normal.len() != before
    }

    pub fn prio(&self) -> &[FdRegistration] {
        &self.prio
    }

    pub fn prio_mut(&mut self) -> &mut Vec<FdRegistration> {
        &mut self.prio
    }

    pub fn normal_mut(&mut self) -> &mut Vec<FdRegistration> {
        &mut self.normal
    }

    pub fn has_prio(&self) -> bool {
        !self.prio.is_empty()
    }

    pub fn all_fds(&self) -> impl Iterator<Item = (RawFd, Priority)> + '_ {
        self.prio
            .iter()
            .map(|r| (r.fd, Priority::Prio))
            .chain(self.normal.iter().map(|r| (r.fd, Priority::Normal)))
    }
}
