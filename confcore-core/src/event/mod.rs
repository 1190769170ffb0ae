//! C2: the event dispatcher (spec.md §4.2).

pub mod dispatcher;
pub mod fds;
pub mod signals;
pub mod timers;

pub use dispatcher::{Dispatcher, DispatcherError};
pub use fds::{Priority, ReadableCallback};
pub use signals::SignalAction;
