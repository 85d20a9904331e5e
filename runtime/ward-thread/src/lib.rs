//! Portable threading shim for the ward runtime.
//! Plain, recursive, and timed mutexes, condition variables with absolute
//! deadlines, TLS keys with destructors, once-init, and wall/monotonic time.

mod cond;
mod mutex;
mod thread;
mod time;
mod tss;

pub use cond::Cond;
pub use mutex::{Mutex, MutexKind};
pub use thread::{current_id, exit, sleep, spawn, yield_now, Thread};
pub use time::{monotonic_now, timespec_after, timespec_get, Timespec};
pub use tss::{call_once, OnceFlag, ThreadKey};

/// Status codes returned by shim operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ThreadStatus {
    Success,
    Busy,
    Timeout,
    NoMem,
    Error,
}
