use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::thread;
use std::time::Duration;

use crate::ThreadStatus;

static THREAD_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static THREAD_ID: u64 = THREAD_ID_COUNTER.fetch_add(1, AtomicOrdering::Relaxed);
}

/// Shim-local id of the calling thread. Ids are assigned on first use
/// and never reused within a process.
pub fn current_id() -> u64 {
    THREAD_ID.with(|id| *id)
}

struct ExitToken(i32);

/// Handle to a thread started with [`spawn`].
pub struct Thread {
    handle: thread::JoinHandle<i32>,
}

/// Start a shim thread. The closure's return value (or the code passed
/// to [`exit`]) becomes the thread's result.
pub fn spawn<F>(f: F) -> Result<Thread, ThreadStatus>
where
    F: FnOnce() -> i32 + Send + 'static,
{
    let spawned = thread::Builder::new().spawn(move || {
        match catch_unwind(AssertUnwindSafe(f)) {
            Ok(code) => code,
            Err(payload) => match payload.downcast::<ExitToken>() {
                Ok(token) => token.0,
                Err(other) => resume_unwind(other),
            },
        }
    });
    match spawned {
        Ok(handle) => Ok(Thread { handle }),
        Err(_) => Err(ThreadStatus::NoMem),
    }
}

/// Terminate the calling shim thread with `code`. Unwinds, so
/// destructors and registered cleanup still run on the way out.
/// Only valid on threads started with [`spawn`]; anywhere else the
/// token escapes as an ordinary panic.
pub fn exit(code: i32) -> ! {
    resume_unwind(Box::new(ExitToken(code)))
}

impl Thread {
    pub fn join(self) -> Result<i32, ThreadStatus> {
        self.handle.join().map_err(|_| ThreadStatus::Error)
    }

    pub fn detach(self) {
        drop(self.handle);
    }
}

pub fn sleep(dur: Duration) {
    thread::sleep(dur);
}

pub fn yield_now() {
    thread::yield_now();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thread_ids_are_distinct() {
        let here = current_id();
        let t = spawn(move || {
            assert_ne!(current_id(), here);
            0
        })
        .unwrap();
        assert_eq!(t.join(), Ok(0));
    }

    #[test]
    fn exit_code_reaches_join() {
        let t = spawn(|| {
            exit(42);
        })
        .unwrap();
        assert_eq!(t.join(), Ok(42));
    }

    #[test]
    fn panicking_thread_joins_as_error() {
        let t = spawn(|| panic!("boom")).unwrap();
        assert_eq!(t.join(), Err(ThreadStatus::Error));
    }
}
