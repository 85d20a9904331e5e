use std::sync::{Condvar, Mutex as StdMutex};

use crate::mutex::Mutex;
use crate::time::{remaining_until, Timespec};
use crate::ThreadStatus;

#[derive(Clone, Copy)]
struct CondState {
    waiters: u64,
    notify_seq: u64,
}

/// Condition variable paired with a shim [`Mutex`].
///
/// Waiters register under the internal lock before the user mutex is
/// released, so a signal between release and sleep bumps `notify_seq`
/// and is observed on wakeup; no notification is lost.
pub struct Cond {
    state: StdMutex<CondState>,
    cvar: Condvar,
}

impl Cond {
    pub fn new() -> Self {
        Self {
            state: StdMutex::new(CondState {
                waiters: 0,
                notify_seq: 0,
            }),
            cvar: Condvar::new(),
        }
    }

    pub fn wait(&self, mutex: &Mutex) -> ThreadStatus {
        self.wait_inner(mutex, None)
    }

    /// Wait until signalled or the UTC `deadline` passes. The mutex is
    /// reacquired before returning in either case.
    pub fn timed_wait(&self, mutex: &Mutex, deadline: &Timespec) -> ThreadStatus {
        self.wait_inner(mutex, Some(*deadline))
    }

    fn wait_inner(&self, mutex: &Mutex, deadline: Option<Timespec>) -> ThreadStatus {
        let mut guard = self.state.lock().unwrap();
        let expected_seq = guard.notify_seq;
        guard.waiters = guard.waiters.saturating_add(1);

        let saved = match mutex.release_save() {
            Some(saved) => saved,
            None => {
                guard.waiters = guard.waiters.saturating_sub(1);
                return ThreadStatus::Error;
            }
        };

        let status = match deadline {
            None => loop {
                guard = self.cvar.wait(guard).unwrap();
                if guard.notify_seq != expected_seq {
                    break ThreadStatus::Success;
                }
            },
            Some(deadline) => loop {
                if guard.notify_seq != expected_seq {
                    break ThreadStatus::Success;
                }
                let remaining = remaining_until(&deadline);
                if remaining.is_zero() {
                    break ThreadStatus::Timeout;
                }
                let (next, _) = self.cvar.wait_timeout(guard, remaining).unwrap();
                guard = next;
            },
        };

        guard.waiters = guard.waiters.saturating_sub(1);
        drop(guard);
        mutex.acquire_restore(saved);
        status
    }

    pub fn signal(&self) -> ThreadStatus {
        self.notify(1)
    }

    pub fn broadcast(&self) -> ThreadStatus {
        self.notify(u64::MAX)
    }

    fn notify(&self, n: u64) -> ThreadStatus {
        let mut guard = self.state.lock().unwrap();
        if guard.waiters == 0 {
            return ThreadStatus::Success;
        }
        guard.notify_seq = guard.notify_seq.wrapping_add(1);
        drop(guard);
        if n == 1 {
            self.cvar.notify_one();
        } else {
            self.cvar.notify_all();
        }
        ThreadStatus::Success
    }
}

impl Default for Cond {
    fn default() -> Self {
        Self::new()
    }
}
