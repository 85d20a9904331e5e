use std::sync::{Condvar, Mutex as StdMutex};

use crate::thread::current_id;
use crate::time::{remaining_until, Timespec};
use crate::ThreadStatus;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MutexKind {
    Plain,
    Recursive,
    Timed,
}

#[derive(Clone, Copy)]
struct MutexState {
    locked: bool,
    owner: u64,
    count: u64,
}

/// Blocking lock with plain, recursive, and timed flavors.
/// Timed acquisition is only available on `MutexKind::Timed`; recursive
/// re-entry only on `MutexKind::Recursive`.
pub struct Mutex {
    kind: MutexKind,
    state: StdMutex<MutexState>,
    cvar: Condvar,
}

impl Mutex {
    pub fn new(kind: MutexKind) -> Self {
        Self {
            kind,
            state: StdMutex::new(MutexState {
                locked: false,
                owner: 0,
                count: 0,
            }),
            cvar: Condvar::new(),
        }
    }

    pub fn kind(&self) -> MutexKind {
        self.kind
    }

    pub fn lock(&self) -> ThreadStatus {
        let tid = current_id();
        let mut guard = self.state.lock().unwrap();
        if self.kind == MutexKind::Recursive && guard.locked && guard.owner == tid {
            guard.count = guard.count.saturating_add(1);
            return ThreadStatus::Success;
        }
        while guard.locked {
            guard = self.cvar.wait(guard).unwrap();
        }
        guard.locked = true;
        guard.owner = tid;
        guard.count = 1;
        ThreadStatus::Success
    }

    pub fn try_lock(&self) -> ThreadStatus {
        let tid = current_id();
        let mut guard = self.state.lock().unwrap();
        if guard.locked {
            if self.kind == MutexKind::Recursive && guard.owner == tid {
                guard.count = guard.count.saturating_add(1);
                return ThreadStatus::Success;
            }
            return ThreadStatus::Busy;
        }
        guard.locked = true;
        guard.owner = tid;
        guard.count = 1;
        ThreadStatus::Success
    }

    /// Block until the lock is held or the UTC `deadline` passes.
    pub fn timed_lock(&self, deadline: &Timespec) -> ThreadStatus {
        if self.kind != MutexKind::Timed {
            return ThreadStatus::Error;
        }
        let tid = current_id();
        let mut guard = self.state.lock().unwrap();
        while guard.locked {
            let remaining = remaining_until(deadline);
            if remaining.is_zero() {
                return ThreadStatus::Timeout;
            }
            let (next, _) = self.cvar.wait_timeout(guard, remaining).unwrap();
            guard = next;
        }
        guard.locked = true;
        guard.owner = tid;
        guard.count = 1;
        ThreadStatus::Success
    }

    pub fn unlock(&self) -> ThreadStatus {
        let tid = current_id();
        let mut guard = self.state.lock().unwrap();
        if !guard.locked || guard.owner != tid {
            return ThreadStatus::Error;
        }
        guard.count = guard.count.saturating_sub(1);
        if guard.count == 0 {
            guard.locked = false;
            guard.owner = 0;
            self.cvar.notify_one();
        }
        ThreadStatus::Success
    }

    pub fn is_locked(&self) -> bool {
        self.state.lock().unwrap().locked
    }

    /// Full release regardless of recursion depth; returns the saved
    /// count so `acquire_restore` can rebuild it after a condition wait.
    pub(crate) fn release_save(&self) -> Option<u64> {
        let tid = current_id();
        let mut guard = self.state.lock().unwrap();
        if !guard.locked || guard.owner != tid {
            return None;
        }
        let saved = guard.count;
        guard.locked = false;
        guard.owner = 0;
        guard.count = 0;
        self.cvar.notify_one();
        Some(saved)
    }

    pub(crate) fn acquire_restore(&self, count: u64) {
        let tid = current_id();
        let mut guard = self.state.lock().unwrap();
        while guard.locked {
            guard = self.cvar.wait(guard).unwrap();
        }
        guard.locked = true;
        guard.owner = tid;
        guard.count = count.max(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recursive_lock_counts_reentries() {
        let m = Mutex::new(MutexKind::Recursive);
        assert_eq!(m.lock(), ThreadStatus::Success);
        assert_eq!(m.lock(), ThreadStatus::Success);
        assert_eq!(m.unlock(), ThreadStatus::Success);
        assert!(m.is_locked());
        assert_eq!(m.unlock(), ThreadStatus::Success);
        assert!(!m.is_locked());
    }

    #[test]
    fn unlock_without_lock_is_an_error() {
        let m = Mutex::new(MutexKind::Plain);
        assert_eq!(m.unlock(), ThreadStatus::Error);
    }

    #[test]
    fn timed_lock_requires_timed_kind() {
        let m = Mutex::new(MutexKind::Plain);
        let deadline = crate::time::timespec_get();
        assert_eq!(m.timed_lock(&deadline), ThreadStatus::Error);
    }
}
