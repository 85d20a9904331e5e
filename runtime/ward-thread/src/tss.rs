use std::cell::RefCell;
use std::ffi::c_void;
use std::ptr;
use std::sync::{Mutex as StdMutex, Once, OnceLock};

use crate::ThreadStatus;

/// Upper bound on destructor passes at thread exit; a destructor that
/// keeps re-setting slot values stops being honored after this many
/// rounds.
const DTOR_ITERATIONS: usize = 4;

pub type Destructor = fn(*mut c_void);

struct KeySlot {
    active: bool,
    dtor: Option<Destructor>,
}

fn key_table() -> &'static StdMutex<Vec<KeySlot>> {
    static KEYS: OnceLock<StdMutex<Vec<KeySlot>>> = OnceLock::new();
    KEYS.get_or_init(|| StdMutex::new(Vec::new()))
}

struct TssValues {
    slots: Vec<*mut c_void>,
}

impl Drop for TssValues {
    fn drop(&mut self) {
        run_destructors(&mut self.slots);
    }
}

thread_local! {
    static VALUES: RefCell<TssValues> = const { RefCell::new(TssValues { slots: Vec::new() }) };
}

fn run_destructors(slots: &mut [*mut c_void]) {
    for _ in 0..DTOR_ITERATIONS {
        let mut again = false;
        for index in 0..slots.len() {
            let value = slots[index];
            if value.is_null() {
                continue;
            }
            slots[index] = ptr::null_mut();
            let dtor = {
                let keys = key_table().lock().unwrap();
                keys.get(index)
                    .and_then(|slot| if slot.active { slot.dtor } else { None })
            };
            if let Some(dtor) = dtor {
                again = true;
                dtor(value);
            }
        }
        if !again {
            break;
        }
    }
}

/// Thread-specific storage key. Each thread sees its own value; a
/// destructor, if given, runs on the value at thread exit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ThreadKey(usize);

impl ThreadKey {
    pub fn new(dtor: Option<Destructor>) -> Result<Self, ThreadStatus> {
        let mut keys = key_table().lock().unwrap();
        if let Some(index) = keys.iter().position(|slot| !slot.active) {
            keys[index] = KeySlot { active: true, dtor };
            return Ok(ThreadKey(index));
        }
        keys.push(KeySlot { active: true, dtor });
        Ok(ThreadKey(keys.len() - 1))
    }

    /// Retire the key. Values already stored by other threads are left
    /// alone; their destructor is no longer invoked.
    pub fn delete(self) {
        let mut keys = key_table().lock().unwrap();
        if let Some(slot) = keys.get_mut(self.0) {
            slot.active = false;
            slot.dtor = None;
        }
    }

    pub fn get(self) -> *mut c_void {
        VALUES.with(|values| {
            values
                .borrow()
                .slots
                .get(self.0)
                .copied()
                .unwrap_or(ptr::null_mut())
        })
    }

    pub fn set(self, value: *mut c_void) -> ThreadStatus {
        let active = {
            let keys = key_table().lock().unwrap();
            keys.get(self.0).map(|slot| slot.active).unwrap_or(false)
        };
        if !active {
            return ThreadStatus::Error;
        }
        VALUES.with(|values| {
            let mut values = values.borrow_mut();
            if values.slots.len() <= self.0 {
                values.slots.resize(self.0 + 1, ptr::null_mut());
            }
            values.slots[self.0] = value;
        });
        ThreadStatus::Success
    }
}

/// One-shot initialization flag for [`call_once`].
pub struct OnceFlag(Once);

impl OnceFlag {
    pub const fn new() -> Self {
        Self(Once::new())
    }
}

impl Default for OnceFlag {
    fn default() -> Self {
        Self::new()
    }
}

pub fn call_once<F: FnOnce()>(flag: &OnceFlag, f: F) {
    flag.0.call_once(f);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_key_reads_null() {
        let key = ThreadKey::new(None).unwrap();
        assert!(key.get().is_null());
        key.delete();
    }

    #[test]
    fn set_then_get_round_trips() {
        let key = ThreadKey::new(None).unwrap();
        let mut data = 7u32;
        let ptr = (&mut data as *mut u32).cast::<c_void>();
        assert_eq!(key.set(ptr), ThreadStatus::Success);
        assert_eq!(key.get(), ptr);
        key.set(ptr::null_mut());
        key.delete();
    }

    #[test]
    fn deleted_key_rejects_set() {
        let key = ThreadKey::new(None).unwrap();
        key.delete();
        assert_eq!(key.set(ptr::null_mut()), ThreadStatus::Error);
    }

    #[test]
    fn call_once_runs_exactly_once() {
        static FLAG: OnceFlag = OnceFlag::new();
        let mut count = 0;
        call_once(&FLAG, || count += 1);
        call_once(&FLAG, || count += 1);
        assert_eq!(count, 1);
    }
}
