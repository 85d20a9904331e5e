//! Thread-exit teardown: deferred callbacks, then any frames the thread
//! failed to leave, treated as uncaught.

use std::panic::{catch_unwind, AssertUnwindSafe};

use crate::engine;

use super::tls::ThreadState;
use super::with_state;

/// Run `f` when the calling thread exits. Callbacks run before abandoned
/// frames are dismantled, most recently registered first.
pub fn defer_thread<F: FnOnce() + 'static>(f: F) {
    with_state(|st| st.defers.push(Box::new(f)));
}

pub(crate) fn teardown(st: &mut ThreadState) {
    while let Some(f) = st.defers.pop() {
        if catch_unwind(AssertUnwindSafe(f)).is_err() {
            eprintln!("ward: deferred thread cleanup failed");
        }
    }

    if !st.frames.is_empty() {
        eprintln!("ward: protected region abandoned at thread exit");
    }
    while let Some(mut frame) = st.frames.pop() {
        while let Some(mut entry) = frame.protects.pop() {
            if let Some(release) = entry.release.take() {
                if catch_unwind(AssertUnwindSafe(release)).is_err() {
                    eprintln!("ward: finalizer failed during thread exit");
                }
            }
        }
        drop(frame.arena.take());
    }

    if let Some(record) = st.raised.take() {
        engine::uncaught_fatal(&record);
    }
}
