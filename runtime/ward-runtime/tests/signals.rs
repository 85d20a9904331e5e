#![cfg(unix)]

use std::cell::Cell;
use std::mem;
use std::ptr;
use std::rc::Rc;
use std::sync::Mutex;

use ward_runtime::{current, frame_depth, protect, protected, sig_fpe, sig_segv, try_signal};

// Handler installation is process-wide; every test here serializes on
// this lock.
static SIGNAL_LOCK: Mutex<()> = Mutex::new(());

extern "C" fn sentinel_handler(_signo: libc::c_int) {}

fn install_sentinel(signo: libc::c_int) -> libc::sigaction {
    unsafe {
        let mut act: libc::sigaction = mem::zeroed();
        act.sa_sigaction = sentinel_handler as usize;
        libc::sigemptyset(&mut act.sa_mask);
        let mut old: libc::sigaction = mem::zeroed();
        libc::sigaction(signo, &act, &mut old);
        old
    }
}

fn installed_action(signo: libc::c_int) -> usize {
    unsafe {
        let mut act: libc::sigaction = mem::zeroed();
        libc::sigaction(signo, ptr::null(), &mut act);
        act.sa_sigaction
    }
}

#[test]
fn arithmetic_fault_is_caught_and_execution_resumes() {
    let _guard = SIGNAL_LOCK.lock().unwrap();
    let mut recovered = false;
    let mut after_raise = false;
    try_signal! {
        try {
            unsafe { libc::raise(libc::SIGFPE) };
            after_raise = true;
        }
        catch (sig_fpe) {
            recovered = true;
        }
    }
    assert!(recovered);
    assert!(!after_raise);
    assert_eq!(frame_depth(), 0);
}

#[test]
fn segmentation_fault_is_caught() {
    let _guard = SIGNAL_LOCK.lock().unwrap();
    let mut name = None;
    try_signal! {
        try {
            unsafe { libc::raise(libc::SIGSEGV) };
        }
        catch (sig_segv) {
            name = current().map(|r| r.name());
        }
    }
    assert_eq!(name, Some("sig_segv"));
}

#[test]
fn previous_handler_is_restored_on_scope_exit() {
    let _guard = SIGNAL_LOCK.lock().unwrap();
    let old = install_sentinel(libc::SIGFPE);
    let mut recovered = false;
    try_signal! {
        try {
            unsafe { libc::raise(libc::SIGFPE) };
        }
        catch (sig_fpe) {
            recovered = true;
        }
    }
    assert!(recovered);
    assert_eq!(installed_action(libc::SIGFPE), sentinel_handler as usize);
    unsafe { libc::sigaction(libc::SIGFPE, &old, ptr::null_mut()) };
}

#[test]
fn signal_unwinds_nested_regions_and_their_finalizers() {
    let _guard = SIGNAL_LOCK.lock().unwrap();
    let finalized = Rc::new(Cell::new(false));
    let mut recovered = false;
    {
        let finalized = finalized.clone();
        try_signal! {
            try {
                protected! {
                    try {
                        let flag = finalized.clone();
                        protect(move || flag.set(true));
                        unsafe { libc::raise(libc::SIGSEGV) };
                    }
                }
            }
            catch (sig_segv) {
                recovered = true;
            }
        }
    }
    assert!(recovered);
    assert!(finalized.get());
    assert_eq!(frame_depth(), 0);
}

#[test]
fn finally_runs_after_signal_recovery() {
    let _guard = SIGNAL_LOCK.lock().unwrap();
    let mut order = Vec::new();
    try_signal! {
        try {
            unsafe { libc::raise(libc::SIGFPE) };
        }
        catch (sig_fpe) {
            order.push("handler");
        }
        finally {
            order.push("finally");
        }
    }
    assert_eq!(order, ["handler", "finally"]);
}

#[test]
fn quiet_body_behaves_like_a_plain_region() {
    let _guard = SIGNAL_LOCK.lock().unwrap();
    let mut body_ran = false;
    let mut handler_ran = false;
    try_signal! {
        try {
            body_ran = true;
        }
        catch (sig_fpe) {
            handler_ran = true;
        }
    }
    assert!(body_ran);
    assert!(!handler_ran);
    assert_eq!(frame_depth(), 0);
}

#[test]
fn signal_record_carries_the_region_site() {
    let _guard = SIGNAL_LOCK.lock().unwrap();
    let mut snapshot = None;
    try_signal! {
        try {
            unsafe { libc::raise(libc::SIGFPE) };
        }
        catch (sig_fpe) {
            snapshot = current();
        }
    }
    let record = snapshot.expect("record visible in handler");
    assert!(record.file().ends_with("signals.rs"));
    assert_eq!(record.message(), Some("arithmetic fault"));
}
