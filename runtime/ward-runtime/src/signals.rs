//! Synchronous-signal bridge: turns SIGSEGV, SIGFPE, and friends into
//! catchable exceptions inside `try_signal!` regions.
//!
//! The handler is async-signal-safe by construction: it reaches the
//! per-thread recovery context through `pthread_getspecific`, touches
//! only atomics and the preallocated signal slot, and leaves with
//! `siglongjmp`. The raised record itself is composed after the jump,
//! back in normal context. Faults must originate in the guarded body;
//! recovery from a fault inside the engine's own bookkeeping is not
//! supported.
//!
//! Handler installation is process-wide (`sigaction` has no per-thread
//! form); a bridged signal on a thread with no armed region falls back
//! to the default disposition.

use std::ffi::c_void;
use std::mem;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicPtr, Ordering};
use std::sync::OnceLock;

use libc::c_int;

use crate::exceptions::signal_exception;
use crate::frame::FrameToken;
use crate::state;
use crate::{engine, frame};

const BRIDGED: [c_int; 7] = [
    libc::SIGSEGV,
    libc::SIGFPE,
    libc::SIGBUS,
    libc::SIGILL,
    libc::SIGABRT,
    libc::SIGINT,
    libc::SIGTERM,
];

/// Alternate signal stack size; enough headroom for the handler and any
/// kernel-injected frames even when the fault is stack exhaustion.
const ALT_STACK_SIZE: usize = 64 * 1024;

/// `sigjmp_buf` save area. The libc crate does not expose the type, so
/// it is over-allocated: glibc's is 200 bytes on x86_64.
#[repr(C, align(16))]
pub struct SigJmpBuf {
    _buf: [u8; 512],
}

impl SigJmpBuf {
    const fn zeroed() -> Self {
        Self { _buf: [0u8; 512] }
    }
}

extern "C" {
    // sigsetjmp/siglongjmp are the signal-correct jump pair. On glibc
    // sigsetjmp is a macro over __sigsetjmp; on macOS it is a real
    // symbol.
    #[cfg_attr(target_os = "linux", link_name = "__sigsetjmp")]
    #[doc(hidden)]
    pub fn sigsetjmp(env: *mut SigJmpBuf, savemask: c_int) -> c_int;
    fn siglongjmp(env: *mut SigJmpBuf, val: c_int) -> !;
}

/// One `try_signal!` activation. Owned by the macro expansion so the
/// jump buffer stays valid for the whole guarded body.
struct Region {
    jmp: SigJmpBuf,
    armed: AtomicBool,
    prev: *mut Region,
}

/// Per-thread recovery context, reached from the handler via
/// `pthread_getspecific`.
#[repr(C)]
struct SignalCell {
    active: AtomicPtr<Region>,
    pending: AtomicI32,
    in_handler: AtomicBool,
    stack_base: *mut c_void,
    stack_size: usize,
}

static SIGNAL_KEY: OnceLock<Option<libc::pthread_key_t>> = OnceLock::new();

fn signal_key() -> Option<libc::pthread_key_t> {
    *SIGNAL_KEY.get_or_init(|| {
        let mut key: libc::pthread_key_t = 0;
        if unsafe { libc::pthread_key_create(&mut key, Some(cell_dtor)) } == 0 {
            Some(key)
        } else {
            None
        }
    })
}

unsafe extern "C" fn cell_dtor(raw: *mut c_void) {
    if raw.is_null() {
        return;
    }
    let cell = Box::from_raw(raw.cast::<SignalCell>());
    if !cell.stack_base.is_null() {
        let disable = libc::stack_t {
            ss_sp: ptr::null_mut(),
            ss_flags: libc::SS_DISABLE,
            ss_size: 0,
        };
        libc::sigaltstack(&disable, ptr::null_mut());
        libc::munmap(cell.stack_base, cell.stack_size);
    }
}

fn warn_degraded() {
    static WARNED: OnceLock<()> = OnceLock::new();
    WARNED.get_or_init(|| {
        eprintln!("ward: signal bridge unavailable; guarded regions will not catch signals");
    });
}

/// The calling thread's recovery context, creating it (and the
/// alternate signal stack) on first use. Null when setup failed.
fn thread_cell() -> *mut SignalCell {
    let Some(key) = signal_key() else {
        warn_degraded();
        return ptr::null_mut();
    };

    let existing = unsafe { libc::pthread_getspecific(key) };
    if !existing.is_null() {
        return existing.cast();
    }

    let stack = unsafe {
        libc::mmap(
            ptr::null_mut(),
            ALT_STACK_SIZE,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_PRIVATE | libc::MAP_ANON,
            -1,
            0,
        )
    };
    if stack == libc::MAP_FAILED {
        warn_degraded();
        return ptr::null_mut();
    }
    let ss = libc::stack_t {
        ss_sp: stack,
        ss_flags: 0,
        ss_size: ALT_STACK_SIZE,
    };
    if unsafe { libc::sigaltstack(&ss, ptr::null_mut()) } != 0 {
        unsafe { libc::munmap(stack, ALT_STACK_SIZE) };
        warn_degraded();
        return ptr::null_mut();
    }

    let cell = Box::new(SignalCell {
        active: AtomicPtr::new(ptr::null_mut()),
        pending: AtomicI32::new(0),
        in_handler: AtomicBool::new(false),
        stack_base: stack,
        stack_size: ALT_STACK_SIZE,
    });
    let raw = Box::into_raw(cell);
    if unsafe { libc::pthread_setspecific(key, raw.cast()) } != 0 {
        unsafe { cell_dtor(raw.cast()) };
        warn_degraded();
        return ptr::null_mut();
    }
    raw
}

/// Only async-signal-safe operations: `pthread_getspecific`, atomics,
/// `siglongjmp`, and in the give-up paths `sigaction`/`raise`.
unsafe extern "C" fn bridge_handler(
    signo: c_int,
    _info: *mut libc::siginfo_t,
    _context: *mut c_void,
) {
    let raw = match SIGNAL_KEY.get().copied().flatten() {
        Some(key) => libc::pthread_getspecific(key).cast::<SignalCell>(),
        None => ptr::null_mut(),
    };
    if raw.is_null() {
        default_disposition(signo);
        return;
    }
    let cell = &*raw;
    if cell.in_handler.swap(true, Ordering::AcqRel) {
        // second fault while recovering: the recovery path is broken
        libc::_exit(128 + signo);
    }

    let mut region = cell.active.load(Ordering::Acquire);
    while !region.is_null() && !(*region).armed.load(Ordering::Acquire) {
        region = (*region).prev;
    }
    if region.is_null() {
        cell.in_handler.store(false, Ordering::Release);
        default_disposition(signo);
        return;
    }

    (*region).armed.store(false, Ordering::Release);
    cell.pending.store(signo, Ordering::Release);
    siglongjmp(&mut (*region).jmp, 1);
}

/// Revert to the default disposition and resubmit the signal; the
/// process terminates when the handler returns and the signal unblocks.
unsafe fn default_disposition(signo: c_int) {
    let mut act: libc::sigaction = mem::zeroed();
    act.sa_sigaction = libc::SIG_DFL;
    libc::sigemptyset(&mut act.sa_mask);
    libc::sigaction(signo, &act, ptr::null_mut());
    libc::raise(signo);
}

fn restore_actions(saved: [libc::sigaction; BRIDGED.len()]) {
    for (signo, old) in BRIDGED.iter().zip(saved.iter()) {
        unsafe { libc::sigaction(*signo, old, ptr::null_mut()) };
    }
}

/// Guard for one `try_signal!` region: installs the bridge handlers,
/// links the jump region, and registers handler restoration with the
/// enclosing frame's protection list.
#[doc(hidden)]
pub struct SignalScope {
    region: Option<Box<Region>>,
}

impl SignalScope {
    pub fn enter() -> Self {
        let cell = thread_cell();
        if cell.is_null() {
            return Self { region: None };
        }

        let mut saved: [libc::sigaction; BRIDGED.len()] = unsafe { mem::zeroed() };
        let mut act: libc::sigaction = unsafe { mem::zeroed() };
        act.sa_sigaction = bridge_handler as usize;
        act.sa_flags = libc::SA_SIGINFO | libc::SA_ONSTACK;
        unsafe { libc::sigfillset(&mut act.sa_mask) };
        for (index, signo) in BRIDGED.iter().enumerate() {
            let ret = unsafe { libc::sigaction(*signo, &act, &mut saved[index]) };
            if ret != 0 {
                for undo in 0..index {
                    unsafe { libc::sigaction(BRIDGED[undo], &saved[undo], ptr::null_mut()) };
                }
                warn_degraded();
                return Self { region: None };
            }
        }

        // restoration of the previous handlers rides the frame's
        // protection list, so it runs on every exit path
        frame::protect(move || restore_actions(saved));

        let cell = unsafe { &*cell };
        let mut region = Box::new(Region {
            jmp: SigJmpBuf::zeroed(),
            armed: AtomicBool::new(false),
            prev: cell.active.load(Ordering::Acquire),
        });
        cell.active.store(&mut *region, Ordering::Release);
        Self {
            region: Some(region),
        }
    }

    pub fn jump_slot(&mut self) -> *mut SigJmpBuf {
        match self.region.as_mut() {
            Some(region) => &mut region.jmp,
            None => ptr::null_mut(),
        }
    }

    pub fn arm(&self) {
        if let Some(region) = self.region.as_ref() {
            let cell = unsafe { &*thread_cell() };
            cell.pending.store(0, Ordering::Release);
            region.armed.store(true, Ordering::Release);
        }
    }

    pub fn disarm(&self) {
        if let Some(region) = self.region.as_ref() {
            region.armed.store(false, Ordering::Release);
        }
    }

    /// Landing point after `siglongjmp`: unlink regions the jump
    /// skipped, dismantle frames stacked above this one, and convert
    /// the recorded signal into a raised record.
    pub fn recover(&mut self, token: &FrameToken, file: &'static str, line: u32) {
        let Some(region) = self.region.as_mut() else {
            engine::fatal("signal recovery without a jump region");
        };
        let cell = unsafe { &*thread_cell() };
        cell.in_handler.store(false, Ordering::Release);
        let signo = cell.pending.swap(0, Ordering::AcqRel);
        cell.active.store(&mut **region, Ordering::Release);

        engine::force_unwind_above(token.id);

        let exc = signal_exception(signo);
        state::put_raised(crate::exceptions::Raised {
            exc,
            file,
            line,
            message: None,
            data: None,
        });
        engine::mark_thrown(token);
    }
}

impl Drop for SignalScope {
    fn drop(&mut self) {
        if let Some(region) = self.region.as_ref() {
            let cell = thread_cell();
            if !cell.is_null() {
                unsafe { &*cell }.active.store(region.prev, Ordering::Release);
            }
        }
    }
}

/// `try_signal!` is `protected!` with the signal bridge armed across
/// the body: synchronous hardware signals raised while the body runs
/// are converted into catchable exceptions.
///
/// ```no_run
/// use ward_runtime::{sig_fpe, try_signal};
///
/// let mut recovered = false;
/// try_signal! {
///     try {
///         unsafe { libc::raise(libc::SIGFPE) };
///     }
///     catch (sig_fpe) {
///         recovered = true;
///     }
/// }
/// assert!(recovered);
/// ```
#[macro_export]
macro_rules! try_signal {
    (try $body:block $($clauses:tt)*) => {{
        let __ward_frame = $crate::state::frame_push();
        let mut __ward_scope = $crate::signals::SignalScope::enter();
        let __ward_jmp = __ward_scope.jump_slot();
        if __ward_jmp.is_null() {
            $crate::engine::run_body(&__ward_frame, || $body);
        } else if unsafe { $crate::signals::sigsetjmp(__ward_jmp, 1) } == 0 {
            __ward_scope.arm();
            $crate::engine::run_body(&__ward_frame, || $body);
            __ward_scope.disarm();
        } else {
            __ward_scope.recover(&__ward_frame, file!(), line!());
        }
        $crate::__ward_dispatch!(__ward_frame; $($clauses)*);
        $crate::engine::frame_leave(__ward_frame);
    }};
}
