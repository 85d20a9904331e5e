//! Throw, match, rethrow, and the frame epilogue that guarantees
//! finalizer execution on every exit path.
//!
//! Control transfer rides the native unwinder: `throw_raw` stores the
//! record in per-thread state and unwinds with a private token; the
//! innermost frame boundary catches the token and dispatches. Panics
//! that did not come from the engine pass through every clause untouched,
//! but still drain the protection list before resuming.

use std::any::Any;
use std::ffi::c_void;
use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::process;

use crate::exceptions::{Exception, Raised};
use crate::frame::{FrameState, FrameToken, Pending};
use crate::state;

pub(crate) struct ThrowSignal;

/// Raise `exc` from the given source position. Never returns; with no
/// protected region on the calling thread this terminates the process.
pub fn throw_raw(
    exc: &'static Exception,
    file: &'static str,
    line: u32,
    message: Option<String>,
    data: Option<*mut c_void>,
) -> ! {
    let record = Raised {
        exc,
        file,
        line,
        message,
        data,
    };
    if state::frame_depth() == 0 {
        uncaught_fatal(&record);
    }
    state::put_raised(record);
    resume_unwind(Box::new(ThrowSignal))
}

/// Raise with an opaque payload pointer readable through
/// [`Raised::data`] in the handler.
#[track_caller]
pub fn throw_with_data(exc: &'static Exception, data: *mut c_void) -> ! {
    let site = std::panic::Location::caller();
    throw_raw(exc, site.file(), site.line(), None, Some(data))
}

/// Re-emit the record currently propagating on this thread into the
/// enclosing frame. Calling this with no active record is fatal.
pub fn rethrow() -> ! {
    let record = state::clone_raised();
    let Some(record) = record else {
        fatal("rethrow with no active exception");
    };
    if state::frame_depth() == 0 {
        uncaught_fatal(&record);
    }
    resume_unwind(Box::new(ThrowSignal))
}

/// Snapshot of the record currently propagating on this thread, if any.
pub fn current() -> Option<Raised> {
    state::clone_raised()
}

#[doc(hidden)]
pub fn run_body<F: FnOnce()>(token: &FrameToken, body: F) {
    match catch_unwind(AssertUnwindSafe(body)) {
        Ok(()) => {}
        Err(payload) => {
            if payload.is::<ThrowSignal>() {
                mark_thrown(token);
            } else {
                supersede(token.id, Pending::Foreign(payload));
            }
        }
    }
}

/// Transition to THROWN and park a copy of the record in the frame's
/// deferred slot right away. The per-thread slot is clobbered by the
/// next throw (a `finally` clause may throw before the epilogue runs);
/// the deferred slot is not, so a superseded record is always seen and
/// reported.
pub(crate) fn mark_thrown(token: &FrameToken) {
    state::set_frame_state(token.id, FrameState::Thrown);
    if let Some(record) = state::clone_raised() {
        supersede(token.id, Pending::Raise(record));
    }
}

#[doc(hidden)]
pub fn matches(token: &FrameToken, filter: Option<&'static Exception>) -> bool {
    if state::frame_state(token.id) != FrameState::Thrown {
        return false;
    }
    match (state::clone_raised(), filter) {
        (Some(record), Some(exc)) => record.is(exc),
        (Some(_), None) => true,
        (None, _) => false,
    }
}

#[doc(hidden)]
pub fn run_handler<F: FnOnce()>(token: &FrameToken, handler: F) {
    state::set_frame_state(token.id, FrameState::Handled);
    // the parked copy is consumed by the catch, not lost
    state::with_state(|st| {
        if let Some(frame) = st.frames.iter_mut().rev().find(|f| f.id == token.id) {
            frame.pending = None;
        }
    });
    run_clause(token, handler);
}

#[doc(hidden)]
pub fn run_finally<F: FnOnce()>(token: &FrameToken, body: F) {
    run_clause(token, body);
}

fn run_clause<F: FnOnce()>(token: &FrameToken, body: F) {
    if let Err(payload) = catch_unwind(AssertUnwindSafe(body)) {
        absorb_unwind(token.id, payload);
    }
}

/// Finish the region: drain finalizers LIFO, release the arena, pop the
/// frame, then either fall through or re-raise whatever is pending.
#[doc(hidden)]
pub fn frame_leave(token: FrameToken) {
    let prior = state::frame_state(token.id);
    state::set_frame_state(token.id, FrameState::Finalizing);
    drain_protects(token.id);

    let mut frame = state::pop_checked(token.id);
    frame.state = FrameState::Done;
    drop(frame.arena.take());

    match frame.pending.take() {
        Some(Pending::Raise(record)) => {
            if state::frame_depth() == 0 {
                uncaught_fatal(&record);
            }
            state::put_raised(record);
            resume_unwind(Box::new(ThrowSignal))
        }
        Some(Pending::Foreign(payload)) => resume_unwind(payload),
        None => {
            if prior == FrameState::Handled {
                // the record dies when its catch completes
                state::take_raised();
            }
        }
    }
}

fn drain_protects(id: u64) {
    loop {
        let entry = state::with_state(|st| match st.frames.last_mut() {
            Some(top) if top.id == id => top.protects.pop(),
            _ => fatal("protection drain out of order"),
        });
        let Some(mut entry) = entry else { break };
        let Some(release) = entry.release.take() else {
            continue;
        };
        if let Err(payload) = catch_unwind(AssertUnwindSafe(release)) {
            absorb_unwind(id, payload);
        }
    }
}

fn absorb_unwind(id: u64, payload: Box<dyn Any + Send>) {
    if payload.is::<ThrowSignal>() {
        if let Some(record) = state::take_raised() {
            supersede(id, Pending::Raise(record));
        }
    } else {
        supersede(id, Pending::Foreign(payload));
    }
}

/// Arm the frame's deferred slot. An occupant is superseded, never
/// silently dropped: the older record is reported as lost.
pub(crate) fn supersede(id: u64, pending: Pending) {
    state::with_state(|st| {
        let Some(frame) = st.frames.iter_mut().rev().find(|f| f.id == id) else {
            fatal("deferred exception with no owning frame");
        };
        if let Some(old) = frame.pending.take() {
            report_lost(old);
        }
        frame.pending = Some(pending);
    })
}

/// Every discarded unwind event is reported; nothing is dropped
/// silently.
fn report_lost(old: Pending) {
    match old {
        Pending::Raise(record) => {
            eprintln!("ward: exception {} lost during cleanup", record.name());
        }
        Pending::Foreign(_) => {
            eprintln!("ward: panic payload lost during cleanup");
        }
    }
}

/// Dismantle frames stacked above `id` without running their clauses.
/// Used when a signal recovery lands below them; their finalizers and
/// arenas are still released, in order.
pub(crate) fn force_unwind_above(id: u64) {
    loop {
        let at_target = state::with_state(|st| match st.frames.last() {
            Some(top) => top.id == id,
            None => fatal("signal recovery lost its frame"),
        });
        if at_target {
            break;
        }
        loop {
            let entry =
                state::with_state(|st| st.frames.last_mut().and_then(|f| f.protects.pop()));
            let Some(mut entry) = entry else { break };
            let Some(release) = entry.release.take() else {
                continue;
            };
            if let Err(payload) = catch_unwind(AssertUnwindSafe(release)) {
                if payload.is::<ThrowSignal>() {
                    if let Some(record) = state::take_raised() {
                        report_lost(Pending::Raise(record));
                    }
                } else {
                    report_lost(Pending::Foreign(payload));
                }
            }
        }
        let frame = state::with_state(|st| st.frames.pop());
        if let Some(mut frame) = frame {
            if let Some(old) = frame.pending.take() {
                report_lost(old);
            }
            drop(frame.arena.take());
        }
    }
}

/// Uncaught exception: diagnostic on stderr, non-zero exit.
pub(crate) fn uncaught_fatal(record: &Raised) -> ! {
    match record.message() {
        Some(message) => eprintln!(
            "Uncaught {} at {}:{}: {}",
            record.name(),
            record.file(),
            record.line(),
            message
        ),
        None => eprintln!(
            "Uncaught {} at {}:{}",
            record.name(),
            record.file(),
            record.line()
        ),
    }
    process::exit(1)
}

/// Contract violation: diagnostic on stderr, non-zero exit. These are
/// programmer errors, not catchable exceptions.
pub(crate) fn fatal(message: &str) -> ! {
    eprintln!("ward: {message}");
    process::exit(1)
}

/// The TRY/CATCH/CATCH_ANY/FINALLY surface. Clauses are evaluated in
/// source order, first match wins, `finally` runs last regardless.
///
/// ```
/// use ward_runtime::{exception, protected, throw};
///
/// exception!(parse_failure);
///
/// let mut seen = None;
/// protected! {
///     try {
///         throw!(parse_failure, "line {}", 3);
///     }
///     catch (parse_failure) {
///         seen = ward_runtime::current().map(|r| r.line());
///     }
/// }
/// assert!(seen.is_some());
/// ```
#[macro_export]
macro_rules! protected {
    (try $body:block $($clauses:tt)*) => {{
        let __ward_frame = $crate::state::frame_push();
        $crate::engine::run_body(&__ward_frame, || $body);
        $crate::__ward_dispatch!(__ward_frame; $($clauses)*);
        $crate::engine::frame_leave(__ward_frame);
    }};
}

#[doc(hidden)]
#[macro_export]
macro_rules! __ward_dispatch {
    ($frame:ident;) => {};
    ($frame:ident; catch ($exc:path) $handler:block $($rest:tt)*) => {
        if $crate::engine::matches(&$frame, ::core::option::Option::Some(&$exc)) {
            $crate::engine::run_handler(&$frame, || $handler);
            $crate::__ward_finally_only!($frame; $($rest)*);
        } else {
            $crate::__ward_dispatch!($frame; $($rest)*);
        }
    };
    ($frame:ident; catch_any $handler:block $($rest:tt)*) => {
        if $crate::engine::matches(&$frame, ::core::option::Option::None) {
            $crate::engine::run_handler(&$frame, || $handler);
            $crate::__ward_finally_only!($frame; $($rest)*);
        } else {
            $crate::__ward_dispatch!($frame; $($rest)*);
        }
    };
    ($frame:ident; finally $body:block) => {
        $crate::engine::run_finally(&$frame, || $body);
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! __ward_finally_only {
    ($frame:ident;) => {};
    ($frame:ident; catch ($exc:path) $handler:block $($rest:tt)*) => {
        $crate::__ward_finally_only!($frame; $($rest)*);
    };
    ($frame:ident; catch_any $handler:block $($rest:tt)*) => {
        $crate::__ward_finally_only!($frame; $($rest)*);
    };
    ($frame:ident; finally $body:block) => {
        $crate::engine::run_finally(&$frame, || $body);
    };
}
