//! Per-thread engine state: the frame stack and the raised-record slot.
//! Lazily initialized on first use; torn down when the thread exits.

pub(crate) mod lifecycle;
pub(crate) mod tls;

pub use lifecycle::defer_thread;

use crate::arena::Arena;
use crate::engine;
use crate::exceptions::{invalid_argument, Raised};
use crate::frame::{Frame, FrameState, FrameToken};
use crate::throw;

use tls::{ThreadState, STATE};

pub(crate) fn with_state<R>(f: impl FnOnce(&mut ThreadState) -> R) -> R {
    STATE.with(|st| f(&mut st.borrow_mut()))
}

/// Number of live protected regions on the calling thread.
pub fn frame_depth() -> usize {
    with_state(|st| st.frames.len())
}

#[doc(hidden)]
pub fn frame_push() -> FrameToken {
    with_state(|st| {
        let id = st.frame_seq;
        st.frame_seq += 1;
        st.frames.push(Frame::new(id));
        FrameToken { id }
    })
}

/// Pop the frame named by `id`, which must be the top of the stack.
pub(crate) fn pop_checked(id: u64) -> Frame {
    with_state(|st| {
        match st.frames.last() {
            Some(top) if top.id == id => {}
            _ => engine::fatal("protected region popped out of order"),
        }
        st.frames.pop().unwrap()
    })
}

pub(crate) fn frame_state(id: u64) -> FrameState {
    with_state(|st| match st.frames.last() {
        Some(top) if top.id == id => top.state,
        _ => engine::fatal("protected region accessed out of order"),
    })
}

pub(crate) fn set_frame_state(id: u64, state: FrameState) {
    with_state(|st| match st.frames.last_mut() {
        Some(top) if top.id == id => top.state = state,
        _ => engine::fatal("protected region accessed out of order"),
    })
}

pub(crate) fn take_raised() -> Option<Raised> {
    with_state(|st| st.raised.take())
}

pub(crate) fn put_raised(record: Raised) {
    with_state(|st| st.raised = Some(record));
}

pub(crate) fn clone_raised() -> Option<Raised> {
    with_state(|st| st.raised.clone())
}

/// Allocate from the innermost frame's arena, creating the arena on
/// first use. The memory lives until that frame is popped.
pub fn scope_alloc(nbytes: usize) -> *mut u8 {
    let mut arena = take_scope_arena();
    let slot = arena.try_alloc(nbytes);
    restore_scope_arena(arena);
    match slot {
        Some(ptr) => ptr,
        None => throw!(crate::exceptions::out_of_memory),
    }
}

/// Zeroed variant of [`scope_alloc`].
pub fn scope_calloc(count: usize, size: usize) -> *mut u8 {
    if count == 0 || size == 0 {
        throw!(invalid_argument, "zero-sized scoped allocation");
    }
    let Some(total) = count.checked_mul(size) else {
        throw!(invalid_argument, "scoped allocation overflows");
    };
    let ptr = scope_alloc(total);
    if !ptr.is_null() {
        unsafe { std::ptr::write_bytes(ptr, 0, total) };
    }
    ptr
}

fn take_scope_arena() -> Arena {
    with_state(|st| {
        let Some(top) = st.frames.last_mut() else {
            engine::fatal("scoped allocation with no active protected region");
        };
        top.arena.take()
    })
    .unwrap_or_default()
}

fn restore_scope_arena(arena: Arena) {
    with_state(|st| {
        if let Some(top) = st.frames.last_mut() {
            top.arena = Some(arena);
        }
    });
}
