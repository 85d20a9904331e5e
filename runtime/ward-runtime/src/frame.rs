//! One activation of a protected region, and the finalizers it owns.

use std::any::Any;

use crate::arena::Arena;
use crate::engine;
use crate::exceptions::Raised;
use crate::state;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum FrameState {
    Trying,
    Thrown,
    Handled,
    Finalizing,
    Done,
}

/// An unwind event waiting for the frame's epilogue: either an engine
/// record deferred from a handler/finalizer, or a non-engine panic
/// payload passing through.
pub(crate) enum Pending {
    Raise(Raised),
    Foreign(Box<dyn Any + Send>),
}

pub(crate) struct ProtectEntry {
    pub(crate) seq: u64,
    pub(crate) release: Option<Box<dyn FnOnce()>>,
}

pub(crate) struct Frame {
    pub(crate) id: u64,
    pub(crate) state: FrameState,
    pub(crate) protects: Vec<ProtectEntry>,
    pub(crate) arena: Option<Arena>,
    pub(crate) pending: Option<Pending>,
}

impl Frame {
    pub(crate) fn new(id: u64) -> Self {
        Self {
            id,
            state: FrameState::Trying,
            protects: Vec::new(),
            arena: None,
            pending: None,
        }
    }
}

/// Token for one live protected region. Produced by the surface macros;
/// consumed by the frame epilogue.
#[doc(hidden)]
pub struct FrameToken {
    pub(crate) id: u64,
}

/// Detachable reference to a registered finalizer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProtectHandle {
    frame: u64,
    seq: u64,
}

/// Register `release` with the innermost protected region. It runs
/// when the region exits, on every path, unless detached first.
/// Later registrations run first.
pub fn protect<F: FnOnce() + 'static>(release: F) -> ProtectHandle {
    state::with_state(|st| {
        let seq = st.protect_seq;
        st.protect_seq += 1;
        let Some(top) = st.frames.last_mut() else {
            engine::fatal("protect with no active protected region");
        };
        top.protects.push(ProtectEntry {
            seq,
            release: Some(Box::new(release)),
        });
        ProtectHandle {
            frame: top.id,
            seq,
        }
    })
}

/// Detach a finalizer without running it. Detaching one that already
/// ran or was already detached is a no-op; a handle whose frame is no
/// longer live on this thread is a programming error.
pub fn unprotect(handle: ProtectHandle) {
    state::with_state(|st| {
        let Some(frame) = st.frames.iter_mut().rev().find(|f| f.id == handle.frame) else {
            engine::fatal("unprotect of a handle from a dead or foreign frame");
        };
        frame.protects.retain(|entry| entry.seq != handle.seq);
    })
}
