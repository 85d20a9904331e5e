use std::cell::RefCell;

use crate::exceptions::Raised;
use crate::frame::Frame;

use super::lifecycle;

pub(crate) struct ThreadState {
    pub(crate) frames: Vec<Frame>,
    pub(crate) raised: Option<Raised>,
    pub(crate) defers: Vec<Box<dyn FnOnce()>>,
    pub(crate) frame_seq: u64,
    pub(crate) protect_seq: u64,
}

impl ThreadState {
    fn new() -> Self {
        Self {
            frames: Vec::new(),
            raised: None,
            defers: Vec::new(),
            frame_seq: 1,
            protect_seq: 1,
        }
    }
}

impl Drop for ThreadState {
    fn drop(&mut self) {
        lifecycle::teardown(self);
    }
}

thread_local! {
    pub(crate) static STATE: RefCell<ThreadState> = RefCell::new(ThreadState::new());
}
