//! Exception descriptors and the raised-record type.
//! A descriptor's identity is the address of its static; two descriptors
//! match only when they are the same static.

#![allow(non_upper_case_globals)]

use std::ffi::c_void;
use std::ptr;

pub struct Exception {
    name: &'static str,
    message: Option<&'static str>,
}

impl Exception {
    pub const fn new(name: &'static str, message: Option<&'static str>) -> Self {
        Self { name, message }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn default_message(&self) -> Option<&'static str> {
        self.message
    }

    pub fn same(a: &'static Exception, b: &'static Exception) -> bool {
        ptr::eq(a, b)
    }
}

pub static out_of_memory: Exception =
    Exception::new("out_of_memory", Some("memory allocation failed"));
pub static invalid_argument: Exception = Exception::new("invalid_argument", None);
pub static assertion_failure: Exception = Exception::new("assertion_failure", None);

pub static sig_segv: Exception = Exception::new("sig_segv", Some("segmentation fault"));
pub static sig_fpe: Exception = Exception::new("sig_fpe", Some("arithmetic fault"));
pub static sig_bus: Exception = Exception::new("sig_bus", Some("bus error"));
pub static sig_ill: Exception = Exception::new("sig_ill", Some("illegal instruction"));
pub static sig_abrt: Exception = Exception::new("sig_abrt", Some("abort requested"));
pub static sig_int: Exception = Exception::new("sig_int", Some("interrupt"));
pub static sig_term: Exception = Exception::new("sig_term", Some("termination request"));

#[cfg(unix)]
pub(crate) fn signal_exception(signo: libc::c_int) -> &'static Exception {
    match signo {
        libc::SIGSEGV => &sig_segv,
        libc::SIGFPE => &sig_fpe,
        libc::SIGBUS => &sig_bus,
        libc::SIGILL => &sig_ill,
        libc::SIGABRT => &sig_abrt,
        libc::SIGINT => &sig_int,
        libc::SIGTERM => &sig_term,
        _ => &invalid_argument,
    }
}

/// Live description of the exception currently propagating on the
/// calling thread. Owned by per-thread state, never by a frame's arena.
#[derive(Clone)]
pub struct Raised {
    pub(crate) exc: &'static Exception,
    pub(crate) file: &'static str,
    pub(crate) line: u32,
    pub(crate) message: Option<String>,
    pub(crate) data: Option<*mut c_void>,
}

impl Raised {
    pub fn name(&self) -> &'static str {
        self.exc.name()
    }

    pub fn file(&self) -> &'static str {
        self.file
    }

    pub fn line(&self) -> u32 {
        self.line
    }

    /// Message given at the throw site, falling back to the
    /// descriptor's default.
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref().or(self.exc.default_message())
    }

    pub fn data(&self) -> Option<*mut c_void> {
        self.data
    }

    pub fn is(&self, exc: &'static Exception) -> bool {
        Exception::same(self.exc, exc)
    }
}
