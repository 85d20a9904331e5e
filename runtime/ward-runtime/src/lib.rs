//! Ward runtime core.
//! Structured exceptions for code with no native unwinding story:
//! TRY/CATCH/FINALLY regions with guaranteed finalizer execution,
//! translation of synchronous hardware signals into catchable
//! exceptions, and scoped arena allocation tied to protected regions.

pub mod arena;
pub mod engine;
pub mod exceptions;
pub mod frame;
#[cfg(unix)]
pub mod signals;
pub mod state;

pub use arena::{free_count, threshold, try_calloc, try_malloc, try_realloc, Arena};
pub use engine::{current, rethrow, throw_raw, throw_with_data};
pub use exceptions::{
    assertion_failure, invalid_argument, out_of_memory, sig_abrt, sig_bus, sig_fpe, sig_ill,
    sig_int, sig_segv, sig_term, Exception, Raised,
};
pub use frame::{protect, unprotect, ProtectHandle};
pub use state::{defer_thread, frame_depth, scope_alloc, scope_calloc};

/// Declare an exception descriptor. Identity is the static's address:
/// two descriptors never match, whatever their names.
///
/// ```
/// use ward_runtime::exception;
///
/// exception!(division_by_zero);
/// exception!(parse_failure, "input rejected");
/// ```
#[macro_export]
macro_rules! exception {
    ($(#[$meta:meta])* $vis:vis $name:ident) => {
        $(#[$meta])*
        #[allow(non_upper_case_globals)]
        $vis static $name: $crate::exceptions::Exception =
            $crate::exceptions::Exception::new(
                ::core::stringify!($name),
                ::core::option::Option::None,
            );
    };
    ($(#[$meta:meta])* $vis:vis $name:ident, $message:expr) => {
        $(#[$meta])*
        #[allow(non_upper_case_globals)]
        $vis static $name: $crate::exceptions::Exception =
            $crate::exceptions::Exception::new(
                ::core::stringify!($name),
                ::core::option::Option::Some($message),
            );
    };
}

/// Raise an exception from the current source position, optionally with
/// a formatted message. Never returns.
#[macro_export]
macro_rules! throw {
    ($exc:path) => {
        $crate::engine::throw_raw(
            &$exc,
            ::core::file!(),
            ::core::line!(),
            ::core::option::Option::None,
            ::core::option::Option::None,
        )
    };
    ($exc:path, $($message:tt)+) => {
        $crate::engine::throw_raw(
            &$exc,
            ::core::file!(),
            ::core::line!(),
            ::core::option::Option::Some(::std::format!($($message)+)),
            ::core::option::Option::None,
        )
    };
}

/// Internal-invariant check that raises `assertion_failure` instead of
/// panicking.
#[macro_export]
macro_rules! ward_assert {
    ($cond:expr) => {
        if !$cond {
            $crate::throw!(
                $crate::exceptions::assertion_failure,
                "assertion failed: {}",
                ::core::stringify!($cond)
            );
        }
    };
}
