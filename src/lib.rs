/// Macro for prefixed status logging to stderr (only when stderr is a terminal).
///
/// Usage:
/// ```ignore
/// log_status!("cleanup", "Warning: could not remove {}", alias);
/// ```
#[macro_export]
macro_rules! log_status {
    ($prefix:expr, $($arg:tt)*) => {
        if ::std::io::IsTerminal::is_terminal(&::std::io::stderr()) {
            eprintln!(concat!("[", $prefix, "] {}"), format_args!($($arg)*));
        }
    };
}

/// Prefixed step tracing to stdout, printed only when `--debug` is on.
///
/// ```ignore
/// log_debug!("tunnel", "{} {}", binary, args.join(" "));
/// ```
#[macro_export]
macro_rules! log_debug {
    ($prefix:expr, $($arg:tt)*) => {
        if $crate::debug::enabled() {
            println!(concat!("[", $prefix, "] {}"), format_args!($($arg)*));
        }
    };
}

pub mod core;
pub mod utils;

// Re-export everything from core for ergonomic library use
// Users can write `airlift::pipeline` instead of `airlift::core::pipeline`
pub use core::*;
pub use utils::*;
