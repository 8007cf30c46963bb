/// Macro for prefixed status logging to stderr (only when stderr is a terminal).
///
/// Usage:
/// ```ignore
/// log_status!("job", "Running task '{}'", description);
/// log_status!("fetch", "Checksum manifest unavailable: {}", err);
/// ```
#[macro_export]
macro_rules! log_status {
    ($prefix:expr, $($arg:tt)*) => {
        if ::std::io::IsTerminal::is_terminal(&::std::io::stderr()) {
            eprintln!(concat!("[", $prefix, "] {}"), format_args!($($arg)*));
        }
    };
}

pub mod core;
pub mod error;
pub mod utils;

// Re-export everything from core for ergonomic library use
// Users can write `buildhand::Task` instead of `buildhand::core::task::Task`
pub use crate::core::*;
pub use crate::error::{Error, ErrorCode, Result};
pub use crate::utils::*;
