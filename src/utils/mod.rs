//! Generic utility primitives with zero domain knowledge.
//!
//! - `redact` - Secret masking for console output and error messages
//! - `shell` - Command-line quoting, tokenizing and platform adaptation

pub mod redact;
pub mod shell;
