//! Command-line quoting, tokenizing and platform adaptation.

use crate::error::{Error, Result};

/// Quote a single argument for embedding in a command line.
/// - Arguments containing `"` are wrapped in single quotes
/// - Arguments containing `'` or a space are wrapped in double quotes
/// - Arguments containing both quote characters are a configuration error
/// - Everything else passes through unchanged
pub fn quote(arg: &str) -> Result<String> {
    let has_double = arg.contains('"');
    let has_single = arg.contains('\'');

    if has_double && has_single {
        return Err(Error::config_mixed_quotes(arg));
    }
    if has_double {
        return Ok(format!("'{}'", arg));
    }
    if has_single || arg.contains(' ') {
        return Ok(format!("\"{}\"", arg));
    }
    Ok(arg.to_string())
}

/// Quote and join multiple arguments into one command line.
pub fn quote_args(args: &[String]) -> Result<String> {
    let mut quoted = Vec::with_capacity(args.len());
    for arg in args {
        quoted.push(quote(arg)?);
    }
    Ok(quoted.join(" "))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    Normal,
    InSingleQuote,
    InDoubleQuote,
}

/// Split a command line into tokens.
///
/// Spaces outside quotes delimit tokens; quote characters are consumed as
/// delimiters, not preserved. An input that ends while still inside a quote
/// is a parse error.
pub fn tokenize(line: &str) -> Result<Vec<String>> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut state = ScanState::Normal;

    for c in line.chars() {
        match state {
            ScanState::Normal => match c {
                '\'' => {
                    state = ScanState::InSingleQuote;
                    in_token = true;
                }
                '"' => {
                    state = ScanState::InDoubleQuote;
                    in_token = true;
                }
                ' ' => {
                    if in_token {
                        tokens.push(std::mem::take(&mut current));
                        in_token = false;
                    }
                }
                _ => {
                    current.push(c);
                    in_token = true;
                }
            },
            ScanState::InSingleQuote => match c {
                '\'' => state = ScanState::Normal,
                _ => current.push(c),
            },
            ScanState::InDoubleQuote => match c {
                '"' => state = ScanState::Normal,
                _ => current.push(c),
            },
        }
    }

    if state != ScanState::Normal {
        return Err(Error::config_unbalanced_quotes(line));
    }
    if in_token {
        tokens.push(current);
    }

    Ok(tokens)
}

/// Target shell family for raw command strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Posix,
    Windows,
}

impl Platform {
    pub fn current() -> Self {
        if cfg!(windows) {
            Platform::Windows
        } else {
            Platform::Posix
        }
    }
}

/// Wrap a raw command string for the platform's native shell.
///
/// Non-POSIX shells get `cmd /c` with path separators normalized; POSIX
/// shells run the string unchanged under `sh -c`.
pub fn hosted_shell_command(platform: Platform, raw: &str) -> (String, Vec<String>) {
    match platform {
        Platform::Posix => ("sh".to_string(), vec!["-c".to_string(), raw.to_string()]),
        Platform::Windows => (
            "cmd".to_string(),
            vec!["/c".to_string(), raw.replace('/', "\\")],
        ),
    }
}
