//! Command-line model: arguments, secret marking and process specifications.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::utils::redact::{Redactor, MASK};
use crate::utils::shell::{self, Platform};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ArgKind {
    Plain,
    Secret,
}

/// A single command-line argument. Secret arguments render as the fixed
/// mask in every display string, log line and error message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Argument {
    pub value: String,
    pub kind: ArgKind,
}

impl Argument {
    pub fn plain(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            kind: ArgKind::Plain,
        }
    }

    pub fn secret(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            kind: ArgKind::Secret,
        }
    }

    pub fn is_secret(&self) -> bool {
        self.kind == ArgKind::Secret
    }

    /// The value as it may appear in any rendered text.
    pub fn for_display(&self) -> &str {
        match self.kind {
            ArgKind::Plain => &self.value,
            ArgKind::Secret => MASK,
        }
    }
}

/// Text encoding of a process's console streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Encoding {
    #[default]
    Utf8,
    Latin1,
}

impl Encoding {
    pub fn decode(&self, bytes: &[u8]) -> String {
        match self {
            Encoding::Utf8 => String::from_utf8_lossy(bytes).to_string(),
            Encoding::Latin1 => bytes.iter().map(|&b| b as char).collect(),
        }
    }
}

/// Everything needed to spawn one external process.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandSpec {
    pub executable: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<Argument>,
    pub working_dir: PathBuf,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, Argument>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stdin_lines: Vec<String>,
    #[serde(default)]
    pub encoding: Encoding,
}

impl CommandSpec {
    pub fn new(executable: impl Into<String>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            args: Vec::new(),
            working_dir: working_dir.into(),
            env: BTreeMap::new(),
            stdin_lines: Vec::new(),
            encoding: Encoding::default(),
        }
    }

    /// A spec that runs a raw command string under the platform's native
    /// shell (`sh -c` on POSIX, `cmd /c` with translated paths elsewhere).
    pub fn shell(raw: impl AsRef<str>, working_dir: impl Into<PathBuf>) -> Self {
        let (executable, args) = shell::hosted_shell_command(Platform::current(), raw.as_ref());
        let mut spec = Self::new(executable, working_dir);
        spec.args = args.into_iter().map(Argument::plain).collect();
        spec
    }

    pub fn arg(mut self, value: impl Into<String>) -> Self {
        self.args.push(Argument::plain(value));
        self
    }

    pub fn secret_arg(mut self, value: impl Into<String>) -> Self {
        self.args.push(Argument::secret(value));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), Argument::plain(value));
        self
    }

    pub fn secret_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), Argument::secret(value));
        self
    }

    pub fn stdin_line(mut self, line: impl Into<String>) -> Self {
        self.stdin_lines.push(line.into());
        self
    }

    /// Raw argument values, in order, for handing to the OS.
    pub fn os_args(&self) -> Vec<String> {
        self.args.iter().map(|a| a.value.clone()).collect()
    }

    /// Redactor seeded with every secret this spec carries: secret
    /// arguments and secret environment values.
    pub fn redactor(&self) -> Redactor {
        let mut redactor = Redactor::new();
        for arg in self.args.iter().filter(|a| a.is_secret()) {
            redactor.register(arg.value.clone());
        }
        for value in self.env.values().filter(|v| v.is_secret()) {
            redactor.register(value.value.clone());
        }
        redactor
    }

    /// The one formatting function for this spec. Secret arguments render
    /// as the mask and the redactor scrubs any other registered secret from
    /// the final string, so the result is safe for logs, console lines and
    /// error messages.
    pub fn describe(&self, redactor: &Redactor) -> String {
        let rendered: Vec<String> = self
            .args
            .iter()
            .map(|a| {
                let display = a.for_display();
                shell::quote(display).unwrap_or_else(|_| display.to_string())
            })
            .collect();
        let line = if rendered.is_empty() {
            self.executable.clone()
        } else {
            format!("{} {}", self.executable, rendered.join(" "))
        };
        redactor.apply(&format!("{} (in {})", line, self.working_dir.display()))
    }

    pub fn check_working_dir(&self) -> Result<()> {
        let dir: &Path = &self.working_dir;
        if !dir.is_dir() {
            return Err(Error::config_working_dir_missing(
                dir.display().to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn describe_masks_secret_arguments() {
        let spec = CommandSpec::new("deploy", "/tmp")
            .arg("--user")
            .arg("builder")
            .arg("--password")
            .secret_arg("s3cr3t");
        let described = spec.describe(&spec.redactor());
        assert!(!described.contains("s3cr3t"));
        assert!(described.contains(MASK));
        assert!(described.contains("--user builder"));
    }

    #[test]
    fn redactor_includes_secret_env_values() {
        let spec = CommandSpec::new("run", "/tmp").secret_env("API_TOKEN", "t0ken-value");
        let redactor = spec.redactor();
        assert_eq!(redactor.apply("leaked t0ken-value here"), format!("leaked {} here", MASK));
    }

    #[test]
    fn describe_quotes_arguments_with_spaces() {
        let spec = CommandSpec::new("echo", "/tmp").arg("hello world");
        let described = spec.describe(&Redactor::new());
        assert!(described.contains("\"hello world\""));
    }

    #[test]
    fn missing_working_dir_fails_before_spawn() {
        let spec = CommandSpec::new("true", "/definitely/not/here");
        let err = spec.check_working_dir().unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::ConfigWorkingDirMissing);
    }

    #[test]
    fn latin1_decodes_high_bytes() {
        assert_eq!(Encoding::Latin1.decode(&[0x61, 0xE9]), "aé");
        assert_eq!(Encoding::Utf8.decode("plain".as_bytes()), "plain");
    }

    #[test]
    fn shell_spec_wraps_raw_string() {
        let spec = CommandSpec::shell("echo a && echo b", "/tmp");
        assert!(spec.args.len() == 2);
        assert_eq!(spec.args[1].value, "echo a && echo b");
    }
}
