use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ConfigWorkingDirMissing,
    ConfigMixedQuotes,
    ConfigUnbalancedQuotes,

    ExecCommandFailed,
    ExecErrorMarker,
    ExecForcedFailure,
    ExecRetryTimeout,
    ExecCancelled,

    TransportSpawnFailed,

    FetchTransportFailed,

    InternalIoError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ConfigWorkingDirMissing => "config.working_dir_missing",
            ErrorCode::ConfigMixedQuotes => "config.mixed_quotes",
            ErrorCode::ConfigUnbalancedQuotes => "config.unbalanced_quotes",

            ErrorCode::ExecCommandFailed => "exec.command_failed",
            ErrorCode::ExecErrorMarker => "exec.error_marker",
            ErrorCode::ExecForcedFailure => "exec.forced_failure",
            ErrorCode::ExecRetryTimeout => "exec.retry_timeout",
            ErrorCode::ExecCancelled => "exec.cancelled",

            ErrorCode::TransportSpawnFailed => "transport.spawn_failed",

            ErrorCode::FetchTransportFailed => "fetch.transport_failed",

            ErrorCode::InternalIoError => "internal.io_error",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hint {
    pub message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkingDirMissingDetails {
    pub path: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotingDetails {
    pub argument: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenizingDetails {
    pub line: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandFailedDetails {
    pub command: String,
    pub exit_code: i32,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub last_output: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorMarkerDetails {
    pub command: String,
    pub marker: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryTimeoutDetails {
    pub command: String,
    pub timeout_ms: u64,
    pub attempts: u32,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub last_output: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpawnFailedDetails {
    pub executable: String,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_path: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchFailedDetails {
    pub locator: String,
    pub error: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InternalIoErrorDetails {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Error {
    pub code: ErrorCode,
    pub message: String,
    pub details: Value,
    pub hints: Vec<Hint>,
    pub retryable: Option<bool>,
}

pub type Result<T> = std::result::Result<T, Error>;

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for Error {}

impl Error {
    pub fn new(code: ErrorCode, message: impl Into<String>, details: Value) -> Self {
        Self {
            code,
            message: message.into(),
            details,
            hints: Vec::new(),
            retryable: None,
        }
    }

    pub fn config_working_dir_missing(path: impl Into<String>) -> Self {
        let path = path.into();
        let details = serde_json::to_value(WorkingDirMissingDetails { path: path.clone() })
            .unwrap_or_else(|_| Value::Object(serde_json::Map::new()));
        Self::new(
            ErrorCode::ConfigWorkingDirMissing,
            format!("Working directory '{}' does not exist or is not a directory", path),
            details,
        )
        .not_retryable()
    }

    pub fn config_mixed_quotes(argument: impl Into<String>) -> Self {
        let details = serde_json::to_value(QuotingDetails {
            argument: argument.into(),
        })
        .unwrap_or_else(|_| Value::Object(serde_json::Map::new()));
        Self::new(
            ErrorCode::ConfigMixedQuotes,
            "Cannot mix single and double quotes in one argument",
            details,
        )
        .not_retryable()
    }

    pub fn config_unbalanced_quotes(line: impl Into<String>) -> Self {
        let details = serde_json::to_value(TokenizingDetails { line: line.into() })
            .unwrap_or_else(|_| Value::Object(serde_json::Map::new()));
        Self::new(
            ErrorCode::ConfigUnbalancedQuotes,
            "Unbalanced quotes in command line",
            details,
        )
        .not_retryable()
    }

    pub fn exec_command_failed(
        command: impl Into<String>,
        exit_code: i32,
        last_output: impl Into<String>,
    ) -> Self {
        let command = command.into();
        let details = serde_json::to_value(CommandFailedDetails {
            command: command.clone(),
            exit_code,
            last_output: last_output.into(),
        })
        .unwrap_or_else(|_| Value::Object(serde_json::Map::new()));
        Self::new(
            ErrorCode::ExecCommandFailed,
            format!("{} failed with exit code {}", command, exit_code),
            details,
        )
        .retryable()
    }

    pub fn exec_error_marker(command: impl Into<String>, marker: impl Into<String>) -> Self {
        let command = command.into();
        let marker = marker.into();
        let details = serde_json::to_value(ErrorMarkerDetails {
            command: command.clone(),
            marker: marker.clone(),
        })
        .unwrap_or_else(|_| Value::Object(serde_json::Map::new()));
        Self::new(
            ErrorCode::ExecErrorMarker,
            format!(
                "{} failed: console output matched error marker '{}'",
                command, marker
            ),
            details,
        )
        .retryable()
    }

    pub fn exec_forced_failure(reason: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::ExecForcedFailure,
            reason,
            Value::Object(serde_json::Map::new()),
        )
        .not_retryable()
    }

    pub fn exec_retry_timeout(
        command: impl Into<String>,
        timeout_ms: u64,
        attempts: u32,
        last_output: impl Into<String>,
    ) -> Self {
        let command = command.into();
        let last_output = last_output.into();
        let details = serde_json::to_value(RetryTimeoutDetails {
            command: command.clone(),
            timeout_ms,
            attempts,
            last_output: last_output.clone(),
        })
        .unwrap_or_else(|_| Value::Object(serde_json::Map::new()));
        Self::new(
            ErrorCode::ExecRetryTimeout,
            format!(
                "{} did not succeed after {} attempts in {}ms; last output: {}",
                command, attempts, timeout_ms, last_output
            ),
            details,
        )
        .not_retryable()
    }

    pub fn exec_cancelled(command: impl Into<String>) -> Self {
        let command = command.into();
        Self::new(
            ErrorCode::ExecCancelled,
            format!("{} was cancelled", command),
            serde_json::json!({ "command": command }),
        )
        .not_retryable()
    }

    pub fn transport_spawn_failed(
        executable: impl Into<String>,
        error: impl Into<String>,
        search_path: Option<String>,
    ) -> Self {
        let executable = executable.into();
        let details = serde_json::to_value(SpawnFailedDetails {
            executable: executable.clone(),
            error: error.into(),
            search_path,
        })
        .unwrap_or_else(|_| Value::Object(serde_json::Map::new()));
        Self::new(
            ErrorCode::TransportSpawnFailed,
            format!("Could not start '{}'", executable),
            details,
        )
        .with_hint(format!(
            "Check that '{}' is installed and on the search path of the build user",
            executable
        ))
        .not_retryable()
    }

    pub fn fetch_transport_failed(locator: impl Into<String>, error: impl Into<String>) -> Self {
        let locator = locator.into();
        let error = error.into();
        let details = serde_json::to_value(FetchFailedDetails {
            locator: locator.clone(),
            error: error.clone(),
        })
        .unwrap_or_else(|_| Value::Object(serde_json::Map::new()));
        Self::new(
            ErrorCode::FetchTransportFailed,
            format!("Failed to fetch '{}': {}", locator, error),
            details,
        )
        .not_retryable()
    }

    pub fn internal_io(error: impl Into<String>, context: Option<String>) -> Self {
        let details = serde_json::to_value(InternalIoErrorDetails {
            error: error.into(),
            context,
        })
        .unwrap_or_else(|_| Value::Object(serde_json::Map::new()));
        Self::new(ErrorCode::InternalIoError, "IO error", details).not_retryable()
    }

    pub fn with_hint(mut self, message: impl Into<String>) -> Self {
        self.hints.push(Hint {
            message: message.into(),
        });
        self
    }

    fn retryable(mut self) -> Self {
        self.retryable = Some(true);
        self
    }

    fn not_retryable(mut self) -> Self {
        self.retryable = Some(false);
        self
    }
}
