//! Process execution engine: spawn, console streaming, failure detection
//! and bounded retry.

use std::io::{BufRead, BufReader, Read, Write};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::core::command::{CommandSpec, Encoding};
use crate::core::console::{ConsoleBuffer, ConsoleSink, ErrorMarker, StreamTag};
use crate::error::{Error, Result};
use crate::utils::redact::Redactor;

/// Flat polling interval for child-exit and cancellation checks.
const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Out-of-band cancellation flag, shared between the job driver and the
/// worker thread blocked on a running process.
#[derive(Debug, Clone, Default)]
pub struct CancelSignal(Arc<AtomicBool>);

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Captured outcome of one process execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub exit_code: i32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stdout: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stderr: Vec<String>,
    /// Some legacy tools exit non-zero on success and must be exempted
    /// from exit-code failure detection.
    pub treat_nonzero_exit_as_failure: bool,
}

impl ExecutionResult {
    pub fn empty() -> Self {
        Self {
            exit_code: 0,
            stdout: Vec::new(),
            stderr: Vec::new(),
            treat_nonzero_exit_as_failure: true,
        }
    }

    /// The last `n` captured lines across both streams, stdout first.
    pub fn tail(&self, n: usize) -> String {
        let combined: Vec<&str> = self
            .stdout
            .iter()
            .chain(self.stderr.iter())
            .map(|s| s.as_str())
            .collect();
        let start = combined.len().saturating_sub(n);
        combined[start..].join("\n")
    }
}

/// Per-execution knobs carried by the owning task.
#[derive(Debug, Clone)]
pub struct ExecOptions {
    pub error_markers: Vec<String>,
    pub treat_nonzero_exit_as_failure: bool,
    /// Secret values in scope beyond the spec's own (e.g. job-level
    /// secret environment values).
    pub extra_secrets: Vec<String>,
}

impl Default for ExecOptions {
    fn default() -> Self {
        Self {
            error_markers: Vec::new(),
            treat_nonzero_exit_as_failure: true,
            extra_secrets: Vec::new(),
        }
    }
}

pub(crate) struct Captured {
    pub result: ExecutionResult,
    pub marker: Option<String>,
    pub pid: u32,
    pub describe: String,
}

/// Spawn the command and stream its console until exit or cancellation.
///
/// Only configuration and transport problems are `Err` here; a completed
/// process is `Ok` regardless of exit code, with failure determination
/// left to [`failure`].
pub(crate) fn execute_capture(
    spec: &CommandSpec,
    opts: &ExecOptions,
    buffer: &ConsoleBuffer,
    sink: &dyn ConsoleSink,
    cancel: &CancelSignal,
) -> Result<Captured> {
    spec.check_working_dir()?;

    let redactor = spec.redactor().extended(&opts.extra_secrets);
    let describe = spec.describe(&redactor);

    let mut cmd = Command::new(&spec.executable);
    cmd.args(spec.os_args());
    cmd.current_dir(&spec.working_dir);
    for (key, value) in &spec.env {
        cmd.env(key, &value.value);
    }
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    cmd.stdin(if spec.stdin_lines.is_empty() {
        Stdio::null()
    } else {
        Stdio::piped()
    });

    // New process group so cancellation can take down the whole tree.
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    let mut child = cmd.spawn().map_err(|e| {
        Error::transport_spawn_failed(
            spec.executable.clone(),
            e.to_string(),
            Some(redactor.apply(&std::env::var("PATH").unwrap_or_default())),
        )
    })?;
    let pid = child.id();

    if let Some(mut stdin) = child.stdin.take() {
        for line in &spec.stdin_lines {
            let _ = writeln!(stdin, "{}", line);
        }
        // dropped here, closing the pipe
    }

    let marker = ErrorMarker::new(opts.error_markers.clone());
    let stdout_pipe = child.stdout.take();
    let stderr_pipe = child.stderr.take();
    let encoding = spec.encoding;

    let (status, stdout, stderr, killed) = thread::scope(|scope| {
        let redactor_ref = &redactor;
        let marker_ref = &marker;
        let out_handle = scope.spawn(move || {
            stream_lines(
                stdout_pipe,
                StreamTag::Stdout,
                encoding,
                redactor_ref,
                buffer,
                sink,
                marker_ref,
            )
        });
        let err_handle = scope.spawn(move || {
            stream_lines(
                stderr_pipe,
                StreamTag::Stderr,
                encoding,
                redactor_ref,
                buffer,
                sink,
                marker_ref,
            )
        });

        let mut killed = false;
        let status = loop {
            if cancel.is_cancelled() && !killed {
                killed = true;
                kill_process_tree(pid);
            }
            match child.try_wait() {
                Ok(Some(status)) => break Some(status),
                Ok(None) => thread::sleep(POLL_INTERVAL),
                Err(_) => break None,
            }
        };

        (
            status,
            out_handle.join().unwrap_or_default(),
            err_handle.join().unwrap_or_default(),
            killed,
        )
    });

    if killed {
        return Err(Error::exec_cancelled(describe));
    }

    let exit_code = status.map(|s| s.code().unwrap_or(-1)).unwrap_or(-1);
    Ok(Captured {
        result: ExecutionResult {
            exit_code,
            stdout,
            stderr,
            treat_nonzero_exit_as_failure: opts.treat_nonzero_exit_as_failure,
        },
        marker: marker.matched(),
        pid,
        describe,
    })
}

/// Failure determination: marker match wins over exit code, and each cause
/// produces its own user-facing message.
pub(crate) fn failure(captured: &Captured, opts: &ExecOptions) -> Option<Error> {
    if let Some(marker) = &captured.marker {
        return Some(Error::exec_error_marker(
            captured.describe.clone(),
            marker.clone(),
        ));
    }
    if opts.treat_nonzero_exit_as_failure && captured.result.exit_code != 0 {
        return Some(Error::exec_command_failed(
            captured.describe.clone(),
            captured.result.exit_code,
            captured.result.tail(10),
        ));
    }
    None
}

/// Execute the command once, mapping failure detection to an error.
pub fn execute(
    spec: &CommandSpec,
    opts: &ExecOptions,
    buffer: &ConsoleBuffer,
    sink: &dyn ConsoleSink,
    cancel: &CancelSignal,
) -> Result<ExecutionResult> {
    let captured = execute_capture(spec, opts, buffer, sink, cancel)?;
    match failure(&captured, opts) {
        Some(err) => Err(err),
        None => Ok(captured.result),
    }
}

/// Re-execute until the command succeeds or `timeout` wall-clock time has
/// elapsed, sleeping a flat `delay` between attempts (flat by compatibility
/// contract; no backoff). The timeout error carries the last captured
/// output, redacted.
pub fn wait_for_success(
    spec: &CommandSpec,
    opts: &ExecOptions,
    buffer: &ConsoleBuffer,
    sink: &dyn ConsoleSink,
    cancel: &CancelSignal,
    timeout: Duration,
    delay: Duration,
) -> Result<ExecutionResult> {
    let redactor = spec.redactor().extended(&opts.extra_secrets);
    let describe = spec.describe(&redactor);
    let started = Instant::now();
    let mut attempts: u32 = 0;
    let mut last_output = String::new();

    loop {
        if cancel.is_cancelled() {
            return Err(Error::exec_cancelled(describe));
        }
        if attempts > 0 && started.elapsed() >= timeout {
            return Err(Error::exec_retry_timeout(
                describe,
                timeout.as_millis() as u64,
                attempts,
                last_output,
            ));
        }

        let captured = execute_capture(spec, opts, buffer, sink, cancel)?;
        attempts += 1;
        match failure(&captured, opts) {
            None => return Ok(captured.result),
            Some(_) => last_output = redactor.apply(&captured.result.tail(10)),
        }

        sleep_observing_cancel(cancel, delay);
    }
}

fn sleep_observing_cancel(cancel: &CancelSignal, delay: Duration) {
    let deadline = Instant::now() + delay;
    while Instant::now() < deadline {
        if cancel.is_cancelled() {
            return;
        }
        thread::sleep(POLL_INTERVAL.min(delay));
    }
}

fn stream_lines<R: Read>(
    pipe: Option<R>,
    tag: StreamTag,
    encoding: Encoding,
    redactor: &Redactor,
    buffer: &ConsoleBuffer,
    sink: &dyn ConsoleSink,
    marker: &ErrorMarker,
) -> Vec<String> {
    let Some(pipe) = pipe else {
        return Vec::new();
    };
    let mut reader = BufReader::new(pipe);
    let mut lines = Vec::new();
    let mut raw = Vec::new();
    loop {
        raw.clear();
        match reader.read_until(b'\n', &mut raw) {
            Ok(0) => break,
            Ok(_) => {
                while raw.last().is_some_and(|b| *b == b'\n' || *b == b'\r') {
                    raw.pop();
                }
                let decoded = encoding.decode(&raw);
                marker.observe(&decoded);
                let line = redactor.apply(&decoded);
                buffer.append(tag, &line);
                sink.line(tag, &line);
                lines.push(line);
            }
            Err(_) => break,
        }
    }
    lines
}

/// Force-terminate a process and its descendants.
pub fn kill_process_tree(pid: u32) {
    #[cfg(unix)]
    unsafe {
        // The child was spawned as its own process-group leader.
        libc::killpg(pid as i32, libc::SIGTERM);
        thread::sleep(Duration::from_millis(200));
        libc::killpg(pid as i32, libc::SIGKILL);
    }
    #[cfg(windows)]
    {
        let _ = Command::new("taskkill")
            .args(["/F", "/T", "/PID", &pid.to_string()])
            .output();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::console::NullSink;
    use crate::error::ErrorCode;

    fn ctx() -> (ConsoleBuffer, NullSink, CancelSignal) {
        (ConsoleBuffer::new(), NullSink, CancelSignal::new())
    }

    #[test]
    fn captures_stdout_and_exit_code() {
        let (buffer, sink, cancel) = ctx();
        let spec = CommandSpec::new("echo", "/tmp").arg("hello");
        let result = execute(&spec, &ExecOptions::default(), &buffer, &sink, &cancel).unwrap();
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.stdout, vec!["hello"]);
        assert_eq!(buffer.text(), "hello");
    }

    #[test]
    fn nonzero_exit_is_execution_failure() {
        let (buffer, sink, cancel) = ctx();
        let spec = CommandSpec::shell("exit 3", "/tmp");
        let err = execute(&spec, &ExecOptions::default(), &buffer, &sink, &cancel).unwrap_err();
        assert_eq!(err.code, ErrorCode::ExecCommandFailed);
        assert!(err.message.contains("exit code 3"));
    }

    #[test]
    fn nonzero_exit_can_be_exempted() {
        let (buffer, sink, cancel) = ctx();
        let spec = CommandSpec::shell("exit 3", "/tmp");
        let opts = ExecOptions {
            treat_nonzero_exit_as_failure: false,
            ..Default::default()
        };
        let result = execute(&spec, &opts, &buffer, &sink, &cancel).unwrap();
        assert_eq!(result.exit_code, 3);
    }

    #[test]
    fn error_marker_fails_even_on_zero_exit() {
        let (buffer, sink, cancel) = ctx();
        let spec = CommandSpec::shell("echo BUILD FAILED; exit 0", "/tmp");
        let opts = ExecOptions {
            error_markers: vec!["BUILD FAILED".to_string()],
            ..Default::default()
        };
        let err = execute(&spec, &opts, &buffer, &sink, &cancel).unwrap_err();
        assert_eq!(err.code, ErrorCode::ExecErrorMarker);
        assert!(err.message.contains("BUILD FAILED"));
    }

    #[test]
    fn spawn_failure_is_transport_error() {
        let (buffer, sink, cancel) = ctx();
        let spec = CommandSpec::new("definitely-not-a-command-xyz", "/tmp");
        let err = execute(&spec, &ExecOptions::default(), &buffer, &sink, &cancel).unwrap_err();
        assert_eq!(err.code, ErrorCode::TransportSpawnFailed);
        assert!(err.message.contains("definitely-not-a-command-xyz"));
        assert!(err.details["searchPath"].is_string());
    }

    #[test]
    fn missing_working_dir_fails_before_spawn() {
        let (buffer, sink, cancel) = ctx();
        let spec = CommandSpec::new("echo", "/no/such/dir");
        let err = execute(&spec, &ExecOptions::default(), &buffer, &sink, &cancel).unwrap_err();
        assert_eq!(err.code, ErrorCode::ConfigWorkingDirMissing);
    }

    #[test]
    fn secret_values_never_reach_the_buffer() {
        let (buffer, sink, cancel) = ctx();
        let spec = CommandSpec::shell("echo leaking s3cr3t now", "/tmp");
        let opts = ExecOptions {
            extra_secrets: vec!["s3cr3t".to_string()],
            ..Default::default()
        };
        let result = execute(&spec, &opts, &buffer, &sink, &cancel).unwrap();
        assert!(!buffer.text().contains("s3cr3t"));
        assert!(buffer.text().contains("******"));
        assert!(!result.tail(5).contains("s3cr3t"));
    }

    #[test]
    fn stdin_lines_are_piped() {
        let (buffer, sink, cancel) = ctx();
        let spec = CommandSpec::new("cat", "/tmp")
            .stdin_line("first")
            .stdin_line("second");
        let result = execute(&spec, &ExecOptions::default(), &buffer, &sink, &cancel).unwrap();
        assert_eq!(result.stdout, vec!["first", "second"]);
    }

    #[test]
    fn env_overrides_are_applied() {
        let (buffer, sink, cancel) = ctx();
        let spec = CommandSpec::shell("echo $BUILD_LABEL", "/tmp").env("BUILD_LABEL", "1.2.3");
        let result = execute(&spec, &ExecOptions::default(), &buffer, &sink, &cancel).unwrap();
        assert_eq!(result.stdout, vec!["1.2.3"]);
    }

    // The retry loop polls on a flat interval, so an always-failing command
    // gets roughly timeout/delay attempts.
    #[test]
    fn wait_for_success_times_out_after_bounded_attempts() {
        let (buffer, sink, cancel) = ctx();
        let spec = CommandSpec::shell("echo still broken; exit 1", "/tmp");
        let err = wait_for_success(
            &spec,
            &ExecOptions::default(),
            &buffer,
            &sink,
            &cancel,
            Duration::from_millis(1000),
            Duration::from_millis(100),
        )
        .unwrap_err();
        assert_eq!(err.code, ErrorCode::ExecRetryTimeout);
        assert!(err.message.contains("still broken"));
        let attempts = err.details["attempts"].as_u64().unwrap();
        assert!((6..=11).contains(&attempts), "attempts = {}", attempts);
    }

    #[test]
    fn wait_for_success_returns_on_first_success() {
        let (buffer, sink, cancel) = ctx();
        let spec = CommandSpec::new("echo", "/tmp").arg("ready");
        let result = wait_for_success(
            &spec,
            &ExecOptions::default(),
            &buffer,
            &sink,
            &cancel,
            Duration::from_millis(1000),
            Duration::from_millis(100),
        )
        .unwrap();
        assert_eq!(result.stdout, vec!["ready"]);
    }

    #[test]
    fn cancellation_interrupts_a_blocked_wait() {
        let (buffer, sink, cancel) = ctx();
        let spec = CommandSpec::shell("sleep 10", "/tmp");
        let remote = cancel.clone();
        let killer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(150));
            remote.cancel();
        });
        let started = Instant::now();
        let err = execute(&spec, &ExecOptions::default(), &buffer, &sink, &cancel).unwrap_err();
        killer.join().unwrap();
        assert_eq!(err.code, ErrorCode::ExecCancelled);
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
