//! Tasks: run-if gating, cancel hooks and the closed capability set.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::command::Argument;
use crate::core::console::{ConsoleBuffer, ConsoleSink, NullSink};
use crate::core::fetch::{ArtifactStore, JobIdentifier, NoArtifactStore, CHECKSUM_MANIFEST_FILE};
use crate::core::process::{kill_process_tree, CancelSignal, ExecutionResult};
use crate::core::protocol::{self, CommandNode};
use crate::error::Result;
use crate::utils::redact::Redactor;
use crate::utils::shell;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub enum RunIfCondition {
    Passed,
    Failed,
    Any,
}

/// Non-empty set of run-if conditions. The default, `{Passed}`, reproduces
/// "run only if nothing failed yet".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunIfConditions(BTreeSet<RunIfCondition>);

impl Default for RunIfConditions {
    fn default() -> Self {
        Self::passed_only()
    }
}

impl RunIfConditions {
    pub fn passed_only() -> Self {
        Self(BTreeSet::from([RunIfCondition::Passed]))
    }

    /// Build from a slice; an empty slice falls back to the default set.
    pub fn of(conditions: &[RunIfCondition]) -> Self {
        if conditions.is_empty() {
            return Self::default();
        }
        Self(conditions.iter().copied().collect())
    }

    pub fn contains(&self, condition: RunIfCondition) -> bool {
        self.0.contains(&condition)
    }

    /// Pure run-if evaluation against the job's aggregate status.
    pub fn matches(&self, status: AggregateStatus) -> bool {
        self.contains(RunIfCondition::Any) || self.contains(status.as_condition())
    }
}

/// Job-wide Passed/Failed state accumulated across already-executed tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AggregateStatus {
    Passed,
    Failed,
}

impl AggregateStatus {
    fn as_condition(self) -> RunIfCondition {
        match self {
            AggregateStatus::Passed => RunIfCondition::Passed,
            AggregateStatus::Failed => RunIfCondition::Failed,
        }
    }
}

/// Closed capability set — every pipeline step is one of these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TaskKind {
    /// Raw command line, tokenized at compile time.
    ShellCommand { command: String },
    /// Executable plus explicit (possibly secret) arguments.
    ShellCommandWithArgs {
        executable: String,
        args: Vec<Argument>,
    },
    /// Kill every process this job has spawned so far.
    KillChildren,
    /// Pull an artifact produced by an upstream job.
    FetchArtifact {
        upstream: JobIdentifier,
        source_path: String,
        destination: String,
    },
}

fn default_true() -> bool {
    true
}

/// One configured pipeline step.
///
/// The cancel hook is supplied at construction and runs at most once, when
/// the job is cancelled while this task is pending or running; its own
/// failures are absorbed and logged, never escalated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub description: String,
    #[serde(default)]
    pub conditions: RunIfConditions,
    pub kind: TaskKind,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub error_markers: Vec<String>,
    #[serde(default = "default_true")]
    pub treat_nonzero_exit_as_failure: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_cancel: Option<Box<Task>>,
}

impl Task {
    pub fn new(description: impl Into<String>, kind: TaskKind) -> Self {
        Self {
            description: description.into(),
            conditions: RunIfConditions::default(),
            kind,
            error_markers: Vec::new(),
            treat_nonzero_exit_as_failure: true,
            on_cancel: None,
        }
    }

    /// Shorthand for a raw-command-line task.
    pub fn shell(description: impl Into<String>, command: impl Into<String>) -> Self {
        Self::new(
            description,
            TaskKind::ShellCommand {
                command: command.into(),
            },
        )
    }

    pub fn with_conditions(mut self, conditions: RunIfConditions) -> Self {
        self.conditions = conditions;
        self
    }

    pub fn with_cancel_task(mut self, task: Task) -> Self {
        self.on_cancel = Some(Box::new(task));
        self
    }

    pub fn with_error_markers(mut self, markers: Vec<String>) -> Self {
        self.error_markers = markers;
        self
    }

    /// Exempt this task from exit-code failure detection.
    pub fn ignoring_exit_code(mut self) -> Self {
        self.treat_nonzero_exit_as_failure = false;
        self
    }

    pub fn should_run(&self, status: AggregateStatus) -> bool {
        self.conditions.matches(status)
    }

    /// Compile this task into its declarative protocol form. Pure: no
    /// process spawning, no filesystem access; configuration problems
    /// surface as `Fail` nodes so a remote worker reports them faithfully.
    pub fn compile(&self) -> CommandNode {
        match &self.kind {
            TaskKind::ShellCommand { command } => match shell::tokenize(command) {
                Ok(tokens) if tokens.is_empty() => CommandNode::fail("Empty command line"),
                Ok(mut tokens) => {
                    let executable = tokens.remove(0);
                    CommandNode::exec(executable, tokens)
                }
                Err(err) => CommandNode::fail(err.to_string()),
            },
            TaskKind::ShellCommandWithArgs { executable, args } => CommandNode::exec(
                executable.clone(),
                args.iter().map(|a| a.value.clone()).collect(),
            ),
            // Remote runtimes own process-tree lifecycle natively.
            TaskKind::KillChildren => CommandNode::Noop,
            TaskKind::FetchArtifact {
                upstream,
                source_path,
                destination,
            } => CommandNode::Download {
                url: format!("{}/{}", upstream.locator(), source_path),
                destination: destination.clone(),
                checksum_url: Some(format!(
                    "{}/{}",
                    upstream.locator(),
                    CHECKSUM_MANIFEST_FILE
                )),
                checksum_file: Some(format!(".artifact-cache/{}", CHECKSUM_MANIFEST_FILE)),
            },
        }
    }

    /// Execute locally by interpreting the compiled tree. The one legacy
    /// exception is `KillChildren`, whose compiled form is `Noop`.
    pub fn execute(&self, ctx: &mut ExecutionContext) -> Result<ExecutionResult> {
        match &self.kind {
            TaskKind::KillChildren => {
                ctx.kill_spawned();
                Ok(ExecutionResult::empty())
            }
            _ => protocol::interpret(&self.compile(), self, ctx),
        }
    }

    pub(crate) fn secret_values(&self) -> Vec<String> {
        match &self.kind {
            TaskKind::ShellCommandWithArgs { args, .. } => args
                .iter()
                .filter(|a| a.is_secret())
                .map(|a| a.value.clone())
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// Per-job execution state shared by every task of the job.
pub struct ExecutionContext {
    /// Root directory all task working directories resolve against.
    pub sandbox: PathBuf,
    pub buffer: ConsoleBuffer,
    pub sink: Arc<dyn ConsoleSink>,
    pub cancel: CancelSignal,
    pub store: Arc<dyn ArtifactStore>,
    /// Job-level secret values (e.g. secret environment values) scrubbed
    /// from every rendering in addition to per-task secrets.
    pub secrets: Vec<String>,
    spawned: Vec<u32>,
}

impl ExecutionContext {
    pub fn new(sandbox: impl Into<PathBuf>) -> Self {
        Self {
            sandbox: sandbox.into(),
            buffer: ConsoleBuffer::new(),
            sink: Arc::new(NullSink),
            cancel: CancelSignal::new(),
            store: Arc::new(NoArtifactStore),
            secrets: Vec::new(),
            spawned: Vec::new(),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn ConsoleSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_store(mut self, store: Arc<dyn ArtifactStore>) -> Self {
        self.store = store;
        self
    }

    pub fn register_secret(&mut self, value: impl Into<String>) {
        let value = value.into();
        if !value.is_empty() {
            self.secrets.push(value);
        }
    }

    pub fn redactor(&self) -> Redactor {
        Redactor::new().extended(&self.secrets)
    }

    pub(crate) fn record_spawn(&mut self, pid: u32) {
        self.spawned.push(pid);
    }

    pub(crate) fn kill_spawned(&mut self) {
        for pid in self.spawned.drain(..) {
            kill_process_tree(pid);
        }
    }
}
