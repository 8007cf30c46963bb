//! Declarative command protocol tree and its local interpreter.
//!
//! A compiled tree captures a task's execution intent without touching the
//! compiling side's OS state; a remote worker consumes the serialized form.
//! Local execution is a small interpreter over the same tree, so "how a
//! task executes" and "what it compiles to" cannot drift apart.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::command::{Argument, CommandSpec};
use crate::core::console::StreamTag;
use crate::core::fetch::{self, ChecksumStatus};
use crate::core::process::{self, ExecOptions, ExecutionResult};
use crate::core::task::{ExecutionContext, Task};
use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum CommandNode {
    Exec {
        executable: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        args: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        working_dir: Option<String>,
    },
    Compose {
        children: Vec<CommandNode>,
    },
    Echo {
        text: String,
    },
    Fail {
        reason: String,
    },
    Noop,
    Download {
        url: String,
        destination: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        checksum_url: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        checksum_file: Option<String>,
    },
}

impl CommandNode {
    pub fn exec(executable: impl Into<String>, args: Vec<String>) -> Self {
        CommandNode::Exec {
            executable: executable.into(),
            args,
            working_dir: None,
        }
    }

    pub fn compose(children: Vec<CommandNode>) -> Self {
        CommandNode::Compose { children }
    }

    pub fn echo(text: impl Into<String>) -> Self {
        CommandNode::Echo { text: text.into() }
    }

    pub fn fail(reason: impl Into<String>) -> Self {
        CommandNode::Fail {
            reason: reason.into(),
        }
    }
}

/// Execute a compiled tree locally on behalf of `task`.
///
/// `Compose` children run in order and the first failing child aborts the
/// remaining siblings.
pub fn interpret(
    node: &CommandNode,
    task: &Task,
    ctx: &mut ExecutionContext,
) -> Result<ExecutionResult> {
    match node {
        CommandNode::Exec {
            executable,
            args,
            working_dir,
        } => {
            let secret_values = task.secret_values();
            let mut spec = CommandSpec::new(
                executable.clone(),
                match working_dir {
                    Some(dir) => ctx.sandbox.join(dir),
                    None => ctx.sandbox.clone(),
                },
            );
            spec.args = args
                .iter()
                .map(|value| {
                    if secret_values.contains(value) {
                        Argument::secret(value.clone())
                    } else {
                        Argument::plain(value.clone())
                    }
                })
                .collect();

            let opts = ExecOptions {
                error_markers: task.error_markers.clone(),
                treat_nonzero_exit_as_failure: task.treat_nonzero_exit_as_failure,
                extra_secrets: ctx.secrets.clone(),
            };
            let sink = Arc::clone(&ctx.sink);
            let captured =
                process::execute_capture(&spec, &opts, &ctx.buffer, sink.as_ref(), &ctx.cancel)?;
            ctx.record_spawn(captured.pid);
            match process::failure(&captured, &opts) {
                Some(err) => Err(err),
                None => Ok(captured.result),
            }
        }

        CommandNode::Compose { children } => {
            let mut last = ExecutionResult::empty();
            for child in children {
                last = interpret(child, task, ctx)?;
            }
            Ok(last)
        }

        CommandNode::Echo { text } => {
            let line = ctx.redactor().apply(text);
            ctx.buffer.append(StreamTag::Stdout, &line);
            ctx.sink.line(StreamTag::Stdout, &line);
            Ok(ExecutionResult::empty())
        }

        CommandNode::Fail { reason } => Err(Error::exec_forced_failure(
            ctx.redactor().apply(reason),
        )),

        CommandNode::Noop => Ok(ExecutionResult::empty()),

        CommandNode::Download {
            url,
            destination,
            checksum_url,
            checksum_file: _,
        } => {
            let manifest = checksum_url
                .as_deref()
                .and_then(|u| fetch::manifest_from_locator(ctx.store.as_ref(), u));
            let report = fetch::download_to(
                ctx.store.as_ref(),
                url,
                &ctx.sandbox,
                destination,
                manifest.as_ref(),
            )?;

            let line = ctx.redactor().apply(&format!(
                "Fetched '{}' ({} bytes)",
                report.source, report.bytes
            ));
            ctx.buffer.append(StreamTag::Stdout, &line);
            ctx.sink.line(StreamTag::Stdout, &line);

            if let ChecksumStatus::Mismatch { expected, actual } = &report.checksum {
                let warn = format!(
                    "[WARN] Checksum for '{}' did not match (expected {}, got {}); artifact recorded as invalid",
                    report.source, expected, actual
                );
                ctx.buffer.append(StreamTag::Stderr, &warn);
                ctx.sink.line(StreamTag::Stderr, &warn);
            }

            let mut result = ExecutionResult::empty();
            result.stdout.push(line);
            Ok(result)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::task::TaskKind;
    use crate::error::ErrorCode;
    use tempfile::TempDir;

    fn task() -> Task {
        Task::new("probe", TaskKind::KillChildren)
    }

    #[test]
    fn nodes_serialize_with_type_tags() {
        let tree = CommandNode::compose(vec![
            CommandNode::echo("starting"),
            CommandNode::exec("make", vec!["all".to_string()]),
            CommandNode::Noop,
        ]);
        let json = serde_json::to_value(&tree).unwrap();
        assert_eq!(json["type"], "compose");
        assert_eq!(json["children"][0]["type"], "echo");
        assert_eq!(json["children"][1]["type"], "exec");
        assert_eq!(json["children"][1]["executable"], "make");
        assert_eq!(json["children"][2]["type"], "noop");

        let back: CommandNode = serde_json::from_value(json).unwrap();
        assert_eq!(back, tree);
    }

    #[test]
    fn compose_aborts_after_first_failure() {
        let dir = TempDir::new().unwrap();
        let mut ctx = ExecutionContext::new(dir.path());
        let tree = CommandNode::compose(vec![
            CommandNode::echo("first"),
            CommandNode::fail("stop here"),
            CommandNode::echo("never printed"),
        ]);
        let err = interpret(&tree, &task(), &mut ctx).unwrap_err();
        assert_eq!(err.code, ErrorCode::ExecForcedFailure);
        assert_eq!(err.message, "stop here");
        assert_eq!(ctx.buffer.text(), "first");
    }

    #[test]
    fn echo_lines_are_redacted() {
        let dir = TempDir::new().unwrap();
        let mut ctx = ExecutionContext::new(dir.path());
        ctx.register_secret("s3cr3t");
        interpret(&CommandNode::echo("token is s3cr3t"), &task(), &mut ctx).unwrap();
        assert_eq!(ctx.buffer.text(), "token is ******");
    }

    #[test]
    fn noop_succeeds_without_side_effects() {
        let dir = TempDir::new().unwrap();
        let mut ctx = ExecutionContext::new(dir.path());
        let result = interpret(&CommandNode::Noop, &task(), &mut ctx).unwrap();
        assert_eq!(result.exit_code, 0);
        assert!(ctx.buffer.is_empty());
    }
}
