//! Job driver loop: strictly sequential task execution, aggregate status
//! propagation and cancellation handling.

use serde::{Deserialize, Serialize};

use crate::core::process::CancelSignal;
use crate::core::task::{AggregateStatus, ExecutionContext, Task};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum JobResult {
    Passed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TaskStatus {
    Skipped,
    Succeeded,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskOutcome {
    pub description: String,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobReport {
    pub result: JobResult,
    pub tasks: Vec<TaskOutcome>,
}

/// Run a job's tasks in order against one execution context.
///
/// Each task is gated on the current aggregate status; a task failure
/// flips the status to Failed and later tasks re-evaluate against it. A
/// cancellation signal terminates the active task's process tree, runs its
/// cancel hook, and lands the job in `Cancelled` — always.
pub fn run_job(tasks: &[Task], ctx: &mut ExecutionContext) -> JobReport {
    let mut status = AggregateStatus::Passed;
    let mut outcomes = Vec::with_capacity(tasks.len());
    let mut cancelled = false;
    let redactor = ctx.redactor();

    for (index, task) in tasks.iter().enumerate() {
        if ctx.cancel.is_cancelled() {
            // Signal landed while this task was still pending.
            run_cancel_hook(task, ctx);
            mark_cancelled(&mut outcomes, &tasks[index..]);
            cancelled = true;
            break;
        }

        if !task.should_run(status) {
            log_status!("job", "Skipping '{}'", task.description);
            outcomes.push(TaskOutcome {
                description: task.description.clone(),
                status: TaskStatus::Skipped,
                error: None,
            });
            continue;
        }

        log_status!("job", "Running task '{}'", task.description);
        match task.execute(ctx) {
            Ok(_) => outcomes.push(TaskOutcome {
                description: task.description.clone(),
                status: TaskStatus::Succeeded,
                error: None,
            }),
            Err(err) => {
                let message = redactor.apply(&err.to_string());
                if ctx.cancel.is_cancelled() {
                    run_cancel_hook(task, ctx);
                    outcomes.push(TaskOutcome {
                        description: task.description.clone(),
                        status: TaskStatus::Cancelled,
                        error: Some(message),
                    });
                    mark_cancelled(&mut outcomes, &tasks[index + 1..]);
                    cancelled = true;
                    break;
                }
                log_status!("job", "Task '{}' failed: {}", task.description, message);
                status = AggregateStatus::Failed;
                outcomes.push(TaskOutcome {
                    description: task.description.clone(),
                    status: TaskStatus::Failed,
                    error: Some(message),
                });
            }
        }
    }

    let result = if cancelled {
        JobResult::Cancelled
    } else {
        match status {
            AggregateStatus::Passed => JobResult::Passed,
            AggregateStatus::Failed => JobResult::Failed,
        }
    };

    JobReport {
        result,
        tasks: outcomes,
    }
}

/// Run a task's cancel hook, absorbing any failure: cancellation must
/// always reach a terminal state.
fn run_cancel_hook(task: &Task, ctx: &mut ExecutionContext) {
    let Some(hook) = task.on_cancel.as_deref() else {
        return;
    };
    log_status!("job", "Running cancel task for '{}'", task.description);

    // The hook itself must not observe the job's cancellation flag.
    let saved = std::mem::replace(&mut ctx.cancel, CancelSignal::new());
    let outcome = hook.execute(ctx);
    ctx.cancel = saved;

    if let Err(err) = outcome {
        log_status!(
            "job",
            "Cancel task for '{}' failed: {}",
            task.description,
            ctx.redactor().apply(&err.to_string())
        );
    }
}

fn mark_cancelled(outcomes: &mut Vec<TaskOutcome>, remaining: &[Task]) {
    for task in remaining {
        outcomes.push(TaskOutcome {
            description: task.description.clone(),
            status: TaskStatus::Cancelled,
            error: None,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::task::{RunIfCondition, RunIfConditions};
    use tempfile::TempDir;

    #[test]
    fn passed_conditioned_task_skipped_after_failure() {
        let dir = TempDir::new().unwrap();
        let mut ctx = ExecutionContext::new(dir.path());
        let tasks = vec![
            Task::shell("break", "sh -c \"exit 1\""),
            Task::shell("compile", "echo compiling"),
        ];
        let report = run_job(&tasks, &mut ctx);
        assert_eq!(report.result, JobResult::Failed);
        assert_eq!(report.tasks[0].status, TaskStatus::Failed);
        assert_eq!(report.tasks[1].status, TaskStatus::Skipped);
    }

    #[test]
    fn all_tasks_pass_when_nothing_fails() {
        let dir = TempDir::new().unwrap();
        let mut ctx = ExecutionContext::new(dir.path());
        let tasks = vec![
            Task::shell("one", "echo one"),
            Task::shell("two", "echo two"),
        ];
        let report = run_job(&tasks, &mut ctx);
        assert_eq!(report.result, JobResult::Passed);
        assert!(report
            .tasks
            .iter()
            .all(|t| t.status == TaskStatus::Succeeded));
        assert_eq!(ctx.buffer.text(), "one\ntwo");
    }

    #[test]
    fn failure_outcome_carries_redacted_message() {
        let dir = TempDir::new().unwrap();
        let mut ctx = ExecutionContext::new(dir.path());
        ctx.register_secret("hunter2");
        let tasks = vec![Task::shell("leak", "sh -c \"echo hunter2; exit 9\"")];
        let report = run_job(&tasks, &mut ctx);
        assert_eq!(report.result, JobResult::Failed);
        let message = report.tasks[0].error.as_deref().unwrap();
        assert!(!message.contains("hunter2"), "message leaked: {}", message);
        assert!(message.contains("exit code 9"));
    }

    #[test]
    fn cleanup_task_runs_against_failed_status() {
        let dir = TempDir::new().unwrap();
        let mut ctx = ExecutionContext::new(dir.path());
        let tasks = vec![
            Task::shell("break", "sh -c \"exit 1\""),
            Task::shell("cleanup", "echo cleaning")
                .with_conditions(RunIfConditions::of(&[RunIfCondition::Failed])),
        ];
        let report = run_job(&tasks, &mut ctx);
        assert_eq!(report.result, JobResult::Failed);
        assert_eq!(report.tasks[1].status, TaskStatus::Succeeded);
        assert!(ctx.buffer.text().contains("cleaning"));
    }

    #[test]
    fn exit_code_exemption_keeps_the_job_green() {
        let dir = TempDir::new().unwrap();
        let mut ctx = ExecutionContext::new(dir.path());
        let tasks = vec![Task::shell("legacy tool", "sh -c \"exit 2\"").ignoring_exit_code()];
        let report = run_job(&tasks, &mut ctx);
        assert_eq!(report.result, JobResult::Passed);
    }

    #[test]
    fn error_marker_fails_a_green_exit() {
        let dir = TempDir::new().unwrap();
        let mut ctx = ExecutionContext::new(dir.path());
        let tasks = vec![Task::shell("lint", "echo ERROR: unused variable")
            .with_error_markers(vec!["ERROR:".to_string()])];
        let report = run_job(&tasks, &mut ctx);
        assert_eq!(report.result, JobResult::Failed);
        assert!(report.tasks[0]
            .error
            .as_deref()
            .unwrap()
            .contains("error marker"));
    }

    #[test]
    fn pre_cancelled_job_runs_no_tasks() {
        let dir = TempDir::new().unwrap();
        let mut ctx = ExecutionContext::new(dir.path());
        ctx.cancel.cancel();
        let tasks = vec![Task::shell("never", "echo nope")];
        let report = run_job(&tasks, &mut ctx);
        assert_eq!(report.result, JobResult::Cancelled);
        assert_eq!(report.tasks[0].status, TaskStatus::Cancelled);
        assert!(ctx.buffer.is_empty());
    }
}
