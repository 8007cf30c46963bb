// Public modules
pub mod command;
pub mod console;
pub mod fetch;
pub mod job;
pub mod process;
pub mod protocol;
pub mod task;

// Re-export common types for convenience
pub use command::{ArgKind, Argument, CommandSpec, Encoding};
pub use console::{ConsoleBuffer, ConsoleLine, ConsoleSink, NullSink, StreamTag};
pub use fetch::{ArtifactStore, ChecksumManifest, ChecksumStatus, FetchReport, JobIdentifier};
pub use job::{JobReport, JobResult, TaskOutcome, TaskStatus};
pub use process::{CancelSignal, ExecOptions, ExecutionResult};
pub use protocol::CommandNode;
pub use task::{AggregateStatus, ExecutionContext, RunIfCondition, RunIfConditions, Task, TaskKind};
