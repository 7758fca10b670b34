mod command;
mod job;
mod pip;
mod registry;

pub use command::{CancelToken, CommandExecutor, ExitOutcome, OutputStream, ProcessExecutor};
pub use job::{JobKind, JobPoll, JobRequest, JobStatus, JobSummary};
pub use pip::{PipEnvironment, PipLauncher};
pub use registry::JobRegistry;
