use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use serde::Serialize;

use crate::CancelToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobKind {
    InstallExact,
    InstallByName,
    UninstallBatch,
    RestoreFromSnapshot,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InstallExact => "install-exact",
            Self::InstallByName => "install-by-name",
            Self::UninstallBatch => "uninstall-batch",
            Self::RestoreFromSnapshot => "restore-from-snapshot",
        }
    }
}

/// A mutating operation to run against the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobRequest {
    InstallExact {
        name: String,
        version: String,
    },
    InstallByName {
        name: String,
        version: Option<String>,
    },
    UninstallBatch {
        names: Vec<String>,
    },
    RestoreFromSnapshot {
        snapshot_id: String,
        requirements: PathBuf,
    },
}

impl JobRequest {
    pub fn kind(&self) -> JobKind {
        match self {
            Self::InstallExact { .. } => JobKind::InstallExact,
            Self::InstallByName { .. } => JobKind::InstallByName,
            Self::UninstallBatch { .. } => JobKind::UninstallBatch,
            Self::RestoreFromSnapshot { .. } => JobKind::RestoreFromSnapshot,
        }
    }

    pub fn arguments(&self) -> BTreeMap<String, String> {
        let mut args = BTreeMap::new();
        match self {
            Self::InstallExact { name, version } => {
                args.insert("package".to_string(), name.clone());
                args.insert("version".to_string(), version.clone());
            }
            Self::InstallByName { name, version } => {
                args.insert("package".to_string(), name.clone());
                if let Some(version) = version {
                    args.insert("version".to_string(), version.clone());
                }
            }
            Self::UninstallBatch { names } => {
                args.insert("packages".to_string(), names.join(" "));
            }
            Self::RestoreFromSnapshot {
                snapshot_id,
                requirements,
            } => {
                args.insert("snapshot_id".to_string(), snapshot_id.clone());
                args.insert(
                    "requirements".to_string(),
                    requirements.display().to_string(),
                );
            }
        }
        args
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "kebab-case")]
pub enum JobStatus {
    Created,
    Running,
    Exited { code: i32 },
    Cancelled,
    Errored { message: String },
}

impl JobStatus {
    pub fn is_done(&self) -> bool {
        !matches!(self, Self::Created | Self::Running)
    }

    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::Exited { code } => Some(*code),
            _ => None,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.exit_code() == Some(0)
    }

    pub(crate) fn audit_status(&self) -> &'static str {
        match self {
            Self::Exited { code: 0 } => "success",
            Self::Exited { .. } => "failure",
            Self::Cancelled => "cancelled",
            Self::Errored { .. } => "error",
            Self::Created | Self::Running => "running",
        }
    }
}

/// Output produced since the caller's cursor plus current completion state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobPoll {
    pub text: String,
    pub cursor: usize,
    pub done: bool,
    pub exit_code: Option<i32>,
    pub status: JobStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobSummary {
    pub id: String,
    pub kind: JobKind,
    pub arguments: BTreeMap<String, String>,
    pub status: JobStatus,
    pub started_at_unix: u64,
    pub output_len: usize,
}

#[derive(Debug)]
pub(crate) struct JobState {
    pub(crate) output: String,
    pub(crate) status: JobStatus,
    pub(crate) finished_at: Option<Instant>,
}

#[derive(Debug)]
pub(crate) struct Job {
    pub(crate) id: String,
    pub(crate) request: JobRequest,
    pub(crate) argv: Vec<String>,
    pub(crate) started_at: SystemTime,
    pub(crate) cancel: CancelToken,
    state: Mutex<JobState>,
}

impl Job {
    pub(crate) fn new(request: JobRequest, argv: Vec<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().simple().to_string(),
            request,
            argv,
            started_at: SystemTime::now(),
            cancel: CancelToken::new(),
            state: Mutex::new(JobState {
                output: String::new(),
                status: JobStatus::Created,
                finished_at: None,
            }),
        }
    }

    pub(crate) fn kind(&self) -> JobKind {
        self.request.kind()
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, JobState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn append(&self, text: &str) {
        self.lock().output.push_str(text);
    }

    pub(crate) fn mark_running(&self) {
        let mut state = self.lock();
        if state.status == JobStatus::Created {
            state.status = JobStatus::Running;
        }
    }

    /// Moves the job to its terminal status; later calls are ignored.
    pub(crate) fn finish(&self, status: JobStatus) -> bool {
        let mut state = self.lock();
        if state.status.is_done() {
            return false;
        }
        state.status = status;
        state.finished_at = Some(Instant::now());
        true
    }

    pub(crate) fn poll(&self, cursor: usize) -> JobPoll {
        let state = self.lock();
        let len = state.output.len();
        let mut start = cursor.min(len);
        while !state.output.is_char_boundary(start) {
            start += 1;
        }
        JobPoll {
            text: state.output[start..].to_string(),
            cursor: len,
            done: state.status.is_done(),
            exit_code: state.status.exit_code(),
            status: state.status.clone(),
        }
    }

    pub(crate) fn summary(&self) -> JobSummary {
        let state = self.lock();
        JobSummary {
            id: self.id.clone(),
            kind: self.kind(),
            arguments: self.request.arguments(),
            status: state.status.clone(),
            started_at_unix: self
                .started_at
                .duration_since(UNIX_EPOCH)
                .map(|elapsed| elapsed.as_secs())
                .unwrap_or_default(),
            output_len: state.output.len(),
        }
    }
}
