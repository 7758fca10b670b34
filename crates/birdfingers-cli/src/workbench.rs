use std::path::PathBuf;
use std::sync::Arc;

use birdfingers_core::{
    diff, EnvironmentCapture, Error, PackageSet, PlanCounts, ReconciliationPlan, Result,
};
use birdfingers_index::{IndexClient, ProjectInfo};
use birdfingers_jobs::{
    CommandExecutor, JobPoll, JobRegistry, JobRequest, JobSummary, PipEnvironment, PipLauncher,
    ProcessExecutor,
};
use birdfingers_store::{AuditLog, DataLayout, SnapshotMeta, SnapshotStore, StoredSnapshot};
use serde::Serialize;

use crate::config::Settings;

pub const PLAN_NOTE: &str =
    "Plans compare exact '==' pins only; the installer may still resolve dependencies differently. Lines with URLs or editables are counted under other_lines and never reconciled.";

/// One side of a preview or diff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanSide {
    pub label: String,
    pub snapshot: Option<SnapshotMeta>,
    pub pinned: usize,
    pub other_lines: usize,
}

impl PlanSide {
    fn current(set: &PackageSet) -> Self {
        Self {
            label: "current".to_string(),
            snapshot: None,
            pinned: set.len(),
            other_lines: set.other_lines().len(),
        }
    }

    fn snapshot(snapshot: &StoredSnapshot, set: &PackageSet) -> Self {
        Self {
            label: snapshot.meta.id.clone(),
            snapshot: Some(snapshot.meta.clone()),
            pinned: set.len(),
            other_lines: set.other_lines().len(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanReport {
    pub source: PlanSide,
    pub target: PlanSide,
    pub counts: PlanCounts,
    pub plan: ReconciliationPlan,
    pub commands: Vec<String>,
    pub note: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DoctorReport {
    pub python: String,
    pub pip_version: String,
    pub index_url: String,
    pub data_dir: PathBuf,
    pub snapshots_dir: PathBuf,
    pub log_path: PathBuf,
    pub audit_path: PathBuf,
    pub snapshot_count: usize,
}

/// Everything a front-end needs: live environment queries, snapshots,
/// plans and background jobs over one data directory.
pub struct Workbench {
    settings: Settings,
    store: SnapshotStore,
    environment: PipEnvironment,
    jobs: JobRegistry,
    index: IndexClient,
}

impl Workbench {
    pub fn open(settings: Settings) -> Result<Self> {
        Self::with_executor(settings, Arc::new(ProcessExecutor::new()))
    }

    pub fn with_executor(settings: Settings, executor: Arc<dyn CommandExecutor>) -> Result<Self> {
        let layout = settings.layout();
        let launcher = PipLauncher::new(settings.python.clone());
        let environment = PipEnvironment::new(
            launcher.clone(),
            Arc::clone(&executor),
            settings.capture_timeout,
        );

        let mut jobs = JobRegistry::new(launcher, executor)
            .with_audit(AuditLog::new(layout.audit_path()));
        if let Some(retention) = settings.job_retention {
            jobs = jobs.with_retention(retention);
        }

        Ok(Self {
            index: IndexClient::new(&settings.index_url)?,
            store: SnapshotStore::new(layout),
            environment,
            jobs,
            settings,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn layout(&self) -> &DataLayout {
        self.store.layout()
    }

    pub fn launcher(&self) -> &PipLauncher {
        self.environment.launcher()
    }

    /// The live environment's pins, keyed by normalized name.
    pub fn installed(&self) -> Result<PackageSet> {
        self.environment.capture()
    }

    pub fn show(&self, name: &str) -> Result<String> {
        self.environment.show(name)
    }

    pub fn project(&self, name: &str) -> Result<ProjectInfo> {
        self.index.project(name)
    }

    pub fn doctor(&self) -> Result<DoctorReport> {
        let pip_version = self.environment.version()?;
        let layout = self.layout();
        Ok(DoctorReport {
            python: self.settings.python.clone(),
            pip_version,
            index_url: self.index.base_url().to_string(),
            data_dir: layout.data_dir().to_path_buf(),
            snapshots_dir: layout.snapshots_dir(),
            log_path: layout.log_path(),
            audit_path: layout.audit_path(),
            snapshot_count: self.store.list()?.len(),
        })
    }

    pub fn save_snapshot(&self, name: &str, comment: &str) -> Result<SnapshotMeta> {
        self.store.save(&self.environment, name, comment)
    }

    pub fn list_snapshots(&self) -> Result<Vec<SnapshotMeta>> {
        self.store.list()
    }

    /// Metadata plus the raw pin text; a missing id is `NotFound`.
    pub fn snapshot(&self, id: &str) -> Result<StoredSnapshot> {
        self.store.require(id)
    }

    /// Removes whatever is left of snapshot `id`, including a half-written
    /// one. `NotFound` only when neither record exists.
    pub fn delete_snapshot(&self, id: &str) -> Result<bool> {
        if !self.store.has_records(id) {
            return Err(Error::not_found("snapshot", id));
        }
        Ok(self.store.delete(id))
    }

    /// What reconciling the live environment to snapshot `id` would do.
    pub fn preview(&self, id: &str) -> Result<PlanReport> {
        let snapshot = self.store.require(id)?;
        let target = snapshot.package_set();
        let current = self.installed()?;
        Ok(self.report(
            PlanSide::current(&current),
            PlanSide::snapshot(&snapshot, &target),
            diff(&current, &target),
        ))
    }

    /// What moving from snapshot `from` to snapshot `to` would do.
    pub fn diff(&self, from: &str, to: &str) -> Result<PlanReport> {
        let source_snapshot = self.store.require(from)?;
        let target_snapshot = self.store.require(to)?;
        let source = source_snapshot.package_set();
        let target = target_snapshot.package_set();
        Ok(self.report(
            PlanSide::snapshot(&source_snapshot, &source),
            PlanSide::snapshot(&target_snapshot, &target),
            diff(&source, &target),
        ))
    }

    fn report(&self, source: PlanSide, target: PlanSide, plan: ReconciliationPlan) -> PlanReport {
        PlanReport {
            commands: plan.command_lines(&self.launcher().display_prefix()),
            counts: plan.counts(),
            source,
            target,
            plan,
            note: PLAN_NOTE,
        }
    }

    pub fn submit(&self, request: JobRequest) -> Result<String> {
        self.jobs.submit(request)
    }

    /// Starts a job installing every pin recorded in snapshot `id`.
    pub fn restore(&self, id: &str) -> Result<String> {
        let snapshot = self.store.require(id)?;
        self.jobs.submit(JobRequest::RestoreFromSnapshot {
            snapshot_id: snapshot.meta.id,
            requirements: snapshot.payload_path,
        })
    }

    pub fn poll(&self, job_id: &str, cursor: usize) -> Result<JobPoll> {
        self.jobs.poll(job_id, cursor)
    }

    pub fn cancel(&self, job_id: &str) -> Result<bool> {
        self.jobs.cancel(job_id)
    }

    pub fn job_summary(&self, job_id: &str) -> Result<JobSummary> {
        self.jobs.summary(job_id)
    }

    pub fn audit_log(&self) -> AuditLog {
        AuditLog::new(self.layout().audit_path())
    }
}
