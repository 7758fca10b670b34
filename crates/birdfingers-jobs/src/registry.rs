use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use birdfingers_core::{Error, Result};
use birdfingers_store::{AuditLog, AuditRecord};
use chrono::{SecondsFormat, Utc};

use crate::job::Job;
use crate::{CommandExecutor, ExitOutcome, JobPoll, JobRequest, JobStatus, JobSummary, PipLauncher};

/// In-memory table of submitted jobs.
///
/// Each job runs on its own worker thread. Workers only take their own job's
/// lock, never the table lock.
pub struct JobRegistry {
    jobs: Mutex<HashMap<String, Arc<Job>>>,
    executor: Arc<dyn CommandExecutor>,
    launcher: PipLauncher,
    audit: Option<AuditLog>,
    retention: Option<Duration>,
}

impl JobRegistry {
    pub fn new(launcher: PipLauncher, executor: Arc<dyn CommandExecutor>) -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            executor,
            launcher,
            audit: None,
            retention: None,
        }
    }

    pub fn with_audit(mut self, audit: AuditLog) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Finished jobs older than `retention` are dropped on the next submit.
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = Some(retention);
        self
    }

    pub fn launcher(&self) -> &PipLauncher {
        &self.launcher
    }

    fn table(&self) -> MutexGuard<'_, HashMap<String, Arc<Job>>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn job(&self, id: &str) -> Result<Arc<Job>> {
        self.table()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::not_found("job", id))
    }

    /// Starts `request` in the background and returns its id immediately.
    pub fn submit(&self, request: JobRequest) -> Result<String> {
        let argv = self.launcher.job_argv(&request)?;
        if let Some(retention) = self.retention {
            self.evict_finished(retention);
        }

        let job = Arc::new(Job::new(request, argv));
        let id = job.id.clone();
        self.table().insert(id.clone(), Arc::clone(&job));
        tracing::info!(job_id = %id, kind = job.kind().as_str(), "job submitted");

        let worker = Arc::clone(&job);
        let executor = Arc::clone(&self.executor);
        let audit = self.audit.clone();
        let spawned = thread::Builder::new()
            .name(format!("job-{}", &id[..8.min(id.len())]))
            .spawn(move || run_job(&worker, executor.as_ref(), audit.as_ref()));
        if let Err(err) = spawned {
            let message = format!("failed to start job worker: {err}");
            job.append(&format!("error: {message}\n"));
            job.finish(JobStatus::Errored { message });
        }

        Ok(id)
    }

    /// Output appended after `cursor` and the job's current state. Never
    /// waits for more output.
    pub fn poll(&self, id: &str, cursor: usize) -> Result<JobPoll> {
        Ok(self.job(id)?.poll(cursor))
    }

    /// Requests termination. `false` when the job had already finished.
    pub fn cancel(&self, id: &str) -> Result<bool> {
        let job = self.job(id)?;
        let state = job.lock();
        if state.status.is_done() {
            return Ok(false);
        }
        // Flagged under the state lock so the job cannot finish in between.
        job.cancel.cancel();
        drop(state);
        tracing::info!(job_id = %id, "job cancellation requested");
        Ok(true)
    }

    pub fn summary(&self, id: &str) -> Result<JobSummary> {
        Ok(self.job(id)?.summary())
    }

    /// Drops finished jobs that completed at least `older_than` ago and
    /// returns their ids.
    pub fn evict_finished(&self, older_than: Duration) -> Vec<String> {
        let mut table = self.table();
        let expired = table
            .iter()
            .filter_map(|(id, job)| {
                let state = job.lock();
                let expired = state
                    .finished_at
                    .is_some_and(|finished| finished.elapsed() >= older_than);
                expired.then(|| id.clone())
            })
            .collect::<Vec<_>>();

        for id in &expired {
            table.remove(id);
        }
        if !expired.is_empty() {
            tracing::debug!("evicted {} finished job(s)", expired.len());
        }
        expired
    }
}

fn run_job(job: &Job, executor: &dyn CommandExecutor, audit: Option<&AuditLog>) {
    job.mark_running();
    let sink = |chunk: &str| job.append(chunk);

    let status = match executor.execute_combined(&job.argv, &sink, &job.cancel) {
        Ok(ExitOutcome::Exited(code)) => JobStatus::Exited { code },
        Ok(ExitOutcome::Cancelled) => {
            job.append("[cancelled]\n");
            JobStatus::Cancelled
        }
        Err(err) => {
            let message = err.to_string();
            job.append(&format!("error: {message}\n"));
            JobStatus::Errored { message }
        }
    };

    match &status {
        JobStatus::Exited { code: 0 } => {
            tracing::info!(job_id = %job.id, kind = job.kind().as_str(), "job succeeded")
        }
        JobStatus::Exited { code } => {
            tracing::warn!(job_id = %job.id, kind = job.kind().as_str(), code, "job failed")
        }
        other => {
            tracing::warn!(job_id = %job.id, kind = job.kind().as_str(), status = ?other, "job ended")
        }
    }

    if let Some(audit) = audit {
        let record = AuditRecord {
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            action: job.kind().as_str().to_string(),
            status: status.audit_status().to_string(),
            details: job.request.arguments(),
            exit_code: status.exit_code(),
            output: job.lock().output.clone(),
        };
        if let Err(err) = audit.append(&record) {
            tracing::warn!(job_id = %job.id, "failed to write audit record: {err}");
        }
    }

    job.finish(status);
}
