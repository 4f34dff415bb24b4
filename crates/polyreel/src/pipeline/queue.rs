//! Job queue with idempotent enqueue and per-project daemon locking.

use chrono::{Duration, Utc};
use rusqlite::{Connection, ErrorCode};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::db::job_repo::{self, JobFilter, JobRow};
use crate::db::project_repo::{self, ProjectRow};
use crate::db::{format_timestamp, now_timestamp, Database, DatabaseError};
use crate::error::ValidationError;
use crate::language;
use crate::pipeline::catalog::JobType;
use crate::pipeline::error::PipelineError;
use crate::pipeline::job::{JobPayload, JobStatus};

/// Result of an enqueue call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnqueueOutcome {
    pub job: JobRow,
    /// True when an existing queued or running job was returned instead of a new one.
    pub reused: bool,
}

/// Result of a lock acquisition attempt. Denial is not an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum LockOutcome {
    Granted,
    Denied { holder: String },
}

impl LockOutcome {
    pub fn is_granted(&self) -> bool {
        matches!(self, LockOutcome::Granted)
    }
}

/// Result of asking for the next job of a project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    Claimed(JobRow),
    /// The caller holds the lock but nothing is queued.
    Idle,
    /// The caller does not hold the project lock.
    LockDenied { holder: Option<String> },
}

/// Creates, de-duplicates and hands out jobs; guards the project lock.
#[derive(Clone)]
pub struct JobQueue {
    db: Database,
    /// Locks older than this may be taken over. `None` keeps locks until released.
    lock_lease: Option<Duration>,
}

impl JobQueue {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            lock_lease: None,
        }
    }

    pub fn with_lock_lease(mut self, lease: Option<Duration>) -> Self {
        self.lock_lease = lease;
        self
    }

    pub fn lock_lease(&self) -> Option<Duration> {
        self.lock_lease
    }

    /// Creates a queued job unless an equivalent one is already queued or running.
    pub fn enqueue(
        &self,
        project_id: &str,
        payload: JobPayload,
    ) -> Result<EnqueueOutcome, PipelineError> {
        if let Some(code) = payload.language_code() {
            language::parse_code(code)?;
        }
        let payload = payload.normalized();

        self.db.with_transaction(|tx| {
            let project = live_project(tx, project_id)?;
            ensure_not_terminal(&project)?;
            if let Some(code) = payload.language_code() {
                if !project.languages.iter().any(|l| l == code) {
                    return Err(ValidationError::UnknownLanguage {
                        project_id: project_id.to_string(),
                        language: code.to_string(),
                    }
                    .into());
                }
            }
            Self::enqueue_tx(tx, project_id, payload, &now_timestamp())
        })
    }

    /// Enqueues inside an open transaction.
    ///
    /// The existence check and the insert run under the same write lock; the
    /// partial unique index on active jobs backs the check across processes.
    pub(crate) fn enqueue_tx(
        conn: &Connection,
        project_id: &str,
        payload: JobPayload,
        now: &str,
    ) -> Result<EnqueueOutcome, PipelineError> {
        let payload = payload.normalized();
        let job_type = payload.job_type();
        let language_key = payload.language_key();

        if let Some(existing) = job_repo::find_active(conn, project_id, job_type, &language_key)? {
            debug!(
                job_id = %existing.id,
                project_id,
                job_type = %job_type,
                "reusing active job"
            );
            return Ok(EnqueueOutcome {
                job: existing,
                reused: true,
            });
        }

        let job = JobRow {
            id: Uuid::new_v4().to_string(),
            project_id: project_id.to_string(),
            job_type,
            language_key: language_key.clone(),
            status: JobStatus::Queued,
            payload,
            daemon_id: None,
            error: None,
            created_at: now.to_string(),
            updated_at: now.to_string(),
            started_at: None,
            completed_at: None,
        };

        match job_repo::insert(conn, &job) {
            Ok(()) => {
                info!(job_id = %job.id, project_id, job_type = %job_type, "job queued");
                Ok(EnqueueOutcome { job, reused: false })
            }
            Err(DatabaseError::Sqlite(e)) if is_unique_violation(&e) => {
                let existing = job_repo::find_active(conn, project_id, job_type, &language_key)?
                    .ok_or(PipelineError::Database(DatabaseError::Sqlite(e)))?;
                Ok(EnqueueOutcome {
                    job: existing,
                    reused: true,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Enqueues one stage's work: one job per active language for per-language
    /// types, a single job otherwise.
    pub(crate) fn enqueue_stage_tx(
        conn: &Connection,
        project: &ProjectRow,
        job_type: JobType,
        active_languages: &[String],
        now: &str,
    ) -> Result<Vec<EnqueueOutcome>, PipelineError> {
        let mut outcomes = Vec::new();
        if job_type.is_per_language() {
            for code in active_languages {
                let payload = JobPayload::for_job_type(job_type, Some(code), &project.languages)?;
                outcomes.push(Self::enqueue_tx(conn, &project.id, payload, now)?);
            }
        } else {
            let payload = JobPayload::for_job_type(job_type, None, active_languages)?;
            outcomes.push(Self::enqueue_tx(conn, &project.id, payload, now)?);
        }
        Ok(outcomes)
    }

    /// Grants the project lock if it is free, already held by `daemon_id`, or
    /// (with a lease configured) held past its lease.
    pub fn acquire_project_lock(
        &self,
        project_id: &str,
        daemon_id: &str,
    ) -> Result<LockOutcome, PipelineError> {
        let daemon_id = validate_daemon_id(daemon_id)?;
        let now = Utc::now();
        let stale_before = self.lock_lease.map(|lease| format_timestamp(now - lease));
        let now = format_timestamp(now);

        self.db.with_transaction(|tx| {
            let project = live_project(tx, project_id)?;
            ensure_not_terminal(&project)?;

            if project_repo::try_acquire_lock(
                tx,
                project_id,
                daemon_id,
                &now,
                stale_before.as_deref(),
            )? {
                match project.current_daemon_id.as_deref() {
                    Some(previous) if previous != daemon_id => warn!(
                        project_id,
                        previous,
                        daemon_id,
                        "stale project lock taken over"
                    ),
                    Some(_) => {}
                    None => debug!(project_id, daemon_id, "project lock granted"),
                }
                Ok(LockOutcome::Granted)
            } else {
                let holder = project.current_daemon_id.unwrap_or_default();
                debug!(project_id, daemon_id, holder = %holder, "project lock denied");
                Ok(LockOutcome::Denied { holder })
            }
        })
    }

    /// Heartbeat: refreshes the lock timestamp if `daemon_id` still holds it.
    pub fn renew_project_lock(&self, project_id: &str, daemon_id: &str) -> Result<bool, PipelineError> {
        let daemon_id = validate_daemon_id(daemon_id)?;
        self.db.with_transaction(|tx| {
            live_project(tx, project_id)?;
            Ok(project_repo::renew_lock(
                tx,
                project_id,
                daemon_id,
                &now_timestamp(),
            )?)
        })
    }

    /// Compare-and-clear release. Returns false if the caller is not the holder.
    pub fn release_project_lock(
        &self,
        project_id: &str,
        daemon_id: &str,
    ) -> Result<bool, PipelineError> {
        let daemon_id = validate_daemon_id(daemon_id)?;
        self.db.with_transaction(|tx| {
            live_project(tx, project_id)?;
            let released = project_repo::release_lock(tx, project_id, daemon_id, &now_timestamp())?;
            if released {
                debug!(project_id, daemon_id, "project lock released");
            }
            Ok(released)
        })
    }

    /// Operator action: clears the lock whoever holds it. Returns the previous holder.
    pub fn force_release_project_lock(
        &self,
        project_id: &str,
    ) -> Result<Option<String>, PipelineError> {
        self.db.with_transaction(|tx| {
            live_project(tx, project_id)?;
            let previous = project_repo::clear_lock(tx, project_id, &now_timestamp())?;
            if let Some(ref holder) = previous {
                warn!(project_id, holder = %holder, "project lock force-released");
            }
            Ok(previous)
        })
    }

    /// Cancels every queued or running job of `job_type`.
    pub fn cancel_active(&self, project_id: &str, job_type: JobType) -> Result<usize, PipelineError> {
        self.db.with_transaction(|tx| {
            live_project(tx, project_id)?;
            Self::cancel_active_tx(tx, project_id, &[job_type], &now_timestamp())
        })
    }

    pub(crate) fn cancel_active_tx(
        conn: &Connection,
        project_id: &str,
        job_types: &[JobType],
        now: &str,
    ) -> Result<usize, PipelineError> {
        let cancelled = job_repo::cancel_active(conn, project_id, job_types, now)?;
        if cancelled > 0 {
            info!(project_id, cancelled, "active jobs cancelled");
        }
        Ok(cancelled)
    }

    /// Moves the oldest queued job of the project to `running` for `daemon_id`.
    ///
    /// The caller must hold the project lock.
    pub fn claim_next(&self, project_id: &str, daemon_id: &str) -> Result<ClaimOutcome, PipelineError> {
        let daemon_id = validate_daemon_id(daemon_id)?;
        self.db.with_transaction(|tx| {
            let project = live_project(tx, project_id)?;
            if project.current_daemon_id.as_deref() != Some(daemon_id) {
                return Ok(ClaimOutcome::LockDenied {
                    holder: project.current_daemon_id,
                });
            }

            let Some(job) = job_repo::next_queued(tx, project_id)? else {
                return Ok(ClaimOutcome::Idle);
            };
            let now = now_timestamp();
            if !job_repo::mark_running(tx, &job.id, daemon_id, &now)? {
                return Ok(ClaimOutcome::Idle);
            }
            let claimed = job_repo::find_by_id(tx, &job.id)?
                .ok_or_else(|| PipelineError::JobNotFound(job.id.clone()))?;
            info!(job_id = %claimed.id, project_id, daemon_id, "job claimed");
            Ok(ClaimOutcome::Claimed(claimed))
        })
    }

    /// Marks an active job done without advancing the project.
    pub fn complete_job(&self, job_id: &str) -> Result<JobRow, PipelineError> {
        self.finish(job_id, JobStatus::Done, None)
    }

    /// Marks an active job failed. Retrying is up to the daemon.
    pub fn fail_job(&self, job_id: &str, error: &str) -> Result<JobRow, PipelineError> {
        self.finish(job_id, JobStatus::Failed, Some(error))
    }

    fn finish(
        &self,
        job_id: &str,
        status: JobStatus,
        error: Option<&str>,
    ) -> Result<JobRow, PipelineError> {
        self.db.with_transaction(|tx| {
            let job = job_repo::find_by_id(tx, job_id)?
                .ok_or_else(|| PipelineError::JobNotFound(job_id.to_string()))?;
            if !job_repo::finish(tx, job_id, status, error, &now_timestamp())? {
                return Err(PipelineError::StaleJob {
                    job_id: job_id.to_string(),
                    status: job.status,
                });
            }
            job_repo::find_by_id(tx, job_id)?
                .ok_or_else(|| PipelineError::JobNotFound(job_id.to_string()))
        })
    }

    pub fn get_job(&self, job_id: &str) -> Result<JobRow, PipelineError> {
        self.db
            .with_conn(|conn| job_repo::find_by_id(conn, job_id))?
            .ok_or_else(|| PipelineError::JobNotFound(job_id.to_string()))
    }

    /// Lists a project's jobs, oldest first.
    pub fn list_jobs(&self, project_id: &str, filter: &JobFilter) -> Result<Vec<JobRow>, PipelineError> {
        self.db.with_conn(|conn| {
            if project_repo::find_live(conn, project_id)?.is_none() {
                return Ok(None);
            }
            Ok(Some(job_repo::list(conn, project_id, filter)?))
        })?
        .ok_or_else(|| PipelineError::ProjectNotFound(project_id.to_string()))
    }
}

/// Loads a project that has not been soft-deleted.
pub(crate) fn live_project(conn: &Connection, project_id: &str) -> Result<ProjectRow, PipelineError> {
    project_repo::find_live(conn, project_id)?
        .ok_or_else(|| PipelineError::ProjectNotFound(project_id.to_string()))
}

pub(crate) fn ensure_not_terminal(project: &ProjectRow) -> Result<(), PipelineError> {
    if project.status.is_terminal() {
        return Err(ValidationError::TerminalProject {
            project_id: project.id.clone(),
            status: project.status,
        }
        .into());
    }
    Ok(())
}

pub(crate) fn validate_daemon_id(daemon_id: &str) -> Result<&str, ValidationError> {
    let trimmed = daemon_id.trim();
    if trimmed.is_empty() {
        Err(ValidationError::EmptyDaemonId)
    } else {
        Ok(trimmed)
    }
}

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _) if err.code == ErrorCode::ConstraintViolation
    )
}
