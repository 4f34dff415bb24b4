//! The pipeline façade: drives `Project.status` from daemon reports,
//! approvals and operator overrides.
//!
//! Every mutation touching more than one table runs in a single
//! [`Database::with_transaction`] call. Notifications are delivered only after
//! that transaction has committed.

use std::collections::BTreeSet;
use std::sync::Arc;

use rusqlite::Connection;
use serde::Serialize;
use serde_json::json;
use tracing::{info, info_span, warn};
use uuid::Uuid;

use crate::broadcast::{NoopNotifier, NotificationSink, StageNotification};
use crate::config::Config;
use crate::db::history_repo::{self, StatusHistoryRow};
use crate::db::job_repo::{self, JobRow};
use crate::db::progress_repo;
use crate::db::project_repo::{self, ProjectRow};
use crate::db::{default_database_path, now_timestamp, Database};
use crate::error::{PolyreelError, ValidationError};
use crate::language;
use crate::pipeline::catalog::{JobType, ProjectStatus};
use crate::pipeline::error::PipelineError;
use crate::pipeline::job::JobStatus;
use crate::pipeline::notify::{Milestone, NotificationGate};
use crate::pipeline::queue::{ensure_not_terminal, live_project, validate_daemon_id, JobQueue};
use crate::pipeline::reset::{
    build_reset_plan, LanguageSelection, ResetOutcome, ResetPlanner, ResetPreview,
};
use crate::pipeline::tracker::{
    active_languages, completed_languages, stage_aggregate, LanguageProgressTracker,
};

/// What a daemon reports for its current stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    Completed {
        language_code: Option<String>,
        /// Location of the rendered video, for final-video reports.
        final_video_url: Option<String>,
        /// Languages a script job actually produced. Empty means all of them.
        produced_languages: Vec<String>,
    },
    /// One language failed; the rest of the project keeps moving.
    LanguageFailed {
        language_code: String,
        reason: String,
    },
}

/// A daemon's stage report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageReport {
    pub project_id: String,
    pub daemon_id: String,
    /// The kind of work that finished. Must match the project's current status.
    pub job_type: JobType,
    pub job_id: Option<String>,
    pub outcome: StageOutcome,
}

impl StageReport {
    pub fn completed(project_id: &str, daemon_id: &str, job_type: JobType) -> Self {
        Self {
            project_id: project_id.to_string(),
            daemon_id: daemon_id.to_string(),
            job_type,
            job_id: None,
            outcome: StageOutcome::Completed {
                language_code: None,
                final_video_url: None,
                produced_languages: Vec::new(),
            },
        }
    }

    pub fn language_failed(
        project_id: &str,
        daemon_id: &str,
        job_type: JobType,
        language_code: &str,
        reason: &str,
    ) -> Self {
        Self {
            project_id: project_id.to_string(),
            daemon_id: daemon_id.to_string(),
            job_type,
            job_id: None,
            outcome: StageOutcome::LanguageFailed {
                language_code: language_code.to_string(),
                reason: reason.to_string(),
            },
        }
    }

    pub fn for_language(mut self, code: &str) -> Self {
        match &mut self.outcome {
            StageOutcome::Completed { language_code, .. } => *language_code = Some(code.to_string()),
            StageOutcome::LanguageFailed { language_code, .. } => *language_code = code.to_string(),
        }
        self
    }

    pub fn with_job(mut self, job_id: &str) -> Self {
        self.job_id = Some(job_id.to_string());
        self
    }

    pub fn with_final_video(mut self, url: &str) -> Self {
        if let StageOutcome::Completed { final_video_url, .. } = &mut self.outcome {
            *final_video_url = Some(url.to_string());
        }
        self
    }

    pub fn with_produced_languages<S: AsRef<str>>(mut self, codes: &[S]) -> Self {
        if let StageOutcome::Completed {
            produced_languages, ..
        } = &mut self.outcome
        {
            *produced_languages = codes.iter().map(|c| c.as_ref().to_string()).collect();
        }
        self
    }

    fn language(&self) -> Option<&str> {
        match &self.outcome {
            StageOutcome::Completed { language_code, .. } => language_code.as_deref(),
            StageOutcome::LanguageFailed { language_code, .. } => Some(language_code),
        }
    }

    /// Normalizes language codes and rejects malformed input.
    fn validated(mut self) -> Result<Self, ValidationError> {
        self.daemon_id = validate_daemon_id(&self.daemon_id)?.to_string();
        match &mut self.outcome {
            StageOutcome::Completed {
                language_code,
                produced_languages,
                ..
            } => {
                if let Some(code) = language_code {
                    *code = language::parse_code(code)?;
                }
                if !produced_languages.is_empty() {
                    *produced_languages = language::parse_language_set(produced_languages.as_slice())?;
                }
            }
            StageOutcome::LanguageFailed { language_code, .. } => {
                *language_code = language::parse_code(language_code)?;
            }
        }
        Ok(self)
    }
}

/// A committed status transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Transition {
    pub from: ProjectStatus,
    pub to: ProjectStatus,
    /// The stage counted as done only because no language was active.
    pub vacuous: bool,
    /// The notification gate let this transition through.
    pub notified: bool,
    /// Per-language statuses passed through because no language was active.
    pub skipped: Vec<ProjectStatus>,
    pub active_languages: Vec<String>,
    pub enqueued_job_ids: Vec<String>,
    pub history_seq: i64,
}

/// Result of a stage report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum StageAdvance {
    /// The reporting daemon does not hold the project lock. Nothing changed.
    LockDenied { holder: Option<String> },
    /// Recorded; the stage is still waiting on other work.
    Pending {
        status: ProjectStatus,
        remaining: Vec<String>,
    },
    Advanced(Transition),
}

/// Drives projects through the pipeline.
pub struct PipelineCoordinator {
    db: Database,
    queue: JobQueue,
    tracker: LanguageProgressTracker,
    planner: ResetPlanner,
    notifier: Arc<dyn NotificationSink>,
    default_languages: Vec<String>,
}

impl PipelineCoordinator {
    pub fn new(db: Database) -> Self {
        Self {
            queue: JobQueue::new(db.clone()),
            tracker: LanguageProgressTracker::new(db.clone()),
            planner: ResetPlanner::new(db.clone()),
            db,
            notifier: Arc::new(NoopNotifier),
            default_languages: Vec::new(),
        }
    }

    /// Production constructor: opens the configured database.
    pub fn from_config(config: &Config) -> Result<Self, PolyreelError> {
        let path = match &config.database_path {
            Some(path) => path.clone(),
            None => default_database_path().ok_or_else(|| {
                PolyreelError::Config(crate::error::ConfigError::Validation {
                    message: "No database_path configured and no home directory found"
                        .to_string(),
                })
            })?,
        };
        let db = Database::open(&path)?;
        Ok(Self::new(db)
            .with_lock_lease(config.lock_lease())
            .with_default_languages(config.default_languages.clone()))
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn NotificationSink>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_lock_lease(mut self, lease: Option<chrono::Duration>) -> Self {
        self.queue = self.queue.with_lock_lease(lease);
        self
    }

    pub fn with_default_languages(mut self, languages: Vec<String>) -> Self {
        self.default_languages = languages;
        self
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    pub fn tracker(&self) -> &LanguageProgressTracker {
        &self.tracker
    }

    pub fn planner(&self) -> &ResetPlanner {
        &self.planner
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    // -- Projects ---------------------------------------------------------

    /// Creates a project in `New`. An empty list falls back to the configured
    /// default languages.
    pub fn create_project<S: AsRef<str>>(&self, languages: &[S]) -> Result<ProjectRow, PipelineError> {
        let languages = if languages.is_empty() {
            language::parse_language_set(self.default_languages.as_slice())?
        } else {
            language::parse_language_set(languages)?
        };

        let now = now_timestamp();
        let project = ProjectRow {
            id: Uuid::new_v4().to_string(),
            status: ProjectStatus::New,
            languages,
            current_daemon_id: None,
            current_daemon_locked_at: None,
            final_video_url: None,
            created_at: now.clone(),
            updated_at: now.clone(),
            deleted_at: None,
        };

        self.db.with_transaction(|tx| {
            project_repo::insert(tx, &project)?;
            for code in &project.languages {
                progress_repo::upsert(tx, &project.id, code, &now)?;
            }
            history_repo::append(
                tx,
                &project.id,
                ProjectStatus::New,
                Some("project created"),
                None,
                &now,
            )?;
            Ok::<_, PipelineError>(())
        })?;

        info!(project_id = %project.id, languages = ?project.languages, "project created");
        Ok(project)
    }

    pub fn get_project(&self, project_id: &str) -> Result<ProjectRow, PipelineError> {
        self.db
            .with_conn(|conn| project_repo::find_live(conn, project_id))?
            .ok_or_else(|| PipelineError::ProjectNotFound(project_id.to_string()))
    }

    pub fn list_projects(&self, status: Option<ProjectStatus>) -> Result<Vec<ProjectRow>, PipelineError> {
        Ok(self.db.with_conn(|conn| project_repo::list(conn, status))?)
    }

    /// Status history in insertion order.
    pub fn history(&self, project_id: &str) -> Result<Vec<StatusHistoryRow>, PipelineError> {
        self.db.with_conn(|conn| {
            if project_repo::find_live(conn, project_id)?.is_none() {
                return Ok(None);
            }
            Ok(Some(history_repo::list(conn, project_id)?))
        })?
        .ok_or_else(|| PipelineError::ProjectNotFound(project_id.to_string()))
    }

    /// Hides the project from every other operation, cancels its active jobs
    /// and drops its lock.
    pub fn soft_delete_project(&self, project_id: &str) -> Result<(), PipelineError> {
        self.db.with_transaction(|tx| {
            let project = live_project(tx, project_id)?;
            let now = now_timestamp();
            JobQueue::cancel_active_tx(tx, project_id, &JobType::ALL, &now)?;
            history_repo::append(
                tx,
                project_id,
                project.status,
                Some("project deleted"),
                None,
                &now,
            )?;
            project_repo::soft_delete(tx, project_id, &now)?;
            Ok::<_, PipelineError>(())
        })?;
        info!(project_id, "project deleted");
        Ok(())
    }

    /// Moves a new project into script generation and queues the script job.
    pub fn start_project(&self, project_id: &str) -> Result<Transition, PipelineError> {
        let (transition, notification) = self.db.with_transaction(|tx| {
            let project = live_project(tx, project_id)?;
            if project.status != ProjectStatus::New {
                return Err(ValidationError::UnexpectedStatus {
                    project_id: project_id.to_string(),
                    expected: ProjectStatus::New,
                    actual: project.status,
                }
                .into());
            }
            Self::advance_tx(tx, &project, None, false, Some("project started"))
        })?;
        self.deliver(notification);
        Ok(transition)
    }

    // -- Daemon reports ---------------------------------------------------

    /// Records a daemon's stage result and advances the project when the
    /// stage is complete for every active language.
    pub fn report_stage(&self, report: StageReport) -> Result<StageAdvance, PipelineError> {
        let report = report.validated()?;
        let _span = info_span!(
            "report_stage",
            project_id = %report.project_id,
            daemon_id = %report.daemon_id,
            job_type = %report.job_type
        )
        .entered();

        let (advance, notification) = self
            .db
            .with_transaction(|tx| Self::report_tx(tx, &report))?;
        self.deliver(notification);
        Ok(advance)
    }

    fn report_tx(
        conn: &Connection,
        report: &StageReport,
    ) -> Result<(StageAdvance, Option<StageNotification>), PipelineError> {
        let project_id = report.project_id.as_str();
        let project = live_project(conn, project_id)?;
        ensure_not_terminal(&project)?;

        if project.current_daemon_id.as_deref() != Some(report.daemon_id.as_str()) {
            warn!(
                holder = ?project.current_daemon_id,
                "stage report from a daemon without the project lock"
            );
            return Ok((
                StageAdvance::LockDenied {
                    holder: project.current_daemon_id,
                },
                None,
            ));
        }

        let expected = project
            .status
            .job_type()
            .ok_or(ValidationError::NoDaemonWork(project.status))?;
        if expected != report.job_type {
            return Err(ValidationError::UnexpectedStatus {
                project_id: project_id.to_string(),
                expected: report.job_type.status(),
                actual: project.status,
            }
            .into());
        }
        let job_type = report.job_type;
        let now = now_timestamp();

        let job = match &report.job_id {
            Some(job_id) => Some(Self::reported_job(conn, project_id, job_type, job_id)?),
            None => None,
        };

        let language = report
            .language()
            .map(str::to_string)
            .or_else(|| job.as_ref().and_then(|j| j.language().map(str::to_string)));
        if let (Some(code), Some(job)) = (&language, &job) {
            if job.language().is_some_and(|l| l != code.as_str()) {
                return Err(PipelineError::StaleJob {
                    job_id: job.id.clone(),
                    status: job.status,
                });
            }
        }
        if let Some(code) = &language {
            if !project.languages.contains(code) {
                return Err(ValidationError::UnknownLanguage {
                    project_id: project_id.to_string(),
                    language: code.clone(),
                }
                .into());
            }
        }
        if job_type.is_per_language() && language.is_none() {
            return Err(ValidationError::LanguageRequired { job_type }.into());
        }

        // Resolve the job this report settles: the named one, or the active
        // job for the same unit of work.
        let job = match job {
            Some(job) => Some(job),
            None => job_repo::find_active(
                conn,
                project_id,
                job_type,
                if job_type.is_per_language() {
                    language.as_deref().unwrap_or_default()
                } else {
                    ""
                },
            )?,
        };

        let mut milestone_languages: Option<BTreeSet<String>> = None;
        match &report.outcome {
            StageOutcome::Completed {
                final_video_url,
                produced_languages,
                ..
            } => {
                if let Some(job) = &job {
                    job_repo::finish(conn, &job.id, JobStatus::Done, None, &now)?;
                }
                if let (Some(stage), Some(code)) = (job_type.progress_stage(), &language) {
                    LanguageProgressTracker::mark_flag_tx(conn, project_id, code, stage, true, &now)?;
                }
                if let Some(url) = final_video_url {
                    project_repo::set_final_video(conn, project_id, Some(url), &now)?;
                }
                if job_type == JobType::Script {
                    let produced = if produced_languages.is_empty() {
                        &project.languages
                    } else {
                        produced_languages
                    };
                    milestone_languages = Some(produced.iter().cloned().collect());
                }
            }
            StageOutcome::LanguageFailed { language_code, reason } => {
                if let Some(job) = &job {
                    if job_type.is_per_language() {
                        job_repo::finish(
                            conn,
                            &job.id,
                            JobStatus::Failed,
                            Some(reason.as_str()),
                            &now,
                        )?;
                    }
                }
                LanguageProgressTracker::mark_failure_tx(
                    conn,
                    project_id,
                    language_code,
                    job_type.as_str(),
                    reason,
                    &now,
                )?;
            }
        }

        let (done, remaining) = match job_type.progress_stage() {
            Some(stage) => {
                for code in &project.languages {
                    progress_repo::upsert(conn, project_id, code, &now)?;
                }
                let rows = progress_repo::list(conn, project_id)?;
                let aggregate = stage_aggregate(&rows, stage);
                (aggregate.done, aggregate.remaining)
            }
            None => (job_repo::count_active(conn, project_id, job_type)? == 0, Vec::new()),
        };

        if !done {
            info!(remaining = ?remaining, "stage pending");
            return Ok((
                StageAdvance::Pending {
                    status: project.status,
                    remaining,
                },
                None,
            ));
        }

        let (transition, notification) =
            Self::advance_tx(conn, &project, milestone_languages, true, Some("stage complete"))?;
        Ok((StageAdvance::Advanced(transition), notification))
    }

    /// Loads the job named in a report and checks it still belongs to the
    /// current stage. Finished jobs are accepted so retried reports are
    /// idempotent; cancelled ones are stale.
    fn reported_job(
        conn: &Connection,
        project_id: &str,
        job_type: JobType,
        job_id: &str,
    ) -> Result<JobRow, PipelineError> {
        let job = job_repo::find_by_id(conn, job_id)?
            .ok_or_else(|| PipelineError::JobNotFound(job_id.to_string()))?;
        if job.project_id != project_id {
            return Err(PipelineError::JobProjectMismatch {
                job_id: job_id.to_string(),
                expected: project_id.to_string(),
                actual: job.project_id,
            });
        }
        if job.job_type != job_type || job.status == JobStatus::Cancelled {
            return Err(PipelineError::StaleJob {
                job_id: job_id.to_string(),
                status: job.status,
            });
        }
        Ok(job)
    }

    /// Moves the project to its next status inside the caller's transaction.
    ///
    /// `vacuous_check` evaluates the current stage's aggregate for the
    /// all-languages-disabled alarm; approvals and starts skip it.
    ///
    /// With no active language left, per-language statuses have no work to
    /// queue, so they are passed through in the same transaction until the
    /// project lands on an approval gate, project-wide work or a terminal
    /// status. Each pass-through gets its own history entry.
    fn advance_tx(
        conn: &Connection,
        project: &ProjectRow,
        milestone_languages: Option<BTreeSet<String>>,
        vacuous_check: bool,
        message: Option<&str>,
    ) -> Result<(Transition, Option<StageNotification>), PipelineError> {
        let from = project.status;
        let to = from.next().ok_or_else(|| ValidationError::TerminalProject {
            project_id: project.id.clone(),
            status: from,
        })?;
        let now = now_timestamp();

        let rows = progress_repo::list(conn, &project.id)?;
        let active = active_languages(&project.languages, &rows);
        let vacuous = vacuous_check && from.progress_stage().is_some() && active.is_empty();

        let milestone = match from.progress_stage() {
            Some(stage) => Milestone::for_status(from, completed_languages(&rows, stage)),
            None => milestone_languages.and_then(|langs| Milestone::for_status(from, langs)),
        };
        let notified = NotificationGate::should_notify(from, milestone.as_ref(), &active);

        let mut steps = vec![(from, to)];
        while active.is_empty() {
            let (_, current) = steps[steps.len() - 1];
            match (current.progress_stage(), current.next()) {
                (Some(_), Some(next)) => steps.push((current, next)),
                _ => break,
            }
        }
        let landed = steps[steps.len() - 1].1;
        let skipped: Vec<ProjectStatus> = steps[1..].iter().map(|(status, _)| *status).collect();

        project_repo::update_status(conn, &project.id, landed, &now)?;

        if vacuous {
            warn!(
                project_id = %project.id,
                from = %from,
                "stage counted as done with no active languages"
            );
        }
        for status in &skipped {
            warn!(
                project_id = %project.id,
                status = %status,
                "stage skipped with no active languages"
            );
        }

        let mut enqueued_job_ids = Vec::new();
        if landed.is_terminal() {
            project_repo::clear_lock(conn, &project.id, &now)?;
        } else if let Some(job_type) = landed.job_type() {
            for outcome in JobQueue::enqueue_stage_tx(conn, project, job_type, &active, &now)? {
                enqueued_job_ids.push(outcome.job.id);
            }
        }

        let mut history_seq = 0;
        for (idx, (completed, status)) in steps.iter().enumerate() {
            let enqueued = if idx + 1 == steps.len() { enqueued_job_ids.len() } else { 0 };
            let (entry_message, entry_vacuous) = if idx == 0 {
                (message, vacuous)
            } else {
                (Some("skipped: no active languages"), true)
            };
            let extra = json!({
                "completed": completed,
                "activeLanguages": active,
                "vacuous": entry_vacuous,
                "notified": idx == 0 && notified,
                "enqueuedJobs": enqueued,
            });
            history_seq = history_repo::append(
                conn,
                &project.id,
                *status,
                entry_message,
                Some(&extra),
                &now,
            )?;
        }

        info!(project_id = %project.id, from = %from, to = %landed, notified, "status advanced");

        let notification = notified
            .then(|| StageNotification::new(&project.id, from, landed, &active, vacuous));
        Ok((
            Transition {
                from,
                to: landed,
                vacuous,
                notified,
                skipped,
                active_languages: active,
                enqueued_job_ids,
                history_seq,
            },
            notification,
        ))
    }

    fn deliver(&self, notification: Option<StageNotification>) {
        if let Some(notification) = notification {
            self.notifier.notify(notification);
        }
    }

    // -- Operator actions -------------------------------------------------

    /// Advances a validation-wait status. No lock is involved.
    pub fn approve(&self, project_id: &str) -> Result<Transition, PipelineError> {
        let (transition, notification) = self.db.with_transaction(|tx| {
            let project = live_project(tx, project_id)?;
            if !project.status.is_approval_gate() {
                return Err(ValidationError::NotApprovalGate(project.status).into());
            }
            Self::advance_tx(tx, &project, None, false, Some("approved"))
        })?;
        self.deliver(notification);
        Ok(transition)
    }

    /// Describes what an override would do without applying it.
    pub fn preview_override(
        &self,
        project_id: &str,
        target: ProjectStatus,
        languages: LanguageSelection,
    ) -> Result<ResetPreview, PipelineError> {
        self.planner.preview(project_id, target, languages)
    }

    /// Forces the project to `target` through the reset planner.
    pub fn override_status(
        &self,
        project_id: &str,
        target: ProjectStatus,
        languages: LanguageSelection,
        message: Option<&str>,
    ) -> Result<ResetOutcome, PipelineError> {
        self.planner.apply(project_id, target, languages, message)
    }

    /// Moves a live, non-terminal project to `Error`.
    pub fn mark_error(&self, project_id: &str, message: &str) -> Result<ResetOutcome, PipelineError> {
        self.terminate(project_id, ProjectStatus::Error, message)
    }

    /// Moves a live, non-terminal project to `Cancelled`.
    pub fn cancel_project(&self, project_id: &str) -> Result<ResetOutcome, PipelineError> {
        self.terminate(project_id, ProjectStatus::Cancelled, "project cancelled")
    }

    fn terminate(
        &self,
        project_id: &str,
        target: ProjectStatus,
        message: &str,
    ) -> Result<ResetOutcome, PipelineError> {
        self.db.with_transaction(|tx| {
            let project = live_project(tx, project_id)?;
            ensure_not_terminal(&project)?;
            let plan = build_reset_plan(target, LanguageSelection::All);
            let preview = ResetPlanner::preview_tx(tx, project_id, plan)?;
            ResetPlanner::apply_tx(tx, preview, Some(message), &now_timestamp())
        })
    }
}
