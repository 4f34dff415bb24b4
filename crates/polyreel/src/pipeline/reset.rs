//! Reset planning and execution for operator status overrides.
//!
//! [`build_reset_plan`] is pure: it derives everything from the target's
//! position in the pipeline. [`ResetPlanner::apply`] executes a plan in one
//! transaction together with the status change and its history entry.

use std::collections::HashSet;

use rusqlite::Connection;
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use crate::db::progress_repo::{self, LanguageProgressRow};
use crate::db::project_repo::{self, ProjectRow};
use crate::db::{history_repo, now_timestamp, Database};
use crate::error::ValidationError;
use crate::language;
use crate::pipeline::catalog::{JobType, ProgressStage, ProjectStatus, StatusCatalog};
use crate::pipeline::error::PipelineError;
use crate::pipeline::queue::{live_project, JobQueue};
use crate::pipeline::tracker::active_languages;

/// Which languages a reset applies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", content = "languages", rename_all = "snake_case")]
pub enum LanguageSelection {
    /// No selection given: flags are reset for every language, failures for none.
    All,
    /// Explicit selection: flags and failures are reset for exactly these.
    /// May be empty, in which case no language is touched.
    Only(Vec<String>),
}

impl LanguageSelection {
    /// Normalizes and de-duplicates an explicit selection. Empty is allowed.
    pub fn only<S: AsRef<str>>(codes: &[S]) -> Result<Self, ValidationError> {
        let mut seen = HashSet::new();
        let mut selected = Vec::new();
        for code in codes {
            let code = language::parse_code(code.as_ref())?;
            if seen.insert(code.clone()) {
                selected.push(code);
            }
        }
        Ok(LanguageSelection::Only(selected))
    }

    /// Languages whose completion flags are reset.
    pub fn flag_languages(&self, project_languages: &[String]) -> Vec<String> {
        match self {
            LanguageSelection::All => project_languages.to_vec(),
            LanguageSelection::Only(codes) => codes.clone(),
        }
    }

    /// Languages whose failure state is cleared.
    pub fn failure_languages(&self) -> Vec<String> {
        match self {
            LanguageSelection::All => Vec::new(),
            LanguageSelection::Only(codes) => codes.clone(),
        }
    }

    fn is_empty_selection(&self) -> bool {
        matches!(self, LanguageSelection::Only(codes) if codes.is_empty())
    }
}

/// What a reset to `target` invalidates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetPlan {
    pub target: ProjectStatus,
    pub languages: LanguageSelection,
    /// The target stage's flag and every downstream flag.
    pub flags_to_clear: Vec<ProgressStage>,
    pub clear_final_video: bool,
    /// The target stage's job type and every downstream job type.
    pub job_types_to_cancel: Vec<JobType>,
    /// Set for terminal targets.
    pub release_lock: bool,
}

/// Derives the reset plan from the target's pipeline position.
///
/// Terminal targets cancel every job type, keep all flags and release the
/// lock. Other targets never touch flags or jobs upstream of themselves.
pub fn build_reset_plan(target: ProjectStatus, languages: LanguageSelection) -> ResetPlan {
    if target.is_terminal() {
        return ResetPlan {
            target,
            languages,
            flags_to_clear: Vec::new(),
            clear_final_video: false,
            job_types_to_cancel: JobType::ALL.to_vec(),
            release_lock: true,
        };
    }

    let clear_final_video = match (target.position(), ProjectStatus::ProcessVideoMain.position()) {
        (Some(pos), Some(assembly)) => pos <= assembly,
        _ => false,
    };

    ResetPlan {
        target,
        languages,
        flags_to_clear: StatusCatalog::stages_from(target),
        clear_final_video,
        job_types_to_cancel: StatusCatalog::job_types_from(target),
        release_lock: false,
    }
}

/// Conditions an operator must see before committing a reset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResetWarning {
    /// An explicit but empty selection: the status changes, no language is reset.
    NoLanguagesSelected,
    /// Failed languages that stay disabled after the reset.
    FailedLanguagesRemainDisabled { languages: Vec<String> },
    /// Every language stays disabled, so every stage will count as done.
    NoActiveLanguages,
}

/// A plan resolved against a project's current state, not yet committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetPreview {
    pub project_id: String,
    pub from: ProjectStatus,
    pub plan: ResetPlan,
    pub flag_languages: Vec<String>,
    pub failure_languages: Vec<String>,
    pub warnings: Vec<ResetWarning>,
}

impl ResetPreview {
    fn resolve(project: &ProjectRow, rows: &[LanguageProgressRow], plan: ResetPlan) -> Self {
        let flag_languages = plan.languages.flag_languages(&project.languages);
        let failure_languages = plan.languages.failure_languages();

        let mut warnings = Vec::new();
        if plan.languages.is_empty_selection() {
            warnings.push(ResetWarning::NoLanguagesSelected);
        }

        let still_disabled: Vec<String> = rows
            .iter()
            .filter(|r| r.disabled && !failure_languages.contains(&r.language_code))
            .map(|r| r.language_code.clone())
            .collect();
        if !plan.target.is_terminal() {
            if !still_disabled.is_empty() {
                warnings.push(ResetWarning::FailedLanguagesRemainDisabled {
                    languages: still_disabled.clone(),
                });
            }
            let active_after = project
                .languages
                .iter()
                .filter(|code| !still_disabled.contains(code))
                .count();
            if active_after == 0 {
                warnings.push(ResetWarning::NoActiveLanguages);
            }
        }

        Self {
            project_id: project.id.clone(),
            from: project.status,
            plan,
            flag_languages,
            failure_languages,
            warnings,
        }
    }
}

/// A committed reset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetOutcome {
    pub preview: ResetPreview,
    pub cancelled_jobs: usize,
    /// Jobs queued for the target stage.
    pub enqueued_job_ids: Vec<String>,
    /// Previous lock holder, when the reset released the lock.
    pub released_lock: Option<String>,
    pub history_seq: i64,
}

/// Computes and applies reset plans.
#[derive(Clone)]
pub struct ResetPlanner {
    db: Database,
}

impl ResetPlanner {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Resolves the plan against the project without changing anything.
    pub fn preview(
        &self,
        project_id: &str,
        target: ProjectStatus,
        languages: LanguageSelection,
    ) -> Result<ResetPreview, PipelineError> {
        let plan = build_reset_plan(target, languages);
        self.db.with_conn(|conn| Ok(Self::preview_tx(conn, project_id, plan)))?
    }

    /// Applies the status change and its reset plan atomically.
    pub fn apply(
        &self,
        project_id: &str,
        target: ProjectStatus,
        languages: LanguageSelection,
        message: Option<&str>,
    ) -> Result<ResetOutcome, PipelineError> {
        let plan = build_reset_plan(target, languages);
        self.db.with_transaction(|tx| {
            let preview = Self::preview_tx(tx, project_id, plan)?;
            Self::apply_tx(tx, preview, message, &now_timestamp())
        })
    }

    pub(crate) fn preview_tx(
        conn: &Connection,
        project_id: &str,
        plan: ResetPlan,
    ) -> Result<ResetPreview, PipelineError> {
        let project = live_project(conn, project_id)?;
        if let LanguageSelection::Only(codes) = &plan.languages {
            if let Some(unknown) = codes.iter().find(|c| !project.languages.contains(c)) {
                return Err(ValidationError::UnknownLanguage {
                    project_id: project_id.to_string(),
                    language: unknown.clone(),
                }
                .into());
            }
        }
        let rows = progress_repo::list(conn, project_id)?;
        Ok(ResetPreview::resolve(&project, &rows, plan))
    }

    /// Executes a resolved preview inside the caller's transaction.
    pub(crate) fn apply_tx(
        conn: &Connection,
        preview: ResetPreview,
        message: Option<&str>,
        now: &str,
    ) -> Result<ResetOutcome, PipelineError> {
        let project_id = preview.project_id.as_str();
        let plan = &preview.plan;

        project_repo::update_status(conn, project_id, plan.target, now)?;

        for code in &preview.flag_languages {
            progress_repo::upsert(conn, project_id, code, now)?;
        }
        progress_repo::clear_flags(
            conn,
            project_id,
            &preview.flag_languages,
            &plan.flags_to_clear,
            now,
        )?;
        progress_repo::clear_failures(conn, project_id, &preview.failure_languages, now)?;

        if plan.clear_final_video {
            project_repo::set_final_video(conn, project_id, None, now)?;
        }

        let cancelled_jobs =
            JobQueue::cancel_active_tx(conn, project_id, &plan.job_types_to_cancel, now)?;

        let released_lock = if plan.release_lock {
            project_repo::clear_lock(conn, project_id, now)?
        } else {
            None
        };

        let mut enqueued_job_ids = Vec::new();
        if let Some(job_type) = plan.target.job_type() {
            let project = live_project(conn, project_id)?;
            let rows = progress_repo::list(conn, project_id)?;
            let mut active = active_languages(&project.languages, &rows);
            // Languages whose target flag survived the reset need no new job.
            if let Some(stage) = plan.target.progress_stage() {
                active.retain(|code| {
                    !rows
                        .iter()
                        .any(|r| &r.language_code == code && r.flag(stage))
                });
            }
            for outcome in JobQueue::enqueue_stage_tx(conn, &project, job_type, &active, now)? {
                enqueued_job_ids.push(outcome.job.id);
            }
        }

        let extra = json!({
            "resetFrom": preview.from,
            "flagsCleared": plan.flags_to_clear,
            "languages": preview.flag_languages,
            "failuresCleared": preview.failure_languages,
            "clearFinalVideo": plan.clear_final_video,
            "cancelledJobs": cancelled_jobs,
            "warnings": preview.warnings,
        });
        let history_seq = history_repo::append(
            conn,
            project_id,
            plan.target,
            message.or(Some("status override")),
            Some(&extra),
            now,
        )?;

        for warning in &preview.warnings {
            warn!(project_id, target = %plan.target, ?warning, "reset applied with warning");
        }
        info!(
            project_id,
            from = %preview.from,
            to = %plan.target,
            cancelled_jobs,
            "status reset applied"
        );

        Ok(ResetOutcome {
            preview,
            cancelled_jobs,
            enqueued_job_ids,
            released_lock,
            history_seq,
        })
    }
}
