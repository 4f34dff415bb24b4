//! Per-language progress tracking.
//!
//! Each `(project, language)` pair has its own row, so languages fail and
//! recover independently. Stage readiness is computed over the *active*
//! (non-disabled) languages only.

use std::collections::BTreeSet;

use rusqlite::Connection;
use serde::Serialize;

use crate::db::progress_repo::{self, LanguageProgressRow};
use crate::db::{now_timestamp, project_repo, Database};
use crate::error::ValidationError;
use crate::language;
use crate::pipeline::catalog::ProgressStage;
use crate::pipeline::error::PipelineError;
use crate::pipeline::queue::live_project;

/// Readiness of one stage across a project's languages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageAggregate {
    pub done: bool,
    /// Active languages still missing the flag, in project order.
    pub remaining: Vec<String>,
    /// Number of active languages the stage was evaluated over.
    pub active: usize,
}

impl StageAggregate {
    /// Done only because every language is disabled.
    ///
    /// Callers must treat this as an alarm, not as real completion.
    pub fn is_vacuous(&self) -> bool {
        self.done && self.active == 0
    }
}

/// Readiness of every tracked stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressAggregate {
    pub audio: StageAggregate,
    pub transcription: StageAggregate,
    pub captions: StageAggregate,
    pub video_parts: StageAggregate,
    pub final_video: StageAggregate,
}

impl ProgressAggregate {
    /// Computes the aggregate from a project's progress rows.
    ///
    /// A stage is done when there are no active languages, or when every
    /// active language has its flag set.
    pub fn from_rows(rows: &[LanguageProgressRow]) -> Self {
        Self {
            audio: stage_aggregate(rows, ProgressStage::Audio),
            transcription: stage_aggregate(rows, ProgressStage::Transcription),
            captions: stage_aggregate(rows, ProgressStage::Captions),
            video_parts: stage_aggregate(rows, ProgressStage::VideoParts),
            final_video: stage_aggregate(rows, ProgressStage::FinalVideo),
        }
    }

    pub fn get(&self, stage: ProgressStage) -> &StageAggregate {
        match stage {
            ProgressStage::Audio => &self.audio,
            ProgressStage::Transcription => &self.transcription,
            ProgressStage::Captions => &self.captions,
            ProgressStage::VideoParts => &self.video_parts,
            ProgressStage::FinalVideo => &self.final_video,
        }
    }
}

/// Aggregate for a single stage.
pub fn stage_aggregate(rows: &[LanguageProgressRow], stage: ProgressStage) -> StageAggregate {
    let active: Vec<&LanguageProgressRow> = rows.iter().filter(|r| r.is_active()).collect();
    let remaining: Vec<String> = active
        .iter()
        .filter(|r| !r.flag(stage))
        .map(|r| r.language_code.clone())
        .collect();
    StageAggregate {
        done: remaining.is_empty(),
        remaining,
        active: active.len(),
    }
}

/// Active languages that have completed `stage`.
pub fn completed_languages(rows: &[LanguageProgressRow], stage: ProgressStage) -> BTreeSet<String> {
    rows.iter()
        .filter(|r| r.is_active() && r.flag(stage))
        .map(|r| r.language_code.clone())
        .collect()
}

/// Languages of the project that are not disabled.
///
/// A language without a progress row has never failed, so it counts as active.
pub fn active_languages(project_languages: &[String], rows: &[LanguageProgressRow]) -> Vec<String> {
    project_languages
        .iter()
        .filter(|code| {
            !rows
                .iter()
                .any(|r| &r.language_code == *code && r.disabled)
        })
        .cloned()
        .collect()
}

/// Owns per-language completion flags and failure state.
#[derive(Clone)]
pub struct LanguageProgressTracker {
    db: Database,
}

impl LanguageProgressTracker {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Ensures a row exists for `(project, language)`. Idempotent.
    pub fn upsert(&self, project_id: &str, language_code: &str) -> Result<(), PipelineError> {
        let code = language::parse_code(language_code)?;
        self.db.with_transaction(|tx| {
            check_language(tx, project_id, &code)?;
            progress_repo::upsert(tx, project_id, &code, &now_timestamp())?;
            Ok(())
        })
    }

    /// Sets one completion flag for one language.
    pub fn mark_flag(
        &self,
        project_id: &str,
        language_code: &str,
        stage: ProgressStage,
        value: bool,
    ) -> Result<(), PipelineError> {
        let code = language::parse_code(language_code)?;
        self.db.with_transaction(|tx| {
            check_language(tx, project_id, &code)?;
            Self::mark_flag_tx(tx, project_id, &code, stage, value, &now_timestamp())
        })
    }

    /// Disables a language and records the failing step and reason.
    pub fn mark_failure(
        &self,
        project_id: &str,
        language_code: &str,
        step: &str,
        reason: &str,
    ) -> Result<(), PipelineError> {
        let code = language::parse_code(language_code)?;
        self.db.with_transaction(|tx| {
            check_language(tx, project_id, &code)?;
            Self::mark_failure_tx(tx, project_id, &code, step, reason, &now_timestamp())
        })
    }

    /// Re-enables a language. Completion flags are untouched.
    pub fn clear_failure(&self, project_id: &str, language_code: &str) -> Result<(), PipelineError> {
        let code = language::parse_code(language_code)?;
        self.db.with_transaction(|tx| {
            check_language(tx, project_id, &code)?;
            progress_repo::clear_failures(tx, project_id, &[code.clone()], &now_timestamp())?;
            Ok(())
        })
    }

    /// Per-stage readiness for a project.
    pub fn aggregate(&self, project_id: &str) -> Result<ProgressAggregate, PipelineError> {
        let rows = self.rows(project_id)?;
        Ok(ProgressAggregate::from_rows(&rows))
    }

    /// All progress rows of a project, in project language order.
    pub fn rows(&self, project_id: &str) -> Result<Vec<LanguageProgressRow>, PipelineError> {
        self.db.with_conn(|conn| {
            if project_repo::find_live(conn, project_id)?.is_none() {
                return Ok(None);
            }
            Ok(Some(progress_repo::list(conn, project_id)?))
        })?
        .ok_or_else(|| PipelineError::ProjectNotFound(project_id.to_string()))
    }

    pub(crate) fn mark_flag_tx(
        conn: &Connection,
        project_id: &str,
        code: &str,
        stage: ProgressStage,
        value: bool,
        now: &str,
    ) -> Result<(), PipelineError> {
        progress_repo::upsert(conn, project_id, code, now)?;
        progress_repo::set_flag(conn, project_id, code, stage, value, now)?;
        log::debug!(
            "Progress {} {} {} = {}",
            project_id,
            code,
            stage.column(),
            value
        );
        Ok(())
    }

    pub(crate) fn mark_failure_tx(
        conn: &Connection,
        project_id: &str,
        code: &str,
        step: &str,
        reason: &str,
        now: &str,
    ) -> Result<(), PipelineError> {
        progress_repo::upsert(conn, project_id, code, now)?;
        progress_repo::set_failure(conn, project_id, code, step, reason, now)?;
        tracing::warn!(
            project_id,
            language = code,
            step,
            reason,
            "language disabled after failure"
        );
        Ok(())
    }
}

/// Rejects languages that are not configured for the project.
pub(crate) fn check_language(
    conn: &Connection,
    project_id: &str,
    code: &str,
) -> Result<(), PipelineError> {
    let project = live_project(conn, project_id)?;
    if project.languages.iter().any(|l| l == code) {
        Ok(())
    } else {
        Err(ValidationError::UnknownLanguage {
            project_id: project_id.to_string(),
            language: code.to_string(),
        }
        .into())
    }
}
