//! Language progress repository: one row per `(project, language)`.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{placeholders, DatabaseError};
use crate::pipeline::catalog::ProgressStage;

/// Completion flags and failure state for one language of a project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LanguageProgressRow {
    pub project_id: String,
    pub language_code: String,
    pub audio_done: bool,
    pub transcription_done: bool,
    pub captions_done: bool,
    pub video_parts_done: bool,
    pub final_video_done: bool,
    /// Excluded from every stage aggregate while set.
    pub disabled: bool,
    pub failed_step: Option<String>,
    pub failure_reason: Option<String>,
    pub updated_at: String,
}

impl LanguageProgressRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            project_id: row.get("project_id")?,
            language_code: row.get("language_code")?,
            audio_done: row.get("audio_done")?,
            transcription_done: row.get("transcription_done")?,
            captions_done: row.get("captions_done")?,
            video_parts_done: row.get("video_parts_done")?,
            final_video_done: row.get("final_video_done")?,
            disabled: row.get("disabled")?,
            failed_step: row.get("failed_step")?,
            failure_reason: row.get("failure_reason")?,
            updated_at: row.get("updated_at")?,
        })
    }

    pub fn flag(&self, stage: ProgressStage) -> bool {
        match stage {
            ProgressStage::Audio => self.audio_done,
            ProgressStage::Transcription => self.transcription_done,
            ProgressStage::Captions => self.captions_done,
            ProgressStage::VideoParts => self.video_parts_done,
            ProgressStage::FinalVideo => self.final_video_done,
        }
    }

    pub fn is_active(&self) -> bool {
        !self.disabled
    }
}

/// Ensures a row exists. Existing rows are left untouched.
pub fn upsert(
    conn: &Connection,
    project_id: &str,
    language_code: &str,
    now: &str,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO language_progress (project_id, language_code, updated_at)
         VALUES (?1, ?2, ?3)
         ON CONFLICT(project_id, language_code) DO NOTHING",
        params![project_id, language_code, now],
    )?;
    Ok(())
}

/// Sets one completion flag. Returns false when the row does not exist.
pub fn set_flag(
    conn: &Connection,
    project_id: &str,
    language_code: &str,
    stage: ProgressStage,
    value: bool,
    now: &str,
) -> Result<bool, DatabaseError> {
    // The column name comes from a closed enum, never from input.
    let sql = format!(
        "UPDATE language_progress SET {} = ?3, updated_at = ?4
         WHERE project_id = ?1 AND language_code = ?2",
        stage.column()
    );
    let changed = conn.execute(&sql, params![project_id, language_code, value, now])?;
    Ok(changed == 1)
}

/// Disables a language and records why.
pub fn set_failure(
    conn: &Connection,
    project_id: &str,
    language_code: &str,
    step: &str,
    reason: &str,
    now: &str,
) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "UPDATE language_progress
         SET disabled = 1, failed_step = ?3, failure_reason = ?4, updated_at = ?5
         WHERE project_id = ?1 AND language_code = ?2",
        params![project_id, language_code, step, reason, now],
    )?;
    Ok(changed == 1)
}

/// Re-enables the given languages. Completion flags are untouched.
pub fn clear_failures(
    conn: &Connection,
    project_id: &str,
    languages: &[String],
    now: &str,
) -> Result<usize, DatabaseError> {
    if languages.is_empty() {
        return Ok(0);
    }
    let sql = format!(
        "UPDATE language_progress
         SET disabled = 0, failed_step = NULL, failure_reason = NULL, updated_at = ?2
         WHERE project_id = ?1 AND language_code IN ({})",
        placeholders(3, languages.len())
    );
    execute_for_languages(conn, &sql, project_id, now, languages)
}

/// Resets the given flags to false for the given languages in one statement.
pub fn clear_flags(
    conn: &Connection,
    project_id: &str,
    languages: &[String],
    stages: &[ProgressStage],
    now: &str,
) -> Result<usize, DatabaseError> {
    if languages.is_empty() || stages.is_empty() {
        return Ok(0);
    }
    let assignments: Vec<String> = stages
        .iter()
        .map(|stage| format!("{} = 0", stage.column()))
        .collect();
    let sql = format!(
        "UPDATE language_progress SET {}, updated_at = ?2
         WHERE project_id = ?1 AND language_code IN ({})",
        assignments.join(", "),
        placeholders(3, languages.len())
    );
    execute_for_languages(conn, &sql, project_id, now, languages)
}

fn execute_for_languages(
    conn: &Connection,
    sql: &str,
    project_id: &str,
    now: &str,
    languages: &[String],
) -> Result<usize, DatabaseError> {
    let mut param_values: Vec<&dyn rusqlite::types::ToSql> = vec![&project_id, &now];
    for code in languages {
        param_values.push(code);
    }
    let changed = conn.execute(sql, param_values.as_slice())?;
    Ok(changed)
}

/// Finds the row for one language.
pub fn find(
    conn: &Connection,
    project_id: &str,
    language_code: &str,
) -> Result<Option<LanguageProgressRow>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT * FROM language_progress WHERE project_id = ?1 AND language_code = ?2",
            params![project_id, language_code],
            LanguageProgressRow::from_row,
        )
        .optional()?;
    Ok(row)
}

/// All rows of a project, in the project's configured language order.
pub fn list(conn: &Connection, project_id: &str) -> Result<Vec<LanguageProgressRow>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT lp.* FROM language_progress lp
         LEFT JOIN project_languages pl
           ON pl.project_id = lp.project_id AND pl.language_code = lp.language_code
         WHERE lp.project_id = ?1
         ORDER BY COALESCE(pl.position, 1000000), lp.language_code",
    )?;
    let rows = stmt
        .query_map(params![project_id], LanguageProgressRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}
