//! Project repository: the `projects` and `project_languages` tables.
//!
//! The lock columns are only ever changed through single conditional
//! `UPDATE` statements, so acquisition and release are compare-and-set.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{get_parsed, DatabaseError};
use crate::pipeline::catalog::ProjectStatus;

/// A project row with its ordered language list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectRow {
    pub id: String,
    pub status: ProjectStatus,
    /// Target languages; the first entry is the primary language.
    pub languages: Vec<String>,
    pub current_daemon_id: Option<String>,
    pub current_daemon_locked_at: Option<String>,
    pub final_video_url: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub deleted_at: Option<String>,
}

impl ProjectRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            status: get_parsed(row, "projects", "status")?,
            languages: Vec::new(),
            current_daemon_id: row.get("current_daemon_id")?,
            current_daemon_locked_at: row.get("current_daemon_locked_at")?,
            final_video_url: row.get("final_video_url")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
            deleted_at: row.get("deleted_at")?,
        })
    }

    pub fn primary_language(&self) -> Option<&str> {
        self.languages.first().map(String::as_str)
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Inserts a project and its languages.
pub fn insert(conn: &Connection, project: &ProjectRow) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO projects (id, status, current_daemon_id, current_daemon_locked_at,
         final_video_url, created_at, updated_at, deleted_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            project.id,
            project.status.as_str(),
            project.current_daemon_id,
            project.current_daemon_locked_at,
            project.final_video_url,
            project.created_at,
            project.updated_at,
            project.deleted_at,
        ],
    )?;

    let mut stmt = conn.prepare(
        "INSERT INTO project_languages (project_id, language_code, position) VALUES (?1, ?2, ?3)",
    )?;
    for (position, code) in project.languages.iter().enumerate() {
        stmt.execute(params![project.id, code, position as i64])?;
    }
    Ok(())
}

/// Finds a project by id, including soft-deleted ones.
pub fn find_by_id(conn: &Connection, id: &str) -> Result<Option<ProjectRow>, DatabaseError> {
    let project = conn
        .query_row(
            "SELECT * FROM projects WHERE id = ?1",
            params![id],
            ProjectRow::from_row,
        )
        .optional()?;

    match project {
        Some(mut project) => {
            project.languages = languages(conn, id)?;
            Ok(Some(project))
        }
        None => Ok(None),
    }
}

/// Finds a project that has not been soft-deleted.
pub fn find_live(conn: &Connection, id: &str) -> Result<Option<ProjectRow>, DatabaseError> {
    Ok(find_by_id(conn, id)?.filter(|p| !p.is_deleted()))
}

/// Language codes of a project in configured order.
pub fn languages(conn: &Connection, project_id: &str) -> Result<Vec<String>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT language_code FROM project_languages WHERE project_id = ?1 ORDER BY position",
    )?;
    let codes = stmt
        .query_map(params![project_id], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(codes)
}

/// Lists live projects, optionally filtered by status, oldest first.
pub fn list(
    conn: &Connection,
    status: Option<ProjectStatus>,
) -> Result<Vec<ProjectRow>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT * FROM projects
         WHERE deleted_at IS NULL AND (?1 IS NULL OR status = ?1)
         ORDER BY created_at, id",
    )?;
    let mut projects = stmt
        .query_map(params![status.map(|s| s.as_str())], ProjectRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    for project in &mut projects {
        project.languages = languages(conn, &project.id)?;
    }
    Ok(projects)
}

/// Sets the status of a live project.
pub fn update_status(
    conn: &Connection,
    id: &str,
    status: ProjectStatus,
    updated_at: &str,
) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "UPDATE projects SET status = ?2, updated_at = ?3 WHERE id = ?1 AND deleted_at IS NULL",
        params![id, status.as_str(), updated_at],
    )?;
    Ok(changed == 1)
}

/// Sets or clears the final-video pointer.
pub fn set_final_video(
    conn: &Connection,
    id: &str,
    url: Option<&str>,
    updated_at: &str,
) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE projects SET final_video_url = ?2, updated_at = ?3 WHERE id = ?1",
        params![id, url, updated_at],
    )?;
    Ok(())
}

/// Compare-and-set lock acquisition.
///
/// Succeeds when the lock is free, already held by `daemon_id`, or (when
/// `stale_before` is given) held by a lock taken before that timestamp.
/// Re-acquisition by the holder refreshes `current_daemon_locked_at`.
pub fn try_acquire_lock(
    conn: &Connection,
    id: &str,
    daemon_id: &str,
    locked_at: &str,
    stale_before: Option<&str>,
) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "UPDATE projects
         SET current_daemon_id = ?2, current_daemon_locked_at = ?3, updated_at = ?3
         WHERE id = ?1 AND deleted_at IS NULL
           AND (current_daemon_id IS NULL
                OR current_daemon_id = ?2
                OR (?4 IS NOT NULL AND current_daemon_locked_at < ?4))",
        params![id, daemon_id, locked_at, stale_before],
    )?;
    Ok(changed == 1)
}

/// Refreshes the lock timestamp if `daemon_id` still holds the lock.
pub fn renew_lock(
    conn: &Connection,
    id: &str,
    daemon_id: &str,
    locked_at: &str,
) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "UPDATE projects SET current_daemon_locked_at = ?3, updated_at = ?3
         WHERE id = ?1 AND deleted_at IS NULL AND current_daemon_id = ?2",
        params![id, daemon_id, locked_at],
    )?;
    Ok(changed == 1)
}

/// Compare-and-clear: releases the lock only if `daemon_id` holds it.
pub fn release_lock(
    conn: &Connection,
    id: &str,
    daemon_id: &str,
    updated_at: &str,
) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "UPDATE projects
         SET current_daemon_id = NULL, current_daemon_locked_at = NULL, updated_at = ?3
         WHERE id = ?1 AND current_daemon_id = ?2",
        params![id, daemon_id, updated_at],
    )?;
    Ok(changed == 1)
}

/// Clears the lock regardless of holder. Returns the previous holder.
pub fn clear_lock(
    conn: &Connection,
    id: &str,
    updated_at: &str,
) -> Result<Option<String>, DatabaseError> {
    let holder: Option<String> = conn
        .query_row(
            "SELECT current_daemon_id FROM projects WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )
        .optional()?
        .flatten();
    if holder.is_some() {
        conn.execute(
            "UPDATE projects
             SET current_daemon_id = NULL, current_daemon_locked_at = NULL, updated_at = ?2
             WHERE id = ?1",
            params![id, updated_at],
        )?;
    }
    Ok(holder)
}

/// Marks a project deleted. Returns false if it was already deleted or missing.
pub fn soft_delete(conn: &Connection, id: &str, deleted_at: &str) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "UPDATE projects
         SET deleted_at = ?2, updated_at = ?2,
             current_daemon_id = NULL, current_daemon_locked_at = NULL
         WHERE id = ?1 AND deleted_at IS NULL",
        params![id, deleted_at],
    )?;
    Ok(changed == 1)
}
