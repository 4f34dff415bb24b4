//! Status history repository: append-only audit log of status transitions.
//!
//! Rows are never updated or deleted (triggers enforce this); `seq` is the
//! authoritative ordering within a project.

use rusqlite::{params, Connection, Row};
use serde::Serialize;

use super::{corrupt, get_parsed, DatabaseError};
use crate::pipeline::catalog::ProjectStatus;

/// One status transition.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusHistoryRow {
    pub seq: i64,
    pub project_id: String,
    pub status: ProjectStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra: Option<serde_json::Value>,
    pub created_at: String,
}

impl StatusHistoryRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        let extra = match row.get::<_, Option<String>>("extra")? {
            Some(raw) => Some(
                serde_json::from_str(&raw)
                    .map_err(|e| corrupt(row, "status_history", "extra", &raw, e))?,
            ),
            None => None,
        };
        Ok(Self {
            seq: row.get("seq")?,
            project_id: row.get("project_id")?,
            status: get_parsed(row, "status_history", "status")?,
            message: row.get("message")?,
            extra,
            created_at: row.get("created_at")?,
        })
    }
}

/// Appends an entry and returns its sequence number.
pub fn append(
    conn: &Connection,
    project_id: &str,
    status: ProjectStatus,
    message: Option<&str>,
    extra: Option<&serde_json::Value>,
    created_at: &str,
) -> Result<i64, DatabaseError> {
    let extra = extra.map(|v| v.to_string());
    conn.execute(
        "INSERT INTO status_history (project_id, status, message, extra, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![project_id, status.as_str(), message, extra, created_at],
    )?;
    Ok(conn.last_insert_rowid())
}

/// All entries for a project in insertion order.
pub fn list(conn: &Connection, project_id: &str) -> Result<Vec<StatusHistoryRow>, DatabaseError> {
    let mut stmt =
        conn.prepare("SELECT * FROM status_history WHERE project_id = ?1 ORDER BY seq")?;
    let rows = stmt
        .query_map(params![project_id], StatusHistoryRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_conn;

    #[test]
    fn test_append_preserves_insertion_order() {
        let conn = test_conn();
        conn.execute(
            "INSERT INTO projects (id, created_at, updated_at) VALUES ('p1', 't0', 't0')",
            [],
        )
        .unwrap();

        // Same timestamp on purpose: order must not depend on created_at.
        append(&conn, "p1", ProjectStatus::New, Some("created"), None, "t1").unwrap();
        let extra = serde_json::json!({ "remaining": ["es"] });
        append(
            &conn,
            "p1",
            ProjectStatus::ProcessScript,
            None,
            Some(&extra),
            "t1",
        )
        .unwrap();

        let entries = list(&conn, "p1").unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].status, ProjectStatus::New);
        assert_eq!(entries[0].message.as_deref(), Some("created"));
        assert_eq!(entries[1].status, ProjectStatus::ProcessScript);
        assert_eq!(entries[1].extra, Some(extra));
        assert!(entries[0].seq < entries[1].seq);
    }
}
