//! Job repository: CRUD operations for the `jobs` table.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{corrupt, get_parsed, placeholders, DatabaseError};
use crate::pipeline::catalog::JobType;
use crate::pipeline::job::{JobPayload, JobStatus};

const ACTIVE_STATUSES: &str = "('queued', 'running')";

/// A job row from the database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRow {
    pub id: String,
    pub project_id: String,
    pub job_type: JobType,
    /// Normalized language code, or `""` for project-wide jobs.
    pub language_key: String,
    pub status: JobStatus,
    pub payload: JobPayload,
    /// Daemon that claimed the job.
    pub daemon_id: Option<String>,
    pub error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        let raw_payload: String = row.get("payload")?;
        let payload = serde_json::from_str(&raw_payload)
            .map_err(|e| corrupt(row, "jobs", "payload", &raw_payload, e))?;

        Ok(Self {
            id: row.get("id")?,
            project_id: row.get("project_id")?,
            job_type: get_parsed(row, "jobs", "job_type")?,
            language_key: row.get("language_key")?,
            status: get_parsed(row, "jobs", "status")?,
            payload,
            daemon_id: row.get("daemon_id")?,
            error: row.get("error")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
            started_at: row.get("started_at")?,
            completed_at: row.get("completed_at")?,
        })
    }

    /// The language this job is scoped to, if any.
    pub fn language(&self) -> Option<&str> {
        (!self.language_key.is_empty()).then_some(self.language_key.as_str())
    }
}

/// Query filter parameters for job listing.
#[derive(Debug, Default, Clone)]
pub struct JobFilter {
    pub job_type: Option<JobType>,
    pub status: Option<JobStatus>,
    pub language: Option<String>,
    pub limit: Option<u64>,
}

/// Inserts a new job row.
pub fn insert(conn: &Connection, job: &JobRow) -> Result<(), DatabaseError> {
    let payload = serde_json::to_string(&job.payload).map_err(|e| {
        DatabaseError::Sqlite(rusqlite::Error::ToSqlConversionFailure(Box::new(e)))
    })?;
    conn.execute(
        "INSERT INTO jobs (id, project_id, job_type, language_key, status, payload, daemon_id,
         error, created_at, updated_at, started_at, completed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            job.id,
            job.project_id,
            job.job_type.as_str(),
            job.language_key,
            job.status.as_str(),
            payload,
            job.daemon_id,
            job.error,
            job.created_at,
            job.updated_at,
            job.started_at,
            job.completed_at,
        ],
    )?;
    Ok(())
}

/// Finds a job by its ID.
pub fn find_by_id(conn: &Connection, id: &str) -> Result<Option<JobRow>, DatabaseError> {
    let job = conn
        .query_row(
            "SELECT * FROM jobs WHERE id = ?1",
            params![id],
            JobRow::from_row,
        )
        .optional()?;
    Ok(job)
}

/// Finds the queued or running job for `(project, type, language)`.
pub fn find_active(
    conn: &Connection,
    project_id: &str,
    job_type: JobType,
    language_key: &str,
) -> Result<Option<JobRow>, DatabaseError> {
    let job = conn
        .query_row(
            &format!(
                "SELECT * FROM jobs
                 WHERE project_id = ?1 AND job_type = ?2 AND language_key = ?3
                   AND status IN {}",
                ACTIVE_STATUSES
            ),
            params![project_id, job_type.as_str(), language_key],
            JobRow::from_row,
        )
        .optional()?;
    Ok(job)
}

/// Oldest queued job of a project.
pub fn next_queued(conn: &Connection, project_id: &str) -> Result<Option<JobRow>, DatabaseError> {
    let job = conn
        .query_row(
            "SELECT * FROM jobs WHERE project_id = ?1 AND status = 'queued'
             ORDER BY created_at, rowid LIMIT 1",
            params![project_id],
            JobRow::from_row,
        )
        .optional()?;
    Ok(job)
}

/// Moves a queued job to running under `daemon_id`.
pub fn mark_running(
    conn: &Connection,
    id: &str,
    daemon_id: &str,
    now: &str,
) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "UPDATE jobs SET status = 'running', daemon_id = ?2, started_at = ?3, updated_at = ?3
         WHERE id = ?1 AND status = 'queued'",
        params![id, daemon_id, now],
    )?;
    Ok(changed == 1)
}

/// Moves an active job to a finished status (`done` or `failed`).
pub fn finish(
    conn: &Connection,
    id: &str,
    status: JobStatus,
    error: Option<&str>,
    now: &str,
) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        &format!(
            "UPDATE jobs SET status = ?2, error = ?3, completed_at = ?4, updated_at = ?4
             WHERE id = ?1 AND status IN {}",
            ACTIVE_STATUSES
        ),
        params![id, status.as_str(), error, now],
    )?;
    Ok(changed == 1)
}

/// Cancels every active job of the given types. Returns the number cancelled.
pub fn cancel_active(
    conn: &Connection,
    project_id: &str,
    job_types: &[JobType],
    now: &str,
) -> Result<usize, DatabaseError> {
    if job_types.is_empty() {
        return Ok(0);
    }

    let sql = format!(
        "UPDATE jobs SET status = 'cancelled', completed_at = ?2, updated_at = ?2
         WHERE project_id = ?1 AND status IN {} AND job_type IN ({})",
        ACTIVE_STATUSES,
        placeholders(3, job_types.len())
    );

    let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();
    param_values.push(Box::new(project_id.to_string()));
    param_values.push(Box::new(now.to_string()));
    for job_type in job_types {
        param_values.push(Box::new(job_type.as_str()));
    }

    let params_ref: Vec<&dyn rusqlite::types::ToSql> =
        param_values.iter().map(|p| p.as_ref()).collect();
    let changed = conn.execute(&sql, params_ref.as_slice())?;
    Ok(changed)
}

/// Counts active jobs of one type for a project.
pub fn count_active(
    conn: &Connection,
    project_id: &str,
    job_type: JobType,
) -> Result<u64, DatabaseError> {
    let count: u64 = conn.query_row(
        &format!(
            "SELECT COUNT(*) FROM jobs WHERE project_id = ?1 AND job_type = ?2 AND status IN {}",
            ACTIVE_STATUSES
        ),
        params![project_id, job_type.as_str()],
        |r| r.get(0),
    )?;
    Ok(count)
}

/// Lists a project's jobs, oldest first.
pub fn list(
    conn: &Connection,
    project_id: &str,
    filter: &JobFilter,
) -> Result<Vec<JobRow>, DatabaseError> {
    let mut conditions = vec!["project_id = ?1".to_string()];
    let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> =
        vec![Box::new(project_id.to_string())];

    if let Some(job_type) = filter.job_type {
        conditions.push(format!("job_type = ?{}", param_values.len() + 1));
        param_values.push(Box::new(job_type.as_str()));
    }
    if let Some(status) = filter.status {
        conditions.push(format!("status = ?{}", param_values.len() + 1));
        param_values.push(Box::new(status.as_str()));
    }
    if let Some(ref language) = filter.language {
        conditions.push(format!("language_key = ?{}", param_values.len() + 1));
        param_values.push(Box::new(crate::language::normalize(language)));
    }

    let limit = filter.limit.map(|l| l as i64).unwrap_or(-1);
    param_values.push(Box::new(limit));
    let sql = format!(
        "SELECT * FROM jobs WHERE {} ORDER BY created_at, rowid LIMIT ?{}",
        conditions.join(" AND "),
        param_values.len()
    );

    let params_ref: Vec<&dyn rusqlite::types::ToSql> =
        param_values.iter().map(|p| p.as_ref()).collect();
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_ref.as_slice(), JobRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{project_repo, test_conn};
    use crate::pipeline::catalog::ProjectStatus;
    use crate::pipeline::job::{LanguageJobPayload, ProjectJobPayload};

    fn seed_project(conn: &Connection) {
        conn.execute(
            "INSERT INTO projects (id, status, created_at, updated_at)
             VALUES ('p1', ?1, 't0', 't0')",
            params![ProjectStatus::ProcessVideoPartsGeneration.as_str()],
        )
        .unwrap();
        assert!(project_repo::find_by_id(conn, "p1").unwrap().is_some());
    }

    fn sample_job(id: &str, payload: JobPayload, created_at: &str) -> JobRow {
        JobRow {
            id: id.to_string(),
            project_id: "p1".to_string(),
            job_type: payload.job_type(),
            language_key: payload.language_key(),
            status: JobStatus::Queued,
            payload,
            daemon_id: None,
            error: None,
            created_at: created_at.to_string(),
            updated_at: created_at.to_string(),
            started_at: None,
            completed_at: None,
        }
    }

    fn parts(lang: &str) -> JobPayload {
        JobPayload::VideoParts(LanguageJobPayload {
            language_code: lang.to_string(),
        })
    }

    #[test]
    fn test_insert_and_find() {
        let conn = test_conn();
        seed_project(&conn);
        let job = sample_job("j1", parts("en"), "t1");
        insert(&conn, &job).unwrap();

        let found = find_by_id(&conn, "j1").unwrap().unwrap();
        assert_eq!(found, job);
        assert_eq!(found.language(), Some("en"));
    }

    #[test]
    fn test_find_active_ignores_finished_jobs() {
        let conn = test_conn();
        seed_project(&conn);
        insert(&conn, &sample_job("j1", parts("en"), "t1")).unwrap();
        assert!(finish(&conn, "j1", JobStatus::Done, None, "t2").unwrap());

        assert!(find_active(&conn, "p1", JobType::VideoParts, "en")
            .unwrap()
            .is_none());

        insert(&conn, &sample_job("j2", parts("en"), "t3")).unwrap();
        let active = find_active(&conn, "p1", JobType::VideoParts, "en")
            .unwrap()
            .unwrap();
        assert_eq!(active.id, "j2");
    }

    #[test]
    fn test_claim_order_is_fifo() {
        let conn = test_conn();
        seed_project(&conn);
        insert(&conn, &sample_job("j2", parts("es"), "t2")).unwrap();
        insert(&conn, &sample_job("j1", parts("en"), "t1")).unwrap();

        let next = next_queued(&conn, "p1").unwrap().unwrap();
        assert_eq!(next.id, "j1");
        assert!(mark_running(&conn, "j1", "daemon-a", "t3").unwrap());
        assert!(!mark_running(&conn, "j1", "daemon-b", "t4").unwrap());

        let next = next_queued(&conn, "p1").unwrap().unwrap();
        assert_eq!(next.id, "j2");

        let running = find_by_id(&conn, "j1").unwrap().unwrap();
        assert_eq!(running.status, JobStatus::Running);
        assert_eq!(running.daemon_id.as_deref(), Some("daemon-a"));
    }

    #[test]
    fn test_cancel_active_only_touches_listed_types() {
        let conn = test_conn();
        seed_project(&conn);
        insert(&conn, &sample_job("j1", parts("en"), "t1")).unwrap();
        insert(
            &conn,
            &sample_job("j2", JobPayload::Images(ProjectJobPayload {}), "t1"),
        )
        .unwrap();
        insert(&conn, &sample_job("j3", parts("es"), "t1")).unwrap();
        finish(&conn, "j3", JobStatus::Done, None, "t2").unwrap();

        let cancelled = cancel_active(&conn, "p1", &[JobType::VideoParts], "t3").unwrap();
        assert_eq!(cancelled, 1);
        assert_eq!(
            find_by_id(&conn, "j1").unwrap().unwrap().status,
            JobStatus::Cancelled
        );
        assert_eq!(
            find_by_id(&conn, "j2").unwrap().unwrap().status,
            JobStatus::Queued
        );
        assert_eq!(
            find_by_id(&conn, "j3").unwrap().unwrap().status,
            JobStatus::Done
        );
        assert_eq!(cancel_active(&conn, "p1", &[], "t4").unwrap(), 0);
    }

    #[test]
    fn test_list_with_filters() {
        let conn = test_conn();
        seed_project(&conn);
        insert(&conn, &sample_job("j1", parts("en"), "t1")).unwrap();
        insert(&conn, &sample_job("j2", parts("es"), "t2")).unwrap();
        insert(
            &conn,
            &sample_job("j3", JobPayload::Images(ProjectJobPayload {}), "t3"),
        )
        .unwrap();

        let all = list(&conn, "p1", &JobFilter::default()).unwrap();
        assert_eq!(all.len(), 3);

        let spanish = list(
            &conn,
            "p1",
            &JobFilter {
                language: Some("ES".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(spanish.len(), 1);
        assert_eq!(spanish[0].id, "j2");

        let limited = list(
            &conn,
            "p1",
            &JobFilter {
                job_type: Some(JobType::VideoParts),
                limit: Some(1),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].id, "j1");
        assert_eq!(count_active(&conn, "p1", JobType::VideoParts).unwrap(), 2);
    }

    #[test]
    fn test_corrupt_columns_are_reported_by_name() {
        let conn = test_conn();
        seed_project(&conn);
        conn.execute(
            "INSERT INTO jobs (id, project_id, job_type, language_key, status, payload, created_at, updated_at)
             VALUES ('bad-payload', 'p1', 'audio', 'en', 'queued', 'not json', 't1', 't1'),
                    ('bad-status', 'p1', 'audio', 'es', 'paused', '{\"type\":\"images\"}', 't1', 't1')",
            [],
        )
        .unwrap();

        match find_by_id(&conn, "bad-payload") {
            Err(DatabaseError::CorruptRow {
                table,
                column,
                value,
                ..
            }) => {
                assert_eq!((table, column), ("jobs", "payload"));
                assert_eq!(value, "not json");
            }
            other => panic!("expected a corrupt payload, got {:?}", other),
        }

        let err = list(&conn, "p1", &JobFilter::default()).unwrap_err();
        assert!(matches!(err, DatabaseError::CorruptRow { table: "jobs", .. }));
        assert!(matches!(
            find_by_id(&conn, "bad-status"),
            Err(DatabaseError::CorruptRow {
                column: "status",
                ..
            })
        ));
    }
}
