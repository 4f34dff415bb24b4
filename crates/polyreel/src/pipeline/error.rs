use thiserror::Error;

use crate::db::DatabaseError;
use crate::error::ValidationError;
use crate::pipeline::job::JobStatus;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Project not found: {0}")]
    ProjectNotFound(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Job {job_id} belongs to project {actual}, not {expected}")]
    JobProjectMismatch {
        job_id: String,
        expected: String,
        actual: String,
    },

    /// The job was superseded (cancelled by a reset) or belongs to a stage
    /// the project is no longer in.
    #[error("Job {job_id} is stale ({status})")]
    StaleJob { job_id: String, status: JobStatus },

    #[error("Invalid input: {0}")]
    Validation(#[from] ValidationError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

impl From<rusqlite::Error> for PipelineError {
    fn from(e: rusqlite::Error) -> Self {
        PipelineError::Database(DatabaseError::from(e))
    }
}
