use thiserror::Error;

use crate::pipeline::catalog::{JobType, ProjectStatus};

#[derive(Error, Debug)]
pub enum PolyreelError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] crate::pipeline::PipelineError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Logging setup failed: {0}")]
    Logging(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },
}

/// Input rejected before any transaction starts.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("A project needs at least one language")]
    EmptyLanguageSet,

    #[error("Invalid language code '{0}'")]
    InvalidLanguageCode(String),

    #[error("Language '{language}' is not configured for project {project_id}")]
    UnknownLanguage {
        project_id: String,
        language: String,
    },

    #[error("Unknown project status '{0}'")]
    UnknownStatus(String),

    #[error("Unknown job type '{0}'")]
    UnknownJobType(String),

    #[error("Daemon id must not be empty")]
    EmptyDaemonId,

    #[error("Project {project_id} is already {status}")]
    TerminalProject {
        project_id: String,
        status: ProjectStatus,
    },

    #[error("Project {project_id} is {actual}, expected {expected}")]
    UnexpectedStatus {
        project_id: String,
        expected: ProjectStatus,
        actual: ProjectStatus,
    },

    #[error("A {job_type} report must name a language")]
    LanguageRequired { job_type: JobType },

    #[error("Status {0} is not waiting for approval")]
    NotApprovalGate(ProjectStatus),

    #[error("Status {0} has no daemon work to report")]
    NoDaemonWork(ProjectStatus),
}

pub type Result<T> = std::result::Result<T, PolyreelError>;
