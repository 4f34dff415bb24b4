//! Test harness for isolated pipeline runs.
//!
//! The `TestHarness` struct owns a temporary directory holding the SQLite
//! file, a `PipelineCoordinator` opened from a config pointing at it, and a
//! subscription to the stage notifications the coordinator emits. Helpers
//! drive a project through the pipeline the way a well-behaved daemon would.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;
use tokio::sync::broadcast;

use polyreel::db::job_repo::{JobFilter, JobRow};
use polyreel::db::project_repo::ProjectRow;
use polyreel::pipeline::{
    JobQueue, JobStatus, LockOutcome, PipelineCoordinator, ProjectStatus, StageAdvance,
    StageReport,
};
use polyreel::{Config, Database, StageEventBroadcaster, StageNotification};

use super::builders::ConfigBuilder;

/// Daemon id used by the harness helpers.
pub const DAEMON: &str = "daemon-a";

/// Test harness providing an isolated database and coordinator.
pub struct TestHarness {
    /// Temporary directory containing the database file.
    temp_dir: TempDir,
    /// Path to the SQLite file within temp_dir.
    pub db_path: PathBuf,
    pub config: Config,
    pub coordinator: PipelineCoordinator,
    pub broadcaster: StageEventBroadcaster,
    events: broadcast::Receiver<StageNotification>,
}

impl TestHarness {
    /// Create a harness with the default test configuration.
    pub fn new() -> Self {
        Self::with_config(ConfigBuilder::new())
    }

    /// Create a harness from a config builder. The database path is always
    /// redirected into the harness's temp directory.
    pub fn with_config(builder: ConfigBuilder) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let db_path = temp_dir.path().join("polyreel.db");
        let config = builder.database_path(&db_path).build();

        let broadcaster = StageEventBroadcaster::new(256);
        let events = broadcaster.subscribe();
        let coordinator = PipelineCoordinator::from_config(&config)
            .expect("Failed to open coordinator")
            .with_notifier(Arc::new(broadcaster.clone()));

        Self {
            temp_dir,
            db_path,
            config,
            coordinator,
            broadcaster,
            events,
        }
    }

    /// Get the base temp directory path.
    pub fn temp_path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Open an independent connection to the same database file, as a second
    /// daemon process would.
    pub fn open_second_handle(&self) -> Database {
        Database::open(&self.db_path).expect("Failed to open second handle")
    }

    /// A job queue over an independent connection.
    pub fn second_queue(&self) -> JobQueue {
        JobQueue::new(self.open_second_handle())
    }

    /// Create a project with the given languages.
    pub fn create_project(&self, languages: &[&str]) -> ProjectRow {
        self.coordinator
            .create_project(languages)
            .expect("Failed to create project")
    }

    /// Create and start a project, taking the lock for [`DAEMON`].
    pub fn started_project(&self, languages: &[&str]) -> ProjectRow {
        let project = self.create_project(languages);
        self.coordinator
            .start_project(&project.id)
            .expect("Failed to start project");
        self.lock(&project.id, DAEMON);
        self.project(&project.id)
    }

    pub fn project(&self, project_id: &str) -> ProjectRow {
        self.coordinator
            .get_project(project_id)
            .expect("Failed to load project")
    }

    pub fn status(&self, project_id: &str) -> ProjectStatus {
        self.project(project_id).status
    }

    /// Acquire the project lock, panicking if it is held by someone else.
    pub fn lock(&self, project_id: &str, daemon_id: &str) {
        let outcome = self
            .coordinator
            .queue()
            .acquire_project_lock(project_id, daemon_id)
            .expect("Failed to acquire lock");
        assert_eq!(outcome, LockOutcome::Granted, "lock for {}", daemon_id);
    }

    /// Every job of the project, oldest first.
    pub fn jobs(&self, project_id: &str) -> Vec<JobRow> {
        self.coordinator
            .queue()
            .list_jobs(project_id, &JobFilter::default())
            .expect("Failed to list jobs")
    }

    /// Queued or running jobs of the project.
    pub fn active_jobs(&self, project_id: &str) -> Vec<JobRow> {
        self.jobs(project_id)
            .into_iter()
            .filter(|j| j.status.is_active())
            .collect()
    }

    pub fn jobs_with_status(&self, project_id: &str, status: JobStatus) -> Vec<JobRow> {
        self.coordinator
            .queue()
            .list_jobs(
                project_id,
                &JobFilter {
                    status: Some(status),
                    ..Default::default()
                },
            )
            .expect("Failed to list jobs")
    }

    /// Submit a report, panicking on error.
    pub fn report(&self, report: StageReport) -> StageAdvance {
        self.coordinator
            .report_stage(report)
            .expect("Failed to report stage")
    }

    /// Finish the current stage for every language that is still active,
    /// or once for a project-wide stage, and return the final advance.
    pub fn complete_current_stage(&self, project_id: &str) -> StageAdvance {
        let project = self.project(project_id);
        let job_type = project
            .status
            .job_type()
            .unwrap_or_else(|| panic!("{} has no daemon work", project.status));

        if !job_type.is_per_language() {
            return self.report(StageReport::completed(project_id, DAEMON, job_type));
        }

        let rows = self
            .coordinator
            .tracker()
            .rows(project_id)
            .expect("Failed to load progress");
        let pending: Vec<String> = rows
            .iter()
            .filter(|r| r.is_active())
            .filter(|r| project.status.progress_stage().is_some_and(|s| !r.flag(s)))
            .map(|r| r.language_code.clone())
            .collect();
        assert!(!pending.is_empty(), "nothing left to report for {}", project.status);

        let mut last = None;
        for code in pending {
            let mut report = StageReport::completed(project_id, DAEMON, job_type).for_language(&code);
            if job_type == polyreel::JobType::VideoMain {
                report = report.with_final_video(&format!("https://cdn.test/{}/{}.mp4", project_id, code));
            }
            last = Some(self.report(report));
        }
        last.expect("at least one report")
    }

    /// Drive the project forward until it reaches `target`, approving gates
    /// and completing daemon stages as needed. The caller must hold the lock
    /// as [`DAEMON`] for any daemon stage on the way.
    pub fn advance_to(&self, project_id: &str, target: ProjectStatus) {
        let target_pos = target.position().expect("target must be on the pipeline");
        loop {
            let status = self.status(project_id);
            if status == target {
                return;
            }
            let pos = status.position().expect("project left the pipeline");
            assert!(pos < target_pos, "{} is already past {}", status, target);

            if status == ProjectStatus::New {
                self.coordinator
                    .start_project(project_id)
                    .expect("Failed to start project");
                self.lock(project_id, DAEMON);
            } else if status.is_approval_gate() {
                self.coordinator.approve(project_id).expect("Failed to approve");
            } else {
                self.complete_current_stage(project_id);
            }
        }
    }

    /// Notifications received since the last call.
    pub fn drain_events(&mut self) -> Vec<StageNotification> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
