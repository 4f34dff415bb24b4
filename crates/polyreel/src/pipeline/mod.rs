pub mod catalog;
pub mod coordinator;
pub mod error;
pub mod job;
pub mod notify;
pub mod queue;
pub mod reset;
pub mod tracker;

pub use catalog::{JobType, ProgressStage, ProjectStatus, StatusCatalog};
pub use coordinator::{PipelineCoordinator, StageAdvance, StageOutcome, StageReport, Transition};
pub use error::PipelineError;
pub use job::{JobPayload, JobStatus};
pub use notify::{Milestone, NotificationGate};
pub use queue::{ClaimOutcome, EnqueueOutcome, JobQueue, LockOutcome};
pub use reset::{
    build_reset_plan, LanguageSelection, ResetOutcome, ResetPlan, ResetPlanner, ResetPreview,
    ResetWarning,
};
pub use tracker::{LanguageProgressTracker, ProgressAggregate, StageAggregate};
