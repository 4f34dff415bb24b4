pub mod broadcast;
pub mod config;
pub mod db;
pub mod error;
pub mod language;
pub mod logging;
pub mod pipeline;

pub use broadcast::{NoopNotifier, NotificationSink, StageEventBroadcaster, StageNotification};
pub use config::{load_config, load_config_from_str, Config};
pub use db::Database;
pub use error::{ConfigError, PolyreelError, Result, ValidationError};
pub use logging::init_logging;
pub use pipeline::{
    JobQueue, JobType, LanguageProgressTracker, PipelineCoordinator, PipelineError,
    ProjectStatus, ResetPlanner, StatusCatalog,
};
