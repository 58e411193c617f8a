pub mod config;
pub mod error;
pub mod logging;
pub mod orchestrator;
pub mod restic;
pub mod retention;
pub mod signal;
pub mod snapshot;
pub mod stats;

pub use config::{
    default_config_path, dump_config, load_config, sample_config, BackupTarget, Config,
};
pub use error::RbakError;
pub use logging::{default_log_path, rotate_log, LogLevel, LogSink, ROTATE_KEEP, ROTATE_THRESHOLD};
pub use orchestrator::{Orchestrator, RunSummary, ALL_TARGETS};
pub use restic::{Restic, ToolOutput};
pub use retention::RetentionPolicy;
pub use signal::SessionContext;
pub use snapshot::Snapshot;
pub use stats::{extract, format_size, BackupStats, OperationKind, RestoreStats, Summary};

/// Main library result type
pub type Result<T> = std::result::Result<T, RbakError>;
