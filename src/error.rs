use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RbakError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Target directory not found: {path}")]
    TargetNotFound { path: PathBuf },

    #[error("No snapshot found for tag: {tag}")]
    SnapshotNotFound { tag: String },

    #[error("restic {command} failed with {}", describe_code(.code))]
    ToolFailed { command: String, code: Option<i32> },

    #[error("Could not run {}: {source}", .program.display())]
    ToolSpawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON from restic: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Operation interrupted by user")]
    Interrupted,
}

fn describe_code(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit status {code}"),
        None => "no exit status (terminated by signal)".to_string(),
    }
}

impl RbakError {
    /// Create a configuration error with a custom message
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a validation error with a custom message
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn tool_failed(command: impl Into<String>, code: Option<i32>) -> Self {
        Self::ToolFailed {
            command: command.into(),
            code,
        }
    }

    /// Check if this error only affects the current target, so `all`-scoped
    /// operations can count it and move on
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            RbakError::TargetNotFound { .. }
                | RbakError::SnapshotNotFound { .. }
                | RbakError::ToolFailed { .. }
                | RbakError::Json(_)
        )
    }

    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            RbakError::Interrupted => 130,
            _ => 1,
        }
    }

    /// Provide helpful suggestions for resolving the error
    pub fn suggestions(&self) -> Vec<String> {
        match self {
            RbakError::Config { .. } => vec![
                "Check that the config file exists and is readable".to_string(),
                "Pass an explicit path with --config or RBAK_CONFIG".to_string(),
            ],
            RbakError::Validation { .. } => vec![
                "Set RESTIC_REPOSITORY, RESTIC_PASSWORD (or RESTIC_PASSWORD_FILE) and BACKUP_TARGETS"
                    .to_string(),
                "Give colliding targets explicit tags with path@tag".to_string(),
            ],
            RbakError::TargetNotFound { .. } => vec![
                "Check that the directory exists".to_string(),
                "Remove stale entries from BACKUP_TARGETS".to_string(),
            ],
            RbakError::SnapshotNotFound { tag } => vec![
                format!("Run 'rbak list {tag}' to see available snapshots"),
                format!("Run 'rbak backup {tag}' to create one"),
            ],
            RbakError::ToolFailed { .. } => vec![
                "Run 'rbak init' if the repository does not exist yet".to_string(),
                "Re-run with --verbose to see restic's output".to_string(),
            ],
            RbakError::ToolSpawn { .. } => vec![
                "Install restic or point RESTIC_BIN at the binary".to_string(),
            ],
            _ => vec![],
        }
    }
}
