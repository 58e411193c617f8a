use crate::error::RbakError;
use crate::Result;
use chrono::{DateTime, Local};
use console::style;
use std::cell::Cell;
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Active log size that triggers rotation before a run (10 MiB)
pub const ROTATE_THRESHOLD: u64 = 10 * 1024 * 1024;

/// Number of numbered backups kept by rotation (`.1` .. `.10`)
pub const ROTATE_KEEP: u32 = 10;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Success,
    Failure,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "INFO",
            LogLevel::Success => "SUCCESS",
            LogLevel::Failure => "FAILURE",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Render one log line: `[YYYY-MM-DD HH:MM:SS] [LEVEL] message`
pub fn format_entry(timestamp: &DateTime<Local>, level: LogLevel, message: &str) -> String {
    format!(
        "[{}] [{}] {}",
        timestamp.format(TIMESTAMP_FORMAT),
        level,
        message
    )
}

/// Append-only plain-text log with a console mirror
pub struct LogSink {
    path: PathBuf,
    quiet: bool,
    write_failed: Cell<bool>,
}

impl LogSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            quiet: false,
            write_failed: Cell::new(false),
        }
    }

    /// Suppress the console copy; the file log is always written
    pub fn quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn log(&self, level: LogLevel, message: impl AsRef<str>) {
        let line = format_entry(&Local::now(), level, message.as_ref());

        if let Err(e) = self.append(&line) {
            // Only the first failure is reported
            if !self.write_failed.replace(true) {
                eprintln!(
                    "Warning: Could not write to log file {}: {e}",
                    self.path.display()
                );
            }
        }

        if !self.quiet {
            self.echo(level, &line);
        }
    }

    pub fn info(&self, message: impl AsRef<str>) {
        self.log(LogLevel::Info, message);
    }

    pub fn success(&self, message: impl AsRef<str>) {
        self.log(LogLevel::Success, message);
    }

    pub fn failure(&self, message: impl AsRef<str>) {
        self.log(LogLevel::Failure, message);
    }

    fn append(&self, line: &str) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{line}")
    }

    fn echo(&self, level: LogLevel, line: &str) {
        match level {
            LogLevel::Info => println!("{}", style(line).cyan()),
            LogLevel::Success => println!("{}", style(line).green()),
            LogLevel::Failure => eprintln!("{}", style(line).red().for_stderr()),
        }
    }
}

/// Rotate `path` through `path.1` .. `path.{keep}` if it exceeds `max_bytes`.
///
/// Returns whether a rotation happened.
pub fn rotate_log(path: &Path, max_bytes: u64, keep: u32) -> Result<bool> {
    let size = match fs::metadata(path) {
        Ok(metadata) => metadata.len(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(RbakError::Io(e)),
    };

    if size <= max_bytes || keep == 0 {
        return Ok(false);
    }

    let oldest = numbered(path, keep);
    if oldest.exists() {
        fs::remove_file(&oldest)?;
    }

    for index in (1..keep).rev() {
        let from = numbered(path, index);
        if from.exists() {
            fs::rename(&from, numbered(path, index + 1))?;
        }
    }

    fs::rename(path, numbered(path, 1))?;
    Ok(true)
}

fn numbered(path: &Path, index: u32) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(format!(".{index}"));
    PathBuf::from(name)
}

/// Get the log file path: `$RBAK_LOG`, then the XDG state location
pub fn default_log_path() -> Result<PathBuf> {
    if let Some(path) = std::env::var_os("RBAK_LOG") {
        return Ok(PathBuf::from(path));
    }

    if let Some(state_dir) = std::env::var_os("XDG_STATE_HOME") {
        Ok(PathBuf::from(state_dir).join("rbak").join("rbak.log"))
    } else if let Some(home) = std::env::var_os("HOME") {
        Ok(PathBuf::from(home)
            .join(".local")
            .join("state")
            .join("rbak")
            .join("rbak.log"))
    } else {
        Err(RbakError::config("Could not determine log directory"))
    }
}
