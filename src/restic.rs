use crate::config::Config;
use crate::error::RbakError;
use crate::signal::SessionContext;
use crate::Result;
use std::ffi::OsString;
use std::fs;
use std::path::PathBuf;
use std::process::{Command, ExitStatus, Stdio};

/// Exit status and captured output of one restic invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    pub code: Option<i32>,
    pub text: String,
}

impl ToolOutput {
    fn new(status: ExitStatus, text: String) -> Self {
        Self {
            code: status.code(),
            text,
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Turn a non-zero exit into an error for `command`
    pub fn require_success(self, command: &str) -> Result<Self> {
        if self.success() {
            Ok(self)
        } else {
            Err(RbakError::tool_failed(command, self.code))
        }
    }

    /// Last `count` non-empty lines, for failure reports
    pub fn tail(&self, count: usize) -> Vec<&str> {
        let lines: Vec<&str> = self
            .text
            .lines()
            .map(str::trim_end)
            .filter(|line| !line.is_empty())
            .collect();
        lines[lines.len().saturating_sub(count)..].to_vec()
    }
}

/// Runs the restic binary with repository credentials in the child environment
pub struct Restic {
    program: PathBuf,
    envs: Vec<(&'static str, OsString)>,
    context: SessionContext,
    verbose: bool,
}

impl Restic {
    pub fn new(config: &Config, context: SessionContext) -> Self {
        let mut envs = vec![("RESTIC_REPOSITORY", OsString::from(&config.repository))];
        if let Some(password) = &config.password {
            envs.push(("RESTIC_PASSWORD", OsString::from(password)));
        }
        if let Some(file) = &config.password_file {
            envs.push(("RESTIC_PASSWORD_FILE", file.clone().into_os_string()));
        }

        Self {
            program: config.restic_bin.clone(),
            envs,
            context,
            verbose: false,
        }
    }

    /// Echo captured output to the console after each run
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    fn command(&self, subcommand: &str, args: &[String]) -> Command {
        let mut command = Command::new(&self.program);
        command
            .arg(subcommand)
            .args(args)
            .envs(self.envs.iter().map(|(key, value)| (*key, value)))
            .stdin(Stdio::null());
        command
    }

    fn spawn_error(&self, source: std::io::Error) -> RbakError {
        RbakError::ToolSpawn {
            program: self.program.clone(),
            source,
        }
    }

    /// Run `restic <subcommand> <args>` with stdout and stderr interleaved
    /// into one capture. A non-zero exit is returned, not raised.
    pub fn run(&self, subcommand: &str, args: &[String]) -> Result<ToolOutput> {
        let capture = tempfile::Builder::new()
            .prefix(".rbak-capture-")
            .tempfile()?;
        let _tracked = self.context.register_temp(capture.path().to_path_buf());

        // Both handles share one file offset, so writes interleave in order
        let stdout = capture.as_file().try_clone()?;
        let stderr = capture.as_file().try_clone()?;

        let status = self
            .command(subcommand, args)
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .status()
            .map_err(|e| self.spawn_error(e))?;

        if self.context.is_interrupted() {
            return Err(RbakError::Interrupted);
        }

        let text = String::from_utf8_lossy(&fs::read(capture.path())?).into_owned();
        if self.verbose {
            print!("{text}");
        }

        Ok(ToolOutput::new(status, text))
    }

    /// Run a query whose stdout is machine-readable. Only stdout is captured;
    /// stderr goes straight to the console.
    pub fn query(&self, subcommand: &str, args: &[String]) -> Result<ToolOutput> {
        let output = self
            .command(subcommand, args)
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .output()
            .map_err(|e| self.spawn_error(e))?;

        if self.context.is_interrupted() {
            return Err(RbakError::Interrupted);
        }

        let text = String::from_utf8_lossy(&output.stdout).into_owned();
        Ok(ToolOutput::new(output.status, text))
    }
}
