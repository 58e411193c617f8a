use crate::config::{BackupTarget, Config};
use crate::error::RbakError;
use crate::logging::LogSink;
use crate::restic::{Restic, ToolOutput};
use crate::snapshot::{parse_snapshots, Snapshot};
use crate::stats::{extract, OperationKind, Summary};
use crate::Result;
use std::path::{Path, PathBuf};

/// Target name that selects every configured target
pub const ALL_TARGETS: &str = "all";

/// Where restores land when no path is given: each snapshot's original location
const ORIGINAL_LOCATION: &str = "/";

/// Lines of restic output copied into the log when a command fails
const FAILURE_TAIL_LINES: usize = 5;

/// Aggregate outcome of a multi-target operation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub success_count: usize,
    pub failure_count: usize,
    pub prune_failed: bool,
}

impl RunSummary {
    /// Count a per-target result. Errors that are not confined to one
    /// target are handed back so the caller can stop.
    fn record<T>(&mut self, result: Result<T>) -> Result<()> {
        match result {
            Ok(_) => self.success_count += 1,
            Err(e) if e.is_recoverable() => self.failure_count += 1,
            Err(e) => return Err(e),
        }
        Ok(())
    }

    pub fn is_success(&self) -> bool {
        self.failure_count == 0 && !self.prune_failed
    }

    pub fn exit_code(&self) -> i32 {
        if self.is_success() {
            0
        } else {
            1
        }
    }
}

/// Sequences restic invocations for the configured targets
pub struct Orchestrator<'a> {
    config: &'a Config,
    restic: &'a Restic,
    log: &'a LogSink,
}

impl<'a> Orchestrator<'a> {
    pub fn new(config: &'a Config, restic: &'a Restic, log: &'a LogSink) -> Self {
        Self {
            config,
            restic,
            log,
        }
    }

    /// Log the attempt, run `op`, and log the failure if it fails.
    /// Success messages are logged by `op` itself.
    fn attempt<T>(&self, what: &str, op: impl FnOnce() -> Result<T>) -> Result<T> {
        self.log.info(format!("ATTEMPT: {what}"));
        let result = op();
        if let Err(e) = &result {
            self.log.failure(format!("FAILED: {what}: {e}"));
        }
        result
    }

    fn checked(&self, command: &str, output: ToolOutput) -> Result<ToolOutput> {
        if !output.success() {
            for line in output.tail(FAILURE_TAIL_LINES) {
                self.log.info(format!("  restic: {line}"));
            }
        }
        output.require_success(command)
    }

    /// Confirm the repository can be opened with the configured credentials
    pub fn verify_repository(&self) -> Result<()> {
        let args = vec!["--json".to_string(), "--latest".to_string(), "1".to_string()];
        let output = self.restic.run("snapshots", &args)?;
        match self.checked("snapshots", output) {
            Ok(_) => Ok(()),
            Err(e) => {
                self.log.failure(format!(
                    "Repository {} is not reachable: {e}",
                    self.config.repository
                ));
                Err(e)
            }
        }
    }

    /// Create the repository
    pub fn init(&self) -> Result<()> {
        self.attempt(
            &format!("initialise repository {}", self.config.repository),
            || {
                let output = self.restic.run("init", &[])?;
                self.checked("init", output)?;
                self.log.success("Repository initialised");
                Ok(())
            },
        )
    }

    /// Back up one configured target, a path, or every target (`all`)
    pub fn backup(&self, name: &str) -> Result<RunSummary> {
        if name == ALL_TARGETS {
            return self.backup_all();
        }

        let target = self.resolve_target(name)?;
        self.backup_single(&target)?;
        Ok(RunSummary {
            success_count: 1,
            ..Default::default()
        })
    }

    fn resolve_target(&self, name: &str) -> Result<BackupTarget> {
        match self.config.find_target(name) {
            Some(target) => Ok(target.clone()),
            None => BackupTarget::from_path(name),
        }
    }

    /// Back up every configured target in list order, then prune if enabled.
    /// A failing target never stops the remaining ones; an unrecoverable
    /// error (interrupt, missing restic, I/O) ends the run.
    pub fn backup_all(&self) -> Result<RunSummary> {
        let mut summary = RunSummary::default();
        self.log.info(format!(
            "Starting backup of {} target(s)",
            self.config.targets.len()
        ));

        for target in &self.config.targets {
            summary.record(self.backup_single(target))?;
        }

        self.log.info(format!(
            "Backup summary: {} successful, {} failed",
            summary.success_count, summary.failure_count
        ));

        if self.config.auto_prune {
            summary.prune_failed = self.prune().is_err();
        }

        Ok(summary)
    }

    /// Back up a single directory under its tag
    pub fn backup_single(&self, target: &BackupTarget) -> Result<Summary> {
        let what = format!("backup of {} (tag: {})", target.path.display(), target.tag);

        self.attempt(&what, || {
            if !target.path.is_dir() {
                return Err(RbakError::TargetNotFound {
                    path: target.path.clone(),
                });
            }

            let mut args = vec![
                target.path.to_string_lossy().into_owned(),
                "--tag".to_string(),
                target.tag.clone(),
                "--json".to_string(),
            ];
            if let Some(exclude) = &self.config.exclude_file {
                args.push("--exclude-file".to_string());
                args.push(exclude.to_string_lossy().into_owned());
            }

            let output = self.restic.run("backup", &args)?;
            let output = self.checked("backup", output)?;
            let summary = extract(OperationKind::Backup, &output.text);

            match summary.snapshot_id() {
                Some(id) => self.log.success(format!(
                    "Backup completed: {} (snapshot {id})",
                    target.path.display()
                )),
                None => self
                    .log
                    .success(format!("Backup completed: {}", target.path.display())),
            }
            self.log_summary(&summary);

            Ok(summary)
        })
    }

    fn log_summary(&self, summary: &Summary) {
        for line in summary.lines() {
            self.log.info(format!("  {line}"));
        }
    }

    /// Apply the retention policy with one `forget --prune` call.
    /// Skipped (and successful) when no retention class is set.
    pub fn prune(&self) -> Result<()> {
        let retention = &self.config.retention;
        if retention.is_empty() {
            self.log
                .info("Retention policy not configured, skipping prune");
            return Ok(());
        }

        self.attempt(
            &format!("prune with retention policy {}", retention.describe()),
            || {
                let mut args = retention.forget_args();
                args.push("--prune".to_string());

                let output = self.restic.run("forget", &args)?;
                self.checked("forget", output)?;
                self.log.success("Prune completed");
                Ok(())
            },
        )
    }

    /// List snapshots, optionally filtered by tag. Returns restic's output.
    pub fn list(&self, tag: Option<&str>) -> Result<String> {
        let mut args = Vec::new();
        if let Some(tag) = tag {
            args.push("--tag".to_string());
            args.push(tag.to_string());
        }

        let output = self.restic.run("snapshots", &args)?;
        let output = self.checked("snapshots", output)?;
        Ok(output.text)
    }

    /// Restore a snapshot by id into `path` (or its original location)
    pub fn restore_snapshot(
        &self,
        id: &str,
        path: Option<&Path>,
        tag: Option<&str>,
    ) -> Result<Summary> {
        let target = restore_target(path);
        self.attempt(
            &format!("restore of snapshot {id} to {}", target.display()),
            || self.run_restore(id, &target, tag),
        )
    }

    fn run_restore(&self, id: &str, target: &Path, tag: Option<&str>) -> Result<Summary> {
        let mut args = vec![
            id.to_string(),
            "--target".to_string(),
            target.to_string_lossy().into_owned(),
        ];
        if let Some(tag) = tag {
            args.push("--tag".to_string());
            args.push(tag.to_string());
        }

        let output = self.restic.run("restore", &args)?;
        let output = self.checked("restore", output)?;
        let summary = extract(OperationKind::Restore, &output.text);

        self.log.success(format!(
            "Restore completed: snapshot {id} to {}",
            target.display()
        ));
        self.log_summary(&summary);

        Ok(summary)
    }

    /// Find the most recent snapshot carrying `tag`
    pub fn latest_snapshot(&self, tag: &str) -> Result<Snapshot> {
        let args = vec![
            "--tag".to_string(),
            tag.to_string(),
            "--latest".to_string(),
            "1".to_string(),
            "--json".to_string(),
        ];

        let output = self.restic.query("snapshots", &args)?;
        let output = output.require_success("snapshots")?;

        parse_snapshots(&output.text)?
            .into_iter()
            .next()
            .ok_or_else(|| RbakError::SnapshotNotFound {
                tag: tag.to_string(),
            })
    }

    /// Restore the latest snapshot for `tag`
    pub fn restore_latest(&self, tag: &str, path: Option<&Path>) -> Result<Summary> {
        let target = restore_target(path);
        self.attempt(
            &format!(
                "restore of latest snapshot for tag {tag} to {}",
                target.display()
            ),
            || {
                let snapshot = self.latest_snapshot(tag)?;
                self.log.info(format!(
                    "Resolved tag {tag} to snapshot {}",
                    snapshot.display_id()
                ));
                self.run_restore(&snapshot.id, &target, Some(tag))
            },
        )
    }

    /// Restore the latest snapshot of every configured target, in list order.
    /// Unrecoverable errors end the run like in `backup_all`.
    pub fn restore_all(&self, base: Option<&Path>) -> Result<RunSummary> {
        let mut summary = RunSummary::default();
        self.log.info(format!(
            "Starting restore of {} target(s)",
            self.config.targets.len()
        ));

        for target in &self.config.targets {
            summary.record(self.restore_latest(&target.tag, base))?;
        }

        self.log.info(format!(
            "Restore summary: {} successful, {} failed",
            summary.success_count, summary.failure_count
        ));

        Ok(summary)
    }

    /// Verify repository integrity; any failure is fatal
    pub fn check(&self) -> Result<()> {
        self.attempt("repository integrity check", || {
            let output = self.restic.run("check", &[])?;
            self.checked("check", output)?;
            self.log.success("Repository check passed");
            Ok(())
        })
    }
}

fn restore_target(path: Option<&Path>) -> PathBuf {
    path.map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(ORIGINAL_LOCATION))
}
