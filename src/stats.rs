//! Summary extraction from captured restic output.
//!
//! Backup runs use `--json`, so the summary message is parsed with serde.
//! Restore (and backups from restic builds that print text) fall back to
//! fixed textual patterns. A miss never fails the operation; the field is
//! simply reported as `0` or `unknown`.

use regex::Regex;
use serde::Deserialize;
use std::sync::OnceLock;

const UNKNOWN: &str = "unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Backup,
    Restore,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Summary {
    Backup(BackupStats),
    Restore(RestoreStats),
}

impl Summary {
    /// Id of the snapshot a backup created, when restic reported it
    pub fn snapshot_id(&self) -> Option<&str> {
        match self {
            Summary::Backup(stats) => stats.snapshot_id.as_deref(),
            Summary::Restore(_) => None,
        }
    }

    /// Human-readable lines for the log
    pub fn lines(&self) -> Vec<String> {
        match self {
            Summary::Backup(stats) => vec![stats.files_line(), stats.size_line()],
            Summary::Restore(stats) => vec![stats.summary_line()],
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackupStats {
    pub files_new: Option<u64>,
    pub files_changed: Option<u64>,
    pub files_unmodified: Option<u64>,
    pub bytes_added: Option<u64>,
    pub bytes_processed: Option<u64>,
    /// Size as printed by restic when no byte count was available
    pub added_text: Option<String>,
    pub snapshot_id: Option<String>,
}

impl BackupStats {
    pub fn files_line(&self) -> String {
        format!(
            "Files: {} new, {} changed, {} unmodified",
            count(self.files_new),
            count(self.files_changed),
            count(self.files_unmodified)
        )
    }

    pub fn size_line(&self) -> String {
        let added = match (self.bytes_added, &self.added_text) {
            (Some(bytes), _) => format_size(bytes),
            (None, Some(text)) => text.clone(),
            (None, None) => UNKNOWN.to_string(),
        };
        let processed = self
            .bytes_processed
            .map(format_size)
            .unwrap_or_else(|| UNKNOWN.to_string());

        format!("Added to repository: {added} (processed {processed})")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreStats {
    pub files_restored: Option<u64>,
    pub size_restored: Option<String>,
}

impl RestoreStats {
    pub fn summary_line(&self) -> String {
        format!(
            "Restored {} files/dirs ({})",
            count(self.files_restored),
            self.size_restored.as_deref().unwrap_or(UNKNOWN)
        )
    }
}

fn count(value: Option<u64>) -> String {
    value.unwrap_or(0).to_string()
}

/// Extract the summary for `kind` from captured output
pub fn extract(kind: OperationKind, text: &str) -> Summary {
    match kind {
        OperationKind::Backup => Summary::Backup(extract_backup_stats(text)),
        OperationKind::Restore => Summary::Restore(extract_restore_stats(text)),
    }
}

#[derive(Debug, Deserialize)]
struct BackupMessage {
    message_type: String,
    files_new: Option<u64>,
    files_changed: Option<u64>,
    files_unmodified: Option<u64>,
    data_added: Option<u64>,
    total_bytes_processed: Option<u64>,
    snapshot_id: Option<String>,
}

pub fn extract_backup_stats(text: &str) -> BackupStats {
    let summary = text
        .lines()
        .map(str::trim)
        .filter(|line| line.starts_with('{'))
        .filter_map(|line| serde_json::from_str::<BackupMessage>(line).ok())
        .filter(|message| message.message_type == "summary")
        .last();

    if let Some(message) = summary {
        return BackupStats {
            files_new: message.files_new,
            files_changed: message.files_changed,
            files_unmodified: message.files_unmodified,
            bytes_added: message.data_added,
            bytes_processed: message.total_bytes_processed,
            added_text: None,
            snapshot_id: message.snapshot_id,
        };
    }

    extract_backup_text(text)
}

fn files_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"Files:\s+(\d+) new,\s+(\d+) changed,\s+(\d+) unmodified")
            .expect("valid files pattern")
    })
}

fn added_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"Added to the repo(?:sitory)?:\s+([0-9.]+ [KMGTP]?i?B)")
            .expect("valid added pattern")
    })
}

fn snapshot_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"snapshot ([0-9a-f]{8,64}) saved").expect("valid snapshot pattern")
    })
}

fn restored_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        // Partial restores print "Restored 5 / 10 files/dirs (1.2 MiB / 2.4 MiB)"
        Regex::new(r"Restored (\d+)(?: / \d+)? (?:files/dirs|files)(?: \(([^)/]+?)(?: / [^)]+)?\))?")
            .expect("valid restore pattern")
    })
}

fn extract_backup_text(text: &str) -> BackupStats {
    let mut stats = BackupStats::default();

    if let Some(caps) = files_pattern().captures(text) {
        stats.files_new = caps[1].parse().ok();
        stats.files_changed = caps[2].parse().ok();
        stats.files_unmodified = caps[3].parse().ok();
    }

    if let Some(caps) = added_pattern().captures(text) {
        stats.added_text = Some(caps[1].to_string());
    }

    if let Some(caps) = snapshot_pattern().captures(text) {
        stats.snapshot_id = Some(caps[1].to_string());
    }

    stats
}

pub fn extract_restore_stats(text: &str) -> RestoreStats {
    match restored_pattern().captures_iter(text).last() {
        Some(caps) => RestoreStats {
            files_restored: caps[1].parse().ok(),
            size_restored: caps.get(2).map(|m| m.as_str().to_string()),
        },
        None => RestoreStats::default(),
    }
}

/// Format byte size in human-readable format
pub fn format_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    const THRESHOLD: u64 = 1024;

    if bytes < THRESHOLD {
        return format!("{bytes} B");
    }

    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= THRESHOLD as f64 && unit_index < UNITS.len() - 1 {
        size /= THRESHOLD as f64;
        unit_index += 1;
    }

    let unit = UNITS[unit_index];
    format!("{size:.1} {unit}")
}

#[cfg(test)]
mod tests {
    use super::*;

    const BACKUP_JSON: &str = r#"{"message_type":"status","percent_done":0.5,"total_files":10,"files_done":5}
{"message_type":"status","percent_done":1,"total_files":10,"files_done":10}
{"message_type":"summary","files_new":3,"files_changed":1,"files_unmodified":6,"dirs_new":0,"dirs_changed":1,"dirs_unmodified":2,"data_blobs":4,"tree_blobs":1,"data_added":1536,"total_files_processed":10,"total_bytes_processed":3145728,"total_duration":0.42,"snapshot_id":"4f9c1a2b"}
"#;

    #[test]
    fn test_backup_json_summary() {
        let stats = extract_backup_stats(BACKUP_JSON);

        assert_eq!(stats.files_new, Some(3));
        assert_eq!(stats.files_changed, Some(1));
        assert_eq!(stats.files_unmodified, Some(6));
        assert_eq!(stats.bytes_added, Some(1536));
        assert_eq!(stats.bytes_processed, Some(3 * 1024 * 1024));
        assert_eq!(stats.snapshot_id.as_deref(), Some("4f9c1a2b"));

        assert_eq!(stats.files_line(), "Files: 3 new, 1 changed, 6 unmodified");
        assert_eq!(
            stats.size_line(),
            "Added to repository: 1.5 KB (processed 3.0 MB)"
        );
    }

    #[test]
    fn test_backup_json_mixed_with_warnings() {
        let text = format!("unable to open cache dir\n{BACKUP_JSON}error: lstat /x: permission denied\n");
        let stats = extract_backup_stats(&text);
        assert_eq!(stats.files_new, Some(3));
    }

    #[test]
    fn test_backup_text_fallback() {
        let text = "open repository
Files:          12 new,     0 changed,   340 unmodified
Dirs:            1 new,     2 changed,    40 unmodified
Added to the repository: 4.250 MiB (1.012 MiB stored)

processed 352 files, 1.234 GiB in 0:07
snapshot 1a2b3c4d saved
";
        let stats = extract_backup_stats(text);

        assert_eq!(stats.files_new, Some(12));
        assert_eq!(stats.files_changed, Some(0));
        assert_eq!(stats.files_unmodified, Some(340));
        assert_eq!(stats.bytes_added, None);
        assert_eq!(stats.added_text.as_deref(), Some("4.250 MiB"));
        assert_eq!(stats.snapshot_id.as_deref(), Some("1a2b3c4d"));
        assert!(stats.size_line().starts_with("Added to repository: 4.250 MiB"));
    }

    #[test]
    fn test_backup_nothing_recognised() {
        let stats = extract_backup_stats("Fatal: something odd happened\n");
        assert_eq!(stats, BackupStats::default());
        assert_eq!(stats.files_line(), "Files: 0 new, 0 changed, 0 unmodified");
        assert_eq!(
            stats.size_line(),
            "Added to repository: unknown (processed unknown)"
        );
    }

    #[test]
    fn test_restore_summary() {
        let text = "restoring <Snapshot 4f9c1a2b of [/home/me/docs] at 2024-03-09> to /tmp/restore
Summary: Restored 42 files/dirs (12.345 MiB) in 0:02
";
        let stats = extract_restore_stats(text);
        assert_eq!(stats.files_restored, Some(42));
        assert_eq!(stats.size_restored.as_deref(), Some("12.345 MiB"));
        assert_eq!(stats.summary_line(), "Restored 42 files/dirs (12.345 MiB)");
    }

    #[test]
    fn test_restore_partial_summary() {
        // Files already present at the target are skipped
        let stats =
            extract_restore_stats("Summary: Restored 5 / 10 files/dirs (1.2 MiB / 2.4 MiB) in 0:00\n");
        assert_eq!(stats.files_restored, Some(5));
        assert_eq!(stats.size_restored.as_deref(), Some("1.2 MiB"));
        assert_eq!(stats.summary_line(), "Restored 5 files/dirs (1.2 MiB)");
    }

    #[test]
    fn test_restore_without_summary() {
        let stats = extract_restore_stats("restoring <Snapshot 4f9c1a2b> to /\n");
        assert_eq!(stats, RestoreStats::default());
        assert_eq!(stats.summary_line(), "Restored 0 files/dirs (unknown)");
    }

    #[test]
    fn test_extract_dispatch() {
        match extract(OperationKind::Backup, BACKUP_JSON) {
            Summary::Backup(stats) => assert_eq!(stats.files_new, Some(3)),
            other => panic!("Expected backup summary, got {other:?}"),
        }
        match extract(OperationKind::Restore, "Restored 7 files/dirs (1 KiB)") {
            Summary::Restore(stats) => assert_eq!(stats.files_restored, Some(7)),
            other => panic!("Expected restore summary, got {other:?}"),
        }
    }

    #[test]
    fn test_summary_lines() {
        let backup = extract(OperationKind::Backup, BACKUP_JSON);
        assert_eq!(backup.snapshot_id(), Some("4f9c1a2b"));
        assert_eq!(backup.lines().len(), 2);
        assert_eq!(backup.lines()[0], "Files: 3 new, 1 changed, 6 unmodified");

        let restore = extract(OperationKind::Restore, "Restored 7 files/dirs (1 KiB)");
        assert_eq!(restore.snapshot_id(), None);
        assert_eq!(restore.lines(), vec!["Restored 7 files/dirs (1 KiB)"]);
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(0), "0 B");
        assert_eq!(format_size(1023), "1023 B");
        assert_eq!(format_size(1024), "1.0 KB");
        assert_eq!(format_size(1536), "1.5 KB");
        assert_eq!(format_size(1024 * 1024), "1.0 MB");
        assert_eq!(format_size(1024 * 1024 * 1024), "1.0 GB");
        assert_eq!(format_size(1024_u64.pow(4)), "1.0 TB");
        assert_eq!(format_size(1024_u64.pow(5)), "1024.0 TB");
    }
}
