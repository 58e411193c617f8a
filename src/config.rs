use crate::error::RbakError;
use crate::retention::{RetentionPolicy, RETENTION_KEYS};
use crate::Result;
use configparser::ini::Ini;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

/// Section configparser assigns to keys that appear before any `[section]` header
const DEFAULT_SECTION: &str = "default";

/// A directory to back up and the tag its snapshots carry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupTarget {
    pub path: PathBuf,
    pub tag: String,
}

impl BackupTarget {
    /// Build a target whose tag is the directory's base name
    pub fn from_path(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let tag = path
            .file_name()
            .and_then(|name| name.to_str())
            .filter(|name| !name.is_empty())
            .ok_or_else(|| {
                RbakError::validation(format!(
                    "Cannot derive a tag from '{}', use path@tag",
                    path.display()
                ))
            })?
            .to_string();

        Ok(Self { path, tag })
    }

    /// Parse one `BACKUP_TARGETS` segment: `/some/dir` or `/some/dir@tag`
    pub fn parse(segment: &str) -> Result<Self> {
        let segment = segment.trim();

        if let Some((path, tag)) = segment.rsplit_once('@') {
            let tag = tag.trim();
            if !tag.is_empty() && !tag.contains('/') && !path.is_empty() {
                return Ok(Self {
                    path: PathBuf::from(path),
                    tag: tag.to_string(),
                });
            }
        }

        Self::from_path(segment)
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub repository: String,
    pub password: Option<String>,
    pub password_file: Option<PathBuf>,
    pub targets: Vec<BackupTarget>,
    pub retention: RetentionPolicy,
    pub auto_prune: bool,
    pub restic_bin: PathBuf,
    pub exclude_file: Option<PathBuf>,
}

impl Config {
    /// Find a configured target by tag first, then by path
    pub fn find_target(&self, name: &str) -> Option<&BackupTarget> {
        self.targets
            .iter()
            .find(|target| target.tag == name)
            .or_else(|| {
                let path = Path::new(name);
                self.targets.iter().find(|target| target.path == path)
            })
    }
}

/// Load and validate the configuration file at `path`
pub fn load_config(path: &Path) -> Result<Config> {
    if !path.is_file() {
        return Err(RbakError::config(format!(
            "Config file not found: {}",
            path.display()
        )));
    }

    let mut conf = new_parser();
    conf.load(path)
        .map_err(|e| RbakError::config(format!("Failed to parse config file: {e}")))?;

    parse_settings(&collect_values(&conf))
}

/// Parse configuration from an in-memory string
pub fn parse_config(content: &str) -> Result<Config> {
    let mut conf = new_parser();
    conf.read(content.to_string())
        .map_err(|e| RbakError::config(format!("Failed to parse config: {e}")))?;

    parse_settings(&collect_values(&conf))
}

/// Full-line `#`/`;` comments only; values keep every character
fn new_parser() -> Ini {
    let mut conf = Ini::new();
    conf.set_inline_comment_symbols(Some(&[]));
    conf
}

/// Flatten the sectionless key/values, normalising shell-style spellings
fn collect_values(conf: &Ini) -> HashMap<String, String> {
    let mut values = HashMap::new();

    if let Some(section) = conf.get_map_ref().get(DEFAULT_SECTION) {
        for (key, value) in section {
            let key = key.trim();
            let key = key.strip_prefix("export ").unwrap_or(key).trim();
            let value = value.as_deref().map(unquote).unwrap_or_default();
            values.insert(key.to_ascii_uppercase(), value.to_string());
        }
    }

    values
}

fn unquote(value: &str) -> &str {
    let value = value.trim();
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}

fn non_empty<'a>(values: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    values
        .get(key)
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
}

fn parse_settings(values: &HashMap<String, String>) -> Result<Config> {
    let repository = non_empty(values, "RESTIC_REPOSITORY")
        .ok_or_else(|| RbakError::validation("RESTIC_REPOSITORY is not set"))?
        .to_string();

    let password = values
        .get("RESTIC_PASSWORD")
        .filter(|value| !value.is_empty())
        .cloned();
    let password_file = non_empty(values, "RESTIC_PASSWORD_FILE").map(PathBuf::from);
    if password.is_none() && password_file.is_none() {
        return Err(RbakError::validation(
            "Neither RESTIC_PASSWORD nor RESTIC_PASSWORD_FILE is set",
        ));
    }

    let targets = parse_targets(non_empty(values, "BACKUP_TARGETS").unwrap_or(""))?;

    let mut retention = RetentionPolicy::default();
    for key in RETENTION_KEYS {
        if let Some(value) = non_empty(values, key) {
            let count = value
                .parse::<u32>()
                .map_err(|_| RbakError::config(format!("Invalid {key}: {value}")))?;
            retention.set(key, count);
        }
    }

    let auto_prune = non_empty(values, "AUTO_PRUNE")
        .and_then(parse_bool)
        .unwrap_or(true);

    let restic_bin = non_empty(values, "RESTIC_BIN")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("restic"));

    let exclude_file = non_empty(values, "EXCLUDE_FILE").map(PathBuf::from);

    Ok(Config {
        repository,
        password,
        password_file,
        targets,
        retention,
        auto_prune,
        restic_bin,
        exclude_file,
    })
}

/// Split a colon-separated target list, rejecting empty lists and tag collisions
pub fn parse_targets(list: &str) -> Result<Vec<BackupTarget>> {
    let targets = list
        .split(':')
        .filter(|segment| !segment.trim().is_empty())
        .map(BackupTarget::parse)
        .collect::<Result<Vec<_>>>()?;

    if targets.is_empty() {
        return Err(RbakError::validation("BACKUP_TARGETS is empty"));
    }

    let mut seen = HashSet::new();
    for target in &targets {
        if !seen.insert(target.tag.as_str()) {
            return Err(RbakError::validation(format!(
                "Duplicate tag '{}' for {}; give it an explicit tag with path@tag",
                target.tag,
                target.path.display()
            )));
        }
    }

    Ok(targets)
}

/// Get the configuration file path: `$RBAK_CONFIG`, then the XDG location
pub fn default_config_path() -> Result<PathBuf> {
    if let Some(path) = std::env::var_os("RBAK_CONFIG") {
        return Ok(PathBuf::from(path));
    }

    if let Some(config_dir) = std::env::var_os("XDG_CONFIG_HOME") {
        Ok(PathBuf::from(config_dir).join("rbak").join("rbak.conf"))
    } else if let Some(home) = std::env::var_os("HOME") {
        Ok(PathBuf::from(home)
            .join(".config")
            .join("rbak")
            .join("rbak.conf"))
    } else {
        Err(RbakError::config("Could not determine config directory"))
    }
}

/// Parse a boolean value from a config string
fn parse_bool(value: &str) -> Option<bool> {
    match value.to_lowercase().as_str() {
        "true" | "yes" | "1" | "on" => Some(true),
        "false" | "no" | "0" | "off" => Some(false),
        _ => None,
    }
}

/// Create a sample configuration file
pub fn sample_config() -> String {
    r#"# rbak configuration

# restic repository location (local path, sftp:, s3:, rest:, ...)
RESTIC_REPOSITORY=/srv/restic-repo

# Repository password, inline or read from a file
RESTIC_PASSWORD_FILE=/etc/rbak/password

# Directories to back up, colon separated. Append @tag to override the tag.
BACKUP_TARGETS=/home/user/documents:/home/user/photos@pictures

# Run forget --prune after `backup all` (true/false)
AUTO_PRUNE=true

# Retention counts; leave unset to keep everything in that class
KEEP_DAILY=7
KEEP_WEEKLY=4
KEEP_MONTHLY=12
"#
    .to_string()
}

/// Display the current configuration in a user-friendly format
pub fn dump_config(config: &Config, config_path: &Path) -> Result<()> {
    println!("rbak Configuration");
    println!("==================");
    println!();
    println!("Config file: {}", config_path.display());
    println!();

    println!("Repository:");
    println!("----------");
    println!("RESTIC_REPOSITORY    = {}", config.repository);
    if config.password.is_some() {
        println!("RESTIC_PASSWORD      = ********");
    }
    if let Some(file) = &config.password_file {
        println!("RESTIC_PASSWORD_FILE = {}", file.display());
    }
    println!("RESTIC_BIN           = {}", config.restic_bin.display());
    if let Some(file) = &config.exclude_file {
        println!("EXCLUDE_FILE         = {}", file.display());
    }
    println!();

    println!("Targets:");
    println!("-------");
    for target in &config.targets {
        let status = if target.path.is_dir() {
            ""
        } else {
            " (missing)"
        };
        println!(
            "{:<20} {}{status}",
            target.tag,
            target.path.display()
        );
    }
    println!();

    println!("Retention:");
    println!("---------");
    println!("AUTO_PRUNE           = {}", config.auto_prune);
    println!("policy               = {}", config.retention.describe());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::Mutex;
    use tempfile::tempdir;

    // Mutex to serialize tests that modify environment variables
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    const MINIMAL: &str = "RESTIC_REPOSITORY=/srv/repo\nRESTIC_PASSWORD=secret\nBACKUP_TARGETS=/a:/b\n";

    #[test]
    fn test_parse_minimal_config() {
        let config = parse_config(MINIMAL).unwrap();

        assert_eq!(config.repository, "/srv/repo");
        assert_eq!(config.password.as_deref(), Some("secret"));
        assert!(config.password_file.is_none());
        assert!(config.auto_prune);
        assert!(config.retention.is_empty());
        assert_eq!(config.restic_bin, PathBuf::from("restic"));
        assert_eq!(
            config.targets,
            vec![
                BackupTarget {
                    path: PathBuf::from("/a"),
                    tag: "a".to_string()
                },
                BackupTarget {
                    path: PathBuf::from("/b"),
                    tag: "b".to_string()
                },
            ]
        );
    }

    #[test]
    fn test_comment_characters_inside_values() {
        let content = "# full-line comment\n; another\nRESTIC_REPOSITORY=/srv/repo;2024\nRESTIC_PASSWORD=pa#ss;word\nBACKUP_TARGETS=/a\n";
        let config = parse_config(content).unwrap();
        assert_eq!(config.repository, "/srv/repo;2024");
        assert_eq!(config.password.as_deref(), Some("pa#ss;word"));

        let content = "RESTIC_REPOSITORY=/srv/repo\nRESTIC_PASSWORD=\"pa#ss\"\nBACKUP_TARGETS='/srv/data #1@data'\n";
        let config = parse_config(content).unwrap();
        assert_eq!(config.password.as_deref(), Some("pa#ss"));
        assert_eq!(config.targets[0].path, PathBuf::from("/srv/data #1"));
        assert_eq!(config.targets[0].tag, "data");
    }

    #[test]
    fn test_parse_shell_style_config() {
        let content = r#"# generated by hand
export RESTIC_REPOSITORY="sftp:backup@host:/repo"
RESTIC_PASSWORD_FILE='/etc/rbak/password'
BACKUP_TARGETS="/home/me/documents:/srv/www@web"
AUTO_PRUNE=no
KEEP_DAILY=7
KEEP_WEEKLY=4
"#;
        let config = parse_config(content).unwrap();

        assert_eq!(config.repository, "sftp:backup@host:/repo");
        assert!(config.password.is_none());
        assert_eq!(
            config.password_file,
            Some(PathBuf::from("/etc/rbak/password"))
        );
        assert!(!config.auto_prune);
        assert_eq!(config.retention.keep_daily, Some(7));
        assert_eq!(config.retention.keep_weekly, Some(4));
        assert_eq!(config.retention.keep_monthly, None);
        assert_eq!(config.targets[0].tag, "documents");
        assert_eq!(config.targets[1].path, PathBuf::from("/srv/www"));
        assert_eq!(config.targets[1].tag, "web");
    }

    #[test]
    fn test_missing_repository() {
        let result = parse_config("RESTIC_PASSWORD=x\nBACKUP_TARGETS=/a\n");
        match result.unwrap_err() {
            RbakError::Validation { message } => assert!(message.contains("RESTIC_REPOSITORY")),
            other => panic!("Expected Validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_password_source() {
        let result = parse_config("RESTIC_REPOSITORY=/r\nBACKUP_TARGETS=/a\n");
        match result.unwrap_err() {
            RbakError::Validation { message } => assert!(message.contains("PASSWORD")),
            other => panic!("Expected Validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_empty_target_list() {
        for content in [
            "RESTIC_REPOSITORY=/r\nRESTIC_PASSWORD=x\n",
            "RESTIC_REPOSITORY=/r\nRESTIC_PASSWORD=x\nBACKUP_TARGETS=\n",
            "RESTIC_REPOSITORY=/r\nRESTIC_PASSWORD=x\nBACKUP_TARGETS=::\n",
        ] {
            match parse_config(content).unwrap_err() {
                RbakError::Validation { message } => assert!(message.contains("BACKUP_TARGETS")),
                other => panic!("Expected Validation error, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_duplicate_tags_rejected() {
        let result = parse_targets("/home/alice/documents:/home/bob/documents");
        match result.unwrap_err() {
            RbakError::Validation { message } => assert!(message.contains("documents")),
            other => panic!("Expected Validation error, got {other:?}"),
        }

        // An explicit tag resolves the collision
        let targets = parse_targets("/home/alice/documents:/home/bob/documents@bob-docs").unwrap();
        assert_eq!(targets[1].tag, "bob-docs");
    }

    #[test]
    fn test_invalid_retention_count() {
        let content = format!("{MINIMAL}KEEP_DAILY=-1\n");
        assert!(matches!(
            parse_config(&content),
            Err(RbakError::Config { .. })
        ));

        let content = format!("{MINIMAL}KEEP_WEEKLY=lots\n");
        assert!(matches!(
            parse_config(&content),
            Err(RbakError::Config { .. })
        ));
    }

    #[test]
    fn test_invalid_boolean_falls_back_to_default() {
        let content = format!("{MINIMAL}AUTO_PRUNE=maybe\n");
        assert!(parse_config(&content).unwrap().auto_prune);
    }

    #[test]
    fn test_parse_bool() {
        assert_eq!(parse_bool("true"), Some(true));
        assert_eq!(parse_bool("false"), Some(false));
        assert_eq!(parse_bool("yes"), Some(true));
        assert_eq!(parse_bool("no"), Some(false));
        assert_eq!(parse_bool("1"), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("on"), Some(true));
        assert_eq!(parse_bool("OFF"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
        assert_eq!(parse_bool(""), None);
    }

    #[test]
    fn test_target_tag_derivation() {
        let target = BackupTarget::parse("/var/lib/postgres/").unwrap();
        assert_eq!(target.tag, "postgres");

        let target = BackupTarget::parse("/srv/mail@mailstore").unwrap();
        assert_eq!(target.path, PathBuf::from("/srv/mail"));
        assert_eq!(target.tag, "mailstore");

        // An @ inside a directory name is not a tag override
        let target = BackupTarget::parse("/srv/user@host/data").unwrap();
        assert_eq!(target.path, PathBuf::from("/srv/user@host/data"));
        assert_eq!(target.tag, "data");

        assert!(BackupTarget::parse("/").is_err());
    }

    #[test]
    fn test_find_target() {
        let config = parse_config(MINIMAL).unwrap();
        assert_eq!(config.find_target("b").unwrap().path, PathBuf::from("/b"));
        assert_eq!(config.find_target("/a").unwrap().tag, "a");
        assert_eq!(config.find_target("/a/").unwrap().tag, "a");
        assert!(config.find_target("c").is_none());
    }

    #[test]
    fn test_load_config_from_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rbak.conf");
        fs::write(&path, MINIMAL).unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.targets.len(), 2);
    }

    #[test]
    fn test_load_config_missing_file() {
        let dir = tempdir().unwrap();
        let result = load_config(&dir.path().join("missing.conf"));
        assert!(matches!(result, Err(RbakError::Config { .. })));
    }

    #[test]
    fn test_sample_config_round_trips() {
        let config = parse_config(&sample_config()).unwrap();
        assert_eq!(config.repository, "/srv/restic-repo");
        assert_eq!(config.targets.len(), 2);
        assert_eq!(config.targets[1].tag, "pictures");
        assert_eq!(config.retention.describe(), "daily=7, weekly=4, monthly=12");
    }

    #[test]
    fn test_dump_config() {
        let config = parse_config(MINIMAL).unwrap();
        assert!(dump_config(&config, Path::new("/etc/rbak.conf")).is_ok());
    }

    #[test]
    fn test_default_config_path_env_override() {
        let _guard = ENV_MUTEX.lock().unwrap();

        let original = std::env::var_os("RBAK_CONFIG");
        std::env::set_var("RBAK_CONFIG", "/tmp/custom.conf");

        assert_eq!(
            default_config_path().unwrap(),
            PathBuf::from("/tmp/custom.conf")
        );

        match original {
            Some(value) => std::env::set_var("RBAK_CONFIG", value),
            None => std::env::remove_var("RBAK_CONFIG"),
        }
    }

    #[test]
    fn test_default_config_path_xdg() {
        let _guard = ENV_MUTEX.lock().unwrap();

        let original_override = std::env::var_os("RBAK_CONFIG");
        let original_xdg = std::env::var_os("XDG_CONFIG_HOME");
        std::env::remove_var("RBAK_CONFIG");

        let dir = tempdir().unwrap();
        std::env::set_var("XDG_CONFIG_HOME", dir.path());

        assert_eq!(
            default_config_path().unwrap(),
            dir.path().join("rbak").join("rbak.conf")
        );

        if let Some(value) = original_override {
            std::env::set_var("RBAK_CONFIG", value);
        }
        match original_xdg {
            Some(value) => std::env::set_var("XDG_CONFIG_HOME", value),
            None => std::env::remove_var("XDG_CONFIG_HOME"),
        }
    }
}
