use clap::error::ErrorKind;
use clap::{Arg, ArgAction, ArgMatches, Command};
use rbak::{
    default_config_path, default_log_path, dump_config, load_config, rotate_log, sample_config,
    Config,
    LogSink, Orchestrator, RbakError, Restic, SessionContext, ROTATE_KEEP, ROTATE_THRESHOLD,
};
use std::path::{Path, PathBuf};
use std::process;

fn main() {
    let result = run();
    match result {
        Ok(exit_code) => process::exit(exit_code),
        Err(error) => {
            eprintln!("Error: {error}");

            // Show suggestions if available
            let suggestions = error.suggestions();
            if !suggestions.is_empty() {
                eprintln!("\nSuggestions:");
                for suggestion in suggestions {
                    eprintln!("  - {suggestion}");
                }
            }

            process::exit(error.exit_code());
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Action {
    Backup(String),
    List(Option<String>),
    Restore {
        snapshot: String,
        path: Option<PathBuf>,
    },
    RestoreLatest {
        tag: String,
        path: Option<PathBuf>,
    },
    RestoreAll(Option<PathBuf>),
    Prune,
    Check,
    Config,
    SampleConfig,
    Init,
}

impl Action {
    fn from_matches(matches: &ArgMatches) -> Option<Self> {
        let action = match matches.subcommand()? {
            ("backup", sub) => Action::Backup(sub.get_one::<String>("target")?.clone()),
            ("list", sub) => Action::List(sub.get_one::<String>("tag").cloned()),
            ("restore", sub) => Action::Restore {
                snapshot: sub.get_one::<String>("snapshot")?.clone(),
                path: sub.get_one::<PathBuf>("path").cloned(),
            },
            ("restore-latest", sub) => Action::RestoreLatest {
                tag: sub.get_one::<String>("tag")?.clone(),
                path: sub.get_one::<PathBuf>("path").cloned(),
            },
            ("restore-all", sub) => Action::RestoreAll(sub.get_one::<PathBuf>("path").cloned()),
            ("prune", _) => Action::Prune,
            ("check", _) => Action::Check,
            ("config", sub) if sub.get_flag("sample") => Action::SampleConfig,
            ("config", _) => Action::Config,
            ("init", _) => Action::Init,
            _ => return None,
        };
        Some(action)
    }

    /// Whether the repository must be reachable before running
    fn needs_repository(&self) -> bool {
        !matches!(self, Action::Config | Action::SampleConfig | Action::Init)
    }
}

fn path_arg(help: &'static str) -> Arg {
    Arg::new("path")
        .help(help)
        .value_name("PATH")
        .value_parser(clap::value_parser!(PathBuf))
}

fn build_cli() -> Command {
    Command::new("rbak")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Backup, restore and retention orchestration on top of restic")
        .long_about(
            "rbak drives restic for a configured list of directories.\n\
             Example: 'rbak backup all' takes one tagged snapshot per directory, then runs forget --prune",
        )
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .help("Configuration file")
                .value_name("FILE")
                .env("RBAK_CONFIG")
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("log")
                .short('l')
                .long("log")
                .help("Log file")
                .value_name("FILE")
                .env("RBAK_LOG")
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("quiet")
                .short('q')
                .long("quiet")
                .help("Only write to the log file, not the console")
                .action(ArgAction::SetTrue)
                .conflicts_with("verbose"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Show restic's output for every command")
                .action(ArgAction::SetTrue),
        )
        .subcommand(
            Command::new("backup")
                .about("Back up one target, or every target with 'all'")
                .arg(
                    Arg::new("target")
                        .help("Configured tag, directory path, or 'all'")
                        .value_name("TARGET")
                        .required(true),
                ),
        )
        .subcommand(
            Command::new("list")
                .about("List snapshots, optionally for one tag")
                .arg(Arg::new("tag").help("Only show snapshots with this tag")),
        )
        .subcommand(
            Command::new("restore")
                .about("Restore a snapshot by id")
                .arg(
                    Arg::new("snapshot")
                        .help("Snapshot id")
                        .value_name("SNAPSHOT")
                        .required(true),
                )
                .arg(path_arg("Restore into this directory instead of the original location")),
        )
        .subcommand(
            Command::new("restore-latest")
                .about("Restore the most recent snapshot for a tag")
                .arg(Arg::new("tag").help("Snapshot tag").required(true))
                .arg(path_arg("Restore into this directory instead of the original location")),
        )
        .subcommand(
            Command::new("restore-all")
                .about("Restore the latest snapshot of every configured target")
                .arg(path_arg("Shared base directory for all restores")),
        )
        .subcommand(Command::new("prune").about("Apply the retention policy"))
        .subcommand(Command::new("check").about("Verify repository integrity"))
        .subcommand(
            Command::new("config")
                .about("Show the effective configuration")
                .arg(
                    Arg::new("sample")
                        .long("sample")
                        .help("Print a commented configuration template instead")
                        .action(ArgAction::SetTrue),
                ),
        )
        .subcommand(Command::new("init").about("Initialise the restic repository"))
}

fn run() -> Result<i32, RbakError> {
    let matches = match build_cli().try_get_matches() {
        Ok(matches) => matches,
        Err(e) => {
            let code = match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
                _ => 1,
            };
            let _ = e.print();
            return Ok(code);
        }
    };

    let Some(action) = Action::from_matches(&matches) else {
        let _ = build_cli().print_help();
        return Ok(1);
    };

    if action == Action::SampleConfig {
        print!("{}", sample_config());
        return Ok(0);
    }

    let quiet = matches.get_flag("quiet");
    let verbose = matches.get_flag("verbose");

    // Rotate before the first line of this run is written
    let log_path = match matches.get_one::<PathBuf>("log") {
        Some(path) => path.clone(),
        None => default_log_path()?,
    };
    if let Err(e) = rotate_log(&log_path, ROTATE_THRESHOLD, ROTATE_KEEP) {
        eprintln!(
            "Warning: Could not rotate log file {}: {e}",
            log_path.display()
        );
    }
    let log = LogSink::new(log_path).quiet(quiet);

    let config_path = match matches.get_one::<PathBuf>("config") {
        Some(path) => path.clone(),
        None => default_config_path()?,
    };
    let config = load_config(&config_path).map_err(|e| {
        log.failure(format!("Could not load configuration: {e}"));
        e
    })?;

    let context = SessionContext::new();
    if let Err(e) = rbak::signal::install_handler(&context) {
        eprintln!("Warning: Could not install interrupt handler: {e}");
    }

    let restic = Restic::new(&config, context).verbose(verbose);
    let orchestrator = Orchestrator::new(&config, &restic, &log);

    if action.needs_repository() {
        orchestrator.verify_repository()?;
    }

    dispatch(&orchestrator, action, &config, &config_path)
}

fn dispatch(
    orchestrator: &Orchestrator<'_>,
    action: Action,
    config: &Config,
    config_path: &Path,
) -> Result<i32, RbakError> {
    match action {
        Action::Backup(target) => Ok(orchestrator.backup(&target)?.exit_code()),
        Action::List(tag) => {
            print!("{}", orchestrator.list(tag.as_deref())?);
            Ok(0)
        }
        Action::Restore { snapshot, path } => {
            orchestrator.restore_snapshot(&snapshot, path.as_deref(), None)?;
            Ok(0)
        }
        Action::RestoreLatest { tag, path } => {
            orchestrator.restore_latest(&tag, path.as_deref())?;
            Ok(0)
        }
        Action::RestoreAll(base) => Ok(orchestrator.restore_all(base.as_deref())?.exit_code()),
        Action::Prune => {
            orchestrator.prune()?;
            Ok(0)
        }
        Action::Check => {
            orchestrator.check()?;
            Ok(0)
        }
        Action::Config => {
            dump_config(config, config_path)?;
            Ok(0)
        }
        Action::Init => {
            orchestrator.init()?;
            Ok(0)
        }
        // Handled before the configuration is loaded
        Action::SampleConfig => Ok(0),
    }
}
