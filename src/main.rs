//! varroa - CLI entry point
//!
//! Parses the command line, loads the configuration and hands the request to
//! the dispatcher, which runs it here or through the background daemon.

use std::error::Error;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::error;

use varroa::config::{default, xdg, Config, ConfigLoader};
use varroa::daemon::logging;
use varroa::{
    format_uptime, Action, Collaborators, CommandRequest, DaemonSettings,
    DispatchError, Dispatcher, ForkLifecycle, Outcome, PidFileLocator, ShellCollaborators,
    StatusReport, UnixSocketTransport, Validator,
};

/// varroa musica, a companion for private music trackers
#[derive(Parser)]
#[command(name = "varroa")]
#[command(version, about = "varroa musica, a companion for private music trackers")]
struct Cli {
    /// Configuration file (default: $XDG_CONFIG_HOME/varroa/config.toml)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available subcommands for the varroa CLI
#[derive(Subcommand)]
enum Commands {
    /// Start the daemon
    Start {
        /// Stay attached to the terminal and log to stderr
        #[arg(long)]
        foreground: bool,
    },
    /// Stop the daemon
    Stop,
    /// Show how long the daemon has been running
    Uptime,
    /// Show the daemon's status report
    Status,
    /// Generate tracker stats
    Stats,
    /// Refresh the metadata of snatched torrents
    RefreshMetadata {
        tracker: String,
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Check a rip log with the tracker's log checker
    CheckLog { tracker: String, log_file: PathBuf },
    /// Snatch torrents
    Snatch {
        /// Use a freeleech token
        #[arg(long)]
        fl: bool,
        tracker: String,
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Show information about torrents
    Info {
        tracker: String,
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Archive user files
    Backup,
    /// Print the parsed configuration
    ShowConfig,
    /// Manage the downloads folder
    #[command(alias = "dl")]
    Downloads {
        #[command(subcommand)]
        command: DownloadsCommands,
    },
    /// Browse the music library
    Library {
        #[command(subcommand)]
        command: LibraryCommands,
    },
    /// Seed a release that is already on disk
    Reseed { tracker: String, path: PathBuf },
    /// Encrypt the configuration file
    Encrypt,
    /// Decrypt the configuration file
    Decrypt,
    /// Manage the configuration file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Actions for the `downloads` subcommand.
#[derive(Subcommand)]
enum DownloadsCommands {
    /// Scan the downloads folder
    Scan,
    /// Search downloads by artist
    Search { artist: String },
    /// Show the metadata of a download
    Metadata { id: String },
    /// Sort one download, or every unsorted one
    Sort { id: Option<String> },
    /// List downloads in a state (unsorted, accepted, exported, rejected)
    List { state: String },
    /// Remove empty and orphaned download folders
    Clean,
    /// Mount a read-only view of the downloads
    Fuse { mount_point: PathBuf },
}

/// Actions for the `library` subcommand.
#[derive(Subcommand)]
enum LibraryCommands {
    /// Mount a read-only view of the library
    Fuse { mount_point: PathBuf },
}

/// Actions for the `config` subcommand.
#[derive(Subcommand)]
enum ConfigAction {
    /// Show configuration file path
    Path,
    /// Create default configuration file
    Init {
        /// Overwrite existing configuration (creates backup)
        #[arg(long)]
        force: bool,
    },
}

impl Commands {
    /// The dispatcher request for this command; `None` for `config`.
    fn into_request(self) -> Option<CommandRequest> {
        let request = match self {
            Commands::Start { .. } => CommandRequest::new(Action::Start),
            Commands::Stop => CommandRequest::new(Action::Stop),
            Commands::Uptime => CommandRequest::new(Action::Uptime),
            Commands::Status => CommandRequest::new(Action::Status),
            Commands::Stats => CommandRequest::new(Action::Stats),
            Commands::RefreshMetadata { tracker, ids } => {
                CommandRequest::new(Action::RefreshMetadata).tracker(tracker).ids(ids)
            }
            Commands::CheckLog { tracker, log_file } => {
                CommandRequest::new(Action::CheckLog).tracker(tracker).log_file(log_file)
            }
            Commands::Snatch { fl, tracker, ids } => CommandRequest::new(Action::Snatch)
                .tracker(tracker)
                .ids(ids)
                .with_fl_token(fl),
            Commands::Info { tracker, ids } => {
                CommandRequest::new(Action::Info).tracker(tracker).ids(ids)
            }
            Commands::Backup => CommandRequest::new(Action::Backup),
            Commands::ShowConfig => CommandRequest::new(Action::ShowConfig),
            Commands::Downloads { command } => match command {
                DownloadsCommands::Scan => CommandRequest::new(Action::DownloadsScan),
                DownloadsCommands::Search { artist } => {
                    CommandRequest::new(Action::DownloadsSearch).artist(artist)
                }
                DownloadsCommands::Metadata { id } => {
                    CommandRequest::new(Action::DownloadsMetadata).ids([id])
                }
                DownloadsCommands::Sort { id } => CommandRequest::new(Action::DownloadsSort).ids(id),
                DownloadsCommands::List { state } => {
                    CommandRequest::new(Action::DownloadsList).download_state(state)
                }
                DownloadsCommands::Clean => CommandRequest::new(Action::DownloadsClean),
                DownloadsCommands::Fuse { mount_point } => {
                    CommandRequest::new(Action::DownloadsFuse).mount_point(mount_point)
                }
            },
            Commands::Library {
                command: LibraryCommands::Fuse { mount_point },
            } => CommandRequest::new(Action::LibraryFuse).mount_point(mount_point),
            Commands::Reseed { tracker, path } => {
                CommandRequest::new(Action::Reseed).tracker(tracker).path(path)
            }
            Commands::Encrypt => CommandRequest::new(Action::Encrypt),
            Commands::Decrypt => CommandRequest::new(Action::Decrypt),
            Commands::Config { .. } => return None,
        };
        Some(request)
    }
}

fn main() -> ExitCode {
    // Parse CLI arguments BEFORE any fork/runtime operations
    // This ensures errors are shown to the user in the terminal
    let cli = Cli::parse();
    let explicit_config = cli.config;

    let (starting, foreground) = match &cli.command {
        Commands::Start { foreground } => (true, *foreground),
        _ => (false, false),
    };

    if let Commands::Config { action } = cli.command {
        return run_config_command(action, explicit_config.as_deref());
    }
    let Some(request) = cli.command.into_request() else {
        return ExitCode::FAILURE;
    };

    let config = match ConfigLoader::load(explicit_config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            logging::init_stderr("info");
            error!("{}", error_chain(&e));
            return ExitCode::FAILURE;
        }
    };
    let level = config.daemon.log_level.as_str();

    // the daemon sets up its own logging once it has forked
    if !starting {
        logging::init_stderr(level);
    }

    match run(config, request, foreground) {
        Ok(outcome) => {
            report(&outcome);
            ExitCode::SUCCESS
        }
        Err(e) => {
            logging::init_stderr(level);
            error!("{}", error_chain(&e));
            ExitCode::FAILURE
        }
    }
}

/// Wires the production collaborators and routes `request`.
fn run(config: Config, request: CommandRequest, foreground: bool) -> Result<Outcome, DispatchError> {
    let settings = DaemonSettings::from_config(&config)?;
    let collaborators: Arc<dyn Collaborators> = Arc::new(ShellCollaborators::new(config));

    let locator = PidFileLocator::new(&settings.pid_path);
    let transport = UnixSocketTransport::new(&settings.socket_path);
    let lifecycle =
        ForkLifecycle::new(settings, Arc::clone(&collaborators)).foreground(foreground);

    Dispatcher::new(
        Validator::new(),
        &locator,
        &transport,
        &lifecycle,
        collaborators.as_ref(),
    )
    .dispatch(request)
}

/// Prints what the user asked to see; everything else is in the logs.
fn report(outcome: &Outcome) {
    match outcome {
        Outcome::Launched { pid } => println!("varroa started (pid {pid})"),
        Outcome::Stopped { pid } => println!("varroa stopped (pid {pid})"),
        Outcome::Uptime(uptime) => {
            println!("varroa has been up for {}", format_uptime(uptime.as_secs()))
        }
        Outcome::Status(status) => print!("{}", render_status(status)),
        Outcome::Served | Outcome::Delivered { .. } | Outcome::Local { .. } => {}
    }
}

fn render_status(status: &StatusReport) -> String {
    let workers = if status.workers.is_empty() {
        "none".to_string()
    } else {
        status.workers.join(", ")
    };
    format!(
        "varroa is running (pid {})\n  uptime: {}\n  socket: {}\n  commands handled: {}\n  workers: {}\n",
        status.pid,
        format_uptime(status.uptime_seconds),
        status.socket_path,
        status.commands_handled,
        workers
    )
}

fn run_config_command(action: ConfigAction, explicit: Option<&Path>) -> ExitCode {
    let result = match action {
        ConfigAction::Path => {
            let path = explicit.map(Path::to_path_buf).unwrap_or_else(xdg::config_path);
            println!("{}", path.display());
            Ok(())
        }
        ConfigAction::Init { force } => default::create_default_config(explicit, force).map(|path| {
            println!("Created configuration at {}", path.display());
        }),
    };
    if let Err(e) = result {
        eprintln!("Config error: {e}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

/// `error: cause: cause`, so wrapped io errors are not lost.
fn error_chain(error: &dyn Error) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
