use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{ArgAction, Args, Parser, Subcommand};

mod completion;
mod config;
mod dispatch;
mod logging;
mod render;
mod workbench;

use completion::CompletionShell;
use config::{Overrides, Settings};

#[derive(Parser, Debug)]
#[command(name = "birdfingers", version)]
#[command(
    about = "Inspect, snapshot and reconcile a Python package environment",
    long_about = None
)]
struct Cli {
    /// Directory holding snapshots, logs and the audit journal.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
    /// Interpreter whose `-m pip` manages the environment.
    #[arg(long, global = true)]
    python: Option<String>,
    /// Base URL of a PyPI-compatible JSON API.
    #[arg(long, global = true)]
    index_url: Option<String>,
    /// Print machine-readable JSON instead of text where supported.
    #[arg(long, global = true)]
    json: bool,
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug, Clone, Copy, Default, PartialEq, Eq)]
struct FollowArgs {
    /// Cancel the job when it runs longer than this.
    #[arg(long)]
    timeout_secs: Option<u64>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List pinned packages in the live environment.
    List,
    /// Show installed package details.
    Show { name: String },
    /// Look a project up on the package index.
    Search { name: String },
    /// Install a package, optionally at an exact version.
    Install {
        name: String,
        #[arg(long)]
        version: Option<String>,
        #[command(flatten)]
        follow: FollowArgs,
    },
    /// Change an installed package to an exact version.
    Set {
        name: String,
        version: String,
        #[command(flatten)]
        follow: FollowArgs,
    },
    /// Uninstall one or more packages.
    Uninstall {
        #[arg(required = true)]
        names: Vec<String>,
        #[command(flatten)]
        follow: FollowArgs,
    },
    /// Manage environment snapshots.
    Snapshot {
        #[command(subcommand)]
        command: SnapshotCommands,
    },
    /// Show recent entries of the audit journal.
    History {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Report interpreter, package manager and data paths.
    Doctor,
    /// Print a shell completion script.
    Completions {
        #[arg(value_enum)]
        shell: CompletionShell,
    },
}

#[derive(Subcommand, Debug)]
enum SnapshotCommands {
    /// Capture the live environment.
    Save {
        #[arg(long, default_value = "snapshot")]
        name: String,
        #[arg(long, default_value = "")]
        comment: String,
    },
    List,
    Show { id: String },
    /// Print the raw pin text, or write it to a file.
    Export {
        id: String,
        #[arg(long)]
        output: Option<PathBuf>,
    },
    Delete { id: String },
    /// Plan to bring the live environment to a snapshot.
    Preview { id: String },
    /// Plan to move from one snapshot to another.
    Diff { from: String, to: String },
    /// Install every pin recorded in a snapshot.
    Restore {
        id: String,
        #[arg(long)]
        dry_run: bool,
        #[command(flatten)]
        follow: FollowArgs,
    },
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            data_dir: self.data_dir.clone(),
            python: self.python.clone(),
            index_url: self.index_url.clone(),
            verbose: self.verbose,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    if let Commands::Completions { shell } = cli.command {
        return completion::write_completions_script(shell, &mut std::io::stdout());
    }

    let settings = Settings::load(&cli.overrides())?;
    if let Err(err) = logging::init(settings.log_level, &settings.layout().log_path()) {
        eprintln!("warning: logging disabled: {err:#}");
    }
    dispatch::run_cli(cli, settings)
}
