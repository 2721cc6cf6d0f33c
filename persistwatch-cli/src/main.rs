//! persistwatch — macOS persistence monitoring CLI.
//!
//! # Usage
//!
//! ```text
//! persistwatch scan [--label <label>] [--baseline] [--json]
//! persistwatch snapshots [--json]
//! persistwatch show <snapshot-id> [--json]
//! persistwatch delete <snapshot-id>
//! persistwatch diff [<before> <after>] [--format text|md|json]
//! persistwatch history [--limit <n>] [--json]
//! persistwatch pending [--ack] [--format text|md|json]
//! persistwatch locations [--json]
//! persistwatch attribute <path> [--json]
//! persistwatch daemon start|stop|status|restart|install|uninstall|logs
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    attribute::AttributeArgs,
    daemon::DaemonCommand,
    diff::{DiffArgs, PendingArgs},
    history::HistoryArgs,
    locations::LocationsArgs,
    scan::ScanArgs,
    snapshots::{DeleteArgs, ShowArgs, SnapshotsArgs},
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "persistwatch",
    version,
    about = "Track launch agents, daemons and other macOS persistence mechanisms",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Capture a snapshot now and diff it against the previous one.
    Scan(ScanArgs),

    /// List stored snapshots, oldest first.
    Snapshots(SnapshotsArgs),

    /// Show the items of one snapshot.
    Show(ShowArgs),

    /// Delete a stored snapshot.
    Delete(DeleteArgs),

    /// Compare two snapshots (the latest two by default).
    Diff(DiffArgs),

    /// List recorded diffs.
    History(HistoryArgs),

    /// Show the change the watcher detected last, optionally acknowledging it.
    Pending(PendingArgs),

    /// List monitored locations and whether they are readable.
    Locations(LocationsArgs),

    /// Explain which application a persistence file belongs to.
    Attribute(AttributeArgs),

    /// Manage the background watcher and its launchd agent.
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Scan(args) => args.run(),
        Commands::Snapshots(args) => args.run(),
        Commands::Show(args) => args.run(),
        Commands::Delete(args) => args.run(),
        Commands::Diff(args) => args.run(),
        Commands::History(args) => args.run(),
        Commands::Pending(args) => args.run(),
        Commands::Locations(args) => args.run(),
        Commands::Attribute(args) => args.run(),
        Commands::Daemon { command } => commands::daemon::run(command),
    }
}
