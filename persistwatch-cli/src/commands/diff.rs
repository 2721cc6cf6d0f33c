//! `persistwatch diff` and `persistwatch pending` — render snapshot deltas.

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;

use persistwatch_core::{Diff, SnapshotId, Store};
use persistwatch_report::{Renderer, ReportKind};
use persistwatch_scan::{diff_stored, reconstruct_pending};

use super::{home_dir, print_json, DiffFormat};

/// Arguments for `persistwatch diff`.
#[derive(Args, Debug)]
pub struct DiffArgs {
    /// Older snapshot. Defaults to the second most recent.
    #[arg(requires = "after")]
    pub before: Option<SnapshotId>,

    /// Newer snapshot. Defaults to the most recent.
    pub after: Option<SnapshotId>,

    /// Report format.
    #[arg(long, value_enum, default_value_t = DiffFormat::Text)]
    pub format: DiffFormat,
}

/// Arguments for `persistwatch pending`.
#[derive(Args, Debug)]
pub struct PendingArgs {
    /// Clear the pending change after showing it.
    #[arg(long)]
    pub ack: bool,

    /// Report format.
    #[arg(long, value_enum, default_value_t = DiffFormat::Text)]
    pub format: DiffFormat,
}

impl DiffArgs {
    pub fn run(self) -> Result<()> {
        let store = Store::at(&home_dir()?);
        let (before, after) = match (self.before, self.after) {
            (Some(before), Some(after)) => (before, after),
            _ => latest_pair(&store)?,
        };

        let delta = diff_stored(&store, before, after)
            .with_context(|| format!("failed to diff {before} against {after}"))?;
        print_diff(&store, &delta, self.format)
    }
}

impl PendingArgs {
    pub fn run(self) -> Result<()> {
        let store = Store::at(&home_dir()?);
        match reconstruct_pending(&store) {
            Ok(Some((pending, delta))) => {
                if self.format != DiffFormat::Json {
                    println!(
                        "Detected {} ({} -> {})",
                        pending.detected_at.to_rfc3339(),
                        pending.before_id,
                        pending.after_id
                    );
                }
                print_diff(&store, &delta, self.format)?;
            }
            Ok(None) => {
                if self.format == DiffFormat::Json {
                    return print_json(&serde_json::Value::Null);
                }
                println!("No pending changes.");
                return Ok(());
            }
            // Acknowledging still clears a pair whose snapshots are gone.
            Err(err) if self.ack => eprintln!(
                "{} {err}",
                "warning: pending change can no longer be shown:".yellow()
            ),
            Err(err) => {
                return Err(err).context(
                    "failed to load pending change; 'persistwatch pending --ack' discards it",
                )
            }
        }

        if self.ack {
            store
                .clear_pending()
                .context("failed to clear pending change")?;
            if self.format != DiffFormat::Json {
                println!("Pending change acknowledged.");
            }
        }
        Ok(())
    }
}

fn latest_pair(store: &Store) -> Result<(SnapshotId, SnapshotId)> {
    let summaries = store
        .list_snapshots()
        .context("failed to list snapshots")?;
    match summaries.as_slice() {
        [.., before, after] => Ok((before.id, after.id)),
        _ => bail!("need at least two snapshots to diff; run 'persistwatch scan' first"),
    }
}

fn print_diff(store: &Store, delta: &Diff, format: DiffFormat) -> Result<()> {
    let kind = match format {
        DiffFormat::Json => return print_json(delta),
        DiffFormat::Md => ReportKind::Markdown,
        DiffFormat::Text => ReportKind::Text,
    };
    let renderer = Renderer::for_data_root(store.root()).context("failed to load templates")?;
    let report = renderer
        .render(delta, kind)
        .context("failed to render diff report")?;
    print!("{report}");
    if !report.ends_with('\n') {
        println!();
    }
    Ok(())
}
