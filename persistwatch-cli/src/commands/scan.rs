//! `persistwatch scan` — capture a snapshot on demand.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde_json::json;

use persistwatch_core::{config, SnapshotSummary, Store};
use persistwatch_daemon::MANUAL_SNAPSHOT_LABEL;
use persistwatch_report::{Renderer, ReportKind};
use persistwatch_scan::{record_manual_scan, Pipeline};

use super::{home_dir, print_json};

/// Arguments for `persistwatch scan`.
#[derive(Args, Debug)]
pub struct ScanArgs {
    /// Label stored with the snapshot.
    #[arg(long, short = 'l', default_value = MANUAL_SNAPSHOT_LABEL)]
    pub label: String,

    /// Also make this snapshot the watcher's baseline.
    #[arg(long)]
    pub baseline: bool,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl ScanArgs {
    pub fn run(self) -> Result<()> {
        let home = home_dir()?;
        let config = config::load_at(&home).context("failed to load config.yaml")?;
        let store = Store::at(&home);

        let snapshot = Pipeline::standard(&home, &config).scan(&self.label);
        let delta = record_manual_scan(&store, &snapshot).context("failed to record snapshot")?;
        if self.baseline {
            store
                .save_baseline(&snapshot)
                .context("failed to update baseline")?;
        }

        let summary = SnapshotSummary::from(&snapshot);
        if self.json {
            return print_json(&json!({
                "snapshot": summary,
                "changes": delta.as_ref().map(|d| d.counts()),
                "baseline": self.baseline,
            }));
        }

        println!(
            "Captured snapshot {} '{}' ({} items)",
            summary.id.to_string().bold(),
            summary.label,
            summary.item_count
        );
        if self.baseline {
            println!("Baseline set to {}", summary.id);
        }

        match delta {
            None => println!("No previous snapshot to compare against."),
            Some(delta) if delta.is_empty() => println!("{}", "No changes.".green()),
            Some(delta) => {
                let renderer =
                    Renderer::for_data_root(store.root()).context("failed to load templates")?;
                let report = renderer
                    .render(&delta, ReportKind::Text)
                    .context("failed to render diff")?;
                print!("{report}");
                if !report.ends_with('\n') {
                    println!();
                }
            }
        }
        Ok(())
    }
}
