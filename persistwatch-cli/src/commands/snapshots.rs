//! `persistwatch snapshots`, `show <id>` and `delete <id>`.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use persistwatch_core::{Item, SnapshotId, Store};

use super::{format_age, home_dir, print_json};

/// Arguments for `persistwatch snapshots`.
#[derive(Args, Debug)]
pub struct SnapshotsArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

/// Arguments for `persistwatch show`.
#[derive(Args, Debug)]
pub struct ShowArgs {
    /// Snapshot id, as printed by `persistwatch snapshots`.
    pub id: SnapshotId,

    /// Emit the full snapshot as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Arguments for `persistwatch delete`.
#[derive(Args, Debug)]
pub struct DeleteArgs {
    /// Snapshot id to delete.
    pub id: SnapshotId,
}

#[derive(Tabled)]
struct SnapshotRow {
    #[tabled(rename = "id")]
    id: String,
    #[tabled(rename = "captured")]
    captured: String,
    #[tabled(rename = "age")]
    age: String,
    #[tabled(rename = "label")]
    label: String,
    #[tabled(rename = "items")]
    items: usize,
    #[tabled(rename = "baseline")]
    baseline: &'static str,
}

#[derive(Tabled)]
struct ItemRow {
    #[tabled(rename = "location")]
    location: String,
    #[tabled(rename = "name")]
    name: String,
    #[tabled(rename = "identifier")]
    identifier: String,
    #[tabled(rename = "owner")]
    owner: String,
}

impl From<&Item> for ItemRow {
    fn from(item: &Item) -> Self {
        Self {
            location: item.location.to_string(),
            name: item.name.clone(),
            identifier: item.identifier.clone().unwrap_or_else(|| "-".to_string()),
            owner: item
                .attribution
                .as_ref()
                .map(|a| a.app_name.clone())
                .unwrap_or_else(|| "unknown".to_string()),
        }
    }
}

impl SnapshotsArgs {
    pub fn run(self) -> Result<()> {
        let store = Store::at(&home_dir()?);
        let summaries = store
            .list_snapshots()
            .context("failed to list snapshots")?;
        if self.json {
            return print_json(&summaries);
        }

        if summaries.is_empty() {
            println!("No snapshots yet. Run 'persistwatch scan' to capture one.");
            return Ok(());
        }

        let baseline = store
            .load_baseline()
            .context("failed to read baseline")?
            .map(|snapshot| snapshot.id);
        let rows: Vec<SnapshotRow> = summaries
            .into_iter()
            .map(|s| SnapshotRow {
                id: s.id.to_string(),
                captured: s.captured_at.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
                age: format_age(s.captured_at),
                label: s.label,
                items: s.item_count,
                baseline: if Some(s.id) == baseline { "*" } else { "" },
            })
            .collect();
        let mut table = Table::new(rows);
        table.with(Style::rounded());
        println!("{table}");
        Ok(())
    }
}

impl ShowArgs {
    pub fn run(self) -> Result<()> {
        let store = Store::at(&home_dir()?);
        let snapshot = store
            .load_snapshot(self.id)
            .with_context(|| format!("failed to load snapshot {}", self.id))?;
        if self.json {
            return print_json(&snapshot);
        }

        println!(
            "Snapshot {} '{}' captured {}",
            snapshot.id.to_string().bold(),
            snapshot.label,
            snapshot.captured_at.to_rfc3339()
        );
        println!("Aggregate digest: {}", snapshot.aggregate_digest);
        for (location, count) in snapshot.counts_by_location() {
            println!("  {location}: {count}");
        }

        if snapshot.items.is_empty() {
            println!("No items.");
            return Ok(());
        }
        let rows: Vec<ItemRow> = snapshot.items.iter().map(ItemRow::from).collect();
        let mut table = Table::new(rows);
        table.with(Style::rounded());
        println!("{table}");
        Ok(())
    }
}

impl DeleteArgs {
    pub fn run(self) -> Result<()> {
        let store = Store::at(&home_dir()?);
        let was_baseline = store
            .load_baseline()
            .context("failed to read baseline")?
            .is_some_and(|baseline| baseline.id == self.id);
        let was_pending = store
            .load_pending()
            .context("failed to read pending change")?
            .is_some_and(|pending| pending.before_id == self.id || pending.after_id == self.id);

        store
            .delete_snapshot(self.id)
            .with_context(|| format!("failed to delete snapshot {}", self.id))?;
        println!("Deleted snapshot {}", self.id);
        if was_pending {
            store
                .clear_pending()
                .context("failed to clear pending change")?;
            println!("Cleared the pending change that compared against it.");
        }
        if was_baseline {
            println!(
                "{}",
                "That was the baseline; the watcher will capture a new one on its next cycle."
                    .yellow()
            );
        }
        Ok(())
    }
}
