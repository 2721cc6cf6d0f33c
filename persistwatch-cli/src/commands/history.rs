//! `persistwatch history` — recorded diffs, newest first.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use persistwatch_core::{DiffRecord, DiffSource, Store};

use super::{format_age, home_dir, print_json};

/// Arguments for `persistwatch history`.
#[derive(Args, Debug)]
pub struct HistoryArgs {
    /// Show at most this many records.
    #[arg(long, short = 'n')]
    pub limit: Option<usize>,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Tabled)]
struct HistoryRow {
    #[tabled(rename = "when")]
    when: String,
    #[tabled(rename = "source")]
    source: String,
    #[tabled(rename = "added")]
    added: usize,
    #[tabled(rename = "removed")]
    removed: usize,
    #[tabled(rename = "modified")]
    modified: usize,
    #[tabled(rename = "locations")]
    locations: String,
}

impl From<&DiffRecord> for HistoryRow {
    fn from(record: &DiffRecord) -> Self {
        let source = match record.source {
            DiffSource::Manual => record.source.to_string().normal(),
            DiffSource::Automatic => record.source.to_string().cyan(),
        };
        let locations = match &record.affected_locations {
            Some(locations) if !locations.is_empty() => locations
                .iter()
                .map(|l| l.to_string())
                .collect::<Vec<_>>()
                .join(", "),
            Some(_) => "-".to_string(),
            None => "(not recorded)".to_string(),
        };
        Self {
            when: format_age(record.timestamp),
            source: source.to_string(),
            added: record.added_count,
            removed: record.removed_count,
            modified: record.modified_count,
            locations,
        }
    }
}

impl HistoryArgs {
    pub fn run(self) -> Result<()> {
        let store = Store::at(&home_dir()?);
        let mut records = store.list_records().context("failed to list diff records")?;
        if let Some(limit) = self.limit {
            records.truncate(limit);
        }

        if self.json {
            return print_json(&records);
        }
        if records.is_empty() {
            println!("No changes recorded.");
            return Ok(());
        }

        let rows: Vec<HistoryRow> = records.iter().map(HistoryRow::from).collect();
        let mut table = Table::new(rows);
        table.with(Style::rounded());
        println!("{table}");
        Ok(())
    }
}
