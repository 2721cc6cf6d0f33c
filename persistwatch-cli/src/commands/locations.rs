//! `persistwatch locations` — the monitored catalog and its readability.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use persistwatch_core::privilege::FsPermissionProbe;
use persistwatch_core::{config, Location, PermissionProbe};

use super::{home_dir, print_json};

/// Arguments for `persistwatch locations`.
#[derive(Args, Debug)]
pub struct LocationsArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Serialize)]
struct LocationStatus {
    location: Location,
    name: &'static str,
    path: String,
    requires_elevation: bool,
    accessible: bool,
    exists: bool,
}

#[derive(Serialize)]
struct LocationsReport {
    permission_granted: bool,
    locations: Vec<LocationStatus>,
}

#[derive(Tabled)]
struct LocationRow {
    #[tabled(rename = "location")]
    name: &'static str,
    #[tabled(rename = "path")]
    path: String,
    #[tabled(rename = "elevation")]
    elevation: &'static str,
    #[tabled(rename = "status")]
    status: String,
}

impl LocationsArgs {
    pub fn run(self) -> Result<()> {
        let home = home_dir()?;
        let config = config::load_at(&home).context("failed to load config.yaml")?;
        let granted = FsPermissionProbe::default().is_granted();

        let locations: Vec<LocationStatus> = config
            .location_table(&home)
            .specs()
            .iter()
            .map(|spec| LocationStatus {
                location: spec.location,
                name: spec.location.display_name(),
                path: spec.path.display().to_string(),
                requires_elevation: spec.requires_elevation,
                accessible: spec.is_accessible(granted),
                exists: spec.path.exists(),
            })
            .collect();

        if self.json {
            return print_json(&LocationsReport {
                permission_granted: granted,
                locations,
            });
        }

        let permission = if granted {
            "granted".green()
        } else {
            "not granted".yellow()
        };
        println!("Full Disk Access: {permission}");

        let rows: Vec<LocationRow> = locations
            .into_iter()
            .map(|status| LocationRow {
                name: status.name,
                path: status.path,
                elevation: if status.requires_elevation { "required" } else { "-" },
                status: location_status(status.accessible, status.exists),
            })
            .collect();
        let mut table = Table::new(rows);
        table.with(Style::rounded());
        println!("{table}");
        Ok(())
    }
}

fn location_status(accessible: bool, exists: bool) -> String {
    match (accessible, exists) {
        (false, _) => "needs permission".yellow().to_string(),
        (true, false) => "absent".bright_black().to_string(),
        (true, true) => "monitored".green().to_string(),
    }
}
