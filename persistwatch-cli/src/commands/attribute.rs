//! `persistwatch attribute <path>` — which application owns a persistence file.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;

use persistwatch_attribution::AttributionResolver;
use persistwatch_core::config;
use persistwatch_scan::read_item;

use super::{home_dir, print_json};

/// Arguments for `persistwatch attribute`.
#[derive(Args, Debug)]
pub struct AttributeArgs {
    /// A file inside one of the monitored locations.
    pub path: PathBuf,

    /// Emit the attributed item as JSON.
    #[arg(long)]
    pub json: bool,
}

impl AttributeArgs {
    pub fn run(self) -> Result<()> {
        let home = home_dir()?;
        let config = config::load_at(&home).context("failed to load config.yaml")?;
        let path = if self.path.is_absolute() {
            self.path
        } else {
            std::env::current_dir()
                .context("cannot resolve current directory")?
                .join(self.path)
        };

        let Some(location) = config.location_table(&home).location_for_path(&path) else {
            bail!("{} is not inside a monitored location", path.display());
        };
        let Some(mut item) = read_item(&path, location) else {
            bail!("cannot read {}", path.display());
        };
        item.attribution = AttributionResolver::standard(&home, &config.attribution).resolve(&item);

        if self.json {
            return print_json(&item);
        }

        println!("{} ({location})", item.path.display().to_string().bold());
        if let Some(identifier) = &item.identifier {
            println!("  identifier: {identifier}");
        }
        if let Some(program) = &item.program {
            println!("  program:    {}", program.display());
        }
        match &item.attribution {
            Some(owner) => {
                println!("  owner:      {} [{}]", owner.app_name.green(), owner.source);
                println!("  bundle:     {}", owner.bundle_path.display());
                if let Some(bundle_id) = &owner.bundle_id {
                    println!("  bundle id:  {bundle_id}");
                }
                if let Some(team_id) = &owner.team_id {
                    println!("  team:       {team_id}");
                }
            }
            None => println!("  owner:      {}", "unknown".yellow()),
        }
        Ok(())
    }
}
