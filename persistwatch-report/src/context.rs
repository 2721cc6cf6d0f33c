//! Template context — serializable rendering payload built from a [`Diff`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use persistwatch_core::{Diff, Item, ModifiedItem, SnapshotId};

use crate::error::RenderError;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S UTC";

/// Everything a report template can reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportContext {
    pub before: SnapshotCtx,
    pub after: SnapshotCtx,
    pub totals: CountsCtx,
    /// Per-location counts, in location order. Untouched locations are omitted.
    pub locations: Vec<LocationCtx>,
    /// Display names of `locations`, for one-line summaries.
    pub location_names: Vec<String>,
    pub added: Vec<ItemCtx>,
    pub removed: Vec<ItemCtx>,
    pub modified: Vec<ModifiedCtx>,
    pub meta: MetaCtx,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotCtx {
    pub id: String,
    pub captured_at: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CountsCtx {
    pub added: usize,
    pub removed: usize,
    pub modified: usize,
    pub total: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationCtx {
    pub key: String,
    pub name: String,
    pub added: usize,
    pub removed: usize,
    pub modified: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemCtx {
    pub name: String,
    pub path: String,
    pub location: String,
    pub identifier: Option<String>,
    pub program: Option<String>,
    pub run_at_boot: Option<bool>,
    pub keep_alive: Option<bool>,
    /// First 12 hex characters of the content digest.
    pub digest: String,
    pub app: Option<String>,
    pub attributed_by: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModifiedCtx {
    pub before: ItemCtx,
    pub after: ItemCtx,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaCtx {
    pub version: String,
    pub generated_at: String,
}

impl ReportContext {
    pub fn from_diff(diff: &Diff) -> Self {
        let counts = diff.counts();
        let locations: Vec<LocationCtx> = diff
            .counts_by_location()
            .into_iter()
            .map(|(location, c)| LocationCtx {
                key: serde_json::to_value(location)
                    .ok()
                    .and_then(|v| v.as_str().map(str::to_string))
                    .unwrap_or_default(),
                name: location.display_name().to_string(),
                added: c.added,
                removed: c.removed,
                modified: c.modified,
            })
            .collect();
        let location_names = locations.iter().map(|l| l.name.clone()).collect();

        ReportContext {
            before: SnapshotCtx::new(diff.before_id, diff.before_captured_at),
            after: SnapshotCtx::new(diff.after_id, diff.after_captured_at),
            totals: CountsCtx {
                added: counts.added,
                removed: counts.removed,
                modified: counts.modified,
                total: counts.total(),
            },
            locations,
            location_names,
            added: diff.added.iter().map(ItemCtx::from).collect(),
            removed: diff.removed.iter().map(ItemCtx::from).collect(),
            modified: diff.modified.iter().map(ModifiedCtx::from).collect(),
            meta: MetaCtx {
                version: env!("CARGO_PKG_VERSION").to_string(),
                generated_at: format_timestamp(Utc::now()),
            },
        }
    }

    pub fn to_tera_context(&self) -> Result<tera::Context, RenderError> {
        let value = serde_json::to_value(self)?;
        Ok(tera::Context::from_value(value)?)
    }
}

impl SnapshotCtx {
    fn new(id: SnapshotId, captured_at: DateTime<Utc>) -> Self {
        Self {
            id: id.to_string(),
            captured_at: format_timestamp(captured_at),
        }
    }
}

impl From<&Item> for ItemCtx {
    fn from(item: &Item) -> Self {
        ItemCtx {
            name: item.name.clone(),
            path: item.path.display().to_string(),
            location: item.location.display_name().to_string(),
            identifier: item.identifier.clone(),
            program: item.program.as_ref().map(|p| p.display().to_string()),
            run_at_boot: item.run_at_boot,
            keep_alive: item.keep_alive,
            digest: item.digest.chars().take(12).collect(),
            app: item.attribution.as_ref().map(|a| a.app_name.clone()),
            attributed_by: item.attribution.as_ref().map(|a| a.source.to_string()),
        }
    }
}

impl From<&ModifiedItem> for ModifiedCtx {
    fn from(pair: &ModifiedItem) -> Self {
        ModifiedCtx {
            before: ItemCtx::from(&pair.before),
            after: ItemCtx::from(&pair.after),
        }
    }
}

fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use persistwatch_core::{Location, Snapshot};

    fn sample_diff() -> Diff {
        let before = Snapshot::capture("before", vec![]);
        let mut added = Item::new(
            "/Library/LaunchDaemons/com.x.plist",
            Location::SystemLaunchDaemons,
            "0123456789abcdef0123",
        );
        added.identifier = Some("com.x".into());
        Diff {
            before_id: before.id,
            after_id: SnapshotId::new(),
            before_captured_at: before.captured_at,
            after_captured_at: Utc::now(),
            added: vec![added],
            removed: vec![],
            modified: vec![],
        }
    }

    #[test]
    fn context_summarizes_locations_and_counts() {
        let ctx = ReportContext::from_diff(&sample_diff());
        assert_eq!(ctx.totals.total, 1);
        assert_eq!(ctx.locations.len(), 1);
        assert_eq!(ctx.locations[0].key, "system_launch_daemons");
        assert_eq!(ctx.location_names, vec!["Launch Daemons".to_string()]);
        assert_eq!(ctx.added[0].digest, "0123456789ab");
    }

    #[test]
    fn context_converts_to_tera() {
        let ctx = ReportContext::from_diff(&sample_diff());
        let tera_ctx = ctx.to_tera_context().unwrap();
        assert!(tera_ctx.get("totals").is_some());
        assert!(tera_ctx.get("added").is_some());
    }
}
