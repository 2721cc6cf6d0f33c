//! Snapshot comparison.
//!
//! [`diff`] is pure and total: it never fails, and every path present in
//! either snapshot lands in exactly one of added, removed, modified or
//! unchanged.

use std::collections::BTreeMap;
use std::path::Path;

use persistwatch_core::{Diff, Item, ModifiedItem, PendingDiffPair, Snapshot, SnapshotId, Store};

use crate::ScanError;

/// Classify the delta from `before` to `after`.
///
/// Items are keyed by path; a path in both snapshots with a different digest
/// is modified, never removed+added. Each collection is sorted by path.
pub fn diff(before: &Snapshot, after: &Snapshot) -> Diff {
    let old = by_path(&before.items);
    let new = by_path(&after.items);

    let mut added = Vec::new();
    let mut modified = Vec::new();
    for (path, item) in &new {
        match old.get(path) {
            None => added.push((*item).clone()),
            Some(prev) if prev.digest != item.digest => modified.push(ModifiedItem {
                before: (*prev).clone(),
                after: (*item).clone(),
            }),
            Some(_) => {}
        }
    }

    let removed = old
        .iter()
        .filter(|(path, _)| !new.contains_key(*path))
        .map(|(_, item)| (*item).clone())
        .collect();

    Diff {
        before_id: before.id,
        after_id: after.id,
        before_captured_at: before.captured_at,
        after_captured_at: after.captured_at,
        added,
        removed,
        modified,
    }
}

fn by_path(items: &[Item]) -> BTreeMap<&Path, &Item> {
    items.iter().map(|item| (item.path.as_path(), item)).collect()
}

/// Diff two snapshots loaded from `store`.
pub fn diff_stored(
    store: &Store,
    before: SnapshotId,
    after: SnapshotId,
) -> Result<Diff, ScanError> {
    let before = store.load_snapshot(before)?;
    let after = store.load_snapshot(after)?;
    Ok(diff(&before, &after))
}

/// Rebuild the diff for the pending pair, if any.
pub fn reconstruct_pending(store: &Store) -> Result<Option<(PendingDiffPair, Diff)>, ScanError> {
    let Some(pending) = store.load_pending()? else {
        return Ok(None);
    };
    let diff = diff_stored(store, pending.before_id, pending.after_id)?;
    Ok(Some((pending, diff)))
}
