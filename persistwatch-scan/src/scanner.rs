//! Filesystem scanner over the location table.
//!
//! Every failure is scoped to one unit: a missing or unreadable location
//! contributes nothing, an unreadable file is skipped, and the scan as a
//! whole always completes.

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};

use persistwatch_core::{
    Item, Location, LocationSpec, LocationTable, PermissionProbe, PrivilegedHelper,
};

use crate::descriptor::{self, DescriptorKind};
use crate::hasher::{digest_bytes, digest_file};

/// Collects [`Item`]s from every location in a [`LocationTable`].
pub struct Scanner {
    locations: LocationTable,
    permission: Arc<dyn PermissionProbe>,
    helper: Option<Arc<dyn PrivilegedHelper>>,
}

impl Scanner {
    pub fn new(locations: LocationTable, permission: Arc<dyn PermissionProbe>) -> Self {
        Self {
            locations,
            permission,
            helper: None,
        }
    }

    /// Use `helper` for privileged locations while the permission is absent.
    pub fn with_helper(mut self, helper: Arc<dyn PrivilegedHelper>) -> Self {
        self.helper = Some(helper);
        self
    }

    pub fn locations(&self) -> &LocationTable {
        &self.locations
    }

    pub fn permission(&self) -> &Arc<dyn PermissionProbe> {
        &self.permission
    }

    /// Scan every location. The permission probe is consulted once per call.
    ///
    /// Items are returned in location order, then path order within each
    /// location; callers that need a global order sort by path.
    pub fn scan_items(&self) -> Vec<Item> {
        let granted = self.permission.is_granted();
        let mut items = Vec::new();
        for spec in self.locations.specs() {
            let found = self.scan_location(spec, granted);
            tracing::debug!("{}: {} item(s) at {}", spec.location, found.len(), spec.path.display());
            items.extend(found);
        }
        items
    }

    /// Items at a single location, honoring the permission state `granted`.
    pub fn scan_location(&self, spec: &LocationSpec, granted: bool) -> Vec<Item> {
        let candidates = if spec.is_accessible(granted) {
            candidate_paths(spec)
        } else {
            match self.helper_paths(spec) {
                Some(paths) => paths,
                None => {
                    tracing::debug!(
                        "skipping {}: elevated permission not granted",
                        spec.location
                    );
                    return Vec::new();
                }
            }
        };

        candidates
            .iter()
            .filter_map(|path| read_item(path, spec.location))
            .collect()
    }

    fn helper_paths(&self, spec: &LocationSpec) -> Option<Vec<PathBuf>> {
        let helper = self.helper.as_ref()?;
        match helper.scan_location(&spec.path) {
            Ok(mut paths) => {
                if !spec.is_single_file() {
                    paths.retain(|p| has_extension(p, spec.location.extensions()));
                }
                paths.sort();
                paths.dedup();
                Some(paths)
            }
            Err(err) => {
                tracing::debug!("privileged helper unavailable for {}: {err}", spec.location);
                None
            }
        }
    }
}

/// Files at a location that count as items, sorted by path.
pub fn candidate_paths(spec: &LocationSpec) -> Vec<PathBuf> {
    if spec.is_single_file() {
        return if spec.path.is_file() {
            vec![spec.path.clone()]
        } else {
            Vec::new()
        };
    }
    collect_files(
        &spec.path,
        spec.location.max_depth(),
        spec.location.extensions(),
    )
}

/// Breadth-first walk of `root`, `max_depth` levels deep, keeping files whose
/// extension is in `extensions` (case-insensitive). Symlinks are followed.
pub fn collect_files(root: &Path, max_depth: usize, extensions: &[&str]) -> Vec<PathBuf> {
    let mut files = Vec::new();
    let mut queue = VecDeque::from([(root.to_path_buf(), 1usize)]);

    while let Some((dir, depth)) = queue.pop_front() {
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) => {
                tracing::debug!("cannot list {}: {err}", dir.display());
                continue;
            }
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                if depth < max_depth {
                    queue.push_back((path, depth + 1));
                }
            } else if path.is_file() && has_extension(&path, extensions) {
                files.push(path);
            }
        }
    }

    files.sort();
    files
}

fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| extensions.iter().any(|want| ext.eq_ignore_ascii_case(want)))
        .unwrap_or(false)
}

/// Read one file into an [`Item`]: raw-byte digest, metadata and descriptor
/// fields. `None` if the file cannot be read.
pub fn read_item(path: &Path, location: Location) -> Option<Item> {
    let kind = DescriptorKind::for_location(location);

    // Databases are hashed as a stream; descriptors are small and parsed too.
    let (digest, bytes) = if kind == DescriptorKind::Opaque {
        match digest_file(path) {
            Ok(digest) => (digest, Vec::new()),
            Err(err) => {
                tracing::debug!("cannot hash: {err}");
                return None;
            }
        }
    } else {
        match fs::read(path) {
            Ok(bytes) => (digest_bytes(&bytes), bytes),
            Err(err) => {
                tracing::debug!("cannot read {}: {err}", path.display());
                return None;
            }
        }
    };
    let metadata = fs::metadata(path).ok();

    let mut item = Item::new(path, location, digest);
    item.size = metadata
        .as_ref()
        .map(|m| m.len())
        .unwrap_or(bytes.len() as u64);
    item.modified_at = metadata
        .and_then(|m| m.modified().ok())
        .map(DateTime::<Utc>::from);

    let fields = descriptor::parse_bytes(&bytes, kind);
    item.identifier = fields.identifier;
    item.program = fields.program;
    item.run_at_boot = fields.run_at_boot;
    item.keep_alive = fields.keep_alive;
    Some(item)
}

#[cfg(test)]
mod tests {
    use super::*;
    use persistwatch_core::privilege::{FixedPermission, HelperError};
    use tempfile::TempDir;

    fn table(root: &Path) -> LocationTable {
        LocationTable::new(vec![
            LocationSpec::new(Location::UserLaunchAgents, root.join("agents")),
            LocationSpec::new(Location::BackgroundTaskManagement, root.join("btm")),
            LocationSpec::new(Location::SystemTccDatabase, root.join("tcc").join("TCC.db")),
        ])
    }

    fn scanner(root: &Path, granted: bool) -> Scanner {
        Scanner::new(table(root), Arc::new(FixedPermission::new(granted)))
    }

    #[test]
    fn collects_only_matching_extensions() {
        let tmp = TempDir::new().unwrap();
        let agents = tmp.path().join("agents");
        fs::create_dir_all(&agents).unwrap();
        fs::write(agents.join("com.a.plist"), b"a").unwrap();
        fs::write(agents.join("COM.B.PLIST"), b"b").unwrap();
        fs::write(agents.join("notes.txt"), b"c").unwrap();

        let items = scanner(tmp.path(), false).scan_items();
        let names: Vec<_> = items.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["COM.B.PLIST", "com.a.plist"]);
    }

    #[test]
    fn background_task_store_is_walked_two_levels() {
        let tmp = TempDir::new().unwrap();
        let btm = tmp.path().join("btm");
        fs::create_dir_all(btm.join("owner").join("deeper")).unwrap();
        fs::write(btm.join("top.btm"), b"1").unwrap();
        fs::write(btm.join("owner").join("nested.plist"), b"2").unwrap();
        fs::write(btm.join("owner").join("deeper").join("hidden.plist"), b"3").unwrap();

        let items = scanner(tmp.path(), true).scan_items();
        let names: Vec<_> = items.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["nested.plist", "top.btm"]);
    }

    #[test]
    fn privileged_locations_require_permission() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("tcc")).unwrap();
        fs::write(tmp.path().join("tcc").join("TCC.db"), b"sqlite").unwrap();

        assert!(scanner(tmp.path(), false).scan_items().is_empty());

        let items = scanner(tmp.path(), true).scan_items();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].location, Location::SystemTccDatabase);
        assert_eq!(items[0].size, 6);
        assert!(items[0].identifier.is_none());
    }

    #[test]
    fn permission_is_consulted_on_every_scan() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("tcc")).unwrap();
        fs::write(tmp.path().join("tcc").join("TCC.db"), b"x").unwrap();

        let probe = Arc::new(FixedPermission::new(false));
        let scanner = Scanner::new(table(tmp.path()), probe.clone());
        assert!(scanner.scan_items().is_empty());
        probe.set(true);
        assert_eq!(scanner.scan_items().len(), 1);
    }

    #[test]
    fn missing_locations_contribute_nothing() {
        let tmp = TempDir::new().unwrap();
        assert!(scanner(tmp.path(), true).scan_items().is_empty());
    }

    struct ListingHelper(Vec<PathBuf>);

    impl PrivilegedHelper for ListingHelper {
        fn scan_location(&self, _path: &Path) -> Result<Vec<PathBuf>, HelperError> {
            Ok(self.0.clone())
        }

        fn version(&self) -> Result<String, HelperError> {
            Ok("1.0".to_string())
        }
    }

    #[test]
    fn helper_paths_stand_in_without_permission() {
        let tmp = TempDir::new().unwrap();
        let btm = tmp.path().join("btm");
        fs::create_dir_all(&btm).unwrap();
        fs::write(btm.join("reg.btm"), b"r").unwrap();

        let helper = ListingHelper(vec![
            btm.join("reg.btm"),
            btm.join("gone.plist"),
            btm.join("readme.txt"),
        ]);
        let scanner = scanner(tmp.path(), false).with_helper(Arc::new(helper));
        let items = scanner.scan_items();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].path, btm.join("reg.btm"));
    }

    #[test]
    fn read_item_fills_descriptor_fields() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("com.x.plist");
        let mut dict = plist::Dictionary::new();
        dict.insert("Label".into(), plist::Value::String("com.x".into()));
        dict.insert("RunAtLoad".into(), plist::Value::Boolean(true));
        plist::Value::Dictionary(dict).to_file_xml(&path).unwrap();

        let item = read_item(&path, Location::UserLaunchAgents).unwrap();
        assert_eq!(item.identifier.as_deref(), Some("com.x"));
        assert_eq!(item.run_at_boot, Some(true));
        assert!(item.modified_at.is_some());
        assert_eq!(item.digest, digest_bytes(&fs::read(&path).unwrap()));
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_files_are_followed() {
        let tmp = TempDir::new().unwrap();
        let agents = tmp.path().join("agents");
        fs::create_dir_all(&agents).unwrap();
        let target = tmp.path().join("real.plist");
        fs::write(&target, b"real").unwrap();
        std::os::unix::fs::symlink(&target, agents.join("link.plist")).unwrap();

        let items = scanner(tmp.path(), false).scan_items();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].digest, digest_bytes(b"real"));
    }
}
