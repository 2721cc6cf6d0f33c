//! Installed-application registry and installation receipts.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use plist::Value;

use persistwatch_core::{Attribution, AttributionSource};

use crate::error::{io_err, AttributionError};
use crate::signature::SignatureReader;

// ---------------------------------------------------------------------------
// Bundles
// ---------------------------------------------------------------------------

/// An installed `.app` bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppBundle {
    pub name: String,
    pub bundle_id: Option<String>,
    pub path: PathBuf,
    pub team_id: Option<String>,
    pub signing_identity: Option<String>,
}

impl AppBundle {
    pub fn to_attribution(&self, source: AttributionSource) -> Attribution {
        Attribution {
            app_name: self.name.clone(),
            bundle_id: self.bundle_id.clone(),
            bundle_path: self.path.clone(),
            team_id: self.team_id.clone(),
            signing_identity: self.signing_identity.clone(),
            source,
        }
    }
}

/// Whether `path` names an application bundle (`*.app`).
pub fn is_app_bundle(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.eq_ignore_ascii_case("app"))
        .unwrap_or(false)
}

/// Read `Contents/Info.plist` of the bundle at `path` plus its signature.
pub fn read_bundle(
    path: &Path,
    signatures: &dyn SignatureReader,
) -> Result<AppBundle, AttributionError> {
    if !is_app_bundle(path) {
        return Err(AttributionError::NotABundle {
            path: path.to_path_buf(),
        });
    }
    let info_path = path.join("Contents").join("Info.plist");
    let info = Value::from_file(&info_path).map_err(|source| AttributionError::Plist {
        path: info_path.clone(),
        source,
    })?;
    let dict = info.as_dictionary();
    let string = |key: &str| {
        dict.and_then(|d| d.get(key))
            .and_then(Value::as_string)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    let name = string("CFBundleDisplayName")
        .or_else(|| string("CFBundleName"))
        .or_else(|| {
            path.file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
        })
        .unwrap_or_else(|| path.display().to_string());

    let signing = signatures.read(path).unwrap_or_default();
    Ok(AppBundle {
        name,
        bundle_id: string("CFBundleIdentifier"),
        path: path.to_path_buf(),
        team_id: signing.team_id,
        signing_identity: signing.signing_identity,
    })
}

// ---------------------------------------------------------------------------
// Receipts
// ---------------------------------------------------------------------------

/// An installer package receipt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub package_id: String,
    /// Absolute install prefix. `None` for packages installed at `/`.
    pub install_prefix: Option<PathBuf>,
}

impl Receipt {
    pub fn covers(&self, program: &Path) -> bool {
        self.install_prefix
            .as_deref()
            .map(|prefix| program.starts_with(prefix))
            .unwrap_or(false)
    }
}

pub fn read_receipt(path: &Path) -> Result<Option<Receipt>, AttributionError> {
    let value = Value::from_file(path).map_err(|source| AttributionError::Plist {
        path: path.to_path_buf(),
        source,
    })?;
    let Some(dict) = value.as_dictionary() else {
        return Ok(None);
    };
    let Some(package_id) = dict.get("PackageIdentifier").and_then(Value::as_string) else {
        return Ok(None);
    };

    let install_prefix = dict
        .get("InstallPrefixPath")
        .and_then(Value::as_string)
        .map(|p| p.trim_matches('/'))
        .filter(|p| !p.is_empty() && *p != ".")
        .map(|p| Path::new("/").join(p));

    Ok(Some(Receipt {
        package_id: package_id.to_string(),
        install_prefix,
    }))
}

fn read_receipts(dir: &Path) -> Result<Vec<Receipt>, AttributionError> {
    let entries = fs::read_dir(dir).map_err(|e| io_err(dir, e))?;
    let mut paths: Vec<PathBuf> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.extension().map(|e| e == "plist").unwrap_or(false))
        .collect();
    paths.sort();

    let mut receipts = Vec::new();
    for path in paths {
        match read_receipt(&path) {
            Ok(Some(receipt)) => receipts.push(receipt),
            Ok(None) => {}
            Err(err) => tracing::debug!("skipping receipt: {err}"),
        }
    }
    Ok(receipts)
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Every installed application found under the app directories, indexed by
/// bundle id and by team id, plus the installation receipts.
#[derive(Debug, Clone, Default)]
pub struct AppRegistry {
    bundles: Vec<AppBundle>,
    by_bundle_id: BTreeMap<String, usize>,
    by_team_id: BTreeMap<String, usize>,
    receipts: Vec<Receipt>,
}

impl AppRegistry {
    /// Scan each of `app_dirs` one level deep for `.app` bundles and read
    /// every receipt in `receipts_dir`. Unreadable entries are skipped.
    pub fn build(
        app_dirs: &[PathBuf],
        receipts_dir: &Path,
        signatures: &dyn SignatureReader,
    ) -> Self {
        let mut bundles = Vec::new();
        for dir in app_dirs {
            let entries = match fs::read_dir(dir) {
                Ok(entries) => entries,
                Err(err) => {
                    tracing::debug!("cannot list {}: {err}", dir.display());
                    continue;
                }
            };
            let mut paths: Vec<PathBuf> = entries
                .flatten()
                .map(|e| e.path())
                .filter(|p| is_app_bundle(p) && p.is_dir())
                .collect();
            paths.sort();
            for path in paths {
                match read_bundle(&path, signatures) {
                    Ok(bundle) => bundles.push(bundle),
                    Err(err) => tracing::debug!("skipping bundle: {err}"),
                }
            }
        }

        let receipts = read_receipts(receipts_dir).unwrap_or_else(|err| {
            tracing::debug!("no installation receipts: {err}");
            Vec::new()
        });

        let registry = Self::from_parts(bundles, receipts);
        tracing::info!(
            "application registry: {} bundle(s), {} receipt(s)",
            registry.bundles.len(),
            registry.receipts.len()
        );
        registry
    }

    /// Index already-read bundles. The first bundle wins a duplicate key.
    pub fn from_parts(bundles: Vec<AppBundle>, receipts: Vec<Receipt>) -> Self {
        let mut by_bundle_id = BTreeMap::new();
        let mut by_team_id = BTreeMap::new();
        for (idx, bundle) in bundles.iter().enumerate() {
            if let Some(id) = &bundle.bundle_id {
                by_bundle_id.entry(id.clone()).or_insert(idx);
            }
            if let Some(team) = &bundle.team_id {
                by_team_id.entry(team.clone()).or_insert(idx);
            }
        }
        Self {
            bundles,
            by_bundle_id,
            by_team_id,
            receipts,
        }
    }

    pub fn bundles(&self) -> &[AppBundle] {
        &self.bundles
    }

    pub fn receipts(&self) -> &[Receipt] {
        &self.receipts
    }

    pub fn by_bundle_id(&self, bundle_id: &str) -> Option<&AppBundle> {
        self.by_bundle_id.get(bundle_id).map(|idx| &self.bundles[*idx])
    }

    pub fn by_team_id(&self, team_id: &str) -> Option<&AppBundle> {
        self.by_team_id.get(team_id).map(|idx| &self.bundles[*idx])
    }

    /// Registered bundle ids in lexicographic order.
    pub fn bundle_ids(&self) -> impl Iterator<Item = &str> + Clone {
        self.by_bundle_id.keys().map(String::as_str)
    }
}
