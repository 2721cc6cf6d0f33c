//! Owner attribution for persistence items.
//!
//! [`AttributionResolver::resolve`] maps an [`Item`] to the installed
//! application that most plausibly put it there. Strategies run in a fixed
//! order and the first hit wins:
//!
//! 1. walk up from the item's program to the enclosing `.app` bundle
//! 2. match the item's identifier against registered bundle ids
//! 3. match an installation receipt whose prefix contains the program
//! 4. match the program's code-signing team against registered apps
//!
//! The order is the contract. Two apps that could both claim an item via
//! different strategies are resolved by whichever strategy comes first.

pub mod error;
pub mod registry;
pub mod signature;

use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use persistwatch_core::config::AttributionConfig;
use persistwatch_core::{Attribution, AttributionSource, Item};

pub use error::AttributionError;
pub use registry::{AppBundle, AppRegistry, Receipt};
pub use signature::{CodesignReader, NoSignatures, SignatureReader, SigningInfo};

/// Maximum number of ancestors inspected when looking for an enclosing bundle.
pub const MAX_WALK_UP: usize = 10;

/// Identifier prefixes shorter than this many components are too generic.
const MIN_PREFIX_COMPONENTS: usize = 2;

// ---------------------------------------------------------------------------
// Roots
// ---------------------------------------------------------------------------

/// Where the registry looks for applications and receipts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolverRoots {
    pub app_dirs: Vec<PathBuf>,
    pub receipts_dir: PathBuf,
}

impl ResolverRoots {
    /// The standard application folders plus `extra_app_dirs`.
    pub fn standard(home: &Path, extra_app_dirs: &[PathBuf]) -> Self {
        let mut app_dirs = vec![
            PathBuf::from("/Applications"),
            PathBuf::from("/Applications/Utilities"),
            PathBuf::from("/System/Applications"),
            home.join("Applications"),
        ];
        app_dirs.extend(extra_app_dirs.iter().cloned());
        Self {
            app_dirs,
            receipts_dir: PathBuf::from("/var/db/receipts"),
        }
    }
}

// ---------------------------------------------------------------------------
// Resolver
// ---------------------------------------------------------------------------

/// Attributes items to installed applications.
///
/// The registry is built on first use and kept for the resolver's lifetime.
pub struct AttributionResolver {
    roots: ResolverRoots,
    signatures: Arc<dyn SignatureReader>,
    registry: OnceLock<AppRegistry>,
}

impl AttributionResolver {
    pub fn new(roots: ResolverRoots, signatures: Arc<dyn SignatureReader>) -> Self {
        Self {
            roots,
            signatures,
            registry: OnceLock::new(),
        }
    }

    /// Standard roots, configured extra dirs and `codesign` signatures.
    pub fn standard(home: &Path, config: &AttributionConfig) -> Self {
        Self::new(
            ResolverRoots::standard(home, &config.extra_app_dirs),
            Arc::new(CodesignReader::default()),
        )
    }

    /// A resolver over a prebuilt registry.
    pub fn with_registry(registry: AppRegistry, signatures: Arc<dyn SignatureReader>) -> Self {
        let resolver = Self::new(
            ResolverRoots {
                app_dirs: Vec::new(),
                receipts_dir: PathBuf::new(),
            },
            signatures,
        );
        let _ = resolver.registry.set(registry);
        resolver
    }

    pub fn registry(&self) -> &AppRegistry {
        self.registry.get_or_init(|| {
            AppRegistry::build(
                &self.roots.app_dirs,
                &self.roots.receipts_dir,
                self.signatures.as_ref(),
            )
        })
    }

    /// Owner of `item`, or `None` when no strategy matches.
    pub fn resolve(&self, item: &Item) -> Option<Attribution> {
        let program = item.program.as_deref();
        let identifier = item.identifier.as_deref();

        program
            .and_then(|p| self.by_program_path(p))
            .or_else(|| identifier.and_then(|id| self.by_identifier(id)))
            .or_else(|| program.and_then(|p| self.by_receipt(p)))
            .or_else(|| program.and_then(|p| self.by_team(p)))
    }

    /// Attach attributions to every item in place.
    pub fn attribute_all(&self, items: &mut [Item]) {
        for item in items.iter_mut() {
            item.attribution = self.resolve(item);
        }
    }

    // -----------------------------------------------------------------------
    // Strategies
    // -----------------------------------------------------------------------

    fn by_program_path(&self, program: &Path) -> Option<Attribution> {
        let bundle_path = enclosing_bundle(program)?;
        match registry::read_bundle(bundle_path, self.signatures.as_ref()) {
            Ok(bundle) => Some(bundle.to_attribution(AttributionSource::ProgramPath)),
            Err(err) => {
                tracing::debug!("enclosing bundle unreadable: {err}");
                None
            }
        }
    }

    fn by_identifier(&self, identifier: &str) -> Option<Attribution> {
        let registry = self.registry();
        let bundle_id = match_identifier(identifier, registry.bundle_ids())?;
        registry
            .by_bundle_id(&bundle_id)
            .map(|b| b.to_attribution(AttributionSource::IdentifierPrefix))
    }

    fn by_receipt(&self, program: &Path) -> Option<Attribution> {
        let registry = self.registry();
        registry
            .receipts()
            .iter()
            .filter(|receipt| receipt.covers(program))
            .find_map(|receipt| {
                registry.bundle_ids().find(|id| {
                    id.starts_with(receipt.package_id.as_str())
                        || receipt.package_id.starts_with(id)
                })
            })
            .and_then(|id| registry.by_bundle_id(id))
            .map(|b| b.to_attribution(AttributionSource::InstallReceipt))
    }

    fn by_team(&self, program: &Path) -> Option<Attribution> {
        let team_id = self.signatures.read(program)?.team_id?;
        self.registry()
            .by_team_id(&team_id)
            .map(|b| b.to_attribution(AttributionSource::TeamId))
    }
}

// ---------------------------------------------------------------------------
// Utilities
// ---------------------------------------------------------------------------

/// The nearest `*.app` directory at or above `program`, at most
/// [`MAX_WALK_UP`] levels up.
pub fn enclosing_bundle(program: &Path) -> Option<&Path> {
    program
        .ancestors()
        .take(MAX_WALK_UP + 1)
        .find(|p| registry::is_app_bundle(p) && p.is_dir())
}

/// Match `identifier` against `bundle_ids`.
///
/// Tries the identifier and then successively shorter dot-prefixes (down to
/// two components) for an exact bundle id. Failing that, picks the longest
/// bundle id that is itself a prefix of the identifier.
pub fn match_identifier<'a>(
    identifier: &str,
    bundle_ids: impl Iterator<Item = &'a str> + Clone,
) -> Option<String> {
    let parts: Vec<&str> = identifier.split('.').collect();
    for len in (MIN_PREFIX_COMPONENTS..=parts.len()).rev() {
        let prefix = parts[..len].join(".");
        if bundle_ids.clone().any(|id| id == prefix) {
            return Some(prefix);
        }
    }

    bundle_ids
        .filter(|id| id.split('.').count() >= MIN_PREFIX_COMPONENTS)
        .filter(|id| identifier.starts_with(id))
        .max_by_key(|id| id.len())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifier_prefers_longest_dot_prefix() {
        let ids = ["com.example", "com.example.app", "org.other"];
        assert_eq!(
            match_identifier("com.example.app.helper", ids.iter().copied()),
            Some("com.example.app".to_string())
        );
    }

    #[test]
    fn identifier_falls_back_to_string_prefix() {
        let ids = ["com.vendor.tool", "com.vendor"];
        assert_eq!(
            match_identifier("com.vendor.toolhelper", ids.iter().copied()),
            Some("com.vendor".to_string())
        );
        let ids = ["com.vendor.tool"];
        assert_eq!(
            match_identifier("com.vendor.tool-agent", ids.iter().copied()),
            Some("com.vendor.tool".to_string())
        );
    }

    #[test]
    fn single_component_never_matches() {
        let ids = ["com"];
        assert_eq!(match_identifier("com.example", ids.iter().copied()), None);
    }

    #[test]
    fn walk_up_finds_enclosing_bundle_within_bound() {
        let tmp = tempfile::TempDir::new().unwrap();
        let app = tmp.path().join("Deep.app");
        std::fs::create_dir_all(&app).unwrap();

        let shallow = app.join("Contents").join("MacOS").join("deep");
        assert_eq!(enclosing_bundle(&shallow), Some(app.as_path()));

        let mut deep = app.clone();
        for _ in 0..MAX_WALK_UP + 1 {
            deep.push("d");
        }
        assert!(enclosing_bundle(&deep).is_none());
    }
}
