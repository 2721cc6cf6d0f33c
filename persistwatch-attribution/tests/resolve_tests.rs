//! Strategy-order tests for `AttributionResolver`.
//!
//! Each test builds its own fake `/Applications` and receipts tree in a
//! `TempDir` and a canned signature reader.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use persistwatch_attribution::{
    AttributionResolver, ResolverRoots, SignatureReader, SigningInfo,
};
use persistwatch_core::{AttributionSource, Item, Location};
use plist::Value;
use rstest::rstest;
use tempfile::TempDir;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Signature reader keyed by path.
#[derive(Default)]
struct FakeSignatures(BTreeMap<PathBuf, String>);

impl FakeSignatures {
    fn with(mut self, path: &Path, team: &str) -> Self {
        self.0.insert(path.to_path_buf(), team.to_string());
        self
    }
}

impl SignatureReader for FakeSignatures {
    fn read(&self, path: &Path) -> Option<SigningInfo> {
        self.0.get(path).map(|team| SigningInfo {
            team_id: Some(team.clone()),
            signing_identity: Some(format!("Developer ID Application: Test ({team})")),
        })
    }
}

struct Fixture {
    tmp: TempDir,
}

impl Fixture {
    fn new() -> Self {
        let tmp = TempDir::new().expect("tempdir");
        fs::create_dir_all(tmp.path().join("Applications")).expect("apps");
        fs::create_dir_all(tmp.path().join("receipts")).expect("receipts");
        Self { tmp }
    }

    fn apps(&self) -> PathBuf {
        self.tmp.path().join("Applications")
    }

    fn app(&self, name: &str, bundle_id: &str) -> PathBuf {
        let bundle = self.apps().join(format!("{name}.app"));
        write_plist(
            &bundle.join("Contents").join("Info.plist"),
            &[("CFBundleIdentifier", bundle_id), ("CFBundleName", name)],
        );
        bundle
    }

    fn receipt(&self, package_id: &str, prefix: &str) {
        write_plist(
            &self.tmp.path().join("receipts").join(format!("{package_id}.plist")),
            &[("PackageIdentifier", package_id), ("InstallPrefixPath", prefix)],
        );
    }

    fn resolver(&self, signatures: FakeSignatures) -> AttributionResolver {
        AttributionResolver::new(
            ResolverRoots {
                app_dirs: vec![self.apps()],
                receipts_dir: self.tmp.path().join("receipts"),
            },
            Arc::new(signatures),
        )
    }
}

fn write_plist(path: &Path, pairs: &[(&str, &str)]) {
    let mut dict = plist::Dictionary::new();
    for (k, v) in pairs {
        dict.insert((*k).to_string(), Value::String((*v).to_string()));
    }
    fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
    Value::Dictionary(dict).to_file_xml(path).expect("write plist");
}

fn item(identifier: Option<&str>, program: Option<&Path>) -> Item {
    let mut item = Item::new("/Library/LaunchAgents/x.plist", Location::SystemLaunchAgents, "d");
    item.identifier = identifier.map(str::to_string);
    item.program = program.map(Path::to_path_buf);
    item
}

// ---------------------------------------------------------------------------
// Strategies
// ---------------------------------------------------------------------------

#[test]
fn program_inside_bundle_wins() {
    let fx = Fixture::new();
    let bundle = fx.app("Example", "com.example.app");
    fx.app("Other", "com.other.app");
    let program = bundle.join("Contents").join("Library").join("LoginItems").join("helper");

    let attribution = fx
        .resolver(FakeSignatures::default())
        .resolve(&item(Some("com.other.app.agent"), Some(&program)))
        .expect("attributed");
    assert_eq!(attribution.app_name, "Example");
    assert_eq!(attribution.bundle_path, bundle);
    assert_eq!(attribution.source, AttributionSource::ProgramPath);
}

#[rstest]
#[case("com.example.app.updater", Some("com.example.app"))]
#[case("com.example.app", Some("com.example.app"))]
#[case("com.example.apphelper", Some("com.example"))]
#[case("org.unrelated.tool", None)]
fn identifier_prefix_matching(#[case] identifier: &str, #[case] expected: Option<&str>) {
    let fx = Fixture::new();
    fx.app("Example", "com.example.app");
    fx.app("Vendor", "com.example");

    let attribution = fx
        .resolver(FakeSignatures::default())
        .resolve(&item(Some(identifier), None));
    assert_eq!(
        attribution.as_ref().and_then(|a| a.bundle_id.as_deref()),
        expected
    );
    if let Some(a) = attribution {
        assert_eq!(a.source, AttributionSource::IdentifierPrefix);
    }
}

#[test]
fn receipt_prefix_attributes_program() {
    let fx = Fixture::new();
    fx.app("Tool", "com.vendor.tool");
    fx.receipt("com.vendor.tool.pkg", "opt/vendor");
    fx.receipt("com.root.pkg", "/");

    let program = PathBuf::from("/opt/vendor/bin/daemon");
    let attribution = fx
        .resolver(FakeSignatures::default())
        .resolve(&item(Some("net.nomatch.daemon"), Some(&program)))
        .expect("attributed");
    assert_eq!(attribution.bundle_id.as_deref(), Some("com.vendor.tool"));
    assert_eq!(attribution.source, AttributionSource::InstallReceipt);
}

#[test]
fn team_id_is_last_resort() {
    let fx = Fixture::new();
    let bundle = fx.app("Signed", "com.signed.app");
    let program = PathBuf::from("/usr/local/libexec/signed-agent");
    let signatures = FakeSignatures::default()
        .with(&bundle, "TEAM123456")
        .with(&program, "TEAM123456");

    let attribution = fx
        .resolver(signatures)
        .resolve(&item(None, Some(&program)))
        .expect("attributed");
    assert_eq!(attribution.app_name, "Signed");
    assert_eq!(attribution.team_id.as_deref(), Some("TEAM123456"));
    assert_eq!(attribution.source, AttributionSource::TeamId);
}

#[test]
fn nothing_matches_leaves_item_unattributed() {
    let fx = Fixture::new();
    fx.app("Example", "com.example.app");
    let resolver = fx.resolver(FakeSignatures::default());

    assert!(resolver.resolve(&item(None, None)).is_none());
    assert!(resolver
        .resolve(&item(Some("org.none"), Some(Path::new("/usr/bin/true"))))
        .is_none());
}

#[test]
fn attribute_all_fills_items_in_place() {
    let fx = Fixture::new();
    fx.app("Example", "com.example.app");
    let resolver = fx.resolver(FakeSignatures::default());

    let mut items = vec![
        item(Some("com.example.app.agent"), None),
        item(Some("org.none"), None),
    ];
    resolver.attribute_all(&mut items);
    assert!(items[0].attribution.is_some());
    assert!(items[1].attribution.is_none());
    assert_eq!(resolver.registry().bundles().len(), 1);
}
