//! Configuration-profile enumeration through the `profiles` utility.
//!
//! Both invocations run under a hard deadline. A timeout, a non-zero exit or
//! unparseable output means "no profile data" for this scan.

use std::io::Cursor;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use plist::{Dictionary, Value};

use persistwatch_core::process::DEFAULT_COMMAND_TIMEOUT;
use persistwatch_core::{CommandRunner, Item, Location};

use crate::descriptor;
use crate::hasher::digest_bytes;

pub const PROFILES_PROGRAM: &str = "/usr/bin/profiles";
pub const ENROLLMENT_ITEM_PATH: &str = "profile://enrollment";

const SHOW_ARGS: &[&str] = &["show", "-output", "stdout-xml"];
const ENROLLMENT_ARGS: &[&str] = &["status", "-type", "enrollment"];

/// Enumerates installed profiles and the MDM enrollment state as [`Item`]s.
pub struct ProfileScanner {
    runner: Arc<dyn CommandRunner>,
    program: PathBuf,
    timeout: Duration,
}

impl ProfileScanner {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            program: PathBuf::from(PROFILES_PROGRAM),
            timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// One item per installed profile, plus the enrollment sentinel when the
    /// enrollment query produced output.
    pub fn scan_profiles(&self) -> Vec<Item> {
        let mut items = match self.runner.run(&self.program, SHOW_ARGS, self.timeout) {
            Some(xml) => profile_items(&xml),
            None => {
                tracing::debug!("no profile listing available");
                Vec::new()
            }
        };

        if let Some(text) = self.runner.run(&self.program, ENROLLMENT_ARGS, self.timeout) {
            items.push(enrollment_item(&String::from_utf8_lossy(&text)));
        }
        items
    }
}

/// Decode `profiles show -output stdout-xml` output: a dictionary keyed by
/// scope (`_computerlevel` or a user name) of profile arrays.
pub fn profile_items(xml: &[u8]) -> Vec<Item> {
    let root = match Value::from_reader(Cursor::new(xml)) {
        Ok(Value::Dictionary(root)) => root,
        Ok(_) => return Vec::new(),
        Err(err) => {
            tracing::warn!("profile listing is not a property list: {err}");
            return Vec::new();
        }
    };

    let mut items = Vec::new();
    for (scope, profiles) in root.iter() {
        let Some(profiles) = profiles.as_array() else {
            continue;
        };
        for profile in profiles.iter().filter_map(Value::as_dictionary) {
            if let Some(item) = profile_item(scope, profile) {
                items.push(item);
            }
        }
    }
    items.sort_by(|a, b| a.path.cmp(&b.path));
    items
}

fn profile_item(scope: &str, profile: &Dictionary) -> Option<Item> {
    let fields = descriptor::profile_fields(profile);
    let identifier = fields.identifier.clone()?;

    let mut bytes = Vec::new();
    if let Err(err) = Value::Dictionary(profile.clone()).to_writer_xml(&mut bytes) {
        tracing::warn!("cannot serialize profile {identifier}: {err}");
        return None;
    }

    let path = PathBuf::from(format!("profile://{scope}/{identifier}"));
    let mut item = Item::new(path, Location::ConfigurationProfiles, digest_bytes(&bytes));
    if let Some(name) = profile.get("ProfileDisplayName").and_then(Value::as_string) {
        item.name = name.to_string();
    }
    item.size = bytes.len() as u64;
    item.identifier = fields.identifier;
    item.keep_alive = fields.keep_alive;
    Some(item)
}

/// Normalized enrollment state parsed from `profiles status -type enrollment`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnrollmentStatus {
    pub enrolled: bool,
    pub dep: bool,
    pub user_approved: bool,
}

impl EnrollmentStatus {
    pub fn parse(text: &str) -> Self {
        let mut status = Self::default();
        for line in text.lines() {
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let key = key.trim().to_ascii_lowercase();
            let value = value.trim().to_ascii_lowercase();
            let yes = value.starts_with("yes");
            if key.contains("dep") {
                status.dep = yes;
            } else if key.contains("mdm enrollment") {
                status.enrolled = yes;
                status.user_approved = yes && value.contains("user approved");
            }
        }
        status
    }

    /// Stable digest input; transitions show up as a content change.
    pub fn summary(&self) -> String {
        fn yn(flag: bool) -> &'static str {
            if flag {
                "yes"
            } else {
                "no"
            }
        }
        format!(
            "enrolled={};dep={};user_approved={}",
            yn(self.enrolled),
            yn(self.dep),
            yn(self.user_approved)
        )
    }
}

/// The sentinel item tracking MDM enrollment.
pub fn enrollment_item(text: &str) -> Item {
    let status = EnrollmentStatus::parse(text);
    let summary = status.summary();
    let mut item = Item::new(
        ENROLLMENT_ITEM_PATH,
        Location::ConfigurationProfiles,
        digest_bytes(summary.as_bytes()),
    );
    item.name = "MDM Enrollment".to_string();
    item.size = summary.len() as u64;
    item.keep_alive = Some(status.enrolled);
    item
}
