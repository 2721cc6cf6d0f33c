//! Descriptor parsers — behavior-relevant fields from property lists.
//!
//! A malformed or unreadable descriptor is not an error: it produces
//! [`DescriptorFields::default`], an uninformative but valid result.

use std::io::Cursor;
use std::path::{Path, PathBuf};

use plist::{Dictionary, Value};

use persistwatch_core::Location;

/// MDM payload type; its presence marks a profile as device-management control.
pub const MDM_PAYLOAD_TYPE: &str = "com.apple.mdm";

/// Fields extracted from a descriptor. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DescriptorFields {
    pub identifier: Option<String>,
    pub program: Option<PathBuf>,
    pub run_at_boot: Option<bool>,
    pub keep_alive: Option<bool>,
}

impl DescriptorFields {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Which parser applies to a location's files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorKind {
    /// launchd job definitions (agents, daemons, extension registries).
    Launchd,
    /// Configuration profile payloads.
    Profile,
    /// Databases and archives with no extractable fields.
    Opaque,
}

impl DescriptorKind {
    pub fn for_location(location: Location) -> Self {
        match location {
            Location::UserLaunchAgents
            | Location::SystemLaunchAgents
            | Location::SystemLaunchDaemons
            | Location::SystemExtensions
            | Location::BackgroundTaskManagement => DescriptorKind::Launchd,
            Location::ConfigurationProfiles => DescriptorKind::Profile,
            Location::UserTccDatabase | Location::SystemTccDatabase => DescriptorKind::Opaque,
        }
    }
}

/// Parse the descriptor at `path`.
pub fn parse(path: &Path, kind: DescriptorKind) -> DescriptorFields {
    match std::fs::read(path) {
        Ok(bytes) => parse_bytes(&bytes, kind),
        Err(err) => {
            tracing::debug!("descriptor unreadable at {}: {err}", path.display());
            DescriptorFields::default()
        }
    }
}

/// Parse descriptor bytes that were already read (XML or binary plist).
pub fn parse_bytes(bytes: &[u8], kind: DescriptorKind) -> DescriptorFields {
    if kind == DescriptorKind::Opaque {
        return DescriptorFields::default();
    }
    let value = match Value::from_reader(Cursor::new(bytes)) {
        Ok(value) => value,
        Err(err) => {
            tracing::debug!("descriptor is not a property list: {err}");
            return DescriptorFields::default();
        }
    };
    let Some(dict) = value.as_dictionary() else {
        return DescriptorFields::default();
    };
    match kind {
        DescriptorKind::Launchd => launchd_fields(dict),
        DescriptorKind::Profile => profile_fields(dict),
        DescriptorKind::Opaque => DescriptorFields::default(),
    }
}

/// `Label`, `Program` (or `ProgramArguments[0]`), `RunAtLoad`, `KeepAlive`.
///
/// `KeepAlive` may be a condition dictionary; a non-empty one counts as true.
pub fn launchd_fields(dict: &Dictionary) -> DescriptorFields {
    let identifier = dict
        .get("Label")
        .and_then(Value::as_string)
        .map(str::to_string);

    let program = dict
        .get("Program")
        .and_then(Value::as_string)
        .or_else(|| {
            dict.get("ProgramArguments")
                .and_then(Value::as_array)
                .and_then(|args| args.first())
                .and_then(Value::as_string)
        })
        .filter(|p| !p.is_empty())
        .map(PathBuf::from);

    let run_at_boot = dict.get("RunAtLoad").and_then(Value::as_boolean);

    let keep_alive = dict.get("KeepAlive").and_then(|v| match v {
        Value::Boolean(b) => Some(*b),
        Value::Dictionary(conditions) => Some(!conditions.is_empty()),
        _ => None,
    });

    DescriptorFields {
        identifier,
        program,
        run_at_boot,
        keep_alive,
    }
}

/// `ProfileIdentifier` (or `PayloadIdentifier`) plus an MDM-control flag
/// reported through `keep_alive`.
pub fn profile_fields(dict: &Dictionary) -> DescriptorFields {
    let identifier = dict
        .get("ProfileIdentifier")
        .or_else(|| dict.get("PayloadIdentifier"))
        .and_then(Value::as_string)
        .map(str::to_string);

    DescriptorFields {
        identifier,
        program: None,
        run_at_boot: None,
        keep_alive: Some(has_mdm_payload(dict)),
    }
}

/// Whether any payload item of a profile is of the MDM control type.
pub fn has_mdm_payload(profile: &Dictionary) -> bool {
    ["ProfileItems", "PayloadContent"]
        .iter()
        .filter_map(|key| profile.get(key).and_then(Value::as_array))
        .flatten()
        .filter_map(Value::as_dictionary)
        .any(|payload| {
            payload.get("PayloadType").and_then(Value::as_string) == Some(MDM_PAYLOAD_TYPE)
        })
}
