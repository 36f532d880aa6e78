//! Name validation and the hierarchical position path model.
//!
//! Position names are `/`-separated paths (`furnace_1/tray/2`). Prefix
//! matching is a literal byte comparison against the full name, so
//! `furnace_1/tray` matches `furnace_1/tray/2` and also `furnace_1/tray_b/1`
//! (as the name-prefix rule requires), but no caller text is ever
//! interpreted as a pattern.

use crate::error::{LabError, Result};
use std::fmt;

/// Segment separator of position paths.
pub const SEPARATOR: char = '/';

/// Characters that are never accepted in a stored name.
pub const RESERVED_CHARS: [char; 2] = ['.', '$'];

fn check_chars(kind: &str, name: &str) -> Result<()> {
    if let Some(c) = name
        .chars()
        .find(|c| RESERVED_CHARS.contains(c) || c.is_control())
    {
        return Err(LabError::Validation(format!(
            "unsupported {} '{}': must not contain {:?} (reserved: '.', '$' and control characters)",
            kind,
            name.escape_debug(),
            c
        )));
    }
    Ok(())
}

/// Validate a free-form name (sample name, device type, sample id).
pub fn validate_name(kind: &str, name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(LabError::Validation(format!("{} must not be empty", kind)));
    }
    check_chars(kind, name)
}

/// Validate a device name: a single path segment.
pub fn validate_device_name(name: &str) -> Result<()> {
    validate_name("device name", name)?;
    if name.contains(SEPARATOR) {
        return Err(LabError::Validation(format!(
            "device name '{}' must not contain '{}'",
            name, SEPARATOR
        )));
    }
    Ok(())
}

/// A validated position name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PositionPath(String);

impl PositionPath {
    pub fn parse(name: &str) -> Result<Self> {
        validate_name("position name", name)?;
        if name.split(SEPARATOR).any(str::is_empty) {
            return Err(LabError::Validation(format!(
                "position name '{}' must not have empty segments",
                name
            )));
        }
        Ok(Self(name.to_string()))
    }

    /// `{device}/{name}`.
    pub fn under_device(device: &str, name: &str) -> Result<Self> {
        validate_device_name(device)?;
        Self::parse(&format!("{}{}{}", device, SEPARATOR, name))
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split(SEPARATOR)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for PositionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A validated position name prefix.
///
/// Unlike a [`PositionPath`] the last segment may be partial (`A` matches
/// `A1`) and the prefix may end in a separator or be empty.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NamePrefix(String);

impl NamePrefix {
    pub fn parse(prefix: &str) -> Result<Self> {
        check_chars("position prefix", prefix)?;
        let mut segments: Vec<&str> = prefix.split(SEPARATOR).collect();
        // A trailing separator leaves one empty (open) last segment.
        segments.pop();
        if prefix.starts_with(SEPARATOR) || segments.iter().any(|s| s.is_empty()) {
            return Err(LabError::Validation(format!(
                "position prefix '{}' must not have empty segments",
                prefix
            )));
        }
        Ok(Self(prefix.to_string()))
    }

    /// Prefix relative to `device`: `{device}/{prefix}`.
    pub fn under_device(device: &str, prefix: &str) -> Result<Self> {
        validate_device_name(device)?;
        Self::parse(&format!("{}{}{}", device, SEPARATOR, prefix))
    }

    pub fn matches(&self, name: &str) -> bool {
        name.starts_with(self.0.as_str())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NamePrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
