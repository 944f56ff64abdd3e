//! Release-notes file parsing.
//!
//! Two layouts are understood and may be mixed in one file:
//!
//! ```text
//! * 1.2.3 - Fixed lookup; Added audit columns
//!
//! ### 1.3.0
//! * Reworked staging load
//! - Dropped legacy feed
//! ```
//!
//! The entry with the highest version wins.

use regex::Regex;
use semver::Version;
use serde::Serialize;
use std::path::Path;

use crate::error::{Error, Result};
use crate::utils::io;

/// Project version as stored in project metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectVersion {
    pub major: u32,
    pub minor: u32,
    pub build: u32,
}

impl std::fmt::Display for ProjectVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.build)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseNotes {
    pub version: ProjectVersion,
    pub notes: Vec<String>,
}

impl ReleaseNotes {
    /// Notes joined for the project's version-comments field.
    pub fn comments(&self) -> String {
        self.notes.join("\n")
    }
}

/// Read and parse a release-notes file.
pub fn parse(path: &Path) -> Result<ReleaseNotes> {
    if !path.is_file() {
        return Err(Error::release_notes_not_found(path.display().to_string()));
    }
    let content = io::read_file(path, "read release notes")?;
    parse_str(&content).ok_or_else(|| {
        Error::validation_invalid_argument(
            "release_notes",
            format!("No versioned entry found in {}", path.display()),
            Some(path.display().to_string()),
            None,
        )
    })
}

/// Parse release-notes text; `None` when no entry carries a version.
pub fn parse_str(content: &str) -> Option<ReleaseNotes> {
    let simple = Regex::new(r"^\s*\*\s*(\d+\.\d+(?:\.\d+)?)\s*-\s*(.*)$").ok()?;
    let header = Regex::new(r"^\s*#{1,6}\s*v?(\d+\.\d+(?:\.\d+)?)\b").ok()?;
    let bullet = Regex::new(r"^\s*[*-]\s+(.+)$").ok()?;

    let mut entries: Vec<ReleaseNotes> = Vec::new();
    let mut open_section = false;

    for line in content.lines() {
        if let Some(captures) = simple.captures(line) {
            open_section = false;
            let Some(version) = parse_version(&captures[1]) else {
                continue;
            };
            let notes = captures[2]
                .split(';')
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .map(str::to_string)
                .collect();
            entries.push(ReleaseNotes { version, notes });
            continue;
        }

        if let Some(captures) = header.captures(line) {
            open_section = match parse_version(&captures[1]) {
                Some(version) => {
                    entries.push(ReleaseNotes {
                        version,
                        notes: Vec::new(),
                    });
                    true
                }
                None => false,
            };
            continue;
        }

        if line.trim_start().starts_with('#') {
            open_section = false;
            continue;
        }

        if open_section {
            if let (Some(captures), Some(entry)) = (bullet.captures(line), entries.last_mut()) {
                entry.notes.push(captures[1].trim().to_string());
            }
        }
    }

    // max_by keeps the last of equal versions: later entries win ties.
    entries.into_iter().max_by(|a, b| a.version.cmp(&b.version))
}

/// Accept `major.minor` or `major.minor.build`.
fn parse_version(raw: &str) -> Option<ProjectVersion> {
    let normalized = if raw.matches('.').count() == 1 {
        format!("{}.0", raw)
    } else {
        raw.to_string()
    };
    let version = Version::parse(&normalized).ok()?;
    Some(ProjectVersion {
        major: u32::try_from(version.major).ok()?,
        minor: u32::try_from(version.minor).ok()?,
        build: u32::try_from(version.patch).ok()?,
    })
}
