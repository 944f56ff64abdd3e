//! Project files: loading, metadata and discovery.
//!
//! The proprietary project format is handled behind `ProjectLoader` and
//! `ProjectHandle`; `tool` provides the implementation that shells out to an
//! external project tool.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::parameters::Parameter;
use crate::protection::{ProtectionLevel, ResolvedProtection};
use crate::release_notes::{ProjectVersion, ReleaseNotes};

pub mod tool;

pub use tool::ProjectTool;

/// Editable project properties.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectMetadata {
    #[serde(default)]
    pub version_major: u32,
    #[serde(default)]
    pub version_minor: u32,
    #[serde(default)]
    pub version_build: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_comments: Option<String>,
}

impl ProjectMetadata {
    pub fn version(&self) -> ProjectVersion {
        ProjectVersion {
            major: self.version_major,
            minor: self.version_minor,
            build: self.version_build,
        }
    }

    pub fn apply_release_notes(&mut self, notes: &ReleaseNotes) {
        self.version_major = notes.version.major;
        self.version_minor = notes.version.minor;
        self.version_build = notes.version.build;
        self.version_comments = Some(notes.comments());
    }
}

/// An opened project or package.
pub trait ProjectHandle {
    fn name(&self) -> &str;

    fn parameters(&self) -> &[Parameter];

    fn protection_level(&self) -> ProtectionLevel;

    fn metadata(&self) -> &ProjectMetadata;

    fn metadata_mut(&mut self) -> &mut ProjectMetadata;

    fn set_parameters(&mut self, parameters: Vec<Parameter>);

    /// Write the package to `destination` with the given protection.
    fn save(&self, destination: &Path, protection: &ResolvedProtection) -> Result<()>;

    /// Serialize the package in memory with the given protection.
    fn save_to_bytes(&self, protection: &ResolvedProtection) -> Result<Vec<u8>>;
}

/// A source project plus the parameter values its build configuration sets.
pub struct LoadedProject {
    pub project: Box<dyn ProjectHandle>,
    /// Configuration values by scoped name; `None` when the value is sensitive
    /// and could not be read.
    pub configuration_values: BTreeMap<String, Option<String>>,
}

pub trait ProjectLoader {
    fn load_from_source(
        &self,
        path: &Path,
        configuration: &str,
        password: Option<&str>,
    ) -> Result<LoadedProject>;

    fn load_from_package(&self, path: &Path, password: Option<&str>) -> Result<Box<dyn ProjectHandle>>;

    fn project_extension(&self) -> &str;

    fn package_extension(&self) -> &str;
}

/// Resolve the file to work on.
///
/// An explicit path must exist. Otherwise the working folder must contain
/// exactly one file with `extension`.
pub fn discover(working_folder: &Path, explicit: Option<&Path>, extension: &str) -> Result<PathBuf> {
    if let Some(path) = explicit {
        if path.is_file() {
            return Ok(path.to_path_buf());
        }
        return Err(Error::project_file_not_found(
            path.display().to_string(),
            extension,
            Vec::new(),
        ));
    }

    let pattern = format!(
        "{}/*.{}",
        glob::Pattern::escape(&working_folder.to_string_lossy()),
        glob::Pattern::escape(extension)
    );
    let entries = glob::glob(&pattern).map_err(|e| {
        Error::internal_unexpected(format!("Invalid discovery pattern '{}': {}", pattern, e))
    })?;

    let mut candidates: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .filter(|path| path.is_file())
        .collect();
    candidates.sort();

    if candidates.len() == 1 {
        return Ok(candidates.remove(0));
    }

    Err(Error::project_file_not_found(
        working_folder.display().to_string(),
        extension,
        candidates
            .iter()
            .map(|p| p.display().to_string())
            .collect(),
    ))
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn single_candidate_is_discovered() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("Sales.dtproj"), "").unwrap();
        fs::write(dir.path().join("Sales.database"), "").unwrap();

        let found = discover(dir.path(), None, "dtproj").unwrap();
        assert_eq!(found, dir.path().join("Sales.dtproj"));
    }

    #[test]
    fn no_candidate_is_not_found() {
        let dir = TempDir::new().unwrap();
        let err = discover(dir.path(), None, "dtproj").unwrap_err();
        assert_eq!(err.code.as_str(), "project.file_not_found");
        assert_eq!(err.details["candidates"], serde_json::json!([]));
    }

    #[test]
    fn several_candidates_are_ambiguous() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("A.ispac"), "").unwrap();
        fs::write(dir.path().join("B.ispac"), "").unwrap();

        let err = discover(dir.path(), None, "ispac").unwrap_err();
        assert_eq!(err.code.as_str(), "project.file_not_found");
        assert_eq!(err.details["candidates"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn explicit_path_must_exist() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("Other.dtproj");
        assert!(discover(dir.path(), Some(&missing), "dtproj").is_err());

        fs::write(&missing, "").unwrap();
        assert_eq!(discover(dir.path(), Some(&missing), "dtproj").unwrap(), missing);
    }

    #[test]
    fn release_notes_update_version_and_comments() {
        let mut metadata = ProjectMetadata {
            description: Some("Sales ETL".to_string()),
            ..Default::default()
        };
        let notes = crate::release_notes::parse_str("* 2.4.1 - Faster load; New audit").unwrap();
        metadata.apply_release_notes(&notes);

        assert_eq!(metadata.version().to_string(), "2.4.1");
        assert_eq!(
            metadata.version_comments.as_deref(),
            Some("Faster load\nNew audit")
        );
        assert_eq!(metadata.description.as_deref(), Some("Sales ETL"));
    }
}
