//! Build pipeline: project file in, protected package out.

use chrono::Utc;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::Path;

use crate::arguments::BuildArguments;
use crate::error::Result;
use crate::log_status;
use crate::parameters::{self, ParameterReport};
use crate::project::{self, ProjectLoader};
use crate::protection::{self, PolicyMode, ProtectionLevel};
use crate::release_notes::{self, ProjectVersion};
use crate::utils::io;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildOutput {
    pub project: String,
    pub project_path: String,
    pub package_path: String,
    pub configuration: String,
    pub protection_level: ProtectionLevel,
    pub version: ProjectVersion,
    pub sha256: String,
    pub size_bytes: u64,
    pub parameters: Vec<ParameterReport>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    pub built_at: String,
}

pub struct BuildPipeline<'a> {
    loader: &'a dyn ProjectLoader,
}

impl<'a> BuildPipeline<'a> {
    pub fn new(loader: &'a dyn ProjectLoader) -> Self {
        Self { loader }
    }

    pub fn run(&self, args: &BuildArguments) -> Result<BuildOutput> {
        let project_path = project::discover(
            args.working_folder(),
            args.project_path(),
            self.loader.project_extension(),
        )?;

        let loaded =
            self.loader
                .load_from_source(&project_path, args.configuration(), args.password())?;
        let mut project = loaded.project;

        let resolution = parameters::resolve(
            project.parameters().to_vec(),
            &loaded.configuration_values,
            args.parameters(),
        )?;
        for warning in &resolution.warnings {
            log_status!("build", "Warning: {}", warning);
        }
        let report = parameters::report(&resolution.parameters);
        project.set_parameters(resolution.parameters);

        if let Some(path) = args.release_notes() {
            let notes = release_notes::parse(path)?;
            log_status!("build", "Applying release notes for version {}", notes.version);
            project.metadata_mut().apply_release_notes(&notes);
        }

        let requested = args.protection_level().map(|level| level.as_str());
        let protection = protection::resolve(
            project.protection_level(),
            requested,
            args.password(),
            args.new_password(),
            PolicyMode::Build,
        )?;

        let package_path = args
            .output_folder_for(&project_path)
            .join(format!("{}.{}", project.name(), self.loader.package_extension()));
        log_status!(
            "build",
            "Saving {} ({})",
            package_path.display(),
            protection.level
        );
        project.save(&package_path, &protection)?;

        let (sha256, size_bytes) = checksum(&package_path)?;

        Ok(BuildOutput {
            project: project.name().to_string(),
            project_path: project_path.display().to_string(),
            package_path: package_path.display().to_string(),
            configuration: args.configuration().to_string(),
            protection_level: protection.level,
            version: project.metadata().version(),
            sha256,
            size_bytes,
            parameters: report,
            warnings: resolution.warnings,
            built_at: Utc::now().to_rfc3339(),
        })
    }
}

fn checksum(path: &Path) -> Result<(String, u64)> {
    let bytes = io::read_bytes(path, "read built package")?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok((format!("{:x}", hasher.finalize()), bytes.len() as u64))
}
