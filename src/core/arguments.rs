//! Validated inputs for the build and deploy pipelines.
//!
//! Both argument types are built from a plain request and either come out
//! fully valid or not at all.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::catalog::DEFAULT_CATALOG;
use crate::error::{Error, Result};
use crate::protection::{self, PolicyMode, ProtectionLevel};
use crate::utils::validation;

/// Raw build inputs as collected by the CLI.
#[derive(Default, Clone)]
pub struct BuildRequest {
    pub working_folder: PathBuf,
    pub project_path: Option<PathBuf>,
    pub output_folder: Option<PathBuf>,
    pub configuration: Option<String>,
    pub protection_level: Option<String>,
    pub password: Option<String>,
    pub new_password: Option<String>,
    pub release_notes: Option<PathBuf>,
    pub parameters: Vec<(String, String)>,
}

#[derive(Clone)]
pub struct BuildArguments {
    working_folder: PathBuf,
    project_path: Option<PathBuf>,
    output_folder: Option<PathBuf>,
    configuration: String,
    protection_level: Option<ProtectionLevel>,
    password: Option<String>,
    new_password: Option<String>,
    release_notes: Option<PathBuf>,
    parameters: BTreeMap<String, String>,
}

impl BuildArguments {
    pub fn new(request: BuildRequest) -> Result<Self> {
        let configuration = request
            .configuration
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .ok_or_else(|| Error::validation_missing_argument(vec!["configuration".to_string()]))?
            .to_string();

        let password = non_empty(request.password);
        let new_password = non_empty(request.new_password);

        let protection_level = match request.protection_level.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(token) => {
                let level: ProtectionLevel = token.parse()?;
                // An explicit level fixes the outcome, so contradictions surface here.
                protection::resolve(
                    level,
                    Some(token),
                    password.as_deref(),
                    new_password.as_deref(),
                    PolicyMode::Build,
                )?;
                Some(level)
            }
        };

        let parameters = collect_parameters(request.parameters)?;
        let working_folder = request.working_folder;

        Ok(Self {
            project_path: request
                .project_path
                .map(|p| resolve_against(&working_folder, p)),
            output_folder: request
                .output_folder
                .map(|p| resolve_against(&working_folder, p)),
            release_notes: request
                .release_notes
                .map(|p| resolve_against(&working_folder, p)),
            working_folder,
            configuration,
            protection_level,
            password,
            new_password,
            parameters,
        })
    }

    pub fn working_folder(&self) -> &Path {
        &self.working_folder
    }

    pub fn project_path(&self) -> Option<&Path> {
        self.project_path.as_deref()
    }

    pub fn output_folder(&self) -> Option<&Path> {
        self.output_folder.as_deref()
    }

    pub fn configuration(&self) -> &str {
        &self.configuration
    }

    pub fn protection_level(&self) -> Option<ProtectionLevel> {
        self.protection_level
    }

    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    pub fn new_password(&self) -> Option<&str> {
        self.new_password.as_deref()
    }

    pub fn release_notes(&self) -> Option<&Path> {
        self.release_notes.as_deref()
    }

    pub fn parameters(&self) -> &BTreeMap<String, String> {
        &self.parameters
    }

    /// Output folder, defaulting to `<project dir>/bin/<configuration>`.
    pub fn output_folder_for(&self, project_path: &Path) -> PathBuf {
        match &self.output_folder {
            Some(folder) => folder.clone(),
            None => project_path
                .parent()
                .unwrap_or(&self.working_folder)
                .join("bin")
                .join(&self.configuration),
        }
    }
}

impl fmt::Debug for BuildArguments {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuildArguments")
            .field("working_folder", &self.working_folder)
            .field("project_path", &self.project_path)
            .field("output_folder", &self.output_folder)
            .field("configuration", &self.configuration)
            .field("protection_level", &self.protection_level)
            .field("password", &mask(&self.password))
            .field("new_password", &mask(&self.new_password))
            .field("release_notes", &self.release_notes)
            .field("parameters", &self.parameters.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Raw deploy inputs as collected by the CLI.
#[derive(Default, Clone)]
pub struct DeployRequest {
    pub working_folder: PathBuf,
    pub package_path: Option<PathBuf>,
    pub server_instance: Option<String>,
    pub catalog: Option<String>,
    pub folder: Option<String>,
    pub project_name: Option<String>,
    pub project_password: Option<String>,
    pub erase_sensitive_info: bool,
    pub validate: bool,
}

#[derive(Clone)]
pub struct DeployArguments {
    working_folder: PathBuf,
    package_path: Option<PathBuf>,
    server_instance: String,
    catalog: String,
    folder: String,
    project_name: Option<String>,
    project_password: Option<String>,
    erase_sensitive_info: bool,
    validate: bool,
}

impl DeployArguments {
    pub fn new(request: DeployRequest) -> Result<Self> {
        let server_instance = non_empty(request.server_instance);
        let folder = non_empty(request.folder);

        let mut missing = Vec::new();
        if server_instance.is_none() {
            missing.push("server-instance".to_string());
        }
        if folder.is_none() {
            missing.push("folder".to_string());
        }
        let (Some(server_instance), Some(folder)) = (server_instance, folder) else {
            return Err(Error::validation_missing_argument(missing));
        };

        let working_folder = request.working_folder;
        Ok(Self {
            package_path: request
                .package_path
                .map(|p| resolve_against(&working_folder, p)),
            working_folder,
            server_instance: server_instance.trim().to_string(),
            catalog: non_empty(request.catalog)
                .map(|c| c.trim().to_string())
                .unwrap_or_else(|| DEFAULT_CATALOG.to_string()),
            folder: folder.trim().to_string(),
            project_name: non_empty(request.project_name).map(|n| n.trim().to_string()),
            project_password: non_empty(request.project_password),
            erase_sensitive_info: request.erase_sensitive_info,
            validate: request.validate,
        })
    }

    pub fn working_folder(&self) -> &Path {
        &self.working_folder
    }

    pub fn package_path(&self) -> Option<&Path> {
        self.package_path.as_deref()
    }

    pub fn server_instance(&self) -> &str {
        &self.server_instance
    }

    pub fn catalog(&self) -> &str {
        &self.catalog
    }

    pub fn folder(&self) -> &str {
        &self.folder
    }

    pub fn project_password(&self) -> Option<&str> {
        self.project_password.as_deref()
    }

    pub fn erase_sensitive_info(&self) -> bool {
        self.erase_sensitive_info
    }

    pub fn validate(&self) -> bool {
        self.validate
    }

    /// Catalog project name, defaulting to the package file stem.
    pub fn project_name_for(&self, package_path: &Path) -> String {
        self.project_name.clone().unwrap_or_else(|| {
            package_path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default()
        })
    }
}

impl fmt::Debug for DeployArguments {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeployArguments")
            .field("working_folder", &self.working_folder)
            .field("package_path", &self.package_path)
            .field("server_instance", &self.server_instance)
            .field("catalog", &self.catalog)
            .field("folder", &self.folder)
            .field("project_name", &self.project_name)
            .field("project_password", &mask(&self.project_password))
            .field("erase_sensitive_info", &self.erase_sensitive_info)
            .field("validate", &self.validate)
            .finish()
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn mask(value: &Option<String>) -> Option<&'static str> {
    value.as_ref().map(|_| "******")
}

fn resolve_against(base: &Path, path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        path
    } else {
        base.join(path)
    }
}

fn collect_parameters(pairs: Vec<(String, String)>) -> Result<BTreeMap<String, String>> {
    let mut parameters = BTreeMap::new();
    for (name, value) in pairs {
        let name = validation::require_non_empty(&name, "parameter", "Parameter name cannot be empty")?
            .to_string();
        if parameters.contains_key(&name) {
            return Err(Error::validation_invalid_argument(
                "parameter",
                format!("Parameter '{}' is given more than once", name),
                Some(name),
                None,
            ));
        }
        parameters.insert(name, value);
    }
    Ok(parameters)
}
