//! Project collaborator backed by an external project tool.
//!
//! The tool is driven by the command templates in `projectTool` config:
//!
//! - `load` / `loadPackage` print a JSON project document on stdout
//! - `save` reads `{parameters, metadata}` as JSON on stdin and writes the
//!   package to `{{output}}`
//!
//! Passwords never appear on the command line. The password for reading the
//! source goes in `ETLPACK_PASSWORD`, the password to encrypt the output with
//! in `ETLPACK_NEW_PASSWORD`. The tool exits with status 2 when a password is
//! missing or wrong.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use super::{LoadedProject, ProjectHandle, ProjectLoader, ProjectMetadata};
use crate::defaults::ProjectToolConfig;
use crate::error::{Error, ProjectToolFailedDetails, Result};
use crate::log_status;
use crate::parameters::Parameter;
use crate::protection::{ProtectionLevel, ResolvedProtection};
use crate::utils::command::{self, ShellOutput};
use crate::utils::{shell, template};

pub const PASSWORD_ENV: &str = "ETLPACK_PASSWORD";
pub const NEW_PASSWORD_ENV: &str = "ETLPACK_NEW_PASSWORD";
pub const PASSWORD_EXIT_CODE: i32 = 2;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProjectDocument {
    name: String,
    protection_level: ProtectionLevel,
    #[serde(default)]
    parameters: Vec<Parameter>,
    #[serde(default)]
    metadata: ProjectMetadata,
    #[serde(default)]
    configuration_values: BTreeMap<String, Option<String>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SaveDocument<'a> {
    parameters: &'a [Parameter],
    metadata: &'a ProjectMetadata,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PasswordFailure {
    protection_level: Option<ProtectionLevel>,
}

pub struct ProjectTool {
    config: ProjectToolConfig,
}

impl ProjectTool {
    pub fn new(config: ProjectToolConfig) -> Self {
        Self { config }
    }

    fn load_document(
        &self,
        template_str: &str,
        path: &Path,
        configuration: &str,
        password: Option<&str>,
    ) -> Result<ProjectDocument> {
        let path_text = path.to_string_lossy();
        let command = render(
            template_str,
            &[
                ("path", path_text.as_ref()),
                ("configuration", configuration),
            ],
        );
        let output = command::run_shell(
            &command,
            None,
            &[(PASSWORD_ENV, password), (NEW_PASSWORD_ENV, None)],
            "project tool load",
        )?;
        let stdout = require_success(&command, output)?;

        serde_json::from_str(&stdout).map_err(|e| {
            Error::internal_json(
                e.to_string(),
                Some(format!("parse project tool output for {}", path.display())),
            )
        })
    }
}

impl ProjectLoader for ProjectTool {
    fn load_from_source(
        &self,
        path: &Path,
        configuration: &str,
        password: Option<&str>,
    ) -> Result<LoadedProject> {
        log_status!("build", "Loading {} ({})", path.display(), configuration);
        let mut document = self.load_document(&self.config.load, path, configuration, password)?;
        let configuration_values = std::mem::take(&mut document.configuration_values);

        Ok(LoadedProject {
            project: Box::new(ToolProject::new(
                self.config.clone(),
                path,
                password,
                document,
            )),
            configuration_values,
        })
    }

    fn load_from_package(
        &self,
        path: &Path,
        password: Option<&str>,
    ) -> Result<Box<dyn ProjectHandle>> {
        log_status!("deploy", "Loading package {}", path.display());
        let document = self.load_document(&self.config.load_package, path, "", password)?;
        Ok(Box::new(ToolProject::new(
            self.config.clone(),
            path,
            password,
            document,
        )))
    }

    fn project_extension(&self) -> &str {
        &self.config.project_extension
    }

    fn package_extension(&self) -> &str {
        &self.config.package_extension
    }
}

/// A project opened through the project tool.
pub struct ToolProject {
    config: ProjectToolConfig,
    source: PathBuf,
    password: Option<String>,
    name: String,
    protection_level: ProtectionLevel,
    parameters: Vec<Parameter>,
    metadata: ProjectMetadata,
}

impl ToolProject {
    fn new(
        config: ProjectToolConfig,
        source: &Path,
        password: Option<&str>,
        document: ProjectDocument,
    ) -> Self {
        Self {
            config,
            source: source.to_path_buf(),
            password: password.map(str::to_string),
            name: document.name,
            protection_level: document.protection_level,
            parameters: document.parameters,
            metadata: document.metadata,
        }
    }
}

impl ProjectHandle for ToolProject {
    fn name(&self) -> &str {
        &self.name
    }

    fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    fn protection_level(&self) -> ProtectionLevel {
        self.protection_level
    }

    fn metadata(&self) -> &ProjectMetadata {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ProjectMetadata {
        &mut self.metadata
    }

    fn set_parameters(&mut self, parameters: Vec<Parameter>) {
        self.parameters = parameters;
    }

    fn save(&self, destination: &Path, protection: &ResolvedProtection) -> Result<()> {
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                Error::internal_io(e.to_string(), Some(format!("create {}", parent.display())))
            })?;
        }

        let source = self.source.to_string_lossy();
        let output_path = destination.to_string_lossy();
        let command = render(
            &self.config.save,
            &[
                ("path", source.as_ref()),
                ("output", output_path.as_ref()),
                ("protectionLevel", protection.level.as_str()),
            ],
        );
        let input = serde_json::to_vec(&SaveDocument {
            parameters: &self.parameters,
            metadata: &self.metadata,
        })
        .map_err(|e| Error::internal_json(e.to_string(), Some("serialize save request".into())))?;

        let output = command::run_shell(
            &command,
            Some(&input),
            &[
                (PASSWORD_ENV, self.password.as_deref()),
                (NEW_PASSWORD_ENV, protection.password.as_deref()),
            ],
            "project tool save",
        )?;
        require_success(&command, output)?;
        Ok(())
    }

    fn save_to_bytes(&self, protection: &ResolvedProtection) -> Result<Vec<u8>> {
        let scratch = std::env::temp_dir().join(format!(
            "etlpack-{}.{}",
            Uuid::new_v4().simple(),
            self.config.package_extension
        ));

        let result = self.save(&scratch, protection).and_then(|_| {
            fs::read(&scratch).map_err(|e| {
                Error::internal_io(e.to_string(), Some(format!("read {}", scratch.display())))
            })
        });
        let _ = fs::remove_file(&scratch);
        result
    }
}

/// Fill a command template, quoting every substituted value.
fn render(template_str: &str, vars: &[(&str, &str)]) -> String {
    let quoted: Vec<(&str, String)> = vars
        .iter()
        .map(|(key, value)| (*key, shell::quote_arg(value)))
        .collect();
    let pairs: Vec<(&str, &str)> = quoted.iter().map(|(k, v)| (*k, v.as_str())).collect();
    template::render(template_str, &pairs)
}

fn require_success(command: &str, output: ShellOutput) -> Result<String> {
    if output.success {
        return Ok(output.output.stdout);
    }

    if output.exit_code == PASSWORD_EXIT_CODE {
        let level = serde_json::from_str::<PasswordFailure>(output.output.stdout.trim())
            .ok()
            .and_then(|f| f.protection_level)
            .map(|l| l.as_str().to_string())
            .unwrap_or_else(|| "of this project".to_string());
        return Err(Error::protection_password_required(level)
            .with_hint("Pass --password (build) or --project-password (deploy)"));
    }

    Err(Error::project_tool_failed(ProjectToolFailedDetails {
        command: command.to_string(),
        exit_code: output.exit_code,
        stderr: output.output.error_text(),
    }))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    /// Write an executable stand-in for the project tool.
    fn fake_tool(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("fake-tool");
        fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn config(tool: &Path) -> ProjectToolConfig {
        let tool = tool.display();
        ProjectToolConfig {
            load: format!("{} load {{{{path}}}} {{{{configuration}}}}", tool),
            load_package: format!("{} load-package {{{{path}}}}", tool),
            save: format!(
                "{} save {{{{path}}}} {{{{output}}}} {{{{protectionLevel}}}}",
                tool
            ),
            ..Default::default()
        }
    }

    const DOCUMENT: &str = r#"{"name":"Sales","protectionLevel":"EncryptSensitiveWithPassword","parameters":[{"name":"Project::Pwd","sensitive":true,"value":"x"}],"metadata":{"versionMajor":1},"configurationValues":{"Project::Pwd":null,"Project::Host":"db02"}}"#;

    #[test]
    fn load_parses_document_and_configuration_values() {
        let dir = TempDir::new().unwrap();
        let tool = fake_tool(
            dir.path(),
            &format!("test \"$ETLPACK_PASSWORD\" = pw || exit 2\necho '{}'", DOCUMENT),
        );
        let loader = ProjectTool::new(config(&tool));

        let loaded = loader
            .load_from_source(Path::new("/work/Sales.dtproj"), "Release", Some("pw"))
            .unwrap();
        assert_eq!(loaded.project.name(), "Sales");
        assert_eq!(
            loaded.project.protection_level(),
            ProtectionLevel::EncryptSensitiveWithPassword
        );
        assert!(loaded.project.parameters()[0].sensitive);
        assert_eq!(loaded.configuration_values["Project::Pwd"], None);
        assert_eq!(
            loaded.configuration_values["Project::Host"].as_deref(),
            Some("db02")
        );
    }

    #[test]
    fn password_exit_code_maps_to_password_required() {
        let dir = TempDir::new().unwrap();
        let tool = fake_tool(
            dir.path(),
            r#"echo '{"protectionLevel":"EncryptAllWithPassword"}'; exit 2"#,
        );
        let loader = ProjectTool::new(config(&tool));

        let err = loader
            .load_from_package(Path::new("/work/Sales.ispac"), None)
            .err()
            .unwrap();
        assert_eq!(err.code.as_str(), "protection.password_required");
        assert!(err.message.contains("EncryptAllWithPassword"));
    }

    #[test]
    fn other_failures_report_the_tool_error() {
        let dir = TempDir::new().unwrap();
        let tool = fake_tool(dir.path(), "echo 'corrupt project' >&2; exit 5");
        let loader = ProjectTool::new(config(&tool));

        let err = loader
            .load_from_source(Path::new("/work/Sales.dtproj"), "Release", None)
            .err()
            .unwrap();
        assert_eq!(err.code.as_str(), "project_tool.failed");
        assert_eq!(err.details["exitCode"], serde_json::json!(5));
        assert_eq!(err.details["stderr"], serde_json::json!("corrupt project"));
    }

    #[test]
    fn save_to_bytes_passes_new_password_by_environment_only() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("save.log");
        let tool = fake_tool(
            dir.path(),
            &format!(
                "if [ \"$1\" = save ]; then echo \"$@\" > '{log}'; cat > /dev/null; printf '%s' \"$ETLPACK_NEW_PASSWORD\" > \"$3\"; exit 0; fi\necho '{doc}'",
                log = log.display(),
                doc = DOCUMENT
            ),
        );
        let loader = ProjectTool::new(config(&tool));
        let project = loader
            .load_from_package(Path::new("/work/Sales.ispac"), Some("old"))
            .unwrap();

        let bytes = project
            .save_to_bytes(&ResolvedProtection {
                level: ProtectionLevel::EncryptAllWithPassword,
                password: Some("n3w".to_string()),
            })
            .unwrap();

        assert_eq!(bytes, b"n3w");
        let args = fs::read_to_string(&log).unwrap();
        assert!(args.contains("EncryptAllWithPassword"));
        assert!(!args.contains("n3w"));
    }

    #[test]
    fn template_values_are_quoted() {
        let rendered = render("tool {{path}}", &[("path", "/my projects/it's.dtproj")]);
        assert_eq!(rendered, "tool '/my projects/it'\\''s.dtproj'");
    }
}
