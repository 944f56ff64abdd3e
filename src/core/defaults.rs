use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::paths;

/// Root configuration structure for etlpack.json
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct EtlpackConfig {
    #[serde(default)]
    pub project_tool: ProjectToolConfig,

    #[serde(default)]
    pub catalog: CatalogConfig,

    #[serde(default)]
    pub retry: RetryConfig,
}

/// Command templates for the tool that reads and writes project files.
///
/// Placeholders: `{{path}}`, `{{configuration}}`, `{{output}}`,
/// `{{protectionLevel}}`. Passwords travel in environment variables only.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectToolConfig {
    #[serde(default = "default_load_command")]
    pub load: String,

    #[serde(default = "default_load_package_command")]
    pub load_package: String,

    #[serde(default = "default_save_command")]
    pub save: String,

    #[serde(default = "default_project_extension")]
    pub project_extension: String,

    #[serde(default = "default_package_extension")]
    pub package_extension: String,
}

impl Default for ProjectToolConfig {
    fn default() -> Self {
        Self {
            load: default_load_command(),
            load_package: default_load_package_command(),
            save: default_save_command(),
            project_extension: default_project_extension(),
            package_extension: default_package_extension(),
        }
    }
}

/// Connection settings for the catalog server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogConfig {
    #[serde(default = "default_sqlcmd_path")]
    pub sqlcmd_path: String,

    #[serde(default = "default_catalog")]
    pub default_catalog: String,

    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,

    /// SQL login name; integrated authentication is used when absent.
    /// The password is read by sqlcmd from `SQLCMDPASSWORD`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(default)]
    pub trust_server_certificate: bool,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            sqlcmd_path: default_sqlcmd_path(),
            default_catalog: default_catalog(),
            command_timeout_secs: default_command_timeout_secs(),
            username: None,
            trust_server_certificate: false,
        }
    }
}

/// Retry settings for transient catalog failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            delay_ms: default_delay_ms(),
        }
    }
}

// =============================================================================
// Default value functions
// =============================================================================

fn default_load_command() -> String {
    "ssis-project-tool load {{path}} --configuration {{configuration}}".to_string()
}

fn default_load_package_command() -> String {
    "ssis-project-tool load-package {{path}}".to_string()
}

fn default_save_command() -> String {
    "ssis-project-tool save {{path}} --output {{output}} --protection-level {{protectionLevel}}"
        .to_string()
}

fn default_project_extension() -> String {
    "dtproj".to_string()
}

fn default_package_extension() -> String {
    "ispac".to_string()
}

fn default_sqlcmd_path() -> String {
    "sqlcmd".to_string()
}

fn default_catalog() -> String {
    "SSISDB".to_string()
}

fn default_command_timeout_secs() -> u64 {
    300
}

fn default_max_attempts() -> u32 {
    crate::retry::MAX_ATTEMPTS
}

fn default_delay_ms() -> u64 {
    crate::retry::RETRY_DELAY.as_millis() as u64
}

// =============================================================================
// Loading functions
// =============================================================================

/// Load etlpack.json, falling back to built-in defaults when the file is absent.
pub fn load_config() -> crate::Result<EtlpackConfig> {
    let path = paths::etlpack_json()?;
    load_config_from(&path)
}

/// Load a config file; a missing file yields the built-in defaults.
pub fn load_config_from(path: &Path) -> crate::Result<EtlpackConfig> {
    if !path.exists() {
        return Ok(EtlpackConfig::default());
    }

    let content = fs::read_to_string(path).map_err(|e| {
        crate::Error::internal_io(e.to_string(), Some(format!("read {}", path.display())))
    })?;

    let mut config: EtlpackConfig = serde_json::from_str(&content)
        .map_err(|e| crate::Error::config_invalid_json(path.display().to_string(), e))?;

    config.catalog.sqlcmd_path = expand_path(&config.catalog.sqlcmd_path)?;
    Ok(config)
}

/// Expand `~` and environment variables in a configured path.
pub fn expand_path(raw: &str) -> crate::Result<String> {
    shellexpand::full(raw)
        .map(|expanded| expanded.into_owned())
        .map_err(|e| {
            crate::Error::config_invalid_value("path", Some(raw.to_string()), e.to_string())
        })
}
