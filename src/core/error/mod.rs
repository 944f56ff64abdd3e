use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod codes;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ConfigInvalidJson,
    ConfigInvalidValue,

    ValidationMissingArgument,
    ValidationInvalidArgument,

    ProjectFileNotFound,
    ReleaseNotesNotFound,

    ProtectionPasswordRequired,
    ProtectionDontSaveSensitiveWithPassword,

    ParameterUnknown,

    CatalogBackendError,
    CatalogScopeNotOpen,

    OperationCancelled,

    ProjectToolFailed,

    InternalIoError,
    InternalJsonError,
    InternalUnexpected,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ConfigInvalidJson => "config.invalid_json",
            ErrorCode::ConfigInvalidValue => "config.invalid_value",

            ErrorCode::ValidationMissingArgument => "validation.missing_argument",
            ErrorCode::ValidationInvalidArgument => "validation.invalid_argument",

            ErrorCode::ProjectFileNotFound => "project.file_not_found",
            ErrorCode::ReleaseNotesNotFound => "release_notes.not_found",

            ErrorCode::ProtectionPasswordRequired => "protection.password_required",
            ErrorCode::ProtectionDontSaveSensitiveWithPassword => {
                "protection.dont_save_sensitive_with_password"
            }

            ErrorCode::ParameterUnknown => "parameter.unknown",

            ErrorCode::CatalogBackendError => "catalog.backend_error",
            ErrorCode::CatalogScopeNotOpen => "catalog.scope_not_open",

            ErrorCode::OperationCancelled => "operation.cancelled",

            ErrorCode::ProjectToolFailed => "project_tool.failed",

            ErrorCode::InternalIoError => "internal.io_error",
            ErrorCode::InternalJsonError => "internal.json_error",
            ErrorCode::InternalUnexpected => "internal.unexpected",
        }
    }

    /// Argument-validation failures get the usage banner on the CLI.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            ErrorCode::ValidationMissingArgument | ErrorCode::ValidationInvalidArgument
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hint {
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct Error {
    pub code: ErrorCode,
    pub message: String,
    pub details: Value,
    pub hints: Vec<Hint>,
    pub retryable: Option<bool>,
}

pub type Result<T> = std::result::Result<T, Error>;

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for Error {}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigInvalidJsonDetails {
    pub path: String,
    pub error: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigInvalidValueDetails {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    pub problem: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MissingArgumentDetails {
    pub args: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidArgumentDetails {
    pub field: String,
    pub problem: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tried: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectFileNotFoundDetails {
    pub search_path: String,
    pub extension: String,
    pub candidates: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogBackendDetails {
    pub number: i32,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub procedure: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempts: Option<u32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectToolFailedDetails {
    pub command: String,
    pub exit_code: i32,
    pub stderr: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InternalIoErrorDetails {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InternalJsonErrorDetails {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

fn to_details<T: Serialize>(details: T) -> Value {
    serde_json::to_value(details).unwrap_or_else(|_| Value::Object(serde_json::Map::new()))
}

impl Error {
    pub fn new(code: ErrorCode, message: impl Into<String>, details: Value) -> Self {
        Self {
            code,
            message: message.into(),
            details,
            hints: Vec::new(),
            retryable: None,
        }
    }

    pub fn validation_missing_argument(args: Vec<String>) -> Self {
        let message = format!("Missing required argument: {}", args.join(", "));
        Self::new(
            ErrorCode::ValidationMissingArgument,
            message,
            to_details(MissingArgumentDetails { args }),
        )
    }

    pub fn validation_invalid_argument(
        field: impl Into<String>,
        problem: impl Into<String>,
        id: Option<String>,
        tried: Option<Vec<String>>,
    ) -> Self {
        let problem = problem.into();
        Self::new(
            ErrorCode::ValidationInvalidArgument,
            format!("Invalid argument: {}", problem),
            to_details(InvalidArgumentDetails {
                field: field.into(),
                problem,
                id,
                tried,
            }),
        )
    }

    pub fn project_file_not_found(
        search_path: impl Into<String>,
        extension: impl Into<String>,
        candidates: Vec<String>,
    ) -> Self {
        let search_path = search_path.into();
        let extension = extension.into();
        let message = if candidates.is_empty() {
            format!("No .{} file found in {}", extension, search_path)
        } else {
            format!(
                "Found {} .{} files in {}; specify one explicitly",
                candidates.len(),
                extension,
                search_path
            )
        };
        Self::new(
            ErrorCode::ProjectFileNotFound,
            message,
            to_details(ProjectFileNotFoundDetails {
                search_path,
                extension,
                candidates,
            }),
        )
    }

    pub fn release_notes_not_found(path: impl Into<String>) -> Self {
        let path = path.into();
        Self::new(
            ErrorCode::ReleaseNotesNotFound,
            format!("Release notes file not found: {}", path),
            serde_json::json!({ "path": path }),
        )
    }

    pub fn protection_password_required(level: impl Into<String>) -> Self {
        let level = level.into();
        Self::new(
            ErrorCode::ProtectionPasswordRequired,
            format!("Protection level {} requires a password", level),
            serde_json::json!({ "protectionLevel": level }),
        )
        .with_hint("Pass --password or --new-password")
    }

    pub fn protection_dont_save_sensitive_with_password() -> Self {
        Self::new(
            ErrorCode::ProtectionDontSaveSensitiveWithPassword,
            "A new password cannot be set when the protection level is DontSaveSensitive",
            serde_json::json!({ "protectionLevel": "DontSaveSensitive" }),
        )
    }

    pub fn parameter_unknown(name: impl Into<String>, declared: Vec<String>) -> Self {
        let name = name.into();
        Self::new(
            ErrorCode::ParameterUnknown,
            format!("Parameter '{}' is not declared by the project", name),
            serde_json::json!({ "name": name, "declared": declared }),
        )
    }

    pub fn catalog_backend(number: i32, error: impl Into<String>) -> Self {
        let error = error.into();
        Self::new(
            ErrorCode::CatalogBackendError,
            format!("Catalog error {}: {}", number, error),
            to_details(CatalogBackendDetails {
                number,
                error,
                procedure: None,
                attempts: None,
            }),
        )
    }

    pub fn catalog_scope_not_open(procedure: impl Into<String>) -> Self {
        let procedure = procedure.into();
        Self::new(
            ErrorCode::CatalogScopeNotOpen,
            format!(
                "Execution scope passed to {} does not hold an open connection",
                procedure
            ),
            serde_json::json!({ "procedure": procedure }),
        )
    }

    pub fn operation_cancelled(context: impl Into<String>) -> Self {
        let context = context.into();
        Self::new(
            ErrorCode::OperationCancelled,
            format!("Cancelled: {}", context),
            serde_json::json!({ "context": context }),
        )
    }

    pub fn project_tool_failed(details: ProjectToolFailedDetails) -> Self {
        let message = if details.stderr.is_empty() {
            format!("Project tool exited with code {}", details.exit_code)
        } else {
            format!(
                "Project tool exited with code {}: {}",
                details.exit_code, details.stderr
            )
        };
        Self::new(ErrorCode::ProjectToolFailed, message, to_details(details))
    }

    pub fn config_invalid_json(path: impl Into<String>, err: serde_json::Error) -> Self {
        Self::new(
            ErrorCode::ConfigInvalidJson,
            "Invalid JSON in configuration",
            to_details(ConfigInvalidJsonDetails {
                path: path.into(),
                error: err.to_string(),
            }),
        )
    }

    pub fn config_invalid_value(
        key: impl Into<String>,
        value: Option<String>,
        problem: impl Into<String>,
    ) -> Self {
        let problem = problem.into();
        Self::new(
            ErrorCode::ConfigInvalidValue,
            format!("Invalid configuration value: {}", problem),
            to_details(ConfigInvalidValueDetails {
                key: key.into(),
                value,
                problem,
            }),
        )
    }

    pub fn internal_io(error: impl Into<String>, context: Option<String>) -> Self {
        let error = error.into();
        Self::new(
            ErrorCode::InternalIoError,
            format!("IO error: {}", error),
            to_details(InternalIoErrorDetails { error, context }),
        )
    }

    pub fn internal_json(error: impl Into<String>, context: Option<String>) -> Self {
        let error = error.into();
        Self::new(
            ErrorCode::InternalJsonError,
            format!("JSON error: {}", error),
            to_details(InternalJsonErrorDetails { error, context }),
        )
    }

    pub fn internal_unexpected(error: impl Into<String>) -> Self {
        let error = error.into();
        Self::new(
            ErrorCode::InternalUnexpected,
            format!("Unexpected error: {}", error),
            serde_json::json!({ "error": error }),
        )
    }

    pub fn with_hint(mut self, message: impl Into<String>) -> Self {
        self.hints.push(Hint {
            message: message.into(),
        });
        self
    }

    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = Some(retryable);
        self
    }

    /// Attach a key to the details object (no-op for non-object details).
    pub fn with_detail(mut self, key: &str, value: impl Serialize) -> Self {
        if let Value::Object(map) = &mut self.details {
            map.insert(key.to_string(), to_details(value));
        }
        self
    }

    /// Backend-reported error number, when this is a catalog backend error.
    pub fn catalog_error_number(&self) -> Option<i32> {
        if self.code != ErrorCode::CatalogBackendError {
            return None;
        }
        self.details
            .get("number")
            .and_then(Value::as_i64)
            .and_then(|n| i32::try_from(n).ok())
    }
}
