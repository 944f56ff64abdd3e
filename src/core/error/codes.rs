use super::ErrorCode;

pub fn all_codes() -> &'static [ErrorCode] {
    &[
        ErrorCode::ConfigInvalidJson,
        ErrorCode::ConfigInvalidValue,
        ErrorCode::ValidationMissingArgument,
        ErrorCode::ValidationInvalidArgument,
        ErrorCode::ProjectFileNotFound,
        ErrorCode::ReleaseNotesNotFound,
        ErrorCode::ProtectionPasswordRequired,
        ErrorCode::ProtectionDontSaveSensitiveWithPassword,
        ErrorCode::ParameterUnknown,
        ErrorCode::CatalogBackendError,
        ErrorCode::CatalogScopeNotOpen,
        ErrorCode::OperationCancelled,
        ErrorCode::ProjectToolFailed,
        ErrorCode::InternalIoError,
        ErrorCode::InternalJsonError,
        ErrorCode::InternalUnexpected,
    ]
}

pub fn parse_code(code: &str) -> Option<ErrorCode> {
    all_codes()
        .iter()
        .copied()
        .find(|candidate| candidate.as_str() == code)
}
