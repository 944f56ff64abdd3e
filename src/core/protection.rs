//! Data-protection level decision for saved and deployed packages.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProtectionLevel {
    DontSaveSensitive,
    EncryptAllWithPassword,
    EncryptSensitiveWithPassword,
    ServerStorage,
}

impl ProtectionLevel {
    pub const ALL: [ProtectionLevel; 4] = [
        ProtectionLevel::DontSaveSensitive,
        ProtectionLevel::EncryptAllWithPassword,
        ProtectionLevel::EncryptSensitiveWithPassword,
        ProtectionLevel::ServerStorage,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProtectionLevel::DontSaveSensitive => "DontSaveSensitive",
            ProtectionLevel::EncryptAllWithPassword => "EncryptAllWithPassword",
            ProtectionLevel::EncryptSensitiveWithPassword => "EncryptSensitiveWithPassword",
            ProtectionLevel::ServerStorage => "ServerStorage",
        }
    }

    /// Numeric value of the level in project files.
    pub fn code(&self) -> u8 {
        match self {
            ProtectionLevel::DontSaveSensitive => 0,
            ProtectionLevel::EncryptSensitiveWithPassword => 2,
            ProtectionLevel::EncryptAllWithPassword => 3,
            ProtectionLevel::ServerStorage => 5,
        }
    }

    pub fn requires_password(&self) -> bool {
        matches!(
            self,
            ProtectionLevel::EncryptAllWithPassword | ProtectionLevel::EncryptSensitiveWithPassword
        )
    }
}

impl fmt::Display for ProtectionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProtectionLevel {
    type Err = Error;

    fn from_str(raw: &str) -> Result<Self> {
        let token = raw.trim();
        ProtectionLevel::ALL
            .iter()
            .copied()
            .find(|level| level.as_str().eq_ignore_ascii_case(token))
            .ok_or_else(|| {
                Error::validation_invalid_argument(
                    "protection_level",
                    format!("Unknown protection level '{}'", token),
                    Some(token.to_string()),
                    Some(
                        ProtectionLevel::ALL
                            .iter()
                            .map(|l| l.as_str().to_string())
                            .collect(),
                    ),
                )
            })
    }
}

/// Which pipeline is asking for a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyMode {
    Build,
    Deploy { erase_sensitive: bool },
}

/// Final level and the password the saver must encrypt with.
#[derive(Clone, PartialEq, Eq)]
pub struct ResolvedProtection {
    pub level: ProtectionLevel,
    pub password: Option<String>,
}

impl fmt::Debug for ResolvedProtection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedProtection")
            .field("level", &self.level)
            .field("password", &self.password.as_ref().map(|_| "******"))
            .finish()
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

/// Decide the final protection level and encryption password.
///
/// Rules apply in order: explicit override (else current level), password
/// requirement for encrypting levels, the DontSaveSensitive/new-password
/// contradiction, and finally the deploy-time forcing to DontSaveSensitive
/// (erase) or ServerStorage.
pub fn resolve(
    current: ProtectionLevel,
    requested: Option<&str>,
    password: Option<&str>,
    new_password: Option<&str>,
    mode: PolicyMode,
) -> Result<ResolvedProtection> {
    let level = match requested.map(str::trim).filter(|r| !r.is_empty()) {
        None => current,
        Some(token) => {
            let parsed: ProtectionLevel = token.parse()?;
            if parsed == ProtectionLevel::ServerStorage && mode == PolicyMode::Build {
                return Err(Error::validation_invalid_argument(
                    "protection_level",
                    "ServerStorage can only be produced by a deployment",
                    Some(token.to_string()),
                    None,
                ));
            }
            parsed
        }
    };

    let new_password = non_empty(new_password);
    let mut encryption_password = None;

    if level.requires_password() {
        let chosen = new_password
            .or_else(|| non_empty(password))
            .ok_or_else(|| Error::protection_password_required(level.as_str()))?;
        encryption_password = Some(chosen.to_string());
    }

    if level == ProtectionLevel::DontSaveSensitive && new_password.is_some() {
        return Err(Error::protection_dont_save_sensitive_with_password());
    }

    match mode {
        PolicyMode::Build => Ok(ResolvedProtection {
            level,
            password: encryption_password,
        }),
        PolicyMode::Deploy { erase_sensitive } => Ok(ResolvedProtection {
            level: if erase_sensitive {
                ProtectionLevel::DontSaveSensitive
            } else {
                ProtectionLevel::ServerStorage
            },
            password: None,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_case_insensitively() {
        assert_eq!(
            "dontsavesensitive".parse::<ProtectionLevel>().unwrap(),
            ProtectionLevel::DontSaveSensitive
        );
        assert_eq!(
            " EncryptAllWithPassword ".parse::<ProtectionLevel>().unwrap(),
            ProtectionLevel::EncryptAllWithPassword
        );
    }

    #[test]
    fn unknown_token_is_invalid_argument() {
        let err = "EncryptAllWithUserKey".parse::<ProtectionLevel>().unwrap_err();
        assert_eq!(err.code.as_str(), "validation.invalid_argument");
    }

    #[test]
    fn no_override_keeps_current_level() {
        let resolved = resolve(
            ProtectionLevel::DontSaveSensitive,
            None,
            None,
            None,
            PolicyMode::Build,
        )
        .unwrap();
        assert_eq!(resolved.level, ProtectionLevel::DontSaveSensitive);
        assert_eq!(resolved.password, None);
    }

    #[test]
    fn new_password_preferred_over_password() {
        let resolved = resolve(
            ProtectionLevel::DontSaveSensitive,
            Some("EncryptSensitiveWithPassword"),
            Some("old"),
            Some("new"),
            PolicyMode::Build,
        )
        .unwrap();
        assert_eq!(resolved.level, ProtectionLevel::EncryptSensitiveWithPassword);
        assert_eq!(resolved.password.as_deref(), Some("new"));
    }

    #[test]
    fn password_used_when_new_password_empty() {
        let resolved = resolve(
            ProtectionLevel::EncryptAllWithPassword,
            None,
            Some("old"),
            Some(""),
            PolicyMode::Build,
        )
        .unwrap();
        assert_eq!(resolved.password.as_deref(), Some("old"));
    }

    #[test]
    fn encrypting_level_without_any_password_fails() {
        let err = resolve(
            ProtectionLevel::DontSaveSensitive,
            Some("EncryptAllWithPassword"),
            None,
            Some(""),
            PolicyMode::Build,
        )
        .unwrap_err();
        assert_eq!(err.code.as_str(), "protection.password_required");
        assert!(err.message.contains("EncryptAllWithPassword"));
    }

    #[test]
    fn dont_save_sensitive_with_new_password_is_contradictory() {
        let err = resolve(
            ProtectionLevel::EncryptAllWithPassword,
            Some("DontSaveSensitive"),
            Some("old"),
            Some("x"),
            PolicyMode::Build,
        )
        .unwrap_err();
        assert_eq!(
            err.code.as_str(),
            "protection.dont_save_sensitive_with_password"
        );
    }

    #[test]
    fn server_storage_is_not_a_build_override() {
        let err = resolve(
            ProtectionLevel::DontSaveSensitive,
            Some("ServerStorage"),
            None,
            None,
            PolicyMode::Build,
        )
        .unwrap_err();
        assert_eq!(err.code.as_str(), "validation.invalid_argument");
    }

    #[test]
    fn deploy_forces_level_from_erase_flag() {
        let erase = resolve(
            ProtectionLevel::EncryptSensitiveWithPassword,
            None,
            Some("pwd"),
            None,
            PolicyMode::Deploy {
                erase_sensitive: true,
            },
        )
        .unwrap();
        assert_eq!(erase.level, ProtectionLevel::DontSaveSensitive);
        assert_eq!(erase.password, None);

        let keep = resolve(
            ProtectionLevel::DontSaveSensitive,
            None,
            None,
            None,
            PolicyMode::Deploy {
                erase_sensitive: false,
            },
        )
        .unwrap();
        assert_eq!(keep.level, ProtectionLevel::ServerStorage);
    }

    #[test]
    fn deploy_of_encrypted_package_still_needs_password() {
        let err = resolve(
            ProtectionLevel::EncryptAllWithPassword,
            None,
            None,
            None,
            PolicyMode::Deploy {
                erase_sensitive: false,
            },
        )
        .unwrap_err();
        assert_eq!(err.code.as_str(), "protection.password_required");
    }

    #[test]
    fn debug_output_masks_password() {
        let resolved = ResolvedProtection {
            level: ProtectionLevel::EncryptAllWithPassword,
            password: Some("topsecret".to_string()),
        };
        let printed = format!("{:?}", resolved);
        assert!(!printed.contains("topsecret"));
        assert!(printed.contains("******"));
    }

    #[test]
    fn level_codes_match_project_file_values() {
        assert_eq!(ProtectionLevel::DontSaveSensitive.code(), 0);
        assert_eq!(ProtectionLevel::EncryptSensitiveWithPassword.code(), 2);
        assert_eq!(ProtectionLevel::EncryptAllWithPassword.code(), 3);
        assert_eq!(ProtectionLevel::ServerStorage.code(), 5);
    }
}
