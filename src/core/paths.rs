use crate::error::{Error, Result};
use std::env;
use std::path::PathBuf;

/// Environment variable overriding the configuration directory.
pub const CONFIG_DIR_ENV: &str = "ETLPACK_CONFIG_DIR";

/// Base etlpack config directory (universal ~/.config/etlpack/ on all platforms)
pub fn etlpack() -> Result<PathBuf> {
    if let Ok(dir) = env::var(CONFIG_DIR_ENV) {
        if !dir.trim().is_empty() {
            return Ok(PathBuf::from(dir));
        }
    }

    #[cfg(windows)]
    {
        let appdata = env::var("APPDATA").map_err(|_| {
            Error::internal_unexpected(
                "APPDATA environment variable not set on Windows".to_string(),
            )
        })?;
        Ok(PathBuf::from(appdata).join("etlpack"))
    }

    #[cfg(not(windows))]
    {
        let home = env::var("HOME").map_err(|_| {
            Error::internal_unexpected(
                "HOME environment variable not set on Unix-like system".to_string(),
            )
        })?;
        Ok(PathBuf::from(home).join(".config").join("etlpack"))
    }
}

/// Global etlpack.json config file path
pub fn etlpack_json() -> Result<PathBuf> {
    Ok(etlpack()?.join("etlpack.json"))
}
