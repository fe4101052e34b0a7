use crate::error::{Error, Result};
use std::env;
use std::path::PathBuf;

/// Environment variable that overrides the base config directory.
pub const DOMINION_HOME_ENV: &str = "DOMINION_HOME";

/// Base dominion config directory (universal ~/.config/dominion/ on all platforms)
pub fn dominion() -> Result<PathBuf> {
    if let Ok(home) = env::var(DOMINION_HOME_ENV) {
        if !home.trim().is_empty() {
            return Ok(PathBuf::from(shellexpand::tilde(&home).to_string()));
        }
    }

    #[cfg(windows)]
    {
        let appdata = env::var("APPDATA").map_err(|_| {
            Error::internal_unexpected(
                "APPDATA environment variable not set on Windows".to_string(),
            )
        })?;
        Ok(PathBuf::from(appdata).join("dominion"))
    }

    #[cfg(not(windows))]
    {
        let home = env::var("HOME").map_err(|_| {
            Error::internal_unexpected(
                "HOME environment variable not set on Unix-like system".to_string(),
            )
        })?;
        Ok(PathBuf::from(home).join(".config").join("dominion"))
    }
}

/// Global dominion.json config file path
pub fn dominion_json() -> Result<PathBuf> {
    Ok(dominion()?.join("dominion.json"))
}
