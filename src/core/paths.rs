use crate::error::{Error, Result};
use std::env;
use std::path::PathBuf;

/// Base rolecall config directory (~/.config/rolecall/ on Unix, %APPDATA%\rolecall on Windows)
pub fn rolecall() -> Result<PathBuf> {
    #[cfg(windows)]
    {
        let appdata = env::var("APPDATA").map_err(|_| {
            Error::internal_unexpected(
                "APPDATA environment variable not set on Windows".to_string(),
            )
        })?;
        Ok(PathBuf::from(appdata).join("rolecall"))
    }

    #[cfg(not(windows))]
    {
        let home = env::var("HOME").map_err(|_| {
            Error::internal_unexpected(
                "HOME environment variable not set on Unix-like system".to_string(),
            )
        })?;
        Ok(PathBuf::from(home).join(".config").join("rolecall"))
    }
}

/// Global rolecall.json config file path
pub fn rolecall_json() -> Result<PathBuf> {
    Ok(rolecall()?.join("rolecall.json"))
}
