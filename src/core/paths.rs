use crate::error::{Error, Result};
use std::env;
use std::path::PathBuf;

/// Base airlift config directory (`~/.config/airlift/`, `AIRLIFT_CONFIG_DIR` overrides).
pub fn airlift() -> Result<PathBuf> {
    if let Ok(dir) = env::var("AIRLIFT_CONFIG_DIR") {
        if !dir.trim().is_empty() {
            return Ok(PathBuf::from(shellexpand::tilde(&dir).to_string()));
        }
    }

    #[cfg(windows)]
    {
        let appdata = env::var("APPDATA").map_err(|_| {
            Error::internal_unexpected("APPDATA environment variable not set on Windows")
        })?;
        Ok(PathBuf::from(appdata).join("airlift"))
    }

    #[cfg(not(windows))]
    {
        let home = env::var("HOME").map_err(|_| {
            Error::internal_unexpected("HOME environment variable not set on Unix-like system")
        })?;
        Ok(PathBuf::from(home).join(".config").join("airlift"))
    }
}

/// Global airlift.json config file path
pub fn airlift_json() -> Result<PathBuf> {
    Ok(airlift()?.join("airlift.json"))
}
