use crate::error::{AppError, Result};
use std::path::PathBuf;

const BIN_DIR: &str = "bin";
const CONF_DIR: &str = "conf";
const DATA_DIR: &str = "data";
const STORAGE_DIR: &str = "storage";
const MIRRORS_DIR: &str = "mirrors";
const HOME_ENV: &str = "DEPLOYER_HOME";

pub fn install_root() -> Result<PathBuf> {
    if let Ok(home) = std::env::var(HOME_ENV) {
        if home.trim().is_empty() {
            return Err(AppError::Configuration(
                "DEPLOYER_HOME is set but empty".to_string(),
            ));
        }
        return Ok(PathBuf::from(home));
    }

    let exe_path = std::env::current_exe()?;
    let exe_dir = exe_path.parent().ok_or_else(|| {
        AppError::Configuration("Failed to resolve executable directory".to_string())
    })?;

    if exe_dir.file_name().and_then(|name| name.to_str()) == Some(BIN_DIR) {
        let root = exe_dir.parent().ok_or_else(|| {
            AppError::Configuration("Failed to resolve install root from bin".to_string())
        })?;
        return Ok(root.to_path_buf());
    }

    Ok(exe_dir.to_path_buf())
}

pub fn conf_dir() -> Result<PathBuf> {
    Ok(install_root()?.join(CONF_DIR))
}

pub fn data_dir() -> Result<PathBuf> {
    Ok(install_root()?.join(DATA_DIR))
}

/// Scratch area for transient keys, release archives and upload buffers.
pub fn storage_dir() -> Result<PathBuf> {
    Ok(data_dir()?.join(STORAGE_DIR))
}

/// Holds one bare mirror per project.
pub fn mirrors_dir() -> Result<PathBuf> {
    Ok(data_dir()?.join(MIRRORS_DIR))
}
