pub mod error;
pub mod settings;

pub use error::*;
pub use settings::*;

use std::path::PathBuf;

const CONFIG_PATH_ENV: &str = "STACKFLOW_CONFIG_PATH";
const CANDIDATES: [&str; 4] = [
    "stackflow.local.yaml",
    ".stackflow.local.yaml",
    "stackflow.yaml",
    ".stackflow.yaml",
];

/// stackflow's config directory, created on first use.
pub fn get_config_dir() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or(ConfigError::ConfigDirNotFound)?
        .join("stackflow");

    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir)?;
    }

    Ok(config_dir)
}

/// Locate the config file.
///
/// Search order:
/// 1. `STACKFLOW_CONFIG_PATH`
/// 2. current directory: stackflow.local.yaml, .stackflow.local.yaml, stackflow.yaml, .stackflow.yaml
/// 3. the same names under `./.stackflow/`
/// 4. `~/.config/stackflow/stackflow.yaml`
pub fn find_config_file() -> Result<PathBuf> {
    if let Ok(config_path) = std::env::var(CONFIG_PATH_ENV) {
        let path = PathBuf::from(config_path);
        if path.exists() {
            return Ok(path);
        }
    }

    let current_dir = std::env::current_dir()?;

    for filename in &CANDIDATES {
        let path = current_dir.join(filename);
        if path.exists() {
            return Ok(path);
        }
    }

    let project_dir = current_dir.join(".stackflow");
    if project_dir.is_dir() {
        for filename in &CANDIDATES {
            let path = project_dir.join(filename);
            if path.exists() {
                return Ok(path);
            }
        }
    }

    if let Some(config_dir) = dirs::config_dir() {
        let global_config = config_dir.join("stackflow").join("stackflow.yaml");
        if global_config.exists() {
            return Ok(global_config);
        }
    }

    Err(ConfigError::ConfigFileNotFound)
}

/// Load the discovered config file, falling back to defaults when there is
/// none. Returns the path that was read, if any.
pub fn load_settings() -> Result<(Settings, Option<PathBuf>)> {
    match find_config_file() {
        Ok(path) => Ok((Settings::load(&path)?, Some(path))),
        Err(ConfigError::ConfigFileNotFound) => Ok((Settings::default(), None)),
        Err(e) => Err(e),
    }
}
