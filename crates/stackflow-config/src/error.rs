use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config directory not found")]
    ConfigDirNotFound,

    #[error(
        "Config file not found. Looked in:\n\
        - current directory: stackflow.local.yaml, .stackflow.local.yaml, stackflow.yaml, .stackflow.yaml\n\
        - ./.stackflow/\n\
        - ~/.config/stackflow/stackflow.yaml\n\
        Set STACKFLOW_CONFIG_PATH to point at a file directly"
    )]
    ConfigFileNotFound,

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
