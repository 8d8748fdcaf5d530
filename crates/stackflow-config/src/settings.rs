use crate::error::{ConfigError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Contents of a `stackflow.yaml` file. Every section may be omitted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub orchestration: OrchestrationSettings,
    pub poll: PollSettings,
    pub recovery: RecoverySettings,
    pub snapshot: SnapshotSettings,
    pub catalog: CatalogSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestrationSettings {
    /// Upper bound for a whole create or delete run
    pub run_timeout_secs: u64,
    /// How long an instance waits for a referenced instance
    pub reference_timeout_secs: u64,
}

impl Default for OrchestrationSettings {
    fn default() -> Self {
        Self {
            run_timeout_secs: 30 * 60,
            reference_timeout_secs: 10 * 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollSettings {
    pub interval_ms: u64,
    pub timeout_secs: u64,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval_ms: 5_000,
            timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoverySettings {
    pub run_timeout_secs: u64,
    pub router_active_interval_secs: u64,
    pub router_active_timeout_secs: u64,
}

impl Default for RecoverySettings {
    fn default() -> Self {
        Self {
            run_timeout_secs: 1_800,
            router_active_interval_secs: 10,
            router_active_timeout_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotSettings {
    /// Defaults to `snapshots/` under the config directory
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogSettings {
    /// Edges whose dependent does not hold up the dependency's deletion
    pub non_blocking: Vec<EdgeSetting>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeSetting {
    pub dependent: String,
    pub dependency: String,
}

impl Settings {
    pub fn from_yaml(content: &str, path: &Path) -> Result<Self> {
        // An empty file parses as null rather than an empty mapping.
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content, path)
    }

    /// Configured snapshot directory, or `snapshots/` under the config
    /// directory.
    pub fn snapshot_dir(&self) -> Result<PathBuf> {
        match &self.snapshot.dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(crate::get_config_dir()?.join("snapshots")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let yaml = r#"
orchestration:
  run_timeout_secs: 60
poll:
  interval_ms: 250
catalog:
  non_blocking:
    - dependent: port
      dependency: network
"#;
        let settings = Settings::from_yaml(yaml, Path::new("stackflow.yaml")).unwrap();
        assert_eq!(settings.orchestration.run_timeout_secs, 60);
        assert_eq!(settings.orchestration.reference_timeout_secs, 600);
        assert_eq!(settings.poll.interval_ms, 250);
        assert_eq!(settings.poll.timeout_secs, 120);
        assert_eq!(settings.recovery, RecoverySettings::default());
        assert_eq!(
            settings.catalog.non_blocking,
            vec![EdgeSetting {
                dependent: "port".into(),
                dependency: "network".into(),
            }]
        );
    }

    #[test]
    fn test_empty_file_is_default() {
        let settings = Settings::from_yaml("\n", Path::new("stackflow.yaml")).unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_parse_error_names_file() {
        let err = Settings::from_yaml("poll: [1, 2", Path::new("bad.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("bad.yaml"));
    }

    #[test]
    fn test_snapshot_dir_override() {
        let mut settings = Settings::default();
        settings.snapshot.dir = Some(PathBuf::from("/var/lib/stackflow"));
        assert_eq!(
            settings.snapshot_dir().unwrap(),
            PathBuf::from("/var/lib/stackflow")
        );
    }
}
