//! Conversion of file settings into orchestration types

use anyhow::bail;
use stackflow_cloud::{
    DependencyCatalog, PollConfig, RecoveryConfig, ResourceType, RunSettings, default_catalog,
};
use stackflow_config::Settings;
use std::time::Duration;

pub fn run_settings(settings: &Settings) -> RunSettings {
    RunSettings {
        run_timeout: Duration::from_secs(settings.orchestration.run_timeout_secs),
        reference_timeout: Duration::from_secs(settings.orchestration.reference_timeout_secs),
        poll: PollConfig::new(
            Duration::from_millis(settings.poll.interval_ms),
            Duration::from_secs(settings.poll.timeout_secs),
        ),
    }
}

pub fn recovery_config(settings: &Settings) -> RecoveryConfig {
    RecoveryConfig {
        run_timeout: Duration::from_secs(settings.recovery.run_timeout_secs),
        router_active: PollConfig::new(
            Duration::from_secs(settings.recovery.router_active_interval_secs),
            Duration::from_secs(settings.recovery.router_active_timeout_secs),
        ),
    }
}

/// The default catalog with the configured non-blocking edges applied.
pub fn catalog(settings: &Settings) -> anyhow::Result<DependencyCatalog> {
    let mut catalog = default_catalog();
    for edge in &settings.catalog.non_blocking {
        let dependent = ResourceType::new(edge.dependent.as_str());
        let dependency = ResourceType::new(edge.dependency.as_str());
        if !catalog.set_non_blocking(&dependent, &dependency) {
            bail!(
                "catalog.non_blocking: '{}' does not depend on '{}'",
                dependent,
                dependency
            );
        }
    }
    Ok(catalog)
}

#[cfg(test)]
mod tests {
    use super::*;
    use stackflow_config::EdgeSetting;

    #[test]
    fn test_defaults_match_library_defaults() {
        let settings = Settings::default();
        assert_eq!(run_settings(&settings), RunSettings::default());
        assert_eq!(recovery_config(&settings), RecoveryConfig::default());
    }

    #[test]
    fn test_non_blocking_edges_applied() {
        let mut settings = Settings::default();
        settings.catalog.non_blocking.push(EdgeSetting {
            dependent: "subnet".into(),
            dependency: "network".into(),
        });
        let catalog = catalog(&settings).unwrap();
        let subnet = catalog.get(&ResourceType::SUBNET).unwrap();
        assert!(
            subnet
                .depends_on
                .iter()
                .any(|d| d.resource_type == ResourceType::NETWORK && !d.blocking)
        );
    }

    #[test]
    fn test_unknown_edge_rejected() {
        let mut settings = Settings::default();
        settings.catalog.non_blocking.push(EdgeSetting {
            dependent: "network".into(),
            dependency: "server".into(),
        });
        assert!(catalog(&settings).is_err());
    }
}
