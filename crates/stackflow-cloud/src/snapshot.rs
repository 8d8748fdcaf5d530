//! Point-in-time snapshots of router groups
//!
//! A snapshot records, for every router in scope, its external gateway and
//! the floating IPs hanging off it, and for every floating IP its
//! association, QoS policy and port-forwarding rules. That is enough to
//! replay the state later without asking the provider again.
//!
//! Snapshots are stored as pretty-printed JSON files named
//! `<YYYY-mm-dd_HH-MM-SS>_record_<scope>.json`.

use crate::error::{CloudError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tokio::fs;

const SNAPSHOT_VERSION: u32 = 1;
const FILE_MARKER: &str = "_record_";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

/// Which resources a capture sees.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    /// Every project (administrative view)
    All,
    /// A single project
    Project(String),
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Scope::All => write!(f, "all"),
            Scope::Project(id) => write!(f, "{}", id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalFixedIp {
    pub subnet_id: String,
    pub ip_address: String,
}

/// External gateway of a router.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayInfo {
    pub network_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_snat: Option<bool>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub external_fixed_ips: Vec<ExternalFixedIp>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qos_policy_id: Option<String>,
}

impl GatewayInfo {
    pub fn new(network_id: impl Into<String>) -> Self {
        Self {
            network_id: network_id.into(),
            enable_snat: None,
            external_fixed_ips: Vec::new(),
            qos_policy_id: None,
        }
    }
}

/// A port-forwarding rule on a floating IP.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortForwarding {
    pub id: String,
    pub protocol: String,
    pub internal_ip_address: String,
    pub internal_port: u16,
    pub internal_port_id: String,
    pub external_port: u16,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouterRecord {
    #[serde(default)]
    pub gateway: Option<GatewayInfo>,

    /// Floating IPs routed through this router
    #[serde(default)]
    pub floating_ips: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FipRecord {
    /// Port the floating IP is associated with, if any
    #[serde(default)]
    pub port: Option<String>,

    /// The floating IP's own port, which carries its QoS policy
    pub fip_port: String,

    #[serde(default)]
    pub fixed_ip: Option<String>,

    #[serde(default)]
    pub qos_policy: Option<String>,

    pub floating_network: String,

    pub floating_ip_address: String,

    #[serde(default)]
    pub router: Option<String>,

    #[serde(default)]
    pub port_forwardings: Vec<PortForwarding>,
}

/// Serialized capture of every router group in a scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub version: u32,

    pub captured_at: DateTime<Utc>,

    #[serde(default)]
    pub routers: BTreeMap<String, RouterRecord>,

    #[serde(default)]
    pub floating_ips: BTreeMap<String, FipRecord>,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            captured_at: Utc::now(),
            routers: BTreeMap::new(),
            floating_ips: BTreeMap::new(),
        }
    }
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Floating IPs of one router that were captured. IDs listed on the
    /// router but missing from the floating IP table are skipped.
    pub fn router_floating_ips(&self, router_id: &str) -> Vec<(&str, &FipRecord)> {
        self.routers
            .get(router_id)
            .map(|router| {
                router
                    .floating_ips
                    .iter()
                    .filter_map(|id| {
                        self.floating_ips
                            .get(id)
                            .map(|fip| (id.as_str(), fip))
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Floating IPs that belong to no router group of this snapshot.
    ///
    /// Besides floating IPs without a router, this includes those whose
    /// router was not captured or does not list them, so that every
    /// floating IP ends up in exactly one group.
    pub fn unattached_floating_ips(&self) -> Vec<(&str, &FipRecord)> {
        let claimed: BTreeSet<&str> = self
            .routers
            .values()
            .flat_map(|router| router.floating_ips.iter().map(String::as_str))
            .collect();
        self.floating_ips
            .iter()
            .filter(|(id, _)| !claimed.contains(id.as_str()))
            .map(|(id, fip)| (id.as_str(), fip))
            .collect()
    }

    /// Floating IPs naming a router that is absent from the snapshot.
    pub fn orphaned_floating_ips(&self) -> Vec<&str> {
        self.floating_ips
            .iter()
            .filter(|(_, fip)| {
                fip.router
                    .as_deref()
                    .is_some_and(|r| !r.is_empty() && !self.routers.contains_key(r))
            })
            .map(|(id, _)| id.as_str())
            .collect()
    }

    pub fn port_forwarding_count(&self) -> usize {
        self.floating_ips
            .values()
            .map(|f| f.port_forwardings.len())
            .sum()
    }
}

/// Directory of snapshot files.
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File name a snapshot of `scope` is saved under.
    pub fn file_name(snapshot: &Snapshot, scope: &Scope) -> String {
        let scope = scope.to_string().replace(['/', '\\'], "_");
        format!(
            "{}{}{}.json",
            snapshot.captured_at.format(TIMESTAMP_FORMAT),
            FILE_MARKER,
            scope
        )
    }

    async fn ensure_dir(&self) -> Result<()> {
        if !self.dir.exists() {
            fs::create_dir_all(&self.dir).await?;
            tracing::debug!("Created snapshot directory: {}", self.dir.display());
        }
        Ok(())
    }

    /// Write `snapshot` and return its path. A file of the same name is
    /// kept as `<name>.backup`.
    pub async fn save(&self, snapshot: &Snapshot, scope: &Scope) -> Result<PathBuf> {
        self.ensure_dir().await?;

        let path = self.dir.join(Self::file_name(snapshot, scope));
        if path.exists() {
            let backup = path.with_extension("json.backup");
            if backup.exists() {
                fs::remove_file(&backup).await?;
            }
            fs::rename(&path, &backup).await?;
            tracing::debug!("Created snapshot backup: {}", backup.display());
        }

        let content = serde_json::to_string_pretty(snapshot)?;
        fs::write(&path, content).await?;

        tracing::info!(
            routers = snapshot.routers.len(),
            floating_ips = snapshot.floating_ips.len(),
            "Saved snapshot to {}",
            path.display()
        );
        Ok(path)
    }

    /// Read a snapshot file.
    pub async fn load(&self, path: impl AsRef<Path>) -> Result<Snapshot> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).await?;
        let snapshot: Snapshot = serde_json::from_str(&content)?;

        if snapshot.version > SNAPSHOT_VERSION {
            return Err(CloudError::SnapshotError(format!(
                "Snapshot version {} is newer than supported version {}",
                snapshot.version, SNAPSHOT_VERSION
            )));
        }

        tracing::debug!(
            routers = snapshot.routers.len(),
            floating_ips = snapshot.floating_ips.len(),
            "Loaded snapshot {}",
            path.display()
        );
        Ok(snapshot)
    }

    /// Every snapshot file in the directory, oldest first.
    pub async fn list(&self) -> Result<Vec<PathBuf>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut paths = Vec::new();
        let mut entries = fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_snapshot = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.contains(FILE_MARKER) && n.ends_with(".json"));
            if is_snapshot {
                paths.push(path);
            }
        }
        // The timestamp prefix sorts chronologically.
        paths.sort();
        Ok(paths)
    }

    /// Most recent snapshot file, optionally restricted to one scope.
    pub async fn latest(&self, scope: Option<&Scope>) -> Result<Option<PathBuf>> {
        let suffix = scope.map(|s| format!("{}{}.json", FILE_MARKER, s));
        Ok(self.list().await?.into_iter().rev().find(|path| {
            match (&suffix, path.file_name().and_then(|n| n.to_str())) {
                (Some(suffix), Some(name)) => name.ends_with(suffix.as_str()),
                (None, _) => true,
                (Some(_), None) => false,
            }
        }))
    }
}
