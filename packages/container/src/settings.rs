// ABOUTME: Configuration for the container service, overridable from the environment
// ABOUTME: Carries the container base directory, accounts, agent path, and quota defaults

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Settings the container service is constructed with.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerServiceSettings {
    /// Directory each container roots its subtree under.
    pub container_base_dir: PathBuf,
    /// Account the service itself runs as; granted read-write on every
    /// container subtree.
    pub service_account: String,
    /// Local group container users join, when configured.
    pub container_group: Option<String>,
    /// Executable launched as the per-container host agent.
    pub host_agent_path: PathBuf,
    /// How long to wait for the host agent to report ready.
    pub host_startup_timeout_secs: u64,
    /// Disk ceiling applied to each container's quota control, when set.
    pub default_quota_bytes: Option<u64>,
}

impl Default for ContainerServiceSettings {
    fn default() -> Self {
        Self {
            container_base_dir: std::env::temp_dir().join("palisade").join("containers"),
            service_account: "palisade-service".to_string(),
            container_group: None,
            host_agent_path: PathBuf::from("palisade-host"),
            host_startup_timeout_secs: 30,
            default_quota_bytes: None,
        }
    }
}

impl ContainerServiceSettings {
    /// Builds settings from defaults plus `PALISADE_*` environment overrides.
    pub fn from_env() -> Self {
        let mut settings = Self::default();
        if let Ok(dir) = std::env::var("PALISADE_CONTAINER_DIR") {
            settings.container_base_dir = PathBuf::from(dir);
        }
        if let Ok(account) = std::env::var("PALISADE_SERVICE_ACCOUNT") {
            settings.service_account = account;
        }
        if let Ok(group) = std::env::var("PALISADE_CONTAINER_GROUP") {
            settings.container_group = Some(group);
        }
        if let Ok(agent) = std::env::var("PALISADE_HOST_AGENT") {
            settings.host_agent_path = PathBuf::from(agent);
        }
        if let Ok(timeout) = std::env::var("PALISADE_HOST_STARTUP_TIMEOUT_SECS") {
            if let Ok(secs) = timeout.parse() {
                settings.host_startup_timeout_secs = secs;
            }
        }
        if let Ok(quota) = std::env::var("PALISADE_DEFAULT_QUOTA_BYTES") {
            if let Ok(bytes) = quota.parse() {
                settings.default_quota_bytes = Some(bytes);
            }
        }
        settings
    }

    pub fn host_startup_timeout(&self) -> Duration {
        Duration::from_secs(self.host_startup_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_usable() {
        let settings = ContainerServiceSettings::default();
        assert!(settings.container_base_dir.ends_with("containers"));
        assert_eq!(settings.host_startup_timeout(), Duration::from_secs(30));
        assert!(settings.default_quota_bytes.is_none());
    }

    #[test]
    fn settings_round_trip_through_json() {
        let settings = ContainerServiceSettings {
            container_base_dir: PathBuf::from("/srv/containers"),
            service_account: "svc".into(),
            container_group: Some("containers".into()),
            host_agent_path: PathBuf::from("/usr/bin/palisade-host"),
            host_startup_timeout_secs: 10,
            default_quota_bytes: Some(1_073_741_824),
        };
        let json = serde_json::to_string(&settings).unwrap();
        let parsed: ContainerServiceSettings = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.service_account, "svc");
        assert_eq!(parsed.default_quota_bytes, Some(1_073_741_824));
    }
}
