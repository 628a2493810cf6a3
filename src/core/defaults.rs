use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::{Error, Result};
use crate::paths;

/// Root configuration structure for airlift.json
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AirliftConfig {
    #[serde(default)]
    pub defaults: Defaults,
}

/// All configurable defaults that can be overridden via airlift.json
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Defaults {
    #[serde(default = "default_target")]
    pub target: TargetDefaults,

    #[serde(default = "default_manifests")]
    pub manifests: ManifestDefaults,

    #[serde(default = "default_docker")]
    pub docker: DockerConfig,

    #[serde(default = "default_ssh")]
    pub ssh: SshConfig,

    #[serde(default = "default_relay")]
    pub relay: RelayConfig,

    #[serde(default = "default_tunnel")]
    pub tunnel: TunnelConfig,

    #[serde(default = "default_discovery")]
    pub discovery: DiscoveryConfig,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            target: default_target(),
            manifests: default_manifests(),
            docker: default_docker(),
            ssh: default_ssh(),
            relay: default_relay(),
            tunnel: default_tunnel(),
            discovery: default_discovery(),
        }
    }
}

/// Values used when the CLI leaves a target field out.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetDefaults {
    #[serde(default = "default_user")]
    pub user: String,
    #[serde(default = "default_registry_port")]
    pub port: u16,
    #[serde(default = "default_remote_path")]
    pub remote_path: String,
}

/// File names of the build manifest, the remote manifest, and the remote
/// manifest's name once staged.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestDefaults {
    #[serde(default = "default_build_manifest")]
    pub build: String,
    #[serde(default = "default_remote_manifest")]
    pub remote: String,
    #[serde(default = "default_staged_manifest")]
    pub staged: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DockerConfig {
    #[serde(default = "default_docker_binary")]
    pub binary: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SshConfig {
    #[serde(default = "default_ssh_binary")]
    pub binary: String,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default)]
    pub identity_file: Option<String>,
    #[serde(default)]
    pub extra_options: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayConfig {
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TunnelConfig {
    #[serde(default = "default_ready_timeout")]
    pub ready_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryConfig {
    #[serde(default = "default_excluded_prefixes")]
    pub excluded_interface_prefixes: Vec<String>,
}

// =============================================================================
// Default value functions
// =============================================================================

fn default_target() -> TargetDefaults {
    TargetDefaults {
        user: default_user(),
        port: default_registry_port(),
        remote_path: default_remote_path(),
    }
}

fn default_user() -> String {
    "root".to_string()
}

fn default_registry_port() -> u16 {
    5000
}

fn default_remote_path() -> String {
    "/etc/airlift".to_string()
}

fn default_manifests() -> ManifestDefaults {
    ManifestDefaults {
        build: default_build_manifest(),
        remote: default_remote_manifest(),
        staged: default_staged_manifest(),
    }
}

fn default_build_manifest() -> String {
    "docker-compose.yml".to_string()
}

fn default_remote_manifest() -> String {
    "docker-compose.remote.yml".to_string()
}

fn default_staged_manifest() -> String {
    "docker-compose.yml".to_string()
}

fn default_docker() -> DockerConfig {
    DockerConfig {
        binary: default_docker_binary(),
    }
}

fn default_docker_binary() -> String {
    "docker".to_string()
}

fn default_ssh() -> SshConfig {
    SshConfig {
        binary: default_ssh_binary(),
        connect_timeout_secs: default_connect_timeout(),
        identity_file: None,
        extra_options: Vec::new(),
    }
}

fn default_ssh_binary() -> String {
    "ssh".to_string()
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_relay() -> RelayConfig {
    RelayConfig {
        request_timeout_secs: default_request_timeout(),
    }
}

fn default_request_timeout() -> u64 {
    10
}

fn default_tunnel() -> TunnelConfig {
    TunnelConfig {
        ready_timeout_secs: default_ready_timeout(),
    }
}

fn default_ready_timeout() -> u64 {
    15
}

fn default_discovery() -> DiscoveryConfig {
    DiscoveryConfig {
        excluded_interface_prefixes: default_excluded_prefixes(),
    }
}

pub(crate) fn default_excluded_prefixes() -> Vec<String> {
    [
        "docker", "br-", "veth", "virbr", "vmnet", "vboxnet", "cni", "flannel", "cali",
        "lxc", "lxd", "tun", "tap", "utun", "bridge", "awdl", "llw",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

// =============================================================================
// Loading functions
// =============================================================================

/// Load defaults, merging file config with built-in defaults.
///
/// A missing airlift.json yields the built-in defaults; a malformed one is an error.
pub fn load_defaults() -> Result<Defaults> {
    let path = paths::airlift_json()?;
    Ok(load_config_from(&path)?.defaults)
}

pub fn load_config_from(path: &Path) -> Result<AirliftConfig> {
    if !path.exists() {
        return Ok(AirliftConfig::default());
    }

    let content = fs::read_to_string(path).map_err(|e| {
        Error::internal_io(e.to_string(), Some(format!("read {}", path.display())))
    })?;

    let config: AirliftConfig = serde_json::from_str(&content)
        .map_err(|e| Error::config_invalid_json(path.display().to_string(), e))?;
    validate(&config.defaults)?;
    Ok(config)
}

fn validate(defaults: &Defaults) -> Result<()> {
    if defaults.target.port == 0 {
        return Err(Error::config_invalid_value(
            "defaults.target.port",
            Some("0".to_string()),
            "Port must be between 1 and 65535",
        ));
    }
    for (key, secs) in [
        ("defaults.ssh.connectTimeoutSecs", defaults.ssh.connect_timeout_secs),
        ("defaults.relay.requestTimeoutSecs", defaults.relay.request_timeout_secs),
        ("defaults.tunnel.readyTimeoutSecs", defaults.tunnel.ready_timeout_secs),
    ] {
        if secs == 0 {
            return Err(Error::config_invalid_value(
                key,
                Some("0".to_string()),
                "Timeout must be at least one second",
            ));
        }
    }
    if defaults.docker.binary.trim().is_empty() || defaults.ssh.binary.trim().is_empty() {
        return Err(Error::config_invalid_value(
            "defaults.docker.binary",
            None,
            "Tool binaries cannot be empty",
        ));
    }
    Ok(())
}

/// Get built-in defaults (ignoring any file config)
pub fn builtin_defaults() -> Defaults {
    Defaults::default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_builtin_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config_from(&dir.path().join("airlift.json")).unwrap();
        assert_eq!(config.defaults.target.user, "root");
        assert_eq!(config.defaults.target.port, 5000);
        assert_eq!(config.defaults.target.remote_path, "/etc/airlift");
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("airlift.json");
        fs::write(
            &path,
            r#"{"defaults": {"target": {"port": 5050}, "relay": {"requestTimeoutSecs": 3}}}"#,
        )
        .unwrap();

        let defaults = load_config_from(&path).unwrap().defaults;
        assert_eq!(defaults.target.port, 5050);
        assert_eq!(defaults.target.user, "root");
        assert_eq!(defaults.relay.request_timeout_secs, 3);
        assert_eq!(defaults.manifests.remote, "docker-compose.remote.yml");
    }

    #[test]
    fn malformed_file_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("airlift.json");
        fs::write(&path, "{ not json").unwrap();

        let err = load_config_from(&path).unwrap_err();
        assert_eq!(err.code.as_str(), "config.invalid_json");
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("airlift.json");
        fs::write(&path, r#"{"defaults": {"tunnel": {"readyTimeoutSecs": 0}}}"#).unwrap();

        let err = load_config_from(&path).unwrap_err();
        assert_eq!(err.code.as_str(), "config.invalid_value");
        assert_eq!(err.details["key"], "defaults.tunnel.readyTimeoutSecs");
    }
}
