//! The registry on the target host, reached through the tunnel.

use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;

use crate::error::{Error, RelayDetails, Result};
use crate::tagger::RelayName;
use crate::utils::command::ToolCommand;

pub trait Relay {
    /// Liveness check against `address:port`.
    fn probe(&self, endpoint: &str) -> Result<()>;

    fn push(&self, name: &RelayName) -> Result<()>;

    fn has_repository(&self, name: &RelayName) -> Result<bool>;
}

/// Docker registry HTTP API v2 plus `docker push`.
pub struct RegistryRelay {
    docker_binary: String,
    client: Client,
}

#[derive(Deserialize)]
struct TagList {
    #[serde(default)]
    tags: Option<Vec<String>>,
}

impl RegistryRelay {
    pub fn new(docker_binary: impl Into<String>, request_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(request_timeout)
            .connect_timeout(request_timeout)
            .build()
            .map_err(|e| Error::internal_unexpected(format!("HTTP client setup failed: {}", e)))?;

        Ok(Self {
            docker_binary: docker_binary.into(),
            client,
        })
    }
}

pub fn tags_list_url(name: &RelayName) -> String {
    format!("http://{}/v2/{}/tags/list", name.registry(), name.repository())
}

impl Relay for RegistryRelay {
    fn probe(&self, endpoint: &str) -> Result<()> {
        let url = format!("http://{}/v2/", endpoint);
        log_debug!("relay", "Probing {}", url);

        let unreachable = |status: Option<u16>, error: Option<String>| {
            Error::tunnel_relay_unreachable(RelayDetails {
                endpoint: endpoint.to_string(),
                relay_name: None,
                status,
                error,
            })
        };

        let response = self
            .client
            .get(&url)
            .send()
            .map_err(|e| unreachable(None, Some(e.to_string())))?;

        // 401 still means a registry answered; auth is the daemon's concern.
        match response.status() {
            StatusCode::OK | StatusCode::UNAUTHORIZED => Ok(()),
            status => Err(unreachable(Some(status.as_u16()), None)),
        }
    }

    fn push(&self, name: &RelayName) -> Result<()> {
        let cmd = ToolCommand::new(&self.docker_binary).args(["push".to_string(), name.to_string()]);
        log_debug!("push", "{}", cmd.display());

        let out = cmd.run().into_output();
        if out.success {
            Ok(())
        } else {
            Err(Error::push_failed(name.to_string(), out.failure_details(&cmd)))
        }
    }

    fn has_repository(&self, name: &RelayName) -> Result<bool> {
        let url = tags_list_url(name);
        let details = |status: Option<u16>, error: Option<String>| RelayDetails {
            endpoint: name.registry(),
            relay_name: Some(name.to_string()),
            status,
            error,
        };

        let response = self
            .client
            .get(&url)
            .send()
            .map_err(|e| Error::verify_query_failed(details(None, Some(e.to_string()))))?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            StatusCode::OK => {
                let list: TagList = response.json().map_err(|e| {
                    Error::verify_query_failed(details(Some(200), Some(e.to_string())))
                })?;
                Ok(list.tags.map(|t| !t.is_empty()).unwrap_or(false))
            }
            status => Err(Error::verify_query_failed(details(Some(status.as_u16()), None))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::BuildArtifact;

    #[test]
    fn tags_list_url_uses_repository_segment() {
        let name = RelayName::new(
            "10.0.0.5".parse().unwrap(),
            5000,
            &BuildArtifact::parse("team/app-b:2.0"),
        );
        assert_eq!(tags_list_url(&name), "http://10.0.0.5:5000/v2/team/app-b/tags/list");
    }

    #[test]
    fn probe_of_closed_port_is_relay_unreachable() {
        let relay = RegistryRelay::new("docker", Duration::from_secs(1)).unwrap();
        let err = relay.probe("127.0.0.1:1").unwrap_err();
        assert_eq!(err.code.as_str(), "tunnel.relay_unreachable");
    }
}
