use serde::Serialize;

use crate::error::{Error, Result};

/// The host a run deploys to. Fixed for the whole run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentTarget {
    pub host: String,
    pub user: String,
    /// Registry port, forwarded to the same port on the host.
    pub port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_path: Option<String>,
}

impl DeploymentTarget {
    pub fn new(
        host: impl Into<String>,
        user: impl Into<String>,
        port: u16,
        remote_path: Option<String>,
    ) -> Result<Self> {
        let host = host.into();
        let user = user.into();

        if host.trim().is_empty() {
            return Err(Error::config_missing_target());
        }
        if host.starts_with('-') || host.contains(char::is_whitespace) {
            return Err(Error::validation_invalid_argument(
                "target_host",
                "Host must be a hostname or address",
                Some(host),
            ));
        }
        if user.trim().is_empty() || user.contains(char::is_whitespace) || user.contains('@') {
            return Err(Error::validation_invalid_argument(
                "target_user",
                "User must be a plain login name",
                Some(user),
            ));
        }
        if port == 0 {
            return Err(Error::validation_invalid_argument(
                "target_port",
                "Port must be between 1 and 65535",
                None,
            ));
        }

        Ok(Self {
            host,
            user,
            port,
            remote_path,
        })
    }

    /// `user@host` as ssh expects it.
    pub fn destination(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }
}
