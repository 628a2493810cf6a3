//! Relay names and the local aliases created under them.

use serde::{Serialize, Serializer};
use std::fmt;
use std::net::Ipv4Addr;

use crate::error::{Error, Result};
use crate::manifest::BuildArtifact;
use crate::utils::command::{ToolCommand, ToolRun};

/// `{address}:{port}/{name}`, the alias an artifact is pushed under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayName {
    pub address: Ipv4Addr,
    pub port: u16,
    /// The artifact's declared reference, tag included when declared.
    pub name: String,
}

impl RelayName {
    pub fn new(address: Ipv4Addr, port: u16, artifact: &BuildArtifact) -> Self {
        Self {
            address,
            port,
            name: artifact.reference(),
        }
    }

    /// `address:port`, the registry host part.
    pub fn registry(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }

    /// Repository segment used by the registry listing API (name without tag).
    pub fn repository(&self) -> &str {
        if let Some(at) = self.name.find('@') {
            return &self.name[..at];
        }
        let name_start = self.name.rfind('/').map(|i| i + 1).unwrap_or(0);
        match self.name[name_start..].rfind(':') {
            Some(offset) => &self.name[..name_start + offset],
            None => &self.name,
        }
    }
}

impl fmt::Display for RelayName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}/{}", self.address, self.port, self.name)
    }
}

impl Serialize for RelayName {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// One relay name per artifact, in order, duplicates kept.
pub fn relay_names(address: Ipv4Addr, port: u16, artifacts: &[BuildArtifact]) -> Vec<RelayName> {
    artifacts
        .iter()
        .map(|artifact| RelayName::new(address, port, artifact))
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UntagOutcome {
    Removed,
    /// The alias was already gone.
    Absent,
}

/// Local image aliasing.
pub trait ImageTagger {
    fn tag(&self, local: &BuildArtifact, alias: &RelayName) -> Result<()>;

    /// Remove the alias if it still exists. Never touches the artifact itself.
    fn untag(&self, alias: &RelayName) -> Result<UntagOutcome>;
}

/// Tag every artifact, recording each alias in `tagged` as soon as it exists.
///
/// Stops at the first failure; aliases created before it stay recorded so
/// cleanup can remove them.
pub fn tag_all(
    tagger: &dyn ImageTagger,
    artifacts: &[BuildArtifact],
    names: &[RelayName],
    tagged: &mut Vec<RelayName>,
) -> Result<()> {
    for (artifact, name) in artifacts.iter().zip(names) {
        log_debug!("tag", "{} -> {}", artifact.reference(), name);
        tagger.tag(artifact, name)?;
        tagged.push(name.clone());
    }
    Ok(())
}

/// `docker tag` / `docker rmi` against the local daemon.
pub struct DockerTagger {
    pub binary: String,
}

impl DockerTagger {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl ImageTagger for DockerTagger {
    fn tag(&self, local: &BuildArtifact, alias: &RelayName) -> Result<()> {
        let cmd = ToolCommand::new(&self.binary)
            .arg("tag")
            .arg(local.reference())
            .arg(alias.to_string());
        match cmd.run() {
            ToolRun::Completed(out) if out.success => Ok(()),
            ToolRun::Completed(out) => {
                Err(Error::tag_failed(alias.to_string(), out.failure_details(&cmd)))
            }
            ToolRun::Unavailable(error) => Err(Error::build_tool_unavailable(cmd.program(), error)),
        }
    }

    fn untag(&self, alias: &RelayName) -> Result<UntagOutcome> {
        let inspect = ToolCommand::new(&self.binary)
            .args(["image", "inspect"])
            .arg(alias.to_string());
        match inspect.run() {
            ToolRun::Completed(out) if out.success => {}
            ToolRun::Completed(out) if is_missing_image(&out.error_text()) => {
                return Ok(UntagOutcome::Absent)
            }
            ToolRun::Completed(out) => {
                return Err(Error::tag_failed(alias.to_string(), out.failure_details(&inspect)))
            }
            ToolRun::Unavailable(error) => {
                return Err(Error::build_tool_unavailable(inspect.program(), error))
            }
        }

        let rmi = ToolCommand::new(&self.binary).arg("rmi").arg(alias.to_string());
        let out = rmi.run().into_output();
        if out.success {
            Ok(UntagOutcome::Removed)
        } else {
            Err(Error::tag_failed(alias.to_string(), out.failure_details(&rmi)))
        }
    }
}

/// Inspect failed because the alias does not exist, not because docker did.
fn is_missing_image(stderr: &str) -> bool {
    let lower = stderr.to_ascii_lowercase();
    lower.contains("no such image") || lower.contains("no such object")
}
