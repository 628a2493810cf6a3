//! Local image builds from the build manifest.

use std::path::Path;

use crate::error::{Error, Result};
use crate::manifest::{BuildArtifact, BuildManifest};
use crate::utils::command::{ToolCommand, ToolRun};

pub trait ImageBuilder {
    /// Build everything the manifest declares and return the artifacts in
    /// manifest order.
    fn build(&self, manifest: &Path) -> Result<Vec<BuildArtifact>>;
}

/// `docker compose build`, plus a pull for declared images that are not built locally.
pub struct ComposeBuilder {
    pub docker_binary: String,
}

impl ComposeBuilder {
    pub fn new(docker_binary: impl Into<String>) -> Self {
        Self {
            docker_binary: docker_binary.into(),
        }
    }

    /// Compose runs from the manifest's directory so relative build contexts resolve.
    fn compose(&self, manifest: &Path) -> ToolCommand {
        let cmd = ToolCommand::new(&self.docker_binary).args(["compose", "-f"]);
        match (
            manifest.parent().filter(|p| !p.as_os_str().is_empty()),
            manifest.file_name(),
        ) {
            (Some(dir), Some(file)) => cmd
                .arg(file.to_string_lossy().to_string())
                .current_dir(dir),
            _ => cmd.arg(manifest.display().to_string()),
        }
    }

    /// The builder exists when `docker compose version` runs cleanly.
    fn ensure_available(&self) -> Result<()> {
        let cmd = ToolCommand::new(&self.docker_binary).args(["compose", "version"]);
        match cmd.run() {
            ToolRun::Completed(out) if out.success => Ok(()),
            ToolRun::Completed(out) => Err(Error::build_tool_unavailable(
                format!("{} compose", self.docker_binary),
                out.error_text(),
            )),
            ToolRun::Unavailable(error) => Err(Error::build_tool_unavailable(cmd.program(), error)),
        }
    }

    fn run_step(&self, cmd: ToolCommand) -> Result<()> {
        log_debug!("build", "{}", cmd.display());
        match cmd.run() {
            ToolRun::Completed(out) if out.success => Ok(()),
            ToolRun::Completed(out) => Err(Error::build_failed(out.failure_details(&cmd))),
            ToolRun::Unavailable(error) => Err(Error::build_tool_unavailable(cmd.program(), error)),
        }
    }
}

impl ImageBuilder for ComposeBuilder {
    fn build(&self, manifest_path: &Path) -> Result<Vec<BuildArtifact>> {
        let manifest = BuildManifest::load(manifest_path)?;
        self.ensure_available()?;

        self.run_step(self.compose(manifest_path).arg("build"))?;

        if manifest.has_non_buildable() {
            self.run_step(self.compose(manifest_path).args(["pull", "--ignore-buildable"]))?;
        }

        Ok(manifest.artifacts())
    }
}
