//! Remote orchestration: bring the stack up on the target, then prune.

use serde::Serialize;
use std::path::Path;

use crate::defaults::SshConfig;
use crate::error::{Error, Result};
use crate::ssh::SshClient;
use crate::target::DeploymentTarget;
use crate::utils::command::ToolCommand;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyOptions {
    /// Non-mutating rehearsal.
    pub dry_run: bool,
    pub stack_id: String,
}

pub trait RemoteOrchestrator {
    /// Apply `manifest` on the target. The manifest's directory is the working
    /// context of the invocation.
    fn apply(&self, target: &DeploymentTarget, manifest: &Path, options: &ApplyOptions) -> Result<()>;

    /// Remove images the target no longer uses.
    fn prune(&self, target: &DeploymentTarget) -> Result<()>;
}

/// `docker --host ssh://… compose up` and `docker image prune` over ssh.
pub struct ComposeOrchestrator {
    pub docker_binary: String,
    pub ssh: SshConfig,
}

impl ComposeOrchestrator {
    pub fn new(docker_binary: impl Into<String>, ssh: SshConfig) -> Self {
        Self {
            docker_binary: docker_binary.into(),
            ssh,
        }
    }

    pub fn apply_command(
        &self,
        target: &DeploymentTarget,
        manifest: &Path,
        options: &ApplyOptions,
    ) -> ToolCommand {
        let file = manifest
            .file_name()
            .map(|f| f.to_string_lossy().to_string())
            .unwrap_or_else(|| manifest.display().to_string());

        let mut cmd = ToolCommand::new(&self.docker_binary).args([
            "--host".to_string(),
            format!("ssh://{}", target.destination()),
            "compose".to_string(),
            "-f".to_string(),
            file,
            "-p".to_string(),
            options.stack_id.clone(),
        ]);
        if options.dry_run {
            cmd = cmd.arg("--dry-run");
        }
        cmd = cmd.args(["up", "-d", "--remove-orphans"]);

        match manifest.parent().filter(|p| !p.as_os_str().is_empty()) {
            Some(dir) => cmd.current_dir(dir),
            None => cmd,
        }
    }
}

impl RemoteOrchestrator for ComposeOrchestrator {
    fn apply(&self, target: &DeploymentTarget, manifest: &Path, options: &ApplyOptions) -> Result<()> {
        let cmd = self.apply_command(target, manifest, options);
        log_debug!("apply", "{}", cmd.display());

        let out = cmd.run().into_output();
        if out.success {
            Ok(())
        } else {
            Err(Error::remote_apply_failed(out.failure_details(&cmd)))
        }
    }

    fn prune(&self, target: &DeploymentTarget) -> Result<()> {
        let client = SshClient::from_target(target, &self.ssh);
        let cmd = client.command("docker image prune -f");
        log_debug!("prune", "{}", cmd.display());

        let out = cmd.run().into_output();
        if out.success {
            Ok(())
        } else {
            Err(Error::remote_prune_failed(out.failure_details(&cmd)))
        }
    }
}
