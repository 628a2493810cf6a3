//! File-relay mode: assemble the remote deployment directory locally.
//!
//! The remote directory is fetched into a scratch directory, requested local
//! files are laid over it, and the remote manifest lands under the staged
//! manifest name. Orchestration then runs rooted at the scratch directory.

use serde::Serialize;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tempfile::TempDir;

use crate::defaults::SshConfig;
use crate::error::{Error, Result};
use crate::ssh::SshClient;
use crate::target::DeploymentTarget;
use crate::utils::shell;
use crate::utils::slugify::sanitize_identifier;

pub trait RemoteFileStore {
    /// Copy the contents of `remote_path` on the target into `into`.
    fn fetch(&self, target: &DeploymentTarget, remote_path: &str, into: &Path) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct StagingRequest {
    pub remote_path: String,
    pub files: Vec<PathBuf>,
    pub remote_manifest: PathBuf,
    pub staged_manifest_name: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StagedLayout {
    pub directory: PathBuf,
    pub manifest: PathBuf,
    pub stack_id: String,
    pub overlaid: Vec<String>,
}

pub fn create_scratch() -> Result<TempDir> {
    tempfile::Builder::new()
        .prefix("airlift-stage-")
        .tempdir()
        .map_err(|e| Error::internal_io(e.to_string(), Some("create scratch directory".to_string())))
}

/// Stack identifier derived from a directory's own name.
pub fn stack_id_for(dir: &Path) -> Result<String> {
    let name = dir
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    sanitize_identifier(&name, "stack_id")
}

pub fn stage(
    store: &dyn RemoteFileStore,
    target: &DeploymentTarget,
    request: &StagingRequest,
    scratch: &Path,
) -> Result<StagedLayout> {
    log_debug!("stage", "Fetching {}:{} into {}", target.host, request.remote_path, scratch.display());
    store.fetch(target, &request.remote_path, scratch)?;

    let mut overlaid = Vec::new();
    for file in &request.files {
        let name = file_name(file)?;
        copy_into(file, &scratch.join(&name))?;
        log_debug!("stage", "Overlaid {}", name);
        overlaid.push(name);
    }

    let manifest = scratch.join(&request.staged_manifest_name);
    copy_into(&request.remote_manifest, &manifest)?;
    log_debug!(
        "stage",
        "{} staged as {}",
        request.remote_manifest.display(),
        request.staged_manifest_name
    );

    Ok(StagedLayout {
        directory: scratch.to_path_buf(),
        manifest,
        stack_id: stack_id_for(scratch)?,
        overlaid,
    })
}

fn file_name(path: &Path) -> Result<String> {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or_else(|| {
            Error::validation_invalid_argument(
                "files_to_copy",
                "Path must name a file",
                Some(path.display().to_string()),
            )
        })
}

fn copy_into(from: &Path, to: &Path) -> Result<()> {
    fs::copy(from, to).map(|_| ()).map_err(|e| {
        Error::internal_io(
            e.to_string(),
            Some(format!("copy {} to {}", from.display(), to.display())),
        )
    })
}

/// `ssh … tar -cf - .` piped into a local `tar -xf -`.
pub struct SshTarFileStore {
    pub ssh: SshConfig,
}

impl SshTarFileStore {
    pub fn new(ssh: SshConfig) -> Self {
        Self { ssh }
    }
}

impl RemoteFileStore for SshTarFileStore {
    fn fetch(&self, target: &DeploymentTarget, remote_path: &str, into: &Path) -> Result<()> {
        let client = SshClient::from_target(target, &self.ssh);
        let remote = format!("tar -C {} -cf - .", shell::quote_path(remote_path));
        let failed = |problem: String| {
            Error::remote_stage_failed(
                format!("Could not fetch {} from {}", remote_path, target.host),
                serde_json::json!({ "remotePath": remote_path, "host": target.host, "error": problem }),
            )
        };

        let mut ssh = client
            .command(&remote)
            .to_command()
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| failed(format!("{}: {}", client.binary, e)))?;

        let Some(stream) = ssh.stdout.take() else {
            let _ = ssh.kill();
            let _ = ssh.wait();
            return Err(failed("ssh stdout was not captured".to_string()));
        };

        let untar = Command::new("tar")
            .arg("-xf")
            .arg("-")
            .arg("-C")
            .arg(into)
            .stdin(stream)
            .output();

        let mut ssh_stderr = String::new();
        if let Some(mut pipe) = ssh.stderr.take() {
            let _ = pipe.read_to_string(&mut ssh_stderr);
        }
        let ssh_status = ssh.wait().map_err(|e| failed(e.to_string()))?;

        if !ssh_status.success() {
            return Err(failed(format!("remote tar exited ({}): {}", ssh_status, ssh_stderr.trim())));
        }
        match untar {
            Ok(out) if out.status.success() => Ok(()),
            Ok(out) => Err(failed(format!(
                "local tar failed: {}",
                String::from_utf8_lossy(&out.stderr).trim()
            ))),
            Err(e) => Err(failed(format!("local tar: {}", e))),
        }
    }
}
