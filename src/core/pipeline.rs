//! The deploy run: build, tag, tunnel, push, verify, apply, prune.
//!
//! Every resource acquired along the way is recorded in [`PipelineState`] the
//! moment it exists. [`run`] releases all of it exactly once, whether the run
//! finished or aborted, in reverse dependency order: tunnel, then aliases,
//! then the scratch directory.

use serde::Serialize;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use crate::address::{self, AddressPolicy, InterfaceSource};
use crate::builder::ImageBuilder;
use crate::error::{Error, Result};
use crate::manifest::BuildArtifact;
use crate::orchestrator::{ApplyOptions, RemoteOrchestrator};
use crate::relay::Relay;
use crate::staging::{self, RemoteFileStore, StagedLayout, StagingRequest};
use crate::tagger::{self, ImageTagger, RelayName, UntagOutcome};
use crate::target::DeploymentTarget;
use crate::transfer;
use crate::tunnel::{CloseOutcome, TunnelHandle, TunnelProvider};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Building,
    Tagging,
    TunnelOpen,
    Pushing,
    Verifying,
    Staging,
    RemoteApply,
    Pruning,
    Done,
    Aborted,
}

/// File-relay mode settings.
#[derive(Debug, Clone)]
pub struct StagingOptions {
    pub files: Vec<PathBuf>,
    pub staged_manifest_name: String,
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub target: DeploymentTarget,
    pub build_manifest: PathBuf,
    pub remote_manifest: PathBuf,
    /// Directory the run was started from; names the stack outside file-relay mode.
    pub work_dir: PathBuf,
    pub dry_run: bool,
    pub subnet_affinity: bool,
    pub excluded_prefixes: Vec<String>,
    pub staging: Option<StagingOptions>,
}

impl PipelineOptions {
    /// Local inputs must exist before anything is built.
    /// Checks everything knowable before the build. Outside file-relay mode
    /// this also settles the stack id, which comes from the working directory.
    fn validate(&self) -> Result<Option<String>> {
        if !self.remote_manifest.is_file() {
            return Err(Error::validation_invalid_argument(
                "remote_manifest",
                "Remote manifest not found",
                Some(self.remote_manifest.display().to_string()),
            ));
        }
        if let Some(staging) = &self.staging {
            if self.target.remote_path.as_deref().map_or(true, str::is_empty) {
                return Err(Error::validation_invalid_argument(
                    "remote_path",
                    "File-relay mode needs the remote deployment directory",
                    None,
                ));
            }
            if let Some(missing) = staging.files.iter().find(|f| !f.is_file()) {
                return Err(Error::validation_invalid_argument(
                    "files_to_copy",
                    "File to copy not found",
                    Some(missing.display().to_string()),
                ));
            }
            return Ok(None);
        }
        staging::stack_id_for(&absolute(&self.work_dir)).map(Some)
    }
}

/// The external effects a run depends on.
pub struct Collaborators<'a> {
    pub builder: &'a dyn ImageBuilder,
    pub interfaces: &'a dyn InterfaceSource,
    pub tagger: &'a dyn ImageTagger,
    pub tunnel: &'a dyn TunnelProvider,
    pub relay: &'a dyn Relay,
    pub files: &'a dyn RemoteFileStore,
    pub orchestrator: &'a dyn RemoteOrchestrator,
}

/// Everything a run has acquired or achieved so far.
#[derive(Default)]
pub struct PipelineState {
    pub relay_address: Option<String>,
    pub relay_names: Vec<RelayName>,
    pub tagged: Vec<RelayName>,
    pub tunnel: Option<TunnelHandle>,
    pub pushed: Vec<RelayName>,
    pub verified: Vec<RelayName>,
    pub scratch: Option<TempDir>,
    pub staged: Option<StagedLayout>,
    pub stack_id: Option<String>,
    pub pruned: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UntagFailure {
    pub relay_name: RelayName,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tunnel: Option<CloseOutcome>,
    pub untagged: Vec<RelayName>,
    pub already_absent: Vec<RelayName>,
    pub untag_failures: Vec<UntagFailure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scratch_removed: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployReport {
    pub run_id: String,
    pub started_at: String,
    pub finished_at: String,
    pub target: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relay_address: Option<String>,
    pub relay_names: Vec<RelayName>,
    pub pushed: Vec<RelayName>,
    pub verified: Vec<RelayName>,
    pub stack_id: String,
    pub dry_run: bool,
    pub pruned: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub staged: Option<StagedLayout>,
    pub stage: Stage,
    pub cleanup: CleanupReport,
}

/// Run a deployment end to end. Cleanup runs once, after the last stage or
/// the first failure. A failure comes back with `stage` and `cleanup` added
/// to its details.
pub fn run(options: &PipelineOptions, collab: &Collaborators) -> Result<DeployReport> {
    let run_id = uuid::Uuid::new_v4().to_string();
    let started_at = chrono::Utc::now().to_rfc3339();
    log_debug!("deploy", "Run {} targeting {}", run_id, options.target.destination());

    let mut state = PipelineState::default();
    let mut stage = Stage::Building;
    let outcome = execute(options, collab, &mut state, &mut stage);
    let cleanup = cleanup(collab, &mut state);

    match outcome {
        Ok(()) => Ok(DeployReport {
            run_id,
            started_at,
            finished_at: chrono::Utc::now().to_rfc3339(),
            target: options.target.destination(),
            relay_address: state.relay_address,
            relay_names: state.relay_names,
            pushed: state.pushed,
            verified: state.verified,
            stack_id: state.stack_id.unwrap_or_default(),
            dry_run: options.dry_run,
            pruned: state.pruned,
            staged: state.staged,
            stage: Stage::Done,
            cleanup,
        }),
        Err(err) => {
            log_status!("deploy", "Aborted during {:?}: {}", stage, err.message);
            Err(err
                .with_detail("runId", serde_json::json!(run_id))
                .with_detail("stage", serde_json::json!(stage))
                .with_detail("cleanup", serde_json::to_value(&cleanup).unwrap_or_default()))
        }
    }
}

fn enter(stage: &mut Stage, next: Stage) {
    log_debug!("deploy", "Entering {:?}", next);
    *stage = next;
}

fn execute(
    options: &PipelineOptions,
    collab: &Collaborators,
    state: &mut PipelineState,
    stage: &mut Stage,
) -> Result<()> {
    let work_dir_stack_id = options.validate()?;

    let artifacts: Vec<BuildArtifact> = collab.builder.build(&options.build_manifest)?;
    log_debug!("build", "{} image(s) built", artifacts.len());

    enter(stage, Stage::Tagging);
    let mut policy = AddressPolicy::new(options.excluded_prefixes.clone());
    if options.subnet_affinity {
        policy = policy.with_subnet(Some(address::target_subnet(&options.target.host)?));
    }
    let local = address::discover(collab.interfaces, &policy)?;
    state.relay_address = Some(local.to_string());
    state.relay_names = tagger::relay_names(local, options.target.port, &artifacts);
    tagger::tag_all(collab.tagger, &artifacts, &state.relay_names, &mut state.tagged)?;

    enter(stage, Stage::TunnelOpen);
    let handle = collab.tunnel.open(&options.target, local)?;
    let endpoint = handle.endpoint();
    state.tunnel = Some(handle);
    collab.relay.probe(&endpoint)?;

    enter(stage, Stage::Pushing);
    transfer::push_all(collab.relay, &state.relay_names, &mut state.pushed)?;

    enter(stage, Stage::Verifying);
    transfer::verify_all(collab.relay, &state.relay_names, &mut state.verified)?;

    let (manifest, stack_id) = match &options.staging {
        Some(staging_options) => {
            enter(stage, Stage::Staging);
            let scratch = staging::create_scratch()?;
            let scratch_path = scratch.path().to_path_buf();
            state.scratch = Some(scratch);
            let request = StagingRequest {
                remote_path: options.target.remote_path.clone().unwrap_or_default(),
                files: staging_options.files.clone(),
                remote_manifest: options.remote_manifest.clone(),
                staged_manifest_name: staging_options.staged_manifest_name.clone(),
            };
            let layout = staging::stage(collab.files, &options.target, &request, &scratch_path)?;
            let resolved = (layout.manifest.clone(), layout.stack_id.clone());
            state.staged = Some(layout);
            resolved
        }
        None => match work_dir_stack_id {
            Some(stack_id) => (options.remote_manifest.clone(), stack_id),
            None => return Err(Error::internal_unexpected("Stack id was not resolved")),
        },
    };
    state.stack_id = Some(stack_id.clone());

    enter(stage, Stage::RemoteApply);
    let apply = ApplyOptions {
        dry_run: options.dry_run,
        stack_id,
    };
    collab.orchestrator.apply(&options.target, &manifest, &apply)?;

    if !options.dry_run {
        enter(stage, Stage::Pruning);
        collab.orchestrator.prune(&options.target)?;
        state.pruned = true;
    }

    enter(stage, Stage::Done);
    Ok(())
}

/// `.` has no file name; resolve it against the process directory.
fn absolute(dir: &Path) -> PathBuf {
    if dir.file_name().is_some() {
        return dir.to_path_buf();
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(dir))
        .ok()
        .and_then(|p| p.canonicalize().ok())
        .unwrap_or_else(|| dir.to_path_buf())
}

/// Release whatever `state` holds. Each step takes its resource out of the
/// state, so a second call finds nothing to do.
pub fn cleanup(collab: &Collaborators, state: &mut PipelineState) -> CleanupReport {
    let mut report = CleanupReport::default();

    if let Some(handle) = state.tunnel.take() {
        let outcome = collab.tunnel.close(handle);
        log_debug!("cleanup", "Tunnel {:?}", outcome);
        report.tunnel = Some(outcome);
    }

    for name in state.tagged.drain(..) {
        match collab.tagger.untag(&name) {
            Ok(UntagOutcome::Removed) => {
                log_debug!("cleanup", "Removed {}", name);
                report.untagged.push(name);
            }
            Ok(UntagOutcome::Absent) => report.already_absent.push(name),
            Err(err) => {
                log_status!("cleanup", "Warning: could not remove {}: {}", name, err.message);
                report.untag_failures.push(UntagFailure {
                    relay_name: name,
                    error: err.message,
                });
            }
        }
    }

    if let Some(scratch) = state.scratch.take() {
        let path = scratch.path().display().to_string();
        match scratch.close() {
            Ok(()) => {
                log_debug!("cleanup", "Removed {}", path);
                report.scratch_removed = Some(path);
            }
            Err(e) => log_status!("cleanup", "Warning: could not remove {}: {}", path, e),
        }
    }

    report
}
