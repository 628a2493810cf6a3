use clap::Args;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use airlift::address::SystemInterfaces;
use airlift::builder::ComposeBuilder;
use airlift::defaults::{self, Defaults};
use airlift::orchestrator::ComposeOrchestrator;
use airlift::pipeline::{self, Collaborators, DeployReport, PipelineOptions, StagingOptions};
use airlift::relay::RegistryRelay;
use airlift::staging::SshTarFileStore;
use airlift::tagger::DockerTagger;
use airlift::target::DeploymentTarget;
use airlift::tunnel::SshTunnel;

use super::CmdResult;

#[derive(Args)]
pub struct DeployArgs {
    /// Host to deploy to (hostname or IPv4 address)
    pub target_host: Option<String>,

    /// SSH login on the target
    #[arg(short, long)]
    pub user: Option<String>,

    /// Registry port on the target, forwarded to the same local port
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Deployment directory on the target (file-relay mode)
    #[arg(long)]
    pub remote_path: Option<String>,

    /// Local file to place in the deployment directory (repeatable, implies --stage)
    #[arg(long = "file", value_name = "PATH")]
    pub files: Vec<PathBuf>,

    /// Rehearse the remote apply without changing anything; skips pruning
    #[arg(long)]
    pub dry_run: bool,

    /// Compose file describing the images to build
    #[arg(long, value_name = "PATH")]
    pub manifest: Option<PathBuf>,

    /// Compose file applied on the target
    #[arg(long, value_name = "PATH")]
    pub remote_manifest: Option<PathBuf>,

    /// Assemble the remote deployment directory locally before applying
    #[arg(long)]
    pub stage: bool,

    /// Only relay from a local address on the target's /24
    #[arg(long)]
    pub subnet_affinity: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployOutput {
    pub command: String,
    #[serde(flatten)]
    pub report: DeployReport,
}

pub fn run(args: DeployArgs, _global: &crate::commands::GlobalArgs) -> CmdResult<DeployOutput> {
    let defaults = defaults::load_defaults()?;
    let work_dir = std::env::current_dir().map_err(|e| {
        airlift::Error::internal_io(e.to_string(), Some("read working directory".to_string()))
    })?;
    let options = resolve_options(args, &defaults, &work_dir)?;

    crate::tty::status(&format!("Deploying to {}...", options.target.destination()));

    let docker = defaults.docker.binary.as_str();
    let relay = RegistryRelay::new(docker, Duration::from_secs(defaults.relay.request_timeout_secs))?;
    let builder = ComposeBuilder::new(docker);
    let tagger = DockerTagger::new(docker);
    let tunnel = SshTunnel::new(
        defaults.ssh.clone(),
        Duration::from_secs(defaults.tunnel.ready_timeout_secs),
    );
    let files = SshTarFileStore::new(defaults.ssh.clone());
    let orchestrator = ComposeOrchestrator::new(docker, defaults.ssh.clone());

    let collaborators = Collaborators {
        builder: &builder,
        interfaces: &SystemInterfaces,
        tagger: &tagger,
        tunnel: &tunnel,
        relay: &relay,
        files: &files,
        orchestrator: &orchestrator,
    };

    let report = pipeline::run(&options, &collaborators)?;

    Ok((
        DeployOutput {
            command: "deploy".to_string(),
            report,
        },
        0,
    ))
}

/// Merge flags over configured defaults. Flags win.
fn resolve_options(args: DeployArgs, defaults: &Defaults, work_dir: &Path) -> airlift::Result<PipelineOptions> {
    let host = args.target_host.unwrap_or_default();
    let target = DeploymentTarget::new(
        host,
        args.user.unwrap_or_else(|| defaults.target.user.clone()),
        args.port.unwrap_or(defaults.target.port),
        Some(args.remote_path.unwrap_or_else(|| defaults.target.remote_path.clone())),
    )?;

    let resolve = |flag: Option<PathBuf>, configured: &str| -> PathBuf {
        let path = flag.unwrap_or_else(|| PathBuf::from(shellexpand::tilde(configured).to_string()));
        if path.is_absolute() {
            path
        } else {
            work_dir.join(path)
        }
    };

    let staging = (args.stage || !args.files.is_empty()).then(|| StagingOptions {
        files: args.files.iter().map(|f| work_dir.join(f)).collect(),
        staged_manifest_name: defaults.manifests.staged.clone(),
    });

    Ok(PipelineOptions {
        target,
        build_manifest: resolve(args.manifest, &defaults.manifests.build),
        remote_manifest: resolve(args.remote_manifest, &defaults.manifests.remote),
        work_dir: work_dir.to_path_buf(),
        dry_run: args.dry_run,
        subnet_affinity: args.subnet_affinity,
        excluded_prefixes: defaults.discovery.excluded_interface_prefixes.clone(),
        staging,
    })
}
