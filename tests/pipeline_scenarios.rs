use std::cell::RefCell;
use std::fs;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use airlift::address::{InterfaceInfo, InterfaceSource};
use airlift::builder::ImageBuilder;
use airlift::error::{ErrorClass, RelayDetails, ToolFailedDetails, TunnelDetails};
use airlift::manifest::BuildArtifact;
use airlift::orchestrator::{ApplyOptions, RemoteOrchestrator};
use airlift::pipeline::{self, Collaborators, PipelineOptions, StagingOptions};
use airlift::relay::Relay;
use airlift::staging::RemoteFileStore;
use airlift::tagger::{ImageTagger, RelayName, UntagOutcome};
use airlift::target::DeploymentTarget;
use airlift::tunnel::{CloseOutcome, TunnelHandle, TunnelProvider};
use airlift::Error;

/// One ordered log shared by every fake, so tests can assert sequencing.
#[derive(Default)]
struct Events(RefCell<Vec<String>>);

impl Events {
    fn push(&self, event: impl Into<String>) {
        self.0.borrow_mut().push(event.into());
    }

    fn all(&self) -> Vec<String> {
        self.0.borrow().clone()
    }

    fn count(&self, prefix: &str) -> usize {
        self.0.borrow().iter().filter(|e| e.starts_with(prefix)).count()
    }

    fn position(&self, event: &str) -> Option<usize> {
        self.0.borrow().iter().position(|e| e == event)
    }
}

struct FakeBuilder<'a> {
    events: &'a Events,
    images: Vec<&'static str>,
    fail: bool,
}

impl ImageBuilder for FakeBuilder<'_> {
    fn build(&self, _manifest: &Path) -> airlift::Result<Vec<BuildArtifact>> {
        self.events.push("build");
        if self.fail {
            return Err(Error::build_tool_unavailable("docker", "not found"));
        }
        Ok(self.images.iter().map(|i| BuildArtifact::parse(i)).collect())
    }
}

struct FakeInterfaces(Vec<InterfaceInfo>);

impl InterfaceSource for FakeInterfaces {
    fn interfaces(&self) -> airlift::Result<Vec<InterfaceInfo>> {
        Ok(self.0.clone())
    }
}

fn lan() -> FakeInterfaces {
    FakeInterfaces(vec![
        InterfaceInfo::new("lo", "127.0.0.1".parse().unwrap(), true),
        InterfaceInfo::new("docker0", "172.17.0.1".parse().unwrap(), false),
        InterfaceInfo::new("eth0", "10.0.0.5".parse().unwrap(), false),
    ])
}

struct FakeTagger<'a> {
    events: &'a Events,
    fail_untag: bool,
}

impl ImageTagger for FakeTagger<'_> {
    fn tag(&self, _local: &BuildArtifact, alias: &RelayName) -> airlift::Result<()> {
        self.events.push(format!("tag {}", alias));
        Ok(())
    }

    fn untag(&self, alias: &RelayName) -> airlift::Result<UntagOutcome> {
        self.events.push(format!("untag {}", alias));
        if self.fail_untag {
            return Err(Error::internal_unexpected("image is in use"));
        }
        Ok(UntagOutcome::Removed)
    }
}

struct FakeTunnel<'a> {
    events: &'a Events,
    fail: bool,
}

impl TunnelProvider for FakeTunnel<'_> {
    fn open(&self, target: &DeploymentTarget, bind: Ipv4Addr) -> airlift::Result<TunnelHandle> {
        self.events.push(format!("tunnel open {}:{}", bind, target.port));
        if self.fail {
            return Err(Error::tunnel_establish_failed(TunnelDetails {
                host: target.host.clone(),
                user: target.user.clone(),
                bind: bind.to_string(),
                port: target.port,
                error: "Permission denied (publickey)".to_string(),
            }));
        }
        Ok(TunnelHandle::detached(bind, target.port, target.host.clone()))
    }

    fn close(&self, mut handle: TunnelHandle) -> CloseOutcome {
        self.events.push("tunnel close");
        handle.terminate()
    }
}

struct FakeRelay<'a> {
    events: &'a Events,
    unreachable: bool,
    fail_push: Option<&'static str>,
    missing: Option<&'static str>,
}

impl Relay for FakeRelay<'_> {
    fn probe(&self, endpoint: &str) -> airlift::Result<()> {
        self.events.push(format!("probe {}", endpoint));
        if self.unreachable {
            return Err(Error::tunnel_relay_unreachable(RelayDetails {
                endpoint: endpoint.to_string(),
                relay_name: None,
                status: None,
                error: Some("connection refused".to_string()),
            }));
        }
        Ok(())
    }

    fn push(&self, name: &RelayName) -> airlift::Result<()> {
        self.events.push(format!("push {}", name));
        if self.fail_push == Some(name.name.as_str()) {
            return Err(Error::internal_unexpected("connection reset"));
        }
        Ok(())
    }

    fn has_repository(&self, name: &RelayName) -> airlift::Result<bool> {
        self.events.push(format!("verify {}", name));
        Ok(self.missing != Some(name.name.as_str()))
    }
}

struct FakeFiles<'a> {
    events: &'a Events,
}

impl RemoteFileStore for FakeFiles<'_> {
    fn fetch(&self, _target: &DeploymentTarget, remote_path: &str, into: &Path) -> airlift::Result<()> {
        self.events.push(format!("fetch {}", remote_path));
        fs::write(into.join(".env"), "TOKEN=remote\n").unwrap();
        Ok(())
    }
}

struct FakeOrchestrator<'a> {
    events: &'a Events,
    fail: bool,
    applied: RefCell<Vec<(PathBuf, ApplyOptions)>>,
}

impl RemoteOrchestrator for FakeOrchestrator<'_> {
    fn apply(&self, _target: &DeploymentTarget, manifest: &Path, options: &ApplyOptions) -> airlift::Result<()> {
        self.events.push("apply");
        assert!(manifest.is_file(), "manifest must exist while applying");
        self.applied
            .borrow_mut()
            .push((manifest.to_path_buf(), options.clone()));
        if self.fail {
            return Err(Error::remote_apply_failed(ToolFailedDetails {
                command: "docker compose up -d --remove-orphans".to_string(),
                exit_code: 1,
                stdout: String::new(),
                stderr: "no space left on device".to_string(),
            }));
        }
        Ok(())
    }

    fn prune(&self, _target: &DeploymentTarget) -> airlift::Result<()> {
        self.events.push("prune");
        Ok(())
    }
}

/// Fakes with every knob at its passing setting.
struct Harness<'a> {
    builder: FakeBuilder<'a>,
    interfaces: FakeInterfaces,
    tagger: FakeTagger<'a>,
    tunnel: FakeTunnel<'a>,
    relay: FakeRelay<'a>,
    files: FakeFiles<'a>,
    orchestrator: FakeOrchestrator<'a>,
}

impl<'a> Harness<'a> {
    fn new(events: &'a Events, images: Vec<&'static str>) -> Self {
        Self {
            builder: FakeBuilder {
                events,
                images,
                fail: false,
            },
            interfaces: lan(),
            tagger: FakeTagger {
                events,
                fail_untag: false,
            },
            tunnel: FakeTunnel { events, fail: false },
            relay: FakeRelay {
                events,
                unreachable: false,
                fail_push: None,
                missing: None,
            },
            files: FakeFiles { events },
            orchestrator: FakeOrchestrator {
                events,
                fail: false,
                applied: RefCell::new(Vec::new()),
            },
        }
    }

    fn collaborators(&self) -> Collaborators<'_> {
        Collaborators {
            builder: &self.builder,
            interfaces: &self.interfaces,
            tagger: &self.tagger,
            tunnel: &self.tunnel,
            relay: &self.relay,
            files: &self.files,
            orchestrator: &self.orchestrator,
        }
    }
}

struct Workspace {
    dir: tempfile::TempDir,
}

impl Workspace {
    fn new() -> Self {
        let dir = tempfile::Builder::new().prefix("Web App.").tempdir().unwrap();
        fs::write(dir.path().join("docker-compose.yml"), "services: {}\n").unwrap();
        fs::write(dir.path().join("docker-compose.remote.yml"), "services: {}\n").unwrap();
        Self { dir }
    }

    fn options(&self) -> PipelineOptions {
        PipelineOptions {
            target: DeploymentTarget::new("edge01", "root", 5000, Some("/etc/airlift".to_string())).unwrap(),
            build_manifest: self.dir.path().join("docker-compose.yml"),
            remote_manifest: self.dir.path().join("docker-compose.remote.yml"),
            work_dir: self.dir.path().to_path_buf(),
            dry_run: false,
            subnet_affinity: false,
            excluded_prefixes: vec!["docker".to_string(), "veth".to_string()],
            staging: None,
        }
    }
}

#[test]
fn relays_every_image_before_applying() {
    let events = Events::default();
    let harness = Harness::new(&events, vec!["app-a", "app-b"]);
    let ws = Workspace::new();

    let report = pipeline::run(&ws.options(), &harness.collaborators()).unwrap();

    let names: Vec<String> = report.relay_names.iter().map(|n| n.to_string()).collect();
    assert_eq!(names, vec!["10.0.0.5:5000/app-a", "10.0.0.5:5000/app-b"]);
    assert_eq!(report.pushed.len(), 2);
    assert_eq!(report.verified.len(), 2);
    assert!(report.pruned);

    let apply = events.position("apply").unwrap();
    assert!(events.position("verify 10.0.0.5:5000/app-b").unwrap() < apply);
    assert!(apply < events.position("prune").unwrap());
    assert!(events.position("prune").unwrap() < events.position("tunnel close").unwrap());
    assert_eq!(events.count("untag "), 2);
}

#[test]
fn missing_artifact_aborts_before_apply_and_cleans_up() {
    let events = Events::default();
    let mut harness = Harness::new(&events, vec!["app-a", "app-b"]);
    harness.relay.missing = Some("app-b");
    let ws = Workspace::new();

    let err = pipeline::run(&ws.options(), &harness.collaborators()).unwrap_err();

    assert_eq!(err.code.as_str(), "verify.artifact_missing");
    assert_eq!(err.class(), ErrorClass::Verification);
    assert_eq!(err.details["stage"], "verifying");
    assert_eq!(events.count("apply"), 0);
    assert_eq!(events.count("prune"), 0);
    assert_eq!(events.count("tunnel close"), 1);
    assert!(events.position("untag 10.0.0.5:5000/app-a").is_some());
    assert!(events.position("untag 10.0.0.5:5000/app-b").is_some());
}

#[test]
fn empty_manifest_still_applies() {
    let events = Events::default();
    let harness = Harness::new(&events, vec![]);
    let ws = Workspace::new();

    let report = pipeline::run(&ws.options(), &harness.collaborators()).unwrap();

    assert!(report.relay_names.is_empty());
    assert_eq!(events.count("tag "), 0);
    assert_eq!(events.count("push "), 0);
    assert_eq!(events.count("apply"), 1);
}

#[test]
fn no_usable_address_never_opens_tunnel() {
    let events = Events::default();
    let mut harness = Harness::new(&events, vec!["app-a"]);
    harness.interfaces = FakeInterfaces(vec![
        InterfaceInfo::new("lo", "127.0.0.1".parse().unwrap(), true),
        InterfaceInfo::new("docker0", "172.17.0.1".parse().unwrap(), false),
    ]);
    let ws = Workspace::new();

    let err = pipeline::run(&ws.options(), &harness.collaborators()).unwrap_err();

    assert_eq!(err.class(), ErrorClass::AddressDiscovery);
    assert_eq!(events.count("tunnel"), 0);
    assert_eq!(events.count("tag "), 0);
    assert!(err.details["cleanup"]["tunnel"].is_null());
}

#[test]
fn dry_run_flags_apply_and_skips_prune() {
    let events = Events::default();
    let harness = Harness::new(&events, vec!["app-a"]);
    let ws = Workspace::new();
    let mut options = ws.options();
    options.dry_run = true;

    let report = pipeline::run(&options, &harness.collaborators()).unwrap();

    assert!(report.dry_run);
    assert!(!report.pruned);
    assert_eq!(events.count("prune"), 0);
    let applied = harness.orchestrator.applied.borrow();
    assert!(applied[0].1.dry_run);
}

#[test]
fn push_failure_untags_everything_tagged() {
    let events = Events::default();
    let mut harness = Harness::new(&events, vec!["app-a", "app-b", "app-c"]);
    harness.relay.fail_push = Some("app-b");
    let ws = Workspace::new();

    let err = pipeline::run(&ws.options(), &harness.collaborators()).unwrap_err();

    assert_eq!(err.details["stage"], "pushing");
    assert_eq!(events.count("push "), 2);
    assert_eq!(events.count("verify "), 0);
    assert_eq!(events.count("untag "), 3);
    assert_eq!(events.count("tunnel close"), 1);
}

#[test]
fn tunnel_failure_skips_close_but_untags() {
    let events = Events::default();
    let mut harness = Harness::new(&events, vec!["app-a"]);
    harness.tunnel.fail = true;
    let ws = Workspace::new();

    let err = pipeline::run(&ws.options(), &harness.collaborators()).unwrap_err();

    assert_eq!(err.class(), ErrorClass::Tunnel);
    assert_eq!(events.count("tunnel close"), 0);
    assert_eq!(events.count("push "), 0);
    assert_eq!(events.count("untag "), 1);
}

#[test]
fn untag_failures_are_reported_not_fatal() {
    let events = Events::default();
    let mut harness = Harness::new(&events, vec!["app-a", "app-b"]);
    harness.tagger.fail_untag = true;
    let ws = Workspace::new();

    let report = pipeline::run(&ws.options(), &harness.collaborators()).unwrap();

    assert_eq!(report.cleanup.untag_failures.len(), 2);
    assert!(report.cleanup.untagged.is_empty());
    assert_eq!(events.count("untag "), 2);
}

#[test]
fn build_failure_acquires_nothing() {
    let events = Events::default();
    let mut harness = Harness::new(&events, vec!["app-a"]);
    harness.builder.fail = true;
    let ws = Workspace::new();

    let err = pipeline::run(&ws.options(), &harness.collaborators()).unwrap_err();

    assert_eq!(err.code.as_str(), "build.tool_unavailable");
    assert_eq!(err.class(), ErrorClass::Build);
    assert_eq!(events.all(), vec!["build"]);
}

#[test]
fn stack_id_comes_from_working_directory_name() {
    let events = Events::default();
    let harness = Harness::new(&events, vec![]);
    let ws = Workspace::new();

    let report = pipeline::run(&ws.options(), &harness.collaborators()).unwrap();

    assert!(report.stack_id.starts_with("web-app-"), "{}", report.stack_id);
    let applied = harness.orchestrator.applied.borrow();
    assert_eq!(applied[0].1.stack_id, report.stack_id);
    assert_eq!(applied[0].0, ws.dir.path().join("docker-compose.remote.yml"));
}

#[test]
fn file_relay_applies_from_scratch_and_removes_it() {
    let events = Events::default();
    let harness = Harness::new(&events, vec!["app-a"]);
    let ws = Workspace::new();
    let extra = ws.dir.path().join("nginx.conf");
    fs::write(&extra, "server {}\n").unwrap();
    let mut options = ws.options();
    options.staging = Some(StagingOptions {
        files: vec![extra],
        staged_manifest_name: "docker-compose.yml".to_string(),
    });

    let report = pipeline::run(&options, &harness.collaborators()).unwrap();

    let applied = harness.orchestrator.applied.borrow();
    let manifest = &applied[0].0;
    let scratch = manifest.parent().unwrap();
    assert_eq!(manifest.file_name().unwrap(), "docker-compose.yml");
    assert!(report.stack_id.starts_with("airlift-stage-"));
    assert!(!scratch.exists());
    assert_eq!(report.cleanup.scratch_removed.as_deref(), Some(scratch.to_str().unwrap()));
    assert_eq!(events.position("fetch /etc/airlift").unwrap() + 1, events.position("apply").unwrap());
}

#[test]
fn missing_overlay_file_is_rejected_before_build() {
    let events = Events::default();
    let harness = Harness::new(&events, vec!["app-a"]);
    let ws = Workspace::new();
    let mut options = ws.options();
    options.staging = Some(StagingOptions {
        files: vec![ws.dir.path().join("absent.conf")],
        staged_manifest_name: "docker-compose.yml".to_string(),
    });

    let err = pipeline::run(&options, &harness.collaborators()).unwrap_err();

    assert_eq!(err.code.as_str(), "validation.invalid_argument");
    assert!(events.all().is_empty());
}

#[test]
fn unreachable_relay_closes_tunnel_and_untags() {
    let events = Events::default();
    let mut harness = Harness::new(&events, vec!["app-a", "app-b"]);
    harness.relay.unreachable = true;
    let ws = Workspace::new();

    let err = pipeline::run(&ws.options(), &harness.collaborators()).unwrap_err();

    assert_eq!(err.code.as_str(), "tunnel.relay_unreachable");
    assert_eq!(err.class(), ErrorClass::Tunnel);
    assert_eq!(err.details["stage"], "tunnel_open");
    assert_eq!(err.details["cleanup"]["tunnel"], "detached");
    assert_eq!(events.count("push "), 0);
    assert_eq!(events.count("tunnel close"), 1);
    assert!(events.position("probe 10.0.0.5:5000").unwrap() < events.position("tunnel close").unwrap());
    assert!(events.position("untag 10.0.0.5:5000/app-a").is_some());
    assert!(events.position("untag 10.0.0.5:5000/app-b").is_some());
}

#[test]
fn failed_apply_still_removes_scratch() {
    let events = Events::default();
    let mut harness = Harness::new(&events, vec!["app-a"]);
    harness.orchestrator.fail = true;
    let ws = Workspace::new();
    let mut options = ws.options();
    options.staging = Some(StagingOptions {
        files: vec![],
        staged_manifest_name: "docker-compose.yml".to_string(),
    });

    let err = pipeline::run(&options, &harness.collaborators()).unwrap_err();

    assert_eq!(err.code.as_str(), "remote.apply_failed");
    assert_eq!(err.class(), ErrorClass::RemoteApply);
    assert_eq!(err.details["stage"], "remote_apply");
    let applied = harness.orchestrator.applied.borrow();
    let scratch = applied[0].0.parent().unwrap().to_path_buf();
    assert!(!scratch.exists());
    assert_eq!(err.details["cleanup"]["scratchRemoved"], scratch.to_str().unwrap());
    assert_eq!(events.count("prune"), 0);
    assert_eq!(events.count("tunnel close"), 1);
    assert_eq!(events.count("untag "), 1);
}
