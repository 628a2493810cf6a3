//! SSH port forward between a local address and the registry port on the target.

use serde::Serialize;
use std::fs::File;
use std::io::{ErrorKind, Read, Seek, SeekFrom};
use std::net::{Ipv4Addr, SocketAddr, TcpStream};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use crate::defaults::SshConfig;
use crate::error::{Error, Result, TunnelDetails};
use crate::target::DeploymentTarget;

/// A live forward. Owns the forwarding process; dropping an open handle
/// terminates it.
#[derive(Debug)]
pub struct TunnelHandle {
    pub bind: Ipv4Addr,
    pub port: u16,
    pub host: String,
    process: Option<Child>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseOutcome {
    Terminated,
    /// The process had exited on its own before close.
    AlreadyExited,
    /// The handle never owned a process.
    Detached,
}

impl TunnelHandle {
    pub fn new(bind: Ipv4Addr, port: u16, host: impl Into<String>, process: Child) -> Self {
        Self {
            bind,
            port,
            host: host.into(),
            process: Some(process),
        }
    }

    /// A handle with no backing process, for forwards managed elsewhere.
    pub fn detached(bind: Ipv4Addr, port: u16, host: impl Into<String>) -> Self {
        Self {
            bind,
            port,
            host: host.into(),
            process: None,
        }
    }

    /// `bind:port`, where the relay answers locally.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn pid(&self) -> Option<u32> {
        self.process.as_ref().map(|c| c.id())
    }

    /// Stop the process if it is still running. Safe to call more than once.
    pub fn terminate(&mut self) -> CloseOutcome {
        let Some(mut child) = self.process.take() else {
            return CloseOutcome::Detached;
        };

        match child.try_wait() {
            Ok(Some(_)) | Err(_) => return CloseOutcome::AlreadyExited,
            Ok(None) => {}
        }

        #[cfg(unix)]
        signal_group(child.id(), libc::SIGTERM);

        for _ in 0..10 {
            if let Ok(Some(_)) = child.try_wait() {
                return CloseOutcome::Terminated;
            }
            thread::sleep(Duration::from_millis(100));
        }

        #[cfg(unix)]
        signal_group(child.id(), libc::SIGKILL);
        let _ = child.kill();
        let _ = child.wait();
        CloseOutcome::Terminated
    }
}

impl Drop for TunnelHandle {
    fn drop(&mut self) {
        if self.process.is_some() {
            self.terminate();
        }
    }
}

#[cfg(unix)]
fn signal_group(pid: u32, signal: i32) {
    // The ssh child leads its own process group (see `process_group(0)` below).
    let rc = unsafe { libc::killpg(pid as libc::pid_t, signal) };
    if rc != 0 {
        log_status!(
            "tunnel",
            "Failed to signal tunnel process {}: {}",
            pid,
            std::io::Error::last_os_error()
        );
    }
}

pub trait TunnelProvider {
    /// Forward `bind:port` locally to `localhost:port` on the target.
    fn open(&self, target: &DeploymentTarget, bind: Ipv4Addr) -> Result<TunnelHandle>;

    fn close(&self, handle: TunnelHandle) -> CloseOutcome;
}

/// `ssh -N -L` forward.
pub struct SshTunnel {
    pub ssh: SshConfig,
    pub ready_timeout: Duration,
}

impl SshTunnel {
    pub fn new(ssh: SshConfig, ready_timeout: Duration) -> Self {
        Self { ssh, ready_timeout }
    }

    pub fn build_args(&self, target: &DeploymentTarget, bind: Ipv4Addr) -> Vec<String> {
        let mut args = vec!["-N".to_string(), "-T".to_string()];

        if let Some(identity_file) = self.ssh.identity_file.as_deref().filter(|p| !p.is_empty()) {
            args.push("-i".to_string());
            args.push(shellexpand::tilde(identity_file).to_string());
        }

        for option in [
            "ExitOnForwardFailure=yes".to_string(),
            "BatchMode=yes".to_string(),
            format!("ConnectTimeout={}", self.ssh.connect_timeout_secs),
            "ServerAliveInterval=15".to_string(),
            "ServerAliveCountMax=3".to_string(),
        ] {
            args.push("-o".to_string());
            args.push(option);
        }
        args.extend(self.ssh.extra_options.iter().cloned());

        args.push("-L".to_string());
        args.push(format!("{}:{}:localhost:{}", bind, target.port, target.port));
        args.push(target.destination());
        args
    }

    fn failure(&self, target: &DeploymentTarget, bind: Ipv4Addr, error: impl Into<String>) -> Error {
        Error::tunnel_establish_failed(TunnelDetails {
            host: target.host.clone(),
            user: target.user.clone(),
            bind: bind.to_string(),
            port: target.port,
            error: error.into(),
        })
    }
}

impl TunnelProvider for SshTunnel {
    fn open(&self, target: &DeploymentTarget, bind: Ipv4Addr) -> Result<TunnelHandle> {
        let local = SocketAddr::from((bind, target.port));
        if accepts_connections(local) {
            return Err(self
                .failure(target, bind, format!("{} is already in use", local))
                .with_hint("Another tunnel or registry may already be bound to this port"));
        }

        let args = self.build_args(target, bind);
        log_debug!("tunnel", "{} {}", self.ssh.binary, args.join(" "));

        // ssh outlives this call, so its stderr goes to a file nobody has to drain.
        let mut ssh_log = tempfile::tempfile()
            .map_err(|e| self.failure(target, bind, format!("ssh log file: {}", e)))?;
        let stderr = ssh_log
            .try_clone()
            .map_err(|e| self.failure(target, bind, format!("ssh log file: {}", e)))?;

        let mut cmd = Command::new(&self.ssh.binary);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::from(stderr));
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        let child = cmd.spawn().map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                self.failure(target, bind, format!("'{}' not found: {}", self.ssh.binary, e))
            } else {
                self.failure(target, bind, e.to_string())
            }
        })?;
        let mut handle = TunnelHandle::new(bind, target.port, target.host.clone(), child);

        let deadline = Instant::now() + self.ready_timeout;
        loop {
            if let Some(child) = handle.process.as_mut() {
                if let Ok(Some(status)) = child.try_wait() {
                    handle.process = None;
                    return Err(self.failure(
                        target,
                        bind,
                        format!("ssh exited ({}): {}", status, log_tail(&mut ssh_log)),
                    ));
                }
            }

            if accepts_connections(local) {
                log_debug!("tunnel", "Forward {} is up (pid {:?})", local, handle.pid());
                return Ok(handle);
            }

            if Instant::now() >= deadline {
                handle.terminate();
                return Err(self.failure(
                    target,
                    bind,
                    format!("forward not ready after {}s", self.ready_timeout.as_secs()),
                ));
            }
            thread::sleep(Duration::from_millis(200));
        }
    }

    fn close(&self, mut handle: TunnelHandle) -> CloseOutcome {
        let outcome = handle.terminate();
        log_debug!("tunnel", "Closed forward {} ({:?})", handle.endpoint(), outcome);
        outcome
    }
}

/// Last lines ssh wrote, enough to carry its own diagnosis.
fn log_tail(log: &mut File) -> String {
    let mut text = String::new();
    if log.seek(SeekFrom::Start(0)).is_ok() {
        let _ = log.read_to_string(&mut text);
    }
    let mut lines: Vec<&str> = text.lines().rev().filter(|l| !l.trim().is_empty()).take(5).collect();
    lines.reverse();
    lines.join("\n")
}

fn accepts_connections(addr: SocketAddr) -> bool {
    TcpStream::connect_timeout(&addr, Duration::from_millis(300)).is_ok()
}
