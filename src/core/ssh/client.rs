use crate::defaults::SshConfig;
use crate::target::DeploymentTarget;
use crate::utils::command::ToolCommand;

/// Non-interactive command execution on the target host.
pub struct SshClient {
    pub binary: String,
    pub destination: String,
    pub identity_file: Option<String>,
    pub connect_timeout_secs: u64,
    pub extra_options: Vec<String>,
}

impl SshClient {
    pub fn from_target(target: &DeploymentTarget, config: &SshConfig) -> Self {
        let identity_file = config
            .identity_file
            .as_deref()
            .filter(|p| !p.is_empty())
            .map(|p| shellexpand::tilde(p).to_string());

        Self {
            binary: config.binary.clone(),
            destination: target.destination(),
            identity_file,
            connect_timeout_secs: config.connect_timeout_secs,
            extra_options: config.extra_options.clone(),
        }
    }

    pub fn build_ssh_args(&self, command: &str) -> Vec<String> {
        let mut args = Vec::new();

        if let Some(identity_file) = &self.identity_file {
            args.push("-i".to_string());
            args.push(identity_file.clone());
        }

        // Never prompt, and give up on stalled connections.
        args.extend([
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.connect_timeout_secs),
            "-o".to_string(),
            "ServerAliveInterval=15".to_string(),
            "-o".to_string(),
            "ServerAliveCountMax=3".to_string(),
        ]);
        args.extend(self.extra_options.iter().cloned());

        args.push(self.destination.clone());
        args.push(command.to_string());
        args
    }

    pub fn command(&self, remote_command: &str) -> ToolCommand {
        ToolCommand::new(&self.binary).args(self.build_ssh_args(remote_command))
    }
}
