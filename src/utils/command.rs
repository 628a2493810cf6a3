//! External tool execution that tells "tool missing" apart from "tool failed".

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use serde::Serialize;

use crate::error::ToolFailedDetails;
use crate::utils::shell;

/// A program invocation assembled before running.
#[derive(Debug, Clone)]
pub struct ToolCommand {
    program: String,
    args: Vec<String>,
    current_dir: Option<PathBuf>,
}

/// Captured output of a tool that started.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ToolOutput {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub stdout: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub stderr: String,
    pub success: bool,
    pub exit_code: i32,
}

#[derive(Debug)]
pub enum ToolRun {
    /// The process started and exited (successfully or not).
    Completed(ToolOutput),
    /// The program could not be started at all.
    Unavailable(String),
}

impl ToolCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            current_dir: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: &Path) -> Self {
        self.current_dir = Some(dir.to_path_buf());
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Shell-quoted rendering for logs and error details.
    pub fn display(&self) -> String {
        let mut parts = vec![self.program.clone()];
        parts.extend(self.args.iter().cloned());
        shell::quote_args(&parts)
    }

    pub fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        if let Some(dir) = &self.current_dir {
            cmd.current_dir(dir);
        }
        cmd
    }

    pub fn run(&self) -> ToolRun {
        match self.to_command().output() {
            Ok(out) => ToolRun::Completed(ToolOutput::from(out)),
            Err(e) if e.kind() == ErrorKind::NotFound || e.kind() == ErrorKind::PermissionDenied => {
                ToolRun::Unavailable(e.to_string())
            }
            Err(e) => ToolRun::Completed(ToolOutput {
                stdout: String::new(),
                stderr: format!("Command error: {}", e),
                success: false,
                exit_code: -1,
            }),
        }
    }
}

impl From<Output> for ToolOutput {
    fn from(out: Output) -> Self {
        Self {
            stdout: String::from_utf8_lossy(&out.stdout).to_string(),
            stderr: String::from_utf8_lossy(&out.stderr).to_string(),
            success: out.status.success(),
            exit_code: out.status.code().unwrap_or(-1),
        }
    }
}

impl ToolOutput {
    pub fn failure_details(&self, command: &ToolCommand) -> ToolFailedDetails {
        ToolFailedDetails {
            command: command.display(),
            exit_code: self.exit_code,
            stdout: self.stdout.trim().to_string(),
            stderr: self.stderr.trim().to_string(),
        }
    }

    /// Prefers stderr, falls back to stdout if stderr is empty.
    pub fn error_text(&self) -> String {
        if !self.stderr.trim().is_empty() {
            self.stderr.trim().to_string()
        } else {
            self.stdout.trim().to_string()
        }
    }
}

impl ToolRun {
    /// Unavailable tools are reported as a failed run with exit code -1.
    pub fn into_output(self) -> ToolOutput {
        match self {
            ToolRun::Completed(out) => out,
            ToolRun::Unavailable(error) => ToolOutput {
                stdout: String::new(),
                stderr: error,
                success: false,
                exit_code: -1,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_captures_stdout() {
        match ToolCommand::new("echo").arg("hello").run() {
            ToolRun::Completed(out) => {
                assert!(out.success);
                assert_eq!(out.stdout.trim(), "hello");
            }
            ToolRun::Unavailable(e) => panic!("echo unavailable: {}", e),
        }
    }

    #[test]
    fn missing_program_is_unavailable() {
        let run = ToolCommand::new("nonexistent_command_xyz").run();
        assert!(matches!(run, ToolRun::Unavailable(_)));
    }

    #[test]
    fn non_zero_exit_is_completed_failure() {
        match ToolCommand::new("false").run() {
            ToolRun::Completed(out) => {
                assert!(!out.success);
                assert_eq!(out.exit_code, 1);
            }
            ToolRun::Unavailable(e) => panic!("false unavailable: {}", e),
        }
    }

    #[test]
    fn display_quotes_arguments() {
        let cmd = ToolCommand::new("docker").args(["compose", "-f", "my file.yml"]);
        assert_eq!(cmd.display(), "docker compose -f 'my file.yml'");
    }

    #[test]
    fn error_text_falls_back_to_stdout() {
        let out = ToolOutput {
            stdout: "stdout content\n".to_string(),
            stderr: "  ".to_string(),
            success: false,
            exit_code: 1,
        };
        assert_eq!(out.error_text(), "stdout content");
    }
}
