//! Running native dump/restore utilities.

use std::fs::File;
use std::path::Path;
use std::process::{Command, Stdio};

use tracing::{debug, info};

use crate::error::{Result, StoreError};

/// An external command line, built up before it is run.
#[derive(Debug)]
pub struct ToolCommand {
    program: String,
    args: Vec<String>,
    envs: Vec<(String, String)>,
}

impl ToolCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Run to completion, optionally wiring a file to stdin.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::ExternalToolFailure` if the program cannot be
    /// started or exits with a non-zero status.
    pub fn run(&self, stdin: Option<&Path>) -> Result<()> {
        info!(tool = %self.program, "running external tool");
        debug!(tool = %self.program, args = ?self.args, "tool arguments");

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        for (key, value) in &self.envs {
            command.env(key, value);
        }
        if let Some(path) = stdin {
            let file = File::open(path).map_err(|source| StoreError::FileUnreadable {
                path: path.to_path_buf(),
                source,
            })?;
            command.stdin(Stdio::from(file));
        }

        let output = command
            .output()
            .map_err(|e| StoreError::ExternalToolFailure {
                tool: self.program.clone(),
                code: None,
                stderr: format!("failed to start: {}", e),
            })?;

        if !output.status.success() {
            return Err(StoreError::ExternalToolFailure {
                tool: self.program.clone(),
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn test_non_zero_exit_is_tool_failure() {
        let err = ToolCommand::new("sh")
            .arg("-c")
            .arg("echo broken >&2; exit 3")
            .run(None)
            .unwrap_err();
        match err {
            StoreError::ExternalToolFailure { tool, code, stderr } => {
                assert_eq!(tool, "sh");
                assert_eq!(code, Some(3));
                assert_eq!(stderr, "broken");
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_missing_program_is_tool_failure() {
        let err = ToolCommand::new("polystore-definitely-not-installed")
            .run(None)
            .unwrap_err();
        assert!(matches!(err, StoreError::ExternalToolFailure { code: None, .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_env_and_stdin_are_passed() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("input.txt");
        std::fs::write(&input, "expected").unwrap();
        ToolCommand::new("sh")
            .arg("-c")
            .arg("test \"$(cat)\" = \"$WANT\"")
            .env("WANT", "expected")
            .run(Some(&input))
            .unwrap();
    }
}
