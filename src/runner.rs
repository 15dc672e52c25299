use anyhow::{Context, Result};
use std::fmt;
use std::process::{Command, Stdio};

/// Output of a finished command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Turn a non-zero exit into an error carrying stderr
    pub fn check(self, cmd: &str, args: &[&str]) -> Result<Self> {
        if self.success {
            Ok(self)
        } else {
            anyhow::bail!(
                "Command failed: {} {}: {}",
                cmd,
                args.join(" "),
                self.stderr.trim()
            )
        }
    }
}

/// Runs external commands; providers take one so tests can script it
pub trait CommandRunner: Send + Sync + fmt::Debug {
    fn run(&self, cmd: &str, args: &[&str]) -> Result<CommandOutput>;
}

/// Runs commands on the host
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, cmd: &str, args: &[&str]) -> Result<CommandOutput> {
        let output = Command::new(cmd)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .with_context(|| format!("Failed to execute: {} {}", cmd, args.join(" ")))?;

        Ok(CommandOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

/// Check if a command exists
pub fn command_exists(cmd: &str) -> bool {
    Command::new("which")
        .arg(cmd)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn test_system_runner_captures_output() {
        let output = SystemRunner.run("sh", &["-c", "echo hello; echo oops >&2"]).unwrap();
        assert!(output.success);
        assert_eq!(output.stdout, "hello");
        assert_eq!(output.stderr, "oops");
    }

    #[cfg(unix)]
    #[test]
    fn test_check_rejects_failure() {
        let output = SystemRunner.run("sh", &["-c", "echo bad >&2; exit 3"]).unwrap();
        assert!(!output.success);
        let err = output.check("sh", &["-c"]).unwrap_err();
        assert!(err.to_string().contains("bad"));
    }

    #[test]
    fn test_missing_command_is_an_error() {
        assert!(SystemRunner.run("definitely-not-a-command-12345", &[]).is_err());
        assert!(!command_exists("definitely-not-a-command-12345"));
    }
}
