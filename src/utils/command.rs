//! Command execution primitives with consistent error handling.

use serde::Serialize;
use std::io::Write;
use std::process::{Command, Stdio};
use std::thread;

use crate::error::{Error, Result};

/// Captured output from command execution.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CapturedOutput {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub stdout: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub stderr: String,
}

impl CapturedOutput {
    pub fn new(stdout: String, stderr: String) -> Self {
        Self { stdout, stderr }
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

/// Result of a finished shell command.
#[derive(Debug, Clone)]
pub struct ShellOutput {
    pub success: bool,
    /// Exit code, or -1 when the process was ended by a signal.
    pub exit_code: i32,
    pub output: CapturedOutput,
}

fn shell_command(command: &str) -> Command {
    #[cfg(windows)]
    {
        let mut cmd = Command::new("cmd");
        cmd.args(["/C", command]);
        cmd
    }

    #[cfg(not(windows))]
    {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", command]);
        cmd
    }
}

/// Run a command line through the platform shell.
///
/// `input` is written to the child's stdin. Each `envs` entry sets the
/// variable when `Some` and removes any inherited value when `None`.
/// A non-zero exit is reported in the returned output, not as an error.
pub fn run_shell(
    command: &str,
    input: Option<&[u8]>,
    envs: &[(&str, Option<&str>)],
    context: &str,
) -> Result<ShellOutput> {
    let mut cmd = shell_command(command);
    for (key, value) in envs {
        match value {
            Some(value) => cmd.env(key, value),
            None => cmd.env_remove(key),
        };
    }

    let mut child = cmd
        .stdin(if input.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| {
            Error::internal_io(
                format!("Failed to run {}: {}", context, e),
                Some(context.to_string()),
            )
        })?;

    let writer = match (input, child.stdin.take()) {
        (Some(bytes), Some(mut stdin)) => {
            let bytes = bytes.to_vec();
            Some(thread::spawn(move || stdin.write_all(&bytes)))
        }
        _ => None,
    };

    let output = child.wait_with_output().map_err(|e| {
        Error::internal_io(
            format!("Failed to wait for {}: {}", context, e),
            Some(context.to_string()),
        )
    })?;

    if let Some(writer) = writer {
        // The child may exit without reading its input; a broken pipe is fine then.
        let _ = writer.join();
    }

    Ok(ShellOutput {
        success: output.status.success(),
        exit_code: output.status.code().unwrap_or(-1),
        output: CapturedOutput::new(
            String::from_utf8_lossy(&output.stdout).to_string(),
            String::from_utf8_lossy(&output.stderr).to_string(),
        ),
    })
}
