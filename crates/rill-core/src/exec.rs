//! Child-process runner.
//!
//! Commands go through the platform shell; stdout and stderr are forwarded
//! to the logger and the exit code is returned. The sync variant blocks
//! the engine and exists for processors that cannot yield.

use std::path::PathBuf;

use crate::Result;

/// Options for a spawned command.
#[derive(Debug, Clone, Default)]
pub struct ExecOptions {
    /// Working directory; defaults to the process working directory.
    pub cwd: Option<PathBuf>,
    /// Extra environment variables.
    pub env: Vec<(String, String)>,
}

fn shell_args(command: &str) -> (&'static str, [&str; 2]) {
    if cfg!(target_os = "windows") {
        ("cmd", ["/C", command])
    } else {
        ("sh", ["-c", command])
    }
}

fn log_output(stdout: &[u8], stderr: &[u8]) {
    for line in String::from_utf8_lossy(stdout).lines() {
        tracing::info!(target: "rill::exec", "{}", line);
    }
    for line in String::from_utf8_lossy(stderr).lines() {
        tracing::error!(target: "rill::exec", "{}", line);
    }
}

/// Run a command asynchronously, returning its exit code.
pub async fn exec(command: &str, options: &ExecOptions) -> Result<i32> {
    let (shell, args) = shell_args(command);
    let mut cmd = tokio::process::Command::new(shell);
    cmd.args(args);
    if let Some(cwd) = &options.cwd {
        cmd.current_dir(cwd);
    }
    for (key, value) in &options.env {
        cmd.env(key, value);
    }
    let output = cmd.output().await?;
    log_output(&output.stdout, &output.stderr);
    Ok(output.status.code().unwrap_or(-1))
}

/// Run a command synchronously, blocking the engine until it exits.
pub fn exec_sync(command: &str, options: &ExecOptions) -> Result<i32> {
    let (shell, args) = shell_args(command);
    let mut cmd = std::process::Command::new(shell);
    cmd.args(args);
    if let Some(cwd) = &options.cwd {
        cmd.current_dir(cwd);
    }
    for (key, value) in &options.env {
        cmd.env(key, value);
    }
    let output = cmd.output()?;
    log_output(&output.stdout, &output.stderr);
    Ok(output.status.code().unwrap_or(-1))
}
