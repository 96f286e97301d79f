// ABOUTME: Shared subprocess runner for CLI-backed collaborators.
// ABOUTME: Captures output and exposes success, stdout, and stderr.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

#[derive(Debug)]
pub(crate) struct CommandOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// First line of stderr, or stdout as a fallback, for error messages.
    pub fn failure_detail(&self) -> String {
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            return stderr.lines().next().unwrap_or_default().to_string();
        }
        self.stdout.trim().lines().next().unwrap_or_default().to_string()
    }
}

pub(crate) async fn run(
    program: &str,
    args: &[&str],
    cwd: Option<&Path>,
    env: &HashMap<String, String>,
) -> std::io::Result<CommandOutput> {
    let mut command = Command::new(program);
    command
        .args(args)
        .envs(env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    if let Some(dir) = cwd {
        command.current_dir(dir);
    }

    tracing::debug!(program, ?args, "running command");

    let output = command.output().await?;

    Ok(CommandOutput {
        success: output.status.success(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}
