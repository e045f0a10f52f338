//! Shell execution for recipe steps.
//!
//! Commands run through `sh -c` in an explicit working directory with the
//! step's environment layered over the process environment. Output is
//! captured and logged rather than streamed.

use crate::core::error::StepError;
use std::path::Path;
use std::process::{Command, Stdio};

/// Lines of stderr kept when a command fails.
const STDERR_TAIL_LINES: usize = 20;

/// Run `cmd` in `dir`. Fails with [`StepError::CommandFailed`] on a
/// non-zero exit.
pub fn run_in(dir: &Path, cmd: &str, env: &[(String, String)]) -> Result<String, StepError> {
    tracing::debug!("running in {}: {}", dir.display(), cmd);

    let output = Command::new("sh")
        .args(["-c", cmd])
        .current_dir(dir)
        .envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(Stdio::null())
        .output()?;

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    if !stdout.trim().is_empty() {
        tracing::trace!("stdout: {}", stdout.trim_end());
    }

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let lines: Vec<&str> = stderr.lines().collect();
        let tail = &lines[lines.len().saturating_sub(STDERR_TAIL_LINES)..];
        if !tail.is_empty() {
            tracing::warn!("command failed: {}\n{}", cmd, tail.join("\n"));
        }
        return Err(StepError::CommandFailed {
            cmd: cmd.to_string(),
            code: output.status.code(),
        });
    }

    Ok(stdout)
}

/// Single-quote a value for inclusion in a shell command.
pub fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}
