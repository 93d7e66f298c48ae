use std::path::Path;
use std::process::Command;

use crate::Result;

#[derive(Debug, Fail)]
enum ProcessErrKind {
    #[fail(display = "failed to spawn '{}': {}", _0, _1)]
    SpawnFailed(String, String),
    #[fail(display = "'{}' exited with {}: {}", _0, _1, _2)]
    NonZeroExit(String, String, String),
}

/// Runs `binary args...` in `dir`, returning its stdout on success. Used by
/// module kinds that shell out to a provisioning tool, mirroring the
/// teacher's own pattern of invoking an external binary and surfacing its
/// stderr on failure rather than trying to interpret it.
pub fn run(binary: &str, args: &[&str], dir: &Path) -> Result<String> {
    let output = Command::new(binary)
        .args(args)
        .current_dir(dir)
        .output()
        .map_err(|e| ProcessErrKind::SpawnFailed(binary.to_string(), e.to_string()))?;

    if !output.status.success() {
        return Err(ProcessErrKind::NonZeroExit(
            binary.to_string(),
            output.status.to_string(),
            String::from_utf8_lossy(&output.stderr).to_string(),
        )
        .into());
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}
