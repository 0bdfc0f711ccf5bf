//! External $EDITOR delegation for composing longer messages.
//!
//! Opens the user's preferred editor on a scratch file in a fresh temp
//! directory. A clean exit returns the trimmed file content (possibly
//! empty); a non-zero exit is an error. The temp directory is removed
//! either way.

use std::process::Command;

use anyhow::{Context, Result, bail};

const SCRATCH_FILE: &str = "prompt.md";

/// Launches the editor and returns the trimmed scratch file content.
///
/// Editor resolution: $VISUAL, then $EDITOR, then `vi`.
///
/// # Errors
/// Returns an error if the editor cannot be launched, exits non-zero, or
/// the scratch file cannot be read back.
pub fn compose() -> Result<String> {
    // TempDir removes itself on drop, including the error paths.
    let dir = tempfile::tempdir().context("create scratch directory")?;
    let scratch_path = dir.path().join(SCRATCH_FILE);
    std::fs::write(&scratch_path, "").context("create scratch file")?;

    let editor = std::env::var("VISUAL")
        .or_else(|_| std::env::var("EDITOR"))
        .unwrap_or_else(|_| "vi".to_string());

    let status = Command::new(&editor)
        .arg(&scratch_path)
        .stdin(std::process::Stdio::inherit())
        .stdout(std::process::Stdio::inherit())
        .stderr(std::process::Stdio::inherit())
        .status()
        .with_context(|| format!("launch editor '{editor}'"))?;

    if !status.success() {
        bail!("editor '{editor}' exited with {status}");
    }

    let content = std::fs::read_to_string(&scratch_path).context("read scratch file")?;
    Ok(content.trim().to_string())
}
