//! Runs the pre-run check and post-run activity hooks.

use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::WithMsg;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::process::{Command, Stdio};

const EXECUTE_BITS: u32 = 0o111;

pub fn is_executable<P: AsRef<Path>>(path: P) -> bool {
    std::fs::metadata(path.as_ref())
        .map(|md| md.is_file() && md.permissions().mode() & EXECUTE_BITS != 0)
        .unwrap_or(false)
}

/// Runs `path` without arguments and with a closed stdin.
///
/// Fails with [`Error::NotExecutable`] before spawning anything when the path
/// is missing or lacks an execute bit, and with [`Error::ScriptFailed`] on a
/// non zero exit. Whether a failure aborts the backup is up to the caller.
pub fn run_script<P: AsRef<Path>>(path: P) -> Result<()> {
    let path = path.as_ref();
    if !is_executable(path) {
        tracing::error!("Script {:?} is missing or not executable", path);
        return Err(Error::NotExecutable(path.to_path_buf()));
    }

    tracing::info!("Running script {:?}", path);
    let status = Command::new(path)
        .stdin(Stdio::null())
        .status()
        .map_err(Error::from)
        .with_msg(format!("Failed to start script {:?}", path))?;

    if status.success() {
        tracing::info!("Script {:?} finished successfully", path);
        Ok(())
    } else {
        Err(Error::ScriptFailed {
            path: path.to_path_buf(),
            code: status.code(),
        })
    }
}
