use crate::backup::backup_config::BackupConfig;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::WithMsg;
use crate::backup::script::run_script;
use crate::backup::snapshot::{BackupSet, Snapshot};
use chrono::{DateTime, Local};
use clap::ValueEnum;
use derive_more::Display;
use std::path::Path;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, Display)]
pub enum Mode {
    /// Create the first, full snapshot of a backup set
    #[display("init")]
    Init,
    /// Create an incremental snapshot linked against `current`
    #[display("run")]
    Run,
}

/// Loads the backup set and runs one backup in the requested mode.
pub fn run_job<P: AsRef<Path>>(mode: Mode, config_path: P) -> Result<Snapshot> {
    let config = BackupConfig::load(config_path)?;
    run_with_config(mode, &config, &Local::now())
}

pub fn run_with_config(
    mode: Mode,
    config: &BackupConfig,
    now: &DateTime<Local>,
) -> Result<Snapshot> {
    let exclusions = config.exclusions();
    tracing::debug!("Exclusions: {:?}", exclusions.filters());

    if let Some(script) = config.pre_run_check() {
        run_script(script).with_msg("Pre-run check failed, backup aborted")?;
    }

    let set = BackupSet::new(config, &exclusions, config.synchronizer());
    let snapshot = match mode {
        Mode::Init => set.full_backup(now),
        Mode::Run => set.incremental_backup(now),
    }
    .with_msg(format!("Backup ({mode}) of {:?} failed", config.master_dir()))?;

    if let Some(script) = config.post_run_activity() {
        if let Err(e) = run_script(script) {
            tracing::warn!("Post-run activity failed, backup {:?} is kept: {e}", snapshot.path);
        }
    }

    Ok(snapshot)
}
