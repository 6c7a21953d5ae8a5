use crate::backup::exclusion::Exclusions;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::sync::SynchronizerConfig;
use crate::backup::validate::{validate_dir_exist, validate_dir_if_exist};
use bon::Builder;
use getset::{CopyGetters, Getters};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::fs::File;
use std::path::{Path, PathBuf};
use validator::{Validate, ValidationError};

/// One backup set: where the data lives, where snapshots go and what runs around them.
#[skip_serializing_none]
#[derive(Clone, Serialize, Deserialize, Debug, Validate, Builder, Getters, CopyGetters)]
#[serde(deny_unknown_fields)]
#[validate(schema(function = validate_scripts_configured))]
pub struct BackupConfig {
    #[validate(custom(function = validate_dir_exist))]
    #[builder(into)]
    #[getset(get = "pub")]
    master_dir: PathBuf,
    #[validate(custom(function = validate_dir_if_exist))]
    #[builder(into)]
    #[getset(get = "pub")]
    backup_dir: PathBuf,
    #[serde(default)]
    #[builder(default)]
    #[getset(get_copy = "pub")]
    pre_run_checks_required: bool,
    #[builder(into)]
    #[getset(get = "pub")]
    pre_run_check_script: Option<PathBuf>,
    #[serde(default)]
    #[builder(default)]
    #[getset(get_copy = "pub")]
    post_run_activities_required: bool,
    #[builder(into)]
    #[getset(get = "pub")]
    post_run_script: Option<PathBuf>,
    #[serde(default)]
    #[builder(default)]
    #[getset(get = "pub")]
    exclude_file_type: Vec<String>,
    #[serde(default)]
    #[builder(default)]
    #[getset(get = "pub")]
    exclude_directory: Vec<String>,
    #[serde(default = "default_mirror_delete")]
    #[builder(default = default_mirror_delete())]
    #[getset(get_copy = "pub")]
    mirror_delete: bool,
    #[serde(default)]
    #[builder(default)]
    #[getset(get = "pub")]
    synchronizer: SynchronizerConfig,
}

fn default_mirror_delete() -> bool {
    true
}

fn validate_scripts_configured(config: &BackupConfig) -> std::result::Result<(), ValidationError> {
    if config.pre_run_checks_required && config.pre_run_check_script.is_none() {
        return Err(ValidationError::new("MissingScript").with_message(
            "pre_run_checks_required is set but pre_run_check_script is missing".into(),
        ));
    }

    if config.post_run_activities_required && config.post_run_script.is_none() {
        return Err(ValidationError::new("MissingScript").with_message(
            "post_run_activities_required is set but post_run_script is missing".into(),
        ));
    }

    Ok(())
}

impl BackupConfig {
    /// Reads and validates a YAML backup set configuration. Only reads the filesystem.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let into_config_error = |error: Error| Error::Config {
            path: path.to_path_buf(),
            error: Box::new(error),
        };

        let config: BackupConfig = File::open(path)
            .map_err(Error::from)
            .and_then(|f| serde_yml::from_reader(f).map_err(Error::from))
            .map_err(into_config_error)?;
        config
            .validate()
            .map_err(|e| into_config_error(e.into()))?;

        tracing::info!("Loaded backup set config {:?}", path);
        tracing::debug!("{:?}", config);
        Ok(config)
    }

    pub fn exclusions(&self) -> Exclusions {
        Exclusions::new(&self.exclude_file_type, self.exclude_directory.iter().cloned())
    }

    /// Script to run before the backup, if the checks are enabled.
    pub fn pre_run_check(&self) -> Option<&Path> {
        self.pre_run_checks_required
            .then_some(self.pre_run_check_script.as_deref())
            .flatten()
    }

    /// Script to run after the backup, if post-run activities are enabled.
    pub fn post_run_activity(&self) -> Option<&Path> {
        self.post_run_activities_required
            .then_some(self.post_run_script.as_deref())
            .flatten()
    }
}
