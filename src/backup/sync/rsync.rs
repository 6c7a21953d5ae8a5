use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::WithMsg;
use crate::backup::sync::{SyncRequest, Synchronizer};
use bon::Builder;
use getset::Getters;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// Synchronizes through the external `rsync` tool.
///
/// Runs `rsync -a`, with `--link-dest` pointing at the previous snapshot
/// when there is one.
#[derive(Clone, Debug, Serialize, Deserialize, Builder, PartialEq, Eq, Getters)]
#[serde(deny_unknown_fields)]
#[getset(get = "pub")]
pub struct RsyncConfig {
    #[serde(default = "default_binary")]
    #[builder(default = default_binary(), into)]
    binary: PathBuf,
    #[serde(default)]
    #[builder(default)]
    extra_args: Vec<String>,
}

fn default_binary() -> PathBuf {
    PathBuf::from("rsync")
}

impl Default for RsyncConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Trailing slash so rsync copies the contents of the directory, not the directory itself.
fn contents_of(dir: &Path) -> OsString {
    let mut arg = dir.as_os_str().to_os_string();
    if !arg.to_string_lossy().ends_with('/') {
        arg.push("/");
    }
    arg
}

impl RsyncConfig {
    pub fn build_args(&self, request: &SyncRequest<'_>) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec!["-a".into()];
        if request.mirror_delete {
            args.push("--delete".into());
        }
        if let Some(link_source) = request.link_source {
            let mut arg = OsString::from("--link-dest=");
            arg.push(link_source.as_os_str());
            args.push(arg);
        }
        args.extend(request.exclusions.rsync_args().into_iter().map(OsString::from));
        args.extend(self.extra_args.iter().map(OsString::from));
        args.push(contents_of(request.source));
        args.push(request.destination.as_os_str().to_os_string());
        args
    }
}

impl Synchronizer for RsyncConfig {
    fn synchronize(&self, request: &SyncRequest<'_>) -> Result<()> {
        let args = self.build_args(request);
        tracing::info!(
            "Running {:?} {}",
            self.binary,
            args.iter().map(|a| a.to_string_lossy()).join(" ")
        );

        let status = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .status()
            .map_err(Error::from)
            .with_msg(format!("Failed to start {:?}", self.binary))?;

        if status.success() {
            Ok(())
        } else {
            tracing::error!("{:?} exited with {:?}", self.binary, status.code());
            Err(Error::SyncFailed {
                program: self.binary.clone(),
                code: status.code(),
            })
        }
    }
}
