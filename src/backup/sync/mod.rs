pub mod native;
pub mod rsync;

use crate::backup::exclusion::Exclusions;
use crate::backup::function_path;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::WithDebugObjectAndFnName;
use derive_more::From;
use function_name::named;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One mirroring pass of `source` into `destination`.
#[derive(Clone, Copy, Debug)]
pub struct SyncRequest<'a> {
    pub source: &'a Path,
    pub destination: &'a Path,
    /// Previous snapshot to hard link unchanged files against.
    pub link_source: Option<&'a Path>,
    pub exclusions: &'a Exclusions,
    /// Remove destination entries that are absent from the source.
    pub mirror_delete: bool,
}

pub trait Synchronizer {
    /// Blocks until the tree is mirrored. Any failure is fatal for the backup.
    fn synchronize(&self, request: &SyncRequest<'_>) -> Result<()>;
}

#[derive(Clone, From, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
#[serde(deny_unknown_fields)]
pub enum SynchronizerConfig {
    Rsync(rsync::RsyncConfig),
    Native(native::NativeSynchronizer),
}

impl Default for SynchronizerConfig {
    fn default() -> Self {
        Self::Rsync(rsync::RsyncConfig::default())
    }
}

impl Synchronizer for SynchronizerConfig {
    #[named]
    fn synchronize(&self, request: &SyncRequest<'_>) -> Result<()> {
        tracing::info!(
            "Synchronizing {:?} into {:?} (link source: {:?})",
            request.source,
            request.destination,
            request.link_source
        );
        match self {
            SynchronizerConfig::Rsync(rsync) => rsync.synchronize(request),
            SynchronizerConfig::Native(native) => native.synchronize(request),
        }
        .with_debug_object_and_fn_name(self.clone(), function_path!())
    }
}
