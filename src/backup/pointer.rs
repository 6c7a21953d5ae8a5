//! The `current` symlink inside a backup root.
//!
//! The pointer is always re-read from the filesystem, nothing about it is
//! cached between operations.

use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::WithMsg;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

pub static CURRENT: &str = "current";
pub static CURRENT_INIT: &str = "current_init";
static CURRENT_TMP: &str = ".current.tmp";

/// What is found at `<backup_dir>/current`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PointerState {
    Absent,
    /// Link target as stored, usually the bare snapshot directory name.
    Symlink(PathBuf),
    /// A real directory, left over from a manual or legacy setup.
    Directory,
    /// Anything else, e.g. a regular file.
    Other,
}

#[derive(Clone, Debug)]
pub struct CurrentPointer {
    backup_dir: PathBuf,
}

impl CurrentPointer {
    pub fn new<P: Into<PathBuf>>(backup_dir: P) -> Self {
        Self {
            backup_dir: backup_dir.into(),
        }
    }

    pub fn path(&self) -> PathBuf {
        self.backup_dir.join(CURRENT)
    }

    pub fn observe(&self) -> Result<PointerState> {
        let path = self.path();
        let md = match fs::symlink_metadata(&path) {
            Ok(md) => md,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(PointerState::Absent),
            Err(e) => return Err(Error::from(e).with_msg(format!("Cannot inspect {:?}", path))),
        };

        let file_type = md.file_type();
        Ok(if file_type.is_symlink() {
            PointerState::Symlink(fs::read_link(&path)?)
        } else if file_type.is_dir() {
            PointerState::Directory
        } else {
            PointerState::Other
        })
    }

    /// Absolute, canonical directory the pointer leads to, if it leads anywhere.
    pub fn resolve(&self) -> Result<Option<PathBuf>> {
        match self.observe()? {
            PointerState::Symlink(_) | PointerState::Directory => {
                match fs::canonicalize(self.path()) {
                    Ok(p) if p.is_dir() => Ok(Some(p)),
                    Ok(p) => {
                        tracing::warn!("{:?} does not lead to a directory: {:?}", self.path(), p);
                        Ok(None)
                    }
                    Err(e) if e.kind() == ErrorKind::NotFound => {
                        tracing::warn!("{:?} is a dangling symlink", self.path());
                        Ok(None)
                    }
                    Err(e) => Err(e.into()),
                }
            }
            PointerState::Absent | PointerState::Other => Ok(None),
        }
    }

    /// Moves whatever occupies `current` out of the way so a new link can take its place.
    ///
    /// Symlinks are left for [`CurrentPointer::link_to`] to replace atomically.
    /// A plain directory is renamed to `current_init` with its content intact.
    /// Anything else is a [`Error::PointerConflict`] and nothing is touched.
    pub fn resolve_conflict(&self) -> Result<PointerState> {
        let state = self.observe()?;
        match &state {
            PointerState::Absent | PointerState::Symlink(_) => {}
            PointerState::Directory => {
                let init = self.backup_dir.join(CURRENT_INIT);
                if fs::symlink_metadata(&init).is_ok() {
                    tracing::error!("{:?} is a directory but {:?} already exists", self.path(), init);
                    return Err(Error::PointerConflict(self.path()));
                }
                tracing::warn!(
                    "{:?} is a directory, not a symlink, moving it to {:?}",
                    self.path(),
                    init
                );
                fs::rename(self.path(), &init)?;
            }
            PointerState::Other => {
                tracing::error!("{:?} is neither a symlink nor a directory", self.path());
                return Err(Error::PointerConflict(self.path()));
            }
        }
        Ok(state)
    }

    /// Points `current` at `snapshot_name`, replacing an existing symlink in one rename.
    pub fn link_to<S: AsRef<Path>>(&self, snapshot_name: S) -> Result<()> {
        let snapshot_name = snapshot_name.as_ref();
        let tmp = self.backup_dir.join(CURRENT_TMP);
        if fs::symlink_metadata(&tmp).is_ok() {
            tracing::debug!("Removing stale {:?}", tmp);
            fs::remove_file(&tmp)?;
        }

        std::os::unix::fs::symlink(snapshot_name, &tmp)?;
        fs::rename(&tmp, self.path())
            .map_err(|e| {
                let mut e = Error::from(e);
                if let Err(e2) = fs::remove_file(&tmp) {
                    e = e.chain(e2.into())
                }
                e.with_msg(format!("Cannot point {:?} to {:?}", self.path(), snapshot_name))
            })?;

        tracing::info!("{:?} now points to {:?}", self.path(), snapshot_name);
        Ok(())
    }
}
