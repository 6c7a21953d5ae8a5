use crate::backup::exclusion::ExclusionMatcher;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::WithMsg;
use crate::backup::sync::{SyncRequest, Synchronizer};
use filetime::FileTime;
use serde::{Deserialize, Serialize};
use walkdir::{DirEntry, WalkDir};

use std::collections::HashSet;
use std::fs::{self, Metadata};
use std::io::ErrorKind;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

/// In-process synchronizer for hosts without rsync.
///
/// A file counts as unchanged against the link source when size, mtime,
/// mode and owner all match, in which case it is hard linked instead of copied.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct NativeSynchronizer {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transfer {
    Copied,
    Linked,
}

impl Synchronizer for NativeSynchronizer {
    fn synchronize(&self, request: &SyncRequest<'_>) -> Result<()> {
        let source = request.source;
        let destination = request.destination;
        if !source.is_dir() {
            tracing::error!(
                "Source directory does not exist or is not a directory: {:?}",
                source
            );
            return Err(Error::from(std::io::Error::other(
                "source is not a directory",
            )));
        }

        let matcher = request.exclusions.matcher()?;
        fs::create_dir_all(destination)
            .map_err(Error::from)
            .with_msg(format!("Cannot create destination {:?}", destination))?;

        let mut kept: HashSet<PathBuf> = HashSet::new();
        let mut dirs: Vec<(PathBuf, PathBuf)> = Vec::new();
        let (mut copied, mut linked) = (0usize, 0usize);

        let walker = WalkDir::new(source)
            .min_depth(1)
            .into_iter()
            .filter_entry(|de| !is_excluded_entry(de, source, &matcher));
        for de in walker {
            let de = de?;
            let rel = de.path().strip_prefix(source)?.to_path_buf();
            let target = destination.join(&rel);
            let file_type = de.file_type();

            if file_type.is_dir() {
                ensure_dir(&target)?;
                dirs.push((de.into_path(), target));
            } else if file_type.is_symlink() {
                copy_symlink(de.path(), &target)?;
            } else if file_type.is_file() {
                let candidate = request.link_source.map(|l| l.join(&rel));
                match copy_or_link(de.path(), &target, candidate.as_deref())
                    .with_msg(format!("Transfer of {:?} failed", de.path()))?
                {
                    Transfer::Copied => copied += 1,
                    Transfer::Linked => linked += 1,
                }
            } else {
                tracing::debug!("Skipping special file {:?}", de.path());
                continue;
            }
            kept.insert(rel);
        }

        if request.mirror_delete {
            prune(destination, &kept, &matcher)?;
        }

        // Children before parents, writing into a directory bumps its mtime.
        for (src, dst) in dirs.iter().rev() {
            copy_dir_metadata(src, dst)?;
        }
        copy_dir_metadata(source, destination)?;

        tracing::info!(
            "Synchronized {:?}: {} files copied, {} hard linked",
            destination,
            copied,
            linked
        );
        Ok(())
    }
}

fn is_excluded_entry(de: &DirEntry, root: &Path, matcher: &ExclusionMatcher) -> bool {
    match de.path().strip_prefix(root) {
        Ok(rel) => {
            let excluded = matcher.is_excluded(rel, de.file_type().is_dir());
            if excluded {
                tracing::trace!("Excluding {:?}", de.path());
            }
            excluded
        }
        Err(_) => false,
    }
}

fn remove_existing(target: &Path) -> Result<()> {
    match fs::symlink_metadata(target) {
        Ok(md) if md.is_dir() => Ok(fs::remove_dir_all(target)?),
        Ok(_) => Ok(fs::remove_file(target)?),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn ensure_dir(target: &Path) -> Result<()> {
    match fs::symlink_metadata(target) {
        Ok(md) if md.is_dir() => return Ok(()),
        Ok(_) => fs::remove_file(target)?,
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    Ok(fs::create_dir(target)?)
}

fn is_unchanged(src_md: &Metadata, candidate: &Path) -> bool {
    match fs::symlink_metadata(candidate) {
        Ok(md) => {
            md.is_file()
                && md.len() == src_md.len()
                && FileTime::from_last_modification_time(&md)
                    == FileTime::from_last_modification_time(src_md)
                && md.mode() == src_md.mode()
                && md.uid() == src_md.uid()
                && md.gid() == src_md.gid()
        }
        Err(_) => false,
    }
}

fn copy_or_link(src: &Path, target: &Path, candidate: Option<&Path>) -> Result<Transfer> {
    let src_md = fs::symlink_metadata(src)?;
    remove_existing(target)?;

    if let Some(candidate) = candidate {
        if is_unchanged(&src_md, candidate) {
            fs::hard_link(candidate, target)?;
            tracing::trace!("Linked {:?} -> {:?}", target, candidate);
            return Ok(Transfer::Linked);
        }
    }

    fs::copy(src, target)?;
    copy_ownership(&src_md, target, true);
    fs::set_permissions(target, src_md.permissions())?;
    filetime::set_file_times(
        target,
        FileTime::from_last_access_time(&src_md),
        FileTime::from_last_modification_time(&src_md),
    )?;
    tracing::trace!("Copied {:?} -> {:?}", src, target);
    Ok(Transfer::Copied)
}

fn copy_symlink(src: &Path, target: &Path) -> Result<()> {
    let src_md = fs::symlink_metadata(src)?;
    let link = fs::read_link(src)?;
    remove_existing(target)?;
    std::os::unix::fs::symlink(&link, target)?;
    copy_ownership(&src_md, target, false);
    filetime::set_symlink_file_times(
        target,
        FileTime::from_last_access_time(&src_md),
        FileTime::from_last_modification_time(&src_md),
    )?;
    Ok(())
}

fn copy_dir_metadata(src: &Path, target: &Path) -> Result<()> {
    let src_md = fs::metadata(src)?;
    copy_ownership(&src_md, target, true);
    fs::set_permissions(target, src_md.permissions())?;
    filetime::set_file_times(
        target,
        FileTime::from_last_access_time(&src_md),
        FileTime::from_last_modification_time(&src_md),
    )?;
    Ok(())
}

/// Ownership is only kept where the process is allowed to change it.
fn copy_ownership(src_md: &Metadata, target: &Path, follow: bool) {
    let res = if follow {
        std::os::unix::fs::chown(target, Some(src_md.uid()), Some(src_md.gid()))
    } else {
        std::os::unix::fs::lchown(target, Some(src_md.uid()), Some(src_md.gid()))
    };
    if let Err(e) = res {
        tracing::trace!("Keeping current owner of {:?}: {}", target, e);
    }
}

/// Removes destination entries the source no longer has. Excluded entries stay.
fn prune(destination: &Path, kept: &HashSet<PathBuf>, matcher: &ExclusionMatcher) -> Result<()> {
    let mut walker = WalkDir::new(destination).min_depth(1).into_iter();
    while let Some(de) = walker.next() {
        let de = de?;
        let rel = de.path().strip_prefix(destination)?;
        let is_dir = de.file_type().is_dir();
        if kept.contains(rel) {
            continue;
        }
        if matcher.is_excluded(rel, is_dir) {
            if is_dir {
                walker.skip_current_dir();
            }
            continue;
        }

        tracing::debug!("Removing {:?}, absent from source", de.path());
        if is_dir {
            fs::remove_dir_all(de.path())?;
            walker.skip_current_dir();
        } else {
            fs::remove_file(de.path())?;
        }
    }
    Ok(())
}
