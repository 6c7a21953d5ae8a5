//! Full and incremental snapshot creation for one backup set.

use crate::backup::backup_config::BackupConfig;
use crate::backup::exclusion::Exclusions;
use crate::backup::pointer::{CurrentPointer, PointerState};
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::WithMsg;
use crate::backup::sync::{SyncRequest, Synchronizer};
use chrono::{DateTime, TimeZone};
use std::fmt::Display;
use std::path::{Path, PathBuf};

/// Minute granularity, two backups in the same minute share a snapshot directory.
pub static SNAPSHOT_TIME_FORMAT: &str = "%Y-%m-%d-%H%M";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Snapshot {
    pub name: String,
    pub path: PathBuf,
}

impl Snapshot {
    pub fn at<O: Display, T: TimeZone<Offset = O>>(backup_dir: &Path, dt: &DateTime<T>) -> Self {
        let name = dt.format(SNAPSHOT_TIME_FORMAT).to_string();
        let path = backup_dir.join(&name);
        Self { name, path }
    }

    fn create_dir(&self) -> Result<()> {
        std::fs::create_dir_all(&self.path)
            .map_err(Error::from)
            .with_msg(format!("Cannot create snapshot directory {:?}", self.path))
    }
}

pub struct BackupSet<'a, S: Synchronizer> {
    config: &'a BackupConfig,
    exclusions: &'a Exclusions,
    synchronizer: &'a S,
    pointer: CurrentPointer,
}

impl<'a, S: Synchronizer> BackupSet<'a, S> {
    pub fn new(config: &'a BackupConfig, exclusions: &'a Exclusions, synchronizer: &'a S) -> Self {
        Self {
            config,
            exclusions,
            synchronizer,
            pointer: CurrentPointer::new(config.backup_dir()),
        }
    }

    pub fn pointer(&self) -> &CurrentPointer {
        &self.pointer
    }

    fn synchronize(&self, snapshot: &Snapshot, link_source: Option<&Path>) -> Result<()> {
        self.synchronizer.synchronize(&SyncRequest {
            source: self.config.master_dir(),
            destination: &snapshot.path,
            link_source,
            exclusions: self.exclusions,
            mirror_delete: self.config.mirror_delete(),
        })
    }

    /// First snapshot of a backup set. Refuses to run once `current` exists.
    pub fn full_backup<O: Display, T: TimeZone<Offset = O>>(
        &self,
        now: &DateTime<T>,
    ) -> Result<Snapshot> {
        if self.pointer.observe()? != PointerState::Absent {
            tracing::error!(
                "{:?} already exists, use incremental backups for this set",
                self.pointer.path()
            );
            return Err(Error::AlreadyInitialized(self.pointer.path()));
        }

        let snapshot = Snapshot::at(self.config.backup_dir(), now);
        tracing::info!("Creating full backup {:?}", snapshot.path);
        snapshot.create_dir()?;
        self.synchronize(&snapshot, None)?;
        self.pointer.link_to(&snapshot.name)?;
        tracing::info!("Full backup {:?} completed", snapshot.path);
        Ok(snapshot)
    }

    /// Snapshot hard linked against whatever `current` leads to.
    pub fn incremental_backup<O: Display, T: TimeZone<Offset = O>>(
        &self,
        now: &DateTime<T>,
    ) -> Result<Snapshot> {
        let snapshot = Snapshot::at(self.config.backup_dir(), now);
        tracing::info!("Creating incremental backup {:?}", snapshot.path);
        snapshot.create_dir()?;

        let link_source = match self.pointer.resolve()? {
            None => {
                tracing::warn!(
                    "{:?} does not lead to a previous snapshot, copying everything",
                    self.pointer.path()
                );
                None
            }
            Some(previous) if std::fs::canonicalize(&snapshot.path)? == previous => {
                tracing::warn!(
                    "Snapshot {:?} already exists for this minute, overwriting it in place",
                    snapshot.path
                );
                None
            }
            Some(previous) => Some(previous),
        };

        self.synchronize(&snapshot, link_source.as_deref())?;
        self.pointer.resolve_conflict()?;
        self.pointer.link_to(&snapshot.name)?;
        tracing::info!("Incremental backup {:?} completed", snapshot.path);
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::pointer::CURRENT_INIT;
    use crate::backup::sync::native::NativeSynchronizer;
    use chrono::{Duration, Local, Utc};
    use std::cell::RefCell;
    use std::fs;
    use std::os::unix::fs::MetadataExt;
    use tempfile::TempDir;

    struct Fixture {
        _temp_dir: TempDir,
        master: PathBuf,
        backup: PathBuf,
        config: BackupConfig,
    }

    fn fixture() -> Fixture {
        let temp_dir = TempDir::new().unwrap();
        let master = temp_dir.path().join("master");
        let backup = temp_dir.path().join("backup");
        fs::create_dir_all(master.join("sub")).unwrap();
        fs::create_dir_all(master.join("cache")).unwrap();
        fs::write(master.join("a.txt"), "alpha").unwrap();
        fs::write(master.join("a.tmp"), "scratch").unwrap();
        fs::write(master.join("sub/b.txt"), "bravo").unwrap();
        fs::write(master.join("cache/blob"), "cached").unwrap();
        let config = BackupConfig::builder()
            .master_dir(&master)
            .backup_dir(&backup)
            .exclude_file_type(vec![".tmp".to_string()])
            .exclude_directory(vec!["cache".to_string()])
            .build();
        Fixture {
            _temp_dir: temp_dir,
            master,
            backup,
            config,
        }
    }

    /// Records link sources and optionally fails, delegating the copy to the native synchronizer.
    #[derive(Default)]
    struct RecordingSynchronizer {
        fail: bool,
        link_sources: RefCell<Vec<Option<PathBuf>>>,
    }

    impl Synchronizer for RecordingSynchronizer {
        fn synchronize(&self, request: &SyncRequest<'_>) -> Result<()> {
            self.link_sources
                .borrow_mut()
                .push(request.link_source.map(Path::to_path_buf));
            if self.fail {
                return Err(Error::SyncFailed {
                    program: PathBuf::from("fake"),
                    code: Some(12),
                });
            }
            NativeSynchronizer::default().synchronize(request)
        }
    }

    fn t(minutes: i64) -> DateTime<Utc> {
        DateTime::UNIX_EPOCH + Duration::days(20_000) + Duration::minutes(minutes)
    }

    fn ino(path: PathBuf) -> u64 {
        fs::metadata(path).unwrap().ino()
    }

    #[test]
    fn test_snapshot_name() {
        let dt = Utc.with_ymd_and_hms(2024, 3, 9, 7, 5, 59).unwrap();
        let snapshot = Snapshot::at(Path::new("/backup"), &dt);
        assert_eq!(snapshot.name, "2024-03-09-0705");
        assert_eq!(snapshot.path, PathBuf::from("/backup/2024-03-09-0705"));

        let local = Snapshot::at(Path::new("/backup"), &Local::now());
        assert_eq!(local.name.len(), "YYYY-MM-DD-HHMM".len());
    }

    #[test]
    fn test_full_backup_mirrors_master_minus_exclusions() {
        let f = fixture();
        let exclusions = f.config.exclusions();
        let sync = NativeSynchronizer::default();
        let set = BackupSet::new(&f.config, &exclusions, &sync);

        let snapshot = set.full_backup(&t(0)).unwrap();

        let current = f.backup.join("current");
        assert_eq!(
            fs::read_link(&current).unwrap(),
            PathBuf::from(&snapshot.name)
        );
        assert_eq!(fs::read_to_string(current.join("a.txt")).unwrap(), "alpha");
        assert_eq!(fs::read_to_string(current.join("sub/b.txt")).unwrap(), "bravo");
        assert!(!current.join("a.tmp").exists());
        assert!(!current.join("cache").exists());
        assert!(f.master.join("a.tmp").exists());
    }

    #[test]
    fn test_second_full_backup_is_rejected() {
        let f = fixture();
        let exclusions = f.config.exclusions();
        let sync = RecordingSynchronizer::default();
        let set = BackupSet::new(&f.config, &exclusions, &sync);
        let first = set.full_backup(&t(0)).unwrap();

        let err = set.full_backup(&t(5)).unwrap_err();

        assert!(matches!(err, Error::AlreadyInitialized(_)));
        assert_eq!(sync.link_sources.borrow().len(), 1);
        assert!(!Snapshot::at(&f.backup, &t(5)).path.exists());
        assert_eq!(
            fs::read_link(f.backup.join("current")).unwrap(),
            PathBuf::from(&first.name)
        );
        assert!(first.path.join("a.txt").exists());
    }

    #[test]
    fn test_incremental_backups_share_unchanged_files() {
        let f = fixture();
        let exclusions = f.config.exclusions();
        let sync = RecordingSynchronizer::default();
        let set = BackupSet::new(&f.config, &exclusions, &sync);

        let mut snapshots = vec![set.full_backup(&t(0)).unwrap()];
        for n in 1..=3 {
            fs::write(f.master.join("changing.txt"), "x".repeat(n)).unwrap();
            snapshots.push(set.incremental_backup(&t(n as i64 * 60)).unwrap());
        }

        let last = snapshots.last().unwrap();
        assert_eq!(
            fs::canonicalize(f.backup.join("current")).unwrap(),
            fs::canonicalize(&last.path).unwrap()
        );
        let first_ino = ino(snapshots[0].path.join("a.txt"));
        for snapshot in &snapshots {
            assert_eq!(ino(snapshot.path.join("a.txt")), first_ino);
            assert_eq!(ino(snapshot.path.join("sub/b.txt")), ino(snapshots[0].path.join("sub/b.txt")));
            assert!(!snapshot.path.join("a.tmp").exists());
        }
        assert_ne!(
            ino(snapshots[2].path.join("changing.txt")),
            ino(snapshots[3].path.join("changing.txt"))
        );

        let link_sources = sync.link_sources.borrow();
        assert_eq!(link_sources[0], None);
        for n in 1..=3 {
            assert_eq!(
                link_sources[n],
                Some(fs::canonicalize(&snapshots[n - 1].path).unwrap())
            );
        }
    }

    #[test]
    fn test_incremental_moves_plain_current_directory() {
        let f = fixture();
        let exclusions = f.config.exclusions();
        let sync = NativeSynchronizer::default();
        let set = BackupSet::new(&f.config, &exclusions, &sync);
        let legacy = f.backup.join("current");
        fs::create_dir_all(&legacy).unwrap();
        fs::write(legacy.join("old.txt"), "legacy").unwrap();

        let snapshot = set.incremental_backup(&t(0)).unwrap();

        assert_eq!(
            fs::read_to_string(f.backup.join(CURRENT_INIT).join("old.txt")).unwrap(),
            "legacy"
        );
        assert_eq!(
            set.pointer().observe().unwrap(),
            PointerState::Symlink(PathBuf::from(&snapshot.name))
        );
        assert!(legacy.join("a.txt").exists());
    }

    #[test]
    fn test_incremental_with_file_pointer_conflicts() {
        let f = fixture();
        let exclusions = f.config.exclusions();
        let sync = NativeSynchronizer::default();
        let set = BackupSet::new(&f.config, &exclusions, &sync);
        fs::create_dir_all(&f.backup).unwrap();
        fs::write(f.backup.join("current"), "junk").unwrap();

        let err = set.incremental_backup(&t(0)).unwrap_err();

        assert!(matches!(err, Error::PointerConflict(_)));
        assert_eq!(fs::read_to_string(f.backup.join("current")).unwrap(), "junk");
    }

    #[test]
    fn test_sync_failure_leaves_pointer_alone() {
        let f = fixture();
        let exclusions = f.config.exclusions();
        let good = NativeSynchronizer::default();
        let first = BackupSet::new(&f.config, &exclusions, &good)
            .full_backup(&t(0))
            .unwrap();

        let failing = RecordingSynchronizer {
            fail: true,
            ..Default::default()
        };
        let err = BackupSet::new(&f.config, &exclusions, &failing)
            .incremental_backup(&t(60))
            .unwrap_err();

        assert!(matches!(err, Error::SyncFailed { .. }));
        assert_eq!(
            fs::read_link(f.backup.join("current")).unwrap(),
            PathBuf::from(&first.name)
        );
        assert!(Snapshot::at(&f.backup, &t(60)).path.is_dir());
    }

    #[test]
    fn test_failed_full_backup_does_not_create_pointer() {
        let f = fixture();
        let exclusions = f.config.exclusions();
        let failing = RecordingSynchronizer {
            fail: true,
            ..Default::default()
        };

        let set = BackupSet::new(&f.config, &exclusions, &failing);
        assert!(set.full_backup(&t(0)).is_err());
        assert_eq!(set.pointer().observe().unwrap(), PointerState::Absent);
    }

    #[test]
    fn test_same_minute_incremental_drops_link_source() {
        let f = fixture();
        let exclusions = f.config.exclusions();
        let sync = RecordingSynchronizer::default();
        let set = BackupSet::new(&f.config, &exclusions, &sync);
        let first = set.full_backup(&t(0)).unwrap();
        fs::write(f.master.join("a.txt"), "alpha, again").unwrap();

        let second = set.incremental_backup(&t(0)).unwrap();

        assert_eq!(first, second);
        assert_eq!(sync.link_sources.borrow()[1], None);
        assert_eq!(
            fs::read_to_string(second.path.join("a.txt")).unwrap(),
            "alpha, again"
        );
    }
}
