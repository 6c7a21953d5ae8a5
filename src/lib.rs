//! # link_backup
//!
//! Timestamped directory backups where unchanged files are hard links into the
//! previous snapshot.
//!
//! Each backup set is described by a YAML file. `init` creates the first full
//! snapshot, `run` creates incremental ones. Snapshots live in
//! `<backup_dir>/YYYY-MM-DD-HHMM` and `<backup_dir>/current` always links to the
//! newest one.
//!
//! Invocations against the same `backup_dir` are not locked against each other,
//! callers have to serialize them (e.g. with `flock`).
//!
//! ## Quick Start
//!
//! ```no_run
//! use link_backup::backup::job::{run_job, Mode};
//!
//! let snapshot = run_job(Mode::Run, "/etc/link_backup/home.yml")?;
//! println!("created {:?}", snapshot.path);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod backup;
