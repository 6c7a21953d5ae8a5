//! Exclusion filters for excluded file extensions and directory names.
//!
//! Filters keep the order they were configured in, extensions first, so two
//! runs with the same configuration produce the same synchronizer invocation.
//! Patterns are not validated here, a malformed one fails the synchronizer.

use crate::backup::result_error::result::Result;
use derive_more::Display;
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use std::path::Path;

#[derive(Clone, Debug, PartialEq, Eq, Display)]
pub enum ExcludeFilter {
    /// Any entry whose name ends with the suffix, at any depth.
    #[display("*{_0}")]
    FileType(String),
    /// Any directory with this name, at any depth, with everything below it.
    #[display("{_0}/")]
    Directory(String),
}

impl ExcludeFilter {
    pub fn file_type<S: AsRef<str>>(ext: S) -> Self {
        let ext = ext.as_ref();
        if ext.starts_with('.') {
            Self::FileType(ext.to_string())
        } else {
            Self::FileType(format!(".{ext}"))
        }
    }

    pub fn directory<S: Into<String>>(name: S) -> Self {
        Self::Directory(name.into())
    }

    /// Single rsync argument, `--exclude=<pattern>`.
    pub fn rsync_arg(&self) -> String {
        format!("--exclude={self}")
    }

    fn glob_pattern(&self) -> String {
        match self {
            ExcludeFilter::FileType(ext) => format!("**/*{ext}"),
            ExcludeFilter::Directory(name) => format!("**/{name}"),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Exclusions {
    filters: Vec<ExcludeFilter>,
}

impl Exclusions {
    pub fn new<I1, S1, I2, S2>(file_types: I1, directories: I2) -> Self
    where
        I1: IntoIterator<Item = S1>,
        S1: AsRef<str>,
        I2: IntoIterator<Item = S2>,
        S2: Into<String>,
    {
        let filters = file_types
            .into_iter()
            .map(ExcludeFilter::file_type)
            .chain(directories.into_iter().map(ExcludeFilter::directory))
            .collect();
        Self { filters }
    }

    pub fn filters(&self) -> &[ExcludeFilter] {
        &self.filters
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub fn rsync_args(&self) -> Vec<String> {
        self.filters.iter().map(ExcludeFilter::rsync_arg).collect()
    }

    /// Compiles the filters into glob sets for in-process tree walking.
    pub fn matcher(&self) -> Result<ExclusionMatcher> {
        let mut any = GlobSetBuilder::new();
        let mut dirs = GlobSetBuilder::new();
        for filter in &self.filters {
            let glob = GlobBuilder::new(&filter.glob_pattern())
                .literal_separator(true)
                .build()?;
            match filter {
                ExcludeFilter::FileType(_) => any.add(glob),
                ExcludeFilter::Directory(_) => dirs.add(glob),
            };
        }

        Ok(ExclusionMatcher {
            any: any.build()?,
            dirs: dirs.build()?,
        })
    }
}

#[derive(Clone, Debug)]
pub struct ExclusionMatcher {
    any: GlobSet,
    dirs: GlobSet,
}

impl ExclusionMatcher {
    /// `rel_path` is relative to the root of the tree being synchronized.
    pub fn is_excluded<P: AsRef<Path>>(&self, rel_path: P, is_dir: bool) -> bool {
        let rel_path = rel_path.as_ref();
        self.any.is_match(rel_path) || (is_dir && self.dirs.is_match(rel_path))
    }
}
