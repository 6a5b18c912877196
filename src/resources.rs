//! Local resource selection.
//!
//! Walks the configured base directory and keeps every regular file whose
//! `/`-separated relative path matches one of the glob patterns. Dot files
//! are included; `*` does not cross directory separators (use `**`).

use std::path::{Path, PathBuf};

use glob::{MatchOptions, Pattern};
use thiserror::Error;
use tracing::debug;
use walkdir::WalkDir;

use crate::config::ResourceSelection;

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

#[derive(Error, Debug)]
pub enum ResourceError {
    #[error("resource directory {0} does not exist or is not a directory")]
    MissingBaseDir(PathBuf),

    #[error("invalid resource pattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        source: glob::PatternError,
    },

    #[error("failed to walk {path}: {source}")]
    Walk {
        path: PathBuf,
        source: walkdir::Error,
    },
}

/// Collect the files selected by `selection`, relative to its base directory.
///
/// The result is sorted so repeated runs upload in the same order.
pub fn collect_resources(selection: &ResourceSelection) -> Result<Vec<PathBuf>, ResourceError> {
    let base = selection.base_dir.as_path();
    if !base.is_dir() {
        return Err(ResourceError::MissingBaseDir(base.to_path_buf()));
    }

    let patterns = selection
        .patterns
        .iter()
        .map(|p| {
            Pattern::new(p).map_err(|source| ResourceError::Pattern {
                pattern: p.clone(),
                source,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut files = Vec::new();
    for entry in WalkDir::new(base).follow_links(true) {
        let entry = entry.map_err(|source| ResourceError::Walk {
            path: base.to_path_buf(),
            source,
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(relative) = relative_path(base, entry.path()) else {
            continue;
        };
        let logical = logical_path(&relative);
        if patterns.iter().any(|p| p.matches_with(&logical, MATCH_OPTIONS)) {
            files.push(relative);
        }
    }

    files.sort();
    debug!(base = %base.display(), count = files.len(), "collected resources");
    Ok(files)
}

fn relative_path(base: &Path, path: &Path) -> Option<PathBuf> {
    path.strip_prefix(base).ok().map(Path::to_path_buf)
}

fn logical_path(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
