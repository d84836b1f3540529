//! Writing artifacts to the theme output directory.
//!
//! RELEASE writes everything at once and clears the directory again on
//! failure. DEV rewrites only files whose bytes changed and removes files
//! a rebuild no longer produces.

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::BuildError;
use crate::naming::Artifact;

/// Remove everything inside `dir`, keeping the directory itself.
/// A missing directory is created.
pub fn clear_dir(dir: &Path) -> Result<(), BuildError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return fs::create_dir_all(dir).map_err(|e| BuildError::output_write(dir, e));
        }
        Err(e) => return Err(BuildError::output_write(dir, e)),
    };

    for entry in entries {
        let entry = entry.map_err(|e| BuildError::output_write(dir, e))?;
        let path = entry.path();
        let file_type = entry.file_type().map_err(|e| BuildError::output_write(&path, e))?;
        let result = if file_type.is_dir() {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        result.map_err(|e| BuildError::output_write(&path, e))?;
    }
    Ok(())
}

/// Write one artifact, creating parent directories
pub fn write_artifact(artifact: &Artifact) -> Result<u64, BuildError> {
    let dst = &artifact.physical_path;
    if let Some(parent) = dst.parent() {
        if !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| BuildError::output_write(parent, e))?;
        }
    }
    fs::write(dst, &artifact.bytes).map_err(|e| BuildError::output_write(dst, e))?;
    Ok(artifact.bytes.len() as u64)
}

/// Write every artifact or none.
///
/// On failure or cancellation `output_dir` is cleared again so it never
/// holds a partial build. Returns the number of bytes written.
pub fn write_all(artifacts: &[Artifact], output_dir: &Path, shutdown: &AtomicBool) -> Result<u64, BuildError> {
    let mut bytes = 0u64;
    for artifact in artifacts {
        let result = if shutdown.load(Ordering::Relaxed) {
            Err(BuildError::Cancelled)
        } else {
            write_artifact(artifact)
        };

        match result {
            Ok(written) => bytes += written,
            Err(err) => {
                warn!(dir = %output_dir.display(), error = %err, "rolling back partial output");
                if let Err(cleanup) = clear_dir(output_dir) {
                    warn!(error = %cleanup, "failed to clear partial output");
                }
                return Err(err);
            }
        }
    }
    Ok(bytes)
}

/// Write `artifact` only if the file on disk differs.
/// Returns whether anything was written.
pub fn write_if_changed(artifact: &Artifact) -> Result<bool, BuildError> {
    match fs::read(&artifact.physical_path) {
        Ok(existing) if existing == artifact.bytes => {
            debug!(name = %artifact.logical_name, "unchanged, skipping write");
            Ok(false)
        }
        _ => write_artifact(artifact).map(|_| true),
    }
}

/// Delete files under `dir` that are not in `keep`, then empty directories.
/// Returns the removed files.
pub fn remove_stale(dir: &Path, keep: &BTreeSet<PathBuf>) -> Result<Vec<PathBuf>, BuildError> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut removed = Vec::new();
    let mut dirs = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).into_iter().filter_map(|e| e.ok()) {
        let path = entry.path();
        if entry.file_type().is_dir() {
            dirs.push(path.to_path_buf());
        } else if !keep.contains(path) {
            fs::remove_file(path).map_err(|e| BuildError::output_write(path, e))?;
            removed.push(path.to_path_buf());
        }
    }

    // Deepest first so parents become empty before they are checked
    dirs.sort_by_key(|d| std::cmp::Reverse(d.components().count()));
    for d in dirs {
        let is_empty = fs::read_dir(&d).map(|mut it| it.next().is_none()).unwrap_or(false);
        if is_empty {
            fs::remove_dir(&d).map_err(|e| BuildError::output_write(&d, e))?;
        }
    }

    Ok(removed)
}
