use crate::marker::{self, MarkerError};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

#[derive(Debug, Default)]
pub struct CleanupReport {
    /// Marked recordings found before the pass.
    pub marked: usize,
    pub removed: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, String)>,
}

/// Pick the files to evict so that at most `max_files` remain.
///
/// Oldest first. Files without a readable modification time sort as newest
/// so they are never evicted ahead of files we can date.
pub fn plan_evictions(
    mut files: Vec<(PathBuf, Option<SystemTime>)>,
    max_files: usize,
) -> Vec<PathBuf> {
    if files.len() <= max_files {
        return Vec::new();
    }

    files.sort_by_key(|(_, modified)| (modified.is_none(), *modified));

    let excess = files.len() - max_files;
    files.into_iter().take(excess).map(|(path, _)| path).collect()
}

fn modified_time(path: &Path) -> Option<SystemTime> {
    match fs::metadata(path).and_then(|meta| meta.modified()) {
        Ok(time) => Some(time),
        Err(e) => {
            log::warn!("Could not stat {} for retention ordering: {}", path.display(), e);
            None
        }
    }
}

/// Delete the oldest marked recordings in `directory` beyond `max_files`.
///
/// Unmarked files are never considered. A failed deletion is logged and
/// recorded in the report; the pass carries on with the rest.
pub fn enforce_max_files(
    directory: &Path,
    marker_name: &str,
    max_files: usize,
) -> Result<CleanupReport, MarkerError> {
    enforce_max_files_with(directory, marker_name, max_files, |path| fs::remove_file(path))
}

/// [`enforce_max_files`] with a caller-supplied delete operation.
pub fn enforce_max_files_with<F>(
    directory: &Path,
    marker_name: &str,
    max_files: usize,
    mut remove: F,
) -> Result<CleanupReport, MarkerError>
where
    F: FnMut(&Path) -> io::Result<()>,
{
    let files = marker::list_marked_files(directory, marker_name)?;
    let mut report = CleanupReport {
        marked: files.len(),
        ..Default::default()
    };

    if files.len() <= max_files {
        log::debug!("Retention: {} marked recordings, limit {}", files.len(), max_files);
        return Ok(report);
    }

    let dated = files
        .into_iter()
        .map(|path| {
            let modified = modified_time(&path);
            (path, modified)
        })
        .collect();

    for path in plan_evictions(dated, max_files) {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        log::info!("Removing old recording: {}", name);
        match remove(&path) {
            Ok(()) => report.removed.push(path),
            Err(e) => {
                log::warn!("Could not remove file {}: {}", path.display(), e);
                report.failed.push((path, e.to_string()));
            }
        }
    }

    Ok(report)
}
