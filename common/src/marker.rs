//! Extended-attribute markers that tag finished recordings.
//!
//! A recording is tracked when it carries `user.<name>` with a non-empty
//! value. Anything else in the recordings directory is left alone.

use nix::errno::Errno;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

pub const ATTRIBUTE_PREFIX: &str = "user.";

#[cfg(any(target_os = "linux", target_os = "android"))]
const ATTRIBUTE_ABSENT: Errno = Errno::ENODATA;
#[cfg(not(any(target_os = "linux", target_os = "android")))]
const ATTRIBUTE_ABSENT: Errno = Errno::ENOATTR;

#[derive(Debug, Error)]
pub enum MarkerError {
    #[error("failed to set xattr '{key}' on {path:?}: {source}")]
    AttributeWrite {
        path: PathBuf,
        key: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to get xattr '{key}' from {path:?}: {source}")]
    AttributeRead {
        path: PathBuf,
        key: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to remove xattr '{key}' from {path:?}: {source}")]
    AttributeRemove {
        path: PathBuf,
        key: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to create scratch file {path:?}: {source}")]
    ScratchFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to read directory {path:?}: {source}")]
    ReadDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Values a recording can be marked with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerValue {
    /// A normal, continuous recording segment.
    Standard,
    /// A segment the user asked to keep an eye on.
    Emergency,
}

impl MarkerValue {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarkerValue::Standard => "standard_recording",
            MarkerValue::Emergency => "emergency_recording",
        }
    }
}

impl fmt::Display for MarkerValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MarkerValue {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "standard" | "standard_recording" => Ok(MarkerValue::Standard),
            "emergency" | "emergency_recording" => Ok(MarkerValue::Emergency),
            _ => Err(anyhow::anyhow!("Unknown marker value: {}", s)),
        }
    }
}

pub fn attribute_key(name: &str) -> String {
    format!("{}{}", ATTRIBUTE_PREFIX, name)
}

fn is_absent(err: &io::Error) -> bool {
    err.raw_os_error()
        .map(|code| Errno::from_i32(code) == ATTRIBUTE_ABSENT)
        .unwrap_or(false)
}

/// Attach `value` under `user.<name>` on `path`.
pub fn set_marker(path: &Path, name: &str, value: &str) -> Result<(), MarkerError> {
    let key = attribute_key(name);
    xattr::set(path, &key, value.as_bytes()).map_err(|source| MarkerError::AttributeWrite {
        path: path.to_path_buf(),
        key: key.clone(),
        source,
    })?;
    log::info!("Set marker '{}={}' on file: {}", key, value, path.display());
    Ok(())
}

/// Read the stored value. `None` when the attribute is not present.
pub fn get_marker(path: &Path, name: &str) -> Result<Option<String>, MarkerError> {
    let key = attribute_key(name);
    match xattr::get(path, &key) {
        Ok(value) => Ok(value.map(|bytes| String::from_utf8_lossy(&bytes).into_owned())),
        Err(e) if is_absent(&e) => Ok(None),
        Err(source) => Err(MarkerError::AttributeRead {
            path: path.to_path_buf(),
            key,
            source,
        }),
    }
}

/// Remove the attribute. Removing a marker that is not there succeeds.
pub fn remove_marker(path: &Path, name: &str) -> Result<(), MarkerError> {
    let key = attribute_key(name);
    match xattr::remove(path, &key) {
        Ok(()) => {
            log::info!("Removed marker '{}' from file: {}", key, path.display());
            Ok(())
        }
        Err(e) if is_absent(&e) => Ok(()),
        Err(source) => Err(MarkerError::AttributeRemove {
            path: path.to_path_buf(),
            key,
            source,
        }),
    }
}

/// True only when the attribute exists and holds a non-empty value.
pub fn has_marker(path: &Path, name: &str) -> Result<bool, MarkerError> {
    Ok(get_marker(path, name)?.map_or(false, |value| !value.is_empty()))
}

/// Regular files in `directory` that carry a non-empty marker, in listing order.
///
/// Entries that cannot be inspected are logged and skipped.
pub fn list_marked_files(directory: &Path, name: &str) -> Result<Vec<PathBuf>, MarkerError> {
    let entries = fs::read_dir(directory).map_err(|source| MarkerError::ReadDir {
        path: directory.to_path_buf(),
        source,
    })?;

    let mut marked = Vec::new();
    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                log::warn!("Could not read entry in {}: {}. Skipping.", directory.display(), e);
                continue;
            }
        };

        if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
            continue;
        }

        let path = entry.path();
        match fs::metadata(&path) {
            Ok(meta) if meta.is_file() => {}
            Ok(_) => continue,
            Err(e) => {
                log::warn!("Could not stat file {}: {}. Skipping.", path.display(), e);
                continue;
            }
        }

        match has_marker(&path, name) {
            Ok(true) => marked.push(path),
            Ok(false) => {}
            Err(e) => log::warn!("Could not check marker for {}: {}", path.display(), e),
        }
    }

    Ok(marked)
}

/// Check that `directory` accepts user extended attributes.
///
/// A scratch file is created, tagged and removed again.
pub fn probe_support(directory: &Path) -> Result<(), MarkerError> {
    let probe = directory.join(format!(".dashcam-probe-{}", std::process::id()));
    fs::write(&probe, b"").map_err(|source| MarkerError::ScratchFile {
        path: probe.clone(),
        source,
    })?;
    let key = attribute_key("probe");
    let result = xattr::set(&probe, &key, b"1").map_err(|source| MarkerError::AttributeWrite {
        path: probe.clone(),
        key,
        source,
    });
    if let Err(e) = fs::remove_file(&probe) {
        log::warn!("Could not remove scratch file {}: {}", probe.display(), e);
    }
    result
}
