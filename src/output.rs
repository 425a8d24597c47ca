//! Atomic JSON file output.
//!
//! Each document is written to a uniquely named temp file next to its
//! destination, synced, then renamed over the destination so readers never
//! observe a half-written file.
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OutputError {
    #[error("Failed to serialize '{}': {source}", path.display())]
    Serialize {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to write '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Serializes `value` as pretty-printed UTF-8 JSON and atomically replaces
/// `path` with it. Non-ASCII text is written as-is, not escaped.
pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), OutputError> {
    let mut content = serde_json::to_vec_pretty(value).map_err(|source| OutputError::Serialize {
        path: path.to_path_buf(),
        source,
    })?;
    content.push(b'\n');
    write_atomic(path, &content)
}

/// Writes `content` to `path` through a temp file and a rename.
pub fn write_atomic(path: &Path, content: &[u8]) -> Result<(), OutputError> {
    let temp_path = temp_path_for(path);
    // create_new fails if the name is taken, so an existing file or symlink
    // at the temp path is never written through.
    let mut temp_file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&temp_path)
        .map_err(io_err(&temp_path))?;

    let written = temp_file
        .write_all(content)
        .and_then(|()| temp_file.sync_all());
    drop(temp_file);
    if let Err(e) = written {
        let _ = std::fs::remove_file(&temp_path);
        return Err(io_err(&temp_path)(e));
    }

    // On Windows, rename fails if the destination exists.
    #[cfg(windows)]
    if path.exists() {
        if let Err(e) = std::fs::remove_file(path) {
            let _ = std::fs::remove_file(&temp_path);
            return Err(io_err(path)(e));
        }
    }

    if let Err(e) = std::fs::rename(&temp_path, path) {
        let _ = std::fs::remove_file(&temp_path);
        return Err(io_err(path)(e));
    }
    tracing::debug!(path = %path.display(), bytes = content.len(), "Wrote output file");
    Ok(())
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> OutputError {
    let path = path.to_path_buf();
    move |source| OutputError::Io { path, source }
}

fn temp_path_for(path: &Path) -> PathBuf {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(format!(".tmp.{}.{:016x}", std::process::id(), nanos));
    path.with_file_name(name)
}
