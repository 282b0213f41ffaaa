//! Per-request scratch files for uploaded content.
//!
//! Each upload lands in its own uniquely named file under the configured
//! uploads directory and is deleted when its [`ScratchFile`] guard drops,
//! whether the request succeeded or not.

use crate::error::Result;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Longest sanitized filename kept in a scratch file name.
const MAX_NAME_LEN: usize = 64;

/// Factory for scratch files under a single directory
#[derive(Debug, Clone)]
pub struct ScratchStore {
    dir: PathBuf,
}

/// An uploaded file on disk, removed on drop.
#[derive(Debug)]
pub struct ScratchFile {
    file: NamedTempFile,
    original_name: String,
}

impl ScratchStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write `bytes` to a fresh scratch file.
    ///
    /// The file name is `kgrelay-<random><sanitized original name>`, so two
    /// requests uploading the same filename never share a path.
    pub async fn write(&self, original_name: &str, bytes: Vec<u8>) -> Result<ScratchFile> {
        let dir = self.dir.clone();
        let suffix = format!("-{}", sanitize_filename(original_name));
        let original_name = original_name.to_string();

        // tempfile is blocking; keep it off the async workers
        let file = tokio::task::spawn_blocking(move || -> Result<NamedTempFile> {
            std::fs::create_dir_all(&dir)?;
            let mut file = tempfile::Builder::new()
                .prefix("kgrelay-")
                .suffix(&suffix)
                .tempfile_in(&dir)?;
            file.write_all(&bytes)?;
            file.flush()?;
            Ok(file)
        })
        .await
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))??;

        log::debug!("Wrote scratch file {}", file.path().display());

        Ok(ScratchFile {
            file,
            original_name,
        })
    }
}

impl ScratchFile {
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Filename as sent by the client.
    pub fn original_name(&self) -> &str {
        &self.original_name
    }
}

/// Reduce a client-supplied filename to a safe path component.
///
/// Directory parts are dropped, characters outside `[A-Za-z0-9._-]` become
/// `_`, leading dots are removed and the result is capped in length.
pub fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or("");

    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');

    // Keep the tail so the extension survives truncation
    let char_count = cleaned.chars().count();
    let cleaned: String = if char_count > MAX_NAME_LEN {
        cleaned.chars().skip(char_count - MAX_NAME_LEN).collect()
    } else {
        cleaned.to_string()
    };

    if cleaned.is_empty() {
        "upload".to_string()
    } else {
        cleaned
    }
}
