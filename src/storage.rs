// SPDX-License-Identifier: GPL-3.0-only

//! Storage utilities for captured photos
//!
//! File naming, crash-safe writes and registration of new captures with the
//! host media index.

use crate::errors::MediaIndexError;
use std::collections::VecDeque;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info};

/// Host media library registration
///
/// Called once per file written. Failures are logged by the caller and
/// never fail the capture.
pub trait MediaIndex: Send + Sync {
    fn register(&self, path: &Path) -> Result<(), MediaIndexError>;
}

/// In-process index of the most recent captures
pub struct RecentMediaIndex {
    capacity: usize,
    entries: Mutex<VecDeque<PathBuf>>,
}

impl RecentMediaIndex {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Mutex::new(VecDeque::with_capacity(capacity.max(1))),
        }
    }

    /// Most recently registered path
    pub fn latest(&self) -> Option<PathBuf> {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .back()
            .cloned()
    }

    /// Registered paths, oldest first
    pub fn entries(&self) -> Vec<PathBuf> {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }
}

impl Default for RecentMediaIndex {
    fn default() -> Self {
        Self::new(crate::constants::RECENT_MEDIA_CAPACITY)
    }
}

impl MediaIndex for RecentMediaIndex {
    fn register(&self, path: &Path) -> Result<(), MediaIndexError> {
        if !path.is_file() {
            return Err(MediaIndexError {
                path: path.display().to_string(),
                reason: "not a file".into(),
            });
        }

        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(path.to_path_buf());
        debug!(path = %path.display(), "Registered capture with media index");
        Ok(())
    }
}

/// Timestamped file name: `IMG_YYYYMMDD_HHMMSS_mmm.ext`
pub fn capture_filename(timestamp: chrono::DateTime<chrono::Local>, extension: &str) -> String {
    format!("IMG_{}.{}", timestamp.format("%Y%m%d_%H%M%S_%3f"), extension)
}

/// Pick a path in `dir` that does not exist yet
///
/// Appends `_1`, `_2`, ... to the stem on collision.
pub fn unique_capture_path(dir: &Path, filename: &str) -> PathBuf {
    let candidate = dir.join(filename);
    if !candidate.exists() {
        return candidate;
    }

    let (stem, extension) = match filename.rsplit_once('.') {
        Some((stem, ext)) => (stem, Some(ext)),
        None => (filename, None),
    };

    (1u32..)
        .map(|n| match extension {
            Some(ext) => dir.join(format!("{}_{}.{}", stem, n, ext)),
            None => dir.join(format!("{}_{}", stem, n)),
        })
        .find(|path| !path.exists())
        .unwrap_or(candidate)
}

/// Write `data` to `path` through a `.part` sibling and rename
///
/// A failed write leaves no file behind: the partial file is removed.
pub fn write_atomically(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut partial = path.as_os_str().to_owned();
    partial.push(".part");
    let partial = PathBuf::from(partial);

    let result = (|| {
        let mut file = std::fs::File::create(&partial)?;
        file.write_all(data)?;
        file.sync_all()?;
        std::fs::rename(&partial, path)
    })();

    if result.is_err() {
        let _ = std::fs::remove_file(&partial);
    }
    result
}

/// Most recently modified JPEG or PNG in `dir`
pub async fn latest_capture(dir: PathBuf) -> Option<PathBuf> {
    let latest = tokio::task::spawn_blocking(move || {
        std::fs::read_dir(&dir)
            .ok()?
            .flatten()
            .filter(|entry| {
                entry.path().extension().is_some_and(|ext| {
                    let ext = ext.to_string_lossy();
                    ext.eq_ignore_ascii_case("jpg") || ext.eq_ignore_ascii_case("png")
                })
            })
            .filter_map(|entry| {
                let modified = entry.metadata().ok()?.modified().ok()?;
                Some((modified, entry.path()))
            })
            .max_by_key(|(modified, _)| *modified)
            .map(|(_, path)| path)
    })
    .await
    .ok()??;

    info!(path = %latest.display(), "Found latest capture");
    Some(latest)
}
