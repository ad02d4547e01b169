//! Media file scanner
//!
//! Recursive image/video discovery for uploads and downloader output.
//! Directories are walked in name order; files are kept when their magic
//! bytes identify an image or video. Sidecar `.json` files are skipped.
//!
//! After an upload run with cleanup enabled, `remove_uploaded` deletes each
//! uploaded file and `cleanup_dirs` prunes what is left of the source tree.

use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::{DirEntry, WalkDir};

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),

    #[error("File access error {0}: {1}")]
    FileAccessError(PathBuf, String),
}

pub struct MediaScanner {
    ignore_patterns: Vec<String>,
}

impl Default for MediaScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl MediaScanner {
    /// Scanner ignoring common system files (.DS_Store, Thumbs.db, .git)
    pub fn new() -> Self {
        Self {
            ignore_patterns: vec![".DS_Store".to_string(), "Thumbs.db".to_string(), ".git".to_string()],
        }
    }

    /// Media files under `paths`; plain files are checked directly
    pub fn scan(&self, paths: &[PathBuf]) -> Result<Vec<PathBuf>, ScanError> {
        let mut media = Vec::new();

        for root in paths {
            if !root.exists() {
                return Err(ScanError::PathNotFound(root.clone()));
            }

            if root.is_file() {
                if self.is_media_file(root)? {
                    media.push(root.clone());
                }
                continue;
            }

            let walker = WalkDir::new(root)
                .follow_links(false)
                .sort_by_file_name()
                .into_iter()
                .filter_entry(|e| self.should_process_entry(e));

            for entry in walker {
                match entry {
                    Ok(entry) if entry.file_type().is_file() => match self.is_media_file(entry.path()) {
                        Ok(true) => media.push(entry.path().to_path_buf()),
                        Ok(false) => {}
                        Err(e) => tracing::warn!("Error verifying {}: {}", entry.path().display(), e),
                    },
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!("Error accessing entry: {}", e);
                    }
                }
            }
        }

        tracing::debug!("{} media files found", media.len());
        Ok(media)
    }

    fn should_process_entry(&self, entry: &DirEntry) -> bool {
        let file_name = entry.file_name().to_string_lossy();
        !self.ignore_patterns.iter().any(|p| file_name.contains(p.as_str()))
    }

    /// Check magic bytes for an image or video
    fn is_media_file(&self, path: &Path) -> Result<bool, ScanError> {
        if path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("json")) {
            return Ok(false);
        }

        let kind = infer::get_from_path(path).map_err(|e| ScanError::FileAccessError(path.to_path_buf(), e.to_string()))?;
        Ok(kind.is_some_and(|k| {
            matches!(k.matcher_type(), infer::MatcherType::Image | infer::MatcherType::Video)
        }))
    }
}

/// File extension from magic bytes, falling back to the name's extension
pub fn detect_extension(bytes: &[u8], path: &Path) -> Option<String> {
    infer::get(bytes)
        .map(|k| k.extension().to_string())
        .or_else(|| path.extension().map(|e| e.to_string_lossy().to_lowercase()))
}

/// Delete an uploaded file and its `.json` sidecar, if any
pub fn remove_uploaded(path: &Path) -> Result<(), ScanError> {
    std::fs::remove_file(path).map_err(|e| ScanError::FileAccessError(path.to_path_buf(), e.to_string()))?;

    let mut sidecar = path.as_os_str().to_owned();
    sidecar.push(".json");
    let sidecar = PathBuf::from(sidecar);
    if sidecar.is_file() {
        std::fs::remove_file(&sidecar).map_err(|e| ScanError::FileAccessError(sidecar.clone(), e.to_string()))?;
    }
    tracing::debug!(path = %path.display(), "Removed uploaded file");
    Ok(())
}

/// Prune `root` after uploads: drop `Thumbs.db` files and `@eaDir`
/// directories, then every directory left empty
///
/// `root` itself is kept. Returns the number of directories removed.
pub fn cleanup_dirs(root: &Path) -> Result<usize, ScanError> {
    if !root.is_dir() {
        return Ok(0);
    }

    let mut removed = 0;
    // Children before parents, so nested empty directories collapse upwards
    for entry in WalkDir::new(root).min_depth(1).contents_first(true) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!("Error accessing entry: {}", e);
                continue;
            }
        };
        let path = entry.path();
        let name = entry.file_name().to_string_lossy();

        if entry.file_type().is_file() && name == "Thumbs.db" {
            std::fs::remove_file(path).map_err(|e| ScanError::FileAccessError(path.to_path_buf(), e.to_string()))?;
        } else if entry.file_type().is_dir() {
            if name == "@eaDir" {
                std::fs::remove_dir_all(path)
                    .map_err(|e| ScanError::FileAccessError(path.to_path_buf(), e.to_string()))?;
                removed += 1;
            } else if std::fs::remove_dir(path).is_ok() {
                // Only succeeds when empty
                removed += 1;
            }
        }
    }

    tracing::debug!(root = %root.display(), removed, "Cleaned up source directories");
    Ok(removed)
}
