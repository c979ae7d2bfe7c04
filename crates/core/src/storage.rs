//! Archive file store.
//!
//! Legacy file attachments live under one or more archive directories,
//! addressed by a relative path recorded in the object store. Those paths
//! cannot be trusted: the legacy system wrote filenames in whatever encoding
//! the uploading browser used, so the recorded path and the on-disk bytes
//! frequently disagree. [`ArchiveStore::locate`] deals with that, computes
//! size and checksum, and decides which storage backend the migrated row
//! points at.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::MigrationConfig;
use crate::errors::StorageError;
use crate::models::StoredFile;

/// Resolves legacy file resources against the configured archive dirs.
pub struct ArchiveStore {
    archive_dirs: Vec<PathBuf>,
    storage_backend: String,
    symlink_backend: Option<String>,
    symlink_target: Option<PathBuf>,
    avoid_storage_check: bool,
}

impl ArchiveStore {
    pub fn new(config: &MigrationConfig) -> Self {
        Self {
            archive_dirs: config.archive_dirs.clone(),
            storage_backend: config.storage_backend.clone(),
            symlink_backend: config.symlink_backend.clone(),
            symlink_target: config.symlink_target.clone(),
            avoid_storage_check: config.avoid_storage_check,
        }
    }

    /// Locate a legacy file by its recorded relative path.
    ///
    /// Returns `Ok(None)` when the file cannot be found (the caller skips
    /// the attachment). With storage checks disabled the first archive dir
    /// is trusted blindly and size/checksum stay empty.
    pub fn locate(&self, repo_path: &str) -> Result<Option<StoredFile>, StorageError> {
        if self.avoid_storage_check {
            // Single archive dir enforced by config validation.
            return Ok(Some(StoredFile {
                backend: self.storage_backend.clone(),
                file_id: repo_path.to_string(),
                size: 0,
                checksum: String::new(),
            }));
        }

        for archive_dir in &self.archive_dirs {
            if let Some(found) = self.locate_in(archive_dir, repo_path)? {
                return Ok(Some(found));
            }
        }
        Ok(None)
    }

    fn locate_in(
        &self,
        archive_dir: &Path,
        repo_path: &str,
    ) -> Result<Option<StoredFile>, StorageError> {
        let candidate = archive_dir.join(repo_path);
        if candidate.is_file() {
            return self.stored_file(archive_dir, &candidate, repo_path).map(Some);
        }

        // The recorded path may have been written in a different encoding
        // than what ended up on disk. If the parent directory exists and
        // holds exactly one entry, that entry is our file.
        if let Some(parent) = candidate.parent() {
            if parent.is_dir() {
                let entries: Vec<_> = std::fs::read_dir(parent)?
                    .filter_map(|e| e.ok())
                    .collect();
                if entries.len() == 1 {
                    let found = entries[0].path();
                    if found.is_file() {
                        debug!(
                            recorded = repo_path,
                            found = %found.display(),
                            "recovered mis-encoded archive path via unique sibling"
                        );
                        return self.stored_file(archive_dir, &found, repo_path).map(Some);
                    }
                }
            }
        }
        Ok(None)
    }

    /// Build the stored-file record for a file found on disk.
    ///
    /// If the on-disk relative path is not valid UTF-8 it cannot be recorded
    /// as text; in that case a UUID-named symlink is created under the
    /// configured symlink target and recorded against the symlink backend.
    fn stored_file(
        &self,
        archive_dir: &Path,
        path: &Path,
        recorded: &str,
    ) -> Result<StoredFile, StorageError> {
        let size = path.metadata()?.len() as i64;
        let checksum = file_checksum(path)?;

        let rel_path = path.strip_prefix(archive_dir).unwrap_or(path);
        match rel_path.to_str() {
            Some(rel) => Ok(StoredFile {
                backend: self.storage_backend.clone(),
                file_id: rel.to_string(),
                size,
                checksum,
            }),
            None => self.symlink_fallback(path, recorded, size, checksum),
        }
    }

    fn symlink_fallback(
        &self,
        path: &Path,
        recorded: &str,
        size: i64,
        checksum: String,
    ) -> Result<StoredFile, StorageError> {
        let (target_dir, backend) = match (&self.symlink_target, &self.symlink_backend) {
            (Some(dir), Some(backend)) => (dir, backend),
            _ => {
                warn!(recorded, "non-UTF8 archive path and no symlink target configured");
                return Err(StorageError::SymlinkFailed {
                    link: recorded.to_string(),
                    detail: "path is not valid UTF-8 and --symlink-target is not set".into(),
                });
            }
        };
        let name = Uuid::new_v4().to_string();
        let link = target_dir.join(&name);
        #[cfg(unix)]
        std::os::unix::fs::symlink(path, &link).map_err(|e| StorageError::SymlinkFailed {
            link: link.display().to_string(),
            detail: e.to_string(),
        })?;
        #[cfg(not(unix))]
        return Err(StorageError::SymlinkFailed {
            link: link.display().to_string(),
            detail: "symlinks are only supported on unix".into(),
        });
        #[cfg(unix)]
        {
            debug!(recorded, link = %link.display(), "created symlink for non-UTF8 path");
            Ok(StoredFile {
                backend: backend.clone(),
                file_id: name,
                size,
                checksum,
            })
        }
    }
}

/// SHA-256 of a file, read in 1 MiB chunks.
pub fn file_checksum(path: &Path) -> Result<String, StorageError> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 1024 * 1024];
    loop {
        let n = file
            .read(&mut buf)
            .map_err(|e| StorageError::ChecksumFailed {
                path: path.display().to_string(),
                detail: e.to_string(),
            })?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Guess a content type from a filename extension.
pub fn guess_content_type(filename: &str) -> &'static str {
    let ext = filename
        .rsplit('.')
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase();
    match ext.as_str() {
        "pdf" => "application/pdf",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "txt" => "text/plain",
        "html" | "htm" => "text/html",
        "zip" => "application/zip",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "ppt" => "application/vnd.ms-powerpoint",
        "pptx" => "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        "xls" => "application/vnd.ms-excel",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        _ => "application/octet-stream",
    }
}
