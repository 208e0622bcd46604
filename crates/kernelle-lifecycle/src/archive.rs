use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::fs_utils::{copy_dir_recursive, remove_dir_all_if_exists};

#[derive(Debug, Error)]
pub enum BackupError {
    #[error("backup destination already exists: {}", .0.display())]
    DestinationExists(PathBuf),
    #[error("backup source is not a directory: {}", .0.display())]
    SourceNotDirectory(PathBuf),
    #[error("failed to {action} {}: {source}", .path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        source: io::Error,
    },
    #[error("failed to copy {} into backup: {reason}", .source_dir.display())]
    CopyFailed { source_dir: PathBuf, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveOutcome {
    /// Relocated with a single rename.
    Moved(PathBuf),
    /// Copied across filesystems, then the source was retired.
    Copied(PathBuf),
    SourceAbsent,
}

impl ArchiveOutcome {
    pub fn destination(&self) -> Option<&Path> {
        match self {
            Self::Moved(path) | Self::Copied(path) => Some(path),
            Self::SourceAbsent => None,
        }
    }
}

/// Moves `source` to `destination` as a whole. On any error `source` is left
/// exactly as it was and `destination` is not created.
pub fn archive(source: &Path, destination: &Path) -> Result<ArchiveOutcome, BackupError> {
    match fs::symlink_metadata(source) {
        Ok(metadata) if metadata.is_dir() => {}
        Ok(_) => return Err(BackupError::SourceNotDirectory(source.to_path_buf())),
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(ArchiveOutcome::SourceAbsent),
        Err(source_err) => {
            return Err(BackupError::Io {
                action: "inspect",
                path: source.to_path_buf(),
                source: source_err,
            })
        }
    }
    if fs::symlink_metadata(destination).is_ok() {
        return Err(BackupError::DestinationExists(destination.to_path_buf()));
    }
    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent).map_err(|err| BackupError::Io {
            action: "create",
            path: parent.to_path_buf(),
            source: err,
        })?;
    }

    match fs::rename(source, destination) {
        Ok(()) => {
            tracing::info!("moved {} to {}", source.display(), destination.display());
            Ok(ArchiveOutcome::Moved(destination.to_path_buf()))
        }
        Err(err) if err.kind() == io::ErrorKind::CrossesDevices => {
            tracing::debug!(
                "{} and {} are on different filesystems; backing up by copy",
                source.display(),
                destination.display()
            );
            copy_then_retire(source, destination)
        }
        Err(err) => Err(BackupError::Io {
            action: "move",
            path: source.to_path_buf(),
            source: err,
        }),
    }
}

pub(crate) fn copy_then_retire(source: &Path, destination: &Path) -> Result<ArchiveOutcome, BackupError> {
    let staging = sibling_with_suffix(destination, "partial");
    let _ = remove_dir_all_if_exists(&staging);

    if let Err(err) = copy_dir_recursive(source, &staging) {
        let _ = remove_dir_all_if_exists(&staging);
        return Err(BackupError::CopyFailed {
            source_dir: source.to_path_buf(),
            reason: format!("{err:#}"),
        });
    }
    if let Err(err) = fs::rename(&staging, destination) {
        let _ = remove_dir_all_if_exists(&staging);
        return Err(BackupError::Io {
            action: "finalize backup",
            path: destination.to_path_buf(),
            source: err,
        });
    }

    // Retire the source with one rename so it is either whole or gone.
    let retired = sibling_with_suffix(source, "archived");
    if let Err(err) = fs::rename(source, &retired) {
        let _ = remove_dir_all_if_exists(destination);
        return Err(BackupError::Io {
            action: "retire",
            path: source.to_path_buf(),
            source: err,
        });
    }
    if let Err(err) = remove_dir_all_if_exists(&retired) {
        tracing::warn!(
            "backup complete but {} could not be removed: {err}",
            retired.display()
        );
    }

    tracing::info!("copied {} to {}", source.display(), destination.display());
    Ok(ArchiveOutcome::Copied(destination.to_path_buf()))
}

fn sibling_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "backup".to_string());
    path.with_file_name(format!(".{name}.{suffix}-{}", std::process::id()))
}
