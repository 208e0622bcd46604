use std::fs;
use std::io;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, Context, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOutcome {
    Removed,
    AlreadyAbsent,
}

// symlink_metadata so that dangling links still count as present
pub fn remove_file_if_exists(path: &Path) -> io::Result<RemoveOutcome> {
    match fs::symlink_metadata(path) {
        Ok(_) => {}
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(RemoveOutcome::AlreadyAbsent),
        Err(err) => return Err(err),
    }
    match fs::remove_file(path) {
        Ok(()) => Ok(RemoveOutcome::Removed),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(RemoveOutcome::AlreadyAbsent),
        Err(err) => Err(err),
    }
}

pub fn remove_dir_all_if_exists(path: &Path) -> io::Result<RemoveOutcome> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(RemoveOutcome::Removed),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(RemoveOutcome::AlreadyAbsent),
        Err(err) => Err(err),
    }
}

/// Copies the tree at `src` into `dst`, merging with whatever `dst` already
/// holds. Links are recreated as links, never followed.
pub fn copy_dir_recursive(src: &Path, dst: &Path) -> Result<()> {
    fs::create_dir_all(dst)
        .with_context(|| format!("cannot create kernelle directory {}", dst.display()))?;
    let entries = fs::read_dir(src)
        .with_context(|| format!("cannot list kernelle directory {}", src.display()))?;
    for entry in entries {
        let entry =
            entry.with_context(|| format!("cannot list kernelle directory {}", src.display()))?;
        let from = entry.path();
        let to = dst.join(entry.file_name());
        let file_type = fs::symlink_metadata(&from)
            .with_context(|| format!("cannot inspect {}", from.display()))?
            .file_type();

        if file_type.is_dir() {
            copy_dir_recursive(&from, &to)?;
        } else if file_type.is_symlink() {
            copy_link(&from, &to)?;
        } else {
            fs::copy(&from, &to).with_context(|| {
                format!("failed to copy {} into {}", from.display(), dst.display())
            })?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn copy_link(from: &Path, to: &Path) -> Result<()> {
    let target =
        fs::read_link(from).with_context(|| format!("cannot read link {}", from.display()))?;
    remove_file_if_exists(to)
        .with_context(|| format!("cannot replace existing entry {}", to.display()))?;
    std::os::unix::fs::symlink(&target, to).with_context(|| {
        format!("cannot recreate link {} -> {}", to.display(), target.display())
    })
}

// Without unix symlinks, copy whatever the link resolves to.
#[cfg(not(unix))]
fn copy_link(from: &Path, to: &Path) -> Result<()> {
    fs::copy(from, to)
        .map(|_| ())
        .with_context(|| format!("failed to copy {} to {}", from.display(), to.display()))
}

/// Replaces `dst` with a copy of `src` and marks it executable.
pub fn install_executable(src: &Path, dst: &Path) -> Result<()> {
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    remove_file_if_exists(dst)
        .with_context(|| format!("failed to replace existing binary: {}", dst.display()))?;
    fs::copy(src, dst)
        .with_context(|| format!("failed to copy {} to {}", src.display(), dst.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(dst, fs::Permissions::from_mode(0o755))
            .with_context(|| format!("failed to mark {} executable", dst.display()))?;
    }
    Ok(())
}

pub fn current_unix_timestamp() -> Result<u64> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_secs())
        .map_err(|_| anyhow!("system clock is before unix epoch"))
}
