use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use kernelle_core::{executable_name, is_registry_tool, KernelleLayout, TOOL_NAMES};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::fs_utils::{
    copy_dir_recursive, current_unix_timestamp, install_executable, remove_dir_all_if_exists,
    remove_file_if_exists,
};

pub const SNAPSHOT_MANIFEST: &str = "snapshot.json";
const SNAPSHOT_VERSION: u32 = 1;
const HOME_COPY_DIR: &str = "kernelle_home";
const BINS_COPY_DIR: &str = "bins";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotManifest {
    pub version: u32,
    pub created_at_unix: u64,
    pub home: PathBuf,
    pub bin_dir: PathBuf,
    #[serde(default)]
    pub binaries: Vec<SnapshotBinary>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotBinary {
    pub name: String,
    pub sha256: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreReport {
    pub snapshot: PathBuf,
    pub home_restored: bool,
    pub restored_binaries: Vec<String>,
}

/// Copies the home (minus `snapshots/`) and every installed tool into
/// `<home>/snapshots/pre_update_<unix-ts>`.
pub fn create_snapshot(layout: &KernelleLayout) -> Result<PathBuf> {
    if !layout.home().is_dir() {
        return Err(anyhow!(
            "nothing to snapshot: {} does not exist",
            layout.home().display()
        ));
    }
    let created_at_unix = current_unix_timestamp()?;
    let snapshot_dir = layout.snapshot_path(&format!("pre_update_{created_at_unix}"));
    if snapshot_dir.exists() {
        return Err(anyhow!(
            "snapshot already exists: {}",
            snapshot_dir.display()
        ));
    }
    fs::create_dir_all(&snapshot_dir)
        .with_context(|| format!("failed to create {}", snapshot_dir.display()))?;

    let result = fill_snapshot(layout, &snapshot_dir, created_at_unix);
    if result.is_err() {
        let _ = remove_dir_all_if_exists(&snapshot_dir);
    }
    result.map(|()| snapshot_dir)
}

fn fill_snapshot(layout: &KernelleLayout, snapshot_dir: &Path, created_at_unix: u64) -> Result<()> {
    let home_copy = snapshot_dir.join(HOME_COPY_DIR);
    fs::create_dir_all(&home_copy)
        .with_context(|| format!("failed to create {}", home_copy.display()))?;
    copy_home_except_snapshots(layout.home(), &home_copy)?;

    let bins_copy = snapshot_dir.join(BINS_COPY_DIR);
    fs::create_dir_all(&bins_copy)
        .with_context(|| format!("failed to create {}", bins_copy.display()))?;

    let mut binaries = Vec::new();
    for name in TOOL_NAMES {
        let installed = layout.tool_path(name);
        if !installed.is_file() {
            continue;
        }
        let copy = bins_copy.join(executable_name(name));
        fs::copy(&installed, &copy)
            .with_context(|| format!("failed to back up {}", installed.display()))?;
        binaries.push(SnapshotBinary {
            name: name.to_string(),
            sha256: sha256_file(&copy)?,
        });
    }

    let manifest = SnapshotManifest {
        version: SNAPSHOT_VERSION,
        created_at_unix,
        home: layout.home().to_path_buf(),
        bin_dir: layout.bin_dir().to_path_buf(),
        binaries,
    };
    let manifest_path = snapshot_dir.join(SNAPSHOT_MANIFEST);
    let raw = serde_json::to_string_pretty(&manifest).context("failed to encode snapshot manifest")?;
    fs::write(&manifest_path, raw)
        .with_context(|| format!("failed to write {}", manifest_path.display()))?;

    tracing::info!("snapshot written to {}", snapshot_dir.display());
    Ok(())
}

pub fn read_snapshot_manifest(snapshot_dir: &Path) -> Result<SnapshotManifest> {
    let path = snapshot_dir.join(SNAPSHOT_MANIFEST);
    let raw = fs::read_to_string(&path)
        .with_context(|| format!("failed to read snapshot manifest: {}", path.display()))?;
    let manifest: SnapshotManifest = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse snapshot manifest: {}", path.display()))?;
    if manifest.version != SNAPSHOT_VERSION {
        return Err(anyhow!(
            "unsupported snapshot version {} in {}",
            manifest.version,
            path.display()
        ));
    }
    Ok(manifest)
}

pub fn list_snapshots(layout: &KernelleLayout) -> Result<Vec<PathBuf>> {
    let dir = layout.snapshots_dir();
    let entries = match fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => {
            return Err(err).with_context(|| format!("failed to read {}", dir.display()));
        }
    };

    let mut snapshots = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if path.join(SNAPSHOT_MANIFEST).is_file() {
            snapshots.push(path);
        }
    }
    snapshots.sort();
    Ok(snapshots)
}

/// Restores a snapshot after verifying every binary checksum. The current
/// `snapshots/` directory is kept.
pub fn restore_snapshot(layout: &KernelleLayout, snapshot_dir: &Path) -> Result<RestoreReport> {
    let manifest = read_snapshot_manifest(snapshot_dir)?;
    let bins_copy = snapshot_dir.join(BINS_COPY_DIR);

    for binary in &manifest.binaries {
        if !is_registry_tool(&binary.name) {
            return Err(anyhow!(
                "snapshot lists unknown tool '{}'",
                binary.name
            ));
        }
        let copy = bins_copy.join(executable_name(&binary.name));
        let actual = sha256_file(&copy)?;
        if actual != binary.sha256 {
            return Err(anyhow!(
                "checksum mismatch for {}: expected {}, found {actual}",
                copy.display(),
                binary.sha256
            ));
        }
    }

    let home_copy = snapshot_dir.join(HOME_COPY_DIR);
    let home_restored = home_copy.is_dir();
    if home_restored {
        clear_home_except_snapshots(layout.home())?;
        copy_dir_recursive(&home_copy, layout.home())?;
    }

    let mut restored_binaries = Vec::new();
    for binary in &manifest.binaries {
        let copy = bins_copy.join(executable_name(&binary.name));
        install_executable(&copy, &layout.tool_path(&binary.name))?;
        restored_binaries.push(binary.name.clone());
    }

    tracing::info!("restored snapshot {}", snapshot_dir.display());
    Ok(RestoreReport {
        snapshot: snapshot_dir.to_path_buf(),
        home_restored,
        restored_binaries,
    })
}

pub fn sha256_file(path: &Path) -> Result<String> {
    let bytes = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

fn copy_home_except_snapshots(home: &Path, destination: &Path) -> Result<()> {
    let entries = match fs::read_dir(home) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(err).with_context(|| format!("failed to read {}", home.display())),
    };
    for entry in entries {
        let entry = entry?;
        if entry.file_name() == "snapshots" {
            continue;
        }
        let path = entry.path();
        let target = destination.join(entry.file_name());
        if fs::symlink_metadata(&path)?.is_dir() {
            copy_dir_recursive(&path, &target)?;
        } else {
            fs::copy(&path, &target).with_context(|| {
                format!("failed to copy {} to {}", path.display(), target.display())
            })?;
        }
    }
    Ok(())
}

fn clear_home_except_snapshots(home: &Path) -> Result<()> {
    let entries = match fs::read_dir(home) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(err).with_context(|| format!("failed to read {}", home.display())),
    };
    for entry in entries {
        let entry = entry?;
        if entry.file_name() == "snapshots" {
            continue;
        }
        let path = entry.path();
        let removed = if fs::symlink_metadata(&path)?.is_dir() {
            remove_dir_all_if_exists(&path)
        } else {
            remove_file_if_exists(&path)
        };
        removed.with_context(|| format!("failed to clear {}", path.display()))?;
    }
    Ok(())
}
