use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::error::PreconditionError;
use crate::registry::executable_name;

pub const HOME_ENV: &str = "KERNELLE_HOME";
pub const INSTALL_DIR_ENV: &str = "INSTALL_DIR";
pub const SOURCE_FILE_NAME: &str = ".kernelle.source";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelleLayout {
    home: PathBuf,
    bin_dir: PathBuf,
    user_home: PathBuf,
}

impl KernelleLayout {
    pub fn new(
        home: impl Into<PathBuf>,
        bin_dir: impl Into<PathBuf>,
        user_home: impl Into<PathBuf>,
    ) -> Self {
        Self {
            home: home.into(),
            bin_dir: bin_dir.into(),
            user_home: user_home.into(),
        }
    }

    /// Resolves the layout from an environment lookup. Empty values count as unset.
    /// Relative values are anchored at `current_dir`, so every derived path is absolute.
    pub fn from_env_lookup<F>(lookup: F, current_dir: &Path) -> Result<Self, PreconditionError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let anchored = |value: String| current_dir.join(value);

        let user_home = non_empty("HOME")
            .or_else(|| non_empty("USERPROFILE"))
            .map(anchored)
            .ok_or(PreconditionError::HomeUnresolved)?;
        let home = non_empty(HOME_ENV)
            .map(anchored)
            .unwrap_or_else(|| user_home.join(".kernelle"));
        let bin_dir = non_empty(INSTALL_DIR_ENV)
            .map(anchored)
            .unwrap_or_else(|| user_home.join(".cargo").join("bin"));

        Ok(Self::new(home, bin_dir, user_home))
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    pub fn bin_dir(&self) -> &Path {
        &self.bin_dir
    }

    pub fn user_home(&self) -> &Path {
        &self.user_home
    }

    pub fn rules_dir(&self) -> PathBuf {
        self.home.join("rules")
    }

    pub fn tweaks_dir(&self) -> PathBuf {
        self.rules_dir().join("tweaks")
    }

    pub fn insights_dir(&self) -> PathBuf {
        self.home.join("insights")
    }

    pub fn global_insights_dir(&self) -> PathBuf {
        self.home.join("global-insights")
    }

    pub fn snapshots_dir(&self) -> PathBuf {
        self.home.join("snapshots")
    }

    pub fn snapshot_path(&self, name: &str) -> PathBuf {
        self.snapshots_dir().join(name)
    }

    pub fn insights_backup_dir(&self) -> PathBuf {
        self.home_sibling("insights_backup")
    }

    pub fn tweaks_backup_dir(&self) -> PathBuf {
        self.home_sibling("tweaks_backup")
    }

    pub fn source_file_path(&self) -> PathBuf {
        self.user_home.join(SOURCE_FILE_NAME)
    }

    pub fn tool_path(&self, tool: &str) -> PathBuf {
        self.bin_dir.join(executable_name(tool))
    }

    pub fn ensure_base_dirs(&self) -> Result<()> {
        for dir in [self.home.as_path(), self.bin_dir.as_path()] {
            fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        Ok(())
    }

    // Backups sit next to the home so that removing the home never touches them.
    fn home_sibling(&self, suffix: &str) -> PathBuf {
        match self.home.file_name() {
            Some(name) => self
                .home
                .with_file_name(format!("{}_{suffix}", name.to_string_lossy())),
            None => self.user_home.join(format!(".kernelle_{suffix}")),
        }
    }
}
