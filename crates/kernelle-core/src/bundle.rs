use std::fs;
use std::path::{Path, PathBuf};

use semver::Version;
use serde::Deserialize;

use crate::error::PreconditionError;
use crate::registry::executable_name;

pub const BUILD_DESCRIPTOR: &str = "Cargo.toml";
pub const SOURCE_ENV: &str = "KERNELLE_SOURCE";

#[derive(Debug, Deserialize)]
struct RawDescriptor {
    workspace: Option<RawWorkspace>,
}

#[derive(Debug, Deserialize)]
struct RawWorkspace {
    package: Option<RawWorkspacePackage>,
}

#[derive(Debug, Deserialize)]
struct RawWorkspacePackage {
    version: Option<String>,
}

/// A checked-out toolkit source tree that install can build and copy from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceBundle {
    root: PathBuf,
    version: Option<Version>,
}

impl SourceBundle {
    pub fn locate(root: &Path) -> Result<Self, PreconditionError> {
        let descriptor_path = root.join(BUILD_DESCRIPTOR);
        let raw = match fs::read_to_string(&descriptor_path) {
            Ok(raw) => raw,
            Err(_) if !descriptor_path.exists() => {
                return Err(PreconditionError::MissingDescriptor {
                    root: root.to_path_buf(),
                    descriptor: BUILD_DESCRIPTOR,
                    contents: list_dir_names(root),
                });
            }
            Err(err) => {
                return Err(PreconditionError::InvalidDescriptor {
                    path: descriptor_path,
                    reason: err.to_string(),
                });
            }
        };
        Self::from_toml_str(root, &raw)
    }

    pub fn from_toml_str(root: &Path, input: &str) -> Result<Self, PreconditionError> {
        let descriptor_path = root.join(BUILD_DESCRIPTOR);
        let invalid = |reason: String| PreconditionError::InvalidDescriptor {
            path: descriptor_path.clone(),
            reason,
        };

        let parsed: RawDescriptor = toml::from_str(input).map_err(|err| invalid(err.to_string()))?;
        let workspace = parsed
            .workspace
            .ok_or_else(|| invalid("missing [workspace] table".to_string()))?;
        let version = workspace
            .package
            .and_then(|package| package.version)
            .map(|raw| {
                Version::parse(&raw)
                    .map_err(|err| invalid(format!("workspace version '{raw}': {err}")))
            })
            .transpose()?;

        Ok(Self {
            root: root.to_path_buf(),
            version,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn version(&self) -> Option<&Version> {
        self.version.as_ref()
    }

    pub fn rules_dir(&self) -> PathBuf {
        self.root.join("rules")
    }

    pub fn artifacts_dir(&self) -> PathBuf {
        self.root.join("target").join("release")
    }

    pub fn artifact_path(&self, tool: &str) -> PathBuf {
        self.artifacts_dir().join(executable_name(tool))
    }
}

/// Picks the bundle root for a binary built inside it (`<root>/target/release/<exe>`).
pub fn default_source_root(current_exe: &Path) -> PathBuf {
    current_exe
        .ancestors()
        .skip(1)
        .find(|dir| dir.join(BUILD_DESCRIPTOR).is_file())
        .or_else(|| current_exe.ancestors().nth(3))
        .unwrap_or(current_exe)
        .to_path_buf()
}

fn list_dir_names(dir: &Path) -> Vec<String> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut names = entries
        .flatten()
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .collect::<Vec<_>>();
    names.sort();
    names
}
