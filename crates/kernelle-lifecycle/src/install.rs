use std::ffi::OsString;
use std::fs;
use std::path::PathBuf;
use std::process::Command;

use anyhow::{anyhow, Context, Result};
use kernelle_core::{KernelleLayout, SourceBundle, SourceTemplate, TOOL_NAMES};

use crate::fs_utils::{copy_dir_recursive, install_executable};

/// Produces the toolkit's binaries inside a source bundle.
pub trait BinaryBuilder {
    fn build(&self, bundle: &SourceBundle) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct CargoBuilder {
    cargo: OsString,
}

impl CargoBuilder {
    pub fn new(cargo: impl Into<OsString>) -> Self {
        Self {
            cargo: cargo.into(),
        }
    }

    /// Uses `$CARGO` when set, as it is inside cargo-driven runs.
    pub fn from_env() -> Self {
        Self::new(std::env::var_os("CARGO").unwrap_or_else(|| OsString::from("cargo")))
    }
}

impl BinaryBuilder for CargoBuilder {
    fn build(&self, bundle: &SourceBundle) -> Result<()> {
        tracing::info!("building release binaries in {}", bundle.root().display());
        run_command(
            Command::new(&self.cargo)
                .arg("build")
                .arg("--release")
                .current_dir(bundle.root()),
            "failed to build kernelle binaries",
        )
    }
}

/// Uses whatever already sits in the bundle's release directory.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrebuiltArtifacts;

impl BinaryBuilder for PrebuiltArtifacts {
    fn build(&self, bundle: &SourceBundle) -> Result<()> {
        tracing::debug!(
            "skipping build; using artifacts in {}",
            bundle.artifacts_dir().display()
        );
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolStatus {
    Installed,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolInstall {
    pub name: &'static str,
    pub status: ToolStatus,
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RulesStatus {
    Copied(PathBuf),
    MissingInBundle(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReport {
    pub version: Option<String>,
    pub tools: Vec<ToolInstall>,
    pub rules: RulesStatus,
    pub source_file: PathBuf,
    pub warnings: Vec<String>,
}

impl InstallReport {
    pub fn installed(&self) -> impl Iterator<Item = &ToolInstall> {
        self.tools
            .iter()
            .filter(|tool| tool.status == ToolStatus::Installed)
    }

    pub fn skipped(&self) -> impl Iterator<Item = &ToolInstall> {
        self.tools
            .iter()
            .filter(|tool| tool.status == ToolStatus::Skipped)
    }
}

/// Progress hooks for callers that render install steps.
pub trait InstallObserver {
    fn building(&mut self) {}
    fn tool_processed(&mut self, _tool: &ToolInstall) {}
}

pub struct NoopObserver;

impl InstallObserver for NoopObserver {}

/// Installs from an already located bundle. Every step may be re-run.
pub fn install(
    layout: &KernelleLayout,
    bundle: &SourceBundle,
    builder: &dyn BinaryBuilder,
    observer: &mut dyn InstallObserver,
) -> Result<InstallReport> {
    layout.ensure_base_dirs()?;

    observer.building();
    builder.build(bundle)?;

    let mut tools = Vec::with_capacity(TOOL_NAMES.len());
    for name in TOOL_NAMES {
        let artifact = bundle.artifact_path(name);
        let destination = layout.tool_path(name);
        let status = if artifact.is_file() {
            install_executable(&artifact, &destination)?;
            tracing::info!("installed {name} to {}", destination.display());
            ToolStatus::Installed
        } else {
            tracing::warn!("{name} was not built; skipping");
            ToolStatus::Skipped
        };
        let tool = ToolInstall {
            name,
            status,
            path: destination,
        };
        observer.tool_processed(&tool);
        tools.push(tool);
    }

    let mut warnings = Vec::new();
    let bundle_rules = bundle.rules_dir();
    let rules = if bundle_rules.is_dir() {
        copy_dir_recursive(&bundle_rules, &layout.rules_dir())?;
        RulesStatus::Copied(layout.rules_dir())
    } else {
        let warning = format!(
            "rules bundle not found at {}; workflows will be unavailable",
            bundle_rules.display()
        );
        tracing::warn!("{warning}");
        warnings.push(warning);
        RulesStatus::MissingInBundle(bundle_rules)
    };

    let source_file = layout.source_file_path();
    write_source_file(layout, SourceTemplate::Enabled)?;

    Ok(InstallReport {
        version: bundle.version().map(ToString::to_string),
        tools,
        rules,
        source_file,
        warnings,
    })
}

pub fn write_source_file(layout: &KernelleLayout, template: SourceTemplate) -> Result<()> {
    let path = layout.source_file_path();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::write(&path, template.contents())
        .with_context(|| format!("failed to write {}", path.display()))
}

fn run_command(command: &mut Command, context_message: &str) -> Result<()> {
    let program = command.get_program().to_string_lossy().into_owned();
    let output = command
        .output()
        .with_context(|| format!("{context_message}: could not start {program}"))?;
    if output.status.success() {
        return Ok(());
    }

    // cargo reports compile errors on stderr; stdout is only useful as a fallback
    let stderr = String::from_utf8_lossy(&output.stderr);
    let detail = match stderr.trim() {
        "" => String::from_utf8_lossy(&output.stdout).trim().to_string(),
        trimmed => trimmed.to_string(),
    };
    Err(anyhow!("{context_message}: {program} exited with {}\n{detail}", output.status))
}
