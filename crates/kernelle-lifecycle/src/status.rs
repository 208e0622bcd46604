use std::fs;
use std::path::PathBuf;

use kernelle_core::{KernelleLayout, SourceTemplate, TOOL_NAMES};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFileState {
    Missing,
    Enabled,
    Disabled,
    Modified,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolPresence {
    pub name: &'static str,
    pub path: PathBuf,
    pub installed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallationStatus {
    pub home: PathBuf,
    pub home_exists: bool,
    pub rules: bool,
    pub tweaks: bool,
    pub insights: bool,
    pub global_insights: bool,
    pub tools: Vec<ToolPresence>,
    pub source_file: SourceFileState,
    pub insights_backup: Option<PathBuf>,
    pub tweaks_backup: Option<PathBuf>,
}

impl InstallationStatus {
    pub fn installed_tools(&self) -> usize {
        self.tools.iter().filter(|tool| tool.installed).count()
    }
}

/// Presence of an executable in the bin dir is the only install signal.
pub fn inspect(layout: &KernelleLayout) -> InstallationStatus {
    let tools = TOOL_NAMES
        .into_iter()
        .map(|name| {
            let path = layout.tool_path(name);
            ToolPresence {
                name,
                installed: path.is_file(),
                path,
            }
        })
        .collect();

    let existing = |path: PathBuf| path.is_dir().then_some(path);

    InstallationStatus {
        home: layout.home().to_path_buf(),
        home_exists: layout.home().is_dir(),
        rules: layout.rules_dir().is_dir(),
        tweaks: layout.tweaks_dir().is_dir(),
        insights: layout.insights_dir().is_dir(),
        global_insights: layout.global_insights_dir().is_dir(),
        tools,
        source_file: source_file_state(layout),
        insights_backup: existing(layout.insights_backup_dir()),
        tweaks_backup: existing(layout.tweaks_backup_dir()),
    }
}

fn source_file_state(layout: &KernelleLayout) -> SourceFileState {
    let Ok(raw) = fs::read_to_string(layout.source_file_path()) else {
        return SourceFileState::Missing;
    };
    if raw == SourceTemplate::Enabled.contents() {
        SourceFileState::Enabled
    } else if raw == SourceTemplate::Disabled.contents() {
        SourceFileState::Disabled
    } else {
        SourceFileState::Modified
    }
}
