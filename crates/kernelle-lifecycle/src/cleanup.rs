use std::path::{Path, PathBuf};

use anyhow::Result;
use kernelle_core::{Decision, KernelleLayout, LifecycleConfig, RunMode, SourceTemplate, TOOL_NAMES};

use crate::archive::{archive, ArchiveOutcome, BackupError};
use crate::fs_utils::{remove_dir_all_if_exists, remove_file_if_exists, RemoveOutcome};
use crate::gate::{confirm_keep, decide, Prompter};
use crate::install::write_source_file;
use crate::locate::{prune_links, LinkFs, OsFs};

const TWEAKS_PROMPT: &str = "Keep your rule tweaks? They will be moved to a backup outside the kernelle home.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupStep {
    SourceFile,
    InsightsBackup,
    GlobalInsights,
    RuleLinks,
    TweaksDecision,
    TweaksBackup,
    Home,
    Binaries,
}

impl CleanupStep {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SourceFile => "source-file",
            Self::InsightsBackup => "insights-backup",
            Self::GlobalInsights => "global-insights",
            Self::RuleLinks => "rule-links",
            Self::TweaksDecision => "tweaks-decision",
            Self::TweaksBackup => "tweaks-backup",
            Self::Home => "home",
            Self::Binaries => "binaries",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepFailure {
    pub step: CleanupStep,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preserved {
    pub label: &'static str,
    pub location: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupReport {
    pub insights: Decision,
    pub tweaks: Option<Decision>,
    pub source_file: PathBuf,
    pub preserved: Vec<Preserved>,
    pub deleted: Vec<PathBuf>,
    pub removed_links: Vec<PathBuf>,
    pub removed_link_dirs: Vec<PathBuf>,
    pub removed_binaries: Vec<String>,
    pub home_retained: bool,
    pub warnings: Vec<String>,
    pub failures: Vec<StepFailure>,
}

impl CleanupReport {
    fn new(insights: Decision, source_file: PathBuf) -> Self {
        Self {
            insights,
            tweaks: None,
            source_file,
            preserved: Vec::new(),
            deleted: Vec::new(),
            removed_links: Vec::new(),
            removed_link_dirs: Vec::new(),
            removed_binaries: Vec::new(),
            home_retained: false,
            warnings: Vec::new(),
            failures: Vec::new(),
        }
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    fn fail(&mut self, step: CleanupStep, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!("{}: {message}", step.as_str());
        self.failures.push(StepFailure { step, message });
    }
}

/// Resolves the insights decision before anything is mutated. An error here
/// means the user could not be asked and nothing has been touched.
pub fn resolve_insights_decision(
    config: &LifecycleConfig,
    prompter: &mut dyn Prompter,
) -> Result<Decision> {
    if !config.layout().insights_dir().exists() {
        return Ok(Decision::Preserve);
    }
    match config.mode() {
        RunMode::Interactive => decide(Decision::Preserve, prompter),
        RunMode::NonInteractive { insights } => Ok(insights.unwrap_or(Decision::Preserve)),
    }
}

pub fn cleanup(config: &LifecycleConfig, prompter: &mut dyn Prompter) -> Result<CleanupReport> {
    cleanup_with_fs(config, prompter, &OsFs)
}

/// Removes everything install created. Only the insights decision can abort
/// the run; every later step is best effort and recorded in the report.
pub fn cleanup_with_fs<F: LinkFs + ?Sized>(
    config: &LifecycleConfig,
    prompter: &mut dyn Prompter,
    fs: &F,
) -> Result<CleanupReport> {
    let layout = config.layout();
    let insights = resolve_insights_decision(config, prompter)?;
    let insights_existed = layout.insights_dir().exists();
    let mut report = CleanupReport::new(insights, layout.source_file_path());

    if let Err(err) = write_source_file(layout, SourceTemplate::Disabled) {
        report.fail(CleanupStep::SourceFile, format!("{err:#}"));
    }

    // Any preserved subtree that could not leave the home keeps the home alive.
    let mut home_blocked_by = Vec::new();

    match insights {
        Decision::Preserve => {
            if !relocate(
                &mut report,
                CleanupStep::InsightsBackup,
                "insights",
                &layout.insights_dir(),
                &layout.insights_backup_dir(),
            ) {
                home_blocked_by.push("insights");
            }
        }
        Decision::Delete if insights_existed => {
            let warning = format!(
                "insights at {} will be permanently deleted and cannot be recovered",
                layout.insights_dir().display()
            );
            tracing::warn!("{warning}");
            report.warnings.push(warning);
        }
        Decision::Delete => {}
    }

    let global_insights = layout.global_insights_dir();
    match remove_dir_all_if_exists(&global_insights) {
        Ok(RemoveOutcome::Removed) => report.deleted.push(global_insights),
        Ok(RemoveOutcome::AlreadyAbsent) => {}
        Err(err) => report.fail(
            CleanupStep::GlobalInsights,
            format!("failed to remove {}: {err}", global_insights.display()),
        ),
    }

    let pruned = prune_links(fs, config.working_tree(), &layout.rules_dir());
    report.removed_links = pruned.removed_links;
    report.removed_link_dirs = pruned.removed_dirs;
    report.warnings.extend(pruned.warnings);
    for failure in pruned.failures {
        report.fail(CleanupStep::RuleLinks, failure);
    }

    let tweaks_dir = layout.tweaks_dir();
    if tweaks_dir.is_dir() {
        let tweaks = match config.mode() {
            RunMode::Interactive => match confirm_keep(prompter, TWEAKS_PROMPT) {
                Ok(decision) => decision,
                Err(err) => {
                    report.fail(
                        CleanupStep::TweaksDecision,
                        format!("no answer for tweaks, keeping them: {err:#}"),
                    );
                    Decision::Preserve
                }
            },
            RunMode::NonInteractive { .. } => Decision::Preserve,
        };
        report.tweaks = Some(tweaks);
        if tweaks == Decision::Preserve
            && !relocate(
                &mut report,
                CleanupStep::TweaksBackup,
                "tweaks",
                &tweaks_dir,
                &layout.tweaks_backup_dir(),
            )
        {
            home_blocked_by.push("tweaks");
        }
    }

    remove_home(layout, &mut report, &home_blocked_by, insights_existed);
    remove_binaries(layout, &mut report);

    Ok(report)
}

/// Returns false when the subtree is still inside the home.
fn relocate(
    report: &mut CleanupReport,
    step: CleanupStep,
    label: &'static str,
    source: &Path,
    destination: &Path,
) -> bool {
    match archive(source, destination) {
        Ok(ArchiveOutcome::SourceAbsent) => true,
        Ok(outcome) => {
            let location = outcome
                .destination()
                .unwrap_or(destination)
                .to_path_buf();
            report.preserved.push(Preserved { label, location });
            true
        }
        Err(err @ BackupError::DestinationExists(_)) => {
            report.fail(
                step,
                format!("{err}; move or remove the old backup and run cleanup again"),
            );
            false
        }
        Err(err) => {
            report.fail(step, err.to_string());
            false
        }
    }
}

fn remove_home(
    layout: &KernelleLayout,
    report: &mut CleanupReport,
    blocked_by: &[&str],
    insights_existed: bool,
) {
    if !blocked_by.is_empty() {
        report.home_retained = true;
        report.fail(
            CleanupStep::Home,
            format!(
                "kept {} because {} could not be backed up",
                layout.home().display(),
                blocked_by.join(" and ")
            ),
        );
        return;
    }

    match remove_dir_all_if_exists(layout.home()) {
        Ok(RemoveOutcome::Removed) => {
            tracing::info!("removed {}", layout.home().display());
            if report.insights == Decision::Delete && insights_existed {
                report.deleted.push(layout.insights_dir());
            }
            if report.tweaks == Some(Decision::Delete) {
                report.deleted.push(layout.tweaks_dir());
            }
            report.deleted.push(layout.home().to_path_buf());
        }
        Ok(RemoveOutcome::AlreadyAbsent) => {}
        Err(err) => {
            report.home_retained = true;
            report.fail(
                CleanupStep::Home,
                format!("failed to remove {}: {err}", layout.home().display()),
            );
        }
    }
}

fn remove_binaries(layout: &KernelleLayout, report: &mut CleanupReport) {
    for name in TOOL_NAMES {
        let path = layout.tool_path(name);
        match remove_file_if_exists(&path) {
            Ok(RemoveOutcome::Removed) => {
                tracing::info!("removed {}", path.display());
                report.removed_binaries.push(name.to_string());
            }
            Ok(RemoveOutcome::AlreadyAbsent) => {}
            Err(err) => report.fail(
                CleanupStep::Binaries,
                format!("failed to remove {}: {err}", path.display()),
            ),
        }
    }
}
