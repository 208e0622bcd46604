use std::io::IsTerminal;
use std::time::{Duration, Instant};

use anstyle::{AnsiColor, Effects, Style};
use indicatif::{HumanCount, ProgressBar, ProgressStyle};
use kernelle_lifecycle::{
    CleanupReport, InstallObserver, InstallReport, InstallationStatus, RestoreReport,
    RulesStatus, SourceFileState, ToolInstall, ToolStatus,
};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum OutputStyle {
    Plain,
    Rich,
}

pub(crate) fn current_output_style() -> OutputStyle {
    resolve_output_style(
        std::io::stdout().is_terminal(),
        std::env::var_os("NO_COLOR").is_some(),
    )
}

pub(crate) fn resolve_output_style(stdout_is_terminal: bool, no_color: bool) -> OutputStyle {
    if stdout_is_terminal && !no_color {
        OutputStyle::Rich
    } else {
        OutputStyle::Plain
    }
}

#[derive(Copy, Clone, Debug)]
pub(crate) struct TerminalRenderer {
    style: OutputStyle,
}

impl TerminalRenderer {
    pub(crate) fn from_style(style: OutputStyle) -> Self {
        Self { style }
    }

    pub(crate) fn current() -> Self {
        Self::from_style(current_output_style())
    }

    pub(crate) fn style(self) -> OutputStyle {
        self.style
    }

    pub(crate) fn print_status(self, status: &str, message: &str) {
        println!("{}", render_status_line(self.style, status, message));
    }

    pub(crate) fn print_section(self, title: &str) {
        if let Some(line) = render_section_header(self.style, title) {
            println!();
            println!("{}", colorize(section_style(), &line));
        }
    }

    pub(crate) fn print_lines(self, lines: &[String]) {
        for line in lines {
            println!("{line}");
        }
    }
}

/// Spinner while the bundle builds, then a bar over the tool registry.
pub(crate) struct InstallProgress {
    style: OutputStyle,
    total: u64,
    processed: u64,
    spinner: Option<ProgressBar>,
    bar: Option<ProgressBar>,
    started_at: Instant,
}

impl InstallProgress {
    pub(crate) fn new(style: OutputStyle, total: u64) -> Self {
        Self {
            style,
            total,
            processed: 0,
            spinner: None,
            bar: None,
            started_at: Instant::now(),
        }
    }

    /// Clears any live bar and returns the closing progress line, if any.
    pub(crate) fn finish(mut self) -> Option<String> {
        if let Some(spinner) = self.spinner.take() {
            spinner.finish_and_clear();
        }
        let bar = self.bar.take()?;
        bar.finish_and_clear();
        render_progress_line(
            self.style,
            "tools",
            self.processed,
            self.total,
            Some(self.started_at.elapsed()),
        )
    }

    fn tool_bar(&self) -> ProgressBar {
        let bar = ProgressBar::new(self.total.max(1));
        if let Ok(style) = ProgressStyle::with_template(
            "{spinner:.cyan.bold} {msg:<10} [{bar:20.cyan/blue}] {pos:>2}/{len:2}",
        ) {
            bar.set_style(style.tick_chars(".oO@* ").progress_chars("=>-"));
        }
        bar.enable_steady_tick(Duration::from_millis(80));
        bar
    }
}

impl InstallObserver for InstallProgress {
    fn building(&mut self) {
        if self.style == OutputStyle::Plain {
            return;
        }
        let spinner = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan.bold} {msg} {elapsed}") {
            spinner.set_style(style.tick_chars("|/-\\ "));
        }
        spinner.set_message("building release binaries");
        spinner.enable_steady_tick(Duration::from_millis(80));
        self.spinner = Some(spinner);
    }

    fn tool_processed(&mut self, tool: &ToolInstall) {
        if let Some(spinner) = self.spinner.take() {
            spinner.finish_and_clear();
        }
        self.processed = (self.processed + 1).min(self.total);
        if self.style == OutputStyle::Plain {
            return;
        }
        if self.bar.is_none() {
            self.bar = Some(self.tool_bar());
        }
        if let Some(bar) = &self.bar {
            bar.set_message(tool.name);
            bar.set_position(self.processed);
        }
    }
}

pub(crate) fn render_status_line(style: OutputStyle, status: &str, message: &str) -> String {
    match style {
        OutputStyle::Plain => message.to_string(),
        OutputStyle::Rich => format!("{} {message}", status_badge(status)),
    }
}

fn status_badge(status: &str) -> &'static str {
    match status {
        "ok" => "[OK]",
        "warn" => "[WARN]",
        "skip" => "[SKIP]",
        "err" => "[ERR]",
        _ => "[..]",
    }
}

fn render_section_header(style: OutputStyle, title: &str) -> Option<String> {
    match style {
        OutputStyle::Plain => None,
        OutputStyle::Rich => Some(format!("== {title} ==")),
    }
}

fn section_style() -> Style {
    Style::new()
        .fg_color(Some(AnsiColor::BrightBlue.into()))
        .effects(Effects::BOLD)
}

fn progress_label_style() -> Style {
    Style::new()
        .fg_color(Some(AnsiColor::BrightCyan.into()))
        .effects(Effects::BOLD)
}

fn colorize(style: Style, text: &str) -> String {
    format!("{}{}{}", style.render(), text, style.render_reset())
}

fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    let millis = elapsed.subsec_millis();
    format!("{secs}.{millis:03}s")
}

pub(crate) fn render_progress_line(
    style: OutputStyle,
    label: &str,
    current: u64,
    total: u64,
    elapsed: Option<Duration>,
) -> Option<String> {
    if style == OutputStyle::Plain {
        return None;
    }

    let width = 18_usize;
    let safe_total = total.max(1);
    let bounded_current = current.min(safe_total);
    let filled = ((bounded_current as usize) * width) / (safe_total as usize);
    let bar = format!(
        "{}{}",
        "=".repeat(filled),
        "-".repeat(width.saturating_sub(filled))
    );
    let percent = (bounded_current * 100) / safe_total;
    let suffix = elapsed
        .map(|value| format!(" complete in {}", format_elapsed(value)))
        .unwrap_or_default();

    Some(format!(
        "{} [{bar}] {percent:>3}% {}/{}{suffix}",
        colorize(progress_label_style(), label),
        HumanCount(current),
        HumanCount(total),
    ))
}

pub(crate) fn format_install_report_lines(report: &InstallReport, style: OutputStyle) -> Vec<String> {
    let mut lines = Vec::new();
    for tool in &report.tools {
        lines.push(match tool.status {
            ToolStatus::Installed => render_status_line(
                style,
                "ok",
                &format!("installed {} -> {}", tool.name, tool.path.display()),
            ),
            ToolStatus::Skipped => render_status_line(
                style,
                "skip",
                &format!("skipped {} (not built)", tool.name),
            ),
        });
    }
    if let RulesStatus::Copied(path) = &report.rules {
        lines.push(render_status_line(
            style,
            "ok",
            &format!("rules installed to {}", path.display()),
        ));
    }
    for warning in &report.warnings {
        lines.push(render_status_line(style, "warn", warning));
    }
    lines.push(render_status_line(
        style,
        "ok",
        &format!("shell integration written to {}", report.source_file.display()),
    ));

    let installed = report.installed().count();
    let version = report
        .version
        .as_deref()
        .map(|version| format!(" (kernelle {version})"))
        .unwrap_or_default();
    lines.push(format!(
        "installed {installed} of {} tools{version}",
        report.tools.len()
    ));
    lines.push(format!(
        "add `source {}` to your shell profile to finish setup",
        report.source_file.display()
    ));
    lines
}

pub(crate) fn format_cleanup_report_lines(report: &CleanupReport, style: OutputStyle) -> Vec<String> {
    let mut lines = vec![render_status_line(
        style,
        "ok",
        &format!("insights: {}", report.insights.as_str()),
    )];
    if let Some(tweaks) = report.tweaks {
        lines.push(render_status_line(
            style,
            "ok",
            &format!("tweaks: {}", tweaks.as_str()),
        ));
    }
    for preserved in &report.preserved {
        lines.push(render_status_line(
            style,
            "ok",
            &format!(
                "preserved {} at {}",
                preserved.label,
                preserved.location.display()
            ),
        ));
    }
    for path in &report.deleted {
        lines.push(render_status_line(
            style,
            "ok",
            &format!("deleted {}", path.display()),
        ));
    }
    for link in &report.removed_links {
        lines.push(render_status_line(
            style,
            "ok",
            &format!("removed link {}", link.display()),
        ));
    }
    for dir in &report.removed_link_dirs {
        lines.push(render_status_line(
            style,
            "ok",
            &format!("removed empty directory {}", dir.display()),
        ));
    }
    for name in &report.removed_binaries {
        lines.push(render_status_line(style, "ok", &format!("removed {name}")));
    }
    lines.push(render_status_line(
        style,
        "ok",
        &format!(
            "shell integration disabled at {}",
            report.source_file.display()
        ),
    ));
    for warning in &report.warnings {
        lines.push(render_status_line(style, "warn", warning));
    }
    for failure in &report.failures {
        lines.push(render_status_line(
            style,
            "err",
            &format!("{}: {}", failure.step.as_str(), failure.message),
        ));
    }

    if report.is_clean() {
        lines.push("cleanup complete".to_string());
    } else {
        lines.push(format!(
            "cleanup finished with {} failed step(s); see above",
            report.failures.len()
        ));
    }
    lines
}

pub(crate) fn format_status_lines(status: &InstallationStatus, style: OutputStyle) -> Vec<String> {
    let presence = |present: bool| if present { "present" } else { "absent" };
    let mut lines = vec![
        format!("home: {} ({})", status.home.display(), presence(status.home_exists)),
        format!("rules: {}", presence(status.rules)),
        format!("tweaks: {}", presence(status.tweaks)),
        format!("insights: {}", presence(status.insights)),
        format!("global-insights: {}", presence(status.global_insights)),
    ];
    for tool in &status.tools {
        lines.push(if tool.installed {
            render_status_line(
                style,
                "ok",
                &format!("{} -> {}", tool.name, tool.path.display()),
            )
        } else {
            render_status_line(style, "skip", &format!("{} not installed", tool.name))
        });
    }
    let source_file = match status.source_file {
        SourceFileState::Missing => "missing",
        SourceFileState::Enabled => "enabled",
        SourceFileState::Disabled => "disabled",
        SourceFileState::Modified => "modified",
    };
    lines.push(format!("shell integration: {source_file}"));
    for (label, backup) in [
        ("insights", &status.insights_backup),
        ("tweaks", &status.tweaks_backup),
    ] {
        if let Some(path) = backup {
            lines.push(format!("{label} backup: {}", path.display()));
        }
    }
    lines
}

pub(crate) fn format_restore_lines(report: &RestoreReport, style: OutputStyle) -> Vec<String> {
    let mut lines = Vec::new();
    if report.home_restored {
        lines.push(render_status_line(style, "ok", "restored kernelle home"));
    }
    for name in &report.restored_binaries {
        lines.push(render_status_line(style, "ok", &format!("restored {name}")));
    }
    lines.push(format!(
        "rolled back to {}",
        report.snapshot.display()
    ));
    lines
}
