use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use kernelle_core::{
    default_source_root, KernelleLayout, LifecycleConfig, RunMode, SourceBundle, SOURCE_ENV,
    TOOL_NAMES,
};
use kernelle_lifecycle::{
    cleanup, create_snapshot, inspect, install, list_snapshots, restore_snapshot, BinaryBuilder,
    CargoBuilder, LinePrompter, PrebuiltArtifacts,
};

mod completion;
mod logging;
mod render;

use completion::{resolve_completion_shell, write_completions_script, CompletionShell};
use render::{
    format_cleanup_report_lines, format_install_report_lines, format_restore_lines,
    format_status_lines, InstallProgress, OutputStyle, TerminalRenderer,
};

#[derive(Parser, Debug)]
#[command(name = "kernelle-setup")]
#[command(version, about = "Install and remove the kernelle toolkit", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Build the toolkit and install its binaries, rules and shell integration
    Install {
        /// Print plain progress output without spinners
        #[arg(long)]
        non_interactive: bool,
        /// Source bundle root; defaults to $KERNELLE_SOURCE, then the tree holding this binary
        #[arg(long)]
        source: Option<PathBuf>,
        /// Install whatever is already in target/release
        #[arg(long)]
        skip_build: bool,
    },
    /// Remove the toolkit, backing up insights and tweaks unless told otherwise
    Cleanup {
        #[arg(long)]
        non_interactive: bool,
        /// With --non-interactive, move insights to the backup location (default)
        #[arg(long, conflicts_with = "delete_insights")]
        keep_insights: bool,
        /// With --non-interactive, delete insights permanently
        #[arg(long)]
        delete_insights: bool,
    },
    /// Show what is currently installed
    Status,
    /// Copy the kernelle home and installed binaries into a snapshot
    Snapshot,
    /// Restore a snapshot (the newest one unless a path or name is given)
    Rollback { snapshot: Option<PathBuf> },
    /// Print a shell completion script
    Completions { shell: Option<CompletionShell> },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init_logging();

    match run_cli(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn env_lookup(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn run_cli(cli: Cli) -> Result<()> {
    let renderer = TerminalRenderer::current();

    match cli.command {
        Commands::Install {
            non_interactive,
            source,
            skip_build,
        } => {
            let layout = resolve_layout()?;
            // Fails before anything under the home is touched.
            let source_root =
                resolve_source_root(source, env_lookup(SOURCE_ENV), std::env::current_exe)?;
            let bundle = SourceBundle::locate(&source_root)?;

            let builder: Box<dyn BinaryBuilder> = if skip_build {
                Box::new(PrebuiltArtifacts)
            } else {
                Box::new(CargoBuilder::from_env())
            };
            let progress_style = if non_interactive {
                OutputStyle::Plain
            } else {
                renderer.style()
            };

            renderer.print_section("install");
            let mut progress = InstallProgress::new(progress_style, TOOL_NAMES.len() as u64);
            let result = install(&layout, &bundle, builder.as_ref(), &mut progress);
            if let Some(line) = progress.finish() {
                println!("{line}");
            }
            let report = result?;
            renderer.print_lines(&format_install_report_lines(&report, renderer.style()));
        }
        Commands::Cleanup {
            non_interactive,
            keep_insights,
            delete_insights,
        } => {
            if !non_interactive && (keep_insights || delete_insights) {
                tracing::info!(
                    keep_insights,
                    delete_insights,
                    "insight flags ignored in interactive mode"
                );
                renderer.print_status(
                    "warn",
                    "--keep-insights/--delete-insights only apply with --non-interactive; asking instead",
                );
            }
            let mode = RunMode::from_flags(non_interactive, keep_insights, delete_insights);
            let config = build_config(mode)?;

            renderer.print_section("cleanup");
            let stdin = io::stdin();
            let mut prompter = LinePrompter::new(stdin.lock(), io::stdout());
            let report = cleanup(&config, &mut prompter)?;
            renderer.print_lines(&format_cleanup_report_lines(&report, renderer.style()));
        }
        Commands::Status => {
            let layout = resolve_layout()?;
            renderer.print_lines(&format_status_lines(&inspect(&layout), renderer.style()));
        }
        Commands::Snapshot => {
            let layout = resolve_layout()?;
            let snapshot = create_snapshot(&layout)?;
            renderer.print_status(
                "ok",
                &format!("snapshot written to {}", snapshot.display()),
            );
        }
        Commands::Rollback { snapshot } => {
            let layout = resolve_layout()?;
            let snapshot_dir = resolve_snapshot_dir(&layout, snapshot)?;
            let report = restore_snapshot(&layout, &snapshot_dir)?;
            renderer.print_lines(&format_restore_lines(&report, renderer.style()));
        }
        Commands::Completions { shell } => {
            let shell = resolve_completion_shell(
                shell,
                env_lookup("SHELL").as_deref(),
                cfg!(windows),
            );
            let mut stdout = io::stdout().lock();
            write_completions_script(shell, &mut stdout)?;
            stdout.flush().context("failed to flush completion script")?;
        }
    }

    Ok(())
}

fn current_dir() -> Result<PathBuf> {
    std::env::current_dir().context("failed to resolve the current directory")
}

fn resolve_layout() -> Result<KernelleLayout> {
    let layout = KernelleLayout::from_env_lookup(env_lookup, &current_dir()?)?;
    tracing::debug!(
        "kernelle home {}, binaries in {}",
        layout.home().display(),
        layout.bin_dir().display()
    );
    Ok(layout)
}

fn build_config(mode: RunMode) -> Result<LifecycleConfig> {
    let layout = resolve_layout()?;
    Ok(LifecycleConfig::new(layout, mode, current_dir()?))
}

/// `--source` wins over `$KERNELLE_SOURCE`, which wins over the tree that
/// contains the running executable.
fn resolve_source_root<E>(
    flag: Option<PathBuf>,
    env_value: Option<String>,
    current_exe: E,
) -> Result<PathBuf>
where
    E: FnOnce() -> io::Result<PathBuf>,
{
    if let Some(root) = flag {
        tracing::debug!("source bundle from --source: {}", root.display());
        return Ok(root);
    }
    if let Some(root) = env_value.filter(|value| !value.is_empty()) {
        tracing::debug!("source bundle from ${SOURCE_ENV}: {root}");
        return Ok(PathBuf::from(root));
    }
    let exe = current_exe().context("failed to resolve the running executable")?;
    let root = default_source_root(&exe);
    tracing::debug!(
        "source bundle next to {}: {}",
        exe.display(),
        root.display()
    );
    Ok(root)
}

fn resolve_snapshot_dir(layout: &KernelleLayout, requested: Option<PathBuf>) -> Result<PathBuf> {
    match requested {
        Some(path) if path.is_dir() => Ok(path),
        Some(path) => {
            let named = layout.snapshot_path(&path.to_string_lossy());
            if named.is_dir() {
                Ok(named)
            } else {
                Err(anyhow!("snapshot not found: {}", path.display()))
            }
        }
        None => list_snapshots(layout)?.pop().ok_or_else(|| {
            anyhow!(
                "no snapshots found in {}",
                layout.snapshots_dir().display()
            )
        }),
    }
}
