use super::*;

use std::cell::Cell;
use std::collections::BTreeSet;
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use anyhow::anyhow;
use kernelle_core::{
    executable_name, Decision, KernelleLayout, LifecycleConfig, RunMode, SourceBundle,
    DISABLED_SOURCE_TEMPLATE, ENABLED_SOURCE_TEMPLATE, HOME_ENV, INSTALL_DIR_ENV, TOOL_NAMES,
};
use tempfile::TempDir;

use crate::archive::copy_then_retire;

struct Sandbox {
    _temp: TempDir,
    layout: KernelleLayout,
    bundle_root: PathBuf,
    work: PathBuf,
}

impl Sandbox {
    fn new() -> Self {
        let temp = tempfile::tempdir().expect("must create temp dir");
        let user_home = temp.path().join("home");
        let work = temp.path().join("work");
        let bundle_root = temp.path().join("bundle");
        fs::create_dir_all(&user_home).expect("must create user home");
        fs::create_dir_all(&work).expect("must create work tree");
        let layout = KernelleLayout::new(
            user_home.join(".kernelle"),
            user_home.join(".cargo").join("bin"),
            &user_home,
        );
        Self {
            _temp: temp,
            layout,
            bundle_root,
            work,
        }
    }

    fn bundle(&self, tools: &[&str], with_rules: bool) -> SourceBundle {
        fs::create_dir_all(&self.bundle_root).expect("must create bundle root");
        fs::write(
            self.bundle_root.join("Cargo.toml"),
            "[workspace]\nmembers = [\"crates/*\"]\n\n[workspace.package]\nversion = \"0.3.0\"\n",
        )
        .expect("must write descriptor");
        let release = self.bundle_root.join("target").join("release");
        fs::create_dir_all(&release).expect("must create release dir");
        for tool in tools {
            fs::write(release.join(executable_name(tool)), format!("binary:{tool}"))
                .expect("must write artifact");
        }
        if with_rules {
            let rules = self.bundle_root.join("rules");
            fs::create_dir_all(rules.join("workflows")).expect("must create rules");
            fs::write(rules.join("workflows").join("review.md"), "# review")
                .expect("must write rule");
        }
        SourceBundle::locate(&self.bundle_root).expect("must locate bundle")
    }

    fn install(&self, tools: &[&str]) -> InstallReport {
        let bundle = self.bundle(tools, true);
        install(&self.layout, &bundle, &PrebuiltArtifacts, &mut NoopObserver)
            .expect("install must succeed")
    }

    fn config(&self, mode: RunMode) -> LifecycleConfig {
        LifecycleConfig::new(self.layout.clone(), mode, &self.work)
    }

    fn seed_insights(&self) {
        let topic = self.layout.insights_dir().join("rust");
        fs::create_dir_all(&topic).expect("must create insights");
        fs::write(topic.join("ownership.insight.md"), "borrow early")
            .expect("must write insight");
    }

    fn seed_tweaks(&self) {
        let tweaks = self.layout.tweaks_dir();
        fs::create_dir_all(&tweaks).expect("must create tweaks");
        fs::write(tweaks.join("review.md"), "prefer small diffs").expect("must write tweak");
    }
}

fn non_interactive(insights: Option<Decision>) -> RunMode {
    RunMode::NonInteractive { insights }
}

struct RecordingBuilder {
    calls: Cell<usize>,
}

impl BinaryBuilder for RecordingBuilder {
    fn build(&self, _bundle: &SourceBundle) -> anyhow::Result<()> {
        self.calls.set(self.calls.get() + 1);
        Ok(())
    }
}

struct FailingBuilder;

impl BinaryBuilder for FailingBuilder {
    fn build(&self, _bundle: &SourceBundle) -> anyhow::Result<()> {
        Err(anyhow!("linker ran out of patience"))
    }
}

#[derive(Default)]
struct RecordingObserver {
    built: bool,
    tools: Vec<&'static str>,
}

impl InstallObserver for RecordingObserver {
    fn building(&mut self) {
        self.built = true;
    }

    fn tool_processed(&mut self, tool: &ToolInstall) {
        self.tools.push(tool.name);
    }
}

// ---- confirmation gate ----

#[test]
fn triple_check_deletes_only_after_three_delete_answers() {
    for mask in 0..8_u8 {
        let answers = [mask & 1 != 0, mask & 2 != 0, mask & 4 != 0];
        let mut prompter = ScriptedPrompter::new(answers);
        let decision = decide(Decision::Preserve, &mut prompter).expect("gate must decide");

        // "no" to keeping, then "yes" twice
        let all_delete_leaning = answers == [false, true, true];
        let expected = if all_delete_leaning {
            Decision::Delete
        } else {
            Decision::Preserve
        };
        assert_eq!(decision, expected, "answers {answers:?}");
    }
}

#[test]
fn triple_check_stops_asking_after_first_preserving_answer() {
    let mut prompter = ScriptedPrompter::new([true, false, false]);
    assert_eq!(
        decide(Decision::Preserve, &mut prompter).expect("gate must decide"),
        Decision::Preserve
    );
    assert_eq!(prompter.asked().len(), 1);
    assert_eq!(prompter.remaining(), 2);

    let mut prompter = ScriptedPrompter::new([false, false, true]);
    assert_eq!(
        decide(Decision::Preserve, &mut prompter).expect("gate must decide"),
        Decision::Preserve
    );
    assert_eq!(prompter.asked().len(), 2);
}

#[test]
fn triple_check_question_defaults() {
    let mut prompter = ScriptedPrompter::new([false, true, true]);
    decide(Decision::Preserve, &mut prompter).expect("gate must decide");

    let defaults = prompter
        .asked()
        .iter()
        .map(|(_, default)| *default)
        .collect::<Vec<_>>();
    assert_eq!(defaults, vec![Some(true), None, Some(false)]);
    assert!(prompter.asked()[1].0.contains("first confirmation"));
    assert!(prompter.asked()[2].0.starts_with("FINAL CHECK"));
}

#[test]
fn triple_check_leaning_only_changes_first_default() {
    let gate = TripleCheck::new(Decision::Delete);
    assert_eq!(
        gate.question().map(|question| question.default),
        Some(Some(false))
    );
}

#[test]
fn triple_check_transitions_are_explicit() {
    let mut gate = TripleCheck::new(Decision::Preserve);
    assert_eq!(gate.state(), GateState::Asking(GateStep::KeepInsights));
    assert_eq!(
        gate.answer(false),
        GateState::Asking(GateStep::FirstConfirmation)
    );
    assert_eq!(gate.answer(true), GateState::Asking(GateStep::FinalCheck));
    assert_eq!(gate.answer(true), GateState::Decided(Decision::Delete));
    // decided gates ignore further answers
    assert_eq!(gate.answer(false), GateState::Decided(Decision::Delete));
    assert!(gate.question().is_none());
}

#[test]
fn gate_propagates_prompt_failure_instead_of_deciding() {
    let mut prompter = ScriptedPrompter::new([false]);
    let err = decide(Decision::Preserve, &mut prompter).expect_err("must fail without answer");
    assert!(
        err.to_string().contains("no scripted answer"),
        "unexpected error: {err}"
    );
}

#[test]
fn confirm_keep_defaults_to_preserve() {
    let mut prompter = ScriptedPrompter::new([true]);
    assert_eq!(
        confirm_keep(&mut prompter, "Keep tweaks?").expect("must decide"),
        Decision::Preserve
    );
    assert_eq!(prompter.asked()[0].1, Some(true));

    let mut prompter = ScriptedPrompter::new([false]);
    assert_eq!(
        confirm_keep(&mut prompter, "Keep tweaks?").expect("must decide"),
        Decision::Delete
    );
}

#[test]
fn parse_answer_accepts_yes_no_and_defaults() {
    assert_eq!(parse_answer("Y\n", None), Some(true));
    assert_eq!(parse_answer(" yes ", None), Some(true));
    assert_eq!(parse_answer("NO", Some(true)), Some(false));
    assert_eq!(parse_answer("", Some(true)), Some(true));
    assert_eq!(parse_answer("\n", None), None);
    assert_eq!(parse_answer("delete", Some(false)), None);
}

#[test]
fn line_prompter_reprompts_until_answer_parses() {
    let input = Cursor::new("maybe\n\nyes\n");
    let mut prompter = LinePrompter::new(input, Vec::new());
    let answer = prompter
        .ask("Are you SURE?", None)
        .expect("must eventually answer");
    assert!(answer);

    let output = String::from_utf8(prompter.into_output()).expect("utf8 output");
    assert_eq!(output.matches("Are you SURE? [y/n]").count(), 3);
    assert_eq!(output.matches("Please answer").count(), 2);
}

#[test]
fn line_prompter_uses_default_on_empty_line() {
    let mut prompter = LinePrompter::new(Cursor::new("\n"), Vec::new());
    assert!(!prompter.ask("FINAL CHECK", Some(false)).expect("must answer"));
}

#[test]
fn line_prompter_fails_on_closed_input() {
    let mut prompter = LinePrompter::new(Cursor::new("what\n"), Vec::new());
    let err = prompter
        .ask("Keep insights?", Some(true))
        .expect_err("closed input must not become an answer");
    assert!(err.to_string().contains("input closed"), "unexpected error: {err}");
}

// ---- resource locator ----

const RULES: &str = "/home/dev/.kernelle/rules";

fn scattered_tree() -> MemoryFs {
    let mut fs = MemoryFs::new();
    fs.add_symlink("/work/a/.cursor/rules/kernelle", RULES)
        .add_symlink("/work/b/kernelle-rules", RULES)
        .add_file("/work/b/README.md")
        .add_symlink("/work/c/deep/link", "../../../home/dev/.kernelle/rules")
        .add_symlink("/work/top-link", RULES)
        .add_symlink("/work/d/other", "/home/dev/elsewhere")
        .add_dir("/work/e/empty");
    fs
}

fn collect_links(fs: &MemoryFs, root: &str) -> (BTreeSet<PathBuf>, Vec<LocateWarning>) {
    let locator = LinkLocator::new(fs, root, RULES);
    let mut links = BTreeSet::new();
    let mut warnings = Vec::new();
    for item in locator.matches() {
        match item {
            Ok(path) => {
                links.insert(path);
            }
            Err(warning) => warnings.push(warning),
        }
    }
    (links, warnings)
}

fn paths(items: &[&str]) -> BTreeSet<PathBuf> {
    items.iter().map(PathBuf::from).collect()
}

#[test]
fn locator_matches_absolute_and_relative_links() {
    let fs = scattered_tree();
    let (links, warnings) = collect_links(&fs, "/work");

    assert!(warnings.is_empty());
    assert_eq!(
        links,
        paths(&[
            "/work/a/.cursor/rules/kernelle",
            "/work/b/kernelle-rules",
            "/work/c/deep/link",
            "/work/top-link",
        ])
    );
}

#[test]
fn locator_is_restartable() {
    let fs = scattered_tree();
    let locator = LinkLocator::new(&fs, "/work", RULES);
    let first = locator.matches().filter_map(Result::ok).collect::<Vec<_>>();
    let second = locator.matches().filter_map(Result::ok).collect::<Vec<_>>();
    assert_eq!(first.len(), 4);
    assert_eq!(first, second);
}

#[test]
fn locator_skips_unreadable_directories_with_warning() {
    let mut fs = scattered_tree();
    fs.add_symlink("/work/locked/link", RULES).deny("/work/locked");

    let (links, warnings) = collect_links(&fs, "/work");
    assert_eq!(links.len(), 4);
    assert!(!links.contains(Path::new("/work/locked/link")));
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].path, PathBuf::from("/work/locked"));
    assert_eq!(
        warnings[0].source.kind(),
        std::io::ErrorKind::PermissionDenied
    );
}

#[test]
fn locator_does_not_follow_linked_directories() {
    let mut fs = MemoryFs::new();
    fs.add_symlink("/work/loop", "/work")
        .add_symlink("/work/rules-link", RULES);

    let (links, warnings) = collect_links(&fs, "/work");
    assert!(warnings.is_empty());
    assert_eq!(links, paths(&["/work/rules-link"]));
}

#[test]
fn locator_compares_lexically_normalised_targets() {
    let mut fs = MemoryFs::new();
    fs.add_symlink("/work/dotted", "/home/dev/./.kernelle/../.kernelle/rules")
        .add_symlink("/work/child", "/home/dev/.kernelle/rules/tweaks");

    let (links, _) = collect_links(&fs, "/work");
    assert_eq!(links, paths(&["/work/dotted"]));
}

#[test]
fn prune_removes_links_and_only_their_emptied_parents() {
    let fs = scattered_tree();
    let report = prune_links(&fs, Path::new("/work"), Path::new(RULES));

    assert_eq!(report.removed_links.len(), 4);
    assert_eq!(
        report.removed_dirs.iter().cloned().collect::<BTreeSet<_>>(),
        paths(&["/work/a/.cursor/rules", "/work/c/deep"])
    );
    assert!(report.failures.is_empty());

    // only the immediate parent collapses
    assert!(fs.exists("/work/a/.cursor"));
    assert!(fs.exists("/work/c"));
    assert!(fs.exists("/work/b/README.md"));
    assert!(fs.exists("/work/d/other"));
    assert!(fs.exists("/work/e/empty"));
    assert!(fs.exists("/work"));
}

#[test]
fn prune_never_removes_the_search_root() {
    let mut fs = MemoryFs::new();
    fs.add_symlink("/work/only-link", RULES);

    let report = prune_links(&fs, Path::new("/work"), Path::new(RULES));
    assert_eq!(report.removed_links, vec![PathBuf::from("/work/only-link")]);
    assert!(report.removed_dirs.is_empty());
    assert!(fs.exists("/work"));
}

#[test]
fn is_empty_dir_reports_only_readable_empty_dirs() {
    let mut fs = MemoryFs::new();
    fs.add_dir("/work/empty")
        .add_file("/work/full/file")
        .add_dir("/work/locked")
        .deny("/work/locked");

    assert!(is_empty_dir(&fs, Path::new("/work/empty")));
    assert!(!is_empty_dir(&fs, Path::new("/work/full")));
    assert!(!is_empty_dir(&fs, Path::new("/work/locked")));
    assert!(!is_empty_dir(&fs, Path::new("/work/missing")));
}

#[test]
fn normalize_lexically_resolves_dot_components() {
    assert_eq!(
        normalize_lexically(Path::new("/a/./b/../c")),
        PathBuf::from("/a/c")
    );
    assert_eq!(normalize_lexically(Path::new("/../x")), PathBuf::from("/x"));
    assert_eq!(
        normalize_lexically(Path::new("../../x")),
        PathBuf::from("../../x")
    );
}

#[cfg(unix)]
#[test]
fn prune_on_real_filesystem_collapses_lone_parent() {
    use std::os::unix::fs::symlink;

    let temp = tempfile::tempdir().expect("must create temp dir");
    let target = temp.path().join("home").join(".kernelle").join("rules");
    fs::create_dir_all(&target).expect("must create rules");
    let work = temp.path().join("work");
    let lone = work.join("proj").join(".cursor").join("rules");
    fs::create_dir_all(&lone).expect("must create lone parent");
    symlink(&target, lone.join("kernelle")).expect("must link");
    let shared = work.join("shared");
    fs::create_dir_all(&shared).expect("must create shared dir");
    fs::write(shared.join("notes.md"), "keep").expect("must write");
    symlink("../../home/.kernelle/rules", shared.join("rules")).expect("must link");

    let report = prune_links(&OsFs, &work, &target);

    assert_eq!(report.removed_links.len(), 2);
    assert_eq!(report.removed_dirs, vec![lone.clone()]);
    assert!(!lone.exists());
    assert!(work.join("proj").join(".cursor").is_dir());
    assert!(shared.join("notes.md").is_file());
    assert!(target.is_dir(), "link removal must never touch the target");
}

// ---- backup / archive ----

#[test]
fn archive_moves_whole_subtree() {
    let temp = tempfile::tempdir().expect("must create temp dir");
    let source = temp.path().join("home").join("insights");
    fs::create_dir_all(source.join("topic")).expect("must create source");
    fs::write(source.join("topic").join("a.md"), "a").expect("must write");
    let destination = temp.path().join("insights_backup");

    let outcome = archive(&source, &destination).expect("archive must succeed");

    assert_eq!(outcome, ArchiveOutcome::Moved(destination.clone()));
    assert!(!source.exists());
    assert_eq!(
        fs::read_to_string(destination.join("topic").join("a.md")).expect("must read"),
        "a"
    );
}

#[test]
fn archive_refuses_existing_destination_and_leaves_source() {
    let temp = tempfile::tempdir().expect("must create temp dir");
    let source = temp.path().join("insights");
    fs::create_dir_all(&source).expect("must create source");
    fs::write(source.join("a.md"), "new").expect("must write");
    let destination = temp.path().join("backup");
    fs::create_dir_all(&destination).expect("must create old backup");
    fs::write(destination.join("a.md"), "old").expect("must write");

    let err = archive(&source, &destination).expect_err("existing backup must conflict");

    assert!(matches!(err, BackupError::DestinationExists(_)));
    assert_eq!(fs::read_to_string(source.join("a.md")).expect("must read"), "new");
    assert_eq!(
        fs::read_to_string(destination.join("a.md")).expect("must read"),
        "old"
    );
}

#[test]
fn archive_of_missing_source_is_a_no_op() {
    let temp = tempfile::tempdir().expect("must create temp dir");
    let destination = temp.path().join("backup");
    let outcome =
        archive(&temp.path().join("missing"), &destination).expect("missing source is fine");
    assert_eq!(outcome, ArchiveOutcome::SourceAbsent);
    assert!(outcome.destination().is_none());
    assert!(!destination.exists());
}

#[test]
fn archive_rejects_non_directory_source() {
    let temp = tempfile::tempdir().expect("must create temp dir");
    let source = temp.path().join("insights");
    fs::write(&source, "not a dir").expect("must write");
    let err = archive(&source, &temp.path().join("backup")).expect_err("file source must fail");
    assert!(matches!(err, BackupError::SourceNotDirectory(_)));
    assert!(source.is_file());
}

#[test]
fn copy_fallback_leaves_no_staging_or_source_behind() {
    let temp = tempfile::tempdir().expect("must create temp dir");
    let source = temp.path().join("tweaks");
    fs::create_dir_all(source.join("nested")).expect("must create source");
    fs::write(source.join("nested").join("t.md"), "tweak").expect("must write");
    let destination = temp.path().join("tweaks_backup");

    let outcome = copy_then_retire(&source, &destination).expect("copy must succeed");

    assert_eq!(outcome, ArchiveOutcome::Copied(destination.clone()));
    assert!(!source.exists());
    assert_eq!(
        fs::read_to_string(destination.join("nested").join("t.md")).expect("must read"),
        "tweak"
    );
    let leftovers = fs::read_dir(temp.path())
        .expect("must list")
        .flatten()
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .collect::<Vec<_>>();
    assert_eq!(leftovers, vec!["tweaks_backup".to_string()]);
}

#[cfg(unix)]
#[test]
fn failed_copy_fallback_leaves_source_intact_and_no_backup() {
    use std::os::unix::net::UnixListener;

    let temp = tempfile::tempdir().expect("must create temp dir");
    let source = temp.path().join("insights");
    fs::create_dir_all(source.join("rust")).expect("must create source");
    fs::write(source.join("rust").join("a.insight.md"), "keep me").expect("must write");
    // sockets cannot be copied as regular files
    let _listener = UnixListener::bind(source.join("zz.sock")).expect("must bind socket");
    let destination = temp.path().join("insights_backup");

    let err = copy_then_retire(&source, &destination).expect_err("copy must fail");

    assert!(matches!(err, BackupError::CopyFailed { .. }), "unexpected: {err}");
    assert!(!destination.exists());
    assert_eq!(
        fs::read_to_string(source.join("rust").join("a.insight.md")).expect("must read"),
        "keep me"
    );
    assert!(fs::symlink_metadata(source.join("zz.sock")).is_ok());
    let leftovers = fs::read_dir(temp.path())
        .expect("must list")
        .flatten()
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .collect::<Vec<_>>();
    assert_eq!(leftovers, vec!["insights".to_string()]);
}

#[test]
fn rename_failure_other_than_cross_device_is_reported_directly() {
    let temp = tempfile::tempdir().expect("must create temp dir");
    let source = temp.path().join("tweaks");
    fs::create_dir_all(&source).expect("must create source");
    fs::write(source.join("t.md"), "tweak").expect("must write");
    fs::create_dir_all(source.join("inner")).expect("must create inner");
    // a directory cannot be renamed into itself
    let destination = source.join("inner").join("backup");

    let err = archive(&source, &destination).expect_err("rename must fail");

    assert!(
        matches!(err, BackupError::Io { action: "move", .. }),
        "unexpected: {err}"
    );
    assert_eq!(
        fs::read_to_string(source.join("t.md")).expect("must read"),
        "tweak"
    );
    assert!(!destination.exists());
}

// ---- install ----

#[test]
fn install_copies_built_tools_and_skips_missing_ones() {
    let sandbox = Sandbox::new();
    let bundle = sandbox.bundle(&["kernelle", "blizz", "violet"], true);
    let builder = RecordingBuilder {
        calls: Cell::new(0),
    };
    let mut observer = RecordingObserver::default();

    let report = install(&sandbox.layout, &bundle, &builder, &mut observer)
        .expect("install must succeed");

    assert_eq!(builder.calls.get(), 1);
    assert!(observer.built);
    assert_eq!(observer.tools, TOOL_NAMES.to_vec());
    let installed = report.installed().map(|tool| tool.name).collect::<Vec<_>>();
    let skipped = report.skipped().map(|tool| tool.name).collect::<Vec<_>>();
    assert_eq!(installed, vec!["kernelle", "blizz", "violet"]);
    assert_eq!(skipped, vec!["jerrod", "adam", "sentinel"]);
    assert_eq!(report.version.as_deref(), Some("0.3.0"));

    for name in ["kernelle", "blizz", "violet"] {
        assert_eq!(
            fs::read_to_string(sandbox.layout.tool_path(name)).expect("must read binary"),
            format!("binary:{name}")
        );
    }
    assert!(!sandbox.layout.tool_path("jerrod").exists());
    assert!(sandbox
        .layout
        .rules_dir()
        .join("workflows")
        .join("review.md")
        .is_file());
    assert_eq!(
        fs::read_to_string(sandbox.layout.source_file_path()).expect("must read source file"),
        ENABLED_SOURCE_TEMPLATE
    );
    assert!(
        !sandbox.layout.insights_dir().exists(),
        "install never writes insights"
    );
}

#[cfg(unix)]
#[test]
fn installed_tools_are_executable() {
    use std::os::unix::fs::PermissionsExt;

    let sandbox = Sandbox::new();
    sandbox.install(&["adam"]);
    let mode = fs::metadata(sandbox.layout.tool_path("adam"))
        .expect("must stat")
        .permissions()
        .mode();
    assert_eq!(mode & 0o111, 0o111);
}

#[cfg(unix)]
#[test]
fn failing_build_command_names_program_and_status() {
    let sandbox = Sandbox::new();
    let bundle = sandbox.bundle(&[], false);

    let err = CargoBuilder::new("false")
        .build(&bundle)
        .expect_err("build must fail");

    let message = err.to_string();
    assert!(
        message.starts_with("failed to build kernelle binaries: false exited with"),
        "message: {message}"
    );
}

#[test]
fn install_rerun_converges_and_keeps_tweaks() {
    let sandbox = Sandbox::new();
    sandbox.install(&["kernelle"]);
    sandbox.seed_tweaks();
    fs::write(sandbox.layout.source_file_path(), "# stale").expect("must write");

    let report = sandbox.install(&["kernelle", "jerrod"]);

    assert_eq!(report.installed().count(), 2);
    assert!(sandbox.layout.tweaks_dir().join("review.md").is_file());
    assert_eq!(
        fs::read_to_string(sandbox.layout.source_file_path()).expect("must read"),
        ENABLED_SOURCE_TEMPLATE
    );
}

#[test]
fn install_without_rules_bundle_warns_but_succeeds() {
    let sandbox = Sandbox::new();
    let bundle = sandbox.bundle(&["kernelle"], false);

    let report = install(&sandbox.layout, &bundle, &PrebuiltArtifacts, &mut NoopObserver)
        .expect("install must succeed");

    assert!(matches!(report.rules, RulesStatus::MissingInBundle(_)));
    assert_eq!(report.warnings.len(), 1);
    assert!(report.warnings[0].contains("rules bundle not found"));
    assert!(!sandbox.layout.rules_dir().exists());
}

#[test]
fn install_stops_when_build_fails() {
    let sandbox = Sandbox::new();
    let bundle = sandbox.bundle(&["kernelle"], true);

    let err = install(&sandbox.layout, &bundle, &FailingBuilder, &mut NoopObserver)
        .expect_err("build failure must abort install");

    assert!(err.to_string().contains("linker"), "unexpected error: {err}");
    assert!(!sandbox.layout.tool_path("kernelle").exists());
    assert!(!sandbox.layout.source_file_path().exists());
}

// ---- cleanup ----

fn tools_left(layout: &KernelleLayout) -> Vec<&'static str> {
    TOOL_NAMES
        .into_iter()
        .filter(|name| layout.tool_path(name).exists())
        .collect()
}

fn insights_backups(layout: &KernelleLayout) -> usize {
    fs::read_dir(layout.user_home())
        .expect("must list user home")
        .flatten()
        .filter(|entry| entry.file_name().to_string_lossy().contains("insights_backup"))
        .count()
}

#[test]
fn install_then_default_cleanup_preserves_insights_and_removes_everything_else() {
    let sandbox = Sandbox::new();
    sandbox.install(&["kernelle", "blizz", "violet"]);
    sandbox.seed_insights();
    fs::create_dir_all(sandbox.layout.global_insights_dir()).expect("must create");
    let mut prompter = ScriptedPrompter::new([]);

    let report = cleanup(&sandbox.config(non_interactive(None)), &mut prompter)
        .expect("cleanup must run");

    assert!(report.is_clean(), "failures: {:?}", report.failures);
    assert!(prompter.asked().is_empty());
    assert_eq!(report.insights, Decision::Preserve);
    assert!(tools_left(&sandbox.layout).is_empty());
    assert!(!sandbox.layout.home().exists());
    assert_eq!(insights_backups(&sandbox.layout), 1);
    assert!(sandbox
        .layout
        .insights_backup_dir()
        .join("rust")
        .join("ownership.insight.md")
        .is_file());
    assert_eq!(
        report.preserved,
        vec![Preserved {
            label: "insights",
            location: sandbox.layout.insights_backup_dir(),
        }]
    );
    assert!(report
        .deleted
        .contains(&sandbox.layout.global_insights_dir()));
    assert!(report.deleted.contains(&sandbox.layout.home().to_path_buf()));
    assert_eq!(report.removed_binaries, vec!["kernelle", "blizz", "violet"]);
    assert_eq!(
        fs::read_to_string(sandbox.layout.source_file_path()).expect("source file stays"),
        DISABLED_SOURCE_TEMPLATE
    );
}

#[test]
fn cleanup_twice_is_idempotent() {
    let sandbox = Sandbox::new();
    sandbox.install(&["kernelle", "sentinel"]);
    sandbox.seed_insights();
    let config = sandbox.config(non_interactive(None));

    cleanup(&config, &mut ScriptedPrompter::new([])).expect("first cleanup must run");
    let second = cleanup(&config, &mut ScriptedPrompter::new([])).expect("second cleanup must run");

    assert!(second.is_clean(), "failures: {:?}", second.failures);
    assert!(second.preserved.is_empty());
    assert!(second.deleted.is_empty());
    assert!(second.removed_binaries.is_empty());
    assert!(!sandbox.layout.home().exists());
    assert_eq!(insights_backups(&sandbox.layout), 1);
    assert!(sandbox.layout.source_file_path().is_file());
}

#[test]
fn cleanup_on_fresh_system_succeeds() {
    let sandbox = Sandbox::new();
    let report = cleanup(
        &sandbox.config(RunMode::Interactive),
        &mut ScriptedPrompter::new([]),
    )
    .expect("cleanup must run");

    assert!(report.is_clean());
    assert_eq!(report.insights, Decision::Preserve);
    assert_eq!(report.tweaks, None);
}

#[test]
fn non_interactive_delete_insights_removes_them_without_backup() {
    let sandbox = Sandbox::new();
    sandbox.install(&["kernelle"]);
    sandbox.seed_insights();

    let report = cleanup(
        &sandbox.config(non_interactive(Some(Decision::Delete))),
        &mut ScriptedPrompter::new([]),
    )
    .expect("cleanup must run");

    assert!(report.is_clean(), "failures: {:?}", report.failures);
    assert_eq!(report.insights, Decision::Delete);
    assert!(!sandbox.layout.insights_dir().exists());
    assert!(!sandbox.layout.insights_backup_dir().exists());
    assert!(report.deleted.contains(&sandbox.layout.insights_dir()));
    assert!(report
        .warnings
        .iter()
        .any(|warning| warning.contains("cannot be recovered")));
}

#[test]
fn interactive_triple_check_can_delete_insights() {
    let sandbox = Sandbox::new();
    sandbox.install(&["kernelle"]);
    sandbox.seed_insights();
    let mut prompter = ScriptedPrompter::new([false, true, true]);

    let report = cleanup(&sandbox.config(RunMode::Interactive), &mut prompter)
        .expect("cleanup must run");

    assert_eq!(report.insights, Decision::Delete);
    assert_eq!(prompter.asked().len(), 3);
    assert!(!sandbox.layout.home().exists());
    assert!(!sandbox.layout.insights_backup_dir().exists());
}

#[test]
fn interactive_hesitation_preserves_insights() {
    let sandbox = Sandbox::new();
    sandbox.install(&["kernelle"]);
    sandbox.seed_insights();
    let mut prompter = ScriptedPrompter::new([false, true, false]);

    let report = cleanup(&sandbox.config(RunMode::Interactive), &mut prompter)
        .expect("cleanup must run");

    assert_eq!(report.insights, Decision::Preserve);
    assert!(sandbox.layout.insights_backup_dir().join("rust").is_dir());
}

#[test]
fn unanswered_insights_prompt_aborts_before_any_change() {
    let sandbox = Sandbox::new();
    sandbox.install(&["kernelle"]);
    sandbox.seed_insights();

    let err = cleanup(
        &sandbox.config(RunMode::Interactive),
        &mut ScriptedPrompter::new([]),
    )
    .expect_err("missing answer must abort");

    assert!(err.to_string().contains("no scripted answer"));
    assert!(sandbox.layout.insights_dir().is_dir());
    assert!(sandbox.layout.tool_path("kernelle").is_file());
    assert_eq!(
        fs::read_to_string(sandbox.layout.source_file_path()).expect("must read"),
        ENABLED_SOURCE_TEMPLATE
    );
}

#[test]
fn existing_backup_keeps_home_and_reports_conflict() {
    let sandbox = Sandbox::new();
    sandbox.install(&["kernelle", "jerrod"]);
    sandbox.seed_insights();
    let old_backup = sandbox.layout.insights_backup_dir();
    fs::create_dir_all(&old_backup).expect("must create old backup");
    fs::write(old_backup.join("old.md"), "old").expect("must write");

    let report = cleanup(
        &sandbox.config(non_interactive(None)),
        &mut ScriptedPrompter::new([]),
    )
    .expect("cleanup must run");

    assert!(!report.is_clean());
    let failed_steps = report
        .failures
        .iter()
        .map(|failure| failure.step)
        .collect::<Vec<_>>();
    assert_eq!(failed_steps, vec![CleanupStep::InsightsBackup, CleanupStep::Home]);
    assert!(report.home_retained);
    assert!(sandbox
        .layout
        .insights_dir()
        .join("rust")
        .join("ownership.insight.md")
        .is_file());
    assert!(old_backup.join("old.md").is_file());
    assert!(!old_backup.join("rust").exists());
    // independent steps still ran
    assert!(tools_left(&sandbox.layout).is_empty());
    assert_eq!(
        fs::read_to_string(sandbox.layout.source_file_path()).expect("must read"),
        DISABLED_SOURCE_TEMPLATE
    );
}

#[test]
fn preserving_absent_insights_is_not_a_conflict() {
    let sandbox = Sandbox::new();
    sandbox.install(&["kernelle"]);
    fs::create_dir_all(sandbox.layout.insights_backup_dir()).expect("must create old backup");

    let report = cleanup(
        &sandbox.config(non_interactive(Some(Decision::Preserve))),
        &mut ScriptedPrompter::new([]),
    )
    .expect("cleanup must run");

    assert!(report.is_clean(), "failures: {:?}", report.failures);
    assert!(!sandbox.layout.home().exists());
}

#[test]
fn non_interactive_cleanup_always_keeps_tweaks() {
    let sandbox = Sandbox::new();
    sandbox.install(&["kernelle"]);
    sandbox.seed_tweaks();

    let report = cleanup(
        &sandbox.config(non_interactive(Some(Decision::Delete))),
        &mut ScriptedPrompter::new([]),
    )
    .expect("cleanup must run");

    assert_eq!(report.tweaks, Some(Decision::Preserve));
    assert!(sandbox.layout.tweaks_backup_dir().join("review.md").is_file());
    assert!(report
        .preserved
        .iter()
        .any(|preserved| preserved.label == "tweaks"));
}

#[test]
fn interactive_cleanup_can_drop_tweaks() {
    let sandbox = Sandbox::new();
    sandbox.install(&["kernelle"]);
    sandbox.seed_insights();
    sandbox.seed_tweaks();
    let mut prompter = ScriptedPrompter::new([true, false]);

    let report = cleanup(&sandbox.config(RunMode::Interactive), &mut prompter)
        .expect("cleanup must run");

    assert_eq!(report.insights, Decision::Preserve);
    assert_eq!(report.tweaks, Some(Decision::Delete));
    assert!(sandbox.layout.insights_backup_dir().is_dir());
    assert!(!sandbox.layout.tweaks_backup_dir().exists());
    assert!(report.deleted.contains(&sandbox.layout.tweaks_dir()));
    assert_eq!(prompter.asked()[1].1, Some(true));
}

#[test]
fn unanswered_tweaks_prompt_keeps_tweaks() {
    let sandbox = Sandbox::new();
    sandbox.install(&["kernelle"]);
    sandbox.seed_tweaks();

    let report = cleanup(
        &sandbox.config(RunMode::Interactive),
        &mut ScriptedPrompter::new([]),
    )
    .expect("cleanup must run");

    assert_eq!(report.tweaks, Some(Decision::Preserve));
    assert!(sandbox.layout.tweaks_backup_dir().join("review.md").is_file());
    assert_eq!(report.failures[0].step, CleanupStep::TweaksDecision);
}

#[test]
fn cleanup_prunes_rule_links_in_working_tree() {
    let sandbox = Sandbox::new();
    sandbox.install(&["kernelle"]);
    let rules = sandbox.layout.rules_dir();

    let mut fs_tree = MemoryFs::new();
    let work = sandbox.work.clone();
    fs_tree
        .add_symlink(work.join("proj/.cursor/rules/kernelle"), rules.clone())
        .add_symlink(work.join("proj/rules"), rules.clone())
        .add_file(work.join("proj/Cargo.toml"));

    let report = cleanup_with_fs(
        &sandbox.config(non_interactive(None)),
        &mut ScriptedPrompter::new([]),
        &fs_tree,
    )
    .expect("cleanup must run");

    assert_eq!(report.removed_links.len(), 2);
    assert_eq!(
        report.removed_link_dirs,
        vec![work.join("proj/.cursor/rules")]
    );
    assert!(fs_tree.exists(work.join("proj/Cargo.toml")));
}

#[cfg(unix)]
#[test]
fn cleanup_removes_real_rule_links() {
    use std::os::unix::fs::symlink;

    let sandbox = Sandbox::new();
    sandbox.install(&["kernelle"]);
    let link_dir = sandbox.work.join("proj").join(".cursor").join("rules");
    fs::create_dir_all(&link_dir).expect("must create link dir");
    symlink(sandbox.layout.rules_dir(), link_dir.join("kernelle")).expect("must link");

    let report = cleanup(
        &sandbox.config(non_interactive(None)),
        &mut ScriptedPrompter::new([]),
    )
    .expect("cleanup must run");

    assert!(report.is_clean(), "failures: {:?}", report.failures);
    assert!(!link_dir.exists());
    assert!(sandbox.work.join("proj").join(".cursor").is_dir());
}

#[cfg(unix)]
#[test]
fn cleanup_with_relative_home_override_still_removes_links() {
    use std::os::unix::fs::symlink;

    let temp = tempfile::tempdir().expect("must create temp dir");
    let root = temp.path().to_path_buf();
    let user_home = root.join("home");
    fs::create_dir_all(&user_home).expect("must create user home");
    let layout = KernelleLayout::from_env_lookup(
        |key| match key {
            "HOME" => Some(user_home.to_string_lossy().into_owned()),
            HOME_ENV => Some("kh".to_string()),
            INSTALL_DIR_ENV => Some("bin".to_string()),
            _ => None,
        },
        &root,
    )
    .expect("must resolve layout");
    fs::create_dir_all(root.join("kh").join("rules")).expect("must create rules");
    let project = root.join("work").join("proj");
    fs::create_dir_all(&project).expect("must create project");
    fs::write(project.join("Cargo.toml"), "[package]\n").expect("must write manifest");
    let link = project.join("rules");
    symlink(root.join("kh").join("rules"), &link).expect("must link");

    let config = LifecycleConfig::new(layout, non_interactive(None), root.join("work"));
    let report = cleanup(&config, &mut ScriptedPrompter::new([])).expect("cleanup must run");

    assert_eq!(report.removed_links, vec![link.clone()]);
    assert!(fs::symlink_metadata(&link).is_err());
    assert!(!root.join("kh").exists());
}

// ---- status ----

#[test]
fn status_tracks_install_and_cleanup() {
    let sandbox = Sandbox::new();
    sandbox.install(&["kernelle", "blizz", "violet"]);
    sandbox.seed_insights();

    let status = inspect(&sandbox.layout);
    assert!(status.home_exists);
    assert!(status.rules);
    assert!(status.insights);
    assert_eq!(status.installed_tools(), 3);
    assert_eq!(status.source_file, SourceFileState::Enabled);
    assert!(status.insights_backup.is_none());

    cleanup(
        &sandbox.config(non_interactive(None)),
        &mut ScriptedPrompter::new([]),
    )
    .expect("cleanup must run");

    let status = inspect(&sandbox.layout);
    assert!(!status.home_exists);
    assert_eq!(status.installed_tools(), 0);
    assert_eq!(status.source_file, SourceFileState::Disabled);
    assert_eq!(
        status.insights_backup,
        Some(sandbox.layout.insights_backup_dir())
    );
}

// ---- snapshots ----

#[test]
fn snapshot_restores_home_and_binaries() {
    let sandbox = Sandbox::new();
    sandbox.install(&["kernelle", "blizz"]);
    sandbox.seed_insights();

    let snapshot = create_snapshot(&sandbox.layout).expect("must snapshot");
    let manifest = read_snapshot_manifest(&snapshot).expect("must read manifest");
    assert_eq!(
        manifest
            .binaries
            .iter()
            .map(|binary| binary.name.as_str())
            .collect::<Vec<_>>(),
        vec!["kernelle", "blizz"]
    );
    assert_eq!(list_snapshots(&sandbox.layout).expect("must list"), vec![snapshot.clone()]);

    fs::remove_dir_all(sandbox.layout.rules_dir()).expect("must break home");
    fs::write(sandbox.layout.tool_path("blizz"), "broken").expect("must break binary");

    let restored = restore_snapshot(&sandbox.layout, &snapshot).expect("must restore");

    assert!(restored.home_restored);
    assert_eq!(restored.restored_binaries, vec!["kernelle", "blizz"]);
    assert!(sandbox.layout.rules_dir().join("workflows").is_dir());
    assert!(sandbox.layout.insights_dir().join("rust").is_dir());
    assert_eq!(
        fs::read_to_string(sandbox.layout.tool_path("blizz")).expect("must read"),
        "binary:blizz"
    );
    assert!(snapshot.join(SNAPSHOT_MANIFEST).is_file(), "snapshots survive restore");
    assert!(!snapshot.join("kernelle_home").join("snapshots").exists());
}

#[test]
fn restore_rejects_tampered_binary() {
    let sandbox = Sandbox::new();
    sandbox.install(&["violet"]);
    let snapshot = create_snapshot(&sandbox.layout).expect("must snapshot");
    fs::write(
        snapshot.join("bins").join(executable_name("violet")),
        "tampered",
    )
    .expect("must tamper");
    fs::write(sandbox.layout.tool_path("violet"), "current").expect("must write");

    let err = restore_snapshot(&sandbox.layout, &snapshot).expect_err("tamper must fail");

    assert!(err.to_string().contains("checksum mismatch"), "unexpected error: {err}");
    assert_eq!(
        fs::read_to_string(sandbox.layout.tool_path("violet")).expect("must read"),
        "current"
    );
}

#[test]
fn snapshot_requires_existing_home() {
    let sandbox = Sandbox::new();
    let err = create_snapshot(&sandbox.layout).expect_err("no home, no snapshot");
    assert!(err.to_string().contains("nothing to snapshot"));
    assert!(list_snapshots(&sandbox.layout).expect("must list").is_empty());
}

#[test]
fn sha256_file_matches_known_digest() {
    let temp = tempfile::tempdir().expect("must create temp dir");
    let path = temp.path().join("empty");
    fs::write(&path, "").expect("must write");
    assert_eq!(
        sha256_file(&path).expect("must hash"),
        "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
    );
}

#[test]
fn remove_helpers_treat_absence_as_success() {
    let temp = tempfile::tempdir().expect("must create temp dir");
    let file = temp.path().join("file");
    fs::write(&file, "x").expect("must write");

    assert_eq!(
        remove_file_if_exists(&file).expect("must remove"),
        RemoveOutcome::Removed
    );
    assert_eq!(
        remove_file_if_exists(&file).expect("absent is fine"),
        RemoveOutcome::AlreadyAbsent
    );
    assert_eq!(
        remove_dir_all_if_exists(&temp.path().join("nope")).expect("absent is fine"),
        RemoveOutcome::AlreadyAbsent
    );
}
