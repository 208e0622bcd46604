mod archive;
mod cleanup;
mod fs_utils;
mod gate;
mod install;
mod locate;
mod snapshot;
mod status;

pub use archive::{archive, ArchiveOutcome, BackupError};
pub use cleanup::{
    cleanup, cleanup_with_fs, resolve_insights_decision, CleanupReport, CleanupStep, Preserved,
    StepFailure,
};
pub use fs_utils::{remove_dir_all_if_exists, remove_file_if_exists, RemoveOutcome};
pub use gate::{
    confirm_keep, decide, parse_answer, GateState, GateStep, LinePrompter, Prompter, Question,
    ScriptedPrompter, TripleCheck,
};
pub use install::{
    install, write_source_file, BinaryBuilder, CargoBuilder, InstallObserver, InstallReport,
    NoopObserver, PrebuiltArtifacts, RulesStatus, ToolInstall, ToolStatus,
};
pub use locate::{
    is_empty_dir, normalize_lexically, prune_links, EntryKind, LinkFs, LinkLocator, LinkMatches,
    LocateWarning, MemoryFs, OsFs, PruneReport,
};
pub use snapshot::{
    create_snapshot, list_snapshots, read_snapshot_manifest, restore_snapshot, sha256_file,
    RestoreReport, SnapshotBinary, SnapshotManifest, SNAPSHOT_MANIFEST,
};
pub use status::{inspect, InstallationStatus, SourceFileState, ToolPresence};

#[cfg(test)]
mod tests;
