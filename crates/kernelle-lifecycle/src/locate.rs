use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Dir,
    File,
    Symlink,
}

/// The filesystem operations the locator needs. Nothing here follows links.
pub trait LinkFs {
    fn entry_kind(&self, path: &Path) -> io::Result<EntryKind>;
    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>>;
    fn read_link(&self, path: &Path) -> io::Result<PathBuf>;
    fn remove_link(&self, path: &Path) -> io::Result<()>;
    fn remove_empty_dir(&self, path: &Path) -> io::Result<()>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct OsFs;

impl LinkFs for OsFs {
    fn entry_kind(&self, path: &Path) -> io::Result<EntryKind> {
        let file_type = fs::symlink_metadata(path)?.file_type();
        Ok(if file_type.is_symlink() {
            EntryKind::Symlink
        } else if file_type.is_dir() {
            EntryKind::Dir
        } else {
            EntryKind::File
        })
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        fs::read_dir(path)?
            .map(|entry| entry.map(|entry| entry.path()))
            .collect()
    }

    fn read_link(&self, path: &Path) -> io::Result<PathBuf> {
        fs::read_link(path)
    }

    fn remove_link(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }

    fn remove_empty_dir(&self, path: &Path) -> io::Result<()> {
        fs::remove_dir(path)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum MemoryEntry {
    Dir,
    File,
    Symlink(PathBuf),
}

/// In-memory tree for exercising link matching without a real filesystem.
#[derive(Debug, Clone, Default)]
pub struct MemoryFs {
    entries: std::cell::RefCell<BTreeMap<PathBuf, MemoryEntry>>,
    denied: BTreeSet<PathBuf>,
}

impl MemoryFs {
    pub fn new() -> Self {
        let fs = Self::default();
        fs.entries
            .borrow_mut()
            .insert(PathBuf::from("/"), MemoryEntry::Dir);
        fs
    }

    pub fn add_dir(&mut self, path: impl AsRef<Path>) -> &mut Self {
        self.insert(path.as_ref(), MemoryEntry::Dir);
        self
    }

    pub fn add_file(&mut self, path: impl AsRef<Path>) -> &mut Self {
        self.insert(path.as_ref(), MemoryEntry::File);
        self
    }

    pub fn add_symlink(&mut self, path: impl AsRef<Path>, target: impl Into<PathBuf>) -> &mut Self {
        self.insert(path.as_ref(), MemoryEntry::Symlink(target.into()));
        self
    }

    /// Makes listing `path` fail with `PermissionDenied`.
    pub fn deny(&mut self, path: impl Into<PathBuf>) -> &mut Self {
        self.denied.insert(path.into());
        self
    }

    pub fn exists(&self, path: impl AsRef<Path>) -> bool {
        self.entries.borrow().contains_key(path.as_ref())
    }

    fn insert(&mut self, path: &Path, entry: MemoryEntry) {
        let mut entries = self.entries.borrow_mut();
        for ancestor in path.ancestors().skip(1) {
            entries
                .entry(ancestor.to_path_buf())
                .or_insert(MemoryEntry::Dir);
        }
        entries.insert(path.to_path_buf(), entry);
    }

    fn children(&self, path: &Path) -> Vec<PathBuf> {
        self.entries
            .borrow()
            .keys()
            .filter(|candidate| candidate.parent() == Some(path))
            .cloned()
            .collect()
    }
}

fn not_found(path: &Path) -> io::Error {
    io::Error::new(
        io::ErrorKind::NotFound,
        format!("no such entry: {}", path.display()),
    )
}

impl LinkFs for MemoryFs {
    fn entry_kind(&self, path: &Path) -> io::Result<EntryKind> {
        match self.entries.borrow().get(path) {
            Some(MemoryEntry::Dir) => Ok(EntryKind::Dir),
            Some(MemoryEntry::File) => Ok(EntryKind::File),
            Some(MemoryEntry::Symlink(_)) => Ok(EntryKind::Symlink),
            None => Err(not_found(path)),
        }
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        if self.denied.contains(path) {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("permission denied: {}", path.display()),
            ));
        }
        match self.entry_kind(path)? {
            EntryKind::Dir => Ok(self.children(path)),
            _ => Err(io::Error::new(
                io::ErrorKind::Other,
                format!("not a directory: {}", path.display()),
            )),
        }
    }

    fn read_link(&self, path: &Path) -> io::Result<PathBuf> {
        match self.entries.borrow().get(path) {
            Some(MemoryEntry::Symlink(target)) => Ok(target.clone()),
            Some(_) => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("not a symlink: {}", path.display()),
            )),
            None => Err(not_found(path)),
        }
    }

    fn remove_link(&self, path: &Path) -> io::Result<()> {
        match self.entry_kind(path)? {
            EntryKind::Dir => Err(io::Error::new(
                io::ErrorKind::Other,
                format!("is a directory: {}", path.display()),
            )),
            _ => {
                self.entries.borrow_mut().remove(path);
                Ok(())
            }
        }
    }

    fn remove_empty_dir(&self, path: &Path) -> io::Result<()> {
        if self.entry_kind(path)? != EntryKind::Dir || !self.children(path).is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                format!("directory not empty: {}", path.display()),
            ));
        }
        self.entries.borrow_mut().remove(path);
        Ok(())
    }
}

#[derive(Debug, Error)]
#[error("skipped {}: {source}", .path.display())]
pub struct LocateWarning {
    pub path: PathBuf,
    pub source: io::Error,
}

/// Finds symlinks under `root` whose target is `target`.
///
/// Relative link targets are resolved against the link's directory and
/// normalised lexically; the final path is never canonicalised, so a link
/// through some other symlinked directory does not match.
pub struct LinkLocator<'fs, F: LinkFs + ?Sized> {
    fs: &'fs F,
    root: PathBuf,
    target: PathBuf,
}

impl<'fs, F: LinkFs + ?Sized> LinkLocator<'fs, F> {
    pub fn new(fs: &'fs F, root: impl Into<PathBuf>, target: impl AsRef<Path>) -> Self {
        Self {
            fs,
            root: root.into(),
            target: normalize_lexically(target.as_ref()),
        }
    }

    /// Starts a fresh traversal; each call restarts from `root`.
    pub fn matches(&self) -> LinkMatches<'_, F> {
        LinkMatches {
            fs: self.fs,
            target: &self.target,
            dirs: vec![self.root.clone()],
            entries: Vec::new(),
        }
    }
}

pub struct LinkMatches<'a, F: LinkFs + ?Sized> {
    fs: &'a F,
    target: &'a Path,
    dirs: Vec<PathBuf>,
    entries: Vec<PathBuf>,
}

impl<F: LinkFs + ?Sized> Iterator for LinkMatches<'_, F> {
    type Item = Result<PathBuf, LocateWarning>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(entry) = self.entries.pop() {
                match self.fs.entry_kind(&entry) {
                    Ok(EntryKind::Dir) => self.dirs.push(entry),
                    Ok(EntryKind::File) => {}
                    Ok(EntryKind::Symlink) => match self.fs.read_link(&entry) {
                        Ok(link) if resolve_link(&entry, &link) == self.target => {
                            return Some(Ok(entry));
                        }
                        Ok(_) => {}
                        Err(source) => {
                            return Some(Err(LocateWarning {
                                path: entry,
                                source,
                            }))
                        }
                    },
                    // vanished between listing and stat
                    Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                    Err(source) => {
                        return Some(Err(LocateWarning {
                            path: entry,
                            source,
                        }))
                    }
                }
                continue;
            }

            let dir = self.dirs.pop()?;
            match self.fs.read_dir(&dir) {
                Ok(mut children) => {
                    children.sort();
                    children.reverse();
                    self.entries = children;
                }
                Err(source) => return Some(Err(LocateWarning { path: dir, source })),
            }
        }
    }
}

pub fn is_empty_dir<F: LinkFs + ?Sized>(fs: &F, path: &Path) -> bool {
    fs.read_dir(path)
        .map(|children| children.is_empty())
        .unwrap_or(false)
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PruneReport {
    pub removed_links: Vec<PathBuf>,
    pub removed_dirs: Vec<PathBuf>,
    pub warnings: Vec<String>,
    pub failures: Vec<String>,
}

/// Removes every link under `root` that points at `target`, then each link's
/// parent if that left it empty. Only the immediate parent is considered and
/// `root` itself is never removed.
pub fn prune_links<F: LinkFs + ?Sized>(fs: &F, root: &Path, target: &Path) -> PruneReport {
    let mut report = PruneReport::default();
    let locator = LinkLocator::new(fs, root, target);

    let mut found = Vec::new();
    for item in locator.matches() {
        match item {
            Ok(path) => found.push(path),
            Err(warning) => {
                tracing::warn!("{warning}");
                report.warnings.push(warning.to_string());
            }
        }
    }

    for link in found {
        if let Err(err) = fs.remove_link(&link) {
            if err.kind() != io::ErrorKind::NotFound {
                report
                    .failures
                    .push(format!("failed to remove link {}: {err}", link.display()));
                continue;
            }
        }
        tracing::info!("removed link {}", link.display());
        report.removed_links.push(link.clone());

        let Some(parent) = link.parent() else {
            continue;
        };
        if parent == root || !is_empty_dir(fs, parent) {
            continue;
        }
        match fs.remove_empty_dir(parent) {
            Ok(()) => {
                tracing::info!("removed empty directory {}", parent.display());
                report.removed_dirs.push(parent.to_path_buf());
            }
            Err(err) => report.warnings.push(format!(
                "left empty directory {}: {err}",
                parent.display()
            )),
        }
    }

    report
}

fn resolve_link(link: &Path, link_target: &Path) -> PathBuf {
    if link_target.is_absolute() {
        return normalize_lexically(link_target);
    }
    let base = link.parent().unwrap_or_else(|| Path::new(""));
    normalize_lexically(&base.join(link_target))
}

pub fn normalize_lexically(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match normalized.components().next_back() {
                Some(Component::Normal(_)) => {
                    normalized.pop();
                }
                Some(Component::RootDir | Component::Prefix(_)) => {}
                _ => normalized.push(component),
            },
            other => normalized.push(other),
        }
    }
    normalized
}
