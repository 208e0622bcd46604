use std::path::{Path, PathBuf};

use crate::layout::KernelleLayout;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Preserve,
    Delete,
}

impl Decision {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Preserve => "preserve",
            Self::Delete => "delete",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Interactive,
    NonInteractive { insights: Option<Decision> },
}

impl RunMode {
    /// `keep`/`delete` only take effect together with `non_interactive`.
    pub fn from_flags(non_interactive: bool, keep_insights: bool, delete_insights: bool) -> Self {
        if !non_interactive {
            return Self::Interactive;
        }
        let insights = match (keep_insights, delete_insights) {
            (false, false) => None,
            (false, true) => Some(Decision::Delete),
            // conflicting flags fall back to the safe side
            (true, _) => Some(Decision::Preserve),
        };
        Self::NonInteractive { insights }
    }
}

/// Everything one invocation needs, resolved once at entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleConfig {
    layout: KernelleLayout,
    mode: RunMode,
    working_tree: PathBuf,
}

impl LifecycleConfig {
    pub fn new(layout: KernelleLayout, mode: RunMode, working_tree: impl Into<PathBuf>) -> Self {
        Self {
            layout,
            mode,
            working_tree: working_tree.into(),
        }
    }

    pub fn layout(&self) -> &KernelleLayout {
        &self.layout
    }

    pub fn mode(&self) -> RunMode {
        self.mode
    }

    pub fn working_tree(&self) -> &Path {
        &self.working_tree
    }
}
