use std::path::PathBuf;

use thiserror::Error;

/// Failures detected before anything on disk is touched.
#[derive(Debug, Error)]
pub enum PreconditionError {
    #[error("HOME is not set; cannot resolve the kernelle home directory")]
    HomeUnresolved,
    #[error(
        "build descriptor {descriptor} not found in {}; the source tree is incomplete or kernelle-setup is running from the wrong place (found: {})",
        .root.display(),
        render_listing(.contents)
    )]
    MissingDescriptor {
        root: PathBuf,
        descriptor: &'static str,
        contents: Vec<String>,
    },
    #[error("invalid build descriptor {}: {reason}", .path.display())]
    InvalidDescriptor { path: PathBuf, reason: String },
}

fn render_listing(contents: &[String]) -> String {
    if contents.is_empty() {
        return "nothing".to_string();
    }
    contents.join(", ")
}
