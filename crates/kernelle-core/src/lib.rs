mod bundle;
mod config;
mod error;
mod layout;
mod registry;
mod templates;

pub use bundle::{default_source_root, SourceBundle, BUILD_DESCRIPTOR, SOURCE_ENV};
pub use config::{Decision, LifecycleConfig, RunMode};
pub use error::PreconditionError;
pub use layout::{KernelleLayout, HOME_ENV, INSTALL_DIR_ENV, SOURCE_FILE_NAME};
pub use registry::{executable_name, is_registry_tool, TOOL_NAMES};
pub use templates::{SourceTemplate, DISABLED_SOURCE_TEMPLATE, ENABLED_SOURCE_TEMPLATE};
