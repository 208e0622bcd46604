pub const ENABLED_SOURCE_TEMPLATE: &str = include_str!("../templates/enabled.source");
pub const DISABLED_SOURCE_TEMPLATE: &str = include_str!("../templates/disabled.source");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceTemplate {
    Enabled,
    Disabled,
}

impl SourceTemplate {
    pub fn contents(self) -> &'static str {
        match self {
            Self::Enabled => ENABLED_SOURCE_TEMPLATE,
            Self::Disabled => DISABLED_SOURCE_TEMPLATE,
        }
    }
}
