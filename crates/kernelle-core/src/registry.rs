pub const TOOL_NAMES: [&str; 6] = ["kernelle", "jerrod", "blizz", "violet", "adam", "sentinel"];

pub fn executable_name(tool: &str) -> String {
    format!("{tool}{}", std::env::consts::EXE_SUFFIX)
}

pub fn is_registry_tool(name: &str) -> bool {
    TOOL_NAMES.contains(&name)
}
