//! 工具层：注册表、参数 schema、执行器与内置示例工具

pub mod clock;
pub mod echo;
pub mod executor;
pub mod registry;
pub mod schema;

pub use clock::clock_tool;
pub use echo::echo_tool;
pub use executor::{ToolExecutor, ToolOutcome, TOOL_FAILED_PREFIX};
pub use registry::{
    tool_description, AgentTool, NoParams, ToolAndParams, ToolError, ToolProfile, ToolProfiles,
};

/// 内置默认工具配置：clock（safe）与 echo
pub fn default_profile() -> ToolProfile {
    ToolProfile::new("default")
        .with_tool(clock_tool())
        .with_tool(echo_tool())
}
