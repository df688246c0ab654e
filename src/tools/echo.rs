//! Echo 工具（测试用）

use schemars::JsonSchema;
use serde::Deserialize;

use crate::tools::AgentTool;

/// Echo text back to the conversation (for testing tool use).
#[derive(Debug, Deserialize, JsonSchema)]
pub struct EchoParams {
    /// Text to echo
    #[serde(default)]
    pub text: String,
}

/// Echo 工具：回显文本；未标记 safe，自动模式下需要审批
pub fn echo_tool() -> AgentTool {
    AgentTool::new("echo", |p: EchoParams| {
        let text = if p.text.is_empty() { "(empty)".to_string() } else { p.text };
        Ok::<_, String>(text)
    })
}
