//! Agent 层：工具调用标记协议、响应校验、提示词模板与 ChatAgent 状态机

pub mod chat;
pub mod instructions;
pub mod protocol;
pub mod verifier;

pub use chat::{ChatAgent, ChatAgentBuilder};
pub use instructions::{build_tool_usage_prompt, TOOL_USAGE_PROMPT};
pub use protocol::{
    extract_tool_calls, format_tool_call, format_tool_message, visible_text, ToolCallRequest,
    TOOL_CLOSE, TOOL_OPEN,
};
pub use verifier::{verify_response, VerificationError};
