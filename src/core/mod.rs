//! 核心类型：错误与状态

pub mod error;
pub mod state;

pub use error::AgentError;
pub use state::{AgentState, ToolUseMode};
