//! Sully - 带工具调用的 LLM 对话智能体工具包
//!
//! 模块划分：
//! - **agent**: ChatAgent 状态机、工具调用标记协议、响应校验、提示词模板
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 状态枚举与错误类型
//! - **llm**: 补全端口与实现（OpenAI / AWS Bedrock / Mock）、模型目录
//! - **observability**: tracing 初始化
//! - **prompt**: 对话消息模型（文本 / 图片）
//! - **tools**: 工具注册表、参数 schema、执行器与内置工具

pub mod agent;
pub mod config;
pub mod core;
pub mod llm;
pub mod observability;
pub mod prompt;
pub mod tools;

pub use agent::{ChatAgent, ChatAgentBuilder};
pub use core::{AgentError, AgentState, ToolUseMode};
