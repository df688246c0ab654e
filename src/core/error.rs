//! Agent 错误类型
//!
//! 调用方只会看到以下几类：非法状态、生成失败（校验重试耗尽）、工具查找/参数错误、LLM 后端错误。
//! 工具执行失败不在此列：它在批次内被转换为 `TOOL FAILED!` 结果文本回传给模型。

use thiserror::Error;

use crate::agent::VerificationError;
use crate::core::AgentState;
use crate::llm::LlmError;
use crate::tools::ToolError;

/// Agent 运行过程中可能出现的错误
#[derive(Error, Debug)]
pub enum AgentError {
    /// 当前状态下不允许该操作；从不在内部重试
    #[error("Invalid state: cannot {operation} while {actual} (requires {expected})")]
    InvalidState {
        operation: &'static str,
        expected: AgentState,
        actual: AgentState,
    },

    /// 模型连续 attempts 次输出格式错误的工具调用
    #[error("Bad AI response: failed verification after {attempts} attempts: {}", .errors.join("; "))]
    BadResponse { attempts: usize, errors: Vec<String> },

    /// 历史中的助手消息含有不合法的工具调用（通常由 force_add_chat_msg 写入）
    #[error(transparent)]
    Verification(#[from] VerificationError),

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Unknown tool profile: {0}")]
    UnknownToolProfile(String),

    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// 后端错误原样上抛，不做内部重试
    #[error("LLM error: {0}")]
    LlmError(#[from] LlmError),
}

impl AgentError {
    pub(crate) fn invalid_state(
        operation: &'static str,
        expected: AgentState,
        actual: AgentState,
    ) -> Self {
        AgentError::InvalidState {
            operation,
            expected,
            actual,
        }
    }

    pub fn is_invalid_state(&self) -> bool {
        matches!(self, AgentError::InvalidState { .. })
    }

    /// 生成失败（区别于普通后端错误）
    pub fn is_generation_failure(&self) -> bool {
        matches!(self, AgentError::BadResponse { .. })
    }
}
