//! 状态定义：智能体状态机的七个状态与工具使用（审批）模式

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// ChatAgent 当前所处状态；状态唯一决定调用方下一步应执行的操作
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    Initializing,
    /// 被动：等待 message_from_user
    ReadyForMessage,
    ReceivedMessage,
    PendingToolUse,
    /// 被动：等待 approve / reject
    AwaitingToolApproval,
    UsingTools,
    /// 非法转移后进入，只能由调用方介入恢复
    Error,
}

impl AgentState {
    pub const ALL: [AgentState; 7] = [
        AgentState::Initializing,
        AgentState::ReadyForMessage,
        AgentState::ReceivedMessage,
        AgentState::PendingToolUse,
        AgentState::AwaitingToolApproval,
        AgentState::UsingTools,
        AgentState::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentState::Initializing => "initializing",
            AgentState::ReadyForMessage => "ready_for_message",
            AgentState::ReceivedMessage => "received_message",
            AgentState::PendingToolUse => "pending_tool_use",
            AgentState::AwaitingToolApproval => "awaiting_tool_approval",
            AgentState::UsingTools => "using_tools",
            AgentState::Error => "error",
        }
    }

    /// 被动状态下 run_agent 不会推进，需要调用方操作
    pub fn is_passive(&self) -> bool {
        matches!(
            self,
            AgentState::ReadyForMessage | AgentState::AwaitingToolApproval | AgentState::Error
        )
    }
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 工具审批策略
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolUseMode {
    /// 所有工具调用都需人工审批
    Manual,
    /// 标记为 safe 的工具自动执行，其余需审批
    #[default]
    AutomaticSafeOnly,
    /// 所有工具自动执行
    AutomaticUnsafe,
}

impl ToolUseMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolUseMode::Manual => "manual",
            ToolUseMode::AutomaticSafeOnly => "automatic_safe_only",
            ToolUseMode::AutomaticUnsafe => "automatic_unsafe",
        }
    }
}

impl fmt::Display for ToolUseMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ToolUseMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "manual" => Ok(ToolUseMode::Manual),
            "automatic_safe_only" => Ok(ToolUseMode::AutomaticSafeOnly),
            "automatic_unsafe" => Ok(ToolUseMode::AutomaticUnsafe),
            other => Err(format!("unknown tool use mode: {other}")),
        }
    }
}
