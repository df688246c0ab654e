//! 响应校验：检查模型输出中的工具调用语法
//!
//! 没有工具标记的消息总是合法；有标记时，每个片段都必须是含 `name` 与 `label` 字符串字段的 JSON 对象。
//! 所有片段的问题一次性收集，便于重试时一并反馈给模型。

use thiserror::Error;

use crate::agent::protocol::{contains_tool_call, parse_segment, tool_segments, ToolCallRequest};

/// 工具调用格式错误（携带每个问题的描述）
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("tool call verification failed: {}", .errors.join(", "))]
pub struct VerificationError {
    pub errors: Vec<String>,
}

impl VerificationError {
    /// 回传给模型的错误提示
    pub fn feedback(&self) -> String {
        format!("<system>Error with tool calls: {}</system>", self.errors.join(", "))
    }
}

/// 校验并返回全部工具调用
pub fn verify_tool_calls(message: &str) -> Result<Vec<ToolCallRequest>, VerificationError> {
    if !contains_tool_call(message) {
        return Ok(Vec::new());
    }
    let mut calls = Vec::new();
    let mut errors = Vec::new();
    for (idx, segment) in tool_segments(message).into_iter().enumerate() {
        match parse_segment(idx, segment) {
            Ok(call) => calls.push(call),
            Err(mut errs) => errors.append(&mut errs),
        }
    }
    if errors.is_empty() {
        Ok(calls)
    } else {
        Err(VerificationError { errors })
    }
}

pub fn verify_response(message: &str) -> Result<(), VerificationError> {
    verify_tool_calls(message).map(|_| ())
}
