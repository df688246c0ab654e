//! 工具调用标记协议
//!
//! 语法：`<可见文本><tool>{JSON}</tool><tool>{JSON}</tool>...`
//!
//! - 第一个 `<tool>` 之前的文本是展示给用户的部分；
//! - 之后每个 `<tool>` 开始一个片段，片段到 `</tool>` 为止（最后一个片段缺少闭合标签时取到末尾）；
//! - 片段内是 `{"name", "label", "parameters"?}` 对象，按出现顺序执行。

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::agent::verifier::{verify_tool_calls, VerificationError};

pub const TOOL_OPEN: &str = "<tool>";
pub const TOOL_CLOSE: &str = "</tool>";

/// 模型发出的一次工具调用请求
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub name: String,
    pub label: String,
    #[serde(default)]
    pub parameters: Map<String, Value>,
}

impl ToolCallRequest {
    pub fn new(name: impl Into<String>, label: impl Into<String>, parameters: Map<String, Value>) -> Self {
        Self {
            name: name.into(),
            label: label.into(),
            parameters,
        }
    }
}

pub fn contains_tool_call(message: &str) -> bool {
    message.contains(TOOL_OPEN)
}

/// 第一个工具标记之前的可见文本；没有标记时为整条消息
pub fn visible_text(message: &str) -> &str {
    message
        .split_once(TOOL_OPEN)
        .map_or(message, |(visible, _)| visible)
}

/// 切分出所有工具调用片段（标记之间的原始文本，未解析）
pub fn tool_segments(message: &str) -> Vec<&str> {
    let Some((_, rest)) = message.split_once(TOOL_OPEN) else {
        return Vec::new();
    };
    rest.split(TOOL_OPEN)
        .map(|segment| segment.split_once(TOOL_CLOSE).map_or(segment, |(body, _)| body))
        .collect()
}

/// 解析单个片段；返回该片段的全部问题（编号从 1 开始）
pub(crate) fn parse_segment(index: usize, segment: &str) -> Result<ToolCallRequest, Vec<String>> {
    let n = index + 1;
    let value: Value = serde_json::from_str(segment.trim())
        .map_err(|e| vec![format!("tool call {n} is not valid JSON ({e})")])?;
    let Value::Object(mut obj) = value else {
        return Err(vec![format!("tool call {n} is not a JSON object")]);
    };

    let mut errors = Vec::new();
    let mut required = |key: &str| match obj.remove(key) {
        Some(Value::String(s)) => Some(s),
        Some(_) => {
            errors.push(format!("tool call {n} field `{key}` must be a string"));
            None
        }
        None => {
            errors.push(format!("tool call {n} missing required field `{key}`"));
            None
        }
    };
    let name = required("name");
    let label = required("label");
    let parameters = match obj.remove("parameters") {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(map)) => map,
        Some(_) => {
            errors.push(format!("tool call {n} field `parameters` must be an object"));
            Map::new()
        }
    };

    match (name, label) {
        (Some(name), Some(label)) if errors.is_empty() => Ok(ToolCallRequest {
            name,
            label,
            parameters,
        }),
        _ => Err(errors),
    }
}

/// 提取消息中的全部工具调用；任何片段不合法时返回包含全部问题的校验错误
pub fn extract_tool_calls(message: &str) -> Result<Vec<ToolCallRequest>, VerificationError> {
    verify_tool_calls(message)
}

/// 格式化单个工具调用（含标记）
pub fn format_tool_call(call: &ToolCallRequest) -> String {
    let body = serde_json::json!({
        "name": call.name,
        "label": call.label,
        "parameters": call.parameters,
    });
    format!("{TOOL_OPEN}{body}{TOOL_CLOSE}")
}

/// 可见文本 + 若干工具调用
pub fn format_tool_message(visible: &str, calls: &[ToolCallRequest]) -> String {
    let mut out = visible.to_string();
    for call in calls {
        out.push_str(&format_tool_call(call));
    }
    out
}
