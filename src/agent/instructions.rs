//! 提示词与系统消息模板
//!
//! - 工具使用说明（附可用工具列表）与确认前导：每次生成时临时拼在历史前面，不写入历史；
//! - 临时上下文块：当前时间、用户偏好与调用方注入的键值，只附加在本次发送的最后一条消息上；
//! - 工具结果汇总、拒绝说明、手动调用说明等写入历史的系统消息。

use std::sync::Arc;

use chrono::{DateTime, FixedOffset, Local, Utc};
use serde_json::{Map, Value};

use crate::prompt::ChatMessage;
use crate::tools::{tool_description, AgentTool, ToolAndParams};

pub const TOOL_USAGE_PROMPT: &str = r#"In this environment, you have access to tools to achieve your goal.

Use a tool by embedding the appropriate tag and JSON:

<tool>
{
  "name": "$TOOL_NAME",
  "label": "Brief description (e.g., 'Getting upcoming events', 'Hiding date columns')",
  "parameters": {
    "$PARAMETER_NAME": "$PARAMETER_VALUE"
  }
}
</tool>

- **Must** include the wrapper tag around the JSON.
- **May** include a short message before tool usage but **may not** add content after.
- You can call multiple tools in parallel by including multiple `<tool>` blocks.
- You can use additional tools after receiving results (e.g., look up an ID before another operation).
- Use your first response to plan how you will accomplish the task (including any branching logic and multiple steps), then proceed.

Available tools:

<available_tools>
TOOLS_BLOCK_HERE
</available_tools>

<important>Do not forget to add the "label" when using a tool!</important>"#;

const TOOLS_PLACEHOLDER: &str = "TOOLS_BLOCK_HERE";
const NO_TOOLS: &str = "No tools currently available.";

pub const ACKNOWLEDGE_REQUEST: &str =
    "For now, simply acknowledge receipt of these instructions and indicate you are ready to receive user messages.";
pub const ACKNOWLEDGE_RESPONSE: &str = "Instructions received, I am ready for user messages.";

pub const LOCAL_TIME_FORMAT: &str = "%A, %b %d %Y %I:%M %p";

/// 工具使用说明 + 分隔线 + 调用方提示词；可选前言放在最前
pub fn build_tool_usage_prompt(prompt: &str, tools: &[Arc<AgentTool>], preamble: Option<&str>) -> String {
    let tools_block = if tools.is_empty() {
        NO_TOOLS.to_string()
    } else {
        let descriptions: Vec<Value> = tools.iter().map(|t| tool_description(t)).collect();
        serde_json::to_string_pretty(&descriptions).unwrap_or_else(|_| NO_TOOLS.to_string())
    };
    let usage = TOOL_USAGE_PROMPT.replace(TOOLS_PLACEHOLDER, &tools_block);
    let output = format!("{usage}\n\n---\n\n{prompt}");
    match preamble {
        Some(p) if !p.is_empty() => format!("{p}\n\n{output}"),
        _ => output,
    }
}

/// 固定两条前导消息：说明（user）+ 确认（assistant）
pub fn instruction_preamble(description: &str, tools: &[Arc<AgentTool>]) -> [ChatMessage; 2] {
    let prompt = build_tool_usage_prompt(description, tools, None);
    [
        ChatMessage::user(format!("{prompt}\n\n---\n\n{ACKNOWLEDGE_REQUEST}")),
        ChatMessage::assistant(ACKNOWLEDGE_RESPONSE),
    ]
}

/// 当前时间；给定偏移时按固定偏移，否则按系统本地时区
pub fn local_now(utc_offset_minutes: Option<i32>) -> DateTime<FixedOffset> {
    let now = Utc::now();
    utc_offset_minutes
        .and_then(|m| m.checked_mul(60))
        .and_then(FixedOffset::east_opt)
        .map(|offset| now.with_timezone(&offset))
        .unwrap_or_else(|| now.with_timezone(&Local).fixed_offset())
}

/// 临时上下文块：调用方上下文与本轮注入数据合并，后者同名键优先
pub fn ephemeral_context_block(
    llm_context: &Map<String, Value>,
    now: &DateTime<FixedOffset>,
    user_preferences: &[String],
) -> String {
    let mut context = llm_context.clone();
    context.insert(
        "current_local_time".into(),
        Value::String(now.format(LOCAL_TIME_FORMAT).to_string()),
    );
    context.insert(
        "user_preference_notes".into(),
        Value::Array(user_preferences.iter().cloned().map(Value::String).collect()),
    );
    let json = serde_json::to_string_pretty(&Value::Object(context)).unwrap_or_default();
    format!(
        "\n\n<system_context>This section provides data injected automatically by the system at runtime.\n{json}\n</system_context>"
    )
}

/// 工具批次结果汇总（system 消息）
pub fn tool_results_message<'a>(results: impl IntoIterator<Item = (&'a ToolAndParams, &'a str)>) -> String {
    let mut msg = String::from("Tool use complete\n");
    for (call, result) in results {
        msg.push_str(&format!(
            "<tool_used>{}</tool_used>\n<tool_label>{}</tool_label>\n<tool_result>\n{}\n</tool_result>\n",
            call.tool_name(),
            call.label,
            result
        ));
    }
    msg.push_str(
        "You may now use more tools or respond to the user. \
         Do not send the tool_result directly; provide relevant information.",
    );
    msg
}

/// 拒绝工具调用的说明（system 消息）；空原因替换为默认文本
pub fn rejection_message(why: &str) -> String {
    let why = match why.trim() {
        "" => "No reason provided...",
        reason => reason,
    };
    format!("The user rejected your tool calls and supplied the following reason:\n\n{why}")
}

/// 手动触发工具时写入的系统说明
pub fn manual_invoke_note(tool_name: &str, params: &Map<String, Value>, force_pass: bool) -> String {
    let mut note = format!("User triggered tool: {tool_name} / {}", Value::Object(params.clone()));
    if force_pass {
        note.push_str("; respond PASS and use data later");
    }
    format!("<system>{note}</system>")
}

pub fn manual_invoke_label(tool_name: &str) -> String {
    format!("Manually called: {tool_name}")
}
