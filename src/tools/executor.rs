//! 工具执行器
//!
//! 按调用顺序依次执行一批工具调用；单个工具失败（返回 Err 或 panic）被转换为以 `TOOL FAILED!` 开头的结果文本，
//! 不影响同批次后续工具。每次调用输出结构化审计日志（JSON）。

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Instant;

use crate::tools::ToolAndParams;

pub const TOOL_FAILED_PREFIX: &str = "TOOL FAILED!";

/// 单个工具调用的执行结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutcome {
    pub ok: bool,
    /// 成功时为工具返回值，失败时为 `TOOL FAILED!\n<错误>`
    pub result: String,
}

/// 工具执行器：顺序执行并隔离失败
#[derive(Debug, Clone, Default)]
pub struct ToolExecutor {
    session: String,
}

impl ToolExecutor {
    pub fn new(session: impl Into<String>) -> Self {
        Self {
            session: session.into(),
        }
    }

    /// 执行一个工具调用；不会返回错误
    pub fn execute(&self, call: &ToolAndParams) -> ToolOutcome {
        let start = Instant::now();
        let result = catch_unwind(AssertUnwindSafe(|| call.invoke()));

        let (outcome, failure) = match result {
            Ok(Ok(content)) => (ToolOutcome { ok: true, result: content }, None),
            Ok(Err(e)) => {
                let msg = e.to_string();
                (failed(&msg), Some(msg))
            }
            Err(panic) => {
                let msg = panic_message(panic.as_ref());
                (failed(&msg), Some(msg))
            }
        };

        let audit = serde_json::json!({
            "event": "tool_audit",
            "session": self.session,
            "tool": call.tool_name(),
            "label": call.label,
            "ok": outcome.ok,
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": args_preview(&call.params),
        });
        tracing::info!(audit = %audit, "tool");
        if let Some(msg) = failure {
            tracing::warn!(session = %self.session, tool = %call.tool_name(), error = %msg, "Caught tool failure, providing error to agent");
        }
        outcome
    }

    /// 按输入顺序执行整批调用，结果顺序与输入一致
    pub fn execute_batch(&self, calls: &[ToolAndParams]) -> Vec<ToolOutcome> {
        calls.iter().map(|call| self.execute(call)).collect()
    }
}

fn failed(msg: &str) -> ToolOutcome {
    ToolOutcome {
        ok: false,
        result: format!("{TOOL_FAILED_PREFIX}\n{msg}"),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "tool panicked".to_string()
    }
}

fn args_preview(args: &serde_json::Map<String, serde_json::Value>) -> String {
    let s = serde_json::Value::Object(args.clone()).to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}
