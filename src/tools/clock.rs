//! Clock 工具：返回当前时间

use chrono::{FixedOffset, Local, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::tools::AgentTool;

/// Get the current date and time.
#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct ClockParams {
    /// Offset from UTC in minutes; omit for the local timezone
    #[serde(default)]
    pub utc_offset_minutes: Option<i32>,
}

#[derive(Debug, Serialize)]
pub struct ClockReading {
    pub iso8601: String,
    pub weekday: String,
    pub unix_seconds: i64,
}

/// Clock 工具（safe）
pub fn clock_tool() -> AgentTool {
    AgentTool::new("clock", read_clock).safe()
}

fn read_clock(params: ClockParams) -> Result<ClockReading, String> {
    let now = Utc::now();
    let local = match params.utc_offset_minutes {
        Some(minutes) => {
            let offset = minutes
                .checked_mul(60)
                .and_then(FixedOffset::east_opt)
                .ok_or_else(|| format!("utc offset out of range: {minutes} minutes"))?;
            now.with_timezone(&offset)
        }
        None => now.with_timezone(&Local).fixed_offset(),
    };
    Ok(ClockReading {
        iso8601: local.to_rfc3339(),
        weekday: local.format("%A").to_string(),
        unix_seconds: now.timestamp(),
    })
}
