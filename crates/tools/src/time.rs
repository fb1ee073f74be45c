//! `current_time(timezone_offset_hours?)`: the current wall-clock time.

use agentrelay_core::error::ToolError;
use agentrelay_core::tool::{InvocationContext, Tool, ToolArgs, ToolResult};
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use serde_json::{Value, json};

pub struct CurrentTimeTool;

#[async_trait]
impl Tool for CurrentTimeTool {
    fn name(&self) -> &str {
        "current_time"
    }

    fn description(&self) -> &str {
        "Get the current date and time. Without an offset the time is in UTC."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "timezone_offset_hours": {
                    "type": "number",
                    "description": "Offset from UTC in hours, e.g. 8 or -5.5"
                }
            }
        })
    }

    async fn execute(&self, args: ToolArgs, _ctx: &InvocationContext) -> Result<ToolResult, ToolError> {
        let offset = match args.get("timezone_offset_hours") {
            None | Some(Value::Null) => 0.0,
            Some(v) => v
                .as_f64()
                .or_else(|| v.as_str().and_then(|s| s.trim().parse().ok()))
                .ok_or_else(|| {
                    ToolError::InvalidArguments(format!(
                        "'timezone_offset_hours' must be a number, got {v}"
                    ))
                })?,
        };

        let now = local_time(Utc::now(), offset)?;
        Ok(ToolResult::ok(now.format("%Y-%m-%d %H:%M:%S %:z (%A)").to_string())
            .with_data(json!({ "iso8601": now.to_rfc3339() })))
    }
}

fn local_time(utc: DateTime<Utc>, offset_hours: f64) -> Result<DateTime<FixedOffset>, ToolError> {
    let seconds = (offset_hours * 3600.0).round();
    let offset = (seconds.abs() <= 14.0 * 3600.0)
        .then(|| FixedOffset::east_opt(seconds as i32))
        .flatten()
        .ok_or_else(|| {
            ToolError::InvalidArguments(format!(
                "timezone offset {offset_hours} is outside -14..=14 hours"
            ))
        })?;
    Ok(utc.with_timezone(&offset))
}
