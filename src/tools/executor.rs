//! 工具执行器
//!
//! 持有 ToolRegistry 与单次调用超时，execute(call) 解析 JSON 参数后在超时内调用 registry.execute，
//! 超时或失败时转为 AgentError（ToolTimeout / ToolExecutionFailed）；每次调用输出结构化审计日志（JSON）。

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::time::timeout;

use crate::core::state::ToolResult;
use crate::core::AgentError;
use crate::llm::ToolCall;
use crate::tools::ToolRegistry;

/// 工具执行器：对每次调用施加超时，并将结果映射为 AgentError
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    timeout: Duration,
}

impl ToolExecutor {
    pub fn new(registry: Arc<ToolRegistry>, timeout_secs: u64) -> Self {
        Self {
            registry,
            timeout: Duration::from_secs(timeout_secs.max(1)),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.registry.contains(name)
    }

    /// 执行一次调用；参数非 JSON 返回 InvalidToolArguments，超时返回 ToolTimeout，工具返回 Err 则为 ToolExecutionFailed
    pub async fn execute(&self, call: &ToolCall) -> Result<ToolResult, AgentError> {
        let args = parse_arguments(call)?;
        let start = Instant::now();
        let preview = args_preview(&args);
        let result = timeout(self.timeout, self.registry.execute(&call.name, args)).await;

        let (ok, outcome): (bool, &str) = match &result {
            Ok(Ok(_)) => (true, "ok"),
            Ok(Err(_)) => (false, "error"),
            Err(_) => (false, "timeout"),
        };
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": call.name,
            "call_id": call.id,
            "ok": ok,
            "outcome": outcome,
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": preview,
        });
        tracing::info!(audit = %audit.to_string(), "tool");

        match result {
            Ok(Ok(content)) => Ok(ToolResult::new(call.id.clone(), content)),
            Ok(Err(e)) => Err(AgentError::ToolExecutionFailed(format!("{}: {e}", call.name))),
            Err(_) => Err(AgentError::ToolTimeout(call.name.clone())),
        }
    }
}

/// 空参数视为 `{}`
fn parse_arguments(call: &ToolCall) -> Result<Value, AgentError> {
    let raw = call.arguments.trim();
    if raw.is_empty() {
        return Ok(Value::Object(Default::default()));
    }
    serde_json::from_str(raw).map_err(|e| AgentError::InvalidToolArguments {
        tool: call.name.clone(),
        reason: e.to_string(),
    })
}

fn args_preview(args: &Value) -> String {
    let s = args.to_string();
    if s.len() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}
