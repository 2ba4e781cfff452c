//! 工具 Worker：一批工具调用的有界并发执行
//!
//! invoke 只执行 toolkit 中存在的工具，其余调用（由外部提交结果）不执行也不报错；
//! 每个调用 spawn 为独立任务并受 Semaphore 限流，任何一个失败即返回该错误，已在执行的调用继续跑完。

use std::sync::Arc;

use futures_util::future::try_join_all;
use tokio::sync::Semaphore;

use crate::core::state::{Continuation, Observation, ToolResult};
use crate::core::AgentError;
use crate::tools::ToolExecutor;

pub struct ToolWorker {
    executor: Arc<ToolExecutor>,
    semaphore: Arc<Semaphore>,
}

impl ToolWorker {
    pub fn new(executor: Arc<ToolExecutor>, max_concurrency: usize) -> Self {
        Self {
            executor,
            semaphore: Arc::new(Semaphore::new(max_concurrency.max(1))),
        }
    }

    /// 该工具是否由本 Worker 执行
    pub fn handles(&self, name: &str) -> bool {
        self.executor.contains(name)
    }

    /// 执行批次中可本地解析的调用；结果按调用顺序排列，payload 原样带回
    pub async fn invoke(&self, continuation: &Continuation) -> Result<Observation, AgentError> {
        let dispatched: Vec<_> = continuation
            .tool_calls
            .iter()
            .filter(|call| self.handles(&call.name))
            .cloned()
            .collect();
        tracing::debug!(
            requested = continuation.tool_calls.len(),
            dispatched = dispatched.len(),
            "tool batch"
        );

        let handles = dispatched.into_iter().map(|call| {
            let executor = Arc::clone(&self.executor);
            let semaphore = Arc::clone(&self.semaphore);
            tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|_| AgentError::IllegalState("tool pool closed".to_string()))?;
                executor.execute(&call).await
            })
        });

        let results: Vec<ToolResult> = try_join_all(handles.map(|handle| async move {
            match handle.await {
                Ok(result) => result,
                Err(e) => Err(AgentError::ToolExecutionFailed(format!("tool task aborted: {e}"))),
            }
        }))
        .await?;

        Ok(Observation {
            results,
            payload: continuation.payload.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::Value;

    use crate::llm::ToolCall;
    use crate::tools::{EchoTool, Tool, ToolRegistry};

    struct CountingTool {
        active: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Tool for CountingTool {
        fn name(&self) -> &str {
            "count"
        }

        fn description(&self) -> &str {
            "tracks concurrency"
        }

        async fn execute(&self, _args: Value) -> Result<String, String> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok("done".into())
        }
    }

    struct FailingTool;

    #[async_trait]
    impl Tool for FailingTool {
        fn name(&self) -> &str {
            "fail"
        }

        fn description(&self) -> &str {
            "always fails"
        }

        async fn execute(&self, _args: Value) -> Result<String, String> {
            Err("boom".into())
        }
    }

    fn worker(registry: ToolRegistry, max: usize) -> ToolWorker {
        ToolWorker::new(Arc::new(ToolExecutor::new(Arc::new(registry), 5)), max)
    }

    fn batch(calls: Vec<ToolCall>) -> Continuation {
        Continuation {
            tool_calls: calls,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_invoke_skips_external_tools_and_keeps_order() {
        let worker = worker(ToolRegistry::new().with_tool(EchoTool), 2);
        let obs = worker
            .invoke(&batch(vec![
                ToolCall::new("a", "echo", r#"{"text":"1"}"#),
                ToolCall::new("b", "approve", "{}"),
                ToolCall::new("c", "echo", r#"{"text":"3"}"#),
            ]))
            .await
            .unwrap();
        let ids: Vec<_> = obs.results.iter().map(|r| r.tool_call_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
        assert_eq!(obs.results[1].content, "3");
    }

    #[tokio::test]
    async fn test_invoke_respects_concurrency_bound() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let registry = ToolRegistry::new().with_tool(CountingTool {
            active: active.clone(),
            peak: peak.clone(),
        });
        let worker = worker(registry, 2);
        let calls = (0..6)
            .map(|i| ToolCall::new(format!("c{i}"), "count", "{}"))
            .collect();
        let obs = worker.invoke(&batch(calls)).await.unwrap();
        assert_eq!(obs.results.len(), 6);
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert!(peak.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn test_invoke_surfaces_failure() {
        let worker = worker(ToolRegistry::new().with_tool(EchoTool).with_tool(FailingTool), 4);
        let err = worker
            .invoke(&batch(vec![
                ToolCall::new("a", "echo", r#"{"text":"1"}"#),
                ToolCall::new("b", "fail", "{}"),
            ]))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::ToolExecutionFailed(msg) if msg.contains("boom")));
    }

    #[tokio::test]
    async fn test_empty_batch_gives_empty_observation() {
        let worker = worker(ToolRegistry::new(), 1);
        let obs = worker.invoke(&Continuation::default()).await.unwrap();
        assert!(obs.results.is_empty());
    }
}
