//! 运行协调器：处理 "agent_run" 任务
//!
//! 一次处理：检查运行状态 → 从持久化记录恢复 AgentState → 循环 tick，直到挂起（Pause）或结束（Finish）。
//! 每个新步骤先持久化再进入下一 tick；同一 run id 同时只有一个处理在进行（按运行加锁）。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::core::error::{AgentError, ErrorKind, RunError};
use crate::core::recovery::RecoveryEngine;
use crate::core::state::{AgentState, AgentStep, Finish, FinishOutcome, ToolResult, Thought};
use crate::core::task_scheduler::{Task, TaskHandler};
use crate::llm::FunctionTool;
use crate::react::{resolve_next_step, AgentExecutor, StopPredicate, StopReason};
use crate::store::{
    Page, Run, RunStatus, RunStepRecord, RunStepStatus, RunStore, SortOrder, StepRecordKind,
    ToolCallRecord,
};
use crate::tools::ToolRegistry;

/// 推进运行的任务类别，payload 为 run id
pub const AGENT_RUN_TASK: &str = "agent_run";

/// 每个 tick 前读取存储中的运行状态
pub struct RunStatusStopPredicate {
    store: Arc<dyn RunStore>,
    run_id: String,
}

impl RunStatusStopPredicate {
    pub fn new(store: Arc<dyn RunStore>, run_id: impl Into<String>) -> Self {
        Self {
            store,
            run_id: run_id.into(),
        }
    }
}

#[async_trait]
impl StopPredicate for RunStatusStopPredicate {
    async fn should_stop(&self, _state: &AgentState) -> Option<StopReason> {
        match self.store.get_run_status(&self.run_id).await {
            Ok(RunStatus::Cancelling | RunStatus::Cancelled) => Some(StopReason::Cancelled),
            Ok(RunStatus::Expired) => Some(StopReason::Expired),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(run_id = %self.run_id, "failed to read run status: {}", e);
                None
            }
        }
    }
}

pub struct RunCoordinator {
    store: Arc<dyn RunStore>,
    executor: Arc<dyn AgentExecutor>,
    registry: Arc<ToolRegistry>,
    recovery: RecoveryEngine,
    max_steps: usize,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl RunCoordinator {
    pub fn new(
        store: Arc<dyn RunStore>,
        executor: Arc<dyn AgentExecutor>,
        registry: Arc<ToolRegistry>,
        max_steps: usize,
    ) -> Self {
        Self {
            store,
            executor,
            registry,
            recovery: RecoveryEngine::new(),
            max_steps: max_steps.max(1),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// 处理一次推进请求
    pub async fn advance(&self, run_id: &str) -> anyhow::Result<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            Arc::clone(locks.entry(run_id.to_string()).or_default())
        };

        let result = {
            let _guard = lock.lock().await;
            self.advance_locked(run_id).await
        };

        let mut locks = self.locks.lock().await;
        // 只剩 map 与当前持有者时可回收
        if Arc::strong_count(&lock) == 2 {
            locks.remove(run_id);
        }
        result
    }

    async fn advance_locked(&self, run_id: &str) -> anyhow::Result<()> {
        let run = self.store.get_run(run_id).await?;
        match run.status {
            RunStatus::Queued => self.run_ticks(run).await,
            RunStatus::Cancelling => self.finalize(&run.id, RunStatus::Cancelled, None).await,
            RunStatus::Expired if run.finished_at.is_none() => {
                self.finalize(&run.id, RunStatus::Expired, None).await
            }
            status => {
                tracing::warn!(run_id, ?status, "run is not queued, skipping");
                Ok(())
            }
        }
    }

    /// 引擎工具 + 运行声明的外部工具（同名以引擎工具为准）
    fn function_tools(&self, run: &Run) -> Vec<FunctionTool> {
        let mut tools = self.registry.schemas();
        for tool in &run.tools {
            if !self.registry.contains(&tool.name) {
                tools.push(tool.clone());
            }
        }
        tools
    }

    async fn recover(&self, run: &Run) -> anyhow::Result<Option<AgentState>> {
        let records = self
            .store
            .list_steps(&run.id, SortOrder::Asc, Page::all())
            .await?;
        let mut messages = HashMap::new();
        for record in &records {
            if let StepRecordKind::MessageCreation { message_id } = &record.kind {
                let text = self.store.get_message(message_id).await?;
                messages.insert(message_id.clone(), text);
            }
        }

        match self
            .recovery
            .recover(run, self.function_tools(run), &records, &messages)
        {
            Ok(state) => Ok(Some(state)),
            Err(e) => {
                tracing::error!(run_id = %run.id, records = records.len(), "recovery failed: {}", e);
                self.store
                    .finish_run(
                        &run.id,
                        RunStatus::Failed,
                        Some(RunError::new(ErrorKind::Server, e.to_string())),
                    )
                    .await?;
                Ok(None)
            }
        }
    }

    async fn run_ticks(&self, run: Run) -> anyhow::Result<()> {
        let Some(mut state) = self.recover(&run).await? else {
            return Ok(());
        };
        self.store
            .transition_run(&run.id, &[RunStatus::Queued], RunStatus::InProgress)
            .await?;
        tracing::info!(
            run_id = %run.id,
            strategy = self.executor.name(),
            recovered_steps = state.steps().len(),
            "run in progress"
        );

        let stop = RunStatusStopPredicate::new(Arc::clone(&self.store), run.id.clone());
        let mut ticks = 0usize;
        loop {
            let step = if ticks >= self.max_steps {
                let err = AgentError::StepLimitExceeded(self.max_steps);
                tracing::warn!(run_id = %run.id, "{}", err);
                Some(self.fail(&mut state, &err)?)
            } else {
                match resolve_next_step(self.executor.as_ref(), &mut state, &stop).await {
                    Ok(step) => step,
                    Err(e) => {
                        tracing::warn!(run_id = %run.id, kind = ?e.kind(), "tick failed: {}", e);
                        Some(self.fail(&mut state, &e)?)
                    }
                }
            };
            ticks += 1;

            let Some(step) = step else {
                // 提交了部分结果：仍在等待其余输出
                if matches!(state.last_step(), Some(AgentStep::Thought(Thought::Pause(_)))) {
                    self.store
                        .transition_run(&run.id, &[RunStatus::InProgress], RunStatus::RequiresAction)
                        .await?;
                    tracing::info!(run_id = %run.id, "run still requires action");
                }
                break;
            };
            if !self.persist(&run.id, &step).await? {
                break;
            }
        }
        Ok(())
    }

    fn fail(&self, state: &mut AgentState, err: &AgentError) -> anyhow::Result<AgentStep> {
        let payload = state.last_step().and_then(AgentStep::payload).cloned();
        let step = AgentStep::finish(Finish::failed(RunError::from(err)).with_payload(payload));
        state.push_step(step.clone())?;
        Ok(step)
    }

    /// 持久化新步骤；返回是否继续 tick
    async fn persist(&self, run_id: &str, step: &AgentStep) -> anyhow::Result<bool> {
        match step {
            AgentStep::Thought(Thought::Continuation(c)) => {
                if !c.content.trim().is_empty() {
                    let message_id = self.store.create_message(run_id, c.content.clone()).await?;
                    self.store
                        .append_step(RunStepRecord::new(
                            run_id,
                            StepRecordKind::MessageCreation { message_id },
                            RunStepStatus::Completed,
                        ))
                        .await?;
                }
                let tool_calls = c
                    .tool_calls
                    .iter()
                    .map(|call| ToolCallRecord {
                        id: call.id.clone(),
                        name: call.name.clone(),
                        arguments: call.arguments.clone(),
                        output: None,
                    })
                    .collect();
                let record = self
                    .store
                    .append_step(
                        RunStepRecord::new(
                            run_id,
                            StepRecordKind::ToolCalls { tool_calls },
                            RunStepStatus::InProgress,
                        )
                        .with_payload(c.payload.clone()),
                    )
                    .await?;
                tracing::debug!(run_id, seq = record.seq, calls = c.tool_calls.len(), "tool calls recorded");
                Ok(true)
            }
            AgentStep::Thought(Thought::Pause(p)) => {
                let mut record = self.last_tool_calls(run_id).await?;
                fill_outputs(&mut record, &p.completed);
                self.store.update_step(record).await?;
                let moved = self
                    .store
                    .transition_run(run_id, &[RunStatus::InProgress], RunStatus::RequiresAction)
                    .await?;
                tracing::info!(run_id, moved, pending = p.tool_calls.len().saturating_sub(p.completed.len()), "run requires action");
                Ok(false)
            }
            AgentStep::Observation(o) => {
                let mut record = self.last_tool_calls(run_id).await?;
                fill_outputs(&mut record, &o.results);
                record.mark(RunStepStatus::Completed, None);
                record.payload = o.payload.clone();
                self.store.update_step(record).await?;
                Ok(true)
            }
            AgentStep::Thought(Thought::Finish(f)) => {
                self.persist_finish(run_id, f).await?;
                Ok(false)
            }
        }
    }

    async fn persist_finish(&self, run_id: &str, finish: &Finish) -> anyhow::Result<()> {
        match &finish.outcome {
            FinishOutcome::Response(text) => {
                let message_id = self.store.create_message(run_id, text.clone()).await?;
                self.store
                    .append_step(
                        RunStepRecord::new(
                            run_id,
                            StepRecordKind::MessageCreation { message_id },
                            RunStepStatus::Completed,
                        )
                        .with_payload(finish.payload.clone()),
                    )
                    .await?;
                self.finish_run(run_id, RunStatus::Completed, None).await
            }
            FinishOutcome::Failed => {
                let error = finish
                    .error
                    .clone()
                    .unwrap_or_else(|| RunError::new(ErrorKind::Unknown, "unknown failure"));
                self.finalize(run_id, RunStatus::Failed, Some(error)).await
            }
            FinishOutcome::Cancelled => self.finalize(run_id, RunStatus::Cancelled, None).await,
            FinishOutcome::Expired => self.finalize(run_id, RunStatus::Expired, None).await,
        }
    }

    /// 未完成的工具调用记录标记为对应状态；最后一条已完成时追加不含调用的终止记录，再结束运行
    async fn finalize(&self, run_id: &str, status: RunStatus, error: Option<RunError>) -> anyhow::Result<()> {
        if self.store.get_run(run_id).await?.finished_at.is_some() {
            tracing::warn!(run_id, requested = ?status, "run already finished");
            return Ok(());
        }
        let step_status = match status {
            RunStatus::Cancelled => RunStepStatus::Cancelled,
            RunStatus::Expired => RunStepStatus::Expired,
            _ => RunStepStatus::Failed,
        };
        match self.store.last_step(run_id).await? {
            Some(mut record)
                if record.tool_calls().is_some() && record.status == RunStepStatus::InProgress =>
            {
                record.mark(step_status, error.clone());
                self.store.update_step(record).await?;
            }
            Some(last) => {
                let mut marker = RunStepRecord::new(
                    run_id,
                    StepRecordKind::ToolCalls { tool_calls: Vec::new() },
                    step_status,
                )
                .with_payload(last.payload);
                marker.last_error = error.clone();
                let marker = self.store.append_step(marker).await?;
                tracing::debug!(run_id, seq = marker.seq, ?step_status, "terminal marker appended");
            }
            None => {}
        }
        self.finish_run(run_id, status, error).await
    }

    async fn finish_run(&self, run_id: &str, status: RunStatus, error: Option<RunError>) -> anyhow::Result<()> {
        let run = self.store.get_run(run_id).await?;
        if run.finished_at.is_some() {
            tracing::warn!(run_id, current = ?run.status, requested = ?status, "run already finished");
            return Ok(());
        }
        self.store.finish_run(run_id, status, error.clone()).await?;
        match error {
            Some(e) => tracing::info!(run_id, ?status, kind = ?e.kind, error = %e.message, "run finished"),
            None => tracing::info!(run_id, ?status, "run finished"),
        }
        Ok(())
    }

    async fn last_tool_calls(&self, run_id: &str) -> anyhow::Result<RunStepRecord> {
        match self.store.last_step(run_id).await? {
            Some(record) if record.tool_calls().is_some() => Ok(record),
            _ => Err(AgentError::IllegalState(format!("run {} has no tool calls record to update", run_id)).into()),
        }
    }
}

fn fill_outputs(record: &mut RunStepRecord, results: &[ToolResult]) {
    if let Some(calls) = record.tool_calls_mut() {
        for result in results {
            if let Some(call) = calls.iter_mut().find(|c| c.id == result.tool_call_id) {
                call.output = Some(result.content.clone());
            }
        }
    }
}

#[async_trait]
impl TaskHandler for RunCoordinator {
    fn accept(&self, task: &Task) -> bool {
        task.category == AGENT_RUN_TASK
    }

    async fn handle(&self, task: Task) -> anyhow::Result<()> {
        self.advance(&task.payload).await
    }
}
