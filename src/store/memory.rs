//! 内存实现的 RunStore（tokio RwLock）

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use super::{Page, Run, RunStatus, RunStepRecord, RunStepStatus, RunStore, SortOrder, StoreError};
use crate::core::error::RunError;
use crate::core::state::ToolResult;

#[derive(Default)]
struct Inner {
    runs: HashMap<String, Run>,
    steps: HashMap<String, Vec<RunStepRecord>>,
    messages: HashMap<String, String>,
}

/// 单进程内的运行存储
#[derive(Default)]
pub struct MemoryRunStore {
    inner: RwLock<Inner>,
}

impl MemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RunStore for MemoryRunStore {
    async fn create_run(&self, run: Run) -> Result<Run, StoreError> {
        let mut inner = self.inner.write().await;
        if inner.runs.contains_key(&run.id) {
            return Err(StoreError::Duplicate(run.id));
        }
        inner.steps.insert(run.id.clone(), Vec::new());
        inner.runs.insert(run.id.clone(), run.clone());
        Ok(run)
    }

    async fn get_run(&self, run_id: &str) -> Result<Run, StoreError> {
        self.inner
            .read()
            .await
            .runs
            .get(run_id)
            .cloned()
            .ok_or_else(|| StoreError::RunNotFound(run_id.to_string()))
    }

    async fn set_run_status(&self, run_id: &str, status: RunStatus) -> Result<Run, StoreError> {
        let mut inner = self.inner.write().await;
        let run = inner
            .runs
            .get_mut(run_id)
            .ok_or_else(|| StoreError::RunNotFound(run_id.to_string()))?;
        run.status = status;
        Ok(run.clone())
    }

    async fn transition_run(
        &self,
        run_id: &str,
        from: &[RunStatus],
        to: RunStatus,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().await;
        let run = inner
            .runs
            .get_mut(run_id)
            .ok_or_else(|| StoreError::RunNotFound(run_id.to_string()))?;
        if !from.contains(&run.status) {
            return Ok(false);
        }
        run.status = to;
        Ok(true)
    }

    async fn finish_run(
        &self,
        run_id: &str,
        status: RunStatus,
        error: Option<RunError>,
    ) -> Result<Run, StoreError> {
        let mut inner = self.inner.write().await;
        let run = inner
            .runs
            .get_mut(run_id)
            .ok_or_else(|| StoreError::RunNotFound(run_id.to_string()))?;
        run.status = status;
        run.last_error = error;
        run.finished_at = Some(Utc::now());
        Ok(run.clone())
    }

    async fn submit_tool_outputs(&self, run_id: &str, outputs: &[ToolResult]) -> Result<Run, StoreError> {
        let mut inner = self.inner.write().await;
        let Inner { runs, steps, .. } = &mut *inner;
        let run = runs
            .get_mut(run_id)
            .ok_or_else(|| StoreError::RunNotFound(run_id.to_string()))?;
        if run.status != RunStatus::RequiresAction {
            return Err(StoreError::Conflict(format!(
                "run {} is {:?}, tool outputs are only accepted while it requires action",
                run_id, run.status
            )));
        }
        let calls = steps
            .get_mut(run_id)
            .and_then(|records| records.last_mut())
            .filter(|record| record.status == RunStepStatus::InProgress)
            .and_then(RunStepRecord::tool_calls_mut)
            .ok_or_else(|| StoreError::Conflict(format!("run {} has no pending tool calls", run_id)))?;

        for (i, output) in outputs.iter().enumerate() {
            let repeated = outputs[..i].iter().any(|o| o.tool_call_id == output.tool_call_id);
            match calls.iter().find(|c| c.id == output.tool_call_id) {
                None => {
                    return Err(StoreError::Conflict(format!(
                        "unknown tool call id: {}",
                        output.tool_call_id
                    )))
                }
                Some(call) if call.output.is_some() || repeated => {
                    return Err(StoreError::Conflict(format!(
                        "tool call {} already has an output",
                        output.tool_call_id
                    )))
                }
                Some(_) => {}
            }
        }
        for output in outputs {
            if let Some(call) = calls.iter_mut().find(|c| c.id == output.tool_call_id) {
                call.output = Some(output.content.clone());
            }
        }
        run.status = RunStatus::Queued;
        Ok(run.clone())
    }

    async fn append_step(&self, mut record: RunStepRecord) -> Result<RunStepRecord, StoreError> {
        let mut inner = self.inner.write().await;
        let steps = inner
            .steps
            .get_mut(&record.run_id)
            .ok_or_else(|| StoreError::RunNotFound(record.run_id.clone()))?;
        if steps.iter().any(|s| s.id == record.id) {
            return Err(StoreError::Duplicate(record.id));
        }
        record.seq = steps.last().map(|s| s.seq + 1).unwrap_or(1);
        steps.push(record.clone());
        Ok(record)
    }

    async fn update_step(&self, record: RunStepRecord) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let existing = inner
            .steps
            .get_mut(&record.run_id)
            .and_then(|steps| steps.iter_mut().find(|s| s.id == record.id))
            .ok_or_else(|| StoreError::StepNotFound(record.id.clone()))?;
        let seq = existing.seq;
        *existing = RunStepRecord { seq, ..record };
        Ok(())
    }

    async fn list_steps(
        &self,
        run_id: &str,
        order: SortOrder,
        page: Page,
    ) -> Result<Vec<RunStepRecord>, StoreError> {
        let inner = self.inner.read().await;
        let steps = inner
            .steps
            .get(run_id)
            .ok_or_else(|| StoreError::RunNotFound(run_id.to_string()))?;

        let mut ordered: Vec<&RunStepRecord> = steps.iter().collect();
        if order == SortOrder::Desc {
            ordered.reverse();
        }
        let start = match &page.after {
            Some(after) => ordered
                .iter()
                .position(|s| &s.id == after)
                .map(|i| i + 1)
                .ok_or_else(|| StoreError::StepNotFound(after.clone()))?,
            None => 0,
        };
        let limit = page.limit.unwrap_or(usize::MAX);
        Ok(ordered
            .into_iter()
            .skip(start)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn create_message(&self, run_id: &str, content: String) -> Result<String, StoreError> {
        let mut inner = self.inner.write().await;
        if !inner.runs.contains_key(run_id) {
            return Err(StoreError::RunNotFound(run_id.to_string()));
        }
        let id = format!("msg_{}", uuid::Uuid::new_v4().simple());
        inner.messages.insert(id.clone(), content);
        Ok(id)
    }

    async fn get_message(&self, message_id: &str) -> Result<String, StoreError> {
        self.inner
            .read()
            .await
            .messages
            .get(message_id)
            .cloned()
            .ok_or_else(|| StoreError::MessageNotFound(message_id.to_string()))
    }
}
