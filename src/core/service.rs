//! 运行服务：创建运行、提交工具输出、取消、过期
//!
//! 只修改存储中的运行状态与步骤记录，然后投递 "agent_run" 任务，由协调器在后台推进。

use std::sync::Arc;

use crate::core::coordinator::AGENT_RUN_TASK;
use crate::core::error::AgentError;
use crate::core::state::ToolResult;
use crate::core::task_scheduler::{Task, TaskScheduler};
use crate::llm::FunctionTool;
use crate::store::{Run, RunStatus, RunStore, StoreError};

pub struct RunService {
    store: Arc<dyn RunStore>,
    scheduler: Arc<TaskScheduler>,
}

impl RunService {
    pub fn new(store: Arc<dyn RunStore>, scheduler: Arc<TaskScheduler>) -> Self {
        Self { store, scheduler }
    }

    /// 新建运行（Queued）并投递
    pub async fn create_run(&self, input: impl Into<String>, tools: Vec<FunctionTool>) -> Result<Run, AgentError> {
        let input = input.into();
        if input.trim().is_empty() {
            return Err(AgentError::InvalidRequest("run input is empty".to_string()));
        }
        let run = self.store.create_run(Run::new(input, tools)).await?;
        tracing::info!(run_id = %run.id, tools = run.tools.len(), "run created");
        self.enqueue(&run.id)?;
        Ok(run)
    }

    /// 为挂起的运行提交工具输出；可分多次提交
    ///
    /// 校验、回填与切回 Queued 由存储在一次操作内完成，并发提交只有一个生效。
    pub async fn submit_tool_outputs(&self, run_id: &str, outputs: Vec<ToolResult>) -> Result<Run, AgentError> {
        let run = self
            .store
            .submit_tool_outputs(run_id, &outputs)
            .await
            .map_err(|e| match e {
                StoreError::Conflict(reason) => AgentError::InvalidRequest(reason),
                other => AgentError::Store(other),
            })?;
        tracing::info!(run_id, outputs = outputs.len(), "tool outputs submitted");
        self.enqueue(run_id)?;
        Ok(run)
    }

    /// 请求取消；真正结束由协调器完成
    pub async fn cancel_run(&self, run_id: &str) -> Result<Run, AgentError> {
        self.request_stop(run_id, RunStatus::Cancelling).await
    }

    /// 标记过期；真正结束由协调器完成
    pub async fn expire_run(&self, run_id: &str) -> Result<Run, AgentError> {
        self.request_stop(run_id, RunStatus::Expired).await
    }

    async fn request_stop(&self, run_id: &str, to: RunStatus) -> Result<Run, AgentError> {
        if !self.store.transition_run(run_id, &RunStatus::ACTIVE, to).await? {
            let status = self.store.get_run_status(run_id).await?;
            return Err(AgentError::InvalidRequest(format!(
                "run {} is already {:?}",
                run_id, status
            )));
        }
        tracing::info!(run_id, status = ?to, "run stop requested");
        self.enqueue(run_id)?;
        Ok(self.store.get_run(run_id).await?)
    }

    pub async fn get_run(&self, run_id: &str) -> Result<Run, AgentError> {
        Ok(self.store.get_run(run_id).await?)
    }

    fn enqueue(&self, run_id: &str) -> Result<(), AgentError> {
        self.scheduler.enqueue(Task::new(AGENT_RUN_TASK, run_id))?;
        Ok(())
    }
}
