//! 运行存储：Run / RunStepRecord 与 RunStore 抽象
//!
//! 引擎只通过 RunStore 读写持久化进度；步骤记录按 seq 只追加，记录本身可在完成时回填输出与状态。
//! 内置 MemoryRunStore 用于单进程部署与测试，其他后端实现同一 trait 即可接入协调器。

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::error::RunError;
use crate::core::state::{StepPayload, ToolResult};
use crate::llm::FunctionTool;

pub use memory::MemoryRunStore;

/// 存储层错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("run not found: {0}")]
    RunNotFound(String),

    #[error("step not found: {0}")]
    StepNotFound(String),

    #[error("message not found: {0}")]
    MessageNotFound(String),

    #[error("duplicate id: {0}")]
    Duplicate(String),

    /// 运行或步骤的当前状态不允许该操作
    #[error("conflict: {0}")]
    Conflict(String),
}

/// 运行状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    InProgress,
    RequiresAction,
    Cancelling,
    Cancelled,
    Failed,
    Completed,
    Expired,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunStatus::Cancelled | RunStatus::Failed | RunStatus::Completed | RunStatus::Expired
        )
    }

    /// 尚未结束、仍可被取消或过期的状态
    pub const ACTIVE: [RunStatus; 4] = [
        RunStatus::Queued,
        RunStatus::InProgress,
        RunStatus::RequiresAction,
        RunStatus::Cancelling,
    ];
}

/// 一次运行
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub id: String,
    pub input: String,
    /// 由调用方声明、需外部提交结果的工具
    pub tools: Vec<FunctionTool>,
    pub status: RunStatus,
    pub last_error: Option<RunError>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Run {
    pub fn new(input: impl Into<String>, tools: Vec<FunctionTool>) -> Self {
        Self {
            id: format!("run_{}", uuid::Uuid::new_v4().simple()),
            input: input.into(),
            tools,
            status: RunStatus::Queued,
            last_error: None,
            created_at: Utc::now(),
            finished_at: None,
        }
    }
}

/// 工具调用记录；output 为空表示尚未完成
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub id: String,
    pub name: String,
    pub arguments: String,
    pub output: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepRecordKind {
    ToolCalls { tool_calls: Vec<ToolCallRecord> },
    MessageCreation { message_id: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStepStatus {
    InProgress,
    Completed,
    Cancelled,
    Expired,
    Failed,
}

/// 持久化的步骤记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStepRecord {
    pub id: String,
    pub run_id: String,
    /// 由存储分配，运行内严格递增
    pub seq: u64,
    pub kind: StepRecordKind,
    pub status: RunStepStatus,
    pub last_error: Option<RunError>,
    pub payload: Option<StepPayload>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl RunStepRecord {
    pub fn new(run_id: impl Into<String>, kind: StepRecordKind, status: RunStepStatus) -> Self {
        let now = Utc::now();
        Self {
            id: format!("step_{}", uuid::Uuid::new_v4().simple()),
            run_id: run_id.into(),
            seq: 0,
            kind,
            status,
            last_error: None,
            payload: None,
            created_at: now,
            completed_at: (status != RunStepStatus::InProgress).then_some(now),
        }
    }

    pub fn with_payload(mut self, payload: Option<StepPayload>) -> Self {
        self.payload = payload;
        self
    }

    pub fn tool_calls(&self) -> Option<&[ToolCallRecord]> {
        match &self.kind {
            StepRecordKind::ToolCalls { tool_calls } => Some(tool_calls),
            StepRecordKind::MessageCreation { .. } => None,
        }
    }

    pub fn tool_calls_mut(&mut self) -> Option<&mut Vec<ToolCallRecord>> {
        match &mut self.kind {
            StepRecordKind::ToolCalls { tool_calls } => Some(tool_calls),
            StepRecordKind::MessageCreation { .. } => None,
        }
    }

    /// 标记结束状态（写入完成时间）
    pub fn mark(&mut self, status: RunStepStatus, error: Option<RunError>) {
        self.status = status;
        self.last_error = error;
        if status != RunStepStatus::InProgress {
            self.completed_at = Some(Utc::now());
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

/// 分页参数：after 为上一页最后一条记录的 id
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Page {
    pub limit: Option<usize>,
    pub after: Option<String>,
}

impl Page {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn limit(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            after: None,
        }
    }

    pub fn after(mut self, id: impl Into<String>) -> Self {
        self.after = Some(id.into());
        self
    }
}

/// 运行/步骤/消息的持久化接口
#[async_trait]
pub trait RunStore: Send + Sync {
    async fn create_run(&self, run: Run) -> Result<Run, StoreError>;

    async fn get_run(&self, run_id: &str) -> Result<Run, StoreError>;

    async fn get_run_status(&self, run_id: &str) -> Result<RunStatus, StoreError> {
        Ok(self.get_run(run_id).await?.status)
    }

    /// 无条件设置状态
    async fn set_run_status(&self, run_id: &str, status: RunStatus) -> Result<Run, StoreError>;

    /// 仅当当前状态属于 `from` 时切换到 `to`；返回是否切换成功
    async fn transition_run(
        &self,
        run_id: &str,
        from: &[RunStatus],
        to: RunStatus,
    ) -> Result<bool, StoreError>;

    /// 写入终止状态、错误与结束时间
    async fn finish_run(
        &self,
        run_id: &str,
        status: RunStatus,
        error: Option<RunError>,
    ) -> Result<Run, StoreError>;

    /// 原子地为挂起的运行回填工具输出并切回 Queued
    ///
    /// 运行必须处于 RequiresAction，最后一条记录必须是进行中的工具调用；
    /// 任一 id 未知或已有输出时整体拒绝（Conflict），不写入任何输出。
    async fn submit_tool_outputs(&self, run_id: &str, outputs: &[ToolResult]) -> Result<Run, StoreError>;

    /// 追加步骤记录，seq 由存储分配
    async fn append_step(&self, record: RunStepRecord) -> Result<RunStepRecord, StoreError>;

    /// 按 id 覆盖已有记录（seq 与 run_id 不变）
    async fn update_step(&self, record: RunStepRecord) -> Result<(), StoreError>;

    async fn list_steps(
        &self,
        run_id: &str,
        order: SortOrder,
        page: Page,
    ) -> Result<Vec<RunStepRecord>, StoreError>;

    async fn last_step(&self, run_id: &str) -> Result<Option<RunStepRecord>, StoreError> {
        Ok(self
            .list_steps(run_id, SortOrder::Desc, Page::limit(1))
            .await?
            .into_iter()
            .next())
    }

    /// 保存消息文本，返回消息 id
    async fn create_message(&self, run_id: &str, content: String) -> Result<String, StoreError>;

    async fn get_message(&self, message_id: &str) -> Result<String, StoreError>;
}
