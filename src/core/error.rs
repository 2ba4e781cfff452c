//! 引擎错误类型与错误分类
//!
//! AgentError 覆盖 Planner / Worker / Joiner / 执行器内可能抛出的错误；
//! kind() 将其归类为客户端输入错误、服务端内部错误或未知错误，供协调器翻译为 Finish(failed)。

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::llm::LlmError;
use crate::store::StoreError;

/// 错误类别（写入失败步骤的 last_error.kind）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// 请求或输入不合法
    InvalidRequest,
    /// 引擎或依赖内部错误
    Server,
    /// 无法归类
    Unknown,
}

/// 持久化到失败步骤与运行对象上的错误详情
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunError {
    pub kind: ErrorKind,
    pub message: String,
}

impl RunError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<&AgentError> for RunError {
    fn from(err: &AgentError) -> Self {
        Self::new(err.kind(), err.to_string())
    }
}

/// 执行过程中出现的错误
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Illegal state: {0}")]
    IllegalState(String),

    #[error("Plan parse error: {0}")]
    PlanParse(String),

    #[error("Unresolved tool: id={id}, name={name}")]
    UnresolvedTool { id: String, name: String },

    #[error("Invalid tool arguments for {tool}: {reason}")]
    InvalidToolArguments { tool: String, reason: String },

    #[error("Tool execution failed: {0}")]
    ToolExecutionFailed(String),

    #[error("Tool timeout: {0}")]
    ToolTimeout(String),

    #[error("LLM error: {0}")]
    LlmError(#[from] LlmError),

    #[error("Replan limit exceeded: {0}")]
    ReplanLimitExceeded(u32),

    #[error("Step limit exceeded: {0}")]
    StepLimitExceeded(usize),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AgentError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AgentError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            AgentError::IllegalState(_)
            | AgentError::PlanParse(_)
            | AgentError::UnresolvedTool { .. }
            | AgentError::InvalidToolArguments { .. }
            | AgentError::ToolExecutionFailed(_)
            | AgentError::ToolTimeout(_)
            | AgentError::LlmError(_)
            | AgentError::ReplanLimitExceeded(_)
            | AgentError::StepLimitExceeded(_)
            | AgentError::Store(_) => ErrorKind::Server,
            AgentError::Other(_) => ErrorKind::Unknown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_classification() {
        assert_eq!(
            AgentError::InvalidRequest("bad".into()).kind(),
            ErrorKind::InvalidRequest
        );
        assert_eq!(
            AgentError::ToolExecutionFailed("boom".into()).kind(),
            ErrorKind::Server
        );
        assert_eq!(
            AgentError::LlmError(LlmError::Request("timeout".into())).kind(),
            ErrorKind::Server
        );
        assert_eq!(AgentError::ReplanLimitExceeded(6).kind(), ErrorKind::Server);
        assert_eq!(
            AgentError::Other(anyhow::anyhow!("??")).kind(),
            ErrorKind::Unknown
        );
    }

    #[test]
    fn test_error_messages() {
        let err = AgentError::UnresolvedTool {
            id: "call_1".into(),
            name: "fly".into(),
        };
        assert_eq!(err.to_string(), "Unresolved tool: id=call_1, name=fly");
    }
}
