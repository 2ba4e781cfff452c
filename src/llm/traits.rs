//! LLM 客户端抽象（chat function）
//!
//! 引擎只依赖 LlmClient：complete（纯文本回复）与 complete_with_tools（带工具 schema，回复可含 tool_calls）。
//! 具体后端（HTTP、推理引擎）在引擎之外实现，构造时注入 Planner / Joiner。

use async_trait::async_trait;
use thiserror::Error;

use crate::llm::{FunctionTool, Message};

/// LLM 调用错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LlmError {
    #[error("request failed: {0}")]
    Request(String),
}

/// LLM 客户端 trait
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 非流式完成，返回 assistant 文本
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError>;

    /// 绑定工具 schema 的完成；返回的 assistant 消息可能包含 tool_calls。
    /// 默认实现忽略工具，适用于只支持纯文本的后端
    async fn complete_with_tools(
        &self,
        messages: &[Message],
        _tools: &[FunctionTool],
    ) -> Result<Message, LlmError> {
        let content = self.complete(messages).await?;
        Ok(Message::assistant(content))
    }
}
