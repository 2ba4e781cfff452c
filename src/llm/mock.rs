//! Mock LLM 客户端（用于测试与演示，无需 API）
//!
//! 按顺序返回预先编排的回复，并记录每次收到的 prompt，便于断言 Planner / Joiner 的输入。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::{FunctionTool, LlmClient, LlmError, Message};

/// 脚本化 Mock：每次调用弹出一条回复，回复耗尽时返回 LlmError::Request
#[derive(Debug, Default)]
pub struct MockLlmClient {
    replies: Mutex<VecDeque<Message>>,
    prompts: Mutex<Vec<Vec<Message>>>,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一条纯文本回复
    pub fn with_reply(self, content: impl Into<String>) -> Self {
        self.push(Message::assistant(content));
        self
    }

    /// 追加一条 assistant 消息（可携带 tool_calls）
    pub fn with_message(self, message: Message) -> Self {
        self.push(message);
        self
    }

    pub fn push(&self, message: Message) {
        if let Ok(mut q) = self.replies.lock() {
            q.push_back(message);
        }
    }

    /// 已收到的全部 prompt（按调用顺序）
    pub fn prompts(&self) -> Vec<Vec<Message>> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }

    /// 剩余未消费的回复数
    pub fn remaining(&self) -> usize {
        self.replies.lock().map(|q| q.len()).unwrap_or(0)
    }

    fn next_reply(&self, messages: &[Message]) -> Result<Message, LlmError> {
        if let Ok(mut p) = self.prompts.lock() {
            p.push(messages.to_vec());
        }
        self.replies
            .lock()
            .map_err(|_| LlmError::Request("mock poisoned".to_string()))?
            .pop_front()
            .ok_or_else(|| LlmError::Request("mock has no scripted reply left".to_string()))
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        self.next_reply(messages).map(|m| m.content)
    }

    async fn complete_with_tools(
        &self,
        messages: &[Message],
        _tools: &[FunctionTool],
    ) -> Result<Message, LlmError> {
        self.next_reply(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ToolCall;

    #[tokio::test]
    async fn test_mock_replies_in_order() {
        let mock = MockLlmClient::new()
            .with_reply("first")
            .with_message(Message::tool_request("", vec![ToolCall::new("c1", "echo", "{}")]));

        assert_eq!(mock.complete(&[Message::user("hi")]).await.unwrap(), "first");
        let second = mock.complete_with_tools(&[], &[]).await.unwrap();
        assert!(second.has_tool_calls());
        assert!(mock.complete(&[]).await.is_err());
        assert_eq!(mock.prompts().len(), 3);
        assert_eq!(mock.prompts()[0][0].content, "hi");
    }
}
