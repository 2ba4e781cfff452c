//! 单批并行策略：一次 LLM 调用返回零个或多个 tool_calls，全部作为一个批次交给 Worker
//!
//! 对话历史由步骤日志重建：Continuation → assistant 工具调用消息，Observation → tool 消息。

use std::sync::Arc;

use async_trait::async_trait;

use crate::core::state::{AgentState, AgentStep, Continuation, Finish, Thought};
use crate::core::AgentError;
use crate::llm::{LlmClient, Message, ToolCall};
use crate::react::executor::{dispatch, lift_pause, AgentExecutor};
use crate::tools::ToolWorker;

pub struct ToolCallingExecutor {
    llm: Arc<dyn LlmClient>,
    worker: Arc<ToolWorker>,
}

impl ToolCallingExecutor {
    pub fn new(llm: Arc<dyn LlmClient>, worker: Arc<ToolWorker>) -> Self {
        Self { llm, worker }
    }

    async fn think(&self, state: &AgentState) -> Result<AgentStep, AgentError> {
        let messages = self.history(state);
        let reply = self
            .llm
            .complete_with_tools(&messages, state.function_tools())
            .await?;

        if !reply.has_tool_calls() {
            return Ok(AgentStep::finish(Finish::response(reply.content)));
        }

        let mut tool_calls = Vec::with_capacity(reply.tool_calls.len());
        for call in reply.tool_calls {
            let id = if call.id.trim().is_empty() {
                ToolCall::next_id()
            } else {
                call.id
            };
            if !state.has_function_tool(&call.name) {
                return Err(AgentError::UnresolvedTool { id, name: call.name });
            }
            tool_calls.push(ToolCall { id, ..call });
        }
        tracing::debug!(calls = tool_calls.len(), "model requested tool calls");
        Ok(AgentStep::continuation(Continuation {
            content: reply.content,
            tool_calls,
            payload: None,
        }))
    }

    fn history(&self, state: &AgentState) -> Vec<Message> {
        let mut messages = vec![Message::user(state.input())];
        for step in state.steps() {
            match step {
                AgentStep::Thought(Thought::Continuation(c)) => {
                    messages.push(Message::tool_request(c.content.clone(), c.tool_calls.clone()));
                }
                AgentStep::Observation(o) => {
                    messages.extend(
                        o.results
                            .iter()
                            .map(|r| Message::tool(r.tool_call_id.clone(), r.content.clone())),
                    );
                }
                AgentStep::Thought(_) => {}
            }
        }
        messages
    }
}

#[async_trait]
impl AgentExecutor for ToolCallingExecutor {
    fn name(&self) -> &'static str {
        "tool_calling"
    }

    async fn next_step(&self, state: &AgentState) -> Result<Option<AgentStep>, AgentError> {
        match state.last_step() {
            None | Some(AgentStep::Observation(_)) => Ok(Some(self.think(state).await?)),
            Some(AgentStep::Thought(Thought::Continuation(c))) => Ok(Some(dispatch(&self.worker, c).await?)),
            Some(AgentStep::Thought(Thought::Pause(p))) => Ok(lift_pause(p).map(AgentStep::observation)),
            Some(AgentStep::Thought(Thought::Finish(_))) => Ok(None),
        }
    }
}
