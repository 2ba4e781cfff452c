//! 顺序策略（ReAct）：每个 Thought 只调用一个工具，下一次规划总是基于上一次 Observation
//!
//! LLM 输出格式：`Thought / Action / Action Input`，或以 `Final Answer:` 结束；两者都没有时视为非法输出。

use std::sync::Arc;

use async_trait::async_trait;

use crate::core::state::{AgentState, AgentStep, Continuation, Finish, Thought};
use crate::core::AgentError;
use crate::llm::{LlmClient, Message, ToolCall};
use crate::react::executor::{dispatch, lift_pause, AgentExecutor};
use crate::tools::ToolWorker;

const ACTION_TOKEN: &str = "Action:";
const ACTION_INPUT_TOKEN: &str = "Action Input:";
const FINAL_ANSWER_TOKEN: &str = "Final Answer:";
const THOUGHT_TOKEN: &str = "Thought:";

/// 解析后的 ReAct 输出
#[derive(Debug, Clone, PartialEq)]
pub enum ReActOutput {
    Action {
        thought: String,
        name: String,
        input: String,
    },
    FinalAnswer(String),
}

/// 解析 LLM 输出：Action 优先于 Final Answer
pub fn parse_react_output(text: &str) -> Result<ReActOutput, AgentError> {
    let mut name = String::new();
    let mut input = String::new();
    for line in text.lines() {
        if let Some(idx) = line.find(ACTION_INPUT_TOKEN) {
            input = line[idx + ACTION_INPUT_TOKEN.len()..].trim().to_string();
        } else if let Some(idx) = line.find(ACTION_TOKEN) {
            name = line[idx + ACTION_TOKEN.len()..].trim().to_string();
        }
    }

    if !name.is_empty() {
        let thought = text
            .find(ACTION_TOKEN)
            .map(|idx| text[..idx].trim())
            .unwrap_or_default();
        let thought = thought.strip_prefix(THOUGHT_TOKEN).unwrap_or(thought).trim();
        return Ok(ReActOutput::Action {
            thought: thought.to_string(),
            name,
            input,
        });
    }

    if let Some(idx) = text.find(FINAL_ANSWER_TOKEN) {
        return Ok(ReActOutput::FinalAnswer(
            text[idx + FINAL_ANSWER_TOKEN.len()..].trim().to_string(),
        ));
    }

    tracing::debug!(output = %text, "illegal ReAct output");
    Err(AgentError::IllegalState(
        "illegal response for a ReAct agent: neither action nor final answer".to_string(),
    ))
}

pub struct ReActExecutor {
    llm: Arc<dyn LlmClient>,
    worker: Arc<ToolWorker>,
}

impl ReActExecutor {
    pub fn new(llm: Arc<dyn LlmClient>, worker: Arc<ToolWorker>) -> Self {
        Self { llm, worker }
    }

    async fn think(&self, state: &AgentState) -> Result<AgentStep, AgentError> {
        let prompt = render_prompt(state);
        let raw = self.llm.complete(&[Message::user(prompt)]).await?;
        match parse_react_output(&raw)? {
            ReActOutput::FinalAnswer(answer) => Ok(AgentStep::finish(Finish::response(answer))),
            ReActOutput::Action { thought, name, input } => {
                let id = ToolCall::next_id();
                if !state.has_function_tool(&name) {
                    return Err(AgentError::UnresolvedTool { id, name });
                }
                Ok(AgentStep::continuation(Continuation {
                    content: thought,
                    tool_calls: vec![ToolCall::new(id, name, input)],
                    payload: None,
                }))
            }
        }
    }
}

fn render_prompt(state: &AgentState) -> String {
    let tools = state
        .function_tools()
        .iter()
        .map(|t| format!("{}: {}, args: {}", t.name, t.description, t.parameters))
        .collect::<Vec<_>>()
        .join("\n");
    let tool_names = state
        .function_tools()
        .iter()
        .map(|t| t.name.as_str())
        .collect::<Vec<_>>()
        .join(",");

    format!(
        "Answer the following questions as best you can. You have access to the following tools:\n\n\
         {tools}\n\n\
         Use the following format:\n\n\
         Question: the input question you must answer\n\
         Thought: you should always think about what to do\n\
         Action: the action to take, should be one of [{tool_names}]\n\
         Action Input: the input to the action, formatted as a JSON object on one line\n\
         Observation: the result of the action\n\
         ... (this Thought/Action/Action Input/Observation can repeat N times)\n\
         Thought: I now know the final answer\n\
         Final Answer: the final answer to the original input question\n\n\
         Begin!\n\n\
         Question: {}\n\
         Thought: {}",
        state.input(),
        scratchpad(state)
    )
}

/// 由已有步骤还原的 Thought/Action/Observation 记录
fn scratchpad(state: &AgentState) -> String {
    let mut pad = String::new();
    for step in state.steps() {
        match step {
            AgentStep::Thought(Thought::Continuation(c)) => {
                pad.push_str(&c.content);
                if let Some(call) = c.tool_calls.first() {
                    pad.push_str(&format!("\nAction: {}\nAction Input: {}", call.name, call.arguments));
                }
            }
            AgentStep::Observation(o) => {
                let content = o.results.first().map(|r| r.content.as_str()).unwrap_or_default();
                pad.push_str(&format!("\nObservation: {content}\nThought: "));
            }
            AgentStep::Thought(_) => {}
        }
    }
    pad
}

#[async_trait]
impl AgentExecutor for ReActExecutor {
    fn name(&self) -> &'static str {
        "react"
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;
    use crate::react::executor::{resolve_next_step, NoStopPredicate};
    use crate::tools::{EchoTool, ToolExecutor, ToolRegistry};

    fn executor(mock: Arc<MockLlmClient>) -> ReActExecutor {
        let registry = Arc::new(ToolRegistry::new().with_tool(EchoTool));
        let worker = Arc::new(ToolWorker::new(Arc::new(ToolExecutor::new(registry, 5)), 1));
        ReActExecutor::new(mock, worker)
    }

    fn state() -> AgentState {
        AgentState::new("repeat hello", ToolRegistry::new().with_tool(EchoTool).schemas())
    }

    #[test]
    fn test_parse_action() {
        let out = parse_react_output(
            "Thought: I should echo\nAction: echo\nAction Input: {\"text\": \"hello\"}",
        )
        .unwrap();
        assert_eq!(
            out,
            ReActOutput::Action {
                thought: "I should echo".into(),
                name: "echo".into(),
                input: "{\"text\": \"hello\"}".into(),
            }
        );
    }

    #[test]
    fn test_parse_final_answer_and_garbage() {
        assert_eq!(
            parse_react_output("Thought: I now know the final answer\nFinal Answer: hello\nworld").unwrap(),
            ReActOutput::FinalAnswer("hello\nworld".into())
        );
        assert!(matches!(
            parse_react_output("just chatting"),
            Err(AgentError::IllegalState(_))
        ));
    }

    #[tokio::test]
    async fn test_sequential_loop() {
        let mock = Arc::new(
            MockLlmClient::new()
                .with_reply("Thought: echo it\nAction: echo\nAction Input: {\"text\": \"hello\"}")
                .with_reply("Thought: I now know the final answer\nFinal Answer: hello"),
        );
        let exec = executor(mock.clone());
        let mut state = state();
        while resolve_next_step(&exec, &mut state, &NoStopPredicate)
            .await
            .unwrap()
            .is_some()
        {}

        assert_eq!(state.steps().len(), 3);
        let finish = state.last_step().and_then(AgentStep::as_finish).unwrap();
        assert_eq!(finish.response_text(), Some("hello"));

        let prompts = mock.prompts();
        let second = &prompts[1][0].content;
        assert!(second.contains("Action: echo"));
        assert!(second.contains("Observation: hello"));
    }

    #[tokio::test]
    async fn test_unknown_tool_is_fatal() {
        let mock = Arc::new(MockLlmClient::new().with_reply("Thought: fly\nAction: fly\nAction Input: {}"));
        let exec = executor(mock);
        let mut state = state();
        let err = resolve_next_step(&exec, &mut state, &NoStopPredicate)
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::UnresolvedTool { name, .. } if name == "fly"));
        assert!(state.steps().is_empty());
    }
}
