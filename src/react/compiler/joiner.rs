//! Joiner：根据已执行计划的观察结果给出最终回答，或要求重新规划
//!
//! 输出格式：`Thought: ...` 与 `Action: Finish(answer)` / `Action: Replan(reason)`。

use std::sync::{Arc, OnceLock};

use regex::Regex;

use crate::core::AgentError;
use crate::llm::{LlmClient, Message};
use crate::react::compiler::graph::{JoinerResult, TaskGraph};

const REPLAN_ACTION: &str = "Replan";

static JOIN_ACTION_RE: OnceLock<Regex> = OnceLock::new();

fn action_regex() -> &'static Regex {
    JOIN_ACTION_RE.get_or_init(|| Regex::new(r"^Action:\s*(.+?)\((.*)\)\s*$").unwrap())
}

pub struct Joiner {
    llm: Arc<dyn LlmClient>,
}

impl Joiner {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    pub async fn join(&self, graph: &TaskGraph) -> Result<JoinerResult, AgentError> {
        let prompt = render_prompt(graph);
        let raw = self.llm.complete(&[Message::user(prompt)]).await?;
        tracing::debug!(raw = %raw, "joiner output");
        parse_joiner_output(&raw)
    }
}

fn render_prompt(graph: &TaskGraph) -> String {
    format!(
        "Solve a question answering task. Here are some guidelines:\n\
         - In the Assistant Scratchpad, you will be given results of a plan you have executed to answer the user's question.\n\
         - Thought needs to reason about the question based on the Observations in 1-2 sentences.\n\
         - Ignore irrelevant action results.\n\
         - If the required information is present, give a concise but complete and helpful answer to the user's question.\n\
         - If you are unable to give a satisfactory finishing answer, replan to get the required information.\n\n\
         Respond in the following format:\n\n\
         Thought: <reason about the task results and whether you have sufficient information to answer the question>\n\
         Action: <action to take>(<final answer>)\n\n\
         You should choose one of available actions:\n\
         \x20(1) Finish(the final answer to return to the user): returns the answer and finishes the task.\n\
         \x20(2) Replan(the reasoning and other information that will help you plan again. Can be a line of any length): instructs why we must replan\n\n\
         Question: {}\n\n\
         {}\n",
        graph.question,
        graph.scratchpad()
    )
}

/// 解析 Joiner 输出；缺少 Action 行视为格式错误
pub fn parse_joiner_output(text: &str) -> Result<JoinerResult, AgentError> {
    let mut result = JoinerResult::default();
    let mut has_action = false;
    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if let Some(thought) = line.strip_prefix("Thought:") {
            result.thought = thought.trim().to_string();
        }
        if let Some(caps) = action_regex().captures(line) {
            result.is_replan = caps[1].contains(REPLAN_ACTION);
            result.answer = caps[2].trim().to_string();
            has_action = true;
        }
    }
    if !has_action {
        return Err(AgentError::PlanParse(format!(
            "joiner output has no action: {}",
            text.chars().take(200).collect::<String>()
        )));
    }
    Ok(result)
}
