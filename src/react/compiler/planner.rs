//! DAG Planner：把问题（以及之前各轮计划）交给 LLM，解析为新的 TaskGraph
//!
//! 没有可用工具时直接以问题调用 LLM 作答。

use std::sync::Arc;

use crate::core::AgentError;
use crate::llm::{FunctionTool, LlmClient, Message};
use crate::react::compiler::graph::{ExhaustedPlan, TaskGraph};
use crate::react::compiler::plan_parser::{continue_numbering, parse_plan};

#[derive(Debug, Clone, PartialEq)]
pub enum PlannerOutput {
    /// 新计划及其说明文字
    Plan { thought: String, graph: TaskGraph },
    /// 无工具时的直接回答
    Answer(String),
}

pub struct CompilerPlanner {
    llm: Arc<dyn LlmClient>,
}

impl CompilerPlanner {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    /// 生成计划；history 非空时为重规划，新任务序号接在 `last_index` 之后
    pub async fn plan(
        &self,
        question: &str,
        tools: &[FunctionTool],
        history: &[ExhaustedPlan],
        last_index: u32,
    ) -> Result<PlannerOutput, AgentError> {
        if tools.is_empty() {
            let answer = self.llm.complete(&[Message::user(question)]).await?;
            return Ok(PlannerOutput::Answer(answer));
        }

        let prompt = render_prompt(question, tools, history, last_index);
        let raw = self.llm.complete(&[Message::user(prompt)]).await?;
        tracing::debug!(raw = %raw, "planner output");

        let parsed = parse_plan(&raw);
        if parsed.tasks.is_empty() {
            return Err(AgentError::PlanParse(format!(
                "no task found in planner output: {}",
                raw.chars().take(200).collect::<String>()
            )));
        }
        if let Some(task) = parsed
            .tasks
            .iter()
            .find(|t| !t.is_join() && !tools.iter().any(|f| f.name == t.tool_call.name))
        {
            return Err(AgentError::UnresolvedTool {
                id: task.tool_call.id.clone(),
                name: task.tool_call.name.clone(),
            });
        }

        let tasks = if history.is_empty() {
            parsed.tasks
        } else {
            continue_numbering(parsed.tasks, last_index)
        };
        let mut graph = TaskGraph::new(question, tasks);
        graph.history = history.to_vec();
        tracing::debug!(
            tasks = graph.tasks.len(),
            replan = graph.replan_count(),
            "task graph built"
        );
        Ok(PlannerOutput::Plan {
            thought: parsed.thought.unwrap_or_default(),
            graph,
        })
    }
}

fn render_prompt(
    question: &str,
    tools: &[FunctionTool],
    history: &[ExhaustedPlan],
    last_index: u32,
) -> String {
    let num_tools = tools.len() + 1;
    let mut descriptions = String::new();
    for (i, tool) in tools.iter().enumerate() {
        descriptions.push_str(&format!(
            "{}. {}: {}, arguments JSON schema: {}\n",
            i + 1,
            tool.name,
            tool.description,
            tool.parameters
        ));
    }

    let replan = if history.is_empty() {
        String::new()
    } else {
        format!(
            "- You are given \"Previous Plan\" which is the plan that the previous agent created along with the execution results \
             (given as Observation) of each plan and a general thought (given as Thought) about the executed results. \
             You MUST use these information to create the next plan under \"Current Plan\".\n\
             - When starting the Current Plan, you should start with \"Thought\" that outlines the strategy for the next plan.\n\
             - In the Current Plan, you should NEVER repeat the actions that are already executed in the Previous Plan.\n\
             - You must continue the task index from the end of the previous one. The first task index is {}.\n",
            last_index + 1
        )
    };

    let mut context = String::new();
    for plan in history {
        context.push_str("Previous Plan:\n\n");
        context.push_str(&plan.scratchpad);
        context.push_str(&format!("Thought: {}\n\n", plan.thought));
    }
    context.push_str("Current Plan:\n\n");

    format!(
        "Given a user query, create a plan to solve it with the utmost parallelization. \
         Each plan should comprise an action from the following {num_tools} types:\n\
         {descriptions}\
         {num_tools}. join: Collects and combines results from prior actions. No arguments needed.\n\n\
         Guidelines:\n\
         - Each action MUST have a unique ID, which is strictly increasing.\n\
         - Ensure the plan maximizes parallelization.\n\
         - Respond with the task list and each task takes one and only one line in the following format: \
         ID. action_name(JSON blob of action input without new line).\n\
         - If inputs for actions are outputs from preceding actions, always use the format $id to denote \
         the ID of the previous action whose output will be used as the input.\n\
         - Only use the provided action types. If a query cannot be addressed using these, invoke the join action for the next steps.\n\
         - Never introduce new actions other than the ones provided.\n\
         - join should always be the last action in the plan, and will be called in two scenarios:\n\
         \x20 (a) if the answer can be determined by gathering the outputs from tasks to generate the final response.\n\
         \x20 (b) if the answer cannot be determined in the planning phase before you execute the plans.\n\
         - Always call join as the last action in the plan. Say '<END_OF_PLAN>' after you call join in a new line.\n\
         {replan}\n\
         Question: {question}\n\n\
         {context}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;

    fn tools() -> Vec<FunctionTool> {
        vec![FunctionTool {
            name: "lookup".into(),
            description: "price of an item".into(),
            parameters: serde_json::json!({"type": "object"}),
        }]
    }

    #[tokio::test]
    async fn test_plan_builds_graph() {
        let mock = Arc::new(MockLlmClient::new().with_reply(
            "Thought: look up both\n1. lookup({\"item\": \"A\"})\n2. lookup({\"item\": \"B\"})\n3. join()\n<END_OF_PLAN>",
        ));
        let planner = CompilerPlanner::new(mock.clone());
        let out = planner.plan("cheapest?", &tools(), &[], 0).await.unwrap();
        match out {
            PlannerOutput::Plan { thought, graph } => {
                assert_eq!(thought, "look up both");
                assert_eq!(graph.tasks.len(), 3);
                assert_eq!(graph.question, "cheapest?");
                assert_eq!(graph.find_ready_tasks(), vec![1, 2]);
            }
            other => panic!("expected plan, got {other:?}"),
        }
        let prompts = mock.prompts();
        let prompt = &prompts[0][0].content;
        assert!(prompt.contains("1. lookup: price of an item"));
        assert!(prompt.contains("2. join"));
        assert!(prompt.contains("Question: cheapest?"));
        assert!(!prompt.contains("Previous Plan"));
    }

    #[tokio::test]
    async fn test_plan_without_tools_answers_directly() {
        let mock = Arc::new(MockLlmClient::new().with_reply("Paris"));
        let planner = CompilerPlanner::new(mock.clone());
        let out = planner.plan("capital of France?", &[], &[], 0).await.unwrap();
        assert_eq!(out, PlannerOutput::Answer("Paris".into()));
        assert_eq!(mock.prompts()[0][0].content, "capital of France?");
    }

    #[tokio::test]
    async fn test_replan_renders_history_and_continues_indices() {
        let mock = Arc::new(
            MockLlmClient::new().with_reply("1. lookup({\"item\": \"C\"})\n2. join()"),
        );
        let planner = CompilerPlanner::new(mock.clone());
        let history = vec![ExhaustedPlan {
            scratchpad: "1. lookup({\"item\": \"A\"})\nObservation: 3\n".into(),
            thought: "C is missing".into(),
        }];
        let out = planner.plan("cheapest?", &tools(), &history, 2).await.unwrap();
        let PlannerOutput::Plan { graph, .. } = out else {
            panic!("expected plan");
        };
        assert_eq!(graph.tasks[0].index, 3);
        assert_eq!(graph.replan_count(), 1);

        let prompts = mock.prompts();
        let prompt = &prompts[0][0].content;
        assert!(prompt.contains("Previous Plan:"));
        assert!(prompt.contains("Thought: C is missing"));
        assert!(prompt.contains("The first task index is 3."));
        assert!(prompt.trim_end().ends_with("Current Plan:"));
    }

    #[tokio::test]
    async fn test_plan_errors() {
        let mock = Arc::new(
            MockLlmClient::new()
                .with_reply("no plan here")
                .with_reply("1. teleport({})\n2. join()"),
        );
        let planner = CompilerPlanner::new(mock);
        assert!(matches!(
            planner.plan("q", &tools(), &[], 0).await,
            Err(AgentError::PlanParse(_))
        ));
        assert!(matches!(
            planner.plan("q", &tools(), &[], 0).await,
            Err(AgentError::UnresolvedTool { name, .. }) if name == "teleport"
        ));
    }
}
