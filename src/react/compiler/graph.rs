//! 任务依赖图（DAG）
//!
//! 每个任务持有一个工具调用与依赖的任务序号；依赖全部有结果、自身尚无结果的任务即为就绪任务。
//! join 任务只用于标记计划结束，不会被派发执行。

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

use crate::core::state::ToolResult;
use crate::core::AgentError;
use crate::llm::ToolCall;

/// 计划中汇总结果的动作名
pub const JOIN_ACTION: &str = "join";

static PLACEHOLDER_RE: OnceLock<Regex> = OnceLock::new();

/// 参数中引用前序任务输出的占位符：`$N` 或 `${N}`
pub(crate) fn placeholder_regex() -> &'static Regex {
    PLACEHOLDER_RE.get_or_init(|| Regex::new(r"\$\{?(\d+)\}?").unwrap())
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub index: u32,
    pub tool_call: ToolCall,
    pub dependencies: Vec<u32>,
    pub result: Option<String>,
    pub thought: Option<String>,
}

impl Task {
    pub fn new(index: u32, tool_call: ToolCall, dependencies: Vec<u32>) -> Self {
        Self {
            index,
            tool_call,
            dependencies,
            result: None,
            thought: None,
        }
    }

    pub fn is_join(&self) -> bool {
        self.tool_call.name == JOIN_ACTION
    }

    /// 结果非空白才算完成
    pub fn is_done(&self) -> bool {
        self.result.as_deref().is_some_and(|r| !r.trim().is_empty())
    }
}

/// Joiner 对已执行计划的判断
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinerResult {
    pub thought: String,
    pub is_replan: bool,
    pub answer: String,
}

/// 已执行完毕并要求重新规划的计划
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExhaustedPlan {
    pub scratchpad: String,
    pub thought: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskGraph {
    pub question: String,
    pub tasks: Vec<Task>,
    pub joiner_result: Option<JoinerResult>,
    /// 之前各轮计划，长度即已重规划次数
    #[serde(default)]
    pub history: Vec<ExhaustedPlan>,
}

impl TaskGraph {
    pub fn new(question: impl Into<String>, tasks: Vec<Task>) -> Self {
        Self {
            question: question.into(),
            tasks,
            joiner_result: None,
            history: Vec::new(),
        }
    }

    pub fn replan_count(&self) -> usize {
        self.history.len()
    }

    pub fn max_index(&self) -> u32 {
        self.tasks.iter().map(|t| t.index).max().unwrap_or(0)
    }

    pub fn task(&self, index: u32) -> Option<&Task> {
        self.tasks.iter().find(|t| t.index == index)
    }

    /// 无结果、依赖均已完成的非 join 任务
    pub fn find_ready_tasks(&self) -> Vec<u32> {
        let done: HashMap<u32, bool> = self.tasks.iter().map(|t| (t.index, t.is_done())).collect();
        self.tasks
            .iter()
            .filter(|t| !t.is_join() && !t.is_done())
            .filter(|t| {
                t.dependencies
                    .iter()
                    .all(|d| done.get(d).copied().unwrap_or(false))
            })
            .map(|t| t.index)
            .collect()
    }

    pub fn is_exhausted(&self) -> bool {
        self.find_ready_tasks().is_empty()
    }

    /// 为就绪任务生成调用批次，参数中的占位符替换为依赖任务的结果
    pub fn build_tool_call_batch(&self, indices: &[u32]) -> Result<Vec<ToolCall>, AgentError> {
        indices
            .iter()
            .map(|idx| {
                let task = self.task(*idx).ok_or_else(|| {
                    AgentError::IllegalState(format!("task {idx} is not in the graph"))
                })?;
                Ok(ToolCall {
                    arguments: self.substitute(&task.tool_call.arguments),
                    ..task.tool_call.clone()
                })
            })
            .collect()
    }

    fn substitute(&self, arguments: &str) -> String {
        placeholder_regex()
            .replace_all(arguments, |caps: &Captures| {
                let result = caps[1]
                    .parse::<u32>()
                    .ok()
                    .and_then(|i| self.task(i))
                    .and_then(|t| t.result.as_deref());
                match result {
                    Some(r) => escape_json_fragment(r),
                    None => caps[0].to_string(),
                }
            })
            .into_owned()
    }

    /// 按调用 id 写回结果，返回写入的任务数
    pub fn merge_results(&mut self, results: &[ToolResult]) -> usize {
        let mut merged = 0;
        for result in results {
            if let Some(task) = self
                .tasks
                .iter_mut()
                .find(|t| t.tool_call.id == result.tool_call_id)
            {
                task.result = Some(result.content.clone());
                merged += 1;
            }
        }
        merged
    }

    /// 已完成任务的动作与观察，用于 Joiner 与重规划上下文
    pub fn scratchpad(&self) -> String {
        let mut out = String::new();
        for task in self.tasks.iter().filter(|t| !t.is_join() && t.is_done()) {
            if let Some(thought) = task.thought.as_deref().filter(|t| !t.trim().is_empty()) {
                out.push_str(&format!("Thought: {thought}\n"));
            }
            out.push_str(&format!(
                "{}. {}({})\n",
                task.index, task.tool_call.name, task.tool_call.arguments
            ));
            out.push_str(&format!(
                "Observation: {}\n",
                task.result.as_deref().unwrap_or_default()
            ));
        }
        out
    }
}

/// 作为 JSON 字符串内容嵌入时的转义文本（不含外层引号）
fn escape_json_fragment(s: &str) -> String {
    let quoted = serde_json::Value::String(s.to_string()).to_string();
    quoted[1..quoted.len() - 1].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(index: u32, name: &str, args: &str, deps: &[u32]) -> Task {
        Task::new(
            index,
            ToolCall::new(format!("call_{index}"), name, args),
            deps.to_vec(),
        )
    }

    fn sample() -> TaskGraph {
        TaskGraph::new(
            "cheapest of A, B",
            vec![
                task(1, "lookup", r#"{"item":"A"}"#, &[]),
                task(2, "lookup", r#"{"item":"B"}"#, &[]),
                task(3, "min", r#"{"values":"$1,${2}"}"#, &[1, 2]),
                task(4, JOIN_ACTION, "", &[1, 2, 3]),
            ],
        )
    }

    #[test]
    fn test_ready_tasks_follow_dependencies() {
        let mut graph = sample();
        assert_eq!(graph.find_ready_tasks(), vec![1, 2]);

        graph.merge_results(&[ToolResult::new("call_1", "3")]);
        assert_eq!(graph.find_ready_tasks(), vec![2]);

        graph.merge_results(&[ToolResult::new("call_2", "5")]);
        assert_eq!(graph.find_ready_tasks(), vec![3]);

        graph.merge_results(&[ToolResult::new("call_3", "3")]);
        assert!(graph.find_ready_tasks().is_empty());
        assert!(graph.is_exhausted());
    }

    #[test]
    fn test_blank_result_is_not_done() {
        let mut graph = sample();
        graph.merge_results(&[ToolResult::new("call_1", "   ")]);
        assert!(graph.find_ready_tasks().contains(&1));
    }

    #[test]
    fn test_batch_substitutes_placeholders() {
        let mut graph = sample();
        graph.merge_results(&[
            ToolResult::new("call_1", "3"),
            ToolResult::new("call_2", "say \"5\""),
        ]);
        let batch = graph.build_tool_call_batch(&[3]).unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].id, "call_3");
        assert_eq!(batch[0].arguments, r#"{"values":"3,say \"5\""}"#);
        let parsed: serde_json::Value = serde_json::from_str(&batch[0].arguments).unwrap();
        assert_eq!(parsed["values"], "3,say \"5\"");
    }

    #[test]
    fn test_batch_rejects_unknown_index() {
        assert!(sample().build_tool_call_batch(&[9]).is_err());
    }

    #[test]
    fn test_scratchpad_lists_completed_tasks() {
        let mut graph = sample();
        graph.merge_results(&[ToolResult::new("call_1", "3")]);
        let pad = graph.scratchpad();
        assert!(pad.contains(r#"1. lookup({"item":"A"})"#));
        assert!(pad.contains("Observation: 3"));
        assert!(!pad.contains("join"));
    }
}
