//! DAG 策略集成测试：并行查价 → 汇总、外部工具挂起后跨协调器恢复、取消短路

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use hive::core::{
        AgentState, AgentStep, RunCoordinator, RunService, RunStatusStopPredicate, TaskScheduler,
        Thought, ToolResult,
    };
    use hive::llm::{FunctionTool, MockLlmClient};
    use hive::react::{resolve_next_step, LlmCompilerExecutor, NoStopPredicate};
    use hive::store::{MemoryRunStore, Page, Run, RunStatus, RunStore, SortOrder, StepRecordKind};
    use hive::tools::{Tool, ToolExecutor, ToolRegistry, ToolWorker};
    use serde_json::Value;

    struct PriceTool;

    #[async_trait]
    impl Tool for PriceTool {
        fn name(&self) -> &str {
            "price"
        }

        fn description(&self) -> &str {
            "Look up the price of one item."
        }

        async fn execute(&self, args: Value) -> Result<String, String> {
            let item = args["item"].as_str().ok_or("missing item")?;
            let price = match item {
                "A" => 12,
                "B" => 7,
                "C" => 9,
                _ => return Err(format!("unknown item: {item}")),
            };
            Ok(format!("{item}: {price}"))
        }
    }

    struct CheapestTool;

    #[async_trait]
    impl Tool for CheapestTool {
        fn name(&self) -> &str {
            "cheapest"
        }

        fn description(&self) -> &str {
            "Pick the cheapest of `item: price` quotes separated by `;`."
        }

        async fn execute(&self, args: Value) -> Result<String, String> {
            let quotes = args["quotes"].as_str().ok_or("missing quotes")?;
            quotes
                .split(';')
                .filter_map(|q| {
                    let (item, price) = q.split_once(':')?;
                    Some((item.trim().to_string(), price.trim().parse::<u32>().ok()?))
                })
                .min_by_key(|(_, p)| *p)
                .map(|(item, p)| format!("{item} at {p}"))
                .ok_or_else(|| "no quotes".to_string())
        }
    }

    fn registry() -> Arc<ToolRegistry> {
        Arc::new(
            ToolRegistry::new()
                .with_tool(PriceTool)
                .with_tool(CheapestTool),
        )
    }

    fn executor(mock: Arc<MockLlmClient>) -> Arc<LlmCompilerExecutor> {
        let worker = Arc::new(ToolWorker::new(Arc::new(ToolExecutor::new(registry(), 5)), 4));
        Arc::new(LlmCompilerExecutor::new(mock, worker, 2))
    }

    fn kind(step: &AgentStep) -> String {
        match step {
            AgentStep::Thought(Thought::Continuation(c)) => format!("continuation:{}", c.tool_calls.len()),
            AgentStep::Observation(o) => format!("observation:{}", o.results.len()),
            AgentStep::Thought(Thought::Pause(_)) => "pause".to_string(),
            AgentStep::Thought(Thought::Finish(_)) => "finish".to_string(),
        }
    }

    #[tokio::test]
    async fn test_cheapest_of_three() {
        let mock = Arc::new(
            MockLlmClient::new()
                .with_reply(
                    "Thought: look up all three prices at once.\n\
                     1. price({\"item\": \"A\"})\n\
                     2. price({\"item\": \"B\"})\n\
                     3. price({\"item\": \"C\"})\n\
                     4. join()\n\
                     <END_OF_PLAN>",
                )
                .with_reply(
                    "Thought: comparing 12, 7 and 9 the minimum is 7.\n\
                     Action: Finish(B is the cheapest: min(A=12, B=7, C=9) = 7)",
                ),
        );
        let exec = executor(mock.clone());
        let mut state = AgentState::new("cheapest of A, B, C", registry().schemas());

        let mut kinds = Vec::new();
        while let Some(step) = resolve_next_step(exec.as_ref(), &mut state, &NoStopPredicate)
            .await
            .unwrap()
        {
            kinds.push(kind(&step));
        }
        assert_eq!(kinds, vec!["continuation:3", "observation:3", "finish"]);

        let AgentStep::Observation(obs) = &state.steps()[1] else {
            panic!("expected observation");
        };
        let contents: Vec<_> = obs.results.iter().map(|r| r.content.as_str()).collect();
        assert_eq!(contents, vec!["A: 12", "B: 7", "C: 9"]);

        let finish = state.last_step().and_then(AgentStep::as_finish).unwrap();
        let answer = finish.response_text().unwrap();
        assert!(!answer.trim().is_empty());
        assert!(answer.contains("min(") && answer.contains("B"));

        let prompts = mock.prompts();
        let joiner_prompt = &prompts[1][0].content;
        assert!(joiner_prompt.contains("Observation: B: 7"));
        assert!(joiner_prompt.contains("cheapest of A, B, C"));
    }

    #[tokio::test]
    async fn test_aggregating_wave_substitutes_results() {
        let mock = Arc::new(
            MockLlmClient::new()
                .with_reply(
                    "1. price({\"item\": \"A\"})\n\
                     2. price({\"item\": \"B\"})\n\
                     3. price({\"item\": \"C\"})\n\
                     4. cheapest({\"quotes\": \"$1; $2; ${3}\"})\n\
                     5. join()",
                )
                .with_reply("Thought: aggregation done.\nAction: Finish(B at 7)"),
        );
        let exec = executor(mock);
        let mut state = AgentState::new("cheapest of A, B, C", registry().schemas());

        let mut kinds = Vec::new();
        while let Some(step) = resolve_next_step(exec.as_ref(), &mut state, &NoStopPredicate)
            .await
            .unwrap()
        {
            kinds.push(kind(&step));
        }
        assert_eq!(
            kinds,
            vec!["continuation:3", "observation:3", "continuation:1", "observation:1", "finish"]
        );
        let AgentStep::Thought(Thought::Continuation(second)) = &state.steps()[2] else {
            panic!("expected second wave");
        };
        assert_eq!(second.tool_calls[0].arguments, "{\"quotes\": \"A: 12; B: 7; C: 9\"}");
        let AgentStep::Observation(obs) = &state.steps()[3] else {
            panic!("expected observation");
        };
        assert_eq!(obs.results[0].content, "B at 7");
    }

    #[tokio::test]
    async fn test_external_task_resumes_on_new_coordinator() {
        let store = Arc::new(MemoryRunStore::new());
        let approve = FunctionTool {
            name: "approve".to_string(),
            description: "Ask a human to approve a quote".to_string(),
            parameters: serde_json::json!({"type": "object"}),
        };
        let run = store
            .create_run(Run::new("buy B if approved", vec![approve]))
            .await
            .unwrap();

        let planner = Arc::new(MockLlmClient::new().with_reply(
            "1. price({\"item\": \"B\"})\n2. approve({\"quote\": \"$1\"})\n3. join()",
        ));
        RunCoordinator::new(store.clone(), executor(planner), registry(), 32)
            .advance(&run.id)
            .await
            .unwrap();
        assert_eq!(
            store.get_run_status(&run.id).await.unwrap(),
            RunStatus::RequiresAction
        );

        let record = store.last_step(&run.id).await.unwrap().unwrap();
        let pending = &record.tool_calls().unwrap()[0];
        assert_eq!(pending.name, "approve");
        assert_eq!(pending.arguments, "{\"quote\": \"B: 7\"}");
        let graph = record.payload.as_ref().and_then(|p| p.task_graph()).unwrap();
        assert_eq!(graph.tasks[0].result.as_deref(), Some("B: 7"));

        let service = RunService::new(store.clone(), Arc::new(TaskScheduler::new(1)));
        service
            .submit_tool_outputs(&run.id, vec![ToolResult::new(pending.id.clone(), "approved")])
            .await
            .unwrap();

        let joiner = Arc::new(
            MockLlmClient::new().with_reply("Thought: approved.\nAction: Finish(bought B for 7)"),
        );
        RunCoordinator::new(store.clone(), executor(joiner.clone()), registry(), 32)
            .advance(&run.id)
            .await
            .unwrap();

        let run = store.get_run(&run.id).await.unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        let prompts = joiner.prompts();
        assert!(prompts[0][0].content.contains("Observation: approved"));
        assert!(prompts[0][0].content.contains("Observation: B: 7"));

        let records = store.list_steps(&run.id, SortOrder::Asc, Page::all()).await.unwrap();
        let StepRecordKind::MessageCreation { message_id } = &records.last().unwrap().kind else {
            panic!("expected final message");
        };
        assert_eq!(store.get_message(message_id).await.unwrap(), "bought B for 7");
        let final_graph = records
            .last()
            .and_then(|r| r.payload.as_ref())
            .and_then(|p| p.task_graph())
            .unwrap();
        assert!(final_graph.joiner_result.is_some());
    }

    #[tokio::test]
    async fn test_cancelling_short_circuits_planner() {
        let store = Arc::new(MemoryRunStore::new());
        let run = store.create_run(Run::new("q", vec![])).await.unwrap();
        store.set_run_status(&run.id, RunStatus::Cancelling).await.unwrap();

        let mock = Arc::new(MockLlmClient::new().with_reply("1. price({\"item\": \"A\"})\n2. join()"));
        let exec = executor(mock.clone());
        let stop = RunStatusStopPredicate::new(store, run.id.clone());
        let mut state = AgentState::new("q", registry().schemas());

        let step = resolve_next_step(exec.as_ref(), &mut state, &stop)
            .await
            .unwrap()
            .unwrap();
        assert!(step.as_finish().unwrap().is_cancelled());
        assert_eq!(mock.remaining(), 1);
    }
}
