//! Hive 演示入口
//!
//! 用脚本化的 LLM 跑一次 "A、B、C 哪个最便宜" 的 DAG 运行：
//! 调度器 + 协调器 + 内存存储完整走一遍，最后打印持久化的步骤记录。

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use hive::config::{load_config, AppConfig, Strategy};
use hive::core::{RunCoordinator, RunService, TaskScheduler};
use hive::llm::MockLlmClient;
use hive::react::build_executor;
use hive::store::{MemoryRunStore, Page, RunStore, SortOrder, StepRecordKind};
use hive::tools::{parameters_schema_for, Tool, ToolExecutor, ToolRegistry, ToolWorker};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

#[derive(Deserialize, JsonSchema)]
struct PriceArgs {
    /// 商品名
    item: String,
}

/// 查询单个商品价格（固定价目表）
struct PriceTool;

#[async_trait]
impl Tool for PriceTool {
    fn name(&self) -> &str {
        "price"
    }

    fn description(&self) -> &str {
        "Look up the price of one item. Returns `item: price`."
    }

    fn parameters_schema(&self) -> Value {
        parameters_schema_for::<PriceArgs>()
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let args: PriceArgs = serde_json::from_value(args).map_err(|e| e.to_string())?;
        let price = match args.item.as_str() {
            "A" => 12,
            "B" => 7,
            "C" => 9,
            other => return Err(format!("unknown item: {other}")),
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok(format!("{}: {}", args.item, price))
    }
}

#[derive(Deserialize, JsonSchema)]
struct CheapestArgs {
    /// 以分号分隔的 `item: price` 列表
    quotes: String,
}

/// 从报价列表中选出最低价
struct CheapestTool;

#[async_trait]
impl Tool for CheapestTool {
    fn name(&self) -> &str {
        "cheapest"
    }

    fn description(&self) -> &str {
        "Pick the cheapest item from `item: price` quotes separated by `;`."
    }

    fn parameters_schema(&self) -> Value {
        parameters_schema_for::<CheapestArgs>()
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let args: CheapestArgs = serde_json::from_value(args).map_err(|e| e.to_string())?;
        args.quotes
            .split(';')
            .filter_map(|quote| {
                let (item, price) = quote.split_once(':')?;
                Some((item.trim().to_string(), price.trim().parse::<u32>().ok()?))
            })
            .min_by_key(|(_, price)| *price)
            .map(|(item, price)| format!("{item} at {price}"))
            .ok_or_else(|| "no valid quotes".to_string())
    }
}

/// 规划与汇总的脚本回复
fn scripted_llm() -> MockLlmClient {
    MockLlmClient::new()
        .with_reply(
            "Thought: look up every price in parallel, then compare.\n\
             1. price({\"item\": \"A\"})\n\
             2. price({\"item\": \"B\"})\n\
             3. price({\"item\": \"C\"})\n\
             4. cheapest({\"quotes\": \"$1; $2; ${3}\"})\n\
             5. join()\n\
             <END_OF_PLAN>",
        )
        .with_reply(
            "Thought: the aggregation picked B at 7, lower than A (12) and C (9).\n\
             Action: Finish(B is the cheapest, at 7.)",
        )
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    hive::observability::init();

    let config = load_config(None).unwrap_or_else(|e| {
        tracing::warn!("Failed to load config, using defaults: {}", e);
        AppConfig::default()
    });
    let mut engine = config.engine.clone();
    if engine.strategy != Strategy::LlmCompiler {
        tracing::info!(configured = ?engine.strategy, "demo script is written for the DAG strategy");
        engine.strategy = Strategy::LlmCompiler;
    }

    let registry = Arc::new(
        ToolRegistry::new()
            .with_tool(PriceTool)
            .with_tool(CheapestTool),
    );
    let worker = Arc::new(ToolWorker::new(
        Arc::new(ToolExecutor::new(Arc::clone(&registry), config.tools.timeout_secs)),
        config.tools.max_concurrency,
    ));
    let executor = build_executor(&engine, Arc::new(scripted_llm()), worker);

    let store: Arc<dyn RunStore> = Arc::new(MemoryRunStore::new());
    let scheduler = Arc::new(TaskScheduler::new(config.scheduler.consumers));
    let coordinator = Arc::new(RunCoordinator::new(
        Arc::clone(&store),
        executor,
        registry,
        engine.max_steps,
    ));
    scheduler.register_handler(coordinator).await;
    scheduler.start().await;

    let service = RunService::new(Arc::clone(&store), Arc::clone(&scheduler));
    let run = service
        .create_run("Which is the cheapest of A, B, C?", vec![])
        .await
        .context("Failed to create run")?;

    let run = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let run = service.get_run(&run.id).await?;
            if run.finished_at.is_some() {
                return Ok::<_, anyhow::Error>(run);
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .context("Run did not finish in time")??;

    println!("run {} finished: {:?}", run.id, run.status);
    for record in store.list_steps(&run.id, SortOrder::Asc, Page::all()).await? {
        match &record.kind {
            StepRecordKind::ToolCalls { tool_calls } => {
                println!("#{} tool_calls [{:?}]", record.seq, record.status);
                for call in tool_calls {
                    println!(
                        "    {}({}) -> {}",
                        call.name,
                        call.arguments,
                        call.output.as_deref().unwrap_or("<pending>")
                    );
                }
            }
            StepRecordKind::MessageCreation { message_id } => {
                let text = store.get_message(message_id).await?;
                println!("#{} message: {}", record.seq, text);
            }
        }
    }

    scheduler.terminate().await;
    Ok(())
}
