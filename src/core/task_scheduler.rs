//! 任务调度：单队列 + N 个消费者
//!
//! enqueue 投递任务；消费者按注册顺序找到第一个 accept 的处理器执行。
//! 处理器返回的错误只记录日志，不重试（重试由调用方重新投递）。

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// 调度任务；payload 由处理器自行解释（如 run id）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub task_id: String,
    pub category: String,
    pub payload: String,
}

impl Task {
    pub fn new(category: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            task_id: format!("task_{}", uuid::Uuid::new_v4().simple()),
            category: category.into(),
            payload: payload.into(),
        }
    }
}

/// 任务处理器
#[async_trait]
pub trait TaskHandler: Send + Sync {
    fn accept(&self, task: &Task) -> bool;

    async fn handle(&self, task: Task) -> anyhow::Result<()>;
}

/// 任务调度器
pub struct TaskScheduler {
    tx: mpsc::UnboundedSender<Task>,
    rx: Arc<Mutex<mpsc::UnboundedReceiver<Task>>>,
    handlers: Arc<RwLock<Vec<Arc<dyn TaskHandler>>>>,
    consumers: usize,
    cancel: CancellationToken,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl TaskScheduler {
    pub fn new(consumers: usize) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
            handlers: Arc::new(RwLock::new(Vec::new())),
            consumers: consumers.max(1),
            cancel: CancellationToken::new(),
            workers: Mutex::new(Vec::new()),
        }
    }

    /// 投递任务，返回任务 id
    pub fn enqueue(&self, task: Task) -> anyhow::Result<String> {
        if self.cancel.is_cancelled() {
            anyhow::bail!("scheduler terminated, task {} rejected", task.task_id);
        }
        let task_id = task.task_id.clone();
        tracing::debug!(task_id = %task_id, category = %task.category, "task enqueued");
        self.tx
            .send(task)
            .map_err(|e| anyhow::anyhow!("task queue closed: {}", e.0.task_id))?;
        Ok(task_id)
    }

    pub async fn register_handler(&self, handler: Arc<dyn TaskHandler>) {
        self.handlers.write().await.push(handler);
    }

    /// 启动消费者；重复调用无效果
    pub async fn start(&self) {
        let mut workers = self.workers.lock().await;
        if !workers.is_empty() {
            return;
        }
        for worker_id in 0..self.consumers {
            let rx = Arc::clone(&self.rx);
            let handlers = Arc::clone(&self.handlers);
            let cancel = self.cancel.clone();
            workers.push(tokio::spawn(consume(worker_id, rx, handlers, cancel)));
        }
        tracing::info!(consumers = self.consumers, "task scheduler started");
    }

    /// 停止消费者（等待正在处理的任务结束），返回尚未投递给处理器的任务
    pub async fn terminate(&self) -> Vec<Task> {
        self.cancel.cancel();
        let workers: Vec<_> = self.workers.lock().await.drain(..).collect();
        for worker in workers {
            if let Err(e) = worker.await {
                tracing::error!("task consumer panicked: {}", e);
            }
        }

        let mut rx = self.rx.lock().await;
        let mut pending = Vec::new();
        while let Ok(task) = rx.try_recv() {
            pending.push(task);
        }
        tracing::info!(pending = pending.len(), "task scheduler terminated");
        pending
    }
}

async fn consume(
    worker_id: usize,
    rx: Arc<Mutex<mpsc::UnboundedReceiver<Task>>>,
    handlers: Arc<RwLock<Vec<Arc<dyn TaskHandler>>>>,
    cancel: CancellationToken,
) {
    loop {
        let task = {
            let mut rx = rx.lock().await;
            tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                task = rx.recv() => task,
            }
        };
        let Some(task) = task else {
            break;
        };

        let handler = handlers
            .read()
            .await
            .iter()
            .find(|h| h.accept(&task))
            .cloned();
        let Some(handler) = handler else {
            tracing::warn!(task_id = %task.task_id, category = %task.category, "no handler accepts task");
            continue;
        };

        let task_id = task.task_id.clone();
        if let Err(e) = handler.handle(task).await {
            tracing::error!(worker_id, task_id = %task_id, "task failed: {:#}", e);
        }
    }
    tracing::debug!(worker_id, "task consumer stopped");
}
