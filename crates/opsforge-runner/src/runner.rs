//! Serial FIFO task runner.
//!
//! Exactly one executor session runs at a time. Each task gets a sandbox
//! worktree, a tool channel scoped to it, and a cancellation token; every
//! exit path releases the sandbox and the channel config.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use opsforge_agent::backend::{ChannelBackend, ToolBackend};
use opsforge_agent::dispatcher::{TaskSink, TaskSpec};
use opsforge_agent::executor::{Executor, ExecutorConfig, OutputChunk};
use opsforge_agent::prompt::executor_system_prompt;
use opsforge_channels::platform::{send_with_retry, CardContent, ImPlatform};
use opsforge_core::types::{Task, TaskMetadata, TaskStatus, TaskSummary};
use opsforge_memory::extract::MemoryExtractor;
use opsforge_memory::MemoryEngine;
use opsforge_provider::AiProvider;
use opsforge_sandbox::manager::SandboxManager;
use opsforge_sandbox::{git, Sandbox};
use opsforge_tools::channel::{ChannelConfig, EndpointConfig, ToolChannel};

use crate::events::{EventBroadcaster, TaskEventKind};
use crate::store::TaskStore;

/// Minimum spacing between task_updated broadcasts while output streams.
const UPDATE_THROTTLE: Duration = Duration::from_secs(1);

/// Builds the tool backend for one sandbox. The production factory spawns
/// the out-of-process tool server; tests inject an in-process registry.
#[async_trait]
pub trait BackendFactory: Send + Sync {
    async fn create(&self, sandbox: &Sandbox) -> Result<Arc<dyn ToolBackend>, String>;

    /// Remove anything `create` left on disk. Called on every exit path.
    fn cleanup(&self, _sandbox: &Sandbox) {}
}

/// Production factory: writes the endpoint config file next to the worktree
/// and connects over stdio JSON-RPC.
pub struct ChannelBackendFactory {
    /// Binary to spawn per endpoint (normally this executable).
    pub tool_server_cmd: String,
}

impl ChannelBackendFactory {
    fn config_path(sandbox: &Sandbox) -> PathBuf {
        sandbox
            .worktree_path
            .with_extension("toolchannel.json")
    }
}

#[async_trait]
impl BackendFactory for ChannelBackendFactory {
    async fn create(&self, sandbox: &Sandbox) -> Result<Arc<dyn ToolBackend>, String> {
        let config = ChannelConfig {
            endpoints: vec![EndpointConfig {
                name: "sandbox".to_string(),
                command: self.tool_server_cmd.clone(),
                args: vec![
                    "tool-server".to_string(),
                    "--root".to_string(),
                    sandbox.worktree_path.to_string_lossy().to_string(),
                ],
            }],
        };
        let path = Self::config_path(sandbox);
        config.save(&path).map_err(|e| e.to_string())?;

        let channel = ToolChannel::connect(&config).await.map_err(|e| e.to_string())?;
        Ok(Arc::new(ChannelBackend::new(channel)))
    }

    fn cleanup(&self, sandbox: &Sandbox) {
        let path = Self::config_path(sandbox);
        if path.exists() {
            let _ = std::fs::remove_file(path);
        }
    }
}

pub struct TaskRunner {
    inner: Arc<RunnerInner>,
}

pub struct RunnerInner {
    store: Arc<TaskStore>,
    broadcaster: EventBroadcaster,
    provider: Arc<dyn AiProvider>,
    executor_config: ExecutorConfig,
    sandboxes: Arc<SandboxManager>,
    memory: Arc<MemoryEngine>,
    extractor: Arc<MemoryExtractor>,
    backend_factory: Arc<dyn BackendFactory>,
    project_path: String,
    /// Injected after construction; the runner never owns the platform.
    platform: Mutex<Option<Arc<dyn ImPlatform>>>,
    queue_tx: mpsc::UnboundedSender<String>,
    cancellations: DashMap<String, CancellationToken>,
}

impl TaskRunner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<TaskStore>,
        broadcaster: EventBroadcaster,
        provider: Arc<dyn AiProvider>,
        executor_config: ExecutorConfig,
        sandboxes: Arc<SandboxManager>,
        memory: Arc<MemoryEngine>,
        extractor: Arc<MemoryExtractor>,
        backend_factory: Arc<dyn BackendFactory>,
        project_path: String,
    ) -> Self {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(RunnerInner {
            store,
            broadcaster,
            provider,
            executor_config,
            sandboxes,
            memory,
            extractor,
            backend_factory,
            project_path,
            platform: Mutex::new(None),
            queue_tx,
            cancellations: DashMap::new(),
        });
        inner.clone().spawn_worker(queue_rx);
        Self { inner }
    }

    /// Late platform injection (the platform and runner are built
    /// independently; see the construction notes in the gateway).
    pub fn set_im_platform(&self, platform: Arc<dyn ImPlatform>) {
        *self.inner.platform.lock().unwrap() = Some(platform);
    }

    pub fn store(&self) -> &Arc<TaskStore> {
        &self.inner.store
    }

    pub fn broadcaster(&self) -> &EventBroadcaster {
        &self.inner.broadcaster
    }

    /// Enqueue a task; returns its id immediately.
    pub fn run_task(
        &self,
        prompt: String,
        metadata: TaskMetadata,
        created_by: String,
    ) -> String {
        let mut task = Task::new(prompt, created_by);
        task.metadata = metadata;
        let id = task.id.to_string();

        self.inner.store.insert(task.clone());
        self.inner
            .broadcaster
            .publish(TaskEventKind::TaskCreated, task.clone());
        self.inner
            .extractor
            .on_task_created(&self.inner.memory, &task, &self.inner.project_path);

        if self.inner.queue_tx.send(id.clone()).is_err() {
            error!(task_id = %id, "task queue closed");
        }
        id
    }

    /// Best-effort cancellation: aborts the in-flight provider call (when
    /// one is running) and marks a non-terminal task failed.
    pub fn stop_task(&self, task_id: &str) -> bool {
        let had_token = match self.inner.cancellations.remove(task_id) {
            Some((_, token)) => {
                token.cancel();
                true
            }
            None => false,
        };

        let marked = self
            .inner
            .store
            .update(task_id, |task| {
                if task.status.is_terminal() {
                    return false;
                }
                if task.transition(TaskStatus::Failed).is_ok() {
                    task.error = Some("stopped by user".to_string());
                    return true;
                }
                false
            })
            .unwrap_or(false);

        if marked {
            if let Some(task) = self.inner.store.get(task_id) {
                self.inner.broadcaster.publish(TaskEventKind::TaskFailed, task);
            }
        }
        had_token || marked
    }
}

#[async_trait]
impl TaskSink for TaskRunner {
    async fn submit(&self, spec: TaskSpec) -> Result<String, String> {
        let metadata = TaskMetadata {
            chat_id: spec.chat_id,
            message_id: None,
            card_message_id: spec.card_message_id,
            title: Some(spec.title),
        };
        Ok(self.run_task(spec.description, metadata, spec.created_by))
    }
}

impl RunnerInner {
    fn spawn_worker(self: Arc<Self>, mut queue_rx: mpsc::UnboundedReceiver<String>) {
        tokio::spawn(async move {
            // Strictly serial: the next task starts only after this one has
            // fully released its sandbox.
            while let Some(task_id) = queue_rx.recv().await {
                self.run_one(&task_id).await;
            }
        });
    }

    async fn run_one(self: &Arc<Self>, task_id: &str) {
        let Some(task) = self.store.get(task_id) else {
            warn!(task_id, "queued task no longer in store");
            return;
        };
        if task.status != TaskStatus::Pending {
            // Stopped while still queued.
            return;
        }

        if self.store.transition(task_id, TaskStatus::Running).is_err() {
            return;
        }
        self.broadcast_state(task_id, TaskEventKind::TaskUpdated);
        info!(task_id, "task started");

        let title = task
            .metadata
            .title
            .clone()
            .unwrap_or_else(|| "devops task".to_string());

        // Sandbox creation failures fail the task outright.
        let sandbox = match self.sandboxes.create(task_id, &title).await {
            Ok(sandbox) => sandbox,
            Err(e) => {
                self.fail_task(task_id, &format!("sandbox creation failed: {e}"))
                    .await;
                return;
            }
        };

        let outcome = self.run_in_sandbox(task_id, &task, &title, &sandbox).await;

        // Release everything regardless of outcome.
        self.backend_factory.cleanup(&sandbox);
        self.sandboxes.cleanup(&sandbox).await;
        self.cancellations.remove(task_id);

        match outcome {
            Ok(()) => {}
            Err(e) => self.fail_task(task_id, &e).await,
        }
    }

    async fn run_in_sandbox(
        self: &Arc<Self>,
        task_id: &str,
        task: &Task,
        title: &str,
        sandbox: &Sandbox,
    ) -> Result<(), String> {
        let backend = self
            .backend_factory
            .create(sandbox)
            .await
            .map_err(|e| format!("tool channel setup failed: {e}"))?;

        let tool_names: Vec<String> =
            backend.specs().iter().map(|s| s.name.clone()).collect();
        let worktree_note = format!(
            "Sandbox worktree: {} (branch {}, based on {}).",
            sandbox.worktree_path.display(),
            sandbox.branch_name,
            sandbox.base_branch
        );
        let system = executor_system_prompt(None, &worktree_note, &tool_names);

        let cancel = CancellationToken::new();
        self.cancellations
            .insert(task_id.to_string(), cancel.clone());

        // Output sink: accumulate text and broadcast throttled updates.
        let sink_store = Arc::clone(&self.store);
        let sink_broadcaster = self.broadcaster.clone();
        let sink_task_id = task_id.to_string();
        let last_update = Arc::new(Mutex::new(Instant::now() - UPDATE_THROTTLE));
        let sink = Arc::new(move |chunk: OutputChunk| {
            if let OutputChunk::Text(text) = chunk {
                let _ = sink_store.update(&sink_task_id, |t| t.output.push_str(&text));
                let mut last = last_update.lock().unwrap();
                if last.elapsed() >= UPDATE_THROTTLE {
                    *last = Instant::now();
                    if let Some(task) = sink_store.get(&sink_task_id) {
                        sink_broadcaster.publish(TaskEventKind::TaskUpdated, task);
                    }
                }
            }
        });

        let executor = Executor::new(
            Arc::clone(&self.provider),
            backend,
            self.executor_config.clone(),
        )
        .with_output(sink)
        .with_cancel(cancel);

        let final_text = executor
            .execute(&system, &task.prompt)
            .await
            .map_err(|e| e.to_string())?;

        // Summarize what changed.
        let modified_files = modified_files(&sandbox.worktree_path, &sandbox.base_branch).await;
        let summary = TaskSummary {
            modified_files,
            thinking: final_text.clone(),
        };

        // Push + PR; a finalize failure fails the task (the work is still
        // on the branch, but the contract is a delivered PR).
        let pr_url = self
            .sandboxes
            .finalize(sandbox, title, &task.prompt)
            .await
            .map_err(|e| format!("finalize failed: {e}"))?;

        self.store
            .update(task_id, |t| {
                t.output = final_text.clone();
                t.summary = Some(summary.clone());
                t.pr_url = pr_url.clone();
                let _ = t.transition(TaskStatus::Completed);
            })
            .map_err(|e| e.to_string())?;

        self.broadcast_state(task_id, TaskEventKind::TaskCompleted);
        info!(task_id, pr_url = ?pr_url, "task completed");

        if let Some(completed) = self.store.get(task_id) {
            self.extractor
                .on_task_completed(&self.memory, &completed, &self.project_path)
                .await;
            self.notify_chat(&completed, &card_for_completion(&completed))
                .await;
        }

        Ok(())
    }

    async fn fail_task(self: &Arc<Self>, task_id: &str, error_msg: &str) {
        error!(task_id, error = %error_msg, "task failed");
        let _ = self.store.update(task_id, |task| {
            let _ = task.transition(TaskStatus::Failed);
            task.error = Some(error_msg.to_string());
        });
        self.broadcast_state(task_id, TaskEventKind::TaskFailed);

        if let Some(task) = self.store.get(task_id) {
            self.extractor
                .on_task_failed(&self.memory, &task, &self.project_path);
            let card = CardContent::new(format!("**任务失败**\n{error_msg}"))
                .with_header("任务失败");
            self.notify_chat(&task, &card).await;
        }
    }

    fn broadcast_state(&self, task_id: &str, kind: TaskEventKind) {
        if let Some(task) = self.store.get(task_id) {
            self.broadcaster.publish(kind, task);
        }
    }

    async fn notify_chat(&self, task: &Task, card: &CardContent) {
        let platform = self.platform.lock().unwrap().clone();
        let Some(platform) = platform else {
            return;
        };
        let Some(chat_id) = task.metadata.chat_id.clone() else {
            return;
        };

        if let Some(card_id) = task.metadata.card_message_id.clone() {
            let updated = send_with_retry(|| platform.update_card(&card_id, card))
                .await
                .unwrap_or(false);
            if updated {
                return;
            }
        }
        send_with_retry(|| platform.send_card(&chat_id, card, None)).await;
    }
}

fn card_for_completion(task: &Task) -> CardContent {
    let title = task.metadata.title.as_deref().unwrap_or("task");
    let mut body = format!("**{title}** finished.");
    if let Some(url) = &task.pr_url {
        body.push_str(&format!("\nPull request: {url}"));
    }
    if let Some(summary) = &task.summary {
        if !summary.modified_files.is_empty() {
            body.push_str(&format!(
                "\nModified files: {}",
                summary.modified_files.join(", ")
            ));
        }
    }
    CardContent::new(body).with_header("Task completed")
}

/// Files changed on the sandbox branch relative to its base.
async fn modified_files(worktree: &Path, base_branch: &str) -> Vec<String> {
    let range = format!("{base_branch}..HEAD");
    match git::run_git(worktree, &["diff", "--name-only", &range]).await {
        Ok(out) if out.success => out
            .stdout
            .lines()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect(),
        _ => Vec::new(),
    }
}
