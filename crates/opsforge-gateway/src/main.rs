use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{info, warn};

mod app;
mod http;

use opsforge_agent::backend::RegistryBackend;
use opsforge_agent::dispatcher::Dispatcher;
use opsforge_agent::executor::ExecutorConfig;
use opsforge_channels::platform::{ImPlatform, MessageHandlers};
use opsforge_channels::{feishu::FeishuAdapter, slack::SlackAdapter};
use opsforge_core::config::OpsforgeConfig;
use opsforge_memory::conversations::ConversationLog;
use opsforge_memory::extract::MemoryExtractor;
use opsforge_memory::MemoryEngine;
use opsforge_provider::embedding::{EmbeddingProvider, OpenAiEmbeddings};
use opsforge_runner::{ChannelBackendFactory, EventBroadcaster, TaskRunner, TaskStore};
use opsforge_sandbox::manager::{SandboxManager, SandboxManagerConfig};
use opsforge_tools::builtin::standard_registry;
use opsforge_tools::policy::ToolPolicy;

#[derive(Parser)]
#[command(name = "opsforge", about = "AI DevOps agent for team chat")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the gateway: chat channel, task runner, HTTP/SSE surface.
    Serve {
        /// Path to opsforge.toml (default: ./opsforge.toml).
        #[arg(long)]
        config: Option<String>,
    },
    /// Run a stdio tool-channel endpoint rooted at a directory.
    ToolServer {
        #[arg(long)]
        root: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Command::ToolServer { root }) => run_tool_server(root).await,
        Some(Command::Serve { config }) => run_serve(config.as_deref()).await,
        None => run_serve(None).await,
    }
}

/// stdout carries the JSON-RPC channel, so logs go to stderr only.
async fn run_tool_server(root: PathBuf) -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let registry = standard_registry(root);
    opsforge_tools::serve::run_stdio_server(registry, ToolPolicy::full(), "opsforge-sandbox")
        .await?;
    Ok(())
}

async fn run_serve(config_path: Option<&str>) -> anyhow::Result<()> {
    let config = OpsforgeConfig::load(config_path).unwrap_or_else(|e| {
        eprintln!("config load failed ({e}), using defaults");
        let mut fallback = OpsforgeConfig::default();
        fallback.apply_recognized_env();
        fallback
    });

    init_tracing(&config);

    let data_dir = PathBuf::from(&config.memory.data_dir);
    let memory_dir = data_dir.join("memory");
    std::fs::create_dir_all(&memory_dir)?;

    // AI provider + optional embedding provider.
    let provider = opsforge_provider::build_provider(
        &config.ai.provider,
        config.ai.api_key.clone(),
        config.ai.base_url.clone(),
    )?;
    let embedder: Option<Arc<dyn EmbeddingProvider>> = if config.ai.provider == "openai" {
        Some(Arc::new(OpenAiEmbeddings::new(
            config.ai.api_key.clone(),
            config.ai.base_url.clone(),
        )))
    } else {
        None
    };

    // Memory engine + conversation log + export/backfill loops.
    let conn = rusqlite::Connection::open(memory_dir.join("index.sqlite"))?;
    let memory = Arc::new(MemoryEngine::new(conn, embedder)?);
    let conversations = Arc::new(ConversationLog::new(memory_dir.join("conversations"))?);
    opsforge_memory::export::spawn_export_loop(Arc::clone(&memory), memory_dir.clone());
    {
        let memory = Arc::clone(&memory);
        tokio::spawn(async move {
            if let Err(e) = memory.backfill_embeddings().await {
                warn!(error = %e, "embedding backfill failed");
            }
        });
    }

    let extractor = Arc::new(MemoryExtractor::new(
        Arc::clone(&provider),
        config.ai.memory_model.clone(),
        config.memory.extract_threshold,
    ));

    // Sandbox + runner.
    let sandboxes = Arc::new(SandboxManager::new(SandboxManagerConfig {
        base_dir: PathBuf::from(&config.sandbox.base_dir),
        project_path: PathBuf::from(&config.project.path),
        setup_command: config.sandbox.setup_command.clone(),
        auto_create_pr: config.sandbox.auto_create_pr,
        pr_draft: config.sandbox.pr_draft,
        github_token: config.sandbox.github_token.clone(),
        gitlab_token: config.sandbox.gitlab_token.clone(),
    }));

    let store = Arc::new(TaskStore::open(data_dir.join("tasks.json"))?);
    let tool_server_cmd = std::env::current_exe()?
        .to_string_lossy()
        .to_string();
    let runner = Arc::new(TaskRunner::new(
        store,
        EventBroadcaster::new(),
        Arc::clone(&provider),
        ExecutorConfig {
            model: config.ai.task_model.clone(),
            ..Default::default()
        },
        sandboxes,
        Arc::clone(&memory),
        Arc::clone(&extractor),
        Arc::new(ChannelBackendFactory { tool_server_cmd }),
        config.project.path.clone(),
    ));

    // Chat platform. Built independently from the runner; the platform is
    // injected afterwards so neither owns the other's lifetime.
    let feishu = config
        .im
        .feishu
        .clone()
        .filter(|_| config.im.platform == "feishu")
        .map(|c| Arc::new(FeishuAdapter::new(c)));
    let slack = config
        .im
        .slack
        .clone()
        .filter(|_| config.im.platform == "slack")
        .map(|c| Arc::new(SlackAdapter::new(c)));

    let platform: Option<Arc<dyn ImPlatform>> = match (&feishu, &slack) {
        (Some(f), _) => Some(f.clone() as Arc<dyn ImPlatform>),
        (None, Some(s)) => Some(s.clone() as Arc<dyn ImPlatform>),
        _ => None,
    };

    let dispatcher = if let Some(platform) = platform.clone() {
        runner.set_im_platform(platform.clone());

        let read_only_tools = Arc::new(RegistryBackend::new(
            Arc::new(standard_registry(PathBuf::from(&config.project.path))),
            ToolPolicy::read_only(),
        ));
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&provider),
            config.ai.dispatcher_model.clone(),
            config.dispatcher.clone(),
            config.project.path.clone(),
            Arc::clone(&memory),
            Arc::clone(&conversations),
            Arc::clone(&extractor),
            read_only_tools,
            platform.clone(),
            runner.clone(),
        ));

        let handlers = {
            let dispatcher = dispatcher.clone();
            let passive = dispatcher.clone();
            MessageHandlers {
                on_message: Arc::new(move |msg| {
                    let dispatcher = dispatcher.clone();
                    tokio::spawn(async move {
                        dispatcher.dispatch(msg).await;
                    });
                }),
                on_passive_message: Arc::new(move |msg| {
                    passive.record_message(&msg);
                }),
            }
        };

        if let Err(e) = platform.connect(handlers).await {
            warn!(error = %e, "chat platform connect failed; continuing without chat");
        }
        Some(dispatcher)
    } else {
        info!("no chat platform configured; HTTP surface only");
        None
    };

    let state = Arc::new(app::AppState {
        config: config.clone(),
        runner,
        dispatcher,
        feishu,
        slack,
        watchers: dashmap::DashMap::new(),
    });

    let router = app::build_router(state);
    let addr = format!("0.0.0.0:{}", config.server.port);
    info!(addr = %addr, "opsforge gateway listening");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, router).await?;
    Ok(())
}

fn init_tracing(config: &OpsforgeConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.log.level.clone().into());

    match &config.log.file {
        Some(path) => {
            let path = PathBuf::from(path);
            let dir = path.parent().unwrap_or(std::path::Path::new(".")).to_path_buf();
            let file = path
                .file_name()
                .map(|f| f.to_string_lossy().to_string())
                .unwrap_or_else(|| "opsforge.log".to_string());
            let appender = tracing_appender::rolling::never(dir, file);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(appender)
                .with_ansi(false)
                .init();
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }
}
