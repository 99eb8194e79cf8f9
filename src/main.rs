//! `drmcpd`: the deep-research MCP broker binary. Reads configuration from
//! the process environment, wires the job engine/orchestrator/hybrid index,
//! and serves either stdio or streamable-HTTP depending on `--stdio`.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use deepresearch_runtime::auth::{Authenticator, RateLimiter};
use deepresearch_runtime::config::Config;
use deepresearch_runtime::embedding::{EmbeddingProvider, HttpEmbeddingProvider, NoOpEmbeddingProvider};
use deepresearch_runtime::jobs::{JobEngine, JobEventBus, JobWorker};
use deepresearch_runtime::llm::{HttpLlmGatewayClient, LlmGatewayClient, ModelCatalog};
use deepresearch_runtime::mcp::registry::{PromptRegistry, ResourceRegistry, ToolRegistry};
use deepresearch_runtime::mcp::tools::{register_all, AppState, ToolCatalogCell};
use deepresearch_runtime::mcp::{Dispatcher, ServerInfo};
use deepresearch_runtime::metrics::MetricsRegistry;
use deepresearch_runtime::orchestrator::ResearchOrchestrator;
use deepresearch_runtime::retrieval::{Bm25Params, FusionWeights, HybridIndex};
use deepresearch_runtime::storage::open_with_fallback;
use deepresearch_runtime::transport::{stdio, TransportState};
use deepresearch_runtime::types::UsageCounters;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser, Debug)]
#[command(name = "drmcpd", version = VERSION, about = "MCP broker for deep-research workloads")]
struct Cli {
    /// Speak newline-delimited JSON-RPC over stdin/stdout instead of serving HTTP.
    #[arg(long)]
    stdio: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match Config::from_env() {
        Ok(cfg) => Arc::new(cfg),
        Err(err) => {
            eprintln!("configuration error: {err}");
            std::process::exit(1);
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_new(&config.log_level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let (storage, degraded) = open_with_fallback(&config.db_path);
    if degraded {
        tracing::warn!("storage gateway is running in degraded (in-memory) mode");
    }

    let embedding: Arc<dyn EmbeddingProvider> = match &config.embedding_endpoint {
        Some(endpoint) => Arc::new(HttpEmbeddingProvider::new(endpoint.clone(), config.vector_dim)),
        None => Arc::new(NoOpEmbeddingProvider::new(config.vector_dim)),
    };

    let llm_client: Arc<dyn LlmGatewayClient> = match HttpLlmGatewayClient::from_config(&config) {
        Some(client) => Arc::new(client),
        None => {
            tracing::warn!("no LLM gateway configured; research jobs will fail until one is set");
            Arc::new(deepresearch_runtime::llm::HttpLlmGatewayClient::unconfigured())
        }
    };
    let catalog = Arc::new(ModelCatalog::new(llm_client.clone(), Duration::from_secs(300), Vec::new()));
    let usage = Arc::new(UsageCounters::new());

    let index = Arc::new(HybridIndex::new(
        storage.clone(),
        embedding.clone(),
        Bm25Params::default(),
        FusionWeights::default(),
        None,
    ));
    if let Err(err) = index.rebuild().await {
        tracing::warn!(error = %err, "failed to rebuild hybrid index from storage on startup");
    }

    let orchestrator = Arc::new(ResearchOrchestrator::new(
        llm_client.clone(),
        catalog.clone(),
        storage.clone(),
        embedding.clone(),
        config.research_parallelism,
        512,
        Vec::new(),
        usage.clone(),
    ));

    let event_bus = Arc::new(JobEventBus::new());
    let jobs = Arc::new(JobEngine::new(storage.clone(), event_bus.clone(), config.lease_timeout));

    let app_state = AppState {
        jobs: jobs.clone(),
        orchestrator: orchestrator.clone(),
        storage: storage.clone(),
        index: index.clone(),
        catalog: catalog.clone(),
        mode: config.mode,
    };

    let tool_catalog = ToolCatalogCell::new();
    let mut tools = ToolRegistry::new(config.mode, "agent");
    register_all(&mut tools, app_state.clone(), tool_catalog.clone());
    tool_catalog.set(tools.list_descriptors());

    let dispatcher = Arc::new(Dispatcher {
        tools: Arc::new(tools),
        prompts: Arc::new(PromptRegistry::new()),
        resources: Arc::new(ResourceRegistry::new()),
        server_info: ServerInfo { name: "deepresearch-mcpd", version: VERSION },
    });

    for n in 0..config.worker_concurrency {
        let worker = Arc::new(JobWorker::new(
            jobs.clone(),
            orchestrator.clone(),
            index.clone(),
            format!("worker-{n}"),
        ));
        tokio::spawn(worker.run());
    }

    if cli.stdio {
        if let Err(err) = stdio::run(dispatcher).await {
            tracing::error!(error = %err, "stdio transport terminated");
            std::process::exit(1);
        }
        return;
    }

    let metrics = Arc::new(MetricsRegistry::new(storage.clone(), usage.clone()));
    metrics.set_embedder_ready(embedding.is_ready());

    let sessions = Arc::new(deepresearch_runtime::transport::SessionStore::new());
    let auth = Arc::new(Authenticator::from_config(&config));
    let rate_limiter = Arc::new(RateLimiter::new(config.rate_limit_per_min));

    let transport_state = TransportState::new(dispatcher, sessions, auth, rate_limiter, metrics, app_state, config.clone());
    let router = deepresearch_runtime::transport::router(transport_state);

    let addr = format!("{}:{}", config.bind_addr, config.port);
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(err) => {
            tracing::error!(error = %err, addr, "failed to bind HTTP listener");
            std::process::exit(1);
        }
    };
    tracing::info!(addr, "deepresearch-mcpd listening");

    if let Err(err) = axum::serve(
        listener,
        router.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await
    {
        tracing::error!(error = %err, "HTTP server terminated");
        std::process::exit(1);
    }
}
