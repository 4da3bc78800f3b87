//! `reactor-engine` binary: loads configuration, wires every adapter that
//! has a configured secret, assembles the orchestrator services, and serves
//! HTTP.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use reactor_adapters::{GraphQlTicketClient, RestMessagingClient, RestScmClient};
use reactor_core::{CancellationRegistry, EventBus, InMemoryTtlStore, ReactorConfig, Stores};
use reactor_observability::{init_logging, ProcessKind};
use reactor_orchestrator::default_nodes;
use reactor_providers::{AnthropicClient, FallbackLlmClient, LLMClient, OpenAiCompatibleClient, PricingTable};
use reactor_server::{serve, AppState};

#[derive(Parser, Debug)]
#[command(name = "reactor-engine")]
#[command(about = "Ticket-driven AI task automation orchestrator")]
struct Cli {
    /// Overrides REACTOR_BIND_ADDR / the config default.
    #[arg(long)]
    bind_addr: Option<String>,

    /// Overrides REACTOR_STATE_DIR / the config default.
    #[arg(long)]
    state_dir: Option<String>,

    /// Number of background workers draining the run queue.
    #[arg(long, default_value_t = 4)]
    workers: usize,

    /// Depth of the in-process run queue before `enqueue` starts rejecting.
    #[arg(long, default_value_t = 256)]
    queue_capacity: usize,

    /// Base URL for the source-hosting REST API (e.g. a GitHub-compatible host).
    #[arg(long, env = "SCM_API_BASE", default_value = "https://api.github.com")]
    scm_api_base: String,

    /// Base URL for the ticket system's GraphQL endpoint.
    #[arg(long, env = "TICKET_API_BASE", default_value = "https://api.monday.com/v2")]
    ticket_api_base: String,

    /// Base URL for the messaging system's REST API.
    #[arg(long, env = "MESSAGING_API_BASE", default_value = "https://slack.com/api")]
    messaging_api_base: String,

    /// Base URL for an OpenAI-compatible completions endpoint, used when
    /// `OPENAI_API_KEY` is set and no Anthropic key takes priority.
    #[arg(long, env = "OPENAI_API_BASE", default_value = "https://api.openai.com/v1")]
    openai_api_base: String,

    /// Base URL for the Anthropic Messages API.
    #[arg(long, env = "ANTHROPIC_API_BASE", default_value = "https://api.anthropic.com")]
    anthropic_api_base: String,

    #[arg(long, env = "ANTHROPIC_MODEL", default_value = "claude-sonnet")]
    anthropic_model: String,

    #[arg(long, env = "OPENAI_MODEL", default_value = "gpt-4o-mini")]
    openai_model: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(ProcessKind::Engine)?;

    let mut config = ReactorConfig::from_env()?;
    if let Some(bind_addr) = cli.bind_addr {
        config.bind_addr = bind_addr;
    }
    if let Some(state_dir) = cli.state_dir {
        config.state_dir = std::path::PathBuf::from(state_dir);
    }
    let config = Arc::new(config);

    std::fs::create_dir_all(&config.state_dir)
        .with_context(|| format!("failed to create state dir {}", config.state_dir.display()))?;
    let stores = Stores::open(&config.state_dir)
        .await
        .context("failed to open state stores")?;

    let events = EventBus::new();
    let cancellation = CancellationRegistry::new();
    let idempotency: Arc<dyn reactor_core::IdempotencyStore> = Arc::new(InMemoryTtlStore::new());
    let queue = reactor_core::RunQueue::new(cli.queue_capacity);

    let scm = Arc::new(RestScmClient::new(
        cli.scm_api_base,
        config.scm_token.as_ref().map(|s| s.expose().to_string()).unwrap_or_default(),
    ));
    let ticket: Option<Arc<dyn reactor_adapters::TicketSystemClient>> = Some(Arc::new(GraphQlTicketClient::new(
        cli.ticket_api_base,
        config.monday_signing_secret.as_ref().map(|s| s.expose().to_string()).unwrap_or_default(),
    )));
    let messaging: Option<Arc<dyn reactor_adapters::MessagingClient>> = config.messaging_token.as_ref().map(|token| {
        Arc::new(RestMessagingClient::new(cli.messaging_api_base, token.expose().to_string()))
            as Arc<dyn reactor_adapters::MessagingClient>
    });

    let llm = build_llm_client(&config, &cli.anthropic_api_base, &cli.anthropic_model, &cli.openai_api_base, &cli.openai_model);
    let pricing = Arc::new(PricingTable::with_defaults());

    let nodes = default_nodes(llm.clone(), pricing, scm, ticket.clone(), messaging.clone());

    let state = AppState::new(
        stores,
        config.clone(),
        events,
        cancellation,
        idempotency,
        queue,
        nodes,
        ticket,
        llm,
        messaging,
        cli.workers,
    );

    let addr: SocketAddr = config.bind_addr.parse().context("invalid REACTOR_BIND_ADDR / --bind-addr")?;
    tracing::info!(%addr, state_dir = %config.state_dir.display(), "starting reactor-engine");
    serve(addr, state).await?;
    Ok(())
}

/// Anthropic takes priority over a generic OpenAI-compatible provider when
/// both are configured, with the other wired in as the fallback (§9
/// "multi-provider" design note). No key configured means no LLM at all;
/// the black-box nodes then complete as no-ops rather than failing startup.
fn build_llm_client(
    config: &ReactorConfig,
    anthropic_api_base: &str,
    anthropic_model: &str,
    openai_api_base: &str,
    openai_model: &str,
) -> Option<Arc<dyn LLMClient>> {
    let anthropic = config
        .anthropic_api_key
        .as_ref()
        .map(|key| Box::new(AnthropicClient::new(anthropic_api_base, key.expose(), anthropic_model)) as Box<dyn LLMClient>);
    let openai = config
        .openai_api_key
        .as_ref()
        .map(|key| Box::new(OpenAiCompatibleClient::new(openai_api_base, key.expose(), openai_model)) as Box<dyn LLMClient>);

    match (anthropic, openai) {
        (Some(primary), fallback) => Some(Arc::new(FallbackLlmClient::new(primary, fallback)) as Arc<dyn LLMClient>),
        (None, Some(primary)) => Some(Arc::new(FallbackLlmClient::new(primary, None)) as Arc<dyn LLMClient>),
        (None, None) => None,
    }
}
