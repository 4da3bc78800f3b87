//! Process-wide state, built once at startup and shared by `Arc`/clone into
//! every handler and background task (teacher's `AppState` pattern).

use std::sync::Arc;

use reactor_core::{CancellationRegistry, EventBus, IdempotencyStore, Ledger, ReactorConfig, RunQueue, Stores};
use reactor_orchestrator::{EventRouter, ReactivationGate, ValidationCoordinator, WorkflowDriver};

#[derive(Clone)]
pub struct AppState {
    pub stores: Arc<Stores>,
    pub config: Arc<ReactorConfig>,
    pub events: EventBus,
    pub cancellation: CancellationRegistry,
    pub ledger: Ledger,
    pub queue: RunQueue,
    pub idempotency: Arc<dyn IdempotencyStore>,
    pub gate: Arc<ReactivationGate>,
    pub validation: Arc<ValidationCoordinator>,
    pub event_router: Arc<EventRouter>,
    pub driver: Arc<WorkflowDriver>,
    pub worker_pool_size: usize,
}

#[allow(clippy::too_many_arguments)]
impl AppState {
    /// Assembles the full service graph. The binary is the only caller: it
    /// owns deciding which adapters/LLM clients exist based on configured
    /// secrets, then hands the finished graph here.
    pub fn new(
        stores: Arc<Stores>,
        config: Arc<ReactorConfig>,
        events: EventBus,
        cancellation: CancellationRegistry,
        idempotency: Arc<dyn IdempotencyStore>,
        queue: RunQueue,
        nodes: Vec<Arc<dyn reactor_orchestrator::StepNode>>,
        ticket: Option<Arc<dyn reactor_adapters::TicketSystemClient>>,
        llm: Option<Arc<dyn reactor_providers::LLMClient>>,
        messaging: Option<Arc<dyn reactor_adapters::MessagingClient>>,
        worker_pool_size: usize,
    ) -> Self {
        let ledger = Ledger::new(stores.clone());
        let gate = Arc::new(ReactivationGate::new(
            stores.clone(),
            events.clone(),
            cancellation.clone(),
            config.clone(),
            queue.clone(),
        ));
        let validation = Arc::new(ValidationCoordinator::new(
            stores.clone(),
            events.clone(),
            config.clone(),
            gate.clone(),
            queue.clone(),
            ticket.clone(),
            messaging,
        ));
        let event_router = Arc::new(EventRouter::new(
            stores.clone(),
            events.clone(),
            cancellation.clone(),
            config.clone(),
            gate.clone(),
            validation.clone(),
            queue.clone(),
            ticket,
            llm,
        ));
        let driver = Arc::new(WorkflowDriver::new(
            stores.clone(),
            ledger.clone(),
            events.clone(),
            cancellation.clone(),
            config.clone(),
            nodes,
        ));

        Self {
            stores,
            config,
            events,
            cancellation,
            ledger,
            queue,
            idempotency,
            gate,
            validation,
            event_router,
            driver,
            worker_pool_size,
        }
    }
}
