//! Storage, configuration, cancellation, event bus and the error taxonomy
//! shared by the orchestrator, the adapters, and the server.

pub mod cancellation;
pub mod config;
pub mod error;
pub mod event_bus;
pub mod idempotency;
pub mod ledger;
pub mod queue;
pub mod storage;

pub use cancellation::CancellationRegistry;
pub use config::{CooldownLadder, ReactorConfig, Secret};
pub use error::{ErrorKind, ReactorError, Result};
pub use event_bus::EventBus;
pub use idempotency::{IdempotencyStore, InMemoryTtlStore, NoopIdempotencyStore};
pub use ledger::{Ledger, UsageAggregate};
pub use queue::{QueueFull, QueuedRun, RunEntryPoint, RunQueue};
pub use storage::{JsonCollection, Stores};
