//! Route table and process supervisor: binds the listener, spawns the
//! background sweeps that keep the system self-healing, and drains
//! `state.queue` with a small worker pool.

use std::net::SocketAddr;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use chrono::Utc;
use reactor_core::RunEntryPoint;
use reactor_orchestrator::DriveOutcome;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::health::{liveness, readiness};
use crate::state::AppState;
use crate::webhook::receive_webhook;

fn app_router(state: AppState) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        .route("/health", get(liveness))
        .route("/status", get(readiness))
        .route("/webhook/monday", post(receive_webhook))
        .route("/webhook", post(receive_webhook))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// One worker: pops a `QueuedRun` and drives it to completion, starting at
/// `prepare` or resuming at `merge` depending on `RunEntryPoint` (§5 "the
/// worker pool is the only caller of `WorkflowDriver`").
async fn run_worker(worker_id: String, state: AppState) {
    loop {
        let Some(queued) = state.queue.dequeue().await else {
            break;
        };
        let result = match queued.entry {
            RunEntryPoint::FromStart => state.driver.drive(queued.run_id, &worker_id).await,
            RunEntryPoint::FromMerge => state.driver.resume_at_merge(queued.run_id, &worker_id).await,
        };
        match result {
            Ok(DriveOutcome::SuspendedForValidation) => {
                if let Some(run) = state.stores.runs.get(&queued.run_id).await {
                    if let Some(task) = state.stores.tasks.get(&run.task_id).await {
                        // The black-box `analyze`/`qa` nodes don't surface a
                        // structured confidence score in their output (§4.5
                        // treats them as opaque); a future node that does can
                        // populate this from the step's `output_snapshot`.
                        if let Err(err) = state.validation.open(queued.run_id, &task, None, Utc::now()).await {
                            tracing::error!(run_id = %queued.run_id, error = %err, "failed to open validation request");
                        }
                    }
                }
            }
            Ok(_) => {}
            Err(err) => {
                tracing::error!(run_id = %queued.run_id, worker = %worker_id, error = %err, "run worker failed");
            }
        }
    }
}

/// Sweeps stale Task locks (§4.3 operator-reclaim) and timed-out
/// `ValidationRequest`s (§4.6) on a fixed interval; both are idempotent to
/// run concurrently with normal traffic.
async fn run_sweeper(state: AppState) {
    let mut interval = tokio::time::interval(Duration::from_secs(30));
    loop {
        interval.tick().await;
        let now = Utc::now();
        if let Err(err) = state.gate.reclaim_stale_locks(now).await {
            tracing::warn!(error = %err, "stale lock reclaim sweep failed");
        }
        let pending = state.stores.all_pending_validations().await;
        for validation in pending {
            if let Err(err) = state.validation.handle_timeout(validation.validation_id, now).await {
                tracing::warn!(validation_id = %validation.validation_id, error = %err, "validation timeout sweep failed");
            }
        }
    }
}

pub async fn serve(addr: SocketAddr, state: AppState) -> anyhow::Result<()> {
    let worker_handles: Vec<_> = (0..state.worker_pool_size)
        .map(|i| {
            let worker_state = state.clone();
            tokio::spawn(run_worker(format!("worker-{i}"), worker_state))
        })
        .collect();
    let sweeper = tokio::spawn(run_sweeper(state.clone()));

    let app = app_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "reactor-engine listening");
    let result = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if tokio::signal::ctrl_c().await.is_err() {
                std::future::pending::<()>().await;
            }
        })
        .await;

    sweeper.abort();
    for handle in worker_handles {
        handle.abort();
    }
    result?;
    Ok(())
}
