//! Structured logging init, redaction helpers and correlation-id
//! propagation: a `tracing`/`tracing-subscriber` JSON pipeline plus a
//! `redact_text` helper, with `ObservabilityEvent` carrying
//! `correlation_id`/`task_id`/`run_id`/`step_id`/`validation_id`.

use serde::Serialize;
use tracing::Level;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessKind {
    Engine,
    Worker,
}

impl ProcessKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ProcessKind::Engine => "engine",
            ProcessKind::Worker => "worker",
        }
    }
}

/// One structured fact emitted at a pipeline transition. Fields are all
/// optional so a single call site can log whatever it knows without
/// threading unrelated identifiers through call signatures.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ObservabilityEvent<'a> {
    pub event: &'a str,
    pub component: &'a str,
    pub correlation_id: Option<&'a str>,
    pub task_id: Option<&'a str>,
    pub run_id: Option<&'a str>,
    pub step_id: Option<&'a str>,
    pub validation_id: Option<&'a str>,
    pub provider_id: Option<&'a str>,
    pub model_id: Option<&'a str>,
    pub status: Option<&'a str>,
    pub error_code: Option<&'a str>,
    pub detail: Option<&'a str>,
}

/// Never log raw ticket descriptions or comment bodies at info level — log
/// this redacted form instead (length + hash, enough to correlate across log
/// lines without leaking ticket content).
pub fn redact_text(input: &str) -> String {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    format!("[redacted len={} sha256={}]", trimmed.len(), short_hash(trimmed))
}

pub fn short_hash(input: &str) -> String {
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(input.as_bytes());
    hex_prefix(&digest[..8])
}

fn hex_prefix(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

pub fn emit_event(level: Level, process: ProcessKind, event: ObservabilityEvent<'_>) {
    macro_rules! log_at {
        ($macro:ident) => {
            tracing::$macro!(
                target: "reactor.obs",
                process = process.as_str(),
                component = event.component,
                event = event.event,
                correlation_id = event.correlation_id.unwrap_or(""),
                task_id = event.task_id.unwrap_or(""),
                run_id = event.run_id.unwrap_or(""),
                step_id = event.step_id.unwrap_or(""),
                validation_id = event.validation_id.unwrap_or(""),
                provider_id = event.provider_id.unwrap_or(""),
                model_id = event.model_id.unwrap_or(""),
                status = event.status.unwrap_or(""),
                error_code = event.error_code.unwrap_or(""),
                detail = event.detail.unwrap_or(""),
            )
        };
    }
    match level {
        Level::ERROR => log_at!(error),
        Level::WARN => log_at!(warn),
        Level::INFO => log_at!(info),
        Level::DEBUG => log_at!(debug),
        Level::TRACE => log_at!(trace),
    }
}

/// Initializes a JSON-formatted tracing subscriber honoring `RUST_LOG`
/// (default `info`). Call once at process startup.
pub fn init_logging(process: ProcessKind) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_target(true)
                .with_current_span(false),
        )
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))?;
    tracing::info!(process = process.as_str(), "logging initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redact_text_empty() {
        assert_eq!(redact_text(""), "");
        assert_eq!(redact_text("   "), "");
    }

    #[test]
    fn redact_text_is_stable_and_hides_content() {
        let a = redact_text("rename the file to metrics.py");
        let b = redact_text("rename the file to metrics.py");
        assert_eq!(a, b);
        assert!(!a.contains("metrics"));
        assert!(a.contains("len=30"));
    }

    #[test]
    fn redact_text_differs_for_different_input() {
        assert_ne!(redact_text("approve"), redact_text("reject"));
    }
}
