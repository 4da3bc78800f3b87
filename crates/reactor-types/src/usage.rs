use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{RunId, StepId};

/// One LLM call. Immutable once written; cost is computed by the pricing
/// table in `reactor-providers`, not here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AIUsageRecord {
    pub run_id: RunId,
    pub step_id: StepId,
    pub provider: String,
    pub model: String,
    pub operation: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub estimated_cost: f64,
    pub duration_ms: u64,
    pub success: bool,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}
