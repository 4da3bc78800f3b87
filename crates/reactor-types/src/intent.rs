use serde::{Deserialize, Serialize};

/// The classifier's verdict on a human comment (§4.2.1, glossary "Intent").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Approve,
    Reject,
    Abandon,
    Question,
    Unclear,
    ClarificationNeeded,
}

/// Output of the comment classification escalation ladder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentDecision {
    pub decision: Intent,
    pub confidence: f64,
    pub concerns: Vec<String>,
    pub suggested_action: Option<String>,
    pub requires_clarification: bool,
    /// One of `"pattern_only"`, `"pattern+llm"`, `"escalation_clarification"`
    /// — grounded in the source's `analysis_method` field (§4.2.1 [FULL]).
    pub analysis_method: String,
    pub extracted_requirements: Option<String>,
}

/// Output of the lighter reactivation-detection classifier (§4.2.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateAnalysis {
    pub requires_reactivation: bool,
    pub confidence: f64,
    pub reasoning: String,
    pub extracted_requirements: Option<String>,
}
