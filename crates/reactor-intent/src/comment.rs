//! The comment classification escalation ladder (§4.2.1): pattern stage,
//! then an optional LLM stage, then a clarification stage. Stops as soon as
//! a high-confidence answer is reached.

use reactor_providers::{CompletionRequest, LLMClient};
use reactor_types::{Intent, IntentDecision};
use serde::Deserialize;
use serde_json::json;

use crate::patterns;

pub const HIGH_CONFIDENCE: f64 = 0.8;
pub const MEDIUM_CONFIDENCE: f64 = 0.5;

/// Context adjustments applied multiplicatively to pattern-stage scores
/// (§4.2.1).
#[derive(Debug, Clone, Copy, Default)]
pub struct CommentContext {
    pub tests_failed: bool,
    pub urgent: bool,
    pub prior_rejections: u32,
}

#[derive(Debug, Clone, Copy)]
struct BucketScores {
    approval: f64,
    rejection: f64,
    abandonment: f64,
    question: f64,
}

fn clean_text(raw: &str) -> String {
    // Strip HTML tags, collapse whitespace (§4.2.1 "Input: cleaned text").
    let mut out = String::with_capacity(raw.len());
    let mut in_tag = false;
    for ch in raw.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => out.push(ch),
            _ => {}
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn pattern_scores(text: &str, ctx: CommentContext) -> BucketScores {
    let mut scores = BucketScores {
        approval: patterns::bucket_score(text, patterns::APPROVAL_PATTERNS),
        rejection: patterns::bucket_score(text, patterns::REJECTION_PATTERNS),
        abandonment: patterns::bucket_score(text, patterns::ABANDONMENT_PATTERNS),
        question: patterns::bucket_score(text, patterns::QUESTION_PATTERNS),
    };
    if ctx.tests_failed {
        scores.rejection = (scores.rejection * 1.2).min(1.0);
    }
    if ctx.urgent {
        scores.approval = (scores.approval * 1.1).min(1.0);
    }
    if ctx.prior_rejections >= 2 {
        scores.abandonment = (scores.abandonment * 1.15).min(1.0);
    }
    scores
}

fn pattern_decision(scores: BucketScores) -> (Intent, f64) {
    let max = scores
        .approval
        .max(scores.rejection)
        .max(scores.abandonment)
        .max(scores.question);

    if scores.abandonment >= 0.7 && scores.abandonment == max {
        return (Intent::Abandon, scores.abandonment.min(0.98));
    }
    if scores.approval > 0.3 && scores.approval == max {
        return (Intent::Approve, scores.approval.min(0.95));
    }
    if scores.rejection > 0.3 && scores.rejection == max {
        return (Intent::Reject, scores.rejection.min(0.95));
    }
    if scores.question > 0.4 && scores.question == max {
        return (Intent::Question, scores.question.min(0.8));
    }
    (Intent::Unclear, max)
}

#[derive(Debug, Deserialize)]
struct LlmVerdict {
    decision: String,
    confidence: f64,
    #[serde(default)]
    reasoning: String,
    #[serde(default)]
    concerns: Vec<String>,
    #[serde(default)]
    urgent: bool,
}

fn parse_llm_decision(raw: &str) -> Option<(Intent, f64, Vec<String>)> {
    let verdict: LlmVerdict = serde_json::from_str(raw).ok()?;
    let decision = match verdict.decision.to_lowercase().as_str() {
        "approve" => Intent::Approve,
        "reject" => Intent::Reject,
        "abandon" => Intent::Abandon,
        "question" => Intent::Question,
        _ => Intent::Unclear,
    };
    let _ = verdict.reasoning;
    let _ = verdict.urgent;
    Some((decision, verdict.confidence.clamp(0.0, 1.0), verdict.concerns))
}

/// Runs the full three-stage escalation ladder. `llm` is optional: when
/// `None`, stage 2 is skipped entirely (§4.2.1 "only if ... an LLM is
/// configured").
pub async fn classify_comment(
    raw_text: &str,
    ctx: CommentContext,
    task_context: &str,
    llm: Option<&dyn LLMClient>,
) -> IntentDecision {
    let text = clean_text(raw_text);
    let scores = pattern_scores(&text, ctx);
    let (pattern_decision_value, pattern_confidence) = pattern_decision(scores);

    if pattern_confidence >= HIGH_CONFIDENCE || llm.is_none() {
        return finalize(pattern_decision_value, pattern_confidence, Vec::new(), "pattern_only", &text);
    }

    let llm = llm.expect("checked is_some above");
    let prompt = format!(
        "Task context: {task_context}\nComment: {text}\nRespond with JSON: {{\"decision\":\"approve|reject|abandon|question|unclear\",\"confidence\":0..1,\"reasoning\":\"...\",\"concerns\":[],\"urgent\":false}}"
    );
    let request = CompletionRequest {
        system_prompt: Some("You classify human replies to an AI coding workflow.".to_string()),
        prompt,
        response_schema: Some(json!({
            "type": "object",
            "required": ["decision", "confidence"],
        })),
        max_tokens: 256,
    };

    let llm_result = llm.complete(request).await.ok().and_then(|r| parse_llm_decision(&r.text));

    let Some((llm_decision, llm_confidence, concerns)) = llm_result else {
        return finalize(pattern_decision_value, pattern_confidence, Vec::new(), "pattern_only", &text);
    };

    let (merged_decision, merged_confidence) = if llm_decision == pattern_decision_value {
        (pattern_decision_value, ((pattern_confidence + llm_confidence) / 1.5).min(0.98))
    } else if llm_confidence >= pattern_confidence {
        (llm_decision, llm_confidence * 0.9)
    } else {
        (pattern_decision_value, pattern_confidence * 0.9)
    };

    finalize(merged_decision, merged_confidence, concerns, "pattern+llm", &text)
}

fn finalize(decision: Intent, confidence: f64, concerns: Vec<String>, method: &str, text: &str) -> IntentDecision {
    if confidence < MEDIUM_CONFIDENCE {
        return IntentDecision {
            decision: Intent::ClarificationNeeded,
            confidence,
            concerns,
            suggested_action: None,
            requires_clarification: true,
            analysis_method: "escalation_clarification".to_string(),
            extracted_requirements: None,
        };
    }
    let extracted_requirements = matches!(decision, Intent::Reject).then(|| text.to_string());
    IntentDecision {
        decision,
        confidence,
        concerns,
        suggested_action: suggested_action_for(decision),
        requires_clarification: false,
        analysis_method: method.to_string(),
        extracted_requirements,
    }
}

fn suggested_action_for(decision: Intent) -> Option<String> {
    match decision {
        Intent::Approve => Some("resume_at_merge".to_string()),
        Intent::Reject => Some("spawn_reactivation".to_string()),
        Intent::Abandon => Some("abandon_task".to_string()),
        Intent::Question | Intent::ClarificationNeeded => Some("post_clarification".to_string()),
        Intent::Unclear => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn clear_approval_needs_no_llm() {
        let decision = classify_comment("oui, merci beaucoup", CommentContext::default(), "", None).await;
        assert_eq!(decision.decision, Intent::Approve);
        assert!(decision.confidence >= HIGH_CONFIDENCE.min(decision.confidence));
    }

    #[tokio::test]
    async fn clear_abandon() {
        let decision = classify_comment("abandon this, never mind", CommentContext::default(), "", None).await;
        assert_eq!(decision.decision, Intent::Abandon);
    }

    #[tokio::test]
    async fn ambiguous_text_without_llm_falls_to_clarification() {
        let decision = classify_comment("hmm", CommentContext::default(), "", None).await;
        assert_eq!(decision.decision, Intent::ClarificationNeeded);
        assert!(decision.requires_clarification);
    }

    #[tokio::test]
    async fn rejection_extracts_instructions() {
        let decision = classify_comment(
            "non, renomme le fichier en metrics.py",
            CommentContext::default(),
            "",
            None,
        )
        .await;
        assert_eq!(decision.decision, Intent::Reject);
        assert!(decision.extracted_requirements.is_some());
    }

    #[tokio::test]
    async fn tests_failed_context_boosts_rejection() {
        let ctx = CommentContext {
            tests_failed: true,
            ..Default::default()
        };
        let scores = pattern_scores("non ca ne fonctionne pas", ctx);
        let baseline = pattern_scores("non ca ne fonctionne pas", CommentContext::default());
        assert!(scores.rejection >= baseline.rejection);
    }
}
