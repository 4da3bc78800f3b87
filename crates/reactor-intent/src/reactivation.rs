//! Reactivation detection (§4.2.2): a lighter classifier that only decides
//! "is this a new instruction?", deliberately permissive because the
//! Reactivation Gate blocks spam downstream.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use reactor_types::{TaskId, UpdateAnalysis};
use tokio::sync::Mutex;

use crate::patterns::{self};

pub const REACTIVATION_THRESHOLD: f64 = 0.1;
const CACHE_TTL: Duration = Duration::from_secs(5 * 60);

fn text_hash(text: &str) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    text.hash(&mut hasher);
    hasher.finish()
}

/// Per-`(task, text_hash)` in-process cache with a 5-minute TTL, suppressing
/// immediate repeats of the same update text on the same task.
pub struct ReactivationCache {
    seen: Mutex<HashMap<(TaskId, u64), Instant>>,
}

impl ReactivationCache {
    pub fn new() -> Self {
        Self {
            seen: Mutex::new(HashMap::new()),
        }
    }

    /// Returns `true` if this `(task, text)` pair was already seen within
    /// the TTL window (a suppressible repeat).
    pub async fn is_repeat(&self, task_id: TaskId, text: &str) -> bool {
        let key = (task_id, text_hash(text));
        let now = Instant::now();
        let mut guard = self.seen.lock().await;
        guard.retain(|_, seen_at| now.duration_since(*seen_at) < CACHE_TTL);
        if guard.contains_key(&key) {
            return true;
        }
        guard.insert(key, now);
        false
    }
}

impl Default for ReactivationCache {
    fn default() -> Self {
        Self::new()
    }
}

fn clean(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Analyzes an update on an already-finished Task to decide whether it
/// warrants a reactivation attempt. Does not itself consult the cache; the
/// caller decides whether a cache hit should short-circuit before calling
/// this.
pub fn analyze_update(raw_text: &str) -> UpdateAnalysis {
    let text = clean(raw_text);

    if patterns::is_agent_signature(&text) {
        return UpdateAnalysis {
            requires_reactivation: false,
            confidence: 0.0,
            reasoning: "matches an agent-signature pattern".to_string(),
            extracted_requirements: None,
        };
    }

    let explicit_matches = patterns::EXPLICIT_REQUEST_PATTERNS
        .iter()
        .filter(|re| re.is_match(&text))
        .count();
    let question_matches = patterns::QUESTION_REQUEST_PATTERNS
        .iter()
        .filter(|re| re.is_match(&text))
        .count();

    let explicit_score = (0.2 * explicit_matches as f64).min(0.4);
    let question_score = (0.2 * question_matches as f64).min(0.4);

    let context_bonus = if text.len() >= 10 && patterns::TECHNICAL_KEYWORDS.is_match(&text) {
        0.2
    } else {
        0.0
    };

    let total = (explicit_score + question_score + context_bonus).min(1.0);
    let requires_reactivation = total >= REACTIVATION_THRESHOLD;

    UpdateAnalysis {
        requires_reactivation,
        confidence: total,
        reasoning: format!(
            "explicit={explicit_matches} question={question_matches} context_bonus={context_bonus:.2}"
        ),
        extracted_requirements: requires_reactivation.then(|| text.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_technical_request_triggers_reactivation() {
        let analysis = analyze_update("Ajoute aussi la metrique Prometheus");
        assert!(analysis.requires_reactivation);
        assert!(analysis.extracted_requirements.is_some());
    }

    #[test]
    fn agent_signature_never_reactivates() {
        let analysis = analyze_update("Generated by reactor automated workflow run 4");
        assert!(!analysis.requires_reactivation);
    }

    #[test]
    fn short_non_technical_text_does_not_reactivate() {
        let analysis = analyze_update("ok");
        assert!(!analysis.requires_reactivation);
    }

    #[tokio::test]
    async fn cache_suppresses_immediate_repeat() {
        let cache = ReactivationCache::new();
        let task_id = TaskId(1);
        assert!(!cache.is_repeat(task_id, "add metrics").await);
        assert!(cache.is_repeat(task_id, "add metrics").await);
    }
}
