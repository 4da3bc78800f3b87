//! Declarative pattern table (§9 design note: "pattern-based NLP" kept in a
//! reloadable, independently unit-testable table of regex + weight +
//! bucket, rather than scattered string matching in the classifier).

use once_cell::sync::Lazy;
use regex::Regex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bucket {
    Approval,
    Rejection,
    Abandonment,
    Question,
}

pub struct Pattern {
    pub bucket: Bucket,
    pub weight: f64,
    pub regex: &'static Lazy<Regex>,
}

macro_rules! pattern_regex {
    ($name:ident, $re:expr) => {
        static $name: Lazy<Regex> = Lazy::new(|| Regex::new($re).expect("valid pattern regex"));
    };
}

// Approval
pattern_regex!(RE_APPROVE_EXPLICIT, r"(?i)\b(oui|yes|approved?|lgtm|ship it|go ahead|looks good)\b");
pattern_regex!(RE_APPROVE_THANKS, r"(?i)\b(merci|thanks|thank you|parfait|perfect|great job)\b");
pattern_regex!(RE_APPROVE_EMOJI, r"(?:\u{1F44D}|\u{2705}|\u{1F680})");

// Rejection
pattern_regex!(RE_REJECT_EXPLICIT, r"(?i)\b(non|no|reject|nope|doesn't work|ne fonctionne pas)\b");
pattern_regex!(RE_REJECT_INSTRUCTION, r"(?i)\b(renomme|rename|fix|change|modifie|instead|plutot|plut\u{00f4}t)\b");
pattern_regex!(RE_REJECT_EMOJI, r"(?:\u{1F44E}|\u{274C})");

// Abandonment
pattern_regex!(RE_ABANDON_EXPLICIT, r"(?i)\b(abandon|cancel|stop|annule|forget it|never ?mind|drop this)\b");
pattern_regex!(RE_ABANDON_DEPRIORITIZE, r"(?i)\b(not needed anymore|no longer needed|deprioritiz)\b");

// Question
pattern_regex!(RE_QUESTION_MARK, r"\?\s*$");
pattern_regex!(RE_QUESTION_WORD, r"(?i)^\s*(why|how|what|quoi|pourquoi|comment|can you|could you|est[- ]ce)\b");

pub static APPROVAL_PATTERNS: &[Pattern] = &[
    Pattern { bucket: Bucket::Approval, weight: 0.6, regex: &RE_APPROVE_EXPLICIT },
    Pattern { bucket: Bucket::Approval, weight: 0.3, regex: &RE_APPROVE_THANKS },
    Pattern { bucket: Bucket::Approval, weight: 0.4, regex: &RE_APPROVE_EMOJI },
];

pub static REJECTION_PATTERNS: &[Pattern] = &[
    Pattern { bucket: Bucket::Rejection, weight: 0.6, regex: &RE_REJECT_EXPLICIT },
    Pattern { bucket: Bucket::Rejection, weight: 0.35, regex: &RE_REJECT_INSTRUCTION },
    Pattern { bucket: Bucket::Rejection, weight: 0.4, regex: &RE_REJECT_EMOJI },
];

pub static ABANDONMENT_PATTERNS: &[Pattern] = &[
    Pattern { bucket: Bucket::Abandonment, weight: 0.8, regex: &RE_ABANDON_EXPLICIT },
    Pattern { bucket: Bucket::Abandonment, weight: 0.5, regex: &RE_ABANDON_DEPRIORITIZE },
];

pub static QUESTION_PATTERNS: &[Pattern] = &[
    Pattern { bucket: Bucket::Question, weight: 0.25, regex: &RE_QUESTION_MARK },
    Pattern { bucket: Bucket::Question, weight: 0.45, regex: &RE_QUESTION_WORD },
];

pub fn all_patterns() -> impl Iterator<Item = &'static Pattern> {
    APPROVAL_PATTERNS
        .iter()
        .chain(REJECTION_PATTERNS.iter())
        .chain(ABANDONMENT_PATTERNS.iter())
        .chain(QUESTION_PATTERNS.iter())
}

/// `score = clamp(sum(weight * (1 + 0.1 * max(0, matches-1))), 0, 1)` (§4.2.1).
pub fn bucket_score(text: &str, patterns: &[Pattern]) -> f64 {
    let mut total = 0.0;
    for pattern in patterns {
        let matches = pattern.regex.find_iter(text).count();
        if matches == 0 {
            continue;
        }
        let boost = 1.0 + 0.1 * (matches as f64 - 1.0).max(0.0);
        total += pattern.weight * boost;
    }
    total.clamp(0.0, 1.0)
}

/// Bot footer / reserved-emoji signatures used by the reactivation detector
/// (§4.2.2) to avoid self-triggering on its own workflow comments.
pub fn is_agent_signature(text: &str) -> bool {
    static RE_FOOTER: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"(?i)(generated by reactor|automated workflow|\bbot\b footer)").unwrap());
    static RE_RESERVED_EMOJI: Lazy<Regex> = Lazy::new(|| Regex::new(r"\u{1F916}").unwrap());
    RE_FOOTER.is_match(text) || RE_RESERVED_EMOJI.is_match(text)
}

pub static EXPLICIT_REQUEST_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"(?i)\b(ajoute|add|please add|implement|impl\u{00e9}mente)\b").unwrap(),
        Regex::new(r"(?i)\b(aussi|also|en plus|additionally)\b").unwrap(),
        Regex::new(r"(?i)\b(fix|r\u{00e9}pare|correct)\b").unwrap(),
    ]
});

pub static QUESTION_REQUEST_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"(?i)\b(can you|could you|would it be possible|est[- ]ce possible)\b").unwrap(),
        Regex::new(r"(?i)\b(what about|qu'en est-il)\b").unwrap(),
    ]
});

pub static TECHNICAL_KEYWORDS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(endpoint|metric|prometheus|api|database|m\u{00e9}trique|fonction|route|test)\b").unwrap()
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn approval_score_rewards_multiple_matches() {
        let score_one = bucket_score("yes", APPROVAL_PATTERNS);
        let score_two = bucket_score("yes yes", APPROVAL_PATTERNS);
        assert!(score_two > score_one);
    }

    #[test]
    fn abandon_explicit_dominates() {
        let score = bucket_score("abandon this please", ABANDONMENT_PATTERNS);
        assert!(score >= 0.7);
    }

    #[test]
    fn question_mark_alone_is_weak_signal() {
        let score = bucket_score("ok?", QUESTION_PATTERNS);
        assert!(score < 0.4);
    }

    #[test]
    fn agent_signature_detected() {
        assert!(is_agent_signature("Generated by reactor automated workflow"));
        assert!(!is_agent_signature("please add metrics"));
    }
}
