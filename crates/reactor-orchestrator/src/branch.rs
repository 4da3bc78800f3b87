//! Base-branch resolution and validation (§4.4 [FULL]), grounded in
//! `base_branch_resolver.py`: a priority ladder of sources feeding a
//! two-sided allowlist/denylist validator, plus an independent sanitizer.

use once_cell::sync::Lazy;
use regex::Regex;

/// Curated prefixes accepted outright, with or without a leading `/`-style
/// environment prefix (e.g. `release/2026.03`).
const KNOWN_GOOD_PREFIXES: &[&str] = &["main", "master", "develop", "staging", "release"];

/// ISO-639-1 two-letter codes: a branch that is *only* a language code is
/// almost always a mis-parsed in-content cue (`into de` meaning "translate to
/// German", not "target the `de` branch"), not an actual branch name.
const ISO_639_1_CODES: &[&str] = &[
    "aa", "ab", "ae", "af", "ak", "am", "an", "ar", "as", "av", "ay", "az", "ba", "be", "bg", "bh",
    "bi", "bm", "bn", "bo", "br", "bs", "ca", "ce", "ch", "co", "cr", "cs", "cu", "cv", "cy", "da",
    "de", "dv", "dz", "ee", "el", "en", "eo", "es", "et", "eu", "fa", "ff", "fi", "fj", "fo", "fr",
    "fy", "ga", "gd", "gl", "gn", "gu", "gv", "ha", "he", "hi", "ho", "hr", "ht", "hu", "hy", "hz",
    "ia", "id", "ie", "ig", "ii", "ik", "io", "is", "it", "iu", "ja", "jv", "ka", "kg", "ki", "kj",
    "kk", "kl", "km", "kn", "ko", "kr", "ks", "ku", "kv", "kw", "ky", "la", "lb", "lg", "li", "ln",
    "lo", "lt", "lu", "lv", "mg", "mh", "mi", "mk", "ml", "mn", "mr", "ms", "mt", "my", "na", "nb",
    "nd", "ne", "ng", "nl", "nn", "no", "nr", "nv", "ny", "oc", "oj", "om", "or", "os", "pa", "pi",
    "pl", "ps", "pt", "qu", "rm", "rn", "ro", "ru", "rw", "sa", "sc", "sd", "se", "sg", "si", "sk",
    "sl", "sm", "sn", "so", "sq", "sr", "ss", "st", "su", "sv", "sw", "ta", "te", "tg", "th", "ti",
    "tk", "tl", "tn", "to", "tr", "ts", "tt", "tw", "ty", "ug", "uk", "ur", "uz", "ve", "vi", "vo",
    "wa", "wo", "xh", "yi", "yo", "za", "zh", "zu",
];

/// Stop-words that occasionally leak out of "base: the" / "into a" style
/// phrasing and are never themselves valid branch names.
const STOP_WORDS: &[&str] = &[
    "the", "a", "an", "this", "that", "it", "branch", "repo", "repository", "le", "la", "les",
    "une", "un", "ce", "cette",
];

static RE_BASE_CUE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:base|into|target)\s*:?\s+([A-Za-z0-9/_.\-]+)").unwrap());

fn is_known_good(name: &str) -> bool {
    let lower = name.to_lowercase();
    KNOWN_GOOD_PREFIXES
        .iter()
        .any(|p| lower == *p || lower.starts_with(&format!("{p}/")))
}

fn is_language_code(name: &str) -> bool {
    ISO_639_1_CODES.contains(&name.to_lowercase().as_str())
}

fn is_stop_word(name: &str) -> bool {
    STOP_WORDS.contains(&name.to_lowercase().as_str())
}

/// Git ref syntax rules (a practical subset of `git check-ref-format`): no
/// leading/trailing `.`/`-`, no `..`, no whitespace/`~^:?*[`, no `//`, no
/// `@{`, no backslash.
fn has_valid_ref_syntax(name: &str) -> bool {
    if name.is_empty() || name.len() > 255 {
        return false;
    }
    if name.starts_with('.') || name.ends_with('.') || name.starts_with('-') || name.ends_with('-') {
        return false;
    }
    if name.contains("..") || name.contains("//") || name.contains("@{") {
        return false;
    }
    if name.chars().any(|c| c.is_whitespace() || "~^:?*[\\".contains(c)) {
        return false;
    }
    true
}

/// Full validity check (§4.4): non-empty, `<= 255` chars, allowed characters,
/// not a bare language code, not a stop-word, valid git ref syntax — unless
/// the name already matches a known-good prefix, which is accepted outright.
pub fn is_valid_branch_name(name: &str) -> bool {
    if is_known_good(name) {
        return true;
    }
    if !has_valid_ref_syntax(name) {
        return false;
    }
    if is_language_code(name) || is_stop_word(name) {
        return false;
    }
    true
}

/// Sanitization is independent of validation: collapses whitespace to `-`,
/// strips `~^:?*[]\`, and collapses repeated dots. Does not guarantee the
/// result passes [`is_valid_branch_name`].
pub fn sanitize_branch_name(raw: &str) -> String {
    let collapsed_ws: String = raw.split_whitespace().collect::<Vec<_>>().join("-");
    let stripped: String = collapsed_ws.chars().filter(|c| !"~^:?*[]\\".contains(*c)).collect();
    let mut out = String::with_capacity(stripped.len());
    let mut last_was_dot = false;
    for ch in stripped.chars() {
        if ch == '.' {
            if last_was_dot {
                continue;
            }
            last_was_dot = true;
        } else {
            last_was_dot = false;
        }
        out.push(ch);
    }
    out
}

/// Inputs the Run Factory gathers before resolving a base branch, in the
/// priority order defined by §4.4.
#[derive(Debug, Clone, Default)]
pub struct BranchResolutionInput<'a> {
    /// 1. Value supplied directly by the ticket event.
    pub event_base_branch: Option<&'a str>,
    /// 2. Per-repository override, looked up by the caller and passed in.
    pub repo_override: Option<&'a str>,
    /// 3. Fields used for task-type inference.
    pub title: &'a str,
    pub description: &'a str,
    pub priority: Option<&'a str>,
    /// 4. Free text to scan for in-content cues like `base: X`.
    pub trigger_text: Option<&'a str>,
    /// 5. Global default, used if nothing above resolves to a valid branch.
    pub global_default: &'a str,
}

/// Task-type inference from title/description/priority (§4.4): hotfix/bug
/// keywords map to `main`, feature to `develop`, experiment to `staging`,
/// release to `release`.
fn infer_from_task_type(title: &str, description: &str, priority: Option<&str>) -> Option<&'static str> {
    let haystack = format!(
        "{} {} {}",
        title.to_lowercase(),
        description.to_lowercase(),
        priority.unwrap_or("").to_lowercase()
    );
    if haystack.contains("hotfix") || haystack.contains("bug") {
        Some("main")
    } else if haystack.contains("feature") {
        Some("develop")
    } else if haystack.contains("experiment") {
        Some("staging")
    } else if haystack.contains("release") {
        Some("release")
    } else {
        None
    }
}

fn extract_in_content_cue(text: &str) -> Option<String> {
    RE_BASE_CUE
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| sanitize_branch_name(m.as_str()))
}

/// Resolves the base branch for a new Run, walking the priority order and
/// falling back to the next source whenever a candidate fails validation
/// (§4.4: "A proposed branch must pass validity rules ... else fall back to
/// the next priority").
pub fn resolve_base_branch(input: &BranchResolutionInput<'_>) -> String {
    let candidates = [
        input.event_base_branch.map(str::to_string),
        input.repo_override.map(str::to_string),
        infer_from_task_type(input.title, input.description, input.priority).map(str::to_string),
        input.trigger_text.and_then(extract_in_content_cue),
    ];

    for candidate in candidates.into_iter().flatten() {
        if is_valid_branch_name(&candidate) {
            return candidate;
        }
    }
    input.global_default.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_good_prefix_accepted_outright() {
        assert!(is_valid_branch_name("main"));
        assert!(is_valid_branch_name("release/2026.03"));
    }

    #[test]
    fn bare_language_code_rejected() {
        assert!(!is_valid_branch_name("de"));
        assert!(!is_valid_branch_name("fr"));
    }

    #[test]
    fn stop_word_rejected() {
        assert!(!is_valid_branch_name("the"));
    }

    #[test]
    fn invalid_ref_syntax_rejected() {
        assert!(!is_valid_branch_name(".hidden"));
        assert!(!is_valid_branch_name("feature..x"));
        assert!(!is_valid_branch_name("has space"));
        assert!(!is_valid_branch_name("weird~name"));
    }

    #[test]
    fn sanitize_collapses_whitespace_and_dots() {
        assert_eq!(sanitize_branch_name("add   metrics  endpoint"), "add-metrics-endpoint");
        assert_eq!(sanitize_branch_name("a..b...c"), "a.b.c");
    }

    #[test]
    fn resolution_prefers_event_supplied_branch() {
        let input = BranchResolutionInput {
            event_base_branch: Some("staging"),
            title: "Fix bug",
            description: "",
            global_default: "main",
            ..Default::default()
        };
        assert_eq!(resolve_base_branch(&input), "staging");
    }

    #[test]
    fn resolution_falls_back_past_invalid_candidate() {
        let input = BranchResolutionInput {
            event_base_branch: Some("de"),
            title: "Hotfix the crash",
            description: "",
            global_default: "main",
            ..Default::default()
        };
        assert_eq!(resolve_base_branch(&input), "main");
    }

    #[test]
    fn resolution_infers_from_task_type() {
        let input = BranchResolutionInput {
            title: "New feature: dashboard",
            description: "",
            global_default: "main",
            ..Default::default()
        };
        assert_eq!(resolve_base_branch(&input), "develop");
    }

    #[test]
    fn resolution_reads_in_content_cue() {
        let input = BranchResolutionInput {
            title: "Task",
            description: "",
            trigger_text: Some("please target staging for this one"),
            global_default: "main",
            ..Default::default()
        };
        assert_eq!(resolve_base_branch(&input), "staging");
    }

    #[test]
    fn resolution_uses_global_default_last() {
        let input = BranchResolutionInput {
            title: "Task",
            description: "",
            global_default: "main",
            ..Default::default()
        };
        assert_eq!(resolve_base_branch(&input), "main");
    }
}
