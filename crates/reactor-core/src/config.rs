//! `ReactorConfig` is loaded once at startup from environment variables
//! (§10.1), a single env-plus-defaults layer appropriate for a server
//! binary. Secrets are wrapped so `Debug`/`Serialize` never print them.

use std::collections::HashMap;
use std::env;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ReactorError, Result};

/// A value that must never leak into logs, `Debug` output, or serialized
/// snapshots.
#[derive(Clone, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Secret(***)")
    }
}

impl Serialize for Secret {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str("***")
    }
}

/// Cooldown ladder (§4.3, §10's decided Open Question): the source's
/// zero-duration ladder is treated as a debug leftover, not a contract.
/// Defaults are non-zero and escalate on repeated reactivation failure.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CooldownLadder {
    pub normal: Duration,
    pub aggressive: Duration,
    pub emergency: Duration,
}

impl Default for CooldownLadder {
    fn default() -> Self {
        Self {
            normal: Duration::from_secs(15),
            aggressive: Duration::from_secs(120),
            emergency: Duration::from_secs(600),
        }
    }
}

impl CooldownLadder {
    /// `failed_reactivation_attempts` after the current failure determines
    /// rung: 0 failures -> normal, 1 -> aggressive, >=2 -> emergency.
    pub fn duration_for(&self, failed_attempts: u32) -> Duration {
        match failed_attempts {
            0 => self.normal,
            1 => self.aggressive,
            _ => self.emergency,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReactorConfig {
    pub bind_addr: String,
    pub state_dir: std::path::PathBuf,

    pub webhook_secret: Option<Secret>,
    pub monday_signing_secret: Option<Secret>,
    pub openai_api_key: Option<Secret>,
    pub anthropic_api_key: Option<Secret>,
    pub scm_token: Option<Secret>,
    pub messaging_token: Option<Secret>,

    pub board_id: Option<String>,
    pub test_id_prefixes: Vec<String>,

    pub default_base_branch: String,
    pub repo_base_branches: HashMap<String, String>,
    pub base_branch_rules: HashMap<String, String>,

    pub proc_window: Duration,
    pub lock_max_age: Duration,
    pub heartbeat_interval: Duration,
    pub max_failed_reactivations: u32,
    pub max_reactivations_per_run: u32,
    pub max_test_retries: u32,
    pub max_update_history: usize,

    pub validation_timeout_question: Duration,
    pub validation_timeout_command: Duration,

    pub cooldown: CooldownLadder,

    pub task_total_deadline: Duration,
    pub test_step_deadline: Duration,
}

impl ReactorConfig {
    /// Loads configuration from environment variables, falling back to the
    /// defaults named in §10.1 for anything unset. Never panics on missing
    /// secrets: the webhook intake layer logs a warning and accepts
    /// unsigned payloads per §4.1 rather than failing startup, matching the
    /// distilled spec's "if unconfigured, accept but log a warning" rule.
    pub fn from_env() -> Result<Self> {
        let state_dir = env_var("REACTOR_STATE_DIR")
            .map(std::path::PathBuf::from)
            .unwrap_or_else(|| std::path::PathBuf::from(".reactor"));

        let repo_base_branches = env_json_map("REPO_BASE_BRANCHES")?;
        let base_branch_rules = env_json_map("BASE_BRANCH_RULES")?;

        Ok(Self {
            bind_addr: env_var("REACTOR_BIND_ADDR").unwrap_or_else(|| "0.0.0.0:8000".to_string()),
            state_dir,
            webhook_secret: env_var("WEBHOOK_SECRET").map(Secret::new),
            monday_signing_secret: env_var("MONDAY_SIGNING_SECRET").map(Secret::new),
            openai_api_key: env_var("OPENAI_API_KEY").map(Secret::new),
            anthropic_api_key: env_var("ANTHROPIC_API_KEY").map(Secret::new),
            scm_token: env_var("SCM_TOKEN").map(Secret::new),
            messaging_token: env_var("MESSAGING_TOKEN").map(Secret::new),
            board_id: env_var("MONDAY_BOARD_ID"),
            test_id_prefixes: env_var("TEST_ID_PREFIXES")
                .map(|s| s.split(',').map(|p| p.trim().to_string()).collect())
                .unwrap_or_else(|| vec!["test-".to_string(), "sandbox-".to_string()]),
            default_base_branch: env_var("DEFAULT_BASE_BRANCH")
                .unwrap_or_else(|| "main".to_string()),
            repo_base_branches,
            base_branch_rules,
            proc_window: env_duration_secs("PROC_WINDOW_SECS", 120),
            lock_max_age: env_duration_secs("LOCK_MAX_AGE_SECS", 900),
            heartbeat_interval: env_duration_secs("HEARTBEAT_INTERVAL_SECS", 30),
            max_failed_reactivations: env_u32("MAX_FAILED_REACTIVATIONS", 3),
            max_reactivations_per_run: env_u32("MAX_REACTIVATIONS_PER_RUN", 3),
            max_test_retries: env_u32("MAX_TEST_RETRIES", 3),
            max_update_history: env_u32("MAX_UPDATE_HISTORY", 4) as usize,
            validation_timeout_question: env_duration_secs("VALIDATION_TIMEOUT_QUESTION", 3600),
            validation_timeout_command: env_duration_secs("VALIDATION_TIMEOUT_COMMAND", 20),
            cooldown: CooldownLadder {
                normal: env_duration_secs("COOLDOWN_NORMAL_SECS", 15),
                aggressive: env_duration_secs("COOLDOWN_AGGRESSIVE_SECS", 120),
                emergency: env_duration_secs("COOLDOWN_EMERGENCY_SECS", 600),
            },
            task_total_deadline: env_duration_secs("TASK_TOTAL_DEADLINE_SECS", 3600),
            test_step_deadline: env_duration_secs("TEST_STEP_DEADLINE_SECS", 600),
        })
    }
}

fn env_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_u32(key: &str, default: u32) -> u32 {
    env_var(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_duration_secs(key: &str, default_secs: u64) -> Duration {
    Duration::from_secs(env_var(key).and_then(|v| v.parse().ok()).unwrap_or(default_secs))
}

fn env_json_map(key: &str) -> Result<HashMap<String, String>> {
    match env_var(key) {
        None => Ok(HashMap::new()),
        Some(raw) => serde_json::from_str(&raw)
            .map_err(|e| ReactorError::Validation(format!("{key} is not a JSON object: {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_debug_never_leaks() {
        let s = Secret::new("super-secret-value");
        assert_eq!(format!("{:?}", s), "Secret(***)");
    }

    #[test]
    fn cooldown_ladder_escalates() {
        let ladder = CooldownLadder::default();
        assert_eq!(ladder.duration_for(0), ladder.normal);
        assert_eq!(ladder.duration_for(1), ladder.aggressive);
        assert_eq!(ladder.duration_for(2), ladder.emergency);
        assert_eq!(ladder.duration_for(99), ladder.emergency);
    }
}
