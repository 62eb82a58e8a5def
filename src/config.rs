//! Run configuration: evaluation mode, retry budget, and the token/history
//! limits the planner loop operates under (spec.md §6, §4.5).

use crate::policy::EvalMode;

const MAX_PLAN_RETRIES_ENV: &str = "OPENCLAW_CAMEL_MAX_PLAN_RETRIES";
const DEFAULT_MAX_PLAN_RETRIES: u32 = 10;
const HARD_CEILING: u32 = 10;

/// Per-call token budgets (spec.md §5 "Timeouts").
pub const PLANNER_MAX_OUTPUT_TOKENS: u32 = 2_400;
pub const FINAL_REPLY_MAX_OUTPUT_TOKENS: u32 = 1_100;

/// History truncation thresholds (spec.md §4.5 S0).
pub const HISTORY_TRUNCATE_THRESHOLD: usize = 12_000;
pub const HISTORY_KEEP_HEAD: usize = 8_000;
pub const HISTORY_KEEP_TAIL: usize = 3_500;

#[derive(Debug, Clone)]
pub struct RunConfig {
    pub eval_mode: EvalMode,
    pub max_plan_retries: u32,
}

impl RunConfig {
    pub fn new(eval_mode: EvalMode) -> Self {
        RunConfig {
            eval_mode,
            max_plan_retries: Self::max_plan_retries_from_env(),
        }
    }

    /// Reads and clamps `OPENCLAW_CAMEL_MAX_PLAN_RETRIES`, falling back to
    /// the default on any parse failure rather than panicking.
    fn max_plan_retries_from_env() -> u32 {
        std::env::var(MAX_PLAN_RETRIES_ENV)
            .ok()
            .and_then(|raw| raw.trim().parse::<u32>().ok())
            .map(|n| n.clamp(1, HARD_CEILING))
            .unwrap_or(DEFAULT_MAX_PLAN_RETRIES)
    }

    pub fn with_max_plan_retries(mut self, retries: u32) -> Self {
        self.max_plan_retries = retries.clamp(1, HARD_CEILING);
        self
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig::new(EvalMode::default())
    }
}

/// Truncates the conversation history (spec.md §4.5 S0: "keep first 8000
/// chars and last 3500 chars if over 12,000").
pub fn truncate_history(history: &str) -> String {
    let chars: Vec<char> = history.chars().collect();
    if chars.len() <= HISTORY_TRUNCATE_THRESHOLD {
        return history.to_string();
    }
    let head: String = chars[..HISTORY_KEEP_HEAD].iter().collect();
    let tail: String = chars[chars.len() - HISTORY_KEEP_TAIL..].iter().collect();
    format!("{head}\n...[truncated]...\n{tail}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_retry_budget_is_ten() {
        std::env::remove_var(MAX_PLAN_RETRIES_ENV);
        assert_eq!(RunConfig::default().max_plan_retries, 10);
    }

    #[test]
    fn with_max_plan_retries_clamps_above_ceiling() {
        let config = RunConfig::default().with_max_plan_retries(99);
        assert_eq!(config.max_plan_retries, 10);
    }

    #[test]
    fn with_max_plan_retries_clamps_below_floor() {
        let config = RunConfig::default().with_max_plan_retries(0);
        assert_eq!(config.max_plan_retries, 1);
    }

    #[test]
    fn short_history_is_not_truncated() {
        let history = "a".repeat(100);
        assert_eq!(truncate_history(&history), history);
    }

    #[test]
    fn long_history_keeps_head_and_tail() {
        let history = "a".repeat(8_000) + &"b".repeat(2_000) + &"c".repeat(8_000);
        let truncated = truncate_history(&history);
        assert!(truncated.starts_with(&"a".repeat(100)));
        assert!(truncated.ends_with(&"c".repeat(100)));
        assert!(truncated.len() < history.len());
    }
}
