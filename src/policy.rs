//! Policy engine: decides, per tool invocation, whether the call is
//! allowed given the evaluation mode and the tainted provenance of its
//! arguments and enclosing control flow (spec.md §4.4).

use crate::capability::Capability;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvalMode {
    Normal,
    Strict,
}

impl Default for EvalMode {
    fn default() -> Self {
        EvalMode::Strict
    }
}

#[derive(Debug, Clone)]
pub struct PolicyDecision {
    pub allowed: bool,
    pub reason: Option<String>,
}

impl PolicyDecision {
    fn allow() -> Self {
        PolicyDecision {
            allowed: true,
            reason: None,
        }
    }

    fn deny(reason: String) -> Self {
        PolicyDecision {
            allowed: false,
            reason: Some(reason),
        }
    }
}

pub struct PolicyEngine {
    mode: EvalMode,
}

impl PolicyEngine {
    pub fn new(mode: EvalMode) -> Self {
        PolicyEngine { mode }
    }

    pub fn mode(&self) -> EvalMode {
        self.mode
    }

    /// Pure function of its inputs (spec.md §4.4 "Decisions are pure
    /// functions of their inputs and must be reproducible").
    ///
    /// `strict_dependency_tainted` is the run's monotonic flag: true once
    /// any earlier `query_ai_assistant` call has bound an untrusted value
    /// into scope (spec.md §3 invariant 3).
    pub fn evaluate(
        &self,
        tool_name: &str,
        side_effect_free: bool,
        args_capability: &Capability,
        control_flow_capability: &Capability,
        strict_dependency_tainted: bool,
    ) -> PolicyDecision {
        if self.mode == EvalMode::Normal {
            return PolicyDecision::allow();
        }
        if side_effect_free {
            return PolicyDecision::allow();
        }

        let mut reasons = Vec::new();
        if !args_capability.trusted {
            reasons.push(format!(
                "argument capability is untrusted (sources: {})",
                args_capability.sources_summary()
            ));
        }
        if !control_flow_capability.trusted {
            reasons.push(format!(
                "enclosing control flow is untrusted (sources: {})",
                control_flow_capability.sources_summary()
            ));
        }
        if strict_dependency_tainted {
            reasons.push(
                "an earlier query_ai_assistant call has already injected untrusted values into scope"
                    .to_string(),
            );
        }

        if reasons.is_empty() {
            PolicyDecision::allow()
        } else {
            PolicyDecision::deny(format!(
                "tool '{tool_name}' denied: state-changing tool in strict mode with untrusted inputs ({})",
                reasons.join("; ")
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::SourceId;

    #[test]
    fn normal_mode_always_allows() {
        let policy = PolicyEngine::new(EvalMode::Normal);
        let decision = policy.evaluate(
            "send_message",
            false,
            &Capability::untrusted(SourceId::qllm("r")),
            &Capability::trusted_literal(),
            true,
        );
        assert!(decision.allowed);
    }

    #[test]
    fn strict_mode_allows_side_effect_free_tools_regardless_of_taint() {
        let policy = PolicyEngine::new(EvalMode::Strict);
        let decision = policy.evaluate(
            "read_file",
            true,
            &Capability::untrusted(SourceId::qllm("r")),
            &Capability::trusted_literal(),
            true,
        );
        assert!(decision.allowed);
    }

    #[test]
    fn strict_mode_denies_state_changing_tool_with_untrusted_args() {
        let policy = PolicyEngine::new(EvalMode::Strict);
        let decision = policy.evaluate(
            "send_message",
            false,
            &Capability::untrusted(SourceId::qllm("r")),
            &Capability::trusted_literal(),
            false,
        );
        assert!(!decision.allowed);
        assert!(decision.reason.unwrap().contains("state-changing"));
    }

    #[test]
    fn strict_mode_denies_when_strict_dependency_set_is_nonempty() {
        let policy = PolicyEngine::new(EvalMode::Strict);
        let decision = policy.evaluate(
            "send_message",
            false,
            &Capability::trusted_literal(),
            &Capability::trusted_literal(),
            true,
        );
        assert!(!decision.allowed);
    }

    #[test]
    fn strict_mode_allows_fully_trusted_state_changing_call() {
        let policy = PolicyEngine::new(EvalMode::Strict);
        let decision = policy.evaluate(
            "send_message",
            false,
            &Capability::trusted_literal(),
            &Capability::trusted_literal(),
            false,
        );
        assert!(decision.allowed);
    }
}
