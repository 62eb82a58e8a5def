//! Execution trace events (spec.md §3 "Execution event (trace)").

use crate::capability::Capability;
use crate::value::Value;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecutionEvent {
    Assign {
        step: usize,
        name: String,
    },
    Tool {
        step: usize,
        name: String,
        args_summary: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        result_summary: Option<String>,
        blocked: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
        trusted: bool,
    },
    Qllm {
        step: usize,
        save_as: String,
        output_summary: String,
        trusted: bool,
    },
    Final {
        step: usize,
        text: String,
    },
}

/// Builds a bounded, serialization-friendly one-line summary of a value for
/// trace entries (full values are not retained — spec.md keeps traces small
/// enough to embed in repair prompts).
pub fn summarize_value(value: &Value) -> String {
    crate::error::truncate_chars(&value.repr_text(), 200)
}

pub fn capability_trusted(cap: &Capability) -> bool {
    cap.trusted
}
