//! Source locations attached to parser diagnostics (spec.md §4.1).

use serde::{Deserialize, Serialize};

/// 1-based line/column plus the offending line's text, exactly as spec.md
/// §4.1 requires for syntax-error diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLoc {
    pub line: usize,
    pub column: usize,
    pub line_text: String,
}

impl SourceLoc {
    pub fn new(line: usize, column: usize, line_text: impl Into<String>) -> Self {
        SourceLoc {
            line,
            column,
            line_text: line_text.into(),
        }
    }
}

/// Builds the "first 16, then `+N more`" truncated allow-list suffix used in
/// unknown-tool diagnostics (spec.md §4.1).
pub fn truncated_tool_list(allowed: &[String]) -> String {
    const PREVIEW: usize = 16;
    if allowed.len() <= PREVIEW {
        allowed.join(", ")
    } else {
        let preview: Vec<&str> = allowed.iter().take(PREVIEW).map(String::as_str).collect();
        format!("{}, +{} more", preview.join(", "), allowed.len() - PREVIEW)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_list_is_not_truncated() {
        let tools: Vec<String> = vec!["a".into(), "b".into()];
        assert_eq!(truncated_tool_list(&tools), "a, b");
    }

    #[test]
    fn long_list_is_truncated_with_count() {
        let tools: Vec<String> = (0..20).map(|i| format!("tool{i}")).collect();
        let out = truncated_tool_list(&tools);
        assert!(out.ends_with("+4 more"));
        assert_eq!(out.split(", ").count(), 17); // 16 names + "+4 more"
    }
}
