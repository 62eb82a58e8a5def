//! Front-end dispatch (spec.md §4.5 stage S1): tries the code front-end
//! first, falls back to the structured JSON front-end only when the input
//! is recognizably JSON rather than code, then validates the resulting
//! program's tool calls against the run's allow-set.

pub mod code;
pub mod lexer;
pub mod structured;

use crate::diagnostics::truncated_tool_list;
use crate::error::{CamelError, CamelResult};
use crate::ir::{Program, Step};

pub const MAX_STEP_COUNT: usize = 64;

/// `{print, query_ai_assistant}` plus every host and client tool name,
/// normalized for case/whitespace-insensitive matching (spec.md §4.1).
pub fn build_allow_set(host_tools: &[String], client_tools: &[String]) -> Vec<String> {
    let mut names: Vec<String> = vec!["print".to_string(), "query_ai_assistant".to_string()];
    names.extend(host_tools.iter().cloned());
    names.extend(client_tools.iter().cloned());
    names
}

fn normalize(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Parses planner output into a validated [`Program`]: try the code
/// front-end; only a JSON-shaped failure (the code front-end rejecting the
/// very first token as `{`/`[`) falls through to the structured front-end.
/// A code-parser error over genuine code dominates and is returned as-is.
pub fn parse_plan(source: &str, host_tools: &[String], client_tools: &[String]) -> CamelResult<Program> {
    let trimmed = source.trim_start();
    let looks_like_json = trimmed.starts_with('[') || trimmed.starts_with('{');

    let program = if looks_like_json {
        match structured::parse(source) {
            Ok(program) => program,
            Err(structured_err) => match code::parse(source) {
                Ok(program) => program,
                Err(_) => return Err(structured_err),
            },
        }
    } else {
        code::parse(source)?
    };

    if program.total_step_count() > MAX_STEP_COUNT {
        return Err(CamelError::MaxStepsExceeded {
            limit: MAX_STEP_COUNT,
        });
    }

    let allow_set = build_allow_set(host_tools, client_tools);
    let normalized_allow: Vec<String> = allow_set.iter().map(|n| normalize(n)).collect();
    validate_tool_calls(&program.steps, &allow_set, &normalized_allow)?;

    Ok(program)
}

fn validate_tool_calls(
    steps: &[Step],
    allow_set: &[String],
    normalized_allow: &[String],
) -> CamelResult<()> {
    for step in steps {
        match step {
            Step::Tool { name, source_loc, .. } => {
                if !normalized_allow.contains(&normalize(name)) {
                    return Err(CamelError::UnknownTool {
                        tool: name.clone(),
                        loc: source_loc.clone(),
                        allowed_preview: truncated_tool_list(allow_set),
                    });
                }
            }
            Step::If {
                then_branch,
                else_branch,
                ..
            } => {
                validate_tool_calls(then_branch, allow_set, normalized_allow)?;
                validate_tool_calls(else_branch, allow_set, normalized_allow)?;
            }
            Step::For { body, .. } => {
                validate_tool_calls(body, allow_set, normalized_allow)?;
            }
            _ => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_tool_name_is_rejected_with_truncated_preview() {
        let host_tools: Vec<String> = (0..20).map(|i| format!("tool{i}")).collect();
        let err = parse_plan("rogue_tool(x=1)\n", &host_tools, &[]).unwrap_err();
        match err {
            CamelError::UnknownTool { tool, allowed_preview, .. } => {
                assert_eq!(tool, "rogue_tool");
                assert!(allowed_preview.contains("more"));
            }
            other => panic!("expected UnknownTool, got {other:?}"),
        }
    }

    #[test]
    fn known_host_tool_passes_validation() {
        let host_tools = vec!["send_message".to_string()];
        let program = parse_plan("send_message(to=\"x\", body=\"hi\")\n", &host_tools, &[]).unwrap();
        assert_eq!(program.steps.len(), 1);
    }

    #[test]
    fn case_and_whitespace_insensitive_tool_matching() {
        let host_tools = vec!["Send_Message".to_string()];
        let program = parse_plan("send_message(to=\"x\")\n", &host_tools, &[]).unwrap();
        assert_eq!(program.steps.len(), 1);
    }

    #[test]
    fn json_plan_falls_back_to_structured_frontend() {
        let json = r#"[{"type": "final", "template": "done"}]"#;
        let program = parse_plan(json, &[], &[]).unwrap();
        assert_eq!(program.steps.len(), 1);
    }

    #[test]
    fn step_budget_exceeded_is_rejected() {
        let mut src = String::new();
        for i in 0..65 {
            src.push_str(&format!("x{i} = {i}\n"));
        }
        let err = parse_plan(&src, &[], &[]).unwrap_err();
        assert!(matches!(err, CamelError::MaxStepsExceeded { limit: 64 }));
    }
}
