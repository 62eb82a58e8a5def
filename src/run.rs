//! The planner/execute/repair loop (spec.md §4.5): drives `S0 plan → S1
//! parse → S2 execute → S3 client-tool-stop → S4 repair → S5 reply`.

use crate::config::{
    self, RunConfig, FINAL_REPLY_MAX_OUTPUT_TOKENS, PLANNER_MAX_OUTPUT_TOKENS,
};
use crate::error::{CamelResult, Issue, IssueStage};
use crate::interpreter::{Interpreter, RunOutcome};
use crate::model::{ChatMessage, ModelClient, Usage};
use crate::parser::parse_plan;
use crate::tooling::{AbortSignal, ToolRegistry};
use crate::trace::ExecutionEvent;
use crate::value::Dict;
use tracing::{info, warn};

/// `{ name, meta }` — one entry per tool invocation (spec.md §6).
#[derive(Debug, Clone)]
pub struct ToolMeta {
    pub name: String,
    pub meta: Option<String>,
}

/// `{ name, meta?, error? }` (spec.md §6).
#[derive(Debug, Clone)]
pub struct LastToolError {
    pub name: String,
    pub meta: Option<String>,
    pub error: Option<String>,
}

/// Everything the core hands back to the caller for one user turn (spec.md §6 Outputs).
#[derive(Debug, Clone)]
pub struct RunResult {
    pub assistant_texts: Vec<String>,
    pub tool_metas: Vec<ToolMeta>,
    pub last_assistant: Option<String>,
    pub last_tool_error: Option<LastToolError>,
    pub did_send_via_messaging_tool: bool,
    pub messaging_tool_sent_texts: Vec<String>,
    pub messaging_tool_sent_targets: Vec<String>,
    pub attempt_usage: Usage,
    pub client_tool_call: Option<(String, Dict)>,
    pub execution_trace: Vec<ExecutionEvent>,
    pub issues: Vec<Issue>,
}

/// Everything one run needs from its caller (spec.md §6 Inputs). The planner
/// and the quarantined extraction primitive are deliberately separate model
/// handles: the purpose statement's "two-model planner/executor" (§1).
pub struct RunInputs<'a> {
    pub user_prompt: String,
    pub history: String,
    pub extra_system_prompt: Option<String>,
    pub tools: &'a ToolRegistry,
    pub planner_model: &'a dyn ModelClient,
    pub extraction_model: &'a dyn ModelClient,
    pub abort: &'a AbortSignal,
    pub config: RunConfig,
}

pub async fn run_agent_loop(inputs: RunInputs<'_>) -> anyhow::Result<RunResult> {
    let run_id = uuid::Uuid::new_v4();
    let _span = tracing::info_span!("camel_run", run_id = %run_id, eval_mode = ?inputs.config.eval_mode).entered();

    let history = config::truncate_history(&inputs.history);
    let mut planner_messages: Vec<ChatMessage> = Vec::new();
    let mut issues: Vec<Issue> = Vec::new();
    let mut attempt_usage = Usage::default();

    let host_tools = inputs.tools.host_tool_names();
    let client_tools = inputs.tools.client_tool_names();

    for attempt in 0..=inputs.config.max_plan_retries {
        inputs.abort.check()?;
        info!(attempt, "planning");

        let system_prompt = build_planner_system_prompt(&inputs, &history);
        planner_messages.push(ChatMessage::user(build_planner_user_message(&inputs, &issues)));

        let response = inputs
            .planner_model
            .call(&system_prompt, &planner_messages, PLANNER_MAX_OUTPUT_TOKENS)
            .await?;
        attempt_usage += response.usage;
        planner_messages.push(ChatMessage::assistant(response.text.clone()));

        let program = match parse_plan(&response.text, &host_tools, &client_tools) {
            Ok(program) => program,
            Err(e) => {
                warn!(attempt, error = %e, "plan parse failed");
                issues.push(Issue::from_error(IssueStage::Plan, &e));
                if attempt == inputs.config.max_plan_retries {
                    anyhow::bail!(e.diagnostic_message());
                }
                continue;
            }
        };

        let mut interp = Interpreter::new(
            inputs.config.eval_mode,
            inputs.tools,
            inputs.extraction_model,
            inputs.abort,
        );
        let outcome = interp.run(&program).await;
        attempt_usage += interp.usage;

        match outcome {
            Ok(RunOutcome::Final(text)) => {
                info!(attempt, "run completed with final step");
                return Ok(finish(interp, attempt_usage, issues, vec![text.clone()], Some(text), None));
            }
            Ok(RunOutcome::ClientToolStop { name, params }) => {
                info!(attempt, tool = %name, "stopped for client-owned tool");
                let client_call = Some((name, params));
                return Ok(finish(interp, attempt_usage, issues, Vec::new(), None, client_call));
            }
            Ok(RunOutcome::Completed) => {
                info!(attempt, "program completed without a final step, issuing fallback reply");
                let reply = final_reply_call(&inputs, &interp).await?;
                attempt_usage += reply.usage;
                let assistant_texts = vec![reply.text.clone()];
                return Ok(finish(interp, attempt_usage, issues, assistant_texts, Some(reply.text), None));
            }
            Err(e) => {
                warn!(attempt, error = %e, "execution failed");
                issues.push(Issue::from_error(IssueStage::Execute, &e));
                if attempt == inputs.config.max_plan_retries {
                    anyhow::bail!(e.diagnostic_message());
                }
            }
        }
    }

    unreachable!("loop always returns or bails by the last attempt")
}

fn finish(
    interp: Interpreter<'_>,
    attempt_usage: Usage,
    issues: Vec<Issue>,
    mut extra_assistant_texts: Vec<String>,
    last_assistant: Option<String>,
    client_tool_call: Option<(String, Dict)>,
) -> RunResult {
    let mut assistant_texts = interp.assistant_texts.clone();
    for text in extra_assistant_texts.drain(..) {
        if !assistant_texts.contains(&text) {
            assistant_texts.push(text);
        }
    }

    let tool_metas = interp
        .trace
        .iter()
        .filter_map(|event| match event {
            ExecutionEvent::Tool { name, blocked: false, .. } if name != "print" => {
                Some(ToolMeta { name: name.clone(), meta: None })
            }
            _ => None,
        })
        .collect();

    let last_tool_error = interp.last_tool_error.as_ref().map(|(name, reason)| LastToolError {
        name: name.clone(),
        meta: None,
        error: Some(reason.clone()),
    });

    RunResult {
        assistant_texts,
        tool_metas,
        last_assistant,
        last_tool_error,
        did_send_via_messaging_tool: interp.did_send_via_messaging_tool,
        messaging_tool_sent_texts: interp.messaging_sent_texts.clone(),
        messaging_tool_sent_targets: interp.messaging_sent_targets.clone(),
        attempt_usage,
        client_tool_call,
        execution_trace: interp.trace,
        issues,
    }
}

fn build_planner_system_prompt(inputs: &RunInputs<'_>, history: &str) -> String {
    let host_tools = inputs.tools.host_tool_names().join(", ");
    let client_tools = inputs.tools.client_tool_names().join(", ");
    let extra = inputs.extra_system_prompt.as_deref().unwrap_or("");
    format!(
        "You are a planner that writes a small restricted program to satisfy the user's \
         request. Available host tools: [{host_tools}]. Client-owned tools: [{client_tools}]. \
         Conversation history:\n{history}\n{extra}"
    )
}

fn build_planner_user_message(inputs: &RunInputs<'_>, issues: &[Issue]) -> String {
    if issues.is_empty() {
        return inputs.user_prompt.clone();
    }
    let summary = issues
        .iter()
        .map(|issue| format!("- [{}] {}", issue.stage, issue.message))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "{}\n\nThe previous attempt failed with the following issue(s); fix the program \
         and try again:\n{summary}",
        inputs.user_prompt
    )
}

async fn final_reply_call(
    inputs: &RunInputs<'_>,
    interp: &Interpreter<'_>,
) -> anyhow::Result<crate::model::ModelResponse> {
    let trace_summary = interp
        .trace
        .iter()
        .map(|event| format!("{event:?}"))
        .collect::<Vec<_>>()
        .join("\n");
    let system = "Write a brief assistant-facing reply summarizing the run for the user.";
    let messages = vec![ChatMessage::user(format!(
        "Trace:\n{trace_summary}\n\nDraft assistant texts so far: {:?}",
        interp.assistant_texts
    ))];
    inputs
        .planner_model
        .call(system, &messages, FINAL_REPLY_MAX_OUTPUT_TOKENS)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ScriptedModelClient;
    use crate::policy::EvalMode;
    use crate::tooling::{ToolDescriptor, ToolExecutor, ToolResult};
    use crate::value::{Dict, Value};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    struct RecordingSend {
        invoked: Arc<AtomicBool>,
    }

    #[async_trait]
    impl ToolExecutor for RecordingSend {
        async fn execute(&self, _call_id: &str, args: &Dict, _abort: &AbortSignal) -> CamelResult<ToolResult> {
            self.invoked.store(true, Ordering::SeqCst);
            Ok(ToolResult::ok(format!("sent: {:?}", args.get("body"))))
        }
    }

    fn send_message_registry(invoked: Arc<AtomicBool>) -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register(
            ToolDescriptor::new("send_message", "Send Message"),
            Arc::new(RecordingSend { invoked }),
        );
        registry
    }

    #[tokio::test]
    async fn arithmetic_plan_completes_on_first_attempt() {
        let tools = ToolRegistry::new();
        let planner = ScriptedModelClient::new(["value = 1 + 2 * 3\nfinal(\"ok\") if value == 7 else final(\"bad\")\n"]);
        let extraction = ScriptedModelClient::new(Vec::<&str>::new());
        let abort = AbortSignal::new();
        let inputs = RunInputs {
            user_prompt: "do the arithmetic thing".to_string(),
            history: String::new(),
            extra_system_prompt: None,
            tools: &tools,
            planner_model: &planner,
            extraction_model: &extraction,
            abort: &abort,
            config: RunConfig::default(),
        };
        let result = run_agent_loop(inputs).await.unwrap();
        assert_eq!(result.assistant_texts, vec!["ok".to_string()]);
        assert!(result.last_tool_error.is_none());
    }

    #[tokio::test]
    async fn parser_repair_recovers_on_second_attempt() {
        let tools = ToolRegistry::new();
        let planner = ScriptedModelClient::new(["items = [\nfinal(\"bad\")", "final(\"recovered\")\n"]);
        let extraction = ScriptedModelClient::new(Vec::<&str>::new());
        let abort = AbortSignal::new();
        let inputs = RunInputs {
            user_prompt: "do something".to_string(),
            history: String::new(),
            extra_system_prompt: None,
            tools: &tools,
            planner_model: &planner,
            extraction_model: &extraction,
            abort: &abort,
            config: RunConfig::default(),
        };
        let result = run_agent_loop(inputs).await.unwrap();
        assert_eq!(result.assistant_texts, vec!["recovered".to_string()]);
        assert_eq!(result.issues.len(), 1);
        assert!(result.issues[0].trusted);
    }

    #[tokio::test]
    async fn unknown_tool_repair_recovers_on_second_attempt() {
        let tools = ToolRegistry::new();
        let planner = ScriptedModelClient::new(["open(path=\"/tmp/x\")\n", "final(\"recovered\")\n"]);
        let extraction = ScriptedModelClient::new(Vec::<&str>::new());
        let abort = AbortSignal::new();
        let inputs = RunInputs {
            user_prompt: "open a file".to_string(),
            history: String::new(),
            extra_system_prompt: None,
            tools: &tools,
            planner_model: &planner,
            extraction_model: &extraction,
            abort: &abort,
            config: RunConfig::default(),
        };
        let result = run_agent_loop(inputs).await.unwrap();
        assert_eq!(result.assistant_texts, vec!["recovered".to_string()]);
        assert!(result.issues[0].message.contains("open"));
    }

    #[tokio::test]
    async fn qllm_extraction_feeds_untrusted_value_into_tool_call() {
        let invoked = Arc::new(AtomicBool::new(false));
        let tools = send_message_registry(invoked.clone());
        let planner = ScriptedModelClient::new([
            "r = query_ai_assistant(\"extract name\", {\"text\": \"name is Alice\"}, \
             {\"fields\": {\"name\": {\"type\": \"string\", \"required\": true}}})\n\
             send_message(to=\"owner\", body=r.name)\nfinal(\"done\")\n",
        ]);
        let extraction = ScriptedModelClient::new([
            "{\"have_enough_information\": true, \"name\": \"Alice\"}",
        ]);
        let abort = AbortSignal::new();
        let inputs = RunInputs {
            user_prompt: "extract and notify the owner".to_string(),
            history: String::new(),
            extra_system_prompt: None,
            tools: &tools,
            planner_model: &planner,
            extraction_model: &extraction,
            abort: &abort,
            config: RunConfig::new(EvalMode::Normal),
        };
        let result = run_agent_loop(inputs).await.unwrap();
        assert!(invoked.load(Ordering::SeqCst));
        assert_eq!(result.last_assistant, Some("done".to_string()));
        assert!(result.last_tool_error.is_none());
    }

    #[tokio::test]
    async fn strict_mode_denies_tool_call_tainted_by_extraction_output() {
        let invoked = Arc::new(AtomicBool::new(false));
        let tools = send_message_registry(invoked.clone());
        let planner = ScriptedModelClient::new([
            "r = query_ai_assistant(\"extract name\", {\"text\": \"name is Alice\"}, \
             {\"fields\": {\"name\": {\"type\": \"string\", \"required\": true}}})\n\
             send_message(to=\"owner\", body=r.name)\nfinal(\"done\")\n",
        ]);
        let extraction = ScriptedModelClient::new([
            "{\"have_enough_information\": true, \"name\": \"Alice\"}",
        ]);
        let abort = AbortSignal::new();
        let inputs = RunInputs {
            user_prompt: "extract and notify the owner".to_string(),
            history: String::new(),
            extra_system_prompt: None,
            tools: &tools,
            planner_model: &planner,
            extraction_model: &extraction,
            abort: &abort,
            config: RunConfig::new(EvalMode::Strict),
        };
        let result = run_agent_loop(inputs).await.unwrap();
        assert!(!invoked.load(Ordering::SeqCst));
        assert!(result.last_tool_error.is_some());
    }

    #[tokio::test]
    async fn client_owned_tool_stops_the_run_for_the_host_to_resume() {
        let mut tools = ToolRegistry::new();
        tools.register_client_tool("open_camera");
        let planner = ScriptedModelClient::new(["open_camera(mode=\"selfie\")\n"]);
        let extraction = ScriptedModelClient::new(Vec::<&str>::new());
        let abort = AbortSignal::new();
        let inputs = RunInputs {
            user_prompt: "take a selfie".to_string(),
            history: String::new(),
            extra_system_prompt: None,
            tools: &tools,
            planner_model: &planner,
            extraction_model: &extraction,
            abort: &abort,
            config: RunConfig::default(),
        };
        let result = run_agent_loop(inputs).await.unwrap();
        let (name, params) = result.client_tool_call.expect("expected a client tool stop");
        assert_eq!(name, "open_camera");
        assert_eq!(params.get("mode"), Some(&Value::Str("selfie".to_string())));
    }
}
