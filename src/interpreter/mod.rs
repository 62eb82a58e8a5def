//! Statement execution: drives `Step` against an [`Environment`], dispatching
//! tool calls through the policy engine and extraction calls through
//! [`crate::qllm`] (spec.md §4.2, §4.4).

pub mod builtins;
pub mod expr;

use crate::capability::{Capability, SourceId};
use crate::env::Environment;
use crate::error::{CamelError, CamelResult};
use crate::interpreter::expr::{bind_targets, eval_expr, iterate, tag_tool_output};
use crate::ir::{Expr, Program, Step};
use crate::model::{ModelClient, Usage};
use crate::policy::{EvalMode, PolicyEngine};
use crate::qllm;
use crate::tooling::{self, AbortSignal, ToolRegistry};
use crate::trace::{summarize_value, ExecutionEvent};
use crate::value::{Dict, Value};
use regex::Regex;
use std::future::Future;
use std::pin::Pin;
use std::sync::OnceLock;

/// What running a program produced, mirroring the S2/S3/S5 outcomes of the
/// planner loop (spec.md §4.5).
#[derive(Debug)]
pub enum RunOutcome {
    Final(String),
    ClientToolStop { name: String, params: Dict },
    Completed,
}

fn template_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z_][A-Za-z0-9_]*)*)\s*\}\}").unwrap()
    })
}

/// Owns one run's environment, trace, and accumulated side-channel state
/// (usage, messaging delivery, the monotonic strict-dependency flag).
pub struct Interpreter<'a> {
    pub env: Environment,
    pub trace: Vec<ExecutionEvent>,
    pub usage: Usage,
    pub assistant_texts: Vec<String>,
    pub last_tool_error: Option<(String, String)>,
    pub client_tool_call: Option<(String, Dict)>,
    pub did_send_via_messaging_tool: bool,
    pub messaging_sent_texts: Vec<String>,
    pub messaging_sent_targets: Vec<String>,
    strict_dependency: bool,
    step_counter: usize,
    policy: PolicyEngine,
    tools: &'a ToolRegistry,
    model: &'a dyn ModelClient,
    abort: &'a AbortSignal,
}

impl<'a> Interpreter<'a> {
    pub fn new(
        mode: EvalMode,
        tools: &'a ToolRegistry,
        model: &'a dyn ModelClient,
        abort: &'a AbortSignal,
    ) -> Self {
        Interpreter {
            env: Environment::new(),
            trace: Vec::new(),
            usage: Usage::default(),
            assistant_texts: Vec::new(),
            last_tool_error: None,
            client_tool_call: None,
            did_send_via_messaging_tool: false,
            messaging_sent_texts: Vec::new(),
            messaging_sent_targets: Vec::new(),
            strict_dependency: false,
            step_counter: 0,
            policy: PolicyEngine::new(mode),
            tools,
            model,
            abort,
        }
    }

    pub async fn run(&mut self, program: &Program) -> CamelResult<RunOutcome> {
        match self.exec_steps(&program.steps, Capability::trusted_literal()).await? {
            Some(outcome) => Ok(outcome),
            None => Ok(RunOutcome::Completed),
        }
    }

    fn next_step(&mut self) -> usize {
        self.step_counter += 1;
        self.step_counter
    }

    /// Merges the control-flow capability into a binding only in strict mode
    /// (spec.md §4.2 "in strict mode is merged with the current control-flow
    /// capability").
    fn bind_cap(&self, value_cap: Capability, control_cap: &Capability) -> Capability {
        if self.policy.mode() == EvalMode::Strict {
            Capability::merge(&value_cap, control_cap)
        } else {
            value_cap
        }
    }

    /// Executes a block of steps. Boxed so `If`/`For` bodies (which call back
    /// into this same function) can recurse across `.await` points without an
    /// infinitely-sized future.
    fn exec_steps<'s>(
        &'s mut self,
        steps: &'s [Step],
        control_cap: Capability,
    ) -> Pin<Box<dyn Future<Output = CamelResult<Option<RunOutcome>>> + 's>> {
        Box::pin(async move {
            for step in steps {
                self.abort.check()?;
                if let Some(outcome) = self.exec_step(step, control_cap.clone()).await? {
                    return Ok(Some(outcome));
                }
            }
            Ok(None)
        })
    }

    async fn exec_step(&mut self, step: &Step, control_cap: Capability) -> CamelResult<Option<RunOutcome>> {
        match step {
            Step::Assign { target, expr } => {
                let (value, cap) = eval_expr(&mut self.env, expr)?;
                let step = self.next_step();
                self.env.set(target.clone(), value, self.bind_cap(cap, &control_cap));
                self.trace.push(ExecutionEvent::Assign { step, name: target.clone() });
                Ok(None)
            }
            Step::Unpack { targets, expr } => {
                let (value, cap) = eval_expr(&mut self.env, expr)?;
                let step = self.next_step();
                let items = match &value {
                    Value::List(items) | Value::Tuple(items) => items.clone(),
                    other => {
                        return Err(CamelError::runtime_trusted(format!(
                            "cannot unpack non-iterable value of type '{}'",
                            other.type_name()
                        )))
                    }
                };
                if items.len() != targets.len() {
                    return Err(CamelError::runtime_trusted(format!(
                        "expected {} values to unpack, got {}",
                        targets.len(),
                        items.len()
                    )));
                }
                let bound = self.bind_cap(cap, &control_cap);
                for (name, item) in targets.iter().zip(items) {
                    self.env.set(name.clone(), item, bound.clone());
                    self.trace.push(ExecutionEvent::Assign { step, name: name.clone() });
                }
                Ok(None)
            }
            Step::Tool { name, args, save_as, source_loc: _ } => {
                self.exec_tool_step(name, args, save_as, control_cap).await
            }
            Step::Qllm { save_as, instruction, input, schema } => {
                self.exec_qllm_step(save_as, instruction, input, schema).await
            }
            Step::If { cond, then_branch, else_branch } => {
                let (cond_value, cond_cap) = eval_expr(&mut self.env, cond)?;
                let branch_control = Capability::merge(&control_cap, &cond_cap);
                let branch = if cond_value.truthy() { then_branch } else { else_branch };
                self.exec_steps(branch, branch_control).await
            }
            Step::For { targets, iterable, body } => {
                let (iter_value, iter_cap) = eval_expr(&mut self.env, iterable)?;
                let loop_control = Capability::merge(&control_cap, &iter_cap);
                let items = iterate(&iter_value, &iter_cap)?;
                let snapshots: Vec<_> = targets.iter().map(|t| self.env.snapshot(t)).collect();
                let mut outcome = None;
                for (value, item_cap) in items {
                    bind_targets(&mut self.env, targets, &value, &item_cap);
                    outcome = self.exec_steps(body, loop_control.clone()).await?;
                    if outcome.is_some() {
                        break;
                    }
                }
                for (target, snapshot) in targets.iter().zip(snapshots) {
                    self.env.restore(target, snapshot);
                }
                Ok(outcome)
            }
            Step::Raise { error } => {
                let (value, cap) = eval_expr(&mut self.env, error)?;
                Err(CamelError::Raised {
                    message: value.display_text(),
                    trusted: cap.trusted,
                })
            }
            Step::Final { template } => {
                let step_no = self.next_step();
                let (text, _cap) = self.render_template(template)?;
                self.trace.push(ExecutionEvent::Final {
                    step: step_no,
                    text: text.clone(),
                });
                self.assistant_texts.push(text.clone());
                Ok(Some(RunOutcome::Final(text)))
            }
        }
    }

    async fn exec_tool_step(
        &mut self,
        name: &str,
        args: &[(String, Expr)],
        save_as: &Option<String>,
        control_cap: Capability,
    ) -> CamelResult<Option<RunOutcome>> {
        let mut dict = Dict::new();
        let mut args_cap = Capability::trusted_literal();
        for (key, expr) in args {
            let (value, cap) = eval_expr(&mut self.env, expr)?;
            args_cap = Capability::merge(&args_cap, &cap);
            dict.insert(key.clone(), value);
        }
        let step_no = self.next_step();

        if name.eq_ignore_ascii_case("print") {
            let text = dict
                .values()
                .map(Value::display_text)
                .collect::<Vec<_>>()
                .join(" ");
            self.assistant_texts.push(text.clone());
            self.trace.push(ExecutionEvent::Tool {
                step: step_no,
                name: name.to_string(),
                args_summary: summarize_value(&Value::Dict(dict)),
                result_summary: Some(summarize_value(&Value::Str(text))),
                blocked: false,
                reason: None,
                trusted: args_cap.trusted,
            });
            return Ok(None);
        }

        let side_effect_free = self.tools.is_side_effect_free(name);
        let decision = self.policy.evaluate(
            name,
            side_effect_free,
            &args_cap,
            &control_cap,
            self.strict_dependency,
        );
        if !decision.allowed {
            let reason = decision.reason.unwrap_or_default();
            self.last_tool_error = Some((name.to_string(), reason.clone()));
            self.trace.push(ExecutionEvent::Tool {
                step: step_no,
                name: name.to_string(),
                args_summary: summarize_value(&Value::Dict(dict)),
                result_summary: None,
                blocked: true,
                reason: Some(reason),
                trusted: args_cap.trusted,
            });
            return Ok(None);
        }

        if self.tools.is_client_tool(name) {
            self.client_tool_call = Some((name.to_string(), dict.clone()));
            return Ok(Some(RunOutcome::ClientToolStop {
                name: name.to_string(),
                params: dict,
            }));
        }

        if tooling::is_messaging_send(name, &dict) {
            self.did_send_via_messaging_tool = true;
            if let Some(Value::Str(body)) = dict.get("body") {
                self.messaging_sent_texts.push(body.clone());
            }
            if let Some(Value::Str(to)) = dict.get("to") {
                self.messaging_sent_targets.push(to.clone());
            }
        }

        let call_id = format!("call-{step_no}");
        let result = self.tools.invoke(&call_id, name, &dict, self.abort).await?;
        let output_cap = tag_tool_output(args_cap, name);
        if result.is_error {
            self.last_tool_error = Some((name.to_string(), result.content_text.clone()));
        }
        self.trace.push(ExecutionEvent::Tool {
            step: step_no,
            name: name.to_string(),
            args_summary: summarize_value(&Value::Dict(dict)),
            result_summary: Some(tooling::sanitize_result_text(&result.content_text)),
            blocked: false,
            reason: None,
            trusted: output_cap.trusted,
        });
        if let Some(target) = save_as {
            let bound = self.bind_cap(output_cap, &control_cap);
            self.env.set(target.clone(), Value::Str(result.content_text), bound);
        }
        Ok(None)
    }

    async fn exec_qllm_step(
        &mut self,
        save_as: &str,
        instruction: &str,
        input: &Expr,
        schema: &crate::ir::Schema,
    ) -> CamelResult<Option<RunOutcome>> {
        let (input_value, input_cap) = eval_expr(&mut self.env, input)?;
        let step_no = self.next_step();
        let (dict, usage) =
            qllm::query_ai_assistant(self.model, instruction, &input_value, schema, self.abort).await?;
        self.usage += usage;
        self.strict_dependency = true;
        let cap = Capability::merge(&input_cap, &Capability::untrusted(SourceId::qllm(save_as)));
        self.trace.push(ExecutionEvent::Qllm {
            step: step_no,
            save_as: save_as.to_string(),
            output_summary: summarize_value(&Value::Dict(dict.clone())),
            trusted: false,
        });
        self.env.set(save_as.to_string(), Value::Dict(dict), cap);
        Ok(None)
    }

    /// Renders a `final` template's `{{name.path}}` references (spec.md §4.2
    /// "missing refs render empty").
    fn render_template(&mut self, template: &str) -> CamelResult<(String, Capability)> {
        let re = template_regex();
        let mut cap = Capability::trusted_literal();
        let mut out = String::with_capacity(template.len());
        let mut last_end = 0;
        for m in re.captures_iter(template) {
            let whole = m.get(0).unwrap();
            out.push_str(&template[last_end..whole.start()]);
            let path = &m[1];
            let mut segments = path.split('.');
            let var_name = segments.next().unwrap().to_string();
            let rest: Vec<String> = segments.map(str::to_string).collect();
            let expr = if rest.is_empty() {
                Expr::Var(var_name)
            } else {
                Expr::Attr {
                    base: Box::new(Expr::Var(var_name)),
                    path: rest,
                }
            };
            if let Ok((value, value_cap)) = eval_expr(&mut self.env, &expr) {
                out.push_str(&value.display_text());
                cap = Capability::merge(&cap, &value_cap);
            }
            last_end = whole.end();
        }
        out.push_str(&template[last_end..]);
        Ok((out, cap))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ScriptedModelClient;
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    fn no_abort() -> AbortSignal {
        AbortSignal::new()
    }

    #[tokio::test]
    async fn arithmetic_and_conditional_final_matches_ok_branch() {
        let program = crate::parser::code::parse(
            "value = 1 + 2 * 3\nfinal(\"ok\") if value == 7 else final(\"bad\")\n",
        )
        .unwrap();
        let tools = ToolRegistry::new();
        let model = ScriptedModelClient::new(Vec::<&str>::new());
        let abort = no_abort();
        let mut interp = Interpreter::new(EvalMode::Strict, &tools, &model, &abort);
        let outcome = interp.run(&program).await.unwrap();
        match outcome {
            RunOutcome::Final(text) => assert_eq!(text, "ok"),
            other => panic!("expected Final, got {other:?}"),
        }
        assert_eq!(interp.assistant_texts, vec!["ok".to_string()]);
    }

    #[tokio::test]
    async fn for_loop_accumulates_into_final_text() {
        let program = crate::parser::code::parse(
            "total = 0\nfor x in [1, 2, 3]:\n    total = total + x\nfinal(str(total))\n",
        )
        .unwrap();
        let tools = ToolRegistry::new();
        let model = ScriptedModelClient::new(Vec::<&str>::new());
        let abort = no_abort();
        let mut interp = Interpreter::new(EvalMode::Strict, &tools, &model, &abort);
        let outcome = interp.run(&program).await.unwrap();
        match outcome {
            RunOutcome::Final(text) => assert_eq!(text, "6"),
            other => panic!("expected Final, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn qllm_extraction_binds_untrusted_dict_and_final_resolves_it() {
        let mut fields = BTreeMap::new();
        fields.insert(
            "name".to_string(),
            crate::ir::FieldSpec {
                field_type: crate::ir::FieldType::String,
                required: true,
                description: None,
                items: None,
                properties: None,
            },
        );
        let program = Program {
            steps: vec![
                Step::Qllm {
                    save_as: "r".to_string(),
                    instruction: "extract name".to_string(),
                    input: Expr::Literal(Value::Str("name is Alice".to_string())),
                    schema: crate::ir::Schema { description: None, fields },
                },
                Step::Final {
                    template: "{{r.name}}".to_string(),
                },
            ],
        };
        let tools = ToolRegistry::new();
        let model = ScriptedModelClient::new([r#"{"have_enough_information": true, "name": "Alice"}"#]);
        let abort = no_abort();
        let mut interp = Interpreter::new(EvalMode::Strict, &tools, &model, &abort);
        let outcome = interp.run(&program).await.unwrap();
        match outcome {
            RunOutcome::Final(text) => assert_eq!(text, "Alice"),
            other => panic!("expected Final, got {other:?}"),
        }
        let (_, cap) = interp.env.get("r").unwrap();
        assert!(!cap.trusted);
    }

    struct RecordingExecutor {
        invoked: Arc<AtomicBool>,
    }

    #[async_trait]
    impl tooling::ToolExecutor for RecordingExecutor {
        async fn execute(
            &self,
            _call_id: &str,
            _args: &Dict,
            _abort: &AbortSignal,
        ) -> CamelResult<tooling::ToolResult> {
            self.invoked.store(true, Ordering::SeqCst);
            Ok(tooling::ToolResult::ok("sent"))
        }
    }

    fn qllm_then_send_program() -> Program {
        let mut fields = BTreeMap::new();
        fields.insert(
            "name".to_string(),
            crate::ir::FieldSpec {
                field_type: crate::ir::FieldType::String,
                required: true,
                description: None,
                items: None,
                properties: None,
            },
        );
        Program {
            steps: vec![
                Step::Qllm {
                    save_as: "r".to_string(),
                    instruction: "extract name".to_string(),
                    input: Expr::Literal(Value::Str("name is Alice".to_string())),
                    schema: crate::ir::Schema { description: None, fields },
                },
                Step::Tool {
                    name: "send_message".to_string(),
                    args: vec![
                        ("to".to_string(), Expr::Literal(Value::Str("x".to_string()))),
                        (
                            "body".to_string(),
                            Expr::Attr {
                                base: Box::new(Expr::Var("r".to_string())),
                                path: vec!["name".to_string()],
                            },
                        ),
                    ],
                    save_as: None,
                    source_loc: None,
                },
            ],
        }
    }

    #[tokio::test]
    async fn strict_mode_denies_tool_call_tainted_by_qllm_output() {
        let program = qllm_then_send_program();
        let mut tools = ToolRegistry::new();
        let invoked = Arc::new(AtomicBool::new(false));
        tools.register(
            tooling::ToolDescriptor::new("send_message", "Send Message"),
            Arc::new(RecordingExecutor { invoked: invoked.clone() }),
        );
        let model = ScriptedModelClient::new([r#"{"have_enough_information": true, "name": "Alice"}"#]);
        let abort = no_abort();
        let mut interp = Interpreter::new(EvalMode::Strict, &tools, &model, &abort);
        interp.run(&program).await.unwrap();
        assert!(!invoked.load(Ordering::SeqCst));
        let (name, reason) = interp.last_tool_error.unwrap();
        assert_eq!(name, "send_message");
        assert!(reason.contains("state-changing"));
    }

    #[tokio::test]
    async fn normal_mode_allows_tool_call_tainted_by_qllm_output() {
        let program = qllm_then_send_program();
        let mut tools = ToolRegistry::new();
        let invoked = Arc::new(AtomicBool::new(false));
        tools.register(
            tooling::ToolDescriptor::new("send_message", "Send Message"),
            Arc::new(RecordingExecutor { invoked: invoked.clone() }),
        );
        let model = ScriptedModelClient::new([r#"{"have_enough_information": true, "name": "Alice"}"#]);
        let abort = no_abort();
        let mut interp = Interpreter::new(EvalMode::Normal, &tools, &model, &abort);
        interp.run(&program).await.unwrap();
        assert!(invoked.load(Ordering::SeqCst));
        assert!(interp.last_tool_error.is_none());
    }
}
