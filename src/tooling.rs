//! Tool adapter: registered host tools, the two virtual tools the
//! interpreter handles directly, and lifecycle event emission (spec.md
//! §4.6).

use crate::error::{CamelError, CamelResult};
use crate::value::Dict;
use async_trait::async_trait;
use serde_json::Value as Json;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// A host-registered tool's static descriptor. `side_effect_free` is the
/// static property the policy engine partitions on (spec.md §4.4).
#[derive(Debug, Clone)]
pub struct ToolDescriptor {
    pub name: String,
    pub label: String,
    pub description: String,
    pub parameter_schema: Json,
    pub side_effect_free: bool,
}

impl ToolDescriptor {
    pub fn new(name: impl Into<String>, label: impl Into<String>) -> Self {
        ToolDescriptor {
            name: name.into(),
            label: label.into(),
            description: String::new(),
            parameter_schema: Json::Object(Default::default()),
            side_effect_free: false,
        }
    }

    pub fn side_effect_free(mut self) -> Self {
        self.side_effect_free = true;
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct ToolResult {
    pub content_text: String,
    pub details: Json,
    pub is_error: bool,
}

impl ToolResult {
    pub fn ok(content_text: impl Into<String>) -> Self {
        ToolResult {
            content_text: content_text.into(),
            details: Json::Null,
            is_error: false,
        }
    }

    pub fn error(content_text: impl Into<String>) -> Self {
        ToolResult {
            content_text: content_text.into(),
            details: Json::Null,
            is_error: true,
        }
    }
}

/// Cooperative abort signal observed at suspension points (spec.md §5).
#[derive(Debug, Clone, Default)]
pub struct AbortSignal {
    flag: Arc<std::sync::atomic::AtomicBool>,
}

impl AbortSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.flag.store(true, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.flag.load(std::sync::atomic::Ordering::SeqCst)
    }

    pub fn check(&self) -> CamelResult<()> {
        if self.is_aborted() {
            Err(CamelError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, call_id: &str, args: &Dict, abort: &AbortSignal) -> CamelResult<ToolResult>;
}

/// Lifecycle event emitted around a tool invocation (spec.md §4.6,
/// `OnEvent` stream `"tool"`).
#[derive(Debug, Clone)]
pub enum LifecycleEvent {
    ToolStart { call_id: String, name: String },
    ToolResult { call_id: String, name: String, is_error: bool },
}

pub trait EventSink: Send + Sync {
    fn emit(&self, event: LifecycleEvent);
}

/// An event sink that drops everything, for callers that don't need one.
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn emit(&self, _event: LifecycleEvent) {}
}

/// Known by-name + arg-shape signatures of messaging-send tools, used to
/// detect out-of-band delivery (spec.md §4.6 "Recognizes messaging-send
/// actions by name + args shape"). Kept as a small static table rather than
/// a descriptor flag since hosts name these tools inconsistently.
const MESSAGING_SEND_ARG_KEYS: &[&str] = &["to", "body"];

pub fn is_messaging_send(name: &str, args: &Dict) -> bool {
    let name_matches = name.contains("send_message") || name.contains("message");
    name_matches && MESSAGING_SEND_ARG_KEYS.iter().all(|k| args.contains_key(k))
}

/// Caps a tool result's text before it enters the trace (spec.md §4.6
/// "caps string lengths").
const MAX_RESULT_TEXT: usize = 4000;

pub fn sanitize_result_text(text: &str) -> String {
    crate::error::truncate_chars(text, MAX_RESULT_TEXT)
}

pub struct ToolRegistry {
    descriptors: HashMap<String, ToolDescriptor>,
    executors: HashMap<String, Arc<dyn ToolExecutor>>,
    client_tool_names: HashSet<String>,
    events: Arc<dyn EventSink>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        ToolRegistry {
            descriptors: HashMap::new(),
            executors: HashMap::new(),
            client_tool_names: HashSet::new(),
            events: Arc::new(NullEventSink),
        }
    }

    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events = sink;
        self
    }

    /// Registers a host tool. Host tool names are normalized lower-case
    /// (spec.md §4.6 "name (unique, lower-cased)").
    pub fn register(&mut self, descriptor: ToolDescriptor, executor: Arc<dyn ToolExecutor>) {
        let key = descriptor.name.to_lowercase();
        self.executors.insert(key.clone(), executor);
        self.descriptors.insert(key, descriptor);
    }

    /// Marks a tool name as host-declared "client-owned": the interpreter
    /// stops the run (S3) instead of invoking an executor.
    pub fn register_client_tool(&mut self, name: impl Into<String>) {
        self.client_tool_names.insert(name.into().to_lowercase());
    }

    pub fn host_tool_names(&self) -> Vec<String> {
        self.descriptors.keys().cloned().collect()
    }

    pub fn client_tool_names(&self) -> Vec<String> {
        self.client_tool_names.iter().cloned().collect()
    }

    pub fn is_client_tool(&self, name: &str) -> bool {
        self.client_tool_names.contains(&name.to_lowercase())
    }

    pub fn is_side_effect_free(&self, name: &str) -> bool {
        self.descriptors
            .get(&name.to_lowercase())
            .map(|d| d.side_effect_free)
            .unwrap_or(false)
    }

    pub async fn invoke(
        &self,
        call_id: &str,
        name: &str,
        args: &Dict,
        abort: &AbortSignal,
    ) -> CamelResult<ToolResult> {
        let key = name.to_lowercase();
        let executor = self
            .executors
            .get(&key)
            .ok_or_else(|| CamelError::runtime_trusted(format!("no executor registered for tool '{name}'")))?;
        self.events.emit(LifecycleEvent::ToolStart {
            call_id: call_id.to_string(),
            name: name.to_string(),
        });
        let result = executor.execute(call_id, args, abort).await;
        self.events.emit(LifecycleEvent::ToolResult {
            call_id: call_id.to_string(),
            name: name.to_string(),
            is_error: result.as_ref().map(|r| r.is_error).unwrap_or(true),
        });
        result
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    struct Echo;

    #[async_trait]
    impl ToolExecutor for Echo {
        async fn execute(&self, _call_id: &str, args: &Dict, _abort: &AbortSignal) -> CamelResult<ToolResult> {
            Ok(ToolResult::ok(format!("{:?}", args.get("body"))))
        }
    }

    #[tokio::test]
    async fn invoke_dispatches_to_registered_executor() {
        let mut registry = ToolRegistry::new();
        registry.register(ToolDescriptor::new("send_message", "Send Message"), Arc::new(Echo));
        let mut args = Dict::new();
        args.insert("body".to_string(), Value::Str("hi".to_string()));
        let result = registry
            .invoke("call-1", "send_message", &args, &AbortSignal::new())
            .await
            .unwrap();
        assert!(!result.is_error);
    }

    #[test]
    fn messaging_send_detected_by_name_and_shape() {
        let mut args = Dict::new();
        args.insert("to".to_string(), Value::Str("x".to_string()));
        args.insert("body".to_string(), Value::Str("hi".to_string()));
        assert!(is_messaging_send("send_message", &args));
        assert!(!is_messaging_send("read_file", &args));
    }

    #[test]
    fn abort_signal_check_errors_after_abort() {
        let signal = AbortSignal::new();
        assert!(signal.check().is_ok());
        signal.abort();
        assert!(signal.check().is_err());
    }

    #[test]
    fn unregistered_client_tool_is_not_side_effect_free() {
        let registry = ToolRegistry::new();
        assert!(!registry.is_side_effect_free("anything"));
    }
}
