//! The narrow model-call contract (spec.md §1: "only the contract with
//! 'call language model with system prompt + messages, receive one
//! assistant message' is used") plus usage accounting.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        ChatMessage {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        ChatMessage {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Per-call token accounting (spec.md §4.5 "Usage accounting").
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input: u64,
    pub output: u64,
    pub cache_read: u64,
    pub cache_write: u64,
}

impl Usage {
    pub fn total(&self) -> u64 {
        self.input + self.output + self.cache_read + self.cache_write
    }
}

impl std::ops::AddAssign for Usage {
    fn add_assign(&mut self, other: Usage) {
        self.input += other.input;
        self.output += other.output;
        self.cache_read += other.cache_read;
        self.cache_write += other.cache_write;
    }
}

#[derive(Debug, Clone)]
pub struct ModelResponse {
    pub text: String,
    pub usage: Usage,
}

/// Narrow async contract for a single model call: system prompt + message
/// history in, one assistant message out. Live HTTP transports (Ollama,
/// OpenAI, …) are out of scope here (spec.md §1) — callers supply their own
/// implementation; this crate ships only the deterministic test double
/// below.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn call(
        &self,
        system: &str,
        messages: &[ChatMessage],
        max_output_tokens: u32,
    ) -> anyhow::Result<ModelResponse>;
}

/// A deterministic in-memory model double: returns a fixed queue of
/// responses per logical call, in order, regardless of the prompt content.
/// Used by integration tests (spec.md §8 scenarios) — no network.
pub struct ScriptedModelClient {
    queue: Mutex<VecDeque<ModelResponse>>,
}

impl ScriptedModelClient {
    pub fn new(responses: impl IntoIterator<Item = impl Into<String>>) -> Self {
        let queue = responses
            .into_iter()
            .map(|text| ModelResponse {
                text: text.into(),
                usage: Usage {
                    input: 10,
                    output: 10,
                    cache_read: 0,
                    cache_write: 0,
                },
            })
            .collect();
        ScriptedModelClient {
            queue: Mutex::new(queue),
        }
    }
}

#[async_trait]
impl ModelClient for ScriptedModelClient {
    async fn call(
        &self,
        _system: &str,
        _messages: &[ChatMessage],
        _max_output_tokens: u32,
    ) -> anyhow::Result<ModelResponse> {
        let mut queue = self.queue.lock().expect("scripted model queue poisoned");
        queue
            .pop_front()
            .ok_or_else(|| anyhow::anyhow!("ScriptedModelClient exhausted its response queue"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_client_replays_in_order() {
        let client = ScriptedModelClient::new(["first", "second"]);
        let a = client.call("sys", &[], 100).await.unwrap();
        let b = client.call("sys", &[], 100).await.unwrap();
        assert_eq!(a.text, "first");
        assert_eq!(b.text, "second");
    }

    #[tokio::test]
    async fn scripted_client_errors_once_exhausted() {
        let client = ScriptedModelClient::new(Vec::<&str>::new());
        assert!(client.call("sys", &[], 100).await.is_err());
    }

    #[test]
    fn usage_add_assign_sums_fields() {
        let mut total = Usage::default();
        total += Usage {
            input: 5,
            output: 3,
            cache_read: 0,
            cache_write: 0,
        };
        total += Usage {
            input: 2,
            output: 1,
            cache_read: 1,
            cache_write: 0,
        };
        assert_eq!(total.total(), 12);
    }
}
