//! Capability labels: the provenance tag every [`crate::value::Value`] carries
//! through the environment (spec.md §3 "Capability").

use std::collections::BTreeSet;
use std::fmt;

/// Opaque provenance tag. Kept as a string newtype (not an enum) because the
/// source set grows with freeform tags (`qllm:<saveAs>`, tool names, `user`,
/// loop-guard markers) that the interpreter mints as it goes.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SourceId(String);

impl SourceId {
    pub fn user() -> Self {
        SourceId("user".to_string())
    }

    pub fn literal() -> Self {
        SourceId("literal".to_string())
    }

    pub fn tool(name: &str) -> Self {
        SourceId(format!("tool:{name}"))
    }

    pub fn qllm(save_as: &str) -> Self {
        SourceId(format!("qllm:{save_as}"))
    }

    pub fn control_flow() -> Self {
        SourceId("control-flow".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Provenance label attached to every value in the environment.
///
/// `trusted` is conjunctive under merge: a single untrusted ancestor taints
/// the whole derived value (spec.md §3 invariant 2).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capability {
    pub trusted: bool,
    pub sources: BTreeSet<SourceId>,
}

impl Capability {
    pub fn trusted_literal() -> Self {
        Capability {
            trusted: true,
            sources: BTreeSet::new(),
        }
    }

    pub fn from_user() -> Self {
        Capability {
            trusted: true,
            sources: BTreeSet::from([SourceId::user()]),
        }
    }

    pub fn untrusted(source: SourceId) -> Self {
        Capability {
            trusted: false,
            sources: BTreeSet::from([source]),
        }
    }

    /// merge(A, B) = { trusted = A.trusted ∧ B.trusted, sources = A.sources ∪ B.sources }.
    pub fn merge(a: &Capability, b: &Capability) -> Capability {
        let mut sources = a.sources.clone();
        sources.extend(b.sources.iter().cloned());
        Capability {
            trusted: a.trusted && b.trusted,
            sources,
        }
    }

    pub fn merge_all<'a>(caps: impl IntoIterator<Item = &'a Capability>) -> Capability {
        caps.into_iter()
            .fold(Capability::trusted_literal(), |acc, c| {
                Capability::merge(&acc, c)
            })
    }

    pub fn merge_into(&mut self, other: &Capability) {
        self.trusted = self.trusted && other.trusted;
        self.sources.extend(other.sources.iter().cloned());
    }

    pub fn with_source(mut self, source: SourceId) -> Self {
        self.sources.insert(source);
        self
    }

    pub fn mark_untrusted(mut self, source: SourceId) -> Self {
        self.trusted = false;
        self.sources.insert(source);
        self
    }

    /// Human-readable tainting-sources summary, used in policy denial reasons.
    pub fn sources_summary(&self) -> String {
        if self.sources.is_empty() {
            return "(no recorded sources)".to_string();
        }
        self.sources
            .iter()
            .map(|s| s.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_is_conjunctive_on_trust() {
        let a = Capability::from_user();
        let b = Capability::untrusted(SourceId::qllm("r"));
        let merged = Capability::merge(&a, &b);
        assert!(!merged.trusted);
        assert!(merged.sources.contains(&SourceId::user()));
        assert!(merged.sources.contains(&SourceId::qllm("r")));
    }

    #[test]
    fn merge_all_of_trusted_values_stays_trusted() {
        let a = Capability::trusted_literal();
        let b = Capability::from_user();
        let merged = Capability::merge_all([&a, &b]);
        assert!(merged.trusted);
    }

    #[test]
    fn sources_summary_lists_sorted_sources() {
        let cap = Capability::untrusted(SourceId::tool("send_message"))
            .with_source(SourceId::qllm("r"));
        assert_eq!(cap.sources_summary(), "qllm:r, tool:send_message");
    }
}
