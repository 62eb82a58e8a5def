//! Tracing setup. This crate is a library (§6 "no CLI surface") so it never
//! installs a global subscriber on its own; embedding applications call
//! [`setup_tracing_with_settings`] or their own equivalent of it, and tests
//! use [`init_test_subscriber`].

use std::sync::OnceLock;
use tracing_subscriber::{fmt::time::ChronoUtc, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static TEST_SUBSCRIBER: OnceLock<()> = OnceLock::new();

pub struct LoggingSettings<'a> {
    pub level: Option<&'a str>,
}

impl<'a> Default for LoggingSettings<'a> {
    fn default() -> Self {
        LoggingSettings { level: None }
    }
}

fn filter_for(level: &str) -> EnvFilter {
    EnvFilter::new(format!(
        "camel_core={level},tokio=warn,runtime=warn,mio=warn"
    ))
}

/// Installs a stdout `tracing` subscriber for an embedding application. Safe
/// to call at most once per process; a second call is a no-op (`try_init`
/// swallows the "already set" error the way the teacher's setup does).
pub fn setup_tracing_with_settings(settings: LoggingSettings<'_>) -> anyhow::Result<()> {
    let filter = match settings.level {
        Some(level) => filter_for(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| filter_for("info")),
    };

    let layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_file(true)
        .with_line_number(true)
        .compact()
        .with_timer(ChronoUtc::new("%Y-%m-%dT%H:%M:%S".to_string()));

    let _ = tracing_subscriber::registry().with(filter).with(layer).try_init();
    Ok(())
}

/// Idempotent subscriber installation for tests; swallows double-init.
pub fn init_test_subscriber() {
    TEST_SUBSCRIBER.get_or_init(|| {
        let _ = tracing_subscriber::registry()
            .with(filter_for("debug"))
            .with(tracing_subscriber::fmt::layer().with_test_writer())
            .try_init();
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_test_subscriber_is_idempotent() {
        init_test_subscriber();
        init_test_subscriber();
    }
}
