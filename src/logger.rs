//! Logger capability interface (§4.2 sibling / module C): a leveled,
//! structured log with a no-op sink, injected into components the way the
//! teacher injects `journal: Arc<dyn JournalWriter>` into
//! `ReasoningLoopRunner` rather than writing to a global subscriber
//! directly (`reasoning/reasoning_loop.rs`). The process-wide `tracing`
//! subscriber, installed once in `bin/agenc_runtime.rs`, is a separate
//! ambient concern (see SPEC_FULL.md §B) — this trait is what library code
//! actually depends on.

use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Debug,
    Info,
    Warn,
    Error,
}

pub type Fields = HashMap<String, serde_json::Value>;

pub trait Logger: Send + Sync {
    fn log(&self, level: Level, message: &str, fields: &Fields);

    fn debug(&self, message: &str, fields: &Fields) {
        self.log(Level::Debug, message, fields);
    }
    fn info(&self, message: &str, fields: &Fields) {
        self.log(Level::Info, message, fields);
    }
    fn warn(&self, message: &str, fields: &Fields) {
        self.log(Level::Warn, message, fields);
    }
    fn error(&self, message: &str, fields: &Fields) {
        self.log(Level::Error, message, fields);
    }
}

/// Default logger: forwards to `tracing`, so call sites benefit from the
/// process's installed subscriber (filtering, formatting, span context)
/// without hard-coding it.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn log(&self, level: Level, message: &str, fields: &Fields) {
        let fields_json = serde_json::to_string(fields).unwrap_or_default();
        match level {
            Level::Debug => tracing::debug!(fields = %fields_json, "{message}"),
            Level::Info => tracing::info!(fields = %fields_json, "{message}"),
            Level::Warn => tracing::warn!(fields = %fields_json, "{message}"),
            Level::Error => tracing::error!(fields = %fields_json, "{message}"),
        }
    }
}

/// Discards everything. Used by tests that don't care about log output.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLogger;

impl Logger for NoopLogger {
    fn log(&self, _level: Level, _message: &str, _fields: &Fields) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_logger_accepts_all_levels() {
        let logger = NoopLogger;
        let fields = Fields::new();
        logger.debug("x", &fields);
        logger.info("x", &fields);
        logger.warn("x", &fields);
        logger.error("x", &fields);
    }

    #[test]
    fn tracing_logger_does_not_panic_without_subscriber() {
        let logger = TracingLogger;
        let mut fields = Fields::new();
        fields.insert("attempt".to_string(), serde_json::json!(1));
        logger.info("verifier attempt", &fields);
    }
}
