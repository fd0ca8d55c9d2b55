//! The diagnostic sink interface.
//!
//! The engine reports noteworthy events through an optional sink. With no
//! sink installed, logging is disabled; nothing in the engine fails for
//! lack of one.

/// Severity of a diagnostic message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Debug,
    Info,
    Warning,
    Error,
}

/// A sink accepting leveled, tagged diagnostic messages.
pub trait DiagSink: Send + Sync {
    fn log(&self, origin: &str, suborigin: &str, severity: Severity, tag: &str, message: &str);
}

/// A [`DiagSink`] forwarding to the `tracing` ecosystem.
pub struct TracingSink;

impl DiagSink for TracingSink {
    fn log(&self, origin: &str, suborigin: &str, severity: Severity, tag: &str, message: &str) {
        match severity {
            Severity::Debug => {
                tracing::debug!(target: "vmem", origin, suborigin, tag, "{}", message)
            }
            Severity::Info => {
                tracing::info!(target: "vmem", origin, suborigin, tag, "{}", message)
            }
            Severity::Warning => {
                tracing::warn!(target: "vmem", origin, suborigin, tag, "{}", message)
            }
            Severity::Error => {
                tracing::error!(target: "vmem", origin, suborigin, tag, "{}", message)
            }
        }
    }
}
