//! Error reporting collaborator.

use tracing::error;

/// Fire-and-forget sink for failures worth surfacing to maintainers.
pub trait ErrorReporter: Send + Sync {
    fn report(&self, context: &str, message: &str, stack: Option<&str>);
}

/// Logs reports through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl ErrorReporter for TracingReporter {
    fn report(&self, context: &str, message: &str, stack: Option<&str>) {
        error!(context, stack = stack.unwrap_or(""), "{}", message);
    }
}
