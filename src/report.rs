//! The error-reporting boundary.
//!
//! Every error crossing the dispatch boundary is funneled through one
//! [`ErrorSink::dispatch_error`] call so an external collaborator can
//! format and persist them uniformly. The sink is an explicitly passed
//! handle on the server builder, not process-wide state.

use std::error::Error;
use std::fmt::Write;
use std::net::SocketAddr;

/// Everything known about a failed request at the moment of reporting.
pub struct ErrorContext<'a> {
    /// Status line already sent to the client, if any. When present, the
    /// response cannot be un-sent and the connection is simply torn down.
    pub status: Option<&'a str>,
    pub method: &'a str,
    pub path: &'a str,
    pub remote_addr: SocketAddr,
    pub user_agent: Option<&'a str>,
    pub error: &'a (dyn Error + Send + Sync + 'static),
}

/// Receiver for application errors escaping the dispatch callback.
pub trait ErrorSink: Send + Sync + 'static {
    fn dispatch_error(&self, context: &ErrorContext<'_>);
}

/// Default sink: structured `tracing` output, with the error's source
/// chain flattened into one field.
#[derive(Debug, Default)]
pub struct LogSink;

impl ErrorSink for LogSink {
    fn dispatch_error(&self, context: &ErrorContext<'_>) {
        let mut chain = String::new();
        let mut source = context.error.source();
        while let Some(err) = source {
            let _ = write!(chain, " <- {}", err);
            source = err.source();
        }

        tracing::error!(
            method = context.method,
            path = context.path,
            remote = %context.remote_addr,
            status = context.status.unwrap_or("-"),
            user_agent = context.user_agent.unwrap_or("-"),
            error = %context.error,
            chain = %chain,
            "request handler failed"
        );
    }
}
