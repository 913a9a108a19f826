//! Exception handlers
//!
//! Failures in application callbacks are routed to an exception handler
//! rather than unwinding the processing loop: the processor reports the
//! failure, advances past the offending event, and keeps going. The default
//! handler re-raises fatally; substitute the logging or swallowing variant
//! when a stage should survive bad events.

use crate::exchange::ExchangeError;

/// Sink for failures raised by event, start and shutdown callbacks.
pub trait ExceptionHandler<T>: Send + Sync {
    /// A handler failed while processing an event, or while handling a
    /// timeout or batch-start notification (in which case there is no event).
    fn handle_event_exception(&self, error: ExchangeError, sequence: i64, event: Option<&T>);

    /// A handler failed inside its start notification.
    fn handle_on_start_exception(&self, error: ExchangeError);

    /// A handler failed inside its shutdown notification.
    fn handle_on_shutdown_exception(&self, error: ExchangeError);
}

/// Re-raises every failure as a panic, killing the processing thread. This is
/// the default: losing a stage loudly beats silently skipping events.
#[derive(Debug, Default)]
pub struct FatalExceptionHandler;

impl<T> ExceptionHandler<T> for FatalExceptionHandler {
    fn handle_event_exception(&self, error: ExchangeError, sequence: i64, _event: Option<&T>) {
        tracing::error!(%error, sequence, "fatal exception while processing event");
        panic!("fatal exception while processing event at sequence {sequence}: {error}");
    }

    fn handle_on_start_exception(&self, error: ExchangeError) {
        tracing::error!(%error, "fatal exception during processor start");
        panic!("fatal exception during processor start: {error}");
    }

    fn handle_on_shutdown_exception(&self, error: ExchangeError) {
        tracing::error!(%error, "fatal exception during processor shutdown");
        panic!("fatal exception during processor shutdown: {error}");
    }
}

/// Logs every failure and lets the stage continue.
#[derive(Debug, Default)]
pub struct LoggingExceptionHandler;

impl<T> ExceptionHandler<T> for LoggingExceptionHandler {
    fn handle_event_exception(&self, error: ExchangeError, sequence: i64, _event: Option<&T>) {
        tracing::error!(%error, sequence, "exception while processing event, skipping it");
    }

    fn handle_on_start_exception(&self, error: ExchangeError) {
        tracing::error!(%error, "exception during processor start");
    }

    fn handle_on_shutdown_exception(&self, error: ExchangeError) {
        tracing::error!(%error, "exception during processor shutdown");
    }
}

/// Swallows every failure. Mainly useful in benchmarks and tests that want
/// to measure the loop without error-handling noise.
#[derive(Debug, Default)]
pub struct IgnoreExceptionHandler;

impl<T> ExceptionHandler<T> for IgnoreExceptionHandler {
    fn handle_event_exception(&self, _error: ExchangeError, _sequence: i64, _event: Option<&T>) {}

    fn handle_on_start_exception(&self, _error: ExchangeError) {}

    fn handle_on_shutdown_exception(&self, _error: ExchangeError) {}
}
