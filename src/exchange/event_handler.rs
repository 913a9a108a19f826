//! Event handlers
//!
//! The consumer-side callback interface. Beyond `on_event`, a handler can opt
//! into lifecycle, batch-start, timeout and progress-reporting callbacks by
//! overriding the corresponding default methods; the processor calls them
//! unconditionally and the defaults do nothing. This replaces the original
//! design's run-time capability probing with an explicit, statically typed
//! surface.

use std::sync::Arc;

use crate::exchange::sequence::Sequence;
use crate::exchange::Result;

/// Callback interface for a consumer stage.
pub trait EventHandler<T>: Send {
    /// Process one event.
    ///
    /// `end_of_batch` is true for exactly the last event handed out by one
    /// barrier wake-up, which is the right moment to flush buffered work.
    ///
    /// # Errors
    /// A failure is routed to the stage's exception handler; the processor
    /// then advances past the event, so a poisoned slot cannot stall the ring.
    fn on_event(&mut self, event: &mut T, sequence: i64, end_of_batch: bool) -> Result<()>;

    /// Called once when the processing thread starts, before any event.
    fn on_start(&mut self) -> Result<()> {
        Ok(())
    }

    /// Called once just before the processing thread shuts down.
    fn on_shutdown(&mut self) -> Result<()> {
        Ok(())
    }

    /// Called when a timeout-capable wait strategy elapses with no new
    /// events. `sequence` is the handler's current progress.
    fn on_timeout(&mut self, _sequence: i64) -> Result<()> {
        Ok(())
    }

    /// Called with the batch size before the first `on_event` of each batch.
    fn on_batch_start(&mut self, _batch_size: i64) -> Result<()> {
        Ok(())
    }

    /// Receives the processor's own sequence at registration. Handlers that
    /// batch asynchronously can advance it mid-event to release downstream
    /// stages early; others ignore it.
    fn set_sequence_callback(&mut self, _sequence: Arc<Sequence>) {}
}

/// Handler backed by a closure, for stages that need no state of their own.
pub struct ClosureEventHandler<T, F>
where
    F: FnMut(&mut T, i64, bool) -> Result<()> + Send,
{
    handler: F,
    _phantom: std::marker::PhantomData<fn(&mut T)>,
}

impl<T, F> ClosureEventHandler<T, F>
where
    F: FnMut(&mut T, i64, bool) -> Result<()> + Send,
{
    /// Create a handler from `handler`.
    pub fn new(handler: F) -> Self {
        Self {
            handler,
            _phantom: std::marker::PhantomData,
        }
    }
}

impl<T, F> EventHandler<T> for ClosureEventHandler<T, F>
where
    T: Send,
    F: FnMut(&mut T, i64, bool) -> Result<()> + Send,
{
    fn on_event(&mut self, event: &mut T, sequence: i64, end_of_batch: bool) -> Result<()> {
        (self.handler)(event, sequence, end_of_batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closure_handler_dispatches() {
        let mut seen = Vec::new();
        {
            let mut handler = ClosureEventHandler::new(|event: &mut i64, sequence, _eob| {
                seen.push((sequence, *event));
                Ok(())
            });
            let mut event = 42;
            handler.on_event(&mut event, 7, true).unwrap();
        }
        assert_eq!(seen, vec![(7, 42)]);
    }

    #[test]
    fn test_default_capability_methods_are_noops() {
        struct Passive;
        impl EventHandler<i64> for Passive {
            fn on_event(&mut self, _event: &mut i64, _sequence: i64, _eob: bool) -> Result<()> {
                Ok(())
            }
        }

        let mut handler = Passive;
        assert!(handler.on_start().is_ok());
        assert!(handler.on_shutdown().is_ok());
        assert!(handler.on_timeout(3).is_ok());
        assert!(handler.on_batch_start(10).is_ok());
    }
}
