//! Ringline event exchange
//!
//! This module contains the sequencing and coordination engine: a pre-allocated
//! ring buffer of power-of-two capacity, single- and multi-producer sequencers
//! that hand out slot claims, consumer-side sequence barriers with pluggable
//! wait strategies, and the batch event processing loop. Producers claim
//! contiguous slot indices, fill events in place and publish; consumers
//! traverse the same slots in order, coordinated entirely through monotonic
//! 64-bit sequence counters rather than locks.

pub mod dsl;
pub mod event_factory;
pub mod event_handler;
pub mod event_processor;
pub mod event_translator;
pub mod exception_handler;
pub mod producer_type;
pub mod ring_buffer;
pub mod sequence;
pub mod sequence_barrier;
pub mod sequencer;
pub mod thread_management;
pub mod wait_strategy;
pub mod worker_pool;


pub use dsl::{Exchange, ExchangeBuilder};
pub use event_factory::{ClosureEventFactory, DefaultEventFactory, EventFactory};
pub use event_handler::{ClosureEventHandler, EventHandler};
pub use event_processor::{BatchEventProcessor, EventProcessor, ProcessorHandle};
pub use event_translator::{ClosureEventTranslator, EventTranslator};
pub use exception_handler::{
    ExceptionHandler, FatalExceptionHandler, IgnoreExceptionHandler, LoggingExceptionHandler,
};
pub use producer_type::ProducerType;
pub use ring_buffer::{DataProvider, RingBuffer};
pub use sequence::{Sequence, SequenceGroup};
pub use sequence_barrier::{ProcessingSequenceBarrier, SequenceBarrier};
pub use sequencer::{MultiProducerSequencer, Sequencer, SingleProducerSequencer};
pub use thread_management::{ManagedThread, ThreadBuilder};
pub use wait_strategy::{
    AlertCheck, BlockingWaitStrategy, BusySpinWaitStrategy, LiteBlockingWaitStrategy,
    PhasedBackoffWaitStrategy, SleepingWaitStrategy, TimeoutBlockingWaitStrategy, WaitStrategy,
    YieldingWaitStrategy,
};
pub use worker_pool::{WorkHandler, WorkProcessor, WorkerPool};

/// The initial value of every sequence: no slot has been claimed or consumed.
pub const INITIAL_CURSOR_VALUE: i64 = -1;

/// Errors produced by the exchange.
#[derive(Debug, thiserror::Error)]
pub enum ExchangeError {
    /// The ring capacity was not a power of two (or was zero).
    #[error("buffer size must be a power of two, got {0}")]
    InvalidBufferSize(usize),

    /// A claim asked for fewer than one or more than `buffer_size` slots.
    #[error("claim batch must be between 1 and the buffer size, got {0}")]
    InvalidBatchSize(i64),

    /// A `try_next` claim would have had to wait for consumers to catch up.
    #[error("insufficient capacity to claim the requested sequences")]
    InsufficientCapacity,

    /// The barrier was alerted while waiting. Used internally to unwind
    /// processing loops during shutdown; never surfaced to event handlers.
    #[error("sequence barrier alerted while waiting")]
    Alert,

    /// A timeout-capable wait strategy exhausted its budget. Routed to the
    /// handler's timeout callback; not a loop-terminating condition.
    #[error("wait strategy timed out")]
    Timeout,

    /// The host thread was asked to stop. Propagates out of the processing
    /// loop after shutdown notifications have run.
    #[error("processing thread was interrupted")]
    Interrupted,

    /// An event processor (or the exchange) was started twice.
    #[error("event processor is already running")]
    AlreadyRunning,

    /// An application handler failed while processing an event or a
    /// lifecycle notification.
    #[error("event handler failure: {0}")]
    Handler(String),

    /// The operating system refused to start a processing thread.
    #[error("failed to spawn processing thread: {0}")]
    ThreadSpawn(String),
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, ExchangeError>;

/// Check whether `n` is a power of two. Zero is not.
pub fn is_power_of_two(n: usize) -> bool {
    n != 0 && (n & (n - 1)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_power_of_two() {
        assert!(is_power_of_two(1));
        assert!(is_power_of_two(2));
        assert!(is_power_of_two(4));
        assert!(is_power_of_two(1024));

        assert!(!is_power_of_two(0));
        assert!(!is_power_of_two(3));
        assert!(!is_power_of_two(6));
        assert!(!is_power_of_two(1023));
    }

    #[test]
    fn test_error_display() {
        assert_eq!(
            ExchangeError::InvalidBufferSize(12).to_string(),
            "buffer size must be a power of two, got 12"
        );
        assert_eq!(
            ExchangeError::InvalidBatchSize(0).to_string(),
            "claim batch must be between 1 and the buffer size, got 0"
        );
    }
}
