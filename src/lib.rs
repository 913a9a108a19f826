//! `Ringline` - high-throughput in-process event exchange
//!
//! A lock-free event exchange built around a pre-allocated ring buffer of
//! power-of-two capacity. Producers claim contiguous slot indices, fill
//! pre-allocated events in place and publish; consumers traverse the same
//! slots in order, individually or as competing worker pools, with dependency
//! chains between stages. All coordination happens through padded, monotonic
//! 64-bit sequence counters - there are no locks on the hot path, no
//! per-event allocation, and no unbounded queues.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use ringline::{
//!     ClosureEventTranslator, DefaultEventFactory, EventHandler, Exchange,
//!     ProducerType, Result, YieldingWaitStrategy,
//! };
//!
//! #[derive(Debug, Default)]
//! struct TickEvent {
//!     price: i64,
//! }
//!
//! struct TickHandler;
//!
//! impl EventHandler<TickEvent> for TickHandler {
//!     fn on_event(&mut self, event: &mut TickEvent, sequence: i64, end_of_batch: bool) -> Result<()> {
//!         println!("tick {} at sequence {sequence} (end of batch: {end_of_batch})", event.price);
//!         Ok(())
//!     }
//! }
//!
//! fn main() -> Result<()> {
//!     let factory = DefaultEventFactory::<TickEvent>::new();
//!     let mut exchange = Exchange::new(
//!         &factory,
//!         1024, // must be a power of two
//!         ProducerType::Single,
//!         Box::new(YieldingWaitStrategy::new()),
//!     )?
//!     .handle_events_with(TickHandler)
//!     .build();
//!
//!     exchange.start()?;
//!
//!     for price in 0..100 {
//!         exchange.publish_event(ClosureEventTranslator::new(move |event: &mut TickEvent, _| {
//!             event.price = price;
//!         }))?;
//!     }
//!
//!     exchange.shutdown()
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`RingBuffer`]: pre-allocated slot storage plus claim/publish entry points
//! - [`Sequence`]: padded atomic counters coordinating every participant
//! - [`Sequencer`]: slot claiming, single- or multi-producer
//! - [`SequenceBarrier`]: per-consumer dependency and alert coordination
//! - [`WaitStrategy`]: how consumers wait, from busy-spin to blocking
//! - [`BatchEventProcessor`]: the batching consumer loop
//! - [`WorkerPool`]: competing consumers over one shared work sequence
//! - [`Exchange`]: the assembly DSL wiring all of the above together

pub mod exchange;

pub use exchange::{
    is_power_of_two,
    BatchEventProcessor,
    BlockingWaitStrategy,
    BusySpinWaitStrategy,
    ClosureEventFactory,
    ClosureEventHandler,
    ClosureEventTranslator,
    DataProvider,
    DefaultEventFactory,
    EventFactory,
    EventHandler,
    EventProcessor,
    EventTranslator,
    Exchange,
    ExchangeBuilder,
    ExchangeError,
    ExceptionHandler,
    FatalExceptionHandler,
    IgnoreExceptionHandler,
    LiteBlockingWaitStrategy,
    LoggingExceptionHandler,
    ManagedThread,
    MultiProducerSequencer,
    PhasedBackoffWaitStrategy,
    ProcessorHandle,
    ProducerType,
    Result,
    RingBuffer,
    Sequence,
    SequenceBarrier,
    Sequencer,
    SingleProducerSequencer,
    SleepingWaitStrategy,
    ThreadBuilder,
    TimeoutBlockingWaitStrategy,
    WaitStrategy,
    WorkHandler,
    WorkProcessor,
    WorkerPool,
    YieldingWaitStrategy,
    INITIAL_CURSOR_VALUE,
};

/// Crate version as baked in at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
