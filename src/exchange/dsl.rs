//! Exchange assembly
//!
//! The top-level wiring surface: pick a buffer size, producer cardinality and
//! wait strategy, chain handlers into dependency stages, then `start()` to
//! launch one thread per processor. Stage N+1 only sees an event after every
//! stage-N handler has processed it; the final stages gate the producer.

use std::sync::Arc;

use crate::exchange::event_factory::EventFactory;
use crate::exchange::event_handler::EventHandler;
use crate::exchange::event_processor::{BatchEventProcessor, EventProcessor, ProcessorHandle};
use crate::exchange::event_translator::EventTranslator;
use crate::exchange::exception_handler::ExceptionHandler;
use crate::exchange::producer_type::ProducerType;
use crate::exchange::ring_buffer::{DataProvider, RingBuffer};
use crate::exchange::sequence::Sequence;
use crate::exchange::thread_management::{ManagedThread, ThreadBuilder};
use crate::exchange::wait_strategy::{BlockingWaitStrategy, WaitStrategy};
use crate::exchange::{ExchangeError, Result};

/// A configured event exchange: ring buffer, sequencer and consumer stages.
pub struct Exchange<T>
where
    T: Send + Sync + 'static,
{
    ring_buffer: Arc<RingBuffer<T>>,
    pending: Vec<BatchEventProcessor<T>>,
    handles: Vec<ProcessorHandle>,
    threads: Vec<ManagedThread>,
    started: bool,
}

impl<T> Exchange<T>
where
    T: Send + Sync + 'static,
{
    /// Create an exchange over a fresh ring buffer.
    ///
    /// # Errors
    /// `InvalidBufferSize` when `buffer_size` is not a power of two.
    pub fn new<F>(
        event_factory: &F,
        buffer_size: usize,
        producer_type: ProducerType,
        wait_strategy: Box<dyn WaitStrategy>,
    ) -> Result<Self>
    where
        F: EventFactory<T>,
    {
        let wait_strategy: Arc<dyn WaitStrategy> = Arc::from(wait_strategy);
        let sequencer = producer_type.create_sequencer(buffer_size, wait_strategy)?;
        let ring_buffer = Arc::new(RingBuffer::new(buffer_size, event_factory, sequencer)?);

        Ok(Self {
            ring_buffer,
            pending: Vec::new(),
            handles: Vec::new(),
            threads: Vec::new(),
            started: false,
        })
    }

    /// Single producer with the blocking wait strategy.
    pub fn with_defaults<F>(event_factory: &F, buffer_size: usize) -> Result<Self>
    where
        F: EventFactory<T>,
    {
        Self::new(
            event_factory,
            buffer_size,
            ProducerType::Single,
            Box::new(BlockingWaitStrategy::new()),
        )
    }

    /// The underlying ring buffer, for producers that want the raw
    /// claim/publish API.
    pub fn ring_buffer(&self) -> Arc<RingBuffer<T>> {
        Arc::clone(&self.ring_buffer)
    }

    /// The publish cursor.
    pub fn get_cursor(&self) -> Arc<Sequence> {
        self.ring_buffer.get_cursor()
    }

    /// Ring capacity.
    pub fn get_buffer_size(&self) -> usize {
        self.ring_buffer.buffer_size()
    }

    /// Slots left before the producer would overrun the slowest consumer.
    pub fn remaining_capacity(&self) -> i64 {
        self.ring_buffer.remaining_capacity()
    }

    /// Add a first-stage handler: it sees every event straight off the
    /// publish cursor. Returns a builder for chaining dependent stages.
    pub fn handle_events_with<H>(mut self, event_handler: H) -> ExchangeBuilder<T>
    where
        H: EventHandler<T> + 'static,
    {
        let sequence = self.add_processor(Vec::new(), Box::new(event_handler));
        ExchangeBuilder {
            exchange: self,
            last_sequences: vec![sequence],
        }
    }

    fn add_processor(
        &mut self,
        dependents: Vec<Arc<Sequence>>,
        event_handler: Box<dyn EventHandler<T>>,
    ) -> Arc<Sequence> {
        let replaces_gating = !dependents.is_empty();
        let gated_on: Vec<Arc<Sequence>> = dependents.clone();

        let barrier = self.ring_buffer.new_barrier(dependents);
        let processor = BatchEventProcessor::new(
            Arc::clone(&self.ring_buffer) as Arc<dyn DataProvider<T>>,
            barrier,
            event_handler,
        );
        let sequence = processor.get_sequence();

        // Only terminal stages gate the producer; an upstream stage is
        // released from gating once a dependent stage tracks it.
        self.ring_buffer.add_gating_sequences(&[Arc::clone(&sequence)]);
        if replaces_gating {
            for upstream in &gated_on {
                self.ring_buffer.remove_gating_sequence(upstream);
            }
        }

        self.pending.push(processor);
        sequence
    }

    /// Launch one thread per configured processor.
    ///
    /// # Errors
    /// `AlreadyRunning` when the exchange is already started; `ThreadSpawn`
    /// when a processor thread cannot be created.
    pub fn start(&mut self) -> Result<()> {
        if self.started {
            return Err(ExchangeError::AlreadyRunning);
        }

        for (index, processor) in self.pending.drain(..).enumerate() {
            let handle = processor.handle();
            let mut processor = processor;
            let thread = ThreadBuilder::new()
                .thread_name(format!("ringline-processor-{index}"))
                .spawn(move || {
                    use crate::exchange::event_processor::EventProcessor;
                    if let Err(error) = processor.run() {
                        tracing::error!(%error, "event processor terminated with error");
                    }
                })?;
            self.handles.push(handle);
            self.threads.push(thread);
        }

        self.started = true;
        tracing::info!(
            processors = self.handles.len(),
            buffer_size = self.get_buffer_size(),
            "exchange started"
        );
        Ok(())
    }

    /// Halt every processor after its current event and join their threads.
    /// A no-op when the exchange was never started.
    pub fn shutdown(&mut self) -> Result<()> {
        if !self.started {
            return Ok(());
        }

        for handle in &self.handles {
            handle.halt();
        }
        for thread in self.threads.drain(..) {
            let _ = thread.join();
        }
        self.handles.clear();
        self.started = false;
        tracing::info!("exchange shut down");
        Ok(())
    }

    /// Claim a slot, let `translator` fill it in place, publish. Blocks while
    /// the ring is full.
    pub fn publish_event<E>(&self, translator: E) -> Result<()>
    where
        E: EventTranslator<T>,
    {
        let sequence = self.ring_buffer.next()?;
        // SAFETY: the claimed sequence is exclusively owned until publish.
        let event = unsafe { self.ring_buffer.get_mut(sequence) };
        translator.translate_to(event, sequence);
        self.ring_buffer.publish(sequence);
        Ok(())
    }

    /// Claim-translate-publish without blocking.
    ///
    /// # Errors
    /// `InsufficientCapacity` when the ring is full.
    pub fn try_publish_event<E>(&self, translator: E) -> Result<()>
    where
        E: EventTranslator<T>,
    {
        let sequence = self.ring_buffer.try_next()?;
        // SAFETY: the claimed sequence is exclusively owned until publish.
        let event = unsafe { self.ring_buffer.get_mut(sequence) };
        translator.translate_to(event, sequence);
        self.ring_buffer.publish(sequence);
        Ok(())
    }
}

impl<T> Drop for Exchange<T>
where
    T: Send + Sync + 'static,
{
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

impl<T> std::fmt::Debug for Exchange<T>
where
    T: Send + Sync + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Exchange")
            .field("buffer_size", &self.get_buffer_size())
            .field("stages", &(self.pending.len() + self.handles.len()))
            .field("started", &self.started)
            .finish()
    }
}

/// Fluent continuation for chaining dependent consumer stages.
pub struct ExchangeBuilder<T>
where
    T: Send + Sync + 'static,
{
    exchange: Exchange<T>,
    last_sequences: Vec<Arc<Sequence>>,
}

impl<T> ExchangeBuilder<T>
where
    T: Send + Sync + 'static,
{
    /// Add a stage that only sees events the previous stage has finished.
    pub fn then<H>(mut self, event_handler: H) -> Self
    where
        H: EventHandler<T> + 'static,
    {
        let sequence = self
            .exchange
            .add_processor(self.last_sequences.clone(), Box::new(event_handler));
        self.last_sequences = vec![sequence];
        self
    }

    /// Replace the exception handler of the most recently added stage
    /// (default: fatal).
    pub fn with_exception_handler(mut self, handler: Box<dyn ExceptionHandler<T>>) -> Self {
        if let Some(processor) = self.exchange.pending.last_mut() {
            processor.set_exception_handler(handler);
        }
        self
    }

    /// Finish wiring and return the exchange, ready to start.
    pub fn build(self) -> Exchange<T> {
        self.exchange
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::event_factory::DefaultEventFactory;
    use crate::exchange::event_handler::ClosureEventHandler;
    use crate::exchange::event_translator::ClosureEventTranslator;
    use std::time::{Duration, Instant};

    #[derive(Debug, Default)]
    struct TestEvent {
        value: i64,
    }

    fn wait_until(deadline: Duration, mut condition: impl FnMut() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < deadline {
            if condition() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        condition()
    }

    #[test]
    fn test_rejects_invalid_buffer_size() {
        let factory = DefaultEventFactory::<TestEvent>::new();
        let result = Exchange::with_defaults(&factory, 100);
        assert!(matches!(
            result,
            Err(ExchangeError::InvalidBufferSize(100))
        ));
    }

    #[test]
    fn test_start_twice_fails() {
        let factory = DefaultEventFactory::<TestEvent>::new();
        let mut exchange = Exchange::with_defaults(&factory, 8)
            .unwrap()
            .handle_events_with(ClosureEventHandler::new(|_: &mut TestEvent, _, _| Ok(())))
            .build();

        exchange.start().unwrap();
        assert!(matches!(exchange.start(), Err(ExchangeError::AlreadyRunning)));
        exchange.shutdown().unwrap();
    }

    #[test]
    fn test_shutdown_without_start_is_a_noop() {
        let factory = DefaultEventFactory::<TestEvent>::new();
        let mut exchange = Exchange::with_defaults(&factory, 8).unwrap();
        exchange.shutdown().unwrap();
    }

    #[test]
    fn test_try_publish_fails_on_full_ring() {
        let factory = DefaultEventFactory::<TestEvent>::new();
        let exchange = Exchange::with_defaults(&factory, 4).unwrap();

        // A consumer that never advances keeps the ring full after one lap.
        let stalled = Arc::new(crate::exchange::Sequence::default());
        exchange.ring_buffer().add_gating_sequences(&[stalled]);

        for _ in 0..4 {
            exchange
                .try_publish_event(ClosureEventTranslator::new(|event: &mut TestEvent, s| {
                    event.value = s;
                }))
                .unwrap();
        }
        let result = exchange.try_publish_event(ClosureEventTranslator::new(
            |event: &mut TestEvent, s| {
                event.value = s;
            },
        ));
        assert!(matches!(result, Err(ExchangeError::InsufficientCapacity)));
    }

    #[test]
    fn test_chained_stages_run_in_dependency_order() {
        let factory = DefaultEventFactory::<TestEvent>::new();
        let log = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let first_log = Arc::clone(&log);
        let second_log = Arc::clone(&log);

        let mut exchange = Exchange::with_defaults(&factory, 16)
            .unwrap()
            .handle_events_with(ClosureEventHandler::new(
                move |event: &mut TestEvent, sequence, _eob| {
                    first_log.lock().push(("first", sequence, event.value));
                    Ok(())
                },
            ))
            .then(ClosureEventHandler::new(
                move |event: &mut TestEvent, sequence, _eob| {
                    second_log.lock().push(("second", sequence, event.value));
                    Ok(())
                },
            ))
            .build();

        exchange.start().unwrap();

        for i in 0..4 {
            exchange
                .publish_event(ClosureEventTranslator::new(move |event: &mut TestEvent, _| {
                    event.value = i;
                }))
                .unwrap();
        }

        assert!(wait_until(Duration::from_secs(5), || log.lock().len() == 8));
        exchange.shutdown().unwrap();

        let log = log.lock();
        for sequence in 0..4 {
            let first_pos = log
                .iter()
                .position(|&(stage, s, _)| stage == "first" && s == sequence)
                .unwrap();
            let second_pos = log
                .iter()
                .position(|&(stage, s, _)| stage == "second" && s == sequence)
                .unwrap();
            assert!(first_pos < second_pos);
        }
    }
}
