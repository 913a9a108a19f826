//! Batch event processor
//!
//! The single-threaded consumer loop. It pulls ranges of ready sequences from
//! its barrier, dispatches them to the handler with batch framing, and
//! advances its own sequence, which in turn gates the producer and any
//! downstream stages. Failures in the handler are routed to the exception
//! handler and the loop advances past the offending event, so one bad slot
//! can never wedge the ring.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use crate::exchange::event_handler::EventHandler;
use crate::exchange::exception_handler::{ExceptionHandler, FatalExceptionHandler};
use crate::exchange::ring_buffer::DataProvider;
use crate::exchange::sequence::Sequence;
use crate::exchange::sequence_barrier::SequenceBarrier;
use crate::exchange::{ExchangeError, Result};

const IDLE: u8 = 0;
const HALTED: u8 = 1;
const RUNNING: u8 = 2;

/// A consumer loop that can be run on a host-supplied thread.
pub trait EventProcessor: Send {
    /// The sequence tracking this processor's progress.
    fn get_sequence(&self) -> Arc<Sequence>;

    /// Ask the processor to stop after the event it is currently handling.
    fn halt(&self);

    /// Whether the processor is currently started (running or halting).
    fn is_running(&self) -> bool;

    /// Run the processing loop until halted. Blocks the calling thread.
    ///
    /// # Errors
    /// `AlreadyRunning` when the processor is running on another thread;
    /// `Interrupted` when the host thread was asked to stop mid-loop.
    fn run(&mut self) -> Result<()>;
}

/// Remote control for a processor that has been moved onto its thread.
#[derive(Clone)]
pub struct ProcessorHandle {
    sequence: Arc<Sequence>,
    running: Arc<AtomicU8>,
    barrier: Arc<dyn SequenceBarrier>,
}

impl ProcessorHandle {
    /// The processor's progress sequence.
    pub fn get_sequence(&self) -> Arc<Sequence> {
        Arc::clone(&self.sequence)
    }

    /// Halt the processor: mark it halted and alert its barrier so a blocked
    /// wait observes the request. Idempotent.
    pub fn halt(&self) {
        self.running.store(HALTED, Ordering::Release);
        self.barrier.alert();
    }

    /// Whether the processor is currently started.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire) != IDLE
    }
}

/// Batching consumer over a data provider and a sequence barrier.
pub struct BatchEventProcessor<T> {
    data_provider: Arc<dyn DataProvider<T>>,
    sequence_barrier: Arc<dyn SequenceBarrier>,
    event_handler: Box<dyn EventHandler<T>>,
    exception_handler: Box<dyn ExceptionHandler<T>>,
    sequence: Arc<Sequence>,
    running: Arc<AtomicU8>,
}

impl<T> BatchEventProcessor<T>
where
    T: Send + Sync,
{
    /// Create a processor over `data_provider`, waiting on `sequence_barrier`
    /// and dispatching to `event_handler`. The handler receives the
    /// processor's sequence through its sequence callback so it can report
    /// progress mid-event if it batches asynchronously.
    pub fn new(
        data_provider: Arc<dyn DataProvider<T>>,
        sequence_barrier: Arc<dyn SequenceBarrier>,
        mut event_handler: Box<dyn EventHandler<T>>,
    ) -> Self {
        let sequence = Arc::new(Sequence::default());
        event_handler.set_sequence_callback(Arc::clone(&sequence));

        Self {
            data_provider,
            sequence_barrier,
            event_handler,
            exception_handler: Box::new(FatalExceptionHandler),
            sequence,
            running: Arc::new(AtomicU8::new(IDLE)),
        }
    }

    /// Replace the exception handler (default: fatal).
    pub fn set_exception_handler(&mut self, exception_handler: Box<dyn ExceptionHandler<T>>) {
        self.exception_handler = exception_handler;
    }

    /// A handle for halting the processor once it has been moved onto its
    /// thread.
    pub fn handle(&self) -> ProcessorHandle {
        ProcessorHandle {
            sequence: Arc::clone(&self.sequence),
            running: Arc::clone(&self.running),
            barrier: Arc::clone(&self.sequence_barrier),
        }
    }

    fn process_events(&mut self) -> Result<()> {
        let mut next_sequence = self.sequence.get() + 1;

        'event_loop: loop {
            match self.sequence_barrier.wait_for(next_sequence) {
                Ok(available_sequence) => {
                    if available_sequence >= next_sequence {
                        let batch_size = available_sequence - next_sequence + 1;
                        if let Err(error) = self.event_handler.on_batch_start(batch_size) {
                            self.exception_handler
                                .handle_event_exception(error, next_sequence, None);
                        }
                    }

                    while next_sequence <= available_sequence {
                        // SAFETY: every sequence in the range is published and
                        // this stage is its only consumer until the sequence
                        // below advances past it.
                        let event = unsafe { self.data_provider.get_mut(next_sequence) };
                        let end_of_batch = next_sequence == available_sequence;

                        if let Err(error) =
                            self.event_handler.on_event(event, next_sequence, end_of_batch)
                        {
                            // Advance past the poisoned event and re-enter the
                            // wait so the remainder of the batch is re-framed.
                            self.exception_handler.handle_event_exception(
                                error,
                                next_sequence,
                                Some(&*event),
                            );
                            self.sequence.set(next_sequence);
                            next_sequence += 1;
                            continue 'event_loop;
                        }
                        next_sequence += 1;
                    }

                    self.sequence.set(available_sequence);
                }
                Err(ExchangeError::Timeout) => {
                    self.notify_timeout(self.sequence.get());
                }
                Err(ExchangeError::Alert) => {
                    if self.running.load(Ordering::Acquire) != RUNNING {
                        break;
                    }
                }
                Err(error) => return Err(error),
            }
        }

        Ok(())
    }

    fn notify_timeout(&mut self, available_sequence: i64) {
        if let Err(error) = self.event_handler.on_timeout(available_sequence) {
            self.exception_handler
                .handle_event_exception(error, available_sequence, None);
        }
    }

    fn notify_start(&mut self) {
        if let Err(error) = self.event_handler.on_start() {
            self.exception_handler.handle_on_start_exception(error);
        }
    }

    fn notify_shutdown(&mut self) {
        if let Err(error) = self.event_handler.on_shutdown() {
            self.exception_handler.handle_on_shutdown_exception(error);
        }
    }
}

impl<T> EventProcessor for BatchEventProcessor<T>
where
    T: Send + Sync,
{
    fn get_sequence(&self) -> Arc<Sequence> {
        Arc::clone(&self.sequence)
    }

    fn halt(&self) {
        self.running.store(HALTED, Ordering::Release);
        self.sequence_barrier.alert();
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire) != IDLE
    }

    fn run(&mut self) -> Result<()> {
        match self
            .running
            .compare_exchange(IDLE, RUNNING, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => {}
            Err(state) => {
                if state == RUNNING {
                    return Err(ExchangeError::AlreadyRunning);
                }
                // Halted before the loop ever started: surface the lifecycle
                // notifications and return to idle.
                self.notify_start();
                self.notify_shutdown();
                self.running.store(IDLE, Ordering::Release);
                return Ok(());
            }
        }

        self.sequence_barrier.clear_alert();
        self.notify_start();

        let result = if self.running.load(Ordering::Acquire) == RUNNING {
            self.process_events()
        } else {
            Ok(())
        };

        self.notify_shutdown();
        self.running.store(IDLE, Ordering::Release);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::event_factory::DefaultEventFactory;
    use crate::exchange::ring_buffer::RingBuffer;
    use crate::exchange::wait_strategy::YieldingWaitStrategy;
    use crate::exchange::INITIAL_CURSOR_VALUE;
    use std::sync::atomic::AtomicI64;
    use std::thread;
    use std::time::{Duration, Instant};

    #[derive(Debug, Default)]
    struct TestEvent {
        value: i64,
    }

    struct RecordingHandler {
        seen: Arc<parking_lot::Mutex<Vec<(i64, i64, bool)>>>,
        starts: Arc<AtomicI64>,
        shutdowns: Arc<AtomicI64>,
    }

    impl EventHandler<TestEvent> for RecordingHandler {
        fn on_event(&mut self, event: &mut TestEvent, sequence: i64, end_of_batch: bool) -> Result<()> {
            self.seen.lock().push((sequence, event.value, end_of_batch));
            Ok(())
        }

        fn on_start(&mut self) -> Result<()> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn on_shutdown(&mut self) -> Result<()> {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn fixture() -> (
        Arc<RingBuffer<TestEvent>>,
        BatchEventProcessor<TestEvent>,
        Arc<parking_lot::Mutex<Vec<(i64, i64, bool)>>>,
        Arc<AtomicI64>,
        Arc<AtomicI64>,
    ) {
        let buffer = Arc::new(
            RingBuffer::create_single_producer(
                &DefaultEventFactory::<TestEvent>::new(),
                8,
                Arc::new(YieldingWaitStrategy::new()),
            )
            .unwrap(),
        );

        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let starts = Arc::new(AtomicI64::new(0));
        let shutdowns = Arc::new(AtomicI64::new(0));
        let handler = RecordingHandler {
            seen: Arc::clone(&seen),
            starts: Arc::clone(&starts),
            shutdowns: Arc::clone(&shutdowns),
        };

        let barrier = buffer.new_barrier(vec![]);
        let processor = BatchEventProcessor::new(
            Arc::clone(&buffer) as Arc<dyn DataProvider<TestEvent>>,
            barrier,
            Box::new(handler),
        );
        buffer.add_gating_sequences(&[processor.get_sequence()]);

        (buffer, processor, seen, starts, shutdowns)
    }

    fn wait_until(deadline: Duration, mut condition: impl FnMut() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(1));
        }
        condition()
    }

    #[test]
    fn test_processor_starts_idle() {
        let (_buffer, processor, _seen, _starts, _shutdowns) = fixture();
        assert!(!processor.is_running());
        assert_eq!(processor.get_sequence().get(), INITIAL_CURSOR_VALUE);
    }

    #[test]
    fn test_processor_consumes_published_events_in_order() {
        let (buffer, mut processor, seen, _starts, _shutdowns) = fixture();
        let handle = processor.handle();

        let worker = thread::spawn(move || processor.run());

        for i in 0..5 {
            let sequence = buffer.next().unwrap();
            unsafe { buffer.get_mut(sequence).value = i * 10 };
            buffer.publish(sequence);
        }

        assert!(wait_until(Duration::from_secs(5), || seen.lock().len() == 5));
        handle.halt();
        worker.join().unwrap().unwrap();

        let seen = seen.lock();
        let sequences: Vec<i64> = seen.iter().map(|(s, _, _)| *s).collect();
        assert_eq!(sequences, vec![0, 1, 2, 3, 4]);
        let values: Vec<i64> = seen.iter().map(|(_, v, _)| *v).collect();
        assert_eq!(values, vec![0, 10, 20, 30, 40]);
        // The final event of every batch is flagged; at minimum the last one
        // the processor saw before going back to waiting.
        assert!(seen.last().unwrap().2);
    }

    #[test]
    fn test_halt_before_run_notifies_and_returns() {
        let (_buffer, mut processor, _seen, starts, shutdowns) = fixture();

        processor.halt();
        processor.run().unwrap();

        assert_eq!(starts.load(Ordering::SeqCst), 1);
        assert_eq!(shutdowns.load(Ordering::SeqCst), 1);
        assert!(!processor.is_running());
    }

    #[test]
    fn test_halt_is_idempotent() {
        let (_buffer, mut processor, _seen, _starts, shutdowns) = fixture();
        let handle = processor.handle();

        let worker = thread::spawn(move || processor.run());
        assert!(wait_until(Duration::from_secs(5), || handle.is_running()));

        handle.halt();
        handle.halt();
        worker.join().unwrap().unwrap();
        assert!(!handle.is_running());
        assert_eq!(shutdowns.load(Ordering::SeqCst), 1);
    }
}
