//! Worker pool
//!
//! A set of consumers competing for events instead of each seeing every
//! event. Workers race a CAS on one shared work sequence; the winner owns
//! that slot index exclusively, waits for it to be published, and hands it to
//! its work handler. Each worker also exposes an individual progress
//! sequence, and the set of those sequences gates the producer, so the ring
//! never laps an unprocessed claim.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use crate::exchange::exception_handler::ExceptionHandler;
use crate::exchange::ring_buffer::{DataProvider, RingBuffer};
use crate::exchange::sequence::Sequence;
use crate::exchange::sequence_barrier::SequenceBarrier;
use crate::exchange::thread_management::{ManagedThread, ThreadBuilder};
use crate::exchange::{ExchangeError, Result};

/// Callback interface for a worker-pool member. Unlike [`EventHandler`], a
/// work handler sees only the events its worker wins, with no batch framing.
///
/// [`EventHandler`]: crate::exchange::event_handler::EventHandler
pub trait WorkHandler<T>: Send {
    /// Process one event.
    ///
    /// # Errors
    /// A failure is routed to the pool's exception handler; the worker then
    /// releases the sequence and keeps claiming.
    fn on_event(&mut self, event: &mut T) -> Result<()>;
}

/// One member of a worker pool.
pub struct WorkProcessor<T> {
    data_provider: Arc<dyn DataProvider<T>>,
    sequence_barrier: Arc<dyn SequenceBarrier>,
    work_handler: Box<dyn WorkHandler<T>>,
    exception_handler: Arc<dyn ExceptionHandler<T>>,
    sequence: Arc<Sequence>,
    work_sequence: Arc<Sequence>,
    running: Arc<AtomicBool>,
}

impl<T> WorkProcessor<T>
where
    T: Send + Sync,
{
    /// Create a worker claiming from the shared `work_sequence`.
    pub fn new(
        data_provider: Arc<dyn DataProvider<T>>,
        sequence_barrier: Arc<dyn SequenceBarrier>,
        work_handler: Box<dyn WorkHandler<T>>,
        exception_handler: Arc<dyn ExceptionHandler<T>>,
        work_sequence: Arc<Sequence>,
    ) -> Self {
        Self {
            data_provider,
            sequence_barrier,
            work_handler,
            exception_handler,
            sequence: Arc::new(Sequence::default()),
            work_sequence,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// This worker's progress sequence; one gating sequence per worker.
    pub fn get_sequence(&self) -> Arc<Sequence> {
        Arc::clone(&self.sequence)
    }

    /// Ask the worker to stop after its current event.
    pub fn halt(&self) {
        self.running.store(false, Ordering::Release);
        self.sequence_barrier.alert();
    }

    /// Whether the worker loop is active.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn running_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// Run the claim/process loop until halted. Blocks the calling thread.
    ///
    /// # Errors
    /// `AlreadyRunning` when the worker is active on another thread.
    pub fn run(&mut self) -> Result<()> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(ExchangeError::AlreadyRunning);
        }
        self.sequence_barrier.clear_alert();

        let mut processed_sequence = true;
        let mut cached_available_sequence = i64::MIN;
        let mut next_sequence = self.sequence.get();

        loop {
            if processed_sequence {
                processed_sequence = false;
                // Publish progress for the previous event while racing for
                // the next index; only one CAS winner ever owns an index.
                loop {
                    next_sequence = self.work_sequence.get() + 1;
                    self.sequence.set(next_sequence - 1);
                    if self
                        .work_sequence
                        .compare_and_set(next_sequence - 1, next_sequence)
                    {
                        break;
                    }
                }
            }

            if cached_available_sequence >= next_sequence {
                // SAFETY: the CAS above made this worker the only claimant of
                // next_sequence, and the barrier confirmed it is published.
                let event = unsafe { self.data_provider.get_mut(next_sequence) };
                if let Err(error) = self.work_handler.on_event(event) {
                    self.exception_handler.handle_event_exception(
                        error,
                        next_sequence,
                        Some(&*event),
                    );
                }
                processed_sequence = true;
            } else {
                match self.sequence_barrier.wait_for(next_sequence) {
                    Ok(available_sequence) => cached_available_sequence = available_sequence,
                    Err(ExchangeError::Timeout) => {}
                    Err(ExchangeError::Alert) => {
                        if !self.running.load(Ordering::Acquire) {
                            break;
                        }
                    }
                    Err(error) => {
                        self.running.store(false, Ordering::Release);
                        return Err(error);
                    }
                }
            }
        }

        self.running.store(false, Ordering::Release);
        Ok(())
    }
}

/// A pool of workers competing over one ring buffer.
pub struct WorkerPool<T> {
    ring_buffer: Arc<RingBuffer<T>>,
    sequence_barrier: Arc<dyn SequenceBarrier>,
    work_sequence: Arc<Sequence>,
    workers: Vec<WorkProcessor<T>>,
    worker_sequences: Vec<Arc<Sequence>>,
    running_flags: Vec<Arc<AtomicBool>>,
    threads: Vec<ManagedThread>,
    started: bool,
}

impl<T> WorkerPool<T>
where
    T: Send + Sync + 'static,
{
    /// Create a pool with one worker per handler, all claiming from a shared
    /// work sequence and waiting on `sequence_barrier`.
    pub fn new(
        ring_buffer: Arc<RingBuffer<T>>,
        sequence_barrier: Arc<dyn SequenceBarrier>,
        exception_handler: Arc<dyn ExceptionHandler<T>>,
        work_handlers: Vec<Box<dyn WorkHandler<T>>>,
    ) -> Self {
        let work_sequence = Arc::new(Sequence::default());

        let workers: Vec<WorkProcessor<T>> = work_handlers
            .into_iter()
            .map(|handler| {
                WorkProcessor::new(
                    Arc::clone(&ring_buffer) as Arc<dyn DataProvider<T>>,
                    Arc::clone(&sequence_barrier),
                    handler,
                    Arc::clone(&exception_handler),
                    Arc::clone(&work_sequence),
                )
            })
            .collect();

        let worker_sequences = workers.iter().map(WorkProcessor::get_sequence).collect();
        let running_flags = workers.iter().map(WorkProcessor::running_flag).collect();

        Self {
            ring_buffer,
            sequence_barrier,
            work_sequence,
            workers,
            worker_sequences,
            running_flags,
            threads: Vec::new(),
            started: false,
        }
    }

    /// Every worker's progress sequence plus the shared work sequence.
    /// Register all of them as gating sequences on the ring buffer.
    pub fn get_worker_sequences(&self) -> Vec<Arc<Sequence>> {
        let mut sequences = self.worker_sequences.clone();
        sequences.push(Arc::clone(&self.work_sequence));
        sequences
    }

    /// Start one thread per worker, beginning at the ring's current cursor.
    ///
    /// # Errors
    /// `AlreadyRunning` when the pool is already started; `ThreadSpawn` when
    /// a worker thread cannot be created.
    pub fn start(&mut self) -> Result<()> {
        if self.started {
            return Err(ExchangeError::AlreadyRunning);
        }

        let cursor = self.ring_buffer.get_cursor().get();
        self.work_sequence.set_plain(cursor);

        for (index, worker) in self.workers.drain(..).enumerate() {
            worker.get_sequence().set_plain(cursor);
            let mut worker = worker;
            let thread = ThreadBuilder::new()
                .thread_name(format!("ringline-worker-{index}"))
                .spawn(move || {
                    if let Err(error) = worker.run() {
                        tracing::error!(%error, "worker terminated with error");
                    }
                })?;
            self.threads.push(thread);
        }

        self.started = true;
        tracing::debug!(workers = self.threads.len(), "worker pool started");
        Ok(())
    }

    /// Whether the pool has been started and not yet halted.
    pub fn is_running(&self) -> bool {
        self.started
    }

    /// Wait until everything published so far has been processed, then halt.
    pub fn drain_and_halt(&mut self) {
        while self.ring_buffer.get_cursor().get()
            > Sequence::get_minimum_sequence(&self.worker_sequences, i64::MAX)
        {
            thread::yield_now();
        }
        self.halt();
    }

    /// Halt every worker and join their threads. Idempotent.
    pub fn halt(&mut self) {
        for flag in &self.running_flags {
            flag.store(false, Ordering::Release);
        }
        self.sequence_barrier.alert();

        for thread in self.threads.drain(..) {
            let _ = thread.join();
        }
        self.started = false;
    }
}

impl<T> Drop for WorkerPool<T> {
    fn drop(&mut self) {
        for flag in &self.running_flags {
            flag.store(false, Ordering::Release);
        }
        self.sequence_barrier.alert();
        // ManagedThread joins on drop; flags are already down.
        self.threads.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::event_factory::DefaultEventFactory;
    use crate::exchange::exception_handler::IgnoreExceptionHandler;
    use crate::exchange::wait_strategy::YieldingWaitStrategy;

    #[derive(Debug, Default)]
    struct TestEvent {
        value: i64,
    }

    struct CollectingWorkHandler {
        seen: Arc<parking_lot::Mutex<Vec<i64>>>,
    }

    impl WorkHandler<TestEvent> for CollectingWorkHandler {
        fn on_event(&mut self, event: &mut TestEvent) -> Result<()> {
            self.seen.lock().push(event.value);
            Ok(())
        }
    }

    #[test]
    fn test_pool_processes_each_event_exactly_once() {
        let buffer = Arc::new(
            RingBuffer::create_single_producer(
                &DefaultEventFactory::<TestEvent>::new(),
                16,
                Arc::new(YieldingWaitStrategy::new()),
            )
            .unwrap(),
        );
        let barrier = buffer.new_barrier(vec![]);

        let sinks: Vec<Arc<parking_lot::Mutex<Vec<i64>>>> =
            (0..2).map(|_| Arc::new(parking_lot::Mutex::new(Vec::new()))).collect();
        let handlers: Vec<Box<dyn WorkHandler<TestEvent>>> = sinks
            .iter()
            .map(|sink| {
                Box::new(CollectingWorkHandler { seen: Arc::clone(sink) })
                    as Box<dyn WorkHandler<TestEvent>>
            })
            .collect();

        let mut pool = WorkerPool::new(
            Arc::clone(&buffer),
            barrier,
            Arc::new(IgnoreExceptionHandler),
            handlers,
        );
        buffer.add_gating_sequences(&pool.get_worker_sequences());
        pool.start().unwrap();

        for i in 0..50 {
            let sequence = buffer.next().unwrap();
            unsafe { buffer.get_mut(sequence).value = i };
            buffer.publish(sequence);
        }

        pool.drain_and_halt();

        let mut all: Vec<i64> = sinks.iter().flat_map(|s| s.lock().clone()).collect();
        all.sort_unstable();
        assert_eq!(all, (0..50).collect::<Vec<i64>>());
    }

    #[test]
    fn test_start_twice_fails() {
        let buffer = Arc::new(
            RingBuffer::create_single_producer(
                &DefaultEventFactory::<TestEvent>::new(),
                8,
                Arc::new(YieldingWaitStrategy::new()),
            )
            .unwrap(),
        );
        let barrier = buffer.new_barrier(vec![]);
        let sink = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let mut pool = WorkerPool::new(
            Arc::clone(&buffer),
            barrier,
            Arc::new(IgnoreExceptionHandler),
            vec![Box::new(CollectingWorkHandler { seen: sink })],
        );
        buffer.add_gating_sequences(&pool.get_worker_sequences());

        pool.start().unwrap();
        assert!(matches!(pool.start(), Err(ExchangeError::AlreadyRunning)));
        pool.halt();
    }
}
