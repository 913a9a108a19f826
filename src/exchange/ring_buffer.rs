//! Ring buffer storage and façade
//!
//! The ring buffer is a pre-allocated circular array of event slots indexed by
//! `sequence & (buffer_size - 1)`. Slots are created once by a user-supplied
//! factory and are never re-allocated; ownership of a slot rotates between
//! producers and consumers purely through the sequence protocol. The façade
//! also owns the sequencer and forwards the claim/publish entry points, so a
//! single handle is enough to drive one side of the exchange.

use std::cell::UnsafeCell;
use std::sync::Arc;

use crate::exchange::sequence::Sequence;
use crate::exchange::sequence_barrier::SequenceBarrier;
use crate::exchange::sequencer::{MultiProducerSequencer, Sequencer, SingleProducerSequencer};
use crate::exchange::wait_strategy::WaitStrategy;
use crate::exchange::{is_power_of_two, EventFactory, ExchangeError, Result};

/// Read access to published slots, handed to event processors.
pub trait DataProvider<T>: Send + Sync {
    /// Shared reference to the event at `sequence`.
    fn get(&self, sequence: i64) -> &T;

    /// Exclusive reference to the event at `sequence`.
    ///
    /// # Safety
    /// The caller must hold exclusive ownership of `sequence` under the
    /// sequence protocol: a producer between claim and publish, or the single
    /// consumer stage currently processing it.
    unsafe fn get_mut(&self, sequence: i64) -> &mut T;
}

/// Pre-allocated event storage plus the sequencer coordinating access to it.
pub struct RingBuffer<T> {
    slots: Box<[UnsafeCell<T>]>,
    index_mask: i64,
    sequencer: Arc<dyn Sequencer>,
}

// Slot access is guarded by the sequence protocol: exactly one producer owns a
// slot between claim and publish, and consumers only read slots at or below
// the published cursor.
unsafe impl<T: Send> Send for RingBuffer<T> {}
unsafe impl<T: Send + Sync> Sync for RingBuffer<T> {}

impl<T> RingBuffer<T>
where
    T: Send + Sync,
{
    /// Create a ring buffer over the given sequencer, filling every slot from
    /// the factory.
    ///
    /// # Errors
    /// Fails with `InvalidBufferSize` when `buffer_size` is not a power of two.
    pub fn new<F>(buffer_size: usize, event_factory: &F, sequencer: Arc<dyn Sequencer>) -> Result<Self>
    where
        F: EventFactory<T>,
    {
        if !is_power_of_two(buffer_size) {
            return Err(ExchangeError::InvalidBufferSize(buffer_size));
        }

        let slots: Box<[UnsafeCell<T>]> = (0..buffer_size)
            .map(|_| UnsafeCell::new(event_factory.new_instance()))
            .collect();

        Ok(Self {
            slots,
            index_mask: (buffer_size - 1) as i64,
            sequencer,
        })
    }

    /// Create a ring buffer with a single-producer sequencer.
    pub fn create_single_producer<F>(
        event_factory: &F,
        buffer_size: usize,
        wait_strategy: Arc<dyn WaitStrategy>,
    ) -> Result<Self>
    where
        F: EventFactory<T>,
    {
        let sequencer = Arc::new(SingleProducerSequencer::new(buffer_size, wait_strategy)?);
        Self::new(buffer_size, event_factory, sequencer)
    }

    /// Create a ring buffer with a multi-producer sequencer.
    pub fn create_multi_producer<F>(
        event_factory: &F,
        buffer_size: usize,
        wait_strategy: Arc<dyn WaitStrategy>,
    ) -> Result<Self>
    where
        F: EventFactory<T>,
    {
        let sequencer = Arc::new(MultiProducerSequencer::new(buffer_size, wait_strategy)?);
        Self::new(buffer_size, event_factory, sequencer)
    }

    /// Number of slots in the ring.
    pub fn buffer_size(&self) -> usize {
        self.slots.len()
    }

    /// The sequencer's published cursor.
    pub fn get_cursor(&self) -> Arc<Sequence> {
        self.sequencer.get_cursor()
    }

    /// Claim the next slot, waiting for capacity if needed.
    pub fn next(&self) -> Result<i64> {
        self.sequencer.next()
    }

    /// Claim the next `n` slots, waiting for capacity if needed. Returns the
    /// highest claimed sequence; the range is `hi - n + 1 ..= hi`.
    pub fn next_n(&self, n: i64) -> Result<i64> {
        self.sequencer.next_n(n)
    }

    /// Claim the next slot without waiting.
    ///
    /// # Errors
    /// Fails with `InsufficientCapacity` when the ring is full.
    pub fn try_next(&self) -> Result<i64> {
        self.sequencer.try_next()
    }

    /// Claim the next `n` slots without waiting.
    pub fn try_next_n(&self, n: i64) -> Result<i64> {
        self.sequencer.try_next_n(n)
    }

    /// Publish a claimed sequence, making the slot visible to consumers.
    pub fn publish(&self, sequence: i64) {
        self.sequencer.publish(sequence);
    }

    /// Publish a contiguous claimed range.
    pub fn publish_range(&self, low: i64, high: i64) {
        self.sequencer.publish_range(low, high);
    }

    /// Whether `sequence` has been published.
    pub fn is_available(&self, sequence: i64) -> bool {
        self.sequencer.is_available(sequence)
    }

    /// Slots left before the producer would overrun the slowest consumer.
    pub fn remaining_capacity(&self) -> i64 {
        self.sequencer.remaining_capacity()
    }

    /// Register consumer sequences the producer must not overtake by more
    /// than one ring lap.
    pub fn add_gating_sequences(&self, gating_sequences: &[Arc<Sequence>]) {
        self.sequencer.add_gating_sequences(gating_sequences);
    }

    /// Deregister a gating sequence. Returns whether it was registered.
    pub fn remove_gating_sequence(&self, sequence: &Arc<Sequence>) -> bool {
        self.sequencer.remove_gating_sequence(sequence)
    }

    /// Minimum over the registered gating sequences and the cursor.
    pub fn get_minimum_sequence(&self) -> i64 {
        self.sequencer.get_minimum_sequence()
    }

    /// Create a barrier for a consumer stage. `sequences_to_track` are the
    /// sequences of upstream stages; leave it empty for a first-stage
    /// consumer, which then tracks the publish cursor directly.
    pub fn new_barrier(&self, sequences_to_track: Vec<Arc<Sequence>>) -> Arc<dyn SequenceBarrier> {
        Arc::clone(&self.sequencer).new_barrier(sequences_to_track)
    }
}

impl<T> DataProvider<T> for RingBuffer<T>
where
    T: Send + Sync,
{
    fn get(&self, sequence: i64) -> &T {
        let index = (sequence & self.index_mask) as usize;
        // SAFETY: the mask keeps the index in bounds; published slots are only
        // read, never written, until the gating minimum passes them.
        let slot = unsafe { self.slots.get_unchecked(index) };
        unsafe { &*slot.get() }
    }

    unsafe fn get_mut(&self, sequence: i64) -> &mut T {
        let index = (sequence & self.index_mask) as usize;
        // SAFETY: the mask keeps the index in bounds; exclusivity is the
        // caller's contract per the trait documentation.
        let slot = self.slots.get_unchecked(index);
        &mut *slot.get()
    }
}

impl<T> std::fmt::Debug for RingBuffer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingBuffer")
            .field("buffer_size", &self.slots.len())
            .field("sequencer", &self.sequencer)
            .finish()
    }
}
