//! Sequencers
//!
//! A sequencer hands out slot claims and decides when a claimed sequence
//! becomes visible to consumers. The single-producer variant keeps its claim
//! state in plain fields owned by one writer thread; the multi-producer
//! variant resolves concurrent claims with a CAS loop and tracks per-slot
//! publication in an availability table so consumers can cope with
//! out-of-claim-order publishes.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_utils::CachePadded;
use parking_lot::RwLock;

use crate::exchange::sequence::{Sequence, SequenceGroup};
use crate::exchange::sequence_barrier::{ProcessingSequenceBarrier, SequenceBarrier};
use crate::exchange::wait_strategy::WaitStrategy;
use crate::exchange::{is_power_of_two, ExchangeError, Result, INITIAL_CURSOR_VALUE};

/// Coordinator for claiming and publishing ring slots.
///
/// Claim-side methods (`next*`, `try_next*`, `claim`) are subject to the
/// producer cardinality of the concrete variant; everything else is safe to
/// call from any thread.
pub trait Sequencer: Send + Sync + std::fmt::Debug {
    /// The published cursor.
    fn get_cursor(&self) -> Arc<Sequence>;

    /// Capacity of the ring this sequencer coordinates.
    fn get_buffer_size(&self) -> usize;

    /// Whether `required_capacity` slots could be claimed right now. A
    /// concurrent answer; treat it as a hint.
    fn has_available_capacity(&self, required_capacity: i64) -> bool;

    /// Slots left before the producer would overrun the slowest consumer.
    fn remaining_capacity(&self) -> i64;

    /// Claim the next sequence, waiting for capacity if needed.
    fn next(&self) -> Result<i64>;

    /// Claim the next `n` sequences, waiting for capacity if needed. Returns
    /// the highest claimed sequence.
    ///
    /// # Errors
    /// `InvalidBatchSize` when `n` is not in `1..=buffer_size`.
    fn next_n(&self, n: i64) -> Result<i64>;

    /// Claim the next sequence without waiting.
    ///
    /// # Errors
    /// `InsufficientCapacity` when the claim would have to wait.
    fn try_next(&self) -> Result<i64>;

    /// Claim the next `n` sequences without waiting.
    fn try_next_n(&self, n: i64) -> Result<i64>;

    /// Move the claim position to `sequence` without publishing. Only for
    /// wiring processors up at a known starting point.
    fn claim(&self, sequence: i64);

    /// Make `sequence` visible to consumers and signal blocked waiters.
    fn publish(&self, sequence: i64);

    /// Publish every sequence in `low..=high`.
    fn publish_range(&self, low: i64, high: i64);

    /// Whether `sequence` has been published.
    fn is_available(&self, sequence: i64) -> bool;

    /// Highest sequence in `lower_bound..=available_sequence` such that every
    /// sequence at or below it is published. Consumers need this because
    /// concurrent producers publish out of claim order.
    fn get_highest_published_sequence(&self, lower_bound: i64, available_sequence: i64) -> i64;

    /// Register consumer sequences that bound producer progress.
    fn add_gating_sequences(&self, gating_sequences: &[Arc<Sequence>]);

    /// Deregister a gating sequence. Returns whether it was registered.
    fn remove_gating_sequence(&self, sequence: &Arc<Sequence>) -> bool;

    /// Minimum of the gating sequences and the cursor.
    fn get_minimum_sequence(&self) -> i64;

    /// Create a barrier over this sequencer for a consumer stage.
    fn new_barrier(self: Arc<Self>, sequences_to_track: Vec<Arc<Sequence>>)
        -> Arc<dyn SequenceBarrier>;
}

/// Claim-side state of the single producer. Plain fields: only the producer
/// thread reads or writes them.
struct ClaimState {
    next_value: i64,
    cached_value: i64,
}

/// Sequencer for exactly one producer thread.
///
/// Claim order equals publish order, so availability is just a cursor
/// comparison. The last observed minimum of the gating sequences is cached in
/// a plain field to keep the min-scan off the hot path; the cache is
/// re-validated whenever the claim would wrap, or when `cached_value >
/// next_value` flags the cache as untrustworthy. That sentinel matters at
/// startup, when both fields sit at -1: an untrusted cache must force a real
/// scan rather than report capacity that does not exist.
///
/// Not safe for use from multiple producer threads: the claim side performs
/// no synchronisation at all.
pub struct SingleProducerSequencer {
    buffer_size: usize,
    wait_strategy: Arc<dyn WaitStrategy>,
    cursor: Arc<Sequence>,
    gating_sequences: RwLock<SequenceGroup>,
    claim_state: CachePadded<UnsafeCell<ClaimState>>,
}

// The UnsafeCell holds producer-thread-only claim state; every shared field
// is independently synchronised. Callers uphold the single-writer contract.
unsafe impl Sync for SingleProducerSequencer {}

impl SingleProducerSequencer {
    /// Create a sequencer for a ring of `buffer_size` slots.
    ///
    /// # Errors
    /// `InvalidBufferSize` when `buffer_size` is not a power of two.
    pub fn new(buffer_size: usize, wait_strategy: Arc<dyn WaitStrategy>) -> Result<Self> {
        if !is_power_of_two(buffer_size) {
            return Err(ExchangeError::InvalidBufferSize(buffer_size));
        }
        Ok(Self {
            buffer_size,
            wait_strategy,
            cursor: Arc::new(Sequence::new_at_initial_value()),
            gating_sequences: RwLock::new(SequenceGroup::new()),
            claim_state: CachePadded::new(UnsafeCell::new(ClaimState {
                next_value: INITIAL_CURSOR_VALUE,
                cached_value: INITIAL_CURSOR_VALUE,
            })),
        })
    }

    /// # Safety
    /// Only the single producer thread may call this; it hands out an
    /// unsynchronised mutable view of the claim state.
    #[allow(clippy::mut_from_ref)]
    unsafe fn claim_state(&self) -> &mut ClaimState {
        &mut *self.claim_state.get()
    }

    fn minimum_gating_sequence(&self, default_value: i64) -> i64 {
        self.gating_sequences.read().get_minimum_sequence(default_value)
    }

    fn has_capacity(&self, required_capacity: i64, do_store: bool) -> bool {
        // SAFETY: claim-side call, single producer thread per the type contract.
        let state = unsafe { self.claim_state() };
        let next_value = state.next_value;

        let wrap_point = (next_value + required_capacity) - self.buffer_size as i64;
        let cached_gating_sequence = state.cached_value;

        if wrap_point > cached_gating_sequence || cached_gating_sequence > next_value {
            if do_store {
                // Store-load fence: consumers must see producer progress
                // before the scan reads their sequences.
                self.cursor.set_volatile(next_value);
            }

            let min_sequence = self.minimum_gating_sequence(next_value);
            state.cached_value = min_sequence;

            if wrap_point > min_sequence {
                return false;
            }
        }
        true
    }
}

impl Sequencer for SingleProducerSequencer {
    fn get_cursor(&self) -> Arc<Sequence> {
        Arc::clone(&self.cursor)
    }

    fn get_buffer_size(&self) -> usize {
        self.buffer_size
    }

    fn has_available_capacity(&self, required_capacity: i64) -> bool {
        self.has_capacity(required_capacity, false)
    }

    fn remaining_capacity(&self) -> i64 {
        // SAFETY: claim-side call, single producer thread per the type contract.
        let state = unsafe { self.claim_state() };
        let next_value = state.next_value;
        let consumed = self.minimum_gating_sequence(next_value);
        self.buffer_size as i64 - (next_value - consumed)
    }

    fn next(&self) -> Result<i64> {
        self.next_n(1)
    }

    fn next_n(&self, n: i64) -> Result<i64> {
        if n < 1 || n > self.buffer_size as i64 {
            return Err(ExchangeError::InvalidBatchSize(n));
        }

        // SAFETY: claim-side call, single producer thread per the type contract.
        let state = unsafe { self.claim_state() };
        let next_value = state.next_value;
        let next_sequence = next_value + n;
        let wrap_point = next_sequence - self.buffer_size as i64;
        let cached_gating_sequence = state.cached_value;

        if wrap_point > cached_gating_sequence || cached_gating_sequence > next_value {
            // Expose progress before the scan, then spin until the slowest
            // consumer clears the wrap point.
            self.cursor.set_volatile(next_value);

            loop {
                let min_sequence = self.minimum_gating_sequence(next_value);
                if wrap_point <= min_sequence {
                    state.cached_value = min_sequence;
                    break;
                }
                thread::park_timeout(Duration::from_nanos(1));
            }
        }

        state.next_value = next_sequence;
        Ok(next_sequence)
    }

    fn try_next(&self) -> Result<i64> {
        self.try_next_n(1)
    }

    fn try_next_n(&self, n: i64) -> Result<i64> {
        if n < 1 || n > self.buffer_size as i64 {
            return Err(ExchangeError::InvalidBatchSize(n));
        }

        if !self.has_capacity(n, true) {
            return Err(ExchangeError::InsufficientCapacity);
        }

        // SAFETY: claim-side call, single producer thread per the type contract.
        let state = unsafe { self.claim_state() };
        state.next_value += n;
        Ok(state.next_value)
    }

    fn claim(&self, sequence: i64) {
        // SAFETY: claim-side call, single producer thread per the type contract.
        let state = unsafe { self.claim_state() };
        state.next_value = sequence;
    }

    fn publish(&self, sequence: i64) {
        self.cursor.set(sequence);
        self.wait_strategy.signal_all_when_blocking();
    }

    fn publish_range(&self, _low: i64, high: i64) {
        // The cursor jump exposes the whole range at once.
        self.publish(high);
    }

    fn is_available(&self, sequence: i64) -> bool {
        sequence <= self.cursor.get()
    }

    fn get_highest_published_sequence(&self, _lower_bound: i64, available_sequence: i64) -> i64 {
        // Claim order equals publish order, so there are never holes.
        available_sequence
    }

    fn add_gating_sequences(&self, gating_sequences: &[Arc<Sequence>]) {
        let mut group = self.gating_sequences.write();
        for sequence in gating_sequences {
            group.add(Arc::clone(sequence));
        }
    }

    fn remove_gating_sequence(&self, sequence: &Arc<Sequence>) -> bool {
        self.gating_sequences.write().remove(sequence)
    }

    fn get_minimum_sequence(&self) -> i64 {
        self.minimum_gating_sequence(self.cursor.get())
    }

    fn new_barrier(
        self: Arc<Self>,
        sequences_to_track: Vec<Arc<Sequence>>,
    ) -> Arc<dyn SequenceBarrier> {
        let cursor = Arc::clone(&self.cursor);
        let wait_strategy = Arc::clone(&self.wait_strategy);
        Arc::new(ProcessingSequenceBarrier::new(
            cursor,
            wait_strategy,
            sequences_to_track,
            self,
        ))
    }
}

impl std::fmt::Debug for SingleProducerSequencer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingleProducerSequencer")
            .field("buffer_size", &self.buffer_size)
            .field("cursor", &self.cursor)
            .finish()
    }
}

/// Sequencer for concurrent producer threads.
///
/// The cursor tracks the highest *claimed* sequence; a parallel availability
/// table records, per slot, the lap number on which the slot was last
/// published (`sequence >> log2(buffer_size)`). A slot is available exactly
/// when its table entry matches the lap of the queried sequence, which also
/// rules out ABA confusion across laps: the marker changes every time the
/// ring wraps.
#[derive(Debug)]
pub struct MultiProducerSequencer {
    buffer_size: usize,
    index_mask: i64,
    index_shift: u32,
    wait_strategy: Arc<dyn WaitStrategy>,
    cursor: Arc<Sequence>,
    gating_sequences: RwLock<SequenceGroup>,
    gating_sequence_cache: Sequence,
    available_buffer: Box<[AtomicI32]>,
}

impl MultiProducerSequencer {
    /// Create a sequencer for a ring of `buffer_size` slots.
    ///
    /// # Errors
    /// `InvalidBufferSize` when `buffer_size` is not a power of two.
    pub fn new(buffer_size: usize, wait_strategy: Arc<dyn WaitStrategy>) -> Result<Self> {
        if !is_power_of_two(buffer_size) {
            return Err(ExchangeError::InvalidBufferSize(buffer_size));
        }

        let available_buffer: Box<[AtomicI32]> =
            (0..buffer_size).map(|_| AtomicI32::new(-1)).collect();

        Ok(Self {
            buffer_size,
            index_mask: (buffer_size - 1) as i64,
            index_shift: buffer_size.trailing_zeros(),
            wait_strategy,
            cursor: Arc::new(Sequence::new_at_initial_value()),
            gating_sequences: RwLock::new(SequenceGroup::new()),
            gating_sequence_cache: Sequence::new_at_initial_value(),
            available_buffer,
        })
    }

    fn minimum_gating_sequence(&self, default_value: i64) -> i64 {
        self.gating_sequences.read().get_minimum_sequence(default_value)
    }

    fn calculate_index(&self, sequence: i64) -> usize {
        (sequence & self.index_mask) as usize
    }

    fn calculate_availability_flag(&self, sequence: i64) -> i32 {
        (sequence >> self.index_shift) as i32
    }

    fn set_available(&self, sequence: i64) {
        let index = self.calculate_index(sequence);
        let flag = self.calculate_availability_flag(sequence);
        self.available_buffer[index].store(flag, Ordering::Release);
    }

    fn has_capacity(&self, required_capacity: i64, cursor_value: i64) -> bool {
        let wrap_point = (cursor_value + required_capacity) - self.buffer_size as i64;
        let cached_gating_sequence = self.gating_sequence_cache.get();

        if wrap_point > cached_gating_sequence || cached_gating_sequence > cursor_value {
            let min_sequence = self.minimum_gating_sequence(cursor_value);
            self.gating_sequence_cache.set(min_sequence);

            if wrap_point > min_sequence {
                return false;
            }
        }
        true
    }
}

impl Sequencer for MultiProducerSequencer {
    fn get_cursor(&self) -> Arc<Sequence> {
        Arc::clone(&self.cursor)
    }

    fn get_buffer_size(&self) -> usize {
        self.buffer_size
    }

    fn has_available_capacity(&self, required_capacity: i64) -> bool {
        self.has_capacity(required_capacity, self.cursor.get())
    }

    fn remaining_capacity(&self) -> i64 {
        let produced = self.cursor.get();
        let consumed = self.minimum_gating_sequence(produced);
        self.buffer_size as i64 - (produced - consumed)
    }

    fn next(&self) -> Result<i64> {
        self.next_n(1)
    }

    fn next_n(&self, n: i64) -> Result<i64> {
        if n < 1 || n > self.buffer_size as i64 {
            return Err(ExchangeError::InvalidBatchSize(n));
        }

        loop {
            let current = self.cursor.get();
            let next = current + n;
            let wrap_point = next - self.buffer_size as i64;
            let cached_gating_sequence = self.gating_sequence_cache.get();

            if wrap_point > cached_gating_sequence || cached_gating_sequence > current {
                let gating_sequence = self.minimum_gating_sequence(current);
                if wrap_point > gating_sequence {
                    thread::park_timeout(Duration::from_nanos(1));
                    continue;
                }
                self.gating_sequence_cache.set(gating_sequence);
            } else if self.cursor.compare_and_set(current, next) {
                return Ok(next);
            }
        }
    }

    fn try_next(&self) -> Result<i64> {
        self.try_next_n(1)
    }

    fn try_next_n(&self, n: i64) -> Result<i64> {
        if n < 1 || n > self.buffer_size as i64 {
            return Err(ExchangeError::InvalidBatchSize(n));
        }

        loop {
            let current = self.cursor.get();
            let next = current + n;

            if !self.has_capacity(n, current) {
                return Err(ExchangeError::InsufficientCapacity);
            }

            if self.cursor.compare_and_set(current, next) {
                return Ok(next);
            }
        }
    }

    fn claim(&self, sequence: i64) {
        self.cursor.set(sequence);
    }

    fn publish(&self, sequence: i64) {
        self.set_available(sequence);
        self.wait_strategy.signal_all_when_blocking();
    }

    fn publish_range(&self, low: i64, high: i64) {
        for sequence in low..=high {
            self.set_available(sequence);
        }
        self.wait_strategy.signal_all_when_blocking();
    }

    fn is_available(&self, sequence: i64) -> bool {
        let index = self.calculate_index(sequence);
        let flag = self.calculate_availability_flag(sequence);
        self.available_buffer[index].load(Ordering::Acquire) == flag
    }

    fn get_highest_published_sequence(&self, lower_bound: i64, available_sequence: i64) -> i64 {
        let mut sequence = lower_bound;
        while sequence <= available_sequence {
            if !self.is_available(sequence) {
                return sequence - 1;
            }
            sequence += 1;
        }
        available_sequence
    }

    fn add_gating_sequences(&self, gating_sequences: &[Arc<Sequence>]) {
        let mut group = self.gating_sequences.write();
        for sequence in gating_sequences {
            group.add(Arc::clone(sequence));
        }
    }

    fn remove_gating_sequence(&self, sequence: &Arc<Sequence>) -> bool {
        self.gating_sequences.write().remove(sequence)
    }

    fn get_minimum_sequence(&self) -> i64 {
        self.minimum_gating_sequence(self.cursor.get())
    }

    fn new_barrier(
        self: Arc<Self>,
        sequences_to_track: Vec<Arc<Sequence>>,
    ) -> Arc<dyn SequenceBarrier> {
        let cursor = Arc::clone(&self.cursor);
        let wait_strategy = Arc::clone(&self.wait_strategy);
        Arc::new(ProcessingSequenceBarrier::new(
            cursor,
            wait_strategy,
            sequences_to_track,
            self,
        ))
    }
}
