//! Sequence counters
//!
//! A `Sequence` tracks progress through the ring buffer and coordinates
//! producers and consumers. It provides atomic operations over a 64-bit value
//! while preventing false sharing through explicit padding on both sides of
//! the hot field.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use crate::exchange::INITIAL_CURSOR_VALUE;

/// A padded, monotonically advancing 64-bit counter.
///
/// The counter starts at `-1`, meaning no slot has been claimed or consumed
/// yet. Seven 64-bit words of padding on each side of the value keep two
/// `Sequence`s (or a `Sequence` and any neighbouring heap allocation) from
/// ever sharing a cache line.
#[repr(C, align(64))]
pub struct Sequence {
    _pad_left: [i64; 7],
    value: AtomicI64,
    _pad_right: [i64; 7],
}

impl Sequence {
    /// Create a new sequence with the given initial value.
    pub fn new(initial_value: i64) -> Self {
        Self {
            _pad_left: [0; 7],
            value: AtomicI64::new(initial_value),
            _pad_right: [0; 7],
        }
    }

    /// Create a sequence at the initial cursor value (`-1`).
    pub fn new_at_initial_value() -> Self {
        Self::new(INITIAL_CURSOR_VALUE)
    }

    /// Volatile read of the current value.
    #[inline]
    pub fn get(&self) -> i64 {
        self.value.load(Ordering::Acquire)
    }

    /// Ordered write; pairs with [`get`](Self::get) on the reader side.
    #[inline]
    pub fn set(&self, value: i64) {
        self.value.store(value, Ordering::Release);
    }

    /// Write with a full store-load fence. Used by the single-producer
    /// capacity check so the cursor update cannot be reordered past the
    /// subsequent gating-sequence scan.
    #[inline]
    pub fn set_volatile(&self, value: i64) {
        self.value.store(value, Ordering::SeqCst);
    }

    /// Unordered write. Only valid when a later fence or release store makes
    /// the value visible, or when publication is handed off some other way
    /// (for example before spawning the reading thread).
    #[inline]
    pub fn set_plain(&self, value: i64) {
        self.value.store(value, Ordering::Relaxed);
    }

    /// Atomically set the value to `new` if the current value is `expected`.
    #[inline]
    pub fn compare_and_set(&self, expected: i64, new: i64) -> bool {
        self.value
            .compare_exchange(expected, new, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Atomically add one and return the new value.
    #[inline]
    pub fn increment_and_get(&self) -> i64 {
        self.add_and_get(1)
    }

    /// Atomically add `increment` and return the new value.
    #[inline]
    pub fn add_and_get(&self, increment: i64) -> i64 {
        self.value.fetch_add(increment, Ordering::AcqRel) + increment
    }

    /// The minimum over a set of sequences, clamped to `default_value`.
    ///
    /// With an empty slice this returns `default_value`, which is what the
    /// producer capacity check wants: no registered consumers means the
    /// producer gates only on itself.
    pub fn get_minimum_sequence(sequences: &[Arc<Sequence>], default_value: i64) -> i64 {
        sequences
            .iter()
            .fold(default_value, |minimum, sequence| minimum.min(sequence.get()))
    }
}

impl Default for Sequence {
    fn default() -> Self {
        Self::new_at_initial_value()
    }
}

impl std::fmt::Debug for Sequence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sequence").field("value", &self.get()).finish()
    }
}

impl std::fmt::Display for Sequence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.get())
    }
}

/// An ordered set of sequences tracked together, e.g. the gating sequences
/// registered with a sequencer. Registration is not on the hot path; callers
/// guard the group with a lock and take the minimum through it.
#[derive(Debug, Default)]
pub struct SequenceGroup {
    sequences: Vec<Arc<Sequence>>,
}

impl SequenceGroup {
    /// Create a new empty group.
    pub fn new() -> Self {
        Self { sequences: Vec::new() }
    }

    /// Add a sequence to the group.
    pub fn add(&mut self, sequence: Arc<Sequence>) {
        self.sequences.push(sequence);
    }

    /// Remove a sequence from the group by identity. Returns whether the
    /// sequence was present.
    pub fn remove(&mut self, sequence: &Arc<Sequence>) -> bool {
        if let Some(pos) = self.sequences.iter().position(|s| Arc::ptr_eq(s, sequence)) {
            self.sequences.remove(pos);
            true
        } else {
            false
        }
    }

    /// The minimum sequence in the group, clamped to `default_value`.
    pub fn get_minimum_sequence(&self, default_value: i64) -> i64 {
        Sequence::get_minimum_sequence(&self.sequences, default_value)
    }

    /// Number of sequences in the group.
    pub fn len(&self) -> usize {
        self.sequences.len()
    }

    /// Whether the group is empty.
    pub fn is_empty(&self) -> bool {
        self.sequences.is_empty()
    }

    /// All sequences in registration order.
    pub fn sequences(&self) -> &[Arc<Sequence>] {
        &self.sequences
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_sequence_starts_at_initial_value() {
        assert_eq!(Sequence::default().get(), INITIAL_CURSOR_VALUE);
        assert_eq!(Sequence::new(42).get(), 42);
    }

    #[test]
    fn test_sequence_set_get() {
        let seq = Sequence::new(0);
        seq.set(100);
        assert_eq!(seq.get(), 100);
        seq.set_volatile(200);
        assert_eq!(seq.get(), 200);
        seq.set_plain(300);
        assert_eq!(seq.get(), 300);
    }

    #[test]
    fn test_sequence_arithmetic() {
        let seq = Sequence::new(10);
        assert_eq!(seq.increment_and_get(), 11);
        assert_eq!(seq.add_and_get(5), 16);
        assert_eq!(seq.get(), 16);
    }

    #[test]
    fn test_sequence_compare_and_set() {
        let seq = Sequence::new(10);
        assert!(seq.compare_and_set(10, 20));
        assert_eq!(seq.get(), 20);

        assert!(!seq.compare_and_set(10, 30));
        assert_eq!(seq.get(), 20);
    }

    #[test]
    fn test_sequence_padding_occupies_full_lines() {
        // Two sequences in one allocation must not share a 64-byte line.
        assert!(std::mem::size_of::<Sequence>() >= 128);
        assert_eq!(std::mem::align_of::<Sequence>(), 64);
    }

    #[test]
    fn test_minimum_sequence_clamps_to_default() {
        assert_eq!(Sequence::get_minimum_sequence(&[], 7), 7);

        let sequences = vec![Arc::new(Sequence::new(10)), Arc::new(Sequence::new(3))];
        assert_eq!(Sequence::get_minimum_sequence(&sequences, 100), 3);
        assert_eq!(Sequence::get_minimum_sequence(&sequences, 1), 1);
    }

    #[test]
    fn test_sequence_group_add_remove() {
        let mut group = SequenceGroup::new();
        assert!(group.is_empty());

        let a = Arc::new(Sequence::new(10));
        let b = Arc::new(Sequence::new(5));
        group.add(Arc::clone(&a));
        group.add(Arc::clone(&b));

        assert_eq!(group.len(), 2);
        assert_eq!(group.get_minimum_sequence(i64::MAX), 5);

        assert!(group.remove(&b));
        assert_eq!(group.get_minimum_sequence(i64::MAX), 10);
        assert!(!group.remove(&b));
    }

    #[test]
    fn test_sequence_concurrent_increments() {
        let seq = Arc::new(Sequence::new(0));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let seq = Arc::clone(&seq);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        seq.increment_and_get();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(seq.get(), 8000);
    }
}
