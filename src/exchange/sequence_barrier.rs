//! Sequence barriers
//!
//! A barrier is a consumer's view of the exchange: the publish cursor, the
//! sequences of any upstream consumer stages, the wait strategy, and a sticky
//! alert flag used for cooperative shutdown. Processors never talk to the
//! sequencer directly while consuming; they wait on their barrier and are
//! handed the highest contiguously published sequence they may process.

use std::sync::atomic::{fence, AtomicBool, Ordering};
use std::sync::Arc;

use crate::exchange::sequence::Sequence;
use crate::exchange::sequencer::Sequencer;
use crate::exchange::wait_strategy::{AlertCheck, WaitStrategy};
use crate::exchange::{ExchangeError, Result};

/// Coordination point handed to each consumer stage.
pub trait SequenceBarrier: Send + Sync {
    /// Wait until `sequence` can be processed and return the highest
    /// contiguously published sequence, which may be greater than requested.
    ///
    /// # Errors
    /// `Alert` when the barrier was alerted before or during the wait;
    /// `Timeout` when a timeout-capable wait strategy gave up.
    fn wait_for(&self, sequence: i64) -> Result<i64>;

    /// The highest sequence a consumer behind this barrier could currently
    /// read: for a multi-producer sequencer this is the highest
    /// *contiguously published* sequence, not the highest claimed.
    fn get_cursor(&self) -> i64;

    /// Whether the alert flag is raised.
    fn is_alerted(&self) -> bool;

    /// Raise the alert flag and wake any blocked waiters. The flag is sticky
    /// until [`clear_alert`](Self::clear_alert).
    fn alert(&self);

    /// Lower the alert flag. Processors call this when (re)entering their
    /// processing loop.
    fn clear_alert(&self);

    /// Fail with `Alert` if the flag is raised.
    fn check_alert(&self) -> Result<()>;
}

/// The standard barrier implementation over a sequencer's cursor.
pub struct ProcessingSequenceBarrier {
    cursor: Arc<Sequence>,
    wait_strategy: Arc<dyn WaitStrategy>,
    dependent_sequences: Vec<Arc<Sequence>>,
    alerted: AtomicBool,
    sequencer: Arc<dyn Sequencer>,
}

impl ProcessingSequenceBarrier {
    /// Create a barrier over `cursor`. With no upstream stages the cursor
    /// itself becomes the dependent sequence.
    pub fn new(
        cursor: Arc<Sequence>,
        wait_strategy: Arc<dyn WaitStrategy>,
        dependent_sequences: Vec<Arc<Sequence>>,
        sequencer: Arc<dyn Sequencer>,
    ) -> Self {
        let dependent_sequences = if dependent_sequences.is_empty() {
            vec![Arc::clone(&cursor)]
        } else {
            dependent_sequences
        };

        Self {
            cursor,
            wait_strategy,
            dependent_sequences,
            alerted: AtomicBool::new(false),
            sequencer,
        }
    }
}

impl SequenceBarrier for ProcessingSequenceBarrier {
    fn wait_for(&self, sequence: i64) -> Result<i64> {
        SequenceBarrier::check_alert(self)?;

        let available_sequence = self.wait_strategy.wait_for(
            sequence,
            &self.cursor,
            &self.dependent_sequences,
            self,
        )?;

        SequenceBarrier::check_alert(self)?;

        // Pair with the publisher's release store before reading slot data.
        fence(Ordering::Acquire);

        if available_sequence < sequence {
            return Ok(available_sequence);
        }

        Ok(self
            .sequencer
            .get_highest_published_sequence(sequence, available_sequence))
    }

    fn get_cursor(&self) -> i64 {
        let current = self.cursor.get();
        if current < 0 {
            return current;
        }
        // Holes can only exist within the last ring lap: anything older must
        // already have been consumed before its slot was reclaimed.
        let lower_bound = (current - self.sequencer.get_buffer_size() as i64 + 1).max(0);
        self.sequencer
            .get_highest_published_sequence(lower_bound, current)
    }

    fn is_alerted(&self) -> bool {
        self.alerted.load(Ordering::Acquire)
    }

    fn alert(&self) {
        self.alerted.store(true, Ordering::Release);
        self.wait_strategy.signal_all_when_blocking();
    }

    fn clear_alert(&self) {
        self.alerted.store(false, Ordering::Release);
    }

    fn check_alert(&self) -> Result<()> {
        if self.is_alerted() {
            Err(ExchangeError::Alert)
        } else {
            Ok(())
        }
    }
}

impl AlertCheck for ProcessingSequenceBarrier {
    fn check_alert(&self) -> Result<()> {
        SequenceBarrier::check_alert(self)
    }
}

impl std::fmt::Debug for ProcessingSequenceBarrier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessingSequenceBarrier")
            .field("cursor", &self.cursor)
            .field("dependents", &self.dependent_sequences.len())
            .field("alerted", &self.is_alerted())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::sequencer::{MultiProducerSequencer, SingleProducerSequencer};
    use crate::exchange::wait_strategy::BusySpinWaitStrategy;
    use std::thread;
    use std::time::Duration;

    fn single_producer_barrier(
        buffer_size: usize,
        dependents: Vec<Arc<Sequence>>,
    ) -> (Arc<SingleProducerSequencer>, Arc<dyn SequenceBarrier>) {
        let sequencer = Arc::new(
            SingleProducerSequencer::new(buffer_size, Arc::new(BusySpinWaitStrategy::new()))
                .unwrap(),
        );
        let barrier = Arc::clone(&sequencer).new_barrier(dependents);
        (sequencer, barrier)
    }

    #[test]
    fn test_wait_for_returns_published_sequence() {
        let (sequencer, barrier) = single_producer_barrier(8, vec![]);

        for _ in 0..3 {
            let sequence = sequencer.next().unwrap();
            sequencer.publish(sequence);
        }

        assert_eq!(barrier.wait_for(0).unwrap(), 2);
        assert_eq!(barrier.get_cursor(), 2);
    }

    #[test]
    fn test_alert_is_sticky_until_cleared() {
        let (_sequencer, barrier) = single_producer_barrier(8, vec![]);

        barrier.alert();
        assert!(barrier.is_alerted());
        assert!(matches!(barrier.wait_for(0), Err(ExchangeError::Alert)));
        // Still alerted: the flag does not auto-reset.
        assert!(matches!(barrier.wait_for(0), Err(ExchangeError::Alert)));

        barrier.clear_alert();
        assert!(!barrier.is_alerted());
    }

    #[test]
    fn test_alert_wakes_blocked_waiter() {
        let sequencer = Arc::new(
            SingleProducerSequencer::new(8, Arc::new(crate::exchange::BlockingWaitStrategy::new()))
                .unwrap(),
        );
        let barrier = Arc::clone(&sequencer).new_barrier(vec![]);

        let waiter = {
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || barrier.wait_for(0))
        };

        thread::sleep(Duration::from_millis(20));
        barrier.alert();
        assert!(matches!(waiter.join().unwrap(), Err(ExchangeError::Alert)));
    }

    #[test]
    fn test_dependent_sequences_gate_the_wait() {
        let upstream = Arc::new(Sequence::default());
        let (sequencer, barrier) = single_producer_barrier(8, vec![Arc::clone(&upstream)]);

        for _ in 0..4 {
            let sequence = sequencer.next().unwrap();
            sequencer.publish(sequence);
        }

        // Published up to 3, but the upstream stage has only processed 1, so
        // the barrier must not hand out more than 1.
        upstream.set(1);
        assert_eq!(barrier.wait_for(0).unwrap(), 1);
    }

    #[test]
    fn test_multi_producer_barrier_stops_at_gaps() {
        let sequencer = Arc::new(
            MultiProducerSequencer::new(8, Arc::new(BusySpinWaitStrategy::new())).unwrap(),
        );
        let barrier = Arc::clone(&sequencer).new_barrier(vec![]);

        let hi = sequencer.next_n(3).unwrap();
        sequencer.publish(hi - 2);
        sequencer.publish(hi);

        // The cursor says 2 claimed, but only sequence 0 is contiguously
        // published; the barrier must not leak the hole.
        assert_eq!(barrier.wait_for(0).unwrap(), 0);
        assert_eq!(barrier.get_cursor(), 0);

        sequencer.publish(hi - 1);
        assert_eq!(barrier.wait_for(1).unwrap(), hi);
        assert_eq!(barrier.get_cursor(), hi);
    }
}
