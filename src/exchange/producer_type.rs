//! Producer cardinality
//!
//! Selects the sequencer variant at assembly time. Single-producer claims are
//! plain field updates from one thread; multi-producer claims go through a
//! CAS loop and a per-slot availability table.

use std::sync::Arc;

use crate::exchange::sequencer::{MultiProducerSequencer, Sequencer, SingleProducerSequencer};
use crate::exchange::wait_strategy::WaitStrategy;
use crate::exchange::Result;

/// How many threads will publish into the ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProducerType {
    /// Exactly one producer thread. Fastest claims, no coordination.
    Single,
    /// Any number of concurrent producer threads.
    Multi,
}

impl ProducerType {
    /// Build the matching sequencer.
    ///
    /// # Errors
    /// `InvalidBufferSize` when `buffer_size` is not a power of two.
    pub fn create_sequencer(
        self,
        buffer_size: usize,
        wait_strategy: Arc<dyn WaitStrategy>,
    ) -> Result<Arc<dyn Sequencer>> {
        Ok(match self {
            ProducerType::Single => {
                Arc::new(SingleProducerSequencer::new(buffer_size, wait_strategy)?)
            }
            ProducerType::Multi => {
                Arc::new(MultiProducerSequencer::new(buffer_size, wait_strategy)?)
            }
        })
    }
}

impl std::fmt::Display for ProducerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProducerType::Single => write!(f, "single"),
            ProducerType::Multi => write!(f, "multi"),
        }
    }
}
