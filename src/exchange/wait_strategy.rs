//! Wait strategies
//!
//! A wait strategy is the policy by which a consumer waits for a target
//! sequence to become available. Every variant trades CPU use against wake-up
//! latency: condition-variable blocking at one end, unconditional busy-spin at
//! the other, with yielding, sleeping and phased-backoff mixes in between.
//!
//! All variants share one contract: `wait_for` returns only when the
//! dependent sequence has reached the target, fails with `Alert` if the
//! barrier is alerted during the wait, or fails with `Timeout` on the
//! timeout-capable variant. The returned sequence is the dependent value at
//! return time and may exceed the target; consumers use the overshoot for
//! batching. Dependent reads always go through the sequence's volatile load,
//! never a cached copy.

use std::hint;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::exchange::sequence::Sequence;
use crate::exchange::{ExchangeError, Result};

/// The slice of barrier behaviour a strategy needs while parked: the sticky
/// alert flag check. Raising the alert must wake blocking strategies via
/// [`WaitStrategy::signal_all_when_blocking`].
pub trait AlertCheck {
    /// Fail with [`ExchangeError::Alert`] if the barrier has been alerted.
    fn check_alert(&self) -> Result<()>;
}

/// Policy for waiting until a sequence becomes available.
pub trait WaitStrategy: Send + Sync + std::fmt::Debug {
    /// Wait until the dependent sequence reaches `sequence`.
    ///
    /// `cursor` is the sequencer's publish cursor; `dependents` is the
    /// non-empty set of sequences this consumer waits behind (the cursor
    /// itself for a first-stage consumer, upstream consumer sequences
    /// otherwise).
    ///
    /// # Errors
    /// `Alert` when the barrier is alerted mid-wait; `Timeout` when a
    /// timeout-capable variant exhausts its budget.
    fn wait_for(
        &self,
        sequence: i64,
        cursor: &Sequence,
        dependents: &[Arc<Sequence>],
        barrier: &dyn AlertCheck,
    ) -> Result<i64>;

    /// Called by producers at publish time to wake any blocked consumers.
    /// A no-op for non-blocking variants.
    fn signal_all_when_blocking(&self);
}

#[inline]
fn dependent_sequence(dependents: &[Arc<Sequence>]) -> i64 {
    Sequence::get_minimum_sequence(dependents, i64::MAX)
}

/// Condition-variable blocking. Lowest CPU use, highest wake-up latency.
///
/// Blocks on the publish signal while the cursor is behind, then briefly
/// spins until the dependent sequence (which may lag the cursor when there
/// are upstream consumers) catches up.
#[derive(Debug, Default)]
pub struct BlockingWaitStrategy {
    mutex: Mutex<()>,
    condvar: Condvar,
}

impl BlockingWaitStrategy {
    /// Create a new blocking wait strategy.
    pub fn new() -> Self {
        Self::default()
    }
}

impl WaitStrategy for BlockingWaitStrategy {
    fn wait_for(
        &self,
        sequence: i64,
        cursor: &Sequence,
        dependents: &[Arc<Sequence>],
        barrier: &dyn AlertCheck,
    ) -> Result<i64> {
        if cursor.get() < sequence {
            let mut guard = self.mutex.lock();
            while cursor.get() < sequence {
                barrier.check_alert()?;
                self.condvar.wait(&mut guard);
            }
        }

        let mut available_sequence = dependent_sequence(dependents);
        while available_sequence < sequence {
            barrier.check_alert()?;
            hint::spin_loop();
            available_sequence = dependent_sequence(dependents);
        }
        Ok(available_sequence)
    }

    fn signal_all_when_blocking(&self) {
        // Taking the lock pairs the signal with the cursor check inside
        // wait_for, so a publish between check and wait cannot be lost.
        let _guard = self.mutex.lock();
        self.condvar.notify_all();
    }
}

/// Blocking with a bounded wait. Fails with `Timeout` once the budget
/// elapses, which the event processor surfaces as a periodic timeout
/// callback rather than an error.
#[derive(Debug)]
pub struct TimeoutBlockingWaitStrategy {
    mutex: Mutex<()>,
    condvar: Condvar,
    timeout: Duration,
}

impl TimeoutBlockingWaitStrategy {
    /// Create a strategy that gives up after `timeout` per wait.
    pub fn new(timeout: Duration) -> Self {
        Self {
            mutex: Mutex::new(()),
            condvar: Condvar::new(),
            timeout,
        }
    }

    /// The configured wait budget.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl WaitStrategy for TimeoutBlockingWaitStrategy {
    fn wait_for(
        &self,
        sequence: i64,
        cursor: &Sequence,
        dependents: &[Arc<Sequence>],
        barrier: &dyn AlertCheck,
    ) -> Result<i64> {
        if cursor.get() < sequence {
            let start = Instant::now();
            let mut guard = self.mutex.lock();
            while cursor.get() < sequence {
                barrier.check_alert()?;
                let remaining = match self.timeout.checked_sub(start.elapsed()) {
                    Some(remaining) => remaining,
                    None => return Err(ExchangeError::Timeout),
                };
                let timed_out = self.condvar.wait_for(&mut guard, remaining).timed_out();
                if timed_out && cursor.get() < sequence {
                    return Err(ExchangeError::Timeout);
                }
            }
        }

        let mut available_sequence = dependent_sequence(dependents);
        while available_sequence < sequence {
            barrier.check_alert()?;
            hint::spin_loop();
            available_sequence = dependent_sequence(dependents);
        }
        Ok(available_sequence)
    }

    fn signal_all_when_blocking(&self) {
        let _guard = self.mutex.lock();
        self.condvar.notify_all();
    }
}

/// Blocking variant that only touches the mutex on the publish path when a
/// consumer has announced it is about to park, cutting producer-side lock
/// traffic on busy rings.
#[derive(Debug, Default)]
pub struct LiteBlockingWaitStrategy {
    mutex: Mutex<()>,
    condvar: Condvar,
    signal_needed: AtomicBool,
}

impl LiteBlockingWaitStrategy {
    /// Create a new lite blocking wait strategy.
    pub fn new() -> Self {
        Self::default()
    }
}

impl WaitStrategy for LiteBlockingWaitStrategy {
    fn wait_for(
        &self,
        sequence: i64,
        cursor: &Sequence,
        dependents: &[Arc<Sequence>],
        barrier: &dyn AlertCheck,
    ) -> Result<i64> {
        if cursor.get() < sequence {
            let mut guard = self.mutex.lock();
            loop {
                // An RMW, not a plain store: the swap orders this announcement
                // against the producer's swap(false) so the cursor re-check
                // below observes any publish that skipped the notify.
                self.signal_needed.swap(true, Ordering::SeqCst);
                if cursor.get() >= sequence {
                    break;
                }
                barrier.check_alert()?;
                self.condvar.wait(&mut guard);
            }
        }

        let mut available_sequence = dependent_sequence(dependents);
        while available_sequence < sequence {
            barrier.check_alert()?;
            hint::spin_loop();
            available_sequence = dependent_sequence(dependents);
        }
        Ok(available_sequence)
    }

    fn signal_all_when_blocking(&self) {
        if self.signal_needed.swap(false, Ordering::SeqCst) {
            let _guard = self.mutex.lock();
            self.condvar.notify_all();
        }
    }
}

/// Spin a bounded number of times, then yield the thread. Balanced CPU use
/// and latency.
#[derive(Debug, Default)]
pub struct YieldingWaitStrategy;

const SPIN_TRIES: u32 = 100;

impl YieldingWaitStrategy {
    /// Create a new yielding wait strategy.
    pub fn new() -> Self {
        Self
    }

    fn apply_wait_method(&self, barrier: &dyn AlertCheck, counter: u32) -> Result<u32> {
        barrier.check_alert()?;
        if counter == 0 {
            thread::yield_now();
            Ok(0)
        } else {
            Ok(counter - 1)
        }
    }
}

impl WaitStrategy for YieldingWaitStrategy {
    fn wait_for(
        &self,
        sequence: i64,
        _cursor: &Sequence,
        dependents: &[Arc<Sequence>],
        barrier: &dyn AlertCheck,
    ) -> Result<i64> {
        let mut counter = SPIN_TRIES;
        let mut available_sequence = dependent_sequence(dependents);
        while available_sequence < sequence {
            counter = self.apply_wait_method(barrier, counter)?;
            available_sequence = dependent_sequence(dependents);
        }
        Ok(available_sequence)
    }

    fn signal_all_when_blocking(&self) {}
}

/// Spin, then yield, then sleep a fixed number of nanoseconds per retry.
/// Quieter than yielding when the ring is idle for long stretches.
#[derive(Debug)]
pub struct SleepingWaitStrategy {
    retries: i32,
    sleep_ns: u64,
}

const DEFAULT_RETRIES: i32 = 200;
const DEFAULT_SLEEP_NS: u64 = 100;

impl SleepingWaitStrategy {
    /// Create a strategy with the default spin budget and sleep interval.
    pub fn new() -> Self {
        Self::with_retries_and_sleep(DEFAULT_RETRIES, DEFAULT_SLEEP_NS)
    }

    /// Create a strategy with a custom spin budget.
    pub fn with_retries(retries: i32) -> Self {
        Self::with_retries_and_sleep(retries, DEFAULT_SLEEP_NS)
    }

    /// Create a strategy with a custom spin budget and sleep interval.
    pub fn with_retries_and_sleep(retries: i32, sleep_ns: u64) -> Self {
        Self { retries, sleep_ns }
    }

    fn apply_wait_method(&self, barrier: &dyn AlertCheck, counter: i32) -> Result<i32> {
        barrier.check_alert()?;
        if counter > 100 {
            Ok(counter - 1)
        } else if counter > 0 {
            thread::yield_now();
            Ok(counter - 1)
        } else {
            thread::sleep(Duration::from_nanos(self.sleep_ns));
            Ok(counter)
        }
    }
}

impl Default for SleepingWaitStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl WaitStrategy for SleepingWaitStrategy {
    fn wait_for(
        &self,
        sequence: i64,
        _cursor: &Sequence,
        dependents: &[Arc<Sequence>],
        barrier: &dyn AlertCheck,
    ) -> Result<i64> {
        let mut counter = self.retries;
        let mut available_sequence = dependent_sequence(dependents);
        while available_sequence < sequence {
            counter = self.apply_wait_method(barrier, counter)?;
            available_sequence = dependent_sequence(dependents);
        }
        Ok(available_sequence)
    }

    fn signal_all_when_blocking(&self) {}
}

/// Unconditional spin with a CPU pause hint. Lowest latency; burns a core.
/// Only sensible when consumer threads are pinned to dedicated cores.
#[derive(Debug, Default)]
pub struct BusySpinWaitStrategy;

impl BusySpinWaitStrategy {
    /// Create a new busy-spin wait strategy.
    pub fn new() -> Self {
        Self
    }
}

impl WaitStrategy for BusySpinWaitStrategy {
    fn wait_for(
        &self,
        sequence: i64,
        _cursor: &Sequence,
        dependents: &[Arc<Sequence>],
        barrier: &dyn AlertCheck,
    ) -> Result<i64> {
        let mut available_sequence = dependent_sequence(dependents);
        while available_sequence < sequence {
            barrier.check_alert()?;
            hint::spin_loop();
            available_sequence = dependent_sequence(dependents);
        }
        Ok(available_sequence)
    }

    fn signal_all_when_blocking(&self) {}
}

/// Spin for a while, yield for a while, then hand over to an inner strategy.
/// The two phase budgets tune the latency/CPU mix.
#[derive(Debug)]
pub struct PhasedBackoffWaitStrategy {
    spin_timeout: Duration,
    yield_timeout: Duration,
    fallback: Box<dyn WaitStrategy>,
}

const PHASED_SPIN_TRIES: u32 = 10_000;

impl PhasedBackoffWaitStrategy {
    /// Create a strategy with explicit phase budgets and fallback.
    pub fn new(spin_timeout: Duration, yield_timeout: Duration, fallback: Box<dyn WaitStrategy>) -> Self {
        Self {
            spin_timeout,
            yield_timeout: spin_timeout + yield_timeout,
            fallback,
        }
    }

    /// Backoff ending in condition-variable blocking.
    pub fn with_lock(spin_timeout: Duration, yield_timeout: Duration) -> Self {
        Self::new(spin_timeout, yield_timeout, Box::new(BlockingWaitStrategy::new()))
    }

    /// Backoff ending in lite blocking.
    pub fn with_lite_lock(spin_timeout: Duration, yield_timeout: Duration) -> Self {
        Self::new(spin_timeout, yield_timeout, Box::new(LiteBlockingWaitStrategy::new()))
    }

    /// Backoff ending in nanosecond sleeps.
    pub fn with_sleep(spin_timeout: Duration, yield_timeout: Duration) -> Self {
        Self::new(
            spin_timeout,
            yield_timeout,
            Box::new(SleepingWaitStrategy::with_retries(0)),
        )
    }
}

impl WaitStrategy for PhasedBackoffWaitStrategy {
    fn wait_for(
        &self,
        sequence: i64,
        cursor: &Sequence,
        dependents: &[Arc<Sequence>],
        barrier: &dyn AlertCheck,
    ) -> Result<i64> {
        let mut start_time: Option<Instant> = None;
        let mut counter = PHASED_SPIN_TRIES;

        loop {
            let available_sequence = dependent_sequence(dependents);
            if available_sequence >= sequence {
                return Ok(available_sequence);
            }

            counter -= 1;
            if counter == 0 {
                barrier.check_alert()?;
                match start_time {
                    None => start_time = Some(Instant::now()),
                    Some(started) => {
                        let elapsed = started.elapsed();
                        if elapsed > self.yield_timeout {
                            return self.fallback.wait_for(sequence, cursor, dependents, barrier);
                        }
                        if elapsed > self.spin_timeout {
                            thread::yield_now();
                        }
                    }
                }
                counter = PHASED_SPIN_TRIES;
            }
        }
    }

    fn signal_all_when_blocking(&self) {
        self.fallback.signal_all_when_blocking();
    }
}
