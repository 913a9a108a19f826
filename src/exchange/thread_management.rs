//! Processor thread management
//!
//! Named threads with optional CPU-core pinning for event processors and
//! worker-pool members, plus a join-on-drop wrapper so a dropped exchange
//! never leaks running threads.

use std::thread::{self, JoinHandle};

use crate::exchange::{ExchangeError, Result};

/// Builder for processor threads.
#[derive(Debug, Default)]
pub struct ThreadBuilder {
    name: Option<String>,
    affinity: Option<usize>,
}

impl ThreadBuilder {
    /// Create a new thread builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Name the thread; shows up in debuggers and panic messages.
    pub fn thread_name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Pin the thread to a CPU core. Pinning failures are logged, not fatal:
    /// the loop still runs, just without the cache locality win.
    pub fn pin_at_core(mut self, core_id: usize) -> Self {
        self.affinity = Some(core_id);
        self
    }

    /// Spawn `f` on a fresh thread.
    ///
    /// # Errors
    /// `ThreadSpawn` when the operating system refuses the thread.
    pub fn spawn<F>(self, f: F) -> Result<ManagedThread>
    where
        F: FnOnce() + Send + 'static,
    {
        let name = self.name.unwrap_or_else(|| "ringline-processor".to_string());
        let affinity = self.affinity;

        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                if let Some(id) = affinity {
                    if !core_affinity::set_for_current(core_affinity::CoreId { id }) {
                        tracing::warn!(core = id, "failed to pin thread to requested core");
                    }
                }
                f()
            })
            .map_err(|error| ExchangeError::ThreadSpawn(error.to_string()))?;

        Ok(ManagedThread::new(handle, name))
    }
}

/// A processor thread that is joined when the wrapper is dropped.
pub struct ManagedThread {
    join_handle: Option<JoinHandle<()>>,
    thread_name: String,
}

impl ManagedThread {
    pub(crate) fn new(join_handle: JoinHandle<()>, thread_name: String) -> Self {
        Self {
            join_handle: Some(join_handle),
            thread_name,
        }
    }

    /// The thread's name.
    pub fn thread_name(&self) -> &str {
        &self.thread_name
    }

    /// Whether the thread is still running.
    pub fn is_running(&self) -> bool {
        self.join_handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Wait for the thread to finish. A no-op if already joined.
    pub fn join(mut self) -> thread::Result<()> {
        match self.join_handle.take() {
            Some(handle) => handle.join(),
            None => Ok(()),
        }
    }
}

impl Drop for ManagedThread {
    fn drop(&mut self) {
        if let Some(handle) = self.join_handle.take() {
            let _ = handle.join();
        }
    }
}

impl std::fmt::Debug for ManagedThread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedThread")
            .field("thread_name", &self.thread_name)
            .field("running", &self.is_running())
            .finish()
    }
}
