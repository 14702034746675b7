use std::future::Future;

use ota_harness_core::prelude::{StopHandle, StopListener, StopRequested};

/// Owns the Tokio runtime that subordinate processes are driven on.
#[derive(Debug)]
pub struct Executor {
    runtime: tokio::runtime::Runtime,
    stop_handle: StopHandle,
}

impl Executor {
    pub(crate) fn new(runtime: tokio::runtime::Runtime, stop_handle: StopHandle) -> Self {
        Self {
            runtime,
            stop_handle,
        }
    }

    /// Run async code in place, blocking until it completes.
    ///
    /// The future is dropped and [`StopRequested`] is returned if a stop is requested first. Any
    /// subordinate process owned by the future is killed when it is dropped.
    pub fn execute_in_place<T>(
        &self,
        fut: impl Future<Output = anyhow::Result<T>>,
    ) -> anyhow::Result<T> {
        let mut stop_listener = self.stop_handle.new_listener();
        self.runtime.block_on(async move {
            tokio::select! {
                result = fut => result,
                _ = stop_listener.wait_for_stop() => {
                    Err(anyhow::anyhow!(StopRequested::default()))
                },
            }
        })
    }

    /// Run async code that watches for a stop itself, blocking until it completes.
    ///
    /// The future is given a [`StopListener`] and is never dropped early, so it can interrupt any
    /// subordinate it started and wait for it to exit before returning.
    pub fn execute_until_stopped<T, F, Fut>(&self, work: F) -> anyhow::Result<T>
    where
        F: FnOnce(StopListener) -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        self.runtime.block_on(work(self.stop_handle.new_listener()))
    }

    pub fn stop_handle(&self) -> &StopHandle {
        &self.stop_handle
    }
}
