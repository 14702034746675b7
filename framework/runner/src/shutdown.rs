use ota_harness_core::prelude::StopHandle;
use tokio::signal;

/// Turn Ctrl-C into a stop request for the run.
pub(crate) fn start_stop_listener(runtime: &tokio::runtime::Runtime) -> StopHandle {
    let handle = StopHandle::default();

    let listener_handle = handle.clone();
    runtime.spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                println!("Received Ctrl-C, stopping after cleaning up the current iteration...");
                listener_handle.request_stop();
            }
            Err(e) => log::error!("Failed to listen for Ctrl-C: {e}"),
        }
    });

    handle
}
