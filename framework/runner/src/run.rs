use anyhow::Context;
use ota_harness_core::prelude::StopRequested;

use crate::{
    context::IterationContext,
    definition::{IterationResult, RunDefinition},
    executor::Executor,
    progress::IterationProgress,
    shutdown::start_stop_listener,
    types::RunSummary,
};

/// Run `iteration` as many times as the definition asks for.
///
/// An iteration that fails ends the run with its error, unless the definition says to keep going,
/// in which case the run fails at the end if any iteration failed. A Ctrl-C lets the current
/// iteration's hook finish and then ends the run cleanly. Work passed to
/// [`Executor::execute_in_place`] is dropped on a stop, while work passed to
/// [`Executor::execute_until_stopped`] winds itself down.
pub fn run<F>(definition: RunDefinition, mut iteration: F) -> anyhow::Result<RunSummary>
where
    F: FnMut(&mut IterationContext<'_>) -> IterationResult,
{
    log::info!(
        "Running {} for {} iteration(s)",
        definition.name,
        definition.iterations
    );

    let runtime = tokio::runtime::Runtime::new().context("Failed to create Tokio runtime")?;
    let stop_handle = start_stop_listener(&runtime);
    let executor = Executor::new(runtime, stop_handle.clone());
    let mut stop_listener = stop_handle.new_listener();

    let progress = (!definition.no_progress).then(|| IterationProgress::new(definition.iterations));

    let mut summary = RunSummary::default();
    let mut started = 0;
    while definition.iterations.has_more(started) {
        if stop_listener.should_stop() {
            summary.stopped = true;
            break;
        }

        started += 1;
        log::info!("Starting iteration {started}/{}", definition.iterations);
        let mut context = IterationContext::new(started, &executor);

        match iteration(&mut context) {
            Ok(()) => {
                log::info!("Iteration {started} succeeded");
                summary.completed += 1;
            }
            Err(e) if is_stop_request(&e) => {
                log::warn!("Iteration {started} cancelled by stop request");
                summary.stopped = true;
                break;
            }
            Err(e) if definition.keep_going => {
                log::error!("Iteration {started} failed: {e:?}");
                summary.failed += 1;
            }
            Err(e) => {
                if let Some(progress) = &progress {
                    progress.finish();
                }
                return Err(e.context(format!("Iteration {started} failed")));
            }
        }

        if let Some(progress) = &progress {
            progress.iteration_done();
        }
    }

    if let Some(progress) = &progress {
        progress.finish();
    }

    log::info!(
        "{} finished: {} succeeded, {} failed{}",
        definition.name,
        summary.completed,
        summary.failed,
        if summary.stopped { ", stopped early" } else { "" }
    );

    if summary.failed > 0 {
        anyhow::bail!(
            "{} of {} iteration(s) failed",
            summary.failed,
            summary.failed + summary.completed
        );
    }

    Ok(summary)
}

/// Whether an iteration ended because it was cancelled, wherever the stop request sits in the
/// error chain.
fn is_stop_request(error: &anyhow::Error) -> bool {
    error.chain().any(|cause| cause.is::<StopRequested>())
}
