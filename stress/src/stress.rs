use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use ota_harness_core::prelude::{HarnessError, HarnessResult, StopListener, StopRequested};
use ota_harness_runner::prelude::{Executor, LifecycleController, ProcessOutcome};

use crate::device::{Device, RemoteShell};
use crate::installer::{UpdateCompletion, UpdateInstaller};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StressConfig {
    /// Number of interrupted installs before the final one.
    pub resume_count: u32,
    /// Limit on the final install.
    pub timeout: Duration,
    /// How long an interrupted install runs before it is interrupted.
    pub pause_wait: Duration,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            resume_count: 5,
            timeout: Duration::from_secs(60 * 60),
            pause_wait: Duration::from_secs(10),
        }
    }
}

/// Drives one device through stress iterations.
///
/// An iteration installs the update `resume_count` times, interrupting each install, then cancels
/// the paused update, releases loop devices and installs the update once more without
/// interruption. The final install must report success. The device's update state is reset at the
/// end of every iteration, whatever happened before.
#[derive(Debug)]
pub struct StressController<S> {
    ota_file: PathBuf,
    device: Device<S>,
    installer: UpdateInstaller,
    lifecycle: LifecycleController,
    config: StressConfig,
}

impl<S: RemoteShell> StressController<S> {
    pub fn new(
        ota_file: &Path,
        device: Device<S>,
        installer: UpdateInstaller,
        config: StressConfig,
    ) -> HarnessResult<Self> {
        if !ota_file.is_file() {
            return Err(HarnessError::ArtifactNotFound(ota_file.to_path_buf()));
        }

        Ok(Self {
            ota_file: ota_file.to_path_buf(),
            device,
            installer,
            lifecycle: LifecycleController::default(),
            config,
        })
    }

    pub fn with_lifecycle(mut self, lifecycle: LifecycleController) -> Self {
        self.lifecycle = lifecycle;
        self
    }

    pub fn device(&self) -> &Device<S> {
        &self.device
    }

    /// Run one stress iteration, blocking until it is done.
    pub fn run_iteration(&self, executor: &Executor) -> anyhow::Result<UpdateCompletion> {
        let attempt = self.attempt(executor);
        let reset = self
            .device
            .reset_update_state()
            .context("Failed to reset the device at the end of the iteration");

        match (attempt, reset) {
            (Ok(completion), Ok(())) => Ok(completion),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(reset_error)) => {
                log::error!("{reset_error:?}");
                Err(e)
            }
        }
    }

    fn attempt(&self, executor: &Executor) -> anyhow::Result<UpdateCompletion> {
        log::info!("Applying '{}'", self.ota_file.display());

        executor.execute_until_stopped(|mut stop_listener| async move {
            self.pause_cycles(&mut stop_listener)
                .await
                .map_err(anyhow::Error::from)
        })?;
        self.device
            .cancel_and_release()
            .context("Failed to clean up the device after pausing the update")?;

        let completion = executor.execute_until_stopped(|mut stop_listener| async move {
            self.final_run(&mut stop_listener)
                .await
                .map_err(anyhow::Error::from)
        })?;
        log::info!("Update finished with {}", completion.error_code);

        Ok(completion)
    }

    /// Start the install `resume_count` times, interrupting each one after the pause wait.
    ///
    /// A stop request interrupts the running install and ends the cycles with
    /// [`HarnessError::Stopped`].
    pub async fn pause_cycles(&self, stop_listener: &mut StopListener) -> HarnessResult<()> {
        let command = self.installer.pause_command(&self.ota_file);
        for cycle in 1..=self.config.resume_count {
            if stop_listener.should_stop() {
                return Err(StopRequested::default().into());
            }

            log::info!("Pause/resume cycle {cycle}/{}", self.config.resume_count);
            match self
                .lifecycle
                .run_until_stopped(&command, self.config.pause_wait, stop_listener)
                .await?
            {
                ProcessOutcome::Completed { .. } => {
                    log::warn!("Install finished before it could be paused")
                }
                ProcessOutcome::Terminated { status, forced, .. } => {
                    log::debug!("Install paused with {status:?}, forced: {forced}");
                }
            }
        }

        Ok(())
    }

    /// Install the update without interruption and check that it reports success.
    pub async fn final_run(
        &self,
        stop_listener: &mut StopListener,
    ) -> HarnessResult<UpdateCompletion> {
        log::info!("Finishing the update");
        let command = self.installer.final_command(&self.ota_file);
        match self
            .lifecycle
            .run_until_stopped(&command, self.config.timeout, stop_listener)
            .await?
        {
            ProcessOutcome::Completed { output } => UpdateCompletion::require_success(&output),
            ProcessOutcome::Terminated { .. } => Err(HarnessError::IncompleteUpdate {
                reason: format!("update did not finish within {:?}", self.config.timeout),
            }),
        }
    }
}
