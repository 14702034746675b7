//! The device under test and the commands that reset its update state.
//!
//! The update daemon and the loop device pool are global to a device. Nothing else in the harness
//! touches them, and every command here is safe to run when no update is in progress.

use std::fmt;

use ota_harness_core::prelude::{HarnessError, HarnessResult, IoResultExt, ToolCommand};

/// What a remote command reported.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteOutput {
    pub success: bool,
    pub output: String,
}

/// Runs commands on the device as the superuser.
pub trait RemoteShell {
    fn execute(&self, command: &[&str]) -> HarnessResult<RemoteOutput>;
}

/// A [`RemoteShell`] over `adb shell su 0`.
#[derive(Debug, Clone)]
pub struct AdbShell {
    adb: ToolCommand,
    serial: Option<String>,
}

impl AdbShell {
    pub fn new(adb: ToolCommand, serial: Option<String>) -> Self {
        Self { adb, serial }
    }

    fn args<'a>(&'a self, command: &[&'a str]) -> Vec<&'a str> {
        let mut args = Vec::with_capacity(command.len() + 5);
        if let Some(serial) = &self.serial {
            args.extend(["-s", serial.as_str()]);
        }
        args.extend(["shell", "su", "0"]);
        args.extend_from_slice(command);
        args
    }
}

impl RemoteShell for AdbShell {
    fn execute(&self, command: &[&str]) -> HarnessResult<RemoteOutput> {
        let args = self.args(command);
        let description = self.adb.display_with(&args);
        log::debug!("Running '{description}'");

        let output = self
            .adb
            .command()
            .args(&args)
            .output()
            .io_context(|| format!("Failed to run '{description}'"))?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(RemoteOutput {
            success: output.status.success(),
            output: combined,
        })
    }
}

/// Handle to the device under test. Its methods are the only things that change the device's
/// update state.
pub struct Device<S> {
    shell: S,
}

impl<S> fmt::Debug for Device<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device").finish_non_exhaustive()
    }
}

const CANCEL_UPDATE: &[&str] = &["update_engine_client", "--cancel"];
const RESET_STATUS: &[&str] = &["update_engine_client", "--reset_status"];
const RELEASE_LOOP_DEVICES: &[&str] = &["losetup", "-D"];

impl<S: RemoteShell> Device<S> {
    pub fn new(shell: S) -> Self {
        Self { shell }
    }

    pub fn shell(&self) -> &S {
        &self.shell
    }

    /// Cancel any update in progress. The daemon reports an error when there is nothing to cancel,
    /// so a failed status is only logged.
    pub fn cancel_update(&self) -> HarnessResult<()> {
        let result = self.shell.execute(CANCEL_UPDATE)?;
        if !result.success {
            log::warn!(
                "'{}' failed, assuming no update was in progress: {}",
                CANCEL_UPDATE.join(" "),
                result.output.trim()
            );
        }
        Ok(())
    }

    pub fn reset_status(&self) -> HarnessResult<()> {
        self.execute_strict(RESET_STATUS)
    }

    /// Detach every loop device that is not in use.
    pub fn release_loop_devices(&self) -> HarnessResult<()> {
        self.execute_strict(RELEASE_LOOP_DEVICES)
    }

    /// Cleanup after a run of interrupted updates, before the final update starts.
    pub fn cancel_and_release(&self) -> HarnessResult<()> {
        log::info!("Cancelling the paused update and releasing loop devices");
        self.cancel_update()?;
        self.release_loop_devices()
    }

    /// Put the device back into a state where a new update can start.
    ///
    /// Every step is attempted even if an earlier one fails. The first failure is returned.
    pub fn reset_update_state(&self) -> HarnessResult<()> {
        log::info!("Resetting the device update state");
        let results = [
            self.cancel_update(),
            self.reset_status(),
            self.release_loop_devices(),
        ];

        let mut first_error = None;
        for error in results.into_iter().filter_map(Result::err) {
            if first_error.is_none() {
                first_error = Some(error);
            } else {
                log::error!("Reset step also failed: {error}");
            }
        }

        first_error.map_or(Ok(()), Err)
    }

    fn execute_strict(&self, command: &[&str]) -> HarnessResult<()> {
        let result = self.shell.execute(command)?;
        if result.success {
            Ok(())
        } else {
            Err(HarnessError::RemoteCommand {
                command: command.join(" "),
                reason: result.output.trim().to_string(),
            })
        }
    }
}
