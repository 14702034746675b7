use std::path::Path;

use ota_harness_core::prelude::{HarnessError, HarnessResult, ToolCommand};
use ota_harness_runner::prelude::SubordinateCommand;
use serde::Deserialize;

/// Prefix of a structured status line: `update-status: {"error_code": "kSuccess"}`.
pub const STATUS_LINE_PREFIX: &str = "update-status:";

/// Logged by the update daemon when it finishes applying a payload, followed by the error code.
pub const COMPLETION_MARKER: &str = "onPayloadApplicationComplete(ErrorCode::";

pub const SUCCESS_CODE: &str = "kSuccess";

/// Builds the commands that install an update package onto the device.
#[derive(Debug, Clone)]
pub struct UpdateInstaller {
    helper: ToolCommand,
}

impl UpdateInstaller {
    pub fn new(helper: ToolCommand) -> Self {
        Self { helper }
    }

    /// An install that will be interrupted: no post-install step and no slot switch.
    pub fn pause_command(&self, ota_file: &Path) -> SubordinateCommand {
        SubordinateCommand::new("update_device", self.helper.clone())
            .arg(ota_file)
            .arg("--no-postinstall")
            .arg("--no-slot-switch")
    }

    /// The install that is expected to finish.
    pub fn final_command(&self, ota_file: &Path) -> SubordinateCommand {
        SubordinateCommand::new("update_device", self.helper.clone())
            .arg(ota_file)
            .arg("--no-postinstall")
    }
}

/// How the device reported the end of a payload application.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UpdateCompletion {
    pub error_code: String,
}

impl UpdateCompletion {
    /// Find the last completion status in the installer's output.
    ///
    /// Structured status lines take precedence over the daemon's log marker.
    pub fn parse(output: &str) -> Option<Self> {
        output
            .lines()
            .rev()
            .find_map(Self::parse_status_line)
            .or_else(|| Self::parse_marker(output))
    }

    fn parse_status_line(line: &str) -> Option<Self> {
        let start = line.find(STATUS_LINE_PREFIX)? + STATUS_LINE_PREFIX.len();
        match serde_json::from_str(line[start..].trim()) {
            Ok(completion) => Some(completion),
            Err(e) => {
                log::warn!("Ignoring malformed status line '{line}': {e}");
                None
            }
        }
    }

    fn parse_marker(output: &str) -> Option<Self> {
        let start = output.rfind(COMPLETION_MARKER)? + COMPLETION_MARKER.len();
        let error_code: String = output[start..]
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
            .collect();
        (!error_code.is_empty()).then_some(Self { error_code })
    }

    pub fn is_success(&self) -> bool {
        self.error_code == SUCCESS_CODE
    }

    /// The completion status in `output`, which must report success.
    pub fn require_success(output: &str) -> HarnessResult<Self> {
        match Self::parse(output) {
            Some(completion) if completion.is_success() => Ok(completion),
            Some(completion) => Err(HarnessError::IncompleteUpdate {
                reason: format!("update finished with {}", completion.error_code),
            }),
            None => Err(HarnessError::IncompleteUpdate {
                reason: "no completion status".to_string(),
            }),
        }
    }
}
