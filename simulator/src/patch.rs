use std::ffi::OsString;
use std::path::{Path, PathBuf};

use ota_harness_core::prelude::{HarnessError, HarnessResult, IoResultExt, ToolCommand};

/// One invocation of the differential-application engine, covering every partition in the
/// payload. The three lists are parallel and in manifest order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchRequest {
    pub payload: PathBuf,
    pub partition_names: Vec<String>,
    /// Empty for a full payload, which has no source build.
    pub old_partitions: Vec<PathBuf>,
    /// Zero filled files sized to each partition's target size, written by the engine.
    pub new_partitions: Vec<PathBuf>,
}

impl PatchRequest {
    /// Command line arguments in the engine's `--flag=value` form, lists joined with `:`.
    pub fn to_args(&self) -> Vec<OsString> {
        let mut args = vec![
            flag("--in_file=", [self.payload.as_path()]),
            OsString::from(format!("--partition_names={}", self.partition_names.join(":"))),
        ];
        if !self.old_partitions.is_empty() {
            args.push(flag(
                "--old_partitions=",
                self.old_partitions.iter().map(PathBuf::as_path),
            ));
        }
        args.push(flag(
            "--new_partitions=",
            self.new_partitions.iter().map(PathBuf::as_path),
        ));
        args
    }
}

fn flag<'a>(name: &str, paths: impl IntoIterator<Item = &'a Path>) -> OsString {
    let mut arg = OsString::from(name);
    for (i, path) in paths.into_iter().enumerate() {
        if i > 0 {
            arg.push(":");
        }
        arg.push(path);
    }
    arg
}

/// Applies a payload to partition images.
pub trait PatchEngine {
    fn apply(&self, request: &PatchRequest) -> HarnessResult<()>;
}

/// Applies payloads with the `delta_generator` binary.
#[derive(Debug, Clone)]
pub struct DeltaGenerator {
    command: ToolCommand,
}

impl DeltaGenerator {
    pub fn new(command: ToolCommand) -> Self {
        Self { command }
    }

    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self::new(ToolCommand::new(path))
    }
}

impl PatchEngine for DeltaGenerator {
    fn apply(&self, request: &PatchRequest) -> HarnessResult<()> {
        let args = request.to_args();
        log::info!("Applying payload: {}", self.command.display_with(&args));

        let output = self
            .command
            .command()
            .args(&args)
            .output()
            .io_context(|| format!("Failed to run '{}'", self.command.program().display()))?;

        for line in String::from_utf8_lossy(&output.stdout).lines() {
            log::debug!(target: "ota_subordinate::delta_generator", "{line}");
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            for line in stderr.lines() {
                log::error!(target: "ota_subordinate::delta_generator", "{line}");
            }
            return Err(HarnessError::PatchEngine {
                status: output.status,
            });
        }
        for line in stderr.lines() {
            log::debug!(target: "ota_subordinate::delta_generator", "{line}");
        }

        Ok(())
    }
}
