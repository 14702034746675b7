use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use ota_harness_runner::prelude::RunnerArgs;

use crate::stress::StressConfig;

/// Repeatedly install an A/B update onto a device, pausing and resuming it along the way.
#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None)]
pub struct StressCli {
    /// The OTA package to install, or a raw payload if the device uses Omaha
    pub otafile: PathBuf,

    #[command(flatten)]
    pub runner: RunnerArgs,

    /// The number of times to pause the update during each iteration
    #[arg(short = 'r', long, default_value_t = 5)]
    pub resumes: u32,

    /// Seconds to wait for the final install of each iteration to finish
    #[arg(
        short = 't',
        long,
        default_value_t = 60 * 60,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub timeout: u64,

    /// Seconds to let each paused install run before interrupting it
    #[arg(long, default_value_t = 10, value_parser = clap::value_parser!(u64).range(1..))]
    pub pause_wait: u64,

    /// Serial number of the device to target, when more than one is connected
    #[arg(long)]
    pub serial: Option<String>,

    /// Path to `update_device.py`, overrides `OTA_UPDATE_DEVICE`
    #[arg(long)]
    pub helper: Option<PathBuf>,

    /// Interpreter for the helper, overrides `OTA_PYTHON`
    #[arg(long)]
    pub python: Option<PathBuf>,

    /// Path to `adb`, overrides `OTA_ADB`
    #[arg(long)]
    pub adb: Option<PathBuf>,
}

impl StressCli {
    pub fn config(&self) -> StressConfig {
        StressConfig {
            resume_count: self.resumes,
            timeout: Duration::from_secs(self.timeout),
            pause_wait: Duration::from_secs(self.pause_wait),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_defaults() {
        let cli = StressCli::parse_from(["ota_stress_test", "ota.zip"]);

        assert_eq!(cli.runner.iterations, 10);
        assert!(!cli.runner.keep_going);
        assert_eq!(cli.config(), StressConfig::default());
    }

    #[test]
    fn test_negative_iterations_are_accepted() {
        let cli = StressCli::parse_from([
            "ota_stress_test",
            "-n",
            "-1",
            "-r",
            "0",
            "-t",
            "60",
            "--serial",
            "emulator-5554",
            "ota.zip",
        ]);

        assert_eq!(cli.runner.iterations, -1);
        assert_eq!(cli.config().resume_count, 0);
        assert_eq!(cli.config().timeout, Duration::from_secs(60));
        assert_eq!(cli.serial.as_deref(), Some("emulator-5554"));
    }

    #[test]
    fn test_zero_second_waits_are_rejected() {
        let timeout = StressCli::try_parse_from(["ota_stress_test", "-t", "0", "ota.zip"]);
        assert!(timeout.is_err());

        let pause_wait =
            StressCli::try_parse_from(["ota_stress_test", "--pause-wait", "0", "ota.zip"]);
        assert!(pause_wait.is_err());
    }
}
