use std::path::PathBuf;

use clap::Parser;

use crate::simulate::SimulationOptions;

/// Apply an update payload to partitions extracted from a source build and verify the result
/// against the target build.
#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None)]
pub struct SimulateCli {
    /// Source build, as a target files zip or a directory with the same layout. Omit for a full
    /// payload.
    #[arg(long)]
    pub source: Option<PathBuf>,

    /// Target build, as a target files zip or a directory with the same layout
    #[arg(long)]
    pub target: PathBuf,

    /// The payload to apply, either `payload.bin` or an OTA package that contains it
    pub payload: PathBuf,

    /// Directory to create the scratch workspace in. Defaults to the system temp directory.
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    /// Never pause for inspection when a partition is invalid.
    #[arg(long, default_value = "false")]
    pub unattended: bool,

    /// Also write the report to this file as JSON
    #[arg(long)]
    pub report_json: Option<PathBuf>,

    /// Path to `delta_generator`, overrides `OTA_DELTA_GENERATOR`
    #[arg(long)]
    pub delta_generator: Option<PathBuf>,

    /// Path to `simg2img`, overrides `OTA_SIMG2IMG`
    #[arg(long)]
    pub simg2img: Option<PathBuf>,
}

impl SimulateCli {
    pub fn options(&self, interactive: bool) -> SimulationOptions {
        SimulationOptions {
            source: self.source.clone(),
            target: self.target.clone(),
            payload: self.payload.clone(),
            output_dir: self.output_dir.clone(),
            attended: interactive && !self.unattended,
            report_json: self.report_json.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_source_is_optional() {
        let cli = SimulateCli::parse_from([
            "simulate_ota",
            "--target",
            "target.zip",
            "ota.zip",
            "--unattended",
        ]);

        let options = cli.options(true);
        assert_eq!(options.source, None);
        assert_eq!(options.target, PathBuf::from("target.zip"));
        assert_eq!(options.payload, PathBuf::from("ota.zip"));
        assert!(!options.attended);
    }

    #[test]
    fn test_attended_only_when_interactive() {
        let cli = SimulateCli::parse_from([
            "simulate_ota",
            "--source",
            "source.zip",
            "--target",
            "target.zip",
            "payload.bin",
        ]);

        assert!(cli.options(true).attended);
        assert!(!cli.options(false).attended);
    }
}
