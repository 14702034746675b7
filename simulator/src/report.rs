use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use ota_harness_core::prelude::{HarnessError, HarnessResult, IoResultExt};
use serde::Serialize;

/// Verification outcome for one partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartitionVerdict {
    pub name: String,
    pub valid: bool,
    /// Target image extracted from the target build.
    pub expected: PathBuf,
    /// Image the patch engine wrote.
    pub actual: PathBuf,
}

/// Per partition results of a simulation, in manifest order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SimulationReport {
    pub partitions: Vec<PartitionVerdict>,
}

impl SimulationReport {
    pub fn is_valid(&self) -> bool {
        self.partitions.iter().all(|p| p.valid)
    }

    pub fn invalid_partitions(&self) -> Vec<String> {
        self.partitions
            .iter()
            .filter(|p| !p.valid)
            .map(|p| p.name.clone())
            .collect()
    }

    pub fn print(&self) {
        for partition in &self.partitions {
            if partition.valid {
                println!("Partition `{}` is valid", partition.name);
            } else {
                println!(
                    "Partition `{}` is INVALID expected image: {} actual image: {}",
                    partition.name,
                    partition.expected.display(),
                    partition.actual.display()
                );
            }
        }
    }

    pub fn write_json(&self, path: &Path) -> HarnessResult<()> {
        let context = || format!("Failed to write report to '{}'", path.display());
        let mut writer = File::create(path).map(BufWriter::new).io_context(context)?;
        serde_json::to_writer_pretty(&mut writer, self)
            .map_err(std::io::Error::from)
            .io_context(context)?;
        writer.flush().io_context(context)
    }

    /// Fails with [`HarnessError::PartitionMismatch`] naming every invalid partition.
    pub fn ensure_valid(&self) -> HarnessResult<()> {
        let partitions = self.invalid_partitions();
        if partitions.is_empty() {
            Ok(())
        } else {
            Err(HarnessError::PartitionMismatch { partitions })
        }
    }
}
