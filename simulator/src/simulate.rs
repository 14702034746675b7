//! The host side simulation: apply a payload to partitions extracted from a source build and check
//! the result byte for byte against the target build.

use std::fs::File;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

use ota_harness_core::prelude::{HarnessResult, IoResultExt};

use crate::artifact::{resolve_payload, BuildArtifact};
use crate::extract::ImageExtractor;
use crate::manifest::ManifestReader;
use crate::patch::{PatchEngine, PatchRequest};
use crate::report::{PartitionVerdict, SimulationReport};
use crate::sparse::SparseConverter;
use crate::verify::files_identical;

/// Temporary directory holding every file a simulation creates. Removed when dropped.
#[derive(Debug)]
pub struct ScratchWorkspace {
    dir: tempfile::TempDir,
}

impl ScratchWorkspace {
    /// Create the workspace inside `parent`, or the system temp directory if not given.
    pub fn create(parent: Option<&Path>) -> HarnessResult<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("ota-simulation-");
        let dir = match parent {
            Some(parent) => {
                std::fs::create_dir_all(parent).io_context(|| {
                    format!("Failed to create output directory '{}'", parent.display())
                })?;
                builder.tempdir_in(parent)
            }
            None => builder.tempdir(),
        }
        .io_context(|| "Failed to create scratch workspace")?;
        log::debug!("Created scratch workspace '{}'", dir.path().display());

        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Remove the workspace, reporting any failure to do so.
    pub fn close(self) -> HarnessResult<()> {
        let path = self.dir.path().to_path_buf();
        self.dir
            .close()
            .io_context(|| format!("Failed to remove scratch workspace '{}'", path.display()))
    }
}

/// Everything a single simulation run needs from the caller.
#[derive(Debug, Clone)]
pub struct SimulationOptions {
    /// Absent for a full payload.
    pub source: Option<PathBuf>,
    pub target: PathBuf,
    /// A raw payload or an OTA package containing one.
    pub payload: PathBuf,
    pub output_dir: Option<PathBuf>,
    /// Pause for inspection before cleanup when a partition fails verification.
    pub attended: bool,
    pub report_json: Option<PathBuf>,
}

pub struct Simulation<M, P, C> {
    manifest_reader: M,
    patch_engine: P,
    extractor: ImageExtractor<C>,
}

impl<M, P, C> Simulation<M, P, C>
where
    M: ManifestReader,
    P: PatchEngine,
    C: SparseConverter,
{
    pub fn new(manifest_reader: M, patch_engine: P, converter: C) -> Self {
        Self {
            manifest_reader,
            patch_engine,
            extractor: ImageExtractor::new(converter),
        }
    }

    /// Apply `payload` to the source partitions and verify every partition against the target.
    ///
    /// Verification failures are collected in the report. Any other failure is returned at once.
    pub fn simulate(
        &self,
        source: Option<&Path>,
        target: &Path,
        payload: &Path,
        workspace: &ScratchWorkspace,
    ) -> HarnessResult<SimulationReport> {
        let mut source = source.map(BuildArtifact::open).transpose()?;
        let mut target = BuildArtifact::open(target)?;

        let manifest = self.manifest_reader.read_manifest(payload)?;
        log::info!(
            "Simulating {} update of {} partition(s)",
            if source.is_some() { "incremental" } else { "full" },
            manifest.partitions.len()
        );

        let mut old_partitions = Vec::new();
        let mut expected = Vec::with_capacity(manifest.partitions.len());
        let mut new_partitions = Vec::with_capacity(manifest.partitions.len());
        for partition in &manifest.partitions {
            if let Some(source) = source.as_mut() {
                let image = self.extractor.extract(
                    source,
                    &partition.name,
                    &workspace.path().join(format!("source_{}.img", partition.name)),
                )?;
                old_partitions.push(image.path);
            }

            let image = self.extractor.extract(
                &mut target,
                &partition.name,
                &workspace.path().join(format!("target_{}.img", partition.name)),
            )?;

            let mut actual = image.path.clone().into_os_string();
            actual.push(".actual");
            let actual = PathBuf::from(actual);
            allocate_zeroed(&actual, partition.size)?;

            expected.push(image.path);
            new_partitions.push(actual);
        }

        self.patch_engine.apply(&PatchRequest {
            payload: payload.to_path_buf(),
            partition_names: manifest.partition_names(),
            old_partitions,
            new_partitions: new_partitions.clone(),
        })?;

        let partitions = manifest
            .partitions
            .iter()
            .zip(expected)
            .zip(new_partitions)
            .map(|((partition, expected), actual)| {
                Ok(PartitionVerdict {
                    name: partition.name.clone(),
                    valid: files_identical(&expected, &actual)?,
                    expected,
                    actual,
                })
            })
            .collect::<HarnessResult<Vec<_>>>()?;

        Ok(SimulationReport { partitions })
    }

    /// A complete run: set up a workspace, simulate, report, and clean up.
    ///
    /// Fails with a partition mismatch if any partition is invalid, after the report is written.
    pub fn run(&self, options: &SimulationOptions) -> HarnessResult<SimulationReport> {
        let workspace = ScratchWorkspace::create(options.output_dir.as_deref())?;
        let payload = resolve_payload(&options.payload, workspace.path())?;

        let report = self.simulate(
            options.source.as_deref(),
            &options.target,
            &payload,
            &workspace,
        )?;

        report.print();
        if let Some(path) = &options.report_json {
            report.write_json(path)?;
        }
        if !report.is_valid() && options.attended {
            pause_for_inspection(&workspace)?;
        }

        workspace.close()?;
        report.ensure_valid()?;

        Ok(report)
    }
}

fn allocate_zeroed(path: &Path, size: u64) -> HarnessResult<()> {
    let context = || format!("Failed to allocate '{}'", path.display());
    File::create(path).io_context(context)?.set_len(size).io_context(context)
}

fn pause_for_inspection(workspace: &ScratchWorkspace) -> HarnessResult<()> {
    print!(
        "Images are in '{}'. Press Enter to clean up...",
        workspace.path().display()
    );
    std::io::stdout()
        .flush()
        .io_context(|| "Failed to write prompt")?;
    let mut line = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .io_context(|| "Failed to wait for input")?;
    Ok(())
}
