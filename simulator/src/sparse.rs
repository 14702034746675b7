use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use ota_harness_core::prelude::{HarnessError, HarnessResult, IoResultExt, ToolCommand};

/// Magic at the start of every Android sparse image.
pub const SPARSE_MAGIC: [u8; 4] = [0x3A, 0xFF, 0x26, 0xED];

/// Whether the file at `path` starts with [`SPARSE_MAGIC`]. Files shorter than the magic are raw.
pub fn is_sparse_image(path: &Path) -> HarnessResult<bool> {
    let mut file =
        File::open(path).io_context(|| format!("Failed to open image '{}'", path.display()))?;
    let mut magic = [0u8; 4];
    let mut filled = 0;
    while filled < magic.len() {
        let read = file
            .read(&mut magic[filled..])
            .io_context(|| format!("Failed to read image '{}'", path.display()))?;
        if read == 0 {
            return Ok(false);
        }
        filled += read;
    }

    Ok(magic == SPARSE_MAGIC)
}

/// Turns a sparse image into a raw one.
pub trait SparseConverter {
    fn convert(&self, sparse: &Path, raw: &Path) -> HarnessResult<()>;
}

/// Converts with the `simg2img` binary, invoked as `simg2img <sparse> <raw>`.
#[derive(Debug, Clone)]
pub struct Simg2Img {
    command: ToolCommand,
}

impl Simg2Img {
    pub fn new(command: ToolCommand) -> Self {
        Self { command }
    }

    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self::new(ToolCommand::new(path))
    }
}

impl SparseConverter for Simg2Img {
    fn convert(&self, sparse: &Path, raw: &Path) -> HarnessResult<()> {
        log::debug!(
            "Running '{}'",
            self.command.display_with([sparse.as_os_str(), raw.as_os_str()])
        );
        let output = self
            .command
            .command()
            .arg(sparse)
            .arg(raw)
            .output()
            .io_context(|| format!("Failed to run '{}'", self.command.program().display()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            log::error!("simg2img failed: {}", stderr.trim());
            return Err(HarnessError::Conversion {
                image: sparse.to_path_buf(),
                reason: format!("converter exited with {}", output.status),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detects_sparse_magic() {
        let temp = tempfile::tempdir().expect("failed to create temp dir");
        let sparse = temp.path().join("sparse.img");
        std::fs::write(&sparse, [0x3A, 0xFF, 0x26, 0xED, 0x01, 0x00]).unwrap();
        let raw = temp.path().join("raw.img");
        std::fs::write(&raw, [0u8; 16]).unwrap();
        let short = temp.path().join("short.img");
        std::fs::write(&short, [0x3A, 0xFF]).unwrap();

        assert!(is_sparse_image(&sparse).unwrap());
        assert!(!is_sparse_image(&raw).unwrap());
        assert!(!is_sparse_image(&short).unwrap());
    }

    #[cfg(unix)]
    #[test]
    fn test_converter_failure_is_conversion_error() {
        let temp = tempfile::tempdir().expect("failed to create temp dir");
        let sparse = temp.path().join("sparse.img");
        std::fs::write(&sparse, SPARSE_MAGIC).unwrap();

        let converter = Simg2Img::new(ToolCommand::new("sh").with_arg("-c").with_arg("exit 1"));
        let result = converter.convert(&sparse, &temp.path().join("raw.img"));
        assert!(matches!(result, Err(HarnessError::Conversion { .. })));
    }
}
