use std::path::{Path, PathBuf};

use ota_harness_core::prelude::{HarnessError, HarnessResult, IoResultExt};

use crate::artifact::{image_entry_name, BuildArtifact};
use crate::sparse::{is_sparse_image, SparseConverter};

/// A raw partition image pulled out of a build artifact.
///
/// Lives in the run's scratch workspace and goes away with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawImage {
    pub partition: String,
    pub path: PathBuf,
}

/// Pulls partition images out of build artifacts, converting sparse images to raw form.
#[derive(Debug, Clone)]
pub struct ImageExtractor<C> {
    converter: C,
}

impl<C: SparseConverter> ImageExtractor<C> {
    pub fn new(converter: C) -> Self {
        Self { converter }
    }

    /// Extract the image for `partition` to `output`.
    ///
    /// The result never starts with the sparse magic: sparse images are converted and the converted
    /// image replaces the extracted one.
    pub fn extract(
        &self,
        artifact: &mut BuildArtifact,
        partition: &str,
        output: &Path,
    ) -> HarnessResult<RawImage> {
        let entry = image_entry_name(partition);
        let size = artifact.copy_entry(&entry, output)?;
        log::debug!(
            "Extracted {entry} ({size} bytes) from '{}'",
            artifact.path().display()
        );

        if is_sparse_image(output)? {
            let mut raw = output.as_os_str().to_os_string();
            raw.push(".raw");
            let raw = PathBuf::from(raw);

            log::info!("Converting sparse image for {partition}");
            self.converter.convert(output, &raw)?;
            if !raw.is_file() {
                return Err(HarnessError::Conversion {
                    image: output.to_path_buf(),
                    reason: "converter did not produce an output file".to_string(),
                });
            }
            std::fs::rename(&raw, output).io_context(|| {
                format!(
                    "Failed to replace '{}' with its raw image",
                    output.display()
                )
            })?;

            if is_sparse_image(output)? {
                return Err(HarnessError::Conversion {
                    image: output.to_path_buf(),
                    reason: "converted image is still sparse".to_string(),
                });
            }
        }

        Ok(RawImage {
            partition: partition.to_string(),
            path: output.to_path_buf(),
        })
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::{sparse, StripMagicConverter};
    use super::*;
    use crate::artifact::test_support::{write_dir, write_zip};
    use crate::sparse::SPARSE_MAGIC;

    #[test]
    fn test_raw_image_is_used_as_is() {
        let temp = tempfile::tempdir().expect("failed to create temp dir");
        let zip_path = temp.path().join("target_files.zip");
        write_zip(&zip_path, &[("IMAGES/boot.img", b"raw boot image")]);
        let mut artifact = BuildArtifact::open(&zip_path).unwrap();

        let out = temp.path().join("boot.img");
        let image = ImageExtractor::new(StripMagicConverter)
            .extract(&mut artifact, "boot", &out)
            .expect("failed to extract");

        assert_eq!(image.partition, "boot");
        assert_eq!(std::fs::read(&image.path).unwrap(), b"raw boot image");
    }

    #[test]
    fn test_sparse_image_is_converted() {
        let temp = tempfile::tempdir().expect("failed to create temp dir");
        let source = temp.path().join("source");
        write_dir(&source, &[("IMAGES/system.img", &sparse(b"system contents"))]);
        let mut artifact = BuildArtifact::open(&source).unwrap();

        let out = temp.path().join("system.img");
        let image = ImageExtractor::new(StripMagicConverter)
            .extract(&mut artifact, "system", &out)
            .expect("failed to extract");

        let bytes = std::fs::read(&image.path).unwrap();
        assert_eq!(bytes, b"system contents");
        assert_ne!(bytes[..4], SPARSE_MAGIC);
        assert!(!temp.path().join("system.img.raw").exists());
    }

    #[test]
    fn test_extraction_is_idempotent() {
        let temp = tempfile::tempdir().expect("failed to create temp dir");
        let zip_path = temp.path().join("target_files.zip");
        write_zip(&zip_path, &[("IMAGES/vendor.img", &sparse(&[7u8; 4096]))]);
        let extractor = ImageExtractor::new(StripMagicConverter);

        let mut artifact = BuildArtifact::open(&zip_path).unwrap();
        let first = extractor
            .extract(&mut artifact, "vendor", &temp.path().join("first.img"))
            .unwrap();
        let second = extractor
            .extract(&mut artifact, "vendor", &temp.path().join("second.img"))
            .unwrap();

        assert_eq!(
            std::fs::read(first.path).unwrap(),
            std::fs::read(second.path).unwrap()
        );
    }

    #[test]
    fn test_still_sparse_after_conversion_is_an_error() {
        #[derive(Debug)]
        struct CopyingConverter;

        impl SparseConverter for CopyingConverter {
            fn convert(&self, sparse: &Path, raw: &Path) -> HarnessResult<()> {
                std::fs::copy(sparse, raw)
                    .map(|_| ())
                    .io_context(|| "Failed to copy image")
            }
        }

        let temp = tempfile::tempdir().expect("failed to create temp dir");
        write_dir(temp.path(), &[("IMAGES/odm.img", &sparse(b"odm"))]);
        let mut artifact = BuildArtifact::open(temp.path()).unwrap();

        let result = ImageExtractor::new(CopyingConverter).extract(
            &mut artifact,
            "odm",
            &temp.path().join("odm.img"),
        );
        assert!(matches!(result, Err(HarnessError::Conversion { .. })));
    }

    #[test]
    fn test_missing_partition_is_extraction_error() {
        let temp = tempfile::tempdir().expect("failed to create temp dir");
        let mut artifact = BuildArtifact::open(temp.path()).unwrap();

        let result = ImageExtractor::new(StripMagicConverter).extract(
            &mut artifact,
            "product",
            &temp.path().join("product.img"),
        );
        assert!(matches!(result, Err(HarnessError::Extraction { .. })));
    }
}
