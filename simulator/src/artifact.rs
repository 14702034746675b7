use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use ota_harness_core::prelude::{HarnessError, HarnessResult, IoResultExt};
use zip::result::ZipError;
use zip::ZipArchive;

/// Name of the payload inside an OTA package zip.
pub const PAYLOAD_ENTRY_NAME: &str = "payload.bin";

/// Path of a partition image inside a build artifact.
pub fn image_entry_name(partition: &str) -> String {
    format!("IMAGES/{partition}.img")
}

/// The output of a build: a zip archive of named entries, or a directory laid out the same way.
///
/// Only ever read from.
pub enum BuildArtifact {
    Archive {
        path: PathBuf,
        archive: ZipArchive<BufReader<File>>,
    },
    Directory(PathBuf),
}

impl std::fmt::Debug for BuildArtifact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BuildArtifact::Archive { path, archive } => f
                .debug_struct("Archive")
                .field("path", path)
                .field("entries", &archive.len())
                .finish(),
            BuildArtifact::Directory(path) => f.debug_tuple("Directory").field(path).finish(),
        }
    }
}

impl BuildArtifact {
    pub fn open(path: &Path) -> HarnessResult<Self> {
        if !path.exists() {
            return Err(HarnessError::ArtifactNotFound(path.to_path_buf()));
        }

        if path.is_dir() {
            log::debug!("Using directory build artifact '{}'", path.display());
            return Ok(BuildArtifact::Directory(path.to_path_buf()));
        }

        let file = File::open(path)
            .io_context(|| format!("Failed to open build artifact '{}'", path.display()))?;
        match ZipArchive::new(BufReader::new(file)) {
            Ok(archive) => {
                log::debug!(
                    "Using zip build artifact '{}' with {} entries",
                    path.display(),
                    archive.len()
                );
                Ok(BuildArtifact::Archive {
                    path: path.to_path_buf(),
                    archive,
                })
            }
            Err(ZipError::Io(e)) => Err(HarnessError::io(
                format!("Failed to read build artifact '{}'", path.display()),
                e,
            )),
            Err(_) => Err(HarnessError::UnsupportedArtifact(path.to_path_buf())),
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            BuildArtifact::Archive { path, .. } => path,
            BuildArtifact::Directory(path) => path,
        }
    }

    pub fn contains(&self, entry: &str) -> bool {
        match self {
            BuildArtifact::Archive { archive, .. } => archive.index_for_name(entry).is_some(),
            BuildArtifact::Directory(root) => root.join(entry).is_file(),
        }
    }

    /// Copy the named entry to `destination`, returning the number of bytes written.
    pub fn copy_entry(&mut self, entry: &str, destination: &Path) -> HarnessResult<u64> {
        let missing = |artifact: &Path| HarnessError::Extraction {
            artifact: artifact.to_path_buf(),
            entry: entry.to_string(),
        };
        match self {
            BuildArtifact::Archive { path, archive } => {
                let mut source = match archive.by_name(entry) {
                    Ok(source) => source,
                    Err(ZipError::FileNotFound) => return Err(missing(path)),
                    Err(ZipError::Io(e)) => {
                        return Err(HarnessError::io(
                            format!("Failed to read '{entry}' from '{}'", path.display()),
                            e,
                        ))
                    }
                    Err(e) => {
                        return Err(HarnessError::io(
                            format!("Failed to read '{entry}' from '{}'", path.display()),
                            std::io::Error::new(std::io::ErrorKind::InvalidData, e),
                        ))
                    }
                };
                write_entry(&mut source, destination)
            }
            BuildArtifact::Directory(root) => {
                let source_path = root.join(entry);
                if !source_path.is_file() {
                    return Err(missing(root));
                }
                let mut source = File::open(&source_path)
                    .io_context(|| format!("Failed to open '{}'", source_path.display()))?;
                write_entry(&mut source, destination)
            }
        }
    }
}

fn write_entry(source: &mut impl Read, destination: &Path) -> HarnessResult<u64> {
    let context = || format!("Failed to write '{}'", destination.display());
    let mut out = File::create(destination).map(BufWriter::new).io_context(context)?;
    let written = std::io::copy(source, &mut out).io_context(context)?;
    out.flush().io_context(context)?;
    Ok(written)
}

/// Find the raw payload to apply.
///
/// `payload` may be the payload itself or an OTA package zip, in which case [`PAYLOAD_ENTRY_NAME`]
/// is extracted into `scratch_dir`.
pub fn resolve_payload(payload: &Path, scratch_dir: &Path) -> HarnessResult<PathBuf> {
    if !payload.is_file() {
        return Err(HarnessError::Manifest {
            payload: payload.to_path_buf(),
            reason: "payload file does not exist".to_string(),
        });
    }

    let file = File::open(payload)
        .io_context(|| format!("Failed to open payload '{}'", payload.display()))?;
    if ZipArchive::new(BufReader::new(file)).is_err() {
        return Ok(payload.to_path_buf());
    }

    log::info!(
        "Extracting {PAYLOAD_ENTRY_NAME} from OTA package '{}'",
        payload.display()
    );
    let mut package = BuildArtifact::open(payload)?;
    let extracted = scratch_dir.join(PAYLOAD_ENTRY_NAME);
    package.copy_entry(PAYLOAD_ENTRY_NAME, &extracted)?;

    Ok(extracted)
}


#[cfg(test)]
mod tests {
    use super::test_support::{write_dir, write_zip};
    use super::*;

    #[test]
    fn test_should_copy_entry_from_zip() {
        let temp = tempfile::tempdir().expect("failed to create temp dir");
        let zip_path = temp.path().join("target_files.zip");
        write_zip(&zip_path, &[("IMAGES/system.img", b"system bytes")]);

        let mut artifact = BuildArtifact::open(&zip_path).expect("failed to open zip");
        assert!(artifact.contains("IMAGES/system.img"));

        let out = temp.path().join("system.img");
        let copied = artifact
            .copy_entry(&image_entry_name("system"), &out)
            .expect("failed to copy entry");
        assert_eq!(copied, 12);
        assert_eq!(std::fs::read(out).unwrap(), b"system bytes");
    }

    #[test]
    fn test_should_copy_entry_from_directory() {
        let temp = tempfile::tempdir().expect("failed to create temp dir");
        write_dir(temp.path(), &[("IMAGES/vendor.img", b"vendor")]);

        let mut artifact = BuildArtifact::open(temp.path()).expect("failed to open dir");
        let out = temp.path().join("out.img");
        artifact
            .copy_entry("IMAGES/vendor.img", &out)
            .expect("failed to copy entry");
        assert_eq!(std::fs::read(out).unwrap(), b"vendor");
    }

    #[test]
    fn test_missing_entry_is_extraction_error() {
        let temp = tempfile::tempdir().expect("failed to create temp dir");
        let zip_path = temp.path().join("target_files.zip");
        write_zip(&zip_path, &[("IMAGES/system.img", b"system")]);

        let mut artifact = BuildArtifact::open(&zip_path).expect("failed to open zip");
        let result = artifact.copy_entry("IMAGES/product.img", &temp.path().join("out"));
        assert!(matches!(
            result,
            Err(HarnessError::Extraction { entry, .. }) if entry == "IMAGES/product.img"
        ));
    }

    #[test]
    fn test_missing_artifact_is_not_found() {
        let result = BuildArtifact::open(Path::new("/non/existent/target_files.zip"));
        assert!(matches!(result, Err(HarnessError::ArtifactNotFound(_))));
    }

    #[test]
    fn test_plain_file_is_unsupported() {
        let temp = tempfile::NamedTempFile::new().expect("failed to create temp file");
        std::fs::write(temp.path(), b"not a zip").unwrap();

        let result = BuildArtifact::open(temp.path());
        assert!(matches!(result, Err(HarnessError::UnsupportedArtifact(_))));
    }

    #[test]
    fn test_should_extract_payload_from_ota_package() {
        let temp = tempfile::tempdir().expect("failed to create temp dir");
        let package = temp.path().join("ota.zip");
        write_zip(
            &package,
            &[("META-INF/x", b"meta"), (PAYLOAD_ENTRY_NAME, b"CrAU payload")],
        );
        let scratch = temp.path().join("scratch");
        std::fs::create_dir(&scratch).unwrap();

        let payload = resolve_payload(&package, &scratch).expect("failed to resolve payload");
        assert_eq!(payload, scratch.join(PAYLOAD_ENTRY_NAME));
        assert_eq!(std::fs::read(payload).unwrap(), b"CrAU payload");
    }

    #[test]
    fn test_ota_package_without_payload_is_extraction_error() {
        let temp = tempfile::tempdir().expect("failed to create temp dir");
        let package = temp.path().join("ota.zip");
        write_zip(&package, &[("META-INF/x", b"meta")]);

        let result = resolve_payload(&package, temp.path());
        assert!(matches!(
            result,
            Err(HarnessError::Extraction { artifact, entry })
                if artifact == package && entry == PAYLOAD_ENTRY_NAME
        ));
        assert!(!temp.path().join(PAYLOAD_ENTRY_NAME).exists());
    }

    #[test]
    fn test_raw_payload_is_used_in_place() {
        let temp = tempfile::tempdir().expect("failed to create temp dir");
        let payload = temp.path().join("payload.bin");
        std::fs::write(&payload, b"CrAU").unwrap();

        let resolved = resolve_payload(&payload, temp.path()).expect("failed to resolve payload");
        assert_eq!(resolved, payload);
    }
}
