//! Reading the partition list out of an update payload.
//!
//! A payload starts with a fixed header followed by a protobuf encoded manifest:
//!
//! | field                   | size             |
//! |-------------------------|------------------|
//! | magic `CrAU`            | 4                |
//! | major version           | u64, big endian  |
//! | manifest size           | u64, big endian  |
//! | metadata signature size | u32, big endian, major version 2 only |
//! | manifest                | manifest size    |

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use ota_harness_core::prelude::{HarnessError, HarnessResult};
use prost::Message;

pub const PAYLOAD_MAGIC: &[u8; 4] = b"CrAU";

const DEFAULT_BLOCK_SIZE: u32 = 4096;

/// A partition the payload writes, and the size it must end up.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct PartitionSpec {
    pub name: String,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadManifest {
    pub major_version: u64,
    pub minor_version: Option<u32>,
    pub block_size: u32,
    /// In the order the payload lists them.
    pub partitions: Vec<PartitionSpec>,
}

/// Source of the partition list for a payload.
pub trait ManifestReader {
    fn read_manifest(&self, payload: &Path) -> HarnessResult<PayloadManifest>;
}

/// Reads the manifest straight out of a payload file.
#[derive(Debug, Clone, Copy, Default)]
pub struct PayloadFileReader;

impl ManifestReader for PayloadFileReader {
    fn read_manifest(&self, payload: &Path) -> HarnessResult<PayloadManifest> {
        let error = |reason: String| HarnessError::Manifest {
            payload: payload.to_path_buf(),
            reason,
        };

        let mut file = File::open(payload).map_err(|e| error(format!("cannot open: {e}")))?;
        let payload_len = file
            .metadata()
            .map_err(|e| error(format!("cannot stat: {e}")))?
            .len();

        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)
            .map_err(|e| error(format!("cannot read magic: {e}")))?;
        if &magic != PAYLOAD_MAGIC {
            return Err(error(format!("bad magic {magic:02x?}")));
        }

        let major_version =
            read_u64(&mut file).map_err(|e| error(format!("cannot read version: {e}")))?;
        let manifest_size =
            read_u64(&mut file).map_err(|e| error(format!("cannot read manifest size: {e}")))?;
        let mut header_len: u64 = 4 + 8 + 8;
        match major_version {
            1 => {}
            2 => {
                let mut signature_size = [0u8; 4];
                file.read_exact(&mut signature_size)
                    .map_err(|e| error(format!("cannot read metadata signature size: {e}")))?;
                header_len += 4;
            }
            other => return Err(error(format!("unsupported major version {other}"))),
        }

        if header_len.saturating_add(manifest_size) > payload_len {
            return Err(error(format!(
                "manifest of {manifest_size} bytes does not fit in a {payload_len} byte payload"
            )));
        }

        let manifest_len = usize::try_from(manifest_size)
            .map_err(|_| error(format!("manifest size {manifest_size} is too large")))?;
        let mut manifest = vec![0u8; manifest_len];
        file.read_exact(&mut manifest)
            .map_err(|e| error(format!("cannot read manifest: {e}")))?;

        let manifest = DeltaArchiveManifest::decode(manifest.as_slice())
            .map_err(|e| error(format!("cannot decode manifest: {e}")))?;

        let partitions = manifest
            .partitions
            .into_iter()
            .map(|partition| {
                let size = partition
                    .new_partition_info
                    .and_then(|info| info.size)
                    .ok_or_else(|| {
                        error(format!(
                            "partition '{}' has no target size",
                            partition.partition_name
                        ))
                    })?;
                Ok(PartitionSpec {
                    name: partition.partition_name,
                    size,
                })
            })
            .collect::<HarnessResult<Vec<_>>>()?;

        log::debug!(
            "Payload '{}' is version {major_version} with {} partition(s)",
            payload.display(),
            partitions.len()
        );

        Ok(PayloadManifest {
            major_version,
            minor_version: manifest.minor_version,
            block_size: manifest.block_size.unwrap_or(DEFAULT_BLOCK_SIZE),
            partitions,
        })
    }
}

fn read_u64(reader: &mut impl Read) -> std::io::Result<u64> {
    let mut bytes = [0u8; 8];
    reader.read_exact(&mut bytes)?;
    Ok(u64::from_be_bytes(bytes))
}

/// The parts of the payload manifest the harness needs. Unknown fields are skipped on decode.
#[derive(Clone, PartialEq, Message)]
struct DeltaArchiveManifest {
    #[prost(uint32, optional, tag = "3")]
    block_size: Option<u32>,
    #[prost(uint32, optional, tag = "12")]
    minor_version: Option<u32>,
    #[prost(message, repeated, tag = "13")]
    partitions: Vec<PartitionUpdate>,
}

#[derive(Clone, PartialEq, Message)]
struct PartitionUpdate {
    #[prost(string, required, tag = "1")]
    partition_name: String,
    #[prost(message, optional, tag = "7")]
    new_partition_info: Option<PartitionInfo>,
}

#[derive(Clone, PartialEq, Message)]
struct PartitionInfo {
    #[prost(uint64, optional, tag = "1")]
    size: Option<u64>,
    #[prost(bytes = "vec", optional, tag = "2")]
    hash: Option<Vec<u8>>,
}

/// A manifest reader that always returns the same partitions, for callers that already know them.
#[derive(Debug, Clone)]
pub struct FixedManifest(pub PayloadManifest);

impl ManifestReader for FixedManifest {
    fn read_manifest(&self, _payload: &Path) -> HarnessResult<PayloadManifest> {
        Ok(self.0.clone())
    }
}

impl PayloadManifest {
    pub fn partition_names(&self) -> Vec<String> {
        self.partitions.iter().map(|p| p.name.clone()).collect()
    }
}
