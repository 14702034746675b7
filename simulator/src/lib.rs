mod artifact;
mod cli;
mod extract;
mod manifest;
mod patch;
mod report;
mod simulate;
mod sparse;
mod verify;

pub mod prelude {
    pub use crate::artifact::{
        image_entry_name, resolve_payload, BuildArtifact, PAYLOAD_ENTRY_NAME,
    };
    pub use crate::cli::SimulateCli;
    pub use crate::extract::{ImageExtractor, RawImage};
    pub use crate::manifest::{
        FixedManifest, ManifestReader, PartitionSpec, PayloadFileReader, PayloadManifest,
        PAYLOAD_MAGIC,
    };
    pub use crate::patch::{DeltaGenerator, PatchEngine, PatchRequest};
    pub use crate::report::{PartitionVerdict, SimulationReport};
    pub use crate::simulate::{ScratchWorkspace, Simulation, SimulationOptions};
    pub use crate::sparse::{is_sparse_image, Simg2Img, SparseConverter, SPARSE_MAGIC};
    pub use crate::verify::files_identical;
}
