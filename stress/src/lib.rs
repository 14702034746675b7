mod cli;
mod device;
mod installer;
mod stress;

pub mod prelude {
    pub use crate::cli::StressCli;
    pub use crate::device::{AdbShell, Device, RemoteOutput, RemoteShell};
    pub use crate::installer::{
        UpdateCompletion, UpdateInstaller, COMPLETION_MARKER, STATUS_LINE_PREFIX, SUCCESS_CODE,
    };
    pub use crate::stress::{StressConfig, StressController};
}
