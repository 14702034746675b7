mod error;
mod logging;
mod shutdown;
mod tool;

pub mod prelude {
    pub use crate::error::{HarnessError, HarnessResult, IoResultExt};
    pub use crate::logging::init_logging;
    pub use crate::shutdown::{StopHandle, StopListener, StopRequested};
    pub use crate::tool::{Tool, ToolCommand, ADB, DELTA_GENERATOR, PYTHON, SIMG2IMG, UPDATE_DEVICE};
}
