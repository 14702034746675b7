mod cli;
mod context;
mod definition;
mod executor;
mod process;
mod progress;
mod run;
mod shutdown;
mod types;

pub mod prelude {
    pub use crate::cli::RunnerArgs;
    pub use crate::context::IterationContext;
    pub use crate::definition::{IterationResult, RunDefinition};
    pub use crate::executor::Executor;
    pub use crate::process::{
        LifecycleController, ProcessOutcome, Subordinate, SubordinateCommand, SubordinateState,
    };
    pub use crate::run::run;
    pub use crate::types::{HarnessRunResult, IterationCount, RunSummary};
}
