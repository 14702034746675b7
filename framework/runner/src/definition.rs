use crate::cli::RunnerArgs;
use crate::types::IterationCount;

pub type IterationResult = anyhow::Result<()>;

/// Describes a run: how many iterations, and what to do when one fails.
///
/// The iteration hook itself is passed to [crate::run::run] alongside the definition.
#[derive(Debug, Clone)]
pub struct RunDefinition {
    /// Shown in logs at the start and end of the run.
    pub(crate) name: String,
    pub(crate) iterations: IterationCount,
    /// Log a failed iteration and carry on, instead of stopping at the first failure. The run still
    /// fails at the end if any iteration failed.
    pub(crate) keep_going: bool,
    pub(crate) no_progress: bool,
}

impl RunDefinition {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            iterations: IterationCount::Bounded(1),
            keep_going: false,
            no_progress: false,
        }
    }

    /// Build a definition from the shared runner command line arguments.
    pub fn from_args(name: &str, args: &RunnerArgs) -> Self {
        Self::new(name)
            .with_iterations(IterationCount::from(args.iterations))
            .with_keep_going(args.keep_going)
            .with_no_progress(args.no_progress)
    }

    pub fn with_iterations(mut self, iterations: IterationCount) -> Self {
        self.iterations = iterations;
        self
    }

    pub fn with_keep_going(mut self, keep_going: bool) -> Self {
        self.keep_going = keep_going;
        self
    }

    pub fn with_no_progress(mut self, no_progress: bool) -> Self {
        self.no_progress = no_progress;
        self
    }

    pub fn iterations(&self) -> IterationCount {
        self.iterations
    }
}
