use crate::executor::Executor;

/// Passed to the iteration hook for each iteration of a run.
#[derive(Debug)]
pub struct IterationContext<'a> {
    iteration: u64,
    executor: &'a Executor,
}

impl<'a> IterationContext<'a> {
    pub(crate) fn new(iteration: u64, executor: &'a Executor) -> Self {
        Self {
            iteration,
            executor,
        }
    }

    /// One-based index of this iteration.
    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    pub fn executor(&self) -> &Executor {
        self.executor
    }
}
