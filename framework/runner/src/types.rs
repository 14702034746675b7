/// Error type for iteration hooks and binaries. Compatible with [crate::definition::IterationResult].
pub type HarnessRunResult<T> = anyhow::Result<T>;

/// How many iterations a run performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterationCount {
    Bounded(u64),
    /// Keep going until stopped.
    Unbounded,
}

impl From<i64> for IterationCount {
    /// Negative counts mean unbounded.
    fn from(count: i64) -> Self {
        u64::try_from(count)
            .map(IterationCount::Bounded)
            .unwrap_or(IterationCount::Unbounded)
    }
}

impl IterationCount {
    /// Whether another iteration should start once `done` iterations have run.
    pub fn has_more(&self, done: u64) -> bool {
        match self {
            IterationCount::Bounded(count) => done < *count,
            IterationCount::Unbounded => true,
        }
    }
}

impl std::fmt::Display for IterationCount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IterationCount::Bounded(count) => write!(f, "{count}"),
            IterationCount::Unbounded => write!(f, "unbounded"),
        }
    }
}

/// What happened over a whole run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub completed: u64,
    pub failed: u64,
    /// The run ended early because a stop was requested.
    pub stopped: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negative_count_is_unbounded() {
        assert_eq!(IterationCount::from(-1), IterationCount::Unbounded);
        assert!(IterationCount::Unbounded.has_more(u64::MAX - 1));
    }

    #[test]
    fn test_bounded_count() {
        let count = IterationCount::from(2);
        assert_eq!(count, IterationCount::Bounded(2));
        assert!(count.has_more(1));
        assert!(!count.has_more(2));
        assert!(!IterationCount::from(0).has_more(0));
    }
}
