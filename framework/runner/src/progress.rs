use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};

use crate::types::IterationCount;

/// Shows how many iterations have run: a bar when the count is bounded, a spinner otherwise.
pub(crate) struct IterationProgress {
    bar: ProgressBar,
}

impl IterationProgress {
    pub(crate) fn new(iterations: IterationCount) -> Self {
        let bar = match iterations {
            IterationCount::Bounded(count) => {
                let bar = ProgressBar::new(count);
                bar.set_style(
                    ProgressStyle::with_template(
                        "{spinner:.green} [{wide_bar:.cyan/blue}] {pos}/{len} iterations [{elapsed_precise}]",
                    )
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("#>-"),
                );
                bar
            }
            IterationCount::Unbounded => {
                let bar = ProgressBar::new_spinner();
                bar.set_style(
                    ProgressStyle::with_template(
                        "{spinner:.green} {pos} iterations [{elapsed_precise}]",
                    )
                    .unwrap_or_else(|_| ProgressStyle::default_spinner()),
                );
                bar
            }
        };
        bar.enable_steady_tick(Duration::from_millis(250));

        Self { bar }
    }

    pub(crate) fn iteration_done(&self) {
        self.bar.inc(1);
    }

    pub(crate) fn finish(&self) {
        log::trace!("Progress display shutting down");
        self.bar.finish_and_clear();
    }
}
