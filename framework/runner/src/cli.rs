use clap::Args;

/// Command line arguments shared by every binary that runs iterations.
#[derive(Args, Debug, Clone)]
pub struct RunnerArgs {
    /// The number of iterations to run, or a negative number to keep running until Ctrl-C
    #[arg(short = 'n', long, default_value_t = 10, allow_negative_numbers = true)]
    pub iterations: i64,

    /// Carry on with the next iteration when one fails, and report the failures at the end.
    #[arg(long, default_value = "false")]
    pub keep_going: bool,

    /// Do not show the iteration progress display. Useful in CI logs, where nobody watches it.
    #[arg(long, default_value = "false")]
    pub no_progress: bool,
}
