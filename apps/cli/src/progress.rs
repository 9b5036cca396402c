//! Terminal progress rendering for pipeline stages.

use indicatif::{ProgressBar, ProgressStyle};
use sitemind_core::{PipelineResult, ProgressReporter};
use sitemind_shared::RunStatus;

/// CLI progress reporter using an indicatif bar per stage.
pub(crate) struct CliProgress {
    bar: ProgressBar,
}

impl CliProgress {
    pub(crate) fn new() -> Self {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.cyan} {prefix:>10.bold} [{bar:30.cyan/blue}] {pos}/{len} {wide_msg}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"])
            .progress_chars("=> "),
        );
        bar.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { bar }
    }

    /// Clear the bar after a single-stage command.
    pub(crate) fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl ProgressReporter for CliProgress {
    fn stage(&self, status: RunStatus, total: usize) {
        self.bar.reset();
        self.bar.set_length(total as u64);
        self.bar.set_prefix(status.to_string());
        self.bar.set_message("");
    }

    fn item(&self, url: &str, current: usize, _total: usize) {
        self.bar.set_position(current.saturating_sub(1) as u64);
        self.bar.set_message(url.to_string());
    }

    fn stage_done(&self, status: RunStatus, succeeded: usize, failed: usize) {
        self.bar.set_position(self.bar.length().unwrap_or(0));
        self.bar
            .println(format!("  {status:<10} {succeeded} ok, {failed} failed"));
    }

    fn done(&self, _result: &PipelineResult) {
        self.bar.finish_and_clear();
    }
}
