use callisto_core::process::ProgressReporter;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

/// Drives an indicatif bar from core progress callbacks.
///
/// The bar stays hidden until `begin` supplies a label and length, so a run
/// that fails during setup prints no bar at all.
pub struct BarReporter {
    bar: ProgressBar,
}

impl BarReporter {
    pub fn new() -> Self {
        Self {
            bar: ProgressBar::hidden(),
        }
    }
}

impl Default for BarReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressReporter for BarReporter {
    fn begin(&self, description: &str, total: usize) {
        self.bar.set_length(total as u64);
        self.bar.set_style(
            ProgressStyle::default_bar()
                .template("{msg} [{bar:40}] {pos}/{len}")
                .unwrap()
                .progress_chars("=> "),
        );
        self.bar.set_message(description.to_string());
        self.bar.set_draw_target(ProgressDrawTarget::stderr());
    }

    fn advance(&self, frames_done: usize) {
        self.bar.set_position(frames_done as u64);
    }

    fn finish(&self) {
        self.bar.finish();
    }
}
