//! Terminal visualizations for long-running lifecycle steps.
//!
//! All bars are attached to one [`MULTI_PROGRESS`] so spinners for concurrent steps (say,
//! a rootfs download while the engine is being installed) render without clobbering each
//! other.

use std::{
    sync::{Arc, LazyLock},
    time::Duration,
};

use indicatif::{MultiProgress, MultiProgressAlignment, ProgressBar, ProgressStyle};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

pub(crate) static MULTI_PROGRESS: LazyLock<Arc<MultiProgress>> = LazyLock::new(|| {
    let mp = MultiProgress::new();
    mp.set_alignment(MultiProgressAlignment::Top);
    Arc::new(mp)
});

static CHECKMARK: LazyLock<String> = LazyLock::new(|| format!("{}", console::style("✓").green()));

static ERROR_MARK: LazyLock<String> = LazyLock::new(|| format!("{}", console::style("✗").red()));

pub(crate) static TICK_STRINGS: LazyLock<[&str; 11]> =
    LazyLock::new(|| ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", &CHECKMARK]);

pub(crate) static ERROR_TICK_STRINGS: LazyLock<[&str; 2]> =
    LazyLock::new(|| ["⠏", &ERROR_MARK]);

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Creates a spinner showing `message`.
pub(crate) fn create_spinner(message: String) -> ProgressBar {
    let pb = MULTI_PROGRESS.add(ProgressBar::new_spinner());
    if let Ok(style) = ProgressStyle::with_template("{spinner} {msg}") {
        pb.set_style(style.tick_strings(&*TICK_STRINGS));
    }

    pb.set_message(message);
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

/// Creates a byte progress bar for a download of `total_bytes`, if known.
pub(crate) fn create_download_bar(prefix: String, total_bytes: Option<u64>) -> ProgressBar {
    let pb = match total_bytes {
        Some(total) => MULTI_PROGRESS.add(ProgressBar::new(total)),
        None => MULTI_PROGRESS.add(ProgressBar::new_spinner()),
    };

    if let Ok(style) = ProgressStyle::with_template(
        "{prefix:.bold.dim} {bar:40.green/green.dim} {bytes:.bold}/{total_bytes:.dim}",
    ) {
        pb.set_style(style.progress_chars("=+-"));
    }

    pb.set_prefix(prefix);
    pb
}

/// Marks the spinner as successful.
pub(crate) fn finish_with_success(pb: &ProgressBar) {
    pb.finish();
}

/// Marks the spinner as failed.
pub(crate) fn finish_with_error(pb: &ProgressBar) {
    if let Ok(style) = ProgressStyle::with_template("{spinner} {msg}") {
        pb.set_style(style.tick_strings(&*ERROR_TICK_STRINGS));
    }

    pb.finish();
}
