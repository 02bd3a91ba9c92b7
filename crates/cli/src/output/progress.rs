//! Progress bar fed by the transfer engine

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use mpx_core::{ProgressListener, ProgressSnapshot};

/// An indicatif bar that doubles as a [`ProgressListener`]
///
/// The bar is hidden when progress output is disabled, so commands can
/// feed it unconditionally.
#[derive(Clone)]
pub struct TransferProgress {
    bar: ProgressBar,
}

impl TransferProgress {
    pub fn new(visible: bool, label: &str) -> Self {
        let bar = if visible {
            ProgressBar::with_draw_target(Some(0), ProgressDrawTarget::stderr())
        } else {
            ProgressBar::hidden()
        };
        if let Ok(style) = ProgressStyle::default_bar().template(
            "{msg} [{bar:40.cyan/blue}] {bytes}/{total_bytes} {binary_bytes_per_sec} ({eta})",
        ) {
            bar.set_style(style.progress_chars("#>-"));
        }
        bar.set_message(label.to_string());
        Self { bar }
    }

    /// Print a line above the bar without tearing it
    pub fn println(&self, message: &str) {
        if self.bar.is_hidden() {
            return;
        }
        self.bar.println(message);
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }

    pub fn abandon(&self) {
        self.bar.abandon();
    }
}

impl ProgressListener for TransferProgress {
    fn on_progress(&self, snapshot: ProgressSnapshot) {
        self.bar.set_length(snapshot.total);
        self.bar.set_position(snapshot.transferred);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_hidden_bar_tracks_position() {
        let progress = TransferProgress::new(false, "upload");
        progress.on_progress(ProgressSnapshot {
            transferred: 512,
            total: 2048,
            elapsed: Duration::from_millis(10),
        });
        assert_eq!(progress.bar.position(), 512);
        assert_eq!(progress.bar.length(), Some(2048));
    }
}
