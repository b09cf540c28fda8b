#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Shared CLI utilities for the heatmap toolchain.
//!
//! Provides an `indicatif`-backed [`ProgressCallback`] for binning passes,
//! plus [`init_logger`] which sets up `indicatif-log-bridge` so that
//! `log::info!` output does not tear progress bars mid-redraw.

use std::sync::Arc;
use std::time::Duration;

use heatmap_aggregate::progress::ProgressCallback;
use indicatif::{ProgressBar, ProgressStyle};

pub use indicatif::MultiProgress;

/// An `indicatif` [`ProgressBar`] that implements [`ProgressCallback`].
pub struct IndicatifProgress {
    bar: ProgressBar,
}

impl IndicatifProgress {
    /// A spinner counting rows, with the latest binning message alongside.
    #[must_use]
    pub fn rows_bar(multi: &MultiProgress, message: &str) -> Arc<dyn ProgressCallback> {
        let bar = multi.add(ProgressBar::new_spinner());
        bar.enable_steady_tick(Duration::from_millis(100));
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg} {human_pos} rows [{elapsed}]")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar.set_message(message.to_string());

        Arc::new(Self { bar })
    }
}

impl ProgressCallback for IndicatifProgress {
    fn inc(&self, delta: u64) {
        self.bar.inc(delta);
    }

    fn set_message(&self, msg: String) {
        self.bar.set_message(msg);
    }

    fn finish(&self, msg: String) {
        self.bar.finish_with_message(msg);
    }
}

/// Initializes the global logger wrapped in `indicatif-log-bridge`.
///
/// Returns the [`MultiProgress`] that all progress bars must be added to.
#[must_use]
pub fn init_logger() -> MultiProgress {
    let multi = MultiProgress::new();

    let logger = pretty_env_logger::formatted_builder()
        .parse_env("RUST_LOG")
        .build();
    let level = logger.filter();

    // Already set in tests.
    indicatif_log_bridge::LogWrapper::new(multi.clone(), logger)
        .try_init()
        .ok();

    log::set_max_level(level);

    multi
}

#[cfg(test)]
mod tests {
    use indicatif::ProgressDrawTarget;

    use super::*;

    #[test]
    fn forwards_rows_and_messages() {
        let bar = ProgressBar::hidden();
        let progress = IndicatifProgress { bar: bar.clone() };
        progress.inc(5);
        progress.inc(40);
        progress.set_message("Binned chunk 2".to_string());
        assert_eq!(bar.position(), 45);
        assert_eq!(bar.message(), "Binned chunk 2");

        progress.finish("done".to_string());
        assert!(bar.is_finished());
    }

    #[test]
    fn rows_bar_attaches_to_multi() {
        let multi = MultiProgress::with_draw_target(ProgressDrawTarget::hidden());
        let progress = IndicatifProgress::rows_bar(&multi, "binning");
        progress.inc(3);
        progress.finish("done".to_string());
    }

    #[test]
    fn init_logger_is_idempotent() {
        let _first = init_logger();
        let _second = init_logger();
    }
}
