//! 进度上报与 CLI 进度条管理。

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

pub type ProgressCallback = Box<dyn FnMut(f64, &str) + Send>;

/// Sends `(fraction, message)` to the host callback, or draws a bar on
/// stderr when there is none.
pub(crate) struct ProgressReporter {
    cb: Option<ProgressCallback>,
    cli: Option<ProgressBar>,
    last_fraction: f64,
}

impl ProgressReporter {
    pub(crate) fn emit(&mut self, fraction: f64, message: &str) {
        // 进度只增不减
        let fraction = fraction.clamp(0.0, 1.0).max(self.last_fraction);
        self.last_fraction = fraction;

        if let Some(cb) = self.cb.as_mut() {
            cb(fraction, message);
        }
        if let Some(bar) = self.cli.as_ref() {
            bar.set_position((fraction * 1000.0).round() as u64);
            bar.set_message(message.to_string());
        }
    }

    pub(crate) fn finish(&mut self) {
        let Some(bar) = self.cli.take() else {
            return;
        };
        bar.finish_and_clear();
    }

    #[cfg(test)]
    pub(crate) fn has_ui_callback(&self) -> bool {
        self.cb.is_some()
    }
}

impl Drop for ProgressReporter {
    fn drop(&mut self) {
        self.finish();
    }
}

// ── 构造函数 ──────────────────────────────────────────────────

pub(crate) fn make_reporter(total: usize, progress: Option<ProgressCallback>) -> ProgressReporter {
    let cli = if progress.is_none() && total > 0 {
        let bar = ProgressBar::with_draw_target(Some(1000), ProgressDrawTarget::stderr());
        let style = ProgressStyle::with_template("{prefix} [{elapsed_precise}] {wide_bar} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("##-");
        bar.set_style(style);
        bar.set_prefix("下载");
        Some(bar)
    } else {
        None
    };

    ProgressReporter {
        cb: progress,
        cli,
        last_fraction: 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn callback_receives_monotonic_fractions() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let mut reporter = make_reporter(
            3,
            Some(Box::new(move |f: f64, msg: &str| {
                sink.lock().unwrap().push((f, msg.to_string()))
            })),
        );
        assert!(reporter.has_ui_callback());

        reporter.emit(0.5, "half");
        reporter.emit(0.25, "late notice");
        reporter.emit(1.0, "done");

        let seen = seen.lock().unwrap();
        let fractions: Vec<f64> = seen.iter().map(|(f, _)| *f).collect();
        assert_eq!(fractions, vec![0.5, 0.5, 1.0]);
        assert_eq!(seen[1].1, "late notice");
    }

    #[test]
    fn no_callback_uses_cli_bar() {
        let mut reporter = make_reporter(2, None);
        assert!(!reporter.has_ui_callback());
        reporter.emit(0.5, "1 of 2 stories finished downloading");
        reporter.finish();
        reporter.finish();
    }
}
