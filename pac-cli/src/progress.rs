//! Live progress line fed by the core's event stream.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use indicatif::{ProgressBar, ProgressStyle};
use pac_core::report::{EventStatus, FileEvent};
use pac_core::run::EventHook;

pub struct CliReporter {
    bar: ProgressBar,
    done: Arc<AtomicU64>,
    failed: Arc<AtomicU64>,
}

impl CliReporter {
    pub fn new() -> Self {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::with_template("{spinner} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar.enable_steady_tick(std::time::Duration::from_millis(120));
        Self {
            bar,
            done: Arc::new(AtomicU64::new(0)),
            failed: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Hook handed to the core; called from worker threads.
    pub fn hook(&self) -> EventHook {
        let bar = self.bar.clone();
        let done = Arc::clone(&self.done);
        let failed = Arc::clone(&self.failed);
        Arc::new(move |event: &FileEvent| {
            match event.status {
                EventStatus::Done => {
                    done.fetch_add(1, Ordering::Relaxed);
                }
                EventStatus::Failed | EventStatus::Cancelled => {
                    failed.fetch_add(1, Ordering::Relaxed);
                }
                EventStatus::Skipped => {}
            }
            if event.status != EventStatus::Skipped {
                bar.set_message(format!(
                    "{} done, {} failed | {} {}",
                    done.load(Ordering::Relaxed),
                    failed.load(Ordering::Relaxed),
                    event.action,
                    event.dest_rel
                ));
            }
        })
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl Default for CliReporter {
    fn default() -> Self {
        Self::new()
    }
}
