//! Structured run results for external collaborators.
//!
//! The core emits one [`FileEvent`] per action plus a [`RunSummary`] with
//! counters, per-phase timing, and the frozen backend identity. Turning
//! these into log lines, JSON files, or progress UI is the caller's
//! concern; the exit-code mapping for CLI wrappers lives here so every
//! wrapper agrees on it.

use serde::Serialize;

/// Exit status contract for CLI wrappers.
pub const EXIT_OK: i32 = 0;
pub const EXIT_FILE_ERRORS: i32 = 2;
pub const EXIT_PREFLIGHT_FAILED: i32 = 3;

/// Outcome of one executed (or reported) action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    /// The action ran and completed.
    Done,
    /// Nothing needed doing (Skip and report-only markers).
    Skipped,
    /// The action failed; `reason` carries the failure kind.
    Failed,
    /// Cancellation was observed before the commit step.
    Cancelled,
}

/// One record in the per-file event stream.
#[derive(Debug, Clone, Serialize)]
pub struct FileEvent {
    /// Action kind: convert, rename, retag, skip, prune.
    pub action: String,
    pub source_rel: Option<String>,
    pub dest_rel: String,
    pub status: EventStatus,
    /// Plan reason for skips, failure kind for failures.
    pub reason: String,
    /// Free-form diagnostic detail, when there is one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub elapsed_ms: u64,
}

/// Action counters, tallied as completions arrive.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct Counts {
    pub planned: usize,
    pub converted: usize,
    pub renamed: usize,
    pub retagged: usize,
    pub skipped: usize,
    pub pruned: usize,
    pub failed: usize,
}

impl Counts {
    pub fn record(&mut self, event: &FileEvent) {
        match event.status {
            EventStatus::Failed | EventStatus::Cancelled => self.failed += 1,
            EventStatus::Skipped => self.skipped += 1,
            EventStatus::Done => match event.action.as_str() {
                "convert" => self.converted += 1,
                "rename" => self.renamed += 1,
                "retag" => self.retagged += 1,
                "prune" => self.pruned += 1,
                _ => self.skipped += 1,
            },
        }
    }
}

/// Wall-clock seconds per phase.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct Timing {
    pub total_s: f64,
    pub preflight_s: f64,
    pub scan_s: f64,
    pub index_s: f64,
    pub plan_s: f64,
    pub execute_s: f64,
}

/// Everything a caller needs to report a run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    /// Frozen backend identity, e.g. `libfdk_aac`.
    pub encoder: String,
    /// Human-readable backend description (binary path, version).
    pub backend: String,
    pub quality: u32,
    pub workers: usize,
    pub counts: Counts,
    pub timing: Timing,
    pub output_bytes: u64,
    pub cancelled: bool,
    pub events: Vec<FileEvent>,
}

impl RunSummary {
    /// Exit code per the CLI contract.
    pub fn exit_code(&self) -> i32 {
        if self.counts.failed > 0 {
            EXIT_FILE_ERRORS
        } else {
            EXIT_OK
        }
    }
}
