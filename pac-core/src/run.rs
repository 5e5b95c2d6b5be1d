//! Whole-run orchestration: preflight, scan, index, plan, execute.
//!
//! The caller hands over roots, a policy, and the cancellation/pause
//! controls; everything else — backend freezing, worker fan-out,
//! backpressure, the final `.part` sweep — happens here. The result is a
//! [`RunSummary`] the caller formats however it likes.

use std::path::PathBuf;
use std::sync::mpsc;
use std::time::Instant;

use crate::dest_index::DestIndex;
use crate::error::{Error, Result};
use crate::executor::{self, ExecContext};
use crate::planner::{self, Plan};
use crate::policy::Policy;
use crate::probe::{self, Backend};
use crate::report::{Counts, EventStatus, FileEvent, RunSummary, Timing};
use crate::scanner::SourceScanner;
use crate::scheduler::{CancelToken, PauseGate, WorkerPool};

/// Version stamped into fingerprints by this build.
pub const TOOL_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Observer for the per-file event stream, called as completions arrive
/// (from worker threads, in completion order).
pub type EventHook = std::sync::Arc<dyn Fn(&FileEvent) + Send + Sync>;

/// Inputs for a batch run.
#[derive(Clone)]
pub struct RunOptions {
    pub src_root: PathBuf,
    pub dest_root: PathBuf,
    pub policy: Policy,
    pub cancel: CancelToken,
    pub pause: PauseGate,
    pub on_event: Option<EventHook>,
}

impl std::fmt::Debug for RunOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunOptions")
            .field("src_root", &self.src_root)
            .field("dest_root", &self.dest_root)
            .field("policy", &self.policy)
            .field("on_event", &self.on_event.is_some())
            .finish()
    }
}

impl RunOptions {
    pub fn new(src_root: impl Into<PathBuf>, dest_root: impl Into<PathBuf>, policy: Policy) -> Self {
        Self {
            src_root: src_root.into(),
            dest_root: dest_root.into(),
            policy,
            cancel: CancelToken::new(),
            pause: PauseGate::new(),
            on_event: None,
        }
    }

    pub fn with_event_hook(mut self, hook: EventHook) -> Self {
        self.on_event = Some(hook);
        self
    }
}

/// Probe the external encoders and freeze one backend for this run.
pub fn preflight(policy: &Policy) -> Result<Backend> {
    let set = probe::probe(policy.probe_emulated);
    probe::select(&set, policy)
}

/// Compute the plan for the current tree state without executing anything.
pub fn plan_only(opts: &RunOptions) -> Result<(Backend, Plan)> {
    let backend = preflight(&opts.policy)?;
    if !opts.src_root.is_dir() {
        return Err(Error::BadSourceRoot(opts.src_root.clone()));
    }
    let sources = SourceScanner::new(&opts.src_root)
        .with_streaminfo(opts.policy.use_streaminfo_md5)
        .scan_sorted();
    let index = DestIndex::build(&opts.dest_root);
    let plan = planner::plan(&sources, &index, &opts.policy, backend.id, TOOL_VERSION);
    Ok((backend, plan))
}

/// Run the full pipeline: scan, index, plan, execute, summarise.
pub fn run(opts: &RunOptions) -> Result<RunSummary> {
    let t_total = Instant::now();

    let t_preflight = Instant::now();
    let backend = preflight(&opts.policy)?;
    let preflight_s = t_preflight.elapsed().as_secs_f64();

    if !opts.src_root.is_dir() {
        return Err(Error::BadSourceRoot(opts.src_root.clone()));
    }
    std::fs::create_dir_all(&opts.dest_root)
        .map_err(|_| Error::BadDestRoot(opts.dest_root.clone()))?;

    let t_scan = Instant::now();
    let sources = SourceScanner::new(&opts.src_root)
        .with_streaminfo(opts.policy.use_streaminfo_md5)
        .scan_sorted();
    let scan_s = t_scan.elapsed().as_secs_f64();
    tracing::info!(files = sources.len(), elapsed_s = scan_s, "source scan complete");

    let t_index = Instant::now();
    let index = DestIndex::build(&opts.dest_root);
    let index_s = t_index.elapsed().as_secs_f64();
    tracing::info!(outputs = index.len(), elapsed_s = index_s, "destination index complete");

    let t_plan = Instant::now();
    let plan = planner::plan(&sources, &index, &opts.policy, backend.id, TOOL_VERSION);
    let plan_s = t_plan.elapsed().as_secs_f64();
    tracing::info!(
        planned = plan.actions.len(),
        convert = plan.count("convert"),
        rename = plan.count("rename"),
        retag = plan.count("retag"),
        prune = plan.count("prune"),
        skip = plan.count("skip"),
        "plan ready"
    );

    let ctx = ExecContext {
        src_root: opts.src_root.clone(),
        dest_root: opts.dest_root.clone(),
        policy: opts.policy.clone(),
        backend: backend.clone(),
        version: TOOL_VERSION.to_string(),
        cancel: opts.cancel.clone(),
    };

    let t_execute = Instant::now();
    let events = execute_plan(&plan, &ctx, opts.pause.clone(), opts.on_event.clone())?;
    let execute_s = t_execute.elapsed().as_secs_f64();

    let cancelled = opts.cancel.is_cancelled();
    if cancelled {
        executor::sweep_dangling_parts(&opts.dest_root);
    }

    let mut counts = Counts {
        planned: plan.actions.len(),
        ..Counts::default()
    };
    let mut output_bytes = 0u64;
    for event in &events {
        counts.record(event);
        if event.status == EventStatus::Done && event.action == "convert" {
            if let Ok(meta) = std::fs::metadata(opts.dest_root.join(&event.dest_rel)) {
                output_bytes += meta.len();
            }
        }
    }

    let summary = RunSummary {
        encoder: backend.id.as_str().to_string(),
        backend: backend.describe(),
        quality: opts.policy.quality_for(backend.id),
        workers: opts.policy.worker_count(),
        counts,
        timing: Timing {
            total_s: t_total.elapsed().as_secs_f64(),
            preflight_s,
            scan_s,
            index_s,
            plan_s,
            execute_s,
        },
        output_bytes,
        cancelled,
        events,
    };

    tracing::info!(
        planned = summary.counts.planned,
        converted = summary.counts.converted,
        renamed = summary.counts.renamed,
        retagged = summary.counts.retagged,
        pruned = summary.counts.pruned,
        skipped = summary.counts.skipped,
        failed = summary.counts.failed,
        total_s = summary.timing.total_s,
        "run complete"
    );
    Ok(summary)
}

/// Feed the plan through the bounded worker pool and collect the event
/// stream.
///
/// Skips never enter the pool; effective actions are submitted in plan
/// order, with `submit` providing the backpressure. After cancellation the
/// remaining effective actions are reported as cancelled without running.
fn execute_plan(
    plan: &Plan,
    ctx: &ExecContext,
    pause: PauseGate,
    hook: Option<crate::run::EventHook>,
) -> Result<Vec<FileEvent>> {
    let workers = ctx.policy.worker_count();
    let pool = WorkerPool::new(workers, pause);
    let (event_tx, event_rx) = mpsc::channel::<FileEvent>();

    let notify = move |event: FileEvent, tx: &mpsc::Sender<FileEvent>| {
        if let Some(hook) = &hook {
            hook(&event);
        }
        let _ = tx.send(event);
    };
    let notify = std::sync::Arc::new(notify);

    for action in &plan.actions {
        if !action.is_effective() {
            (*notify)(executor::execute_action(ctx, action), &event_tx);
            continue;
        }
        if ctx.cancel.is_cancelled() {
            (*notify)(cancelled_event(action), &event_tx);
            continue;
        }
        let ctx = ctx.clone();
        let action = action.clone();
        let tx = event_tx.clone();
        let notify = std::sync::Arc::clone(&notify);
        pool.submit(move || {
            let event = executor::execute_action(&ctx, &action);
            (*notify)(event, &tx);
        })?;
    }

    drop(event_tx);
    pool.join()?;
    Ok(event_rx.into_iter().collect())
}

/// Convert one file outside any tree reconciliation.
///
/// The destination's parent acts as the destination root for the atomic
/// commit; the fingerprint's `source_rel` is the source file name.
pub fn convert_file(
    src: &std::path::Path,
    dest: &std::path::Path,
    policy: &Policy,
) -> Result<FileEvent> {
    let backend = preflight(policy)?;
    let src_root = src.parent().unwrap_or(std::path::Path::new("."));
    let dest_root = dest.parent().unwrap_or(std::path::Path::new("."));
    std::fs::create_dir_all(dest_root).map_err(|_| Error::BadDestRoot(dest_root.to_path_buf()))?;

    let entry = crate::scanner::scan_file(src_root, src, policy.use_streaminfo_md5);
    let dst_rel = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| Error::BadDestRoot(dest.to_path_buf()))?;

    let ctx = ExecContext {
        src_root: src_root.to_path_buf(),
        dest_root: dest_root.to_path_buf(),
        policy: policy.clone(),
        backend,
        version: TOOL_VERSION.to_string(),
        cancel: CancelToken::new(),
    };
    let action = crate::planner::PlanAction::Convert {
        src: entry,
        dst_rel,
        reason: crate::planner::Reason::NoOutput,
    };
    Ok(executor::execute_action(&ctx, &action))
}

fn cancelled_event(action: &crate::planner::PlanAction) -> FileEvent {
    FileEvent {
        action: action.kind().to_string(),
        source_rel: None,
        dest_rel: action.dst_rel().to_string(),
        status: EventStatus::Cancelled,
        reason: "cancelled".to_string(),
        detail: None,
        elapsed_ms: 0,
    }
}
