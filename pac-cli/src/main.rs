//! pac — command-line wrapper over the conversion core.
//!
//! Maps flags, a TOML config, and `PAC_*` environment variables onto the
//! core's immutable policy, renders the run summary, and translates it
//! into the exit-status contract: 0 on success, 2 when any file action
//! failed, 3 when no encoder backend could be selected.

mod args;
mod config;
mod progress;

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use args::{Cli, CodecArg, Commands, VerifyArg};
use config::FileConfig;
use pac_core::planner::PlanAction;
use pac_core::policy::{ArtPolicy, Codec, PcmCodec, Policy, VerifyMode};
use pac_core::report::{EventStatus, EXIT_FILE_ERRORS, EXIT_OK, EXIT_PREFLIGHT_FAILED};
use pac_core::{probe, run};

fn main() {
    let cli = Cli::parse();

    let file_cfg = match FileConfig::load(cli.config.as_deref()) {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("pac: {err:#}");
            std::process::exit(1);
        }
    };

    init_logging(cli.log_level.as_deref().or(file_cfg.log_level.as_deref()));

    let code = match dispatch(cli, file_cfg) {
        Ok(code) => code,
        Err(err) => {
            error!("{err:#}");
            1
        }
    };
    std::process::exit(code);
}

fn init_logging(level: Option<&str>) {
    let filter = EnvFilter::try_from_env("PAC_LOG")
        .unwrap_or_else(|_| EnvFilter::new(level.unwrap_or("info")));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn dispatch(cli: Cli, file_cfg: FileConfig) -> Result<i32> {
    match cli.cmd {
        Commands::Preflight {
            codec,
            no_probe_emulated,
        } => cmd_preflight(&file_cfg, codec, no_probe_emulated),
        Commands::Convert {
            src,
            dest,
            tvbr,
            vbr,
            opus_vbr_kbps,
        } => cmd_convert(&file_cfg, &src, &dest, tvbr, vbr, opus_vbr_kbps),
        cmd @ Commands::ConvertDir { .. } => cmd_convert_dir(cmd, &file_cfg),
    }
}

// ---------------------------------------------------------------------------
// preflight

fn cmd_preflight(
    file_cfg: &FileConfig,
    codec: Option<CodecArg>,
    no_probe_emulated: bool,
) -> Result<i32> {
    let mut policy = base_policy(file_cfg);
    if let Some(c) = codec {
        policy.codec = to_codec(c);
    }
    if no_probe_emulated {
        policy.probe_emulated = false;
    }

    let set = probe::probe(policy.probe_emulated);
    match &set.ffmpeg {
        Some(ff) => {
            info!("ffmpeg: {}", ff.version.as_deref().unwrap_or("found"));
            info!("libfdk_aac (ffmpeg): {}", if ff.has_libfdk_aac { "YES" } else { "NO" });
            info!("libopus (ffmpeg): {}", if ff.has_libopus { "YES" } else { "NO" });
        }
        None => error!("ffmpeg: NOT FOUND"),
    }
    match &set.qaac {
        Some(q) => info!("qaac: {}", q.version.as_deref().unwrap_or("found")),
        None => info!("qaac: not found"),
    }
    match &set.fdkaac {
        Some(f) => info!("fdkaac: {}", f.version.as_deref().unwrap_or("found")),
        None => info!("fdkaac: not found"),
    }

    match probe::select(&set, &policy) {
        Ok(backend) => {
            info!("selected backend: {}", backend.describe());
            Ok(EXIT_OK)
        }
        Err(err) => {
            error!("{err}");
            Ok(EXIT_PREFLIGHT_FAILED)
        }
    }
}

// ---------------------------------------------------------------------------
// convert (single file)

fn cmd_convert(
    file_cfg: &FileConfig,
    src: &Path,
    dest: &Path,
    tvbr: Option<u32>,
    vbr: Option<u32>,
    opus_vbr_kbps: Option<u32>,
) -> Result<i32> {
    let mut policy = base_policy(file_cfg);
    policy.codec = match dest.extension().and_then(|e| e.to_str()) {
        Some("opus") => Codec::Opus,
        _ => Codec::Aac,
    };
    if let Some(v) = tvbr {
        policy.qaac_tvbr = v;
    }
    if let Some(v) = vbr {
        policy.aac_vbr = v;
    }
    if let Some(v) = opus_vbr_kbps {
        policy.opus_vbr_kbps = v;
    }

    let event = match run::convert_file(src, dest, &policy) {
        Ok(event) => event,
        Err(pac_core::Error::NoBackendAvailable { codec }) => {
            error!("no {codec} encoder available");
            return Ok(EXIT_PREFLIGHT_FAILED);
        }
        Err(err) => return Err(err).context("convert failed"),
    };

    match event.status {
        EventStatus::Done => {
            info!("wrote {}", dest.display());
            Ok(EXIT_OK)
        }
        _ => {
            error!(
                "convert failed: {}",
                event.detail.as_deref().unwrap_or(&event.reason)
            );
            Ok(EXIT_FILE_ERRORS)
        }
    }
}

// ---------------------------------------------------------------------------
// convert-dir

#[allow(clippy::too_many_lines)]
fn cmd_convert_dir(cmd: Commands, file_cfg: &FileConfig) -> Result<i32> {
    let Commands::ConvertDir {
        in_dir,
        out_dir,
        codec,
        tvbr,
        vbr,
        opus_vbr_kbps,
        workers,
        no_hash,
        force_reencode,
        no_rename,
        no_retag,
        prune,
        no_adopt,
        sync_tags,
        pcm_codec,
        verify,
        no_art_resize,
        art_max_size,
        dry_run,
        summary,
    } = cmd
    else {
        unreachable!("dispatch only sends ConvertDir here");
    };

    let mut policy = base_policy(file_cfg);
    if let Some(c) = codec {
        policy.codec = to_codec(c);
    }
    if let Some(v) = tvbr {
        policy.qaac_tvbr = v;
    }
    if let Some(v) = vbr {
        policy.aac_vbr = v;
    }
    if let Some(v) = opus_vbr_kbps {
        policy.opus_vbr_kbps = v;
    }
    if let Some(v) = workers {
        policy.workers = Some(v);
    }
    if no_hash {
        policy.use_streaminfo_md5 = false;
    }
    if force_reencode {
        policy.force_reencode = true;
    }
    if no_rename {
        policy.allow_rename = false;
    }
    if no_retag {
        policy.retag_existing = false;
    }
    if prune {
        policy.prune_orphans = true;
    }
    if no_adopt {
        policy.adopt_legacy = false;
    }
    if sync_tags {
        policy.sync_tags_on_retag = true;
    }
    if let Some(pcm) = &pcm_codec {
        policy.pcm_codec = parse_pcm(pcm)?;
    }
    if let Some(v) = verify {
        policy.verify = match v {
            VerifyArg::Off => VerifyMode::Off,
            VerifyArg::Warn => VerifyMode::Warn,
            VerifyArg::Strict => VerifyMode::Strict,
        };
    }
    if no_art_resize {
        policy.art.resize = false;
    }
    if let Some(px) = art_max_size {
        policy.art.max_px = px;
    }

    let opts = run::RunOptions::new(&in_dir, &out_dir, policy);

    if dry_run {
        return cmd_dry_run(&opts);
    }

    let reporter = progress::CliReporter::new();
    let opts = opts.with_event_hook(reporter.hook());

    let summary_result = match run::run(&opts) {
        Ok(s) => s,
        Err(pac_core::Error::NoBackendAvailable { codec }) => {
            reporter.finish();
            error!("no {codec} encoder available");
            return Ok(EXIT_PREFLIGHT_FAILED);
        }
        Err(err) => {
            reporter.finish();
            return Err(err).context("run failed");
        }
    };
    reporter.finish();

    let c = &summary_result.counts;
    info!(
        "planned: {} | converted: {} | renamed: {} | retagged: {} | pruned: {} | skipped: {} | failed: {}",
        c.planned, c.converted, c.renamed, c.retagged, c.pruned, c.skipped, c.failed
    );
    let t = &summary_result.timing;
    info!(
        "timing: total={:.3}s preflight={:.3}s scan={:.3}s index={:.3}s plan={:.3}s execute={:.3}s",
        t.total_s, t.preflight_s, t.scan_s, t.index_s, t.plan_s, t.execute_s
    );
    if c.converted > 0 && t.execute_s > 0.0 {
        info!(
            "throughput: {} files in {:.2}s = {:.2} files/s | output: {:.2} MB",
            c.converted,
            t.execute_s,
            c.converted as f64 / t.execute_s,
            summary_result.output_bytes as f64 / 1_000_000.0
        );
    }

    write_summary_json(&summary_result, &out_dir, summary.as_deref());
    Ok(summary_result.exit_code())
}

fn cmd_dry_run(opts: &run::RunOptions) -> Result<i32> {
    let (backend, plan) = match run::plan_only(opts) {
        Ok(v) => v,
        Err(pac_core::Error::NoBackendAvailable { codec }) => {
            error!("no {codec} encoder available");
            return Ok(EXIT_PREFLIGHT_FAILED);
        }
        Err(err) => return Err(err).context("planning failed"),
    };

    info!("selected backend: {}", backend.describe());
    for action in &plan.actions {
        let reason = action
            .reason()
            .map(|r| r.as_str())
            .unwrap_or("");
        match action {
            PlanAction::Convert { src, dst_rel, .. } => {
                println!("CONVERT  {} -> {} | {}", src.rel_path, dst_rel, reason)
            }
            PlanAction::Rename {
                from_rel, to_rel, ..
            } => println!("RENAME   {} -> {} | {}", from_rel, to_rel, reason),
            PlanAction::Retag { dst_rel, .. } => {
                println!("RETAG    {} | {}", dst_rel, reason)
            }
            PlanAction::Prune { dst_rel } => println!("PRUNE    {} | {}", dst_rel, reason),
            PlanAction::Skip { dst_rel, .. } => println!("SKIP     {} | {}", dst_rel, reason),
        }
    }

    info!(
        "plan breakdown: convert={} rename={} retag={} prune={} skip={}",
        plan.count("convert"),
        plan.count("rename"),
        plan.count("retag"),
        plan.count("prune"),
        plan.count("skip"),
    );
    Ok(EXIT_OK)
}

fn write_summary_json(
    summary: &pac_core::RunSummary,
    out_dir: &Path,
    explicit: Option<&Path>,
) {
    let path = match explicit {
        Some(p) => p.to_path_buf(),
        None => {
            let ts = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0);
            out_dir.join(format!("pac-run-summary-{ts}.json"))
        }
    };
    match serde_json::to_string_pretty(summary) {
        Ok(json) => {
            if let Err(e) = std::fs::write(&path, json) {
                tracing::warn!("could not write run summary {}: {e}", path.display());
            } else {
                info!("run summary written: {}", path.display());
            }
        }
        Err(e) => tracing::warn!("could not serialise run summary: {e}"),
    }
}

// ---------------------------------------------------------------------------
// policy assembly

fn base_policy(cfg: &FileConfig) -> Policy {
    let mut policy = Policy::default();
    if let Some(codec) = &cfg.codec {
        if codec.eq_ignore_ascii_case("opus") {
            policy.codec = Codec::Opus;
        }
    }
    if let Some(v) = cfg.tvbr {
        policy.qaac_tvbr = v;
    }
    if let Some(v) = cfg.vbr {
        policy.aac_vbr = v;
    }
    if let Some(v) = cfg.opus_vbr_kbps {
        policy.opus_vbr_kbps = v;
    }
    if let Some(v) = cfg.workers {
        policy.workers = Some(v);
    }
    if let Some(v) = cfg.hash_streaminfo {
        policy.use_streaminfo_md5 = v;
    }
    if let Some(v) = cfg.adopt {
        policy.adopt_legacy = v;
    }
    if let Some(v) = cfg.rename {
        policy.allow_rename = v;
    }
    if let Some(v) = cfg.retag {
        policy.retag_existing = v;
    }
    if let Some(v) = cfg.prune {
        policy.prune_orphans = v;
    }
    if let Some(v) = cfg.sync_tags {
        policy.sync_tags_on_retag = v;
    }
    if let Some(pcm) = &cfg.pcm_codec {
        if let Ok(parsed) = parse_pcm(pcm) {
            policy.pcm_codec = parsed;
        }
    }
    if let Some(v) = cfg.art_resize {
        policy.art = ArtPolicy {
            resize: v,
            ..policy.art
        };
    }
    if let Some(px) = cfg.art_max_size {
        policy.art = ArtPolicy {
            max_px: px,
            ..policy.art
        };
    }
    if let Some(v) = &cfg.verify {
        policy.verify = match v.to_ascii_lowercase().as_str() {
            "warn" => VerifyMode::Warn,
            "strict" => VerifyMode::Strict,
            _ => VerifyMode::Off,
        };
    }
    if let Some(v) = cfg.probe_emulated {
        policy.probe_emulated = v;
    }
    policy
}

fn to_codec(arg: CodecArg) -> Codec {
    match arg {
        CodecArg::Aac => Codec::Aac,
        CodecArg::Opus => Codec::Opus,
    }
}

fn parse_pcm(value: &str) -> Result<PcmCodec> {
    match value.to_ascii_lowercase().as_str() {
        "pcm_s16le" => Ok(PcmCodec::PcmS16le),
        "pcm_s24le" => Ok(PcmCodec::PcmS24le),
        "pcm_s32le" => Ok(PcmCodec::PcmS32le),
        other => anyhow::bail!("unsupported pcm codec: {other}"),
    }
}
