//! Action execution: encoder subprocesses, tag and art embedding, atomic
//! commit.
//!
//! Every mutation goes through a `.part` sidecar followed by a
//! same-filesystem rename, so readers of the destination tree never see a
//! partial output. Per-file failures are returned as values; nothing here
//! panics or aborts the run.

use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use lofty::config::{ParseOptions, WriteOptions};
use lofty::file::AudioFile;
use lofty::mp4::{AtomIdent, Ilst, Mp4File};
use lofty::ogg::{OggPictureStorage, OpusFile, VorbisComments};
use lofty::picture::Picture;
use lofty::tag::{Accessor, TagExt};
use unicode_normalization::UnicodeNormalization;

use crate::art;
use crate::error::ActionError;
use crate::fingerprint::{self, Container, Fingerprint};
use crate::planner::{PlanAction, Reason};
use crate::policy::{EncoderId, Policy, VerifyMode};
use crate::probe::Backend;
use crate::report::{EventStatus, FileEvent};
use crate::scanner::SourceEntry;
use crate::scheduler::CancelToken;
use crate::tags::TagTable;

/// Immutable context shared by all workers for one run.
#[derive(Debug, Clone)]
pub struct ExecContext {
    pub src_root: PathBuf,
    pub dest_root: PathBuf,
    pub policy: Policy,
    pub backend: Backend,
    /// Tool version stamped into fingerprints.
    pub version: String,
    pub cancel: CancelToken,
}

impl ExecContext {
    fn dest_abs(&self, rel: &str) -> PathBuf {
        self.dest_root.join(rel)
    }
}

/// Execute one planned action and report what happened.
pub fn execute_action(ctx: &ExecContext, action: &PlanAction) -> FileEvent {
    let started = Instant::now();
    let (source_rel, dest_rel) = match action {
        PlanAction::Convert { src, dst_rel, .. } | PlanAction::Retag { src, dst_rel, .. } => {
            (Some(src.rel_path.clone()), dst_rel.clone())
        }
        PlanAction::Rename { src, to_rel, .. } => (Some(src.rel_path.clone()), to_rel.clone()),
        PlanAction::Skip { dst_rel, .. } | PlanAction::Prune { dst_rel } => {
            (None, dst_rel.clone())
        }
    };

    let outcome = match action {
        PlanAction::Skip { .. } => Ok(EventStatus::Skipped),
        PlanAction::Convert { src, dst_rel, .. } => {
            run_convert(ctx, src, dst_rel).map(|_| EventStatus::Done)
        }
        PlanAction::Rename {
            src,
            from_rel,
            to_rel,
        } => run_rename(ctx, src, from_rel, to_rel).map(|_| EventStatus::Done),
        PlanAction::Retag {
            src,
            dst_rel,
            reason,
        } => run_retag(ctx, src, dst_rel, *reason).map(|_| EventStatus::Done),
        PlanAction::Prune { dst_rel } => run_prune(ctx, dst_rel).map(|_| EventStatus::Done),
    };

    let elapsed_ms = started.elapsed().as_millis() as u64;
    match outcome {
        Ok(status) => {
            let reason = action
                .reason()
                .map(|r| r.as_str().to_string())
                .unwrap_or_default();
            if status == EventStatus::Done {
                tracing::info!(
                    action = action.kind(),
                    file = %dest_rel,
                    elapsed_ms,
                    "action complete"
                );
            }
            FileEvent {
                action: action.kind().to_string(),
                source_rel,
                dest_rel,
                status,
                reason,
                detail: None,
                elapsed_ms,
            }
        }
        Err(err) => {
            let status = if matches!(err, ActionError::Cancelled) {
                EventStatus::Cancelled
            } else {
                tracing::error!(
                    action = action.kind(),
                    file = %dest_rel,
                    error = %err,
                    "action failed"
                );
                EventStatus::Failed
            };
            FileEvent {
                action: action.kind().to_string(),
                source_rel,
                dest_rel,
                status,
                reason: err.kind().to_string(),
                detail: Some(err.to_string()),
                elapsed_ms,
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Convert

fn run_convert(ctx: &ExecContext, src: &SourceEntry, dst_rel: &str) -> Result<(), ActionError> {
    if ctx.cancel.is_cancelled() {
        return Err(ActionError::Cancelled);
    }

    let dest_abs = ctx.dest_abs(dst_rel);
    let part = part_path(&dest_abs);
    if let Some(parent) = dest_abs.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| ActionError::EncodeFailed {
                detail: format!("creating {}: {e}", parent.display()),
            })?;
    }

    let encode_result = encode_to_part(ctx, &src.abs_path, &part);
    if let Err(e) = encode_result {
        remove_quietly(&part);
        return Err(e);
    }

    if let Err(e) = embed_metadata(ctx, src, &part, true) {
        remove_quietly(&part);
        return Err(e);
    }

    if ctx.policy.verify != VerifyMode::Off {
        if let Err(e) = verify_output(ctx, src, &part) {
            if ctx.policy.verify == VerifyMode::Strict {
                remove_quietly(&part);
                return Err(e);
            }
            tracing::warn!(file = %dst_rel, error = %e, "verification mismatch");
        }
    }

    if ctx.cancel.is_cancelled() {
        remove_quietly(&part);
        return Err(ActionError::Cancelled);
    }

    commit(&part, &dest_abs)
}

/// Spawn the encode pipeline writing to `part` and wait for it.
fn encode_to_part(ctx: &ExecContext, src: &Path, part: &Path) -> Result<(), ActionError> {
    match ctx.backend.id {
        EncoderId::LibfdkAac => {
            let mut cmd = ffmpeg_base(src);
            cmd.args(["-map_metadata", "0"])
                .args(["-movflags", "+use_metadata_tags+faststart"])
                .args(["-c:a", "libfdk_aac"])
                .args(["-vbr", &ctx.policy.aac_vbr.to_string()])
                .args(["-threads", "1"])
                .args(["-f", "mp4"])
                .arg(part);
            run_single(cmd, &ctx.cancel)
        }
        EncoderId::Libopus => {
            let mut cmd = ffmpeg_base(src);
            cmd.args(["-map_metadata", "0"])
                .args(["-c:a", "libopus"])
                .args(["-b:a", &format!("{}k", ctx.policy.opus_vbr_kbps)])
                .args(["-vbr", "on"])
                .args(["-threads", "1"])
                .args(["-f", "ogg"])
                .arg(part);
            run_single(cmd, &ctx.cancel)
        }
        EncoderId::Qaac => {
            let encoder_path = cli_path(ctx);
            let mut enc = Command::new(encoder_path);
            enc.args(["--tvbr", &ctx.policy.qaac_tvbr.to_string()])
                .arg("--ignorelength")
                .args(["-o"])
                .arg(part)
                .arg("-");
            run_pipe(ctx, src, enc)
        }
        EncoderId::Fdkaac => {
            let encoder_path = cli_path(ctx);
            let mut enc = Command::new(encoder_path);
            enc.args(["-m", &ctx.policy.aac_vbr.to_string()])
                .args(["-o"])
                .arg(part)
                .arg("-");
            run_pipe(ctx, src, enc)
        }
    }
}

fn cli_path(ctx: &ExecContext) -> PathBuf {
    ctx.backend
        .cli
        .as_ref()
        .map(|c| c.path.clone())
        .unwrap_or_else(|| PathBuf::from(ctx.backend.id.as_str()))
}

/// Common ffmpeg prefix: quiet, first audio stream only, no video.
fn ffmpeg_base(src: &Path) -> Command {
    let mut cmd = Command::new("ffmpeg");
    cmd.arg("-nostdin")
        .arg("-hide_banner")
        .args(["-loglevel", "error"])
        .arg("-y")
        .arg("-i")
        .arg(src)
        .args(["-map", "0:a:0"])
        .arg("-vn");
    cmd
}

fn run_single(mut cmd: Command, cancel: &CancelToken) -> Result<(), ActionError> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped());
    let child = cmd.spawn().map_err(|e| ActionError::EncodeFailed {
        detail: format!("spawn failed: {e}"),
    })?;
    wait_children(vec![child], cancel)
}

/// Decode-then-encode form: ffmpeg writes PCM WAV to stdout, the encoder
/// CLI reads stdin.
fn run_pipe(ctx: &ExecContext, src: &Path, mut encoder: Command) -> Result<(), ActionError> {
    let mut decoder_cmd = ffmpeg_base(src);
    decoder_cmd
        .arg("-sn")
        .arg("-dn")
        .args(["-acodec", ctx.policy.pcm_codec.as_str()])
        .args(["-f", "wav"])
        .arg("-")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut decoder = decoder_cmd.spawn().map_err(|e| ActionError::EncodeFailed {
        detail: format!("decoder spawn failed: {e}"),
    })?;
    let pcm_out = decoder.stdout.take().ok_or_else(|| ActionError::EncodeFailed {
        detail: "decoder stdout unavailable".into(),
    })?;

    let encoder_child = encoder
        .stdin(Stdio::from(pcm_out))
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn();
    let encoder_child = match encoder_child {
        Ok(c) => c,
        Err(e) => {
            let _ = decoder.kill();
            let _ = decoder.wait();
            return Err(ActionError::EncodeFailed {
                detail: format!("encoder spawn failed: {e}"),
            });
        }
    };

    wait_children(vec![decoder, encoder_child], &ctx.cancel)
}

/// Wait for every child, polling the cancel token; on cancel, kill the
/// whole chain.
///
/// Stderr pipes are drained on side threads so a chatty child can never
/// fill its pipe buffer and wedge the poll loop.
fn wait_children(mut children: Vec<Child>, cancel: &CancelToken) -> Result<(), ActionError> {
    let drains: Vec<Option<std::thread::JoinHandle<String>>> = children
        .iter_mut()
        .map(|child| {
            child.stderr.take().map(|mut stderr| {
                std::thread::spawn(move || {
                    use std::io::Read;
                    let mut buf = String::new();
                    let _ = stderr.read_to_string(&mut buf);
                    // Keep the tail; that is where the error lives.
                    if buf.len() > 2048 {
                        buf.split_off(buf.len() - 2048)
                    } else {
                        buf
                    }
                })
            })
        })
        .collect();

    let mut statuses: Vec<Option<std::process::ExitStatus>> = vec![None; children.len()];
    let mut abort: Option<ActionError> = None;
    'poll: loop {
        if cancel.is_cancelled() {
            abort = Some(ActionError::Cancelled);
            break 'poll;
        }
        for (i, child) in children.iter_mut().enumerate() {
            if statuses[i].is_none() {
                match child.try_wait() {
                    Ok(Some(status)) => statuses[i] = Some(status),
                    Ok(None) => {}
                    Err(e) => {
                        abort = Some(ActionError::EncodeFailed {
                            detail: format!("wait failed: {e}"),
                        });
                        break 'poll;
                    }
                }
            }
        }
        if statuses.iter().all(Option::is_some) {
            break;
        }
        std::thread::sleep(Duration::from_millis(25));
    }

    if let Some(err) = abort {
        for child in &mut children {
            let _ = child.kill();
            let _ = child.wait();
        }
        for drain in drains.into_iter().flatten() {
            let _ = drain.join();
        }
        return Err(err);
    }

    let stderr_tails: Vec<String> = drains
        .into_iter()
        .map(|d| d.and_then(|h| h.join().ok()).unwrap_or_default())
        .collect();

    for (i, status) in statuses.iter().enumerate() {
        if !status.map(|s| s.success()).unwrap_or(false) {
            let tail = stderr_tails.get(i).map(|s| s.trim()).unwrap_or("");
            let detail = if tail.is_empty() {
                format!("child {i} exited non-zero")
            } else {
                tail.to_string()
            };
            return Err(ActionError::EncodeFailed { detail });
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tag, art, and fingerprint embedding

/// Fingerprint for this source under the frozen backend, when the source
/// digest is known. Without a digest the output is left unfingerprinted and
/// the next run falls back to the weak identity.
fn fingerprint_for(ctx: &ExecContext, src: &SourceEntry) -> Option<Fingerprint> {
    src.audio_md5_hex().map(|md5| Fingerprint {
        src_md5: md5,
        encoder: ctx.backend.id.as_str().to_string(),
        quality: ctx.policy.quality_for(ctx.backend.id).to_string(),
        version: ctx.version.clone(),
        source_rel: src.rel_path.clone(),
    })
}

/// Write the translated tag set, cover art, and fingerprint into `path`.
///
/// `replace` rebuilds the tag block from the source (Convert and tag-sync
/// Retag); otherwise existing tags are preserved and only the fingerprint
/// is stamped.
fn embed_metadata(
    ctx: &ExecContext,
    src: &SourceEntry,
    path: &Path,
    replace: bool,
) -> Result<(), ActionError> {
    let fp = fingerprint_for(ctx, src);

    if !replace {
        if let Some(fp) = &fp {
            return fingerprint::write_fingerprint(path, fp)
                .map_err(|e| ActionError::TagWriteFailed(e.to_string()));
        }
        return Ok(());
    }

    let table = TagTable::read_from_flac(&src.abs_path)
        .map_err(|e| ActionError::TagWriteFailed(format!("source tags: {e}")))?;

    let cover = match art::extract_cover(&src.abs_path) {
        Ok(Some(picture)) => match art::prepare_cover(picture, &ctx.policy.art) {
            Ok(p) => Some(p),
            Err(e) => {
                if ctx.policy.verify == VerifyMode::Strict {
                    return Err(ActionError::TagWriteFailed(format!("cover art: {e}")));
                }
                tracing::warn!(file = %src.rel_path, error = %e, "cover art not copied");
                None
            }
        },
        Ok(None) => None,
        Err(e) => {
            if ctx.policy.verify == VerifyMode::Strict {
                return Err(ActionError::TagWriteFailed(format!("cover art: {e}")));
            }
            tracing::warn!(file = %src.rel_path, error = %e, "cover art not read");
            None
        }
    };

    write_full_tags(path, &table, cover, fp.as_ref())
        .map_err(|e| ActionError::TagWriteFailed(e))
}

fn write_full_tags(
    path: &Path,
    table: &TagTable,
    cover: Option<Picture>,
    fp: Option<&Fingerprint>,
) -> Result<(), String> {
    let container = Container::from_path(path)
        .ok_or_else(|| format!("unsupported container: {}", path.display()))?;
    let mut file = std::fs::File::open(path).map_err(|e| e.to_string())?;

    match container {
        Container::Mp4 => {
            // Parse first so a truncated encode surfaces here, then rebuild
            // the ilst from the source alone: fields absent in the source
            // must be absent in the target.
            Mp4File::read_from(&mut file, ParseOptions::new()).map_err(|e| e.to_string())?;
            let mut ilst = Ilst::default();
            table.apply_to_ilst(&mut ilst);
            if let Some(picture) = cover {
                ilst.insert_picture(picture);
            }
            if let Some(fp) = fp {
                fp.apply_to_ilst(&mut ilst);
            }
            ilst.save_to_path(path, WriteOptions::default())
                .map_err(|e| e.to_string())?;
        }
        Container::Opus => {
            let opus = OpusFile::read_from(&mut file, ParseOptions::new())
                .map_err(|e| e.to_string())?;
            let mut comments = VorbisComments::default();
            comments.set_vendor(opus.vorbis_comments().vendor().to_string());
            table.apply_to_vorbis(&mut comments);
            if let Some(picture) = cover {
                let info = lofty::picture::PictureInformation::from_picture(&picture)
                    .unwrap_or_default();
                comments
                    .insert_picture(picture, Some(info))
                    .map_err(|e| e.to_string())?;
            }
            if let Some(fp) = fp {
                fp.apply_to_vorbis(&mut comments);
            }
            comments
                .save_to_path(path, WriteOptions::default())
                .map_err(|e| e.to_string())?;
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Verification

/// Compare a tag subset and cover presence against the source.
fn verify_output(ctx: &ExecContext, src: &SourceEntry, path: &Path) -> Result<(), ActionError> {
    let want = TagTable::read_from_flac(&src.abs_path)
        .map_err(|e| ActionError::VerifyMismatch(format!("source unreadable: {e}")))?;
    let want_cover = matches!(art::extract_cover(&src.abs_path), Ok(Some(_)));

    let (got_title, got_artist, got_album, got_cover) = read_back(path)
        .map_err(|e| ActionError::VerifyMismatch(format!("output unreadable: {e}")))?;

    let mismatch = |field: &str, want: &Option<String>, got: &Option<String>| {
        let norm = |v: &Option<String>| v.as_deref().map(normalize_for_compare);
        if norm(want) != norm(got) {
            Some(format!("{field}: {want:?} != {got:?}"))
        } else {
            None
        }
    };

    let problems: Vec<String> = [
        mismatch("title", &want.title, &got_title),
        mismatch("artist", &want.artist, &got_artist),
        mismatch("album", &want.album, &got_album),
        (want_cover && !got_cover).then(|| "cover art missing".to_string()),
    ]
    .into_iter()
    .flatten()
    .collect();

    if problems.is_empty() {
        Ok(())
    } else {
        Err(ActionError::VerifyMismatch(problems.join("; ")))
    }
}

fn normalize_for_compare(value: &str) -> String {
    value.trim().nfc().collect()
}

#[allow(clippy::type_complexity)]
fn read_back(
    path: &Path,
) -> Result<(Option<String>, Option<String>, Option<String>, bool), String> {
    let container = Container::from_path(path)
        .ok_or_else(|| format!("unsupported container: {}", path.display()))?;
    let mut file = std::fs::File::open(path).map_err(|e| e.to_string())?;
    match container {
        Container::Mp4 => {
            let mp4 = Mp4File::read_from(&mut file, ParseOptions::new()).map_err(|e| e.to_string())?;
            let ilst = mp4.ilst();
            let title = ilst.and_then(|t| t.title().map(|s| s.to_string()));
            let artist = ilst.and_then(|t| t.artist().map(|s| s.to_string()));
            let album = ilst.and_then(|t| t.album().map(|s| s.to_string()));
            let cover = ilst
                .map(|t| t.get(&AtomIdent::Fourcc(*b"covr")).is_some())
                .unwrap_or(false);
            Ok((title, artist, album, cover))
        }
        Container::Opus => {
            let opus = OpusFile::read_from(&mut file, ParseOptions::new()).map_err(|e| e.to_string())?;
            let comments = opus.vorbis_comments();
            let title = comments.title().map(|s| s.to_string());
            let artist = comments.artist().map(|s| s.to_string());
            let album = comments.album().map(|s| s.to_string());
            let cover = !comments.pictures().is_empty();
            Ok((title, artist, album, cover))
        }
    }
}

// ---------------------------------------------------------------------------
// Rename / Retag / Prune

/// Move an already-acceptable output. The embedded `source_rel` is
/// refreshed at the old path first (sidecar + atomic replace), so a crash
/// can leave a stale path entry but never a moved file pointing at the
/// wrong source.
fn run_rename(
    ctx: &ExecContext,
    src: &SourceEntry,
    from_rel: &str,
    to_rel: &str,
) -> Result<(), ActionError> {
    if ctx.cancel.is_cancelled() {
        return Err(ActionError::Cancelled);
    }
    let from_abs = ctx.dest_abs(from_rel);
    let to_abs = ctx.dest_abs(to_rel);

    let needs_stamp = match fingerprint::read_fingerprint(&from_abs) {
        Ok(Some(fp)) => fp.source_rel != src.rel_path || fp.version != ctx.version,
        Ok(None) => false,
        Err(e) => return Err(ActionError::TagWriteFailed(e.to_string())),
    };

    if needs_stamp {
        if let Some(fp) = fingerprint_for(ctx, src) {
            let part = part_path(&from_abs);
            std::fs::copy(&from_abs, &part)
                .map_err(|e| ActionError::TagWriteFailed(format!("sidecar copy: {e}")))?;
            if let Err(e) = fingerprint::write_fingerprint(&part, &fp) {
                remove_quietly(&part);
                return Err(ActionError::TagWriteFailed(e.to_string()));
            }
            commit(&part, &from_abs)?;
        }
    }

    if let Some(parent) = to_abs.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| ActionError::CommitFailed(format!("creating {}: {e}", parent.display())))?;
    }
    rename_with_retry(&from_abs, &to_abs)
}

fn run_retag(
    ctx: &ExecContext,
    src: &SourceEntry,
    dst_rel: &str,
    reason: Reason,
) -> Result<(), ActionError> {
    if ctx.cancel.is_cancelled() {
        return Err(ActionError::Cancelled);
    }
    let dest_abs = ctx.dest_abs(dst_rel);
    let part = part_path(&dest_abs);

    std::fs::copy(&dest_abs, &part)
        .map_err(|e| ActionError::TagWriteFailed(format!("sidecar copy: {e}")))?;

    // Adoption may refresh the whole standard tag set; a stamp refresh only
    // rewrites the fingerprint.
    let replace = reason == Reason::AdoptLegacy && ctx.policy.sync_tags_on_retag;
    if let Err(e) = embed_metadata(ctx, src, &part, replace) {
        remove_quietly(&part);
        return Err(e);
    }

    if ctx.cancel.is_cancelled() {
        remove_quietly(&part);
        return Err(ActionError::Cancelled);
    }
    commit(&part, &dest_abs)
}

fn run_prune(ctx: &ExecContext, dst_rel: &str) -> Result<(), ActionError> {
    let dest_abs = ctx.dest_abs(dst_rel);
    std::fs::remove_file(&dest_abs)
        .map_err(|e| ActionError::CommitFailed(format!("unlink: {e}")))?;
    tracing::info!(file = %dst_rel, "pruned orphan");

    if ctx.policy.remove_empty_dirs {
        let mut dir = dest_abs.parent().map(Path::to_path_buf);
        while let Some(d) = dir {
            if d == ctx.dest_root || std::fs::remove_dir(&d).is_err() {
                break;
            }
            dir = d.parent().map(Path::to_path_buf);
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Commit protocol

pub(crate) fn part_path(dest: &Path) -> PathBuf {
    let mut os = dest.as_os_str().to_owned();
    os.push(".part");
    PathBuf::from(os)
}

/// Atomic same-filesystem rename with a single retry for transient errors.
fn commit(part: &Path, dest: &Path) -> Result<(), ActionError> {
    match std::fs::rename(part, dest) {
        Ok(()) => Ok(()),
        Err(first) => {
            std::thread::sleep(Duration::from_millis(100));
            std::fs::rename(part, dest).map_err(|second| {
                remove_quietly(part);
                ActionError::CommitFailed(format!("{first}; retry: {second}"))
            })
        }
    }
}

fn rename_with_retry(from: &Path, to: &Path) -> Result<(), ActionError> {
    match std::fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(first) => {
            std::thread::sleep(Duration::from_millis(100));
            std::fs::rename(from, to)
                .map_err(|second| ActionError::CommitFailed(format!("{first}; retry: {second}")))
        }
    }
}

fn remove_quietly(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(file = %path.display(), error = %e, "could not remove sidecar");
        }
    }
}

/// Remove any `.part` sidecars left under the destination root; run after
/// cancellation or a crashively-ended previous run.
pub fn sweep_dangling_parts(dest_root: &Path) -> usize {
    let mut removed = 0usize;
    for entry in walkdir::WalkDir::new(dest_root)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if entry.file_type().is_file()
            && entry
                .path()
                .extension()
                .map(|e| e == "part")
                .unwrap_or(false)
        {
            if std::fs::remove_file(entry.path()).is_ok() {
                removed += 1;
            }
        }
    }
    if removed > 0 {
        tracing::info!(removed, "swept dangling .part files");
    }
    removed
}
