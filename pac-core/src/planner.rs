//! The stateless planner.
//!
//! Correlates the source scan, the destination index, and the run policy
//! into an ordered action list. No state outside the three inputs is
//! consulted, so the plan is a pure function: the same inputs always yield
//! the same actions in the same order with the same reasons.
//!
//! Sources are processed in sorted `rel_path` order. Each decision claims
//! destination slots as it goes; later sources see those claims both in the
//! case-folded collision sets and in the existing-output claim set, which
//! is what keeps two actions from ever touching the same file in one run.

use std::collections::HashSet;

use crate::dest_index::{DestIndex, OutputEntry};
use crate::paths::{sanitize_rel_path, CollisionResolver};
use crate::policy::{EncoderId, Policy};
use crate::scanner::SourceEntry;

/// Why an action was chosen; stable strings feed the per-file event stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reason {
    /// Content, settings, and path all match.
    UpToDate,
    /// Up-to-date bytes, but the embedded stamp is from an older tool
    /// version or records a stale source path.
    StampStale,
    /// Same content exists under a different destination path.
    PathDrift,
    /// Same content exists elsewhere but renames are disabled.
    RenameDisabled,
    /// Output fingerprint encoder or quality differs from the run policy.
    SettingsMismatch,
    /// Output at the expected path belongs to different content.
    ContentChanged,
    /// Fingerprint-less output at the expected path; policy adopts it.
    AdoptLegacy,
    /// Fingerprint-less output at the expected path; adoption disabled.
    LegacyNoAdopt,
    /// No usable output anywhere.
    NoOutput,
    /// Force-reencode policy.
    Forced,
    /// Weak identity (no source digest): output is newer and settings
    /// match, presumed current.
    WeakUpToDate,
    /// Weak identity and the output cannot be presumed current.
    WeakStale,
    /// Destination file with no corresponding source; prune policy off.
    OrphanRetained,
    /// Destination file with no corresponding source; prune policy on.
    Orphan,
    /// Unreadable destination file; never pruned implicitly.
    OrphanUnreadable,
}

impl Reason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Reason::UpToDate => "up_to_date",
            Reason::StampStale => "stamp_stale",
            Reason::PathDrift => "path_drift",
            Reason::RenameDisabled => "rename_disabled",
            Reason::SettingsMismatch => "settings_mismatch",
            Reason::ContentChanged => "content_changed",
            Reason::AdoptLegacy => "adopt_legacy",
            Reason::LegacyNoAdopt => "legacy_no_adopt",
            Reason::NoOutput => "no_output",
            Reason::Forced => "forced",
            Reason::WeakUpToDate => "weak_up_to_date",
            Reason::WeakStale => "weak_stale",
            Reason::OrphanRetained => "orphan_retained",
            Reason::Orphan => "orphan",
            Reason::OrphanUnreadable => "orphan_unreadable",
        }
    }
}

/// One planned action. Carries what the executor needs and nothing else.
#[derive(Debug, Clone)]
pub enum PlanAction {
    /// Encode `src` to `dst_rel`.
    Convert {
        src: SourceEntry,
        dst_rel: String,
        reason: Reason,
    },
    /// The bytes at `from_rel` already encode this source; move them.
    Rename {
        src: SourceEntry,
        from_rel: String,
        to_rel: String,
    },
    /// Acceptable bytes at `dst_rel`; rewrite the stamp (and optionally the
    /// standard tags) without re-encoding.
    Retag {
        src: SourceEntry,
        dst_rel: String,
        reason: Reason,
    },
    /// Nothing to do; emitted for reporting.
    Skip { dst_rel: String, reason: Reason },
    /// Destination file with no source; delete.
    Prune { dst_rel: String },
}

impl PlanAction {
    pub fn kind(&self) -> &'static str {
        match self {
            PlanAction::Convert { .. } => "convert",
            PlanAction::Rename { .. } => "rename",
            PlanAction::Retag { .. } => "retag",
            PlanAction::Skip { .. } => "skip",
            PlanAction::Prune { .. } => "prune",
        }
    }

    pub fn reason(&self) -> Option<Reason> {
        match self {
            PlanAction::Convert { reason, .. } | PlanAction::Retag { reason, .. } => Some(*reason),
            PlanAction::Skip { reason, .. } => Some(*reason),
            PlanAction::Rename { .. } => Some(Reason::PathDrift),
            PlanAction::Prune { .. } => Some(Reason::Orphan),
        }
    }

    /// The destination path this action ends at.
    pub fn dst_rel(&self) -> &str {
        match self {
            PlanAction::Convert { dst_rel, .. }
            | PlanAction::Retag { dst_rel, .. }
            | PlanAction::Skip { dst_rel, .. }
            | PlanAction::Prune { dst_rel } => dst_rel,
            PlanAction::Rename { to_rel, .. } => to_rel,
        }
    }

    /// Whether executing this action does any work.
    pub fn is_effective(&self) -> bool {
        !matches!(self, PlanAction::Skip { .. })
    }
}

/// The deterministic, immutable action list.
#[derive(Debug, Default)]
pub struct Plan {
    pub actions: Vec<PlanAction>,
}

impl Plan {
    pub fn count(&self, kind: &str) -> usize {
        self.actions.iter().filter(|a| a.kind() == kind).count()
    }

    pub fn effective_len(&self) -> usize {
        self.actions.iter().filter(|a| a.is_effective()).count()
    }
}

/// Compute the plan. `encoder` is the backend frozen by preflight and
/// `version` the tool version stamped into fingerprints.
pub fn plan(
    sources: &[SourceEntry],
    dest: &DestIndex,
    policy: &Policy,
    encoder: EncoderId,
    version: &str,
) -> Plan {
    let mut sorted: Vec<&SourceEntry> = sources.iter().collect();
    sorted.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));

    let quality = policy.quality_for(encoder).to_string();
    let encoder_str = encoder.as_str();

    let mut resolver = CollisionResolver::new();
    for entry in dest.entries() {
        resolver.reserve_existing(&entry.rel_path);
    }

    // Existing outputs already reused or superseded by an earlier decision;
    // never select or overwrite one of these twice.
    let mut claimed: HashSet<String> = HashSet::new();
    // Exact destination paths this run ends at, plus rename origins.
    let mut used: HashSet<String> = HashSet::new();

    let mut actions: Vec<PlanAction> = Vec::with_capacity(sorted.len());

    for src in &sorted {
        let candidate = sanitize_rel_path(&src.rel_path, policy.codec.extension());

        // Content-matched output, filtered by prior claims; prefer the one
        // already sitting at the candidate path, else the lexicographically
        // smallest.
        let md5_hex = src.audio_md5_hex();
        let content_match: Option<&OutputEntry> = md5_hex.as_ref().and_then(|md5| {
            let slots = dest.by_md5(md5);
            let free = |rel: &&String| !claimed.contains(rel.as_str());
            slots
                .iter()
                .filter(free)
                .find(|rel| rel.as_str() == candidate)
                .or_else(|| slots.iter().find(free))
                .and_then(|rel| dest.by_rel(rel))
        });

        let settings_match = |o: &OutputEntry| {
            o.fingerprint
                .as_ref()
                .map(|fp| fp.encoder == encoder_str && fp.quality == quality)
                .unwrap_or(false)
        };

        // Claim the slot at the candidate path (reused or overwritten in
        // place), and the rename origin. Both are superseded by this
        // decision, so neither may force a suffix on the target: a rename
        // origin blocks its own target otherwise (the origin of a
        // suffixed output would pin every replan one suffix further,
        // never converging back to a skip).
        let exact = dest.by_rel(&candidate).filter(|o| !claimed.contains(&o.rel_path));
        if let Some(o) = exact {
            claimed.insert(o.rel_path.clone());
            resolver.release_existing(&o.rel_path);
        }
        let rename_source = match (&content_match, exact) {
            (Some(o), _)
                if settings_match(o)
                    && o.rel_path != candidate
                    && policy.allow_rename
                    && !policy.force_reencode =>
            {
                claimed.insert(o.rel_path.clone());
                resolver.release_existing(&o.rel_path);
                Some(o.rel_path.clone())
            }
            _ => None,
        };

        let dst_rel = resolver.assign(&candidate);
        used.insert(dst_rel.clone());

        let action = if policy.force_reencode {
            PlanAction::Convert {
                src: (*src).clone(),
                dst_rel: dst_rel.clone(),
                reason: Reason::Forced,
            }
        } else if let Some(o) = content_match {
            if settings_match(o) {
                if o.rel_path == dst_rel {
                    let stamp_stale = o.fingerprint.as_ref().is_some_and(|fp| {
                        fp.version != version || fp.source_rel != src.rel_path
                    });
                    if policy.retag_existing && stamp_stale {
                        PlanAction::Retag {
                            src: (*src).clone(),
                            dst_rel: dst_rel.clone(),
                            reason: Reason::StampStale,
                        }
                    } else {
                        PlanAction::Skip {
                            dst_rel: dst_rel.clone(),
                            reason: Reason::UpToDate,
                        }
                    }
                } else if let Some(from_rel) = rename_source {
                    used.insert(from_rel.clone());
                    PlanAction::Rename {
                        src: (*src).clone(),
                        from_rel,
                        to_rel: dst_rel.clone(),
                    }
                } else {
                    PlanAction::Convert {
                        src: (*src).clone(),
                        dst_rel: dst_rel.clone(),
                        reason: Reason::RenameDisabled,
                    }
                }
            } else {
                // Policy changed; the old output loses its slot and becomes
                // an orphan candidate unless something else claims it.
                PlanAction::Convert {
                    src: (*src).clone(),
                    dst_rel: dst_rel.clone(),
                    reason: Reason::SettingsMismatch,
                }
            }
        } else if let Some(existing) = dest.by_rel(&dst_rel) {
            match (&existing.fingerprint, &md5_hex) {
                (None, Some(_)) => {
                    if policy.adopt_legacy {
                        PlanAction::Retag {
                            src: (*src).clone(),
                            dst_rel: dst_rel.clone(),
                            reason: Reason::AdoptLegacy,
                        }
                    } else {
                        PlanAction::Convert {
                            src: (*src).clone(),
                            dst_rel: dst_rel.clone(),
                            reason: Reason::LegacyNoAdopt,
                        }
                    }
                }
                (Some(_), Some(_)) => {
                    // A fingerprint with this source's digest would have
                    // matched above, so the path holds different content.
                    PlanAction::Convert {
                        src: (*src).clone(),
                        dst_rel: dst_rel.clone(),
                        reason: Reason::ContentChanged,
                    }
                }
                (_, None) => {
                    // No source digest to compare: fall back to the weak
                    // size+mtime identity. Without a digest a fresh stamp
                    // cannot be written either, so adoption degrades to
                    // the same weak check.
                    let presumed_current = existing.mtime_ns > src.mtime_ns
                        && existing
                            .fingerprint
                            .as_ref()
                            .map(|fp| fp.encoder == encoder_str && fp.quality == quality)
                            .unwrap_or(policy.adopt_legacy);
                    if presumed_current {
                        PlanAction::Skip {
                            dst_rel: dst_rel.clone(),
                            reason: Reason::WeakUpToDate,
                        }
                    } else {
                        PlanAction::Convert {
                            src: (*src).clone(),
                            dst_rel: dst_rel.clone(),
                            reason: Reason::WeakStale,
                        }
                    }
                }
            }
        } else {
            PlanAction::Convert {
                src: (*src).clone(),
                dst_rel: dst_rel.clone(),
                reason: Reason::NoOutput,
            }
        };

        actions.push(action);
    }

    // Orphan pass: anything in the destination neither produced nor moved
    // by this plan.
    for entry in dest.entries() {
        if used.contains(&entry.rel_path) {
            continue;
        }
        let action = if entry.index_error.is_some() {
            PlanAction::Skip {
                dst_rel: entry.rel_path.clone(),
                reason: Reason::OrphanUnreadable,
            }
        } else if policy.prune_orphans {
            PlanAction::Prune {
                dst_rel: entry.rel_path.clone(),
            }
        } else {
            PlanAction::Skip {
                dst_rel: entry.rel_path.clone(),
                reason: Reason::OrphanRetained,
            }
        };
        actions.push(action);
    }

    tracing::debug!(
        total = actions.len(),
        convert = actions.iter().filter(|a| a.kind() == "convert").count(),
        rename = actions.iter().filter(|a| a.kind() == "rename").count(),
        retag = actions.iter().filter(|a| a.kind() == "retag").count(),
        prune = actions.iter().filter(|a| a.kind() == "prune").count(),
        "plan computed"
    );

    Plan { actions }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dest_index::OutputEntry;
    use crate::fingerprint::{Container, Fingerprint};
    use std::path::PathBuf;

    const VERSION: &str = "0.6.0";

    fn src(rel: &str, md5_byte: u8) -> SourceEntry {
        SourceEntry {
            rel_path: rel.to_string(),
            abs_path: PathBuf::from("/src").join(rel),
            size: 1000,
            mtime_ns: 1_000_000,
            audio_md5: Some([md5_byte; 16]),
            scan_error: None,
        }
    }

    fn src_no_md5(rel: &str) -> SourceEntry {
        SourceEntry {
            audio_md5: None,
            ..src(rel, 0)
        }
    }

    fn md5_hex(b: u8) -> String {
        crate::scanner::md5_hex(&[b; 16])
    }

    fn out(rel: &str, fp: Option<Fingerprint>) -> OutputEntry {
        OutputEntry {
            rel_path: rel.to_string(),
            abs_path: PathBuf::from("/dst").join(rel),
            size: 500,
            mtime_ns: 2_000_000,
            container: Container::Mp4,
            fingerprint: fp,
            index_error: None,
        }
    }

    fn fp(md5_byte: u8, src_rel: &str) -> Fingerprint {
        Fingerprint {
            src_md5: md5_hex(md5_byte),
            encoder: "libfdk_aac".into(),
            quality: "5".into(),
            version: VERSION.into(),
            source_rel: src_rel.into(),
        }
    }

    fn index(entries: Vec<OutputEntry>) -> DestIndex {
        let mut idx = DestIndex::default();
        for e in entries {
            idx.insert(e);
        }
        idx
    }

    fn make_plan(sources: &[SourceEntry], dest: &DestIndex, policy: &Policy) -> Plan {
        plan(sources, dest, policy, EncoderId::LibfdkAac, VERSION)
    }

    fn kinds(plan: &Plan) -> Vec<&'static str> {
        plan.actions.iter().map(|a| a.kind()).collect()
    }

    /// Destination state a fully-successful execution of `plan` would
    /// leave behind, for replan convergence tests.
    fn executed_state(plan: &Plan, prior: &DestIndex) -> DestIndex {
        use std::collections::BTreeMap;

        let fp_of = |src: &SourceEntry| {
            src.audio_md5_hex().map(|md5| Fingerprint {
                src_md5: md5,
                encoder: "libfdk_aac".into(),
                quality: "5".into(),
                version: VERSION.into(),
                source_rel: src.rel_path.clone(),
            })
        };

        let mut files: BTreeMap<String, OutputEntry> = prior
            .entries()
            .cloned()
            .map(|e| (e.rel_path.clone(), e))
            .collect();

        for action in &plan.actions {
            match action {
                PlanAction::Convert { src, dst_rel, .. } => {
                    let mut entry = out(dst_rel, None);
                    entry.fingerprint = fp_of(src);
                    files.insert(dst_rel.clone(), entry);
                }
                PlanAction::Rename {
                    src,
                    from_rel,
                    to_rel,
                } => {
                    let mut entry = files.remove(from_rel).expect("rename origin exists");
                    entry.rel_path = to_rel.clone();
                    entry.fingerprint = fp_of(src).or(entry.fingerprint);
                    files.insert(to_rel.clone(), entry);
                }
                PlanAction::Retag { src, dst_rel, .. } => {
                    if let Some(entry) = files.get_mut(dst_rel) {
                        entry.fingerprint = fp_of(src);
                    }
                }
                PlanAction::Prune { dst_rel } => {
                    files.remove(dst_rel);
                }
                PlanAction::Skip { .. } => {}
            }
        }

        index(files.into_values().collect())
    }

    #[test]
    fn cold_run_converts_everything() {
        let sources = vec![src("A/1.flac", 1), src("A/2.flac", 2)];
        let plan = make_plan(&sources, &DestIndex::default(), &Policy::default());
        assert_eq!(kinds(&plan), vec!["convert", "convert"]);
        assert_eq!(plan.actions[0].dst_rel(), "A/1.m4a");
        assert_eq!(plan.actions[1].dst_rel(), "A/2.m4a");
        assert!(matches!(
            plan.actions[0],
            PlanAction::Convert {
                reason: Reason::NoOutput,
                ..
            }
        ));
    }

    #[test]
    fn second_run_is_all_skips() {
        let sources = vec![src("A/1.flac", 1), src("A/2.flac", 2)];
        let dest = index(vec![
            out("A/1.m4a", Some(fp(1, "A/1.flac"))),
            out("A/2.m4a", Some(fp(2, "A/2.flac"))),
        ]);
        let plan = make_plan(&sources, &dest, &Policy::default());
        assert_eq!(kinds(&plan), vec!["skip", "skip"]);
        assert_eq!(plan.effective_len(), 0);
    }

    #[test]
    fn moved_source_is_renamed() {
        let sources = vec![src("A/2.flac", 2), src("B/1.flac", 1)];
        let dest = index(vec![
            out("A/1.m4a", Some(fp(1, "A/1.flac"))),
            out("A/2.m4a", Some(fp(2, "A/2.flac"))),
        ]);
        let plan = make_plan(&sources, &dest, &Policy::default());
        let rename = plan
            .actions
            .iter()
            .find_map(|a| match a {
                PlanAction::Rename {
                    from_rel, to_rel, ..
                } => Some((from_rel.clone(), to_rel.clone())),
                _ => None,
            })
            .expect("one rename");
        assert_eq!(rename, ("A/1.m4a".to_string(), "B/1.m4a".to_string()));
        assert_eq!(plan.count("convert"), 0);
        assert_eq!(plan.count("skip"), 1);
    }

    #[test]
    fn rename_disabled_converts_instead() {
        let sources = vec![src("B/1.flac", 1)];
        let dest = index(vec![out("A/1.m4a", Some(fp(1, "A/1.flac")))]);
        let policy = Policy {
            allow_rename: false,
            prune_orphans: false,
            ..Policy::default()
        };
        let plan = make_plan(&sources, &dest, &policy);
        assert!(matches!(
            plan.actions[0],
            PlanAction::Convert {
                reason: Reason::RenameDisabled,
                ..
            }
        ));
    }

    #[test]
    fn quality_change_reconverts() {
        let sources = vec![src("A/1.flac", 1)];
        let dest = index(vec![out("A/1.m4a", Some(fp(1, "A/1.flac")))]);
        let policy = Policy {
            aac_vbr: 4,
            ..Policy::default()
        };
        let plan = make_plan(&sources, &dest, &policy);
        assert!(matches!(
            plan.actions[0],
            PlanAction::Convert {
                reason: Reason::SettingsMismatch,
                ..
            }
        ));
    }

    #[test]
    fn encoder_change_reconverts() {
        let sources = vec![src("A/1.flac", 1)];
        let dest = index(vec![out("A/1.m4a", Some(fp(1, "A/1.flac")))]);
        let plan = plan_with_encoder(&sources, &dest, EncoderId::Fdkaac);
        assert!(matches!(
            plan.actions[0],
            PlanAction::Convert {
                reason: Reason::SettingsMismatch,
                ..
            }
        ));
    }

    fn plan_with_encoder(sources: &[SourceEntry], dest: &DestIndex, enc: EncoderId) -> Plan {
        plan(sources, dest, &Policy::default(), enc, VERSION)
    }

    #[test]
    fn legacy_at_expected_path_is_adopted_or_overwritten() {
        let sources = vec![src("A/1.flac", 1)];
        let dest = index(vec![out("A/1.m4a", None)]);

        let plan = make_plan(&sources, &dest, &Policy::default());
        assert!(matches!(
            plan.actions[0],
            PlanAction::Retag {
                reason: Reason::AdoptLegacy,
                ..
            }
        ));

        let no_adopt = Policy {
            adopt_legacy: false,
            ..Policy::default()
        };
        let plan = make_plan(&sources, &dest, &no_adopt);
        assert!(matches!(
            plan.actions[0],
            PlanAction::Convert {
                reason: Reason::LegacyNoAdopt,
                ..
            }
        ));
    }

    #[test]
    fn orphan_pruned_only_when_policy_allows() {
        let sources = vec![src("A/1.flac", 1)];
        let dest = index(vec![
            out("A/1.m4a", Some(fp(1, "A/1.flac"))),
            out("Old/gone.m4a", Some(fp(9, "Old/gone.flac"))),
        ]);

        let plan = make_plan(&sources, &dest, &Policy::default());
        assert_eq!(plan.count("prune"), 0);
        assert!(plan.actions.iter().any(|a| matches!(
            a,
            PlanAction::Skip {
                reason: Reason::OrphanRetained,
                ..
            } if a.dst_rel() == "Old/gone.m4a"
        )));

        let pruning = Policy {
            prune_orphans: true,
            ..Policy::default()
        };
        let plan = make_plan(&sources, &dest, &pruning);
        assert_eq!(plan.count("prune"), 1);
    }

    #[test]
    fn unreadable_output_is_never_pruned() {
        let sources: Vec<SourceEntry> = Vec::new();
        let mut broken = out("Bad/file.m4a", None);
        broken.index_error = Some("parse failed".into());
        let dest = index(vec![broken]);
        let policy = Policy {
            prune_orphans: true,
            ..Policy::default()
        };
        let plan = make_plan(&sources, &dest, &policy);
        assert_eq!(plan.count("prune"), 0);
        assert!(matches!(
            plan.actions[0],
            PlanAction::Skip {
                reason: Reason::OrphanUnreadable,
                ..
            }
        ));
    }

    #[test]
    fn case_colliding_sources_get_distinct_folded_paths() {
        let sources = vec![src("A/song.flac", 1), src("a/SONG.flac", 2)];
        let plan = make_plan(&sources, &DestIndex::default(), &Policy::default());
        let targets: Vec<String> = plan
            .actions
            .iter()
            .map(|a| a.dst_rel().to_string())
            .collect();
        assert_eq!(targets[0], "A/song.m4a");
        assert_eq!(targets[1], "a/SONG (2).m4a");
        assert_ne!(
            crate::paths::fold_key(&targets[0]),
            crate::paths::fold_key(&targets[1])
        );
    }

    #[test]
    fn case_only_move_renames_without_suffix() {
        let sources = vec![src("A/Song.flac", 1)];
        let dest = index(vec![out("a/song.m4a", Some(fp(1, "a/song.flac")))]);
        let plan = make_plan(&sources, &dest, &Policy::default());
        match &plan.actions[0] {
            PlanAction::Rename {
                from_rel, to_rel, ..
            } => {
                assert_eq!(from_rel, "a/song.m4a");
                assert_eq!(to_rel, "A/Song.m4a");
            }
            other => panic!("expected rename, got {other:?}"),
        }
    }

    #[test]
    fn case_collision_plan_converges_after_execution() {
        // Cold run over case-colliding sources, then replans over the
        // executed tree: the suffixed output must be matched in place,
        // not renamed one suffix further on every pass.
        let sources = vec![src("A/song.flac", 1), src("a/SONG.flac", 2)];
        let policy = Policy::default();

        let first = make_plan(&sources, &DestIndex::default(), &policy);
        assert_eq!(kinds(&first), vec!["convert", "convert"]);
        assert_eq!(first.actions[0].dst_rel(), "A/song.m4a");
        assert_eq!(first.actions[1].dst_rel(), "a/SONG (2).m4a");

        let dest = executed_state(&first, &DestIndex::default());
        let second = make_plan(&sources, &dest, &policy);
        assert_eq!(
            second.effective_len(),
            0,
            "second plan must be all skips: {:?}",
            second.actions
        );

        let dest = executed_state(&second, &dest);
        let third = make_plan(&sources, &dest, &policy);
        assert_eq!(third.effective_len(), 0, "{:?}", third.actions);
    }

    #[test]
    fn rename_plan_converges_after_execution() {
        let sources = vec![src("B/1.flac", 1)];
        let dest = index(vec![out("A/1.m4a", Some(fp(1, "A/1.flac")))]);

        let first = make_plan(&sources, &dest, &Policy::default());
        assert_eq!(first.count("rename"), 1);

        let dest = executed_state(&first, &dest);
        let second = make_plan(&sources, &dest, &Policy::default());
        assert_eq!(second.effective_len(), 0, "{:?}", second.actions);
    }

    #[test]
    fn plan_is_deterministic() {
        let sources = vec![
            src("A/song.flac", 1),
            src("a/SONG.flac", 2),
            src("B/x.flac", 3),
        ];
        let dest = index(vec![
            out("B/x.m4a", Some(fp(3, "B/x.flac"))),
            out("Old/gone.m4a", Some(fp(9, "Old/gone.flac"))),
        ]);
        let policy = Policy {
            prune_orphans: true,
            ..Policy::default()
        };
        let a = make_plan(&sources, &dest, &policy);
        let b = make_plan(&sources, &dest, &policy);
        let fmt = |p: &Plan| {
            p.actions
                .iter()
                .map(|x| format!("{x:?}"))
                .collect::<Vec<_>>()
        };
        assert_eq!(fmt(&a), fmt(&b));
    }

    #[test]
    fn force_reencode_converts_all() {
        let sources = vec![src("A/1.flac", 1), src("A/2.flac", 2)];
        let dest = index(vec![
            out("A/1.m4a", Some(fp(1, "A/1.flac"))),
            out("A/2.m4a", Some(fp(2, "A/2.flac"))),
        ]);
        let policy = Policy {
            force_reencode: true,
            ..Policy::default()
        };
        let plan = make_plan(&sources, &dest, &policy);
        assert_eq!(kinds(&plan), vec!["convert", "convert"]);
        assert!(plan
            .actions
            .iter()
            .all(|a| matches!(a, PlanAction::Convert { reason: Reason::Forced, .. })));
    }

    #[test]
    fn stale_stamp_triggers_retag_not_convert() {
        let sources = vec![src("A/1.flac", 1)];
        let mut old = fp(1, "A/1.flac");
        old.version = "0.5.0".into();
        let dest = index(vec![out("A/1.m4a", Some(old))]);
        let plan = make_plan(&sources, &dest, &Policy::default());
        assert!(matches!(
            plan.actions[0],
            PlanAction::Retag {
                reason: Reason::StampStale,
                ..
            }
        ));

        // With stamp refresh off it stays a plain skip.
        let mut old = fp(1, "A/1.flac");
        old.version = "0.5.0".into();
        let dest = index(vec![out("A/1.m4a", Some(old))]);
        let policy = Policy {
            retag_existing: false,
            ..Policy::default()
        };
        let plan = make_plan(&sources, &dest, &policy);
        assert_eq!(kinds(&plan), vec!["skip"]);
    }

    #[test]
    fn swapped_content_at_path_converts() {
        // Output at the expected path is fingerprinted for other content.
        let sources = vec![src("A/1.flac", 1)];
        let dest = index(vec![out("A/1.m4a", Some(fp(7, "Other/x.flac")))]);
        let plan = make_plan(&sources, &dest, &Policy::default());
        assert!(matches!(
            plan.actions[0],
            PlanAction::Convert {
                reason: Reason::ContentChanged,
                ..
            }
        ));
    }

    #[test]
    fn weak_identity_skips_newer_matching_output() {
        let sources = vec![src_no_md5("A/1.flac")]; // mtime 1_000_000
        let dest = index(vec![out("A/1.m4a", Some(fp(1, "A/1.flac")))]); // mtime 2_000_000
        let plan = make_plan(&sources, &dest, &Policy::default());
        assert!(matches!(
            plan.actions[0],
            PlanAction::Skip {
                reason: Reason::WeakUpToDate,
                ..
            }
        ));

        // Older output cannot be presumed current.
        let mut stale = out("A/1.m4a", Some(fp(1, "A/1.flac")));
        stale.mtime_ns = 500;
        let dest = index(vec![stale]);
        let plan = make_plan(&sources, &dest, &Policy::default());
        assert!(matches!(
            plan.actions[0],
            PlanAction::Convert {
                reason: Reason::WeakStale,
                ..
            }
        ));
    }

    #[test]
    fn duplicate_content_sources_each_get_an_output() {
        // Same audio under two paths: one matching output exists.
        let sources = vec![src("A/1.flac", 1), src("Copy/1.flac", 1)];
        let dest = index(vec![out("A/1.m4a", Some(fp(1, "A/1.flac")))]);
        let plan = make_plan(&sources, &dest, &Policy::default());
        assert_eq!(kinds(&plan), vec!["skip", "convert"]);
        assert_eq!(plan.actions[1].dst_rel(), "Copy/1.m4a");
    }

    #[test]
    fn duplicate_md5_outputs_break_ties_lexicographically() {
        let sources = vec![src("New/1.flac", 1)];
        let dest = index(vec![
            out("Z/dup.m4a", Some(fp(1, "Old/1.flac"))),
            out("B/dup.m4a", Some(fp(1, "Old/1.flac"))),
        ]);
        let plan = make_plan(&sources, &dest, &Policy::default());
        match &plan.actions[0] {
            PlanAction::Rename { from_rel, .. } => assert_eq!(from_rel, "B/dup.m4a"),
            other => panic!("expected rename, got {other:?}"),
        }
    }

    #[test]
    fn sanitized_paths_never_collide_silently() {
        // Distinct sources that sanitise to the same name get suffixes.
        let sources = vec![src("A/x?.flac", 1), src("A/x*.flac", 2)];
        let plan = make_plan(&sources, &DestIndex::default(), &Policy::default());
        let targets: Vec<&str> = plan.actions.iter().map(|a| a.dst_rel()).collect();
        assert_eq!(targets[0], "A/x_.m4a");
        assert_eq!(targets[1], "A/x_ (2).m4a");
    }
}
