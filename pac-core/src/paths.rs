//! Destination path mapping: sanitisation and collision resolution.
//!
//! Relative paths use forward slashes internally regardless of platform.
//! Sanitised names must survive Windows/exFAT/SMB volumes, and collision
//! checks are case-folded so outputs stay unique on case-insensitive
//! filesystems even though the in-memory representation preserves case.

use std::collections::HashSet;
use unicode_normalization::UnicodeNormalization;

/// Per-segment length cap; common filesystems limit names to 255 bytes.
const MAX_SEGMENT_LEN: usize = 255;

/// Bytes that are reserved on at least one target filesystem.
fn is_reserved(c: char) -> bool {
    matches!(c, '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|') || (c as u32) < 0x20 || c == '\u{7f}'
}

/// Sanitise one path segment.
///
/// NFC-normalises, replaces reserved and control characters with `_`,
/// collapses runs of underscores, trims trailing spaces and dots, and caps
/// the length while preserving `preserve_ext` when given.
pub fn sanitize_segment(name: &str, preserve_ext: Option<&str>) -> String {
    let mut s: String = name
        .nfc()
        .map(|c| if is_reserved(c) { '_' } else { c })
        .collect();

    // Collapse consecutive underscores introduced by replacement.
    let mut collapsed = String::with_capacity(s.len());
    let mut prev_underscore = false;
    for c in s.chars() {
        if c == '_' {
            if !prev_underscore {
                collapsed.push(c);
            }
            prev_underscore = true;
        } else {
            collapsed.push(c);
            prev_underscore = false;
        }
    }
    s = collapsed;

    let trimmed = s.trim_end_matches([' ', '.']);
    let mut out = if trimmed.is_empty() {
        "_".to_string()
    } else {
        trimmed.to_string()
    };

    if out.len() > MAX_SEGMENT_LEN {
        match preserve_ext {
            Some(ext) if out.to_lowercase().ends_with(&ext.to_lowercase()) && ext.len() < MAX_SEGMENT_LEN => {
                let base_len = MAX_SEGMENT_LEN - ext.len();
                let cut = floor_char_boundary(&out, base_len);
                out = format!("{}{}", &out[..cut], ext);
            }
            _ => {
                let cut = floor_char_boundary(&out, MAX_SEGMENT_LEN);
                out.truncate(cut);
            }
        }
    }
    out
}

fn floor_char_boundary(s: &str, index: usize) -> usize {
    let mut i = index.min(s.len());
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

/// Map a source-relative path to a sanitised destination-relative path with
/// the codec extension applied to the final segment.
///
/// Input and output both use `/` separators.
pub fn sanitize_rel_path(rel: &str, extension: &str) -> String {
    let segments: Vec<&str> = rel.split('/').filter(|s| !s.is_empty()).collect();
    let last = segments.len().saturating_sub(1);
    let ext_with_dot = format!(".{extension}");

    segments
        .iter()
        .enumerate()
        .map(|(i, seg)| {
            if i == last {
                let stem = match seg.rfind('.') {
                    Some(dot) if dot > 0 => &seg[..dot],
                    _ => seg,
                };
                sanitize_segment(&format!("{stem}{ext_with_dot}"), Some(&ext_with_dot))
            } else {
                sanitize_segment(seg, None)
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Case-folded, NFC-normalised comparison key for a relative path.
pub fn fold_key(rel: &str) -> String {
    rel.nfc().collect::<String>().to_lowercase()
}

/// Assigns final destination paths, suffixing ` (2)`, ` (3)`, … on
/// case-folded collisions.
///
/// Two sets back the resolver: paths already present in the destination
/// tree that the current plan does not reuse or supersede, and paths the
/// plan has already assigned. Both are keyed by [`fold_key`], and sources
/// must be offered in sorted order for the suffix assignment to be
/// deterministic.
pub struct CollisionResolver {
    taken_existing: HashSet<String>,
    taken_planned: HashSet<String>,
}

impl CollisionResolver {
    pub fn new() -> Self {
        Self {
            taken_existing: HashSet::new(),
            taken_planned: HashSet::new(),
        }
    }

    /// Register a destination path that already exists on disk.
    pub fn reserve_existing(&mut self, rel: &str) {
        self.taken_existing.insert(fold_key(rel));
    }

    /// Drop an existing-path reservation: the plan will reuse or supersede
    /// this slot (overwrite in place, adopt, or move the file away), so a
    /// candidate mapping onto it is not a collision. Works for any
    /// superseded path, suffixed outputs from earlier runs included —
    /// releasing those is what lets a replan land back on the suffix an
    /// output already carries instead of escalating it.
    pub fn release_existing(&mut self, rel: &str) {
        self.taken_existing.remove(&fold_key(rel));
    }

    pub fn is_taken(&self, rel: &str) -> bool {
        let key = fold_key(rel);
        self.taken_existing.contains(&key) || self.taken_planned.contains(&key)
    }

    /// Resolve `candidate` to a unique destination path and claim it.
    pub fn assign(&mut self, candidate: &str) -> String {
        let mut chosen = candidate.to_string();
        if self.is_taken(&chosen) {
            let (parent, name) = match candidate.rfind('/') {
                Some(i) => (&candidate[..=i], &candidate[i + 1..]),
                None => ("", candidate),
            };
            let (stem, ext) = match name.rfind('.') {
                Some(dot) if dot > 0 => (&name[..dot], &name[dot..]),
                _ => (name, ""),
            };
            let mut n = 2u32;
            loop {
                let suffixed = sanitize_segment(&format!("{stem} ({n}){ext}"), Some(ext));
                let attempt = format!("{parent}{suffixed}");
                if !self.is_taken(&attempt) {
                    chosen = attempt;
                    break;
                }
                n += 1;
            }
        }
        self.taken_planned.insert(fold_key(&chosen));
        chosen
    }
}

impl Default for CollisionResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replaces_reserved_characters() {
        assert_eq!(sanitize_segment("a:b*c?", None), "a_b_c_");
        assert_eq!(sanitize_segment("he said \"hi\"", None), "he said _hi_");
        assert_eq!(sanitize_segment("tab\tname", None), "tab_name");
    }

    #[test]
    fn collapses_underscore_runs() {
        assert_eq!(sanitize_segment("a<<>>b", None), "a_b");
    }

    #[test]
    fn trims_trailing_dots_and_spaces() {
        assert_eq!(sanitize_segment("Album. ", None), "Album");
        assert_eq!(sanitize_segment("...", None), "_");
    }

    #[test]
    fn empty_segment_becomes_underscore() {
        assert_eq!(sanitize_segment("", None), "_");
    }

    #[test]
    fn long_segment_keeps_extension() {
        let name = format!("{}{}", "x".repeat(300), ".m4a");
        let out = sanitize_segment(&name, Some(".m4a"));
        assert_eq!(out.len(), 255);
        assert!(out.ends_with(".m4a"));
    }

    #[test]
    fn rel_path_swaps_extension() {
        assert_eq!(sanitize_rel_path("A/B/track.flac", "m4a"), "A/B/track.m4a");
        assert_eq!(sanitize_rel_path("A/track.flac", "opus"), "A/track.opus");
    }

    #[test]
    fn rel_path_sanitizes_every_segment() {
        assert_eq!(
            sanitize_rel_path("Bad:Dir/We|rd?.flac", "m4a"),
            "Bad_Dir/We_rd_.m4a"
        );
    }

    #[test]
    fn dotfile_name_is_treated_as_stem() {
        // A leading dot is not an extension separator.
        assert_eq!(sanitize_rel_path(".hidden", "m4a"), ".hidden.m4a");
    }

    #[test]
    fn fold_key_is_case_insensitive() {
        assert_eq!(fold_key("A/Song.m4a"), fold_key("a/SONG.M4A"));
    }

    #[test]
    fn collision_suffixes_case_folded_duplicates() {
        let mut r = CollisionResolver::new();
        let first = r.assign("A/song.m4a");
        let second = r.assign("a/SONG.m4a");
        assert_eq!(first, "A/song.m4a");
        assert_eq!(second, "a/SONG (2).m4a");
        let third = r.assign("A/Song.m4a");
        assert_eq!(third, "A/Song (3).m4a");
    }

    #[test]
    fn collision_against_existing_until_released() {
        let mut r = CollisionResolver::new();
        r.reserve_existing("A/track.m4a");
        assert_eq!(r.assign("a/TRACK.m4a"), "a/TRACK (2).m4a");

        let mut r = CollisionResolver::new();
        r.reserve_existing("A/track.m4a");
        r.release_existing("A/track.m4a");
        assert_eq!(r.assign("A/track.m4a"), "A/track.m4a");
    }

    #[test]
    fn nfc_and_nfd_fold_to_same_key() {
        // "é" composed vs decomposed
        assert_eq!(fold_key("caf\u{e9}.m4a"), fold_key("cafe\u{301}.m4a"));
    }

    #[test]
    fn released_suffixed_slot_is_reassigned_not_escalated() {
        // Replanning over a tree that already holds a base name and its
        // " (2)" sibling: each slot is released as its owner claims it,
        // and the second candidate settles on the suffix it already has.
        let mut r = CollisionResolver::new();
        r.reserve_existing("A/song.m4a");
        r.reserve_existing("a/SONG (2).m4a");

        r.release_existing("A/song.m4a");
        assert_eq!(r.assign("A/song.m4a"), "A/song.m4a");

        r.release_existing("a/SONG (2).m4a");
        assert_eq!(r.assign("a/SONG.m4a"), "a/SONG (2).m4a");
    }
}
