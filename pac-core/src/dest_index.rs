//! Destination index: derives all reconciliation state from the output
//! files themselves.
//!
//! Walks the destination root for `.m4a` and `.opus` outputs, reads each
//! file's embedded fingerprint, and builds two views:
//!
//! - `by_rel`: destination-relative path → entry (unique)
//! - `by_md5`: source MD5 hex → destination paths, lexicographically
//!   ordered for deterministic tie-breaks
//!
//! Tag reads have no cross-file dependencies, so they fan out over the
//! rayon pool; determinism comes from sorting the walk before dispatch and
//! assembling the maps from the sorted results.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use rayon::prelude::*;
use walkdir::WalkDir;

use crate::fingerprint::{self, Container, Fingerprint};
use crate::scanner::rel_path_str;

/// One existing output file under the destination root.
#[derive(Debug, Clone)]
pub struct OutputEntry {
    /// Path relative to the destination root, `/`-separated.
    pub rel_path: String,
    pub abs_path: PathBuf,
    pub size: u64,
    pub mtime_ns: i128,
    pub container: Container,
    /// Embedded fingerprint; `None` marks a legacy output.
    pub fingerprint: Option<Fingerprint>,
    /// Set when the file could not be opened or parsed; such entries are
    /// legacy but protected from implicit pruning.
    pub index_error: Option<String>,
}

/// Index over everything currently in the destination tree.
#[derive(Debug, Default)]
pub struct DestIndex {
    by_rel: BTreeMap<String, OutputEntry>,
    by_md5: BTreeMap<String, Vec<String>>,
}

impl DestIndex {
    /// Build the index by walking `dest_root`. A missing root yields an
    /// empty index (first run).
    pub fn build(dest_root: &Path) -> Self {
        let mut paths: Vec<PathBuf> = WalkDir::new(dest_root)
            .follow_links(false)
            .sort_by(|a, b| a.file_name().cmp(b.file_name()))
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.path().to_path_buf())
            // Sidecars from an interrupted run are not outputs.
            .filter(|p| !is_part_file(p) && Container::from_path(p).is_some())
            .collect();
        paths.sort();

        let entries: Vec<OutputEntry> = paths
            .par_iter()
            .map(|abs| read_output_entry(dest_root, abs))
            .collect();

        let mut index = DestIndex::default();
        for entry in entries {
            index.insert(entry);
        }
        tracing::debug!(
            outputs = index.by_rel.len(),
            fingerprinted = index.by_md5.values().map(Vec::len).sum::<usize>(),
            "destination index built"
        );
        index
    }

    pub(crate) fn insert(&mut self, entry: OutputEntry) {
        if let Some(fp) = &entry.fingerprint {
            let slots = self.by_md5.entry(fp.src_md5.clone()).or_default();
            // Walk results arrive sorted, but keep the invariant locally.
            match slots.binary_search(&entry.rel_path) {
                Ok(_) => {}
                Err(pos) => slots.insert(pos, entry.rel_path.clone()),
            }
        }
        self.by_rel.insert(entry.rel_path.clone(), entry);
    }

    pub fn by_rel(&self, rel: &str) -> Option<&OutputEntry> {
        self.by_rel.get(rel)
    }

    /// Destination paths carrying this source digest, lexicographically
    /// ordered.
    pub fn by_md5(&self, md5_hex: &str) -> &[String] {
        self.by_md5.get(md5_hex).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn entries(&self) -> impl Iterator<Item = &OutputEntry> {
        self.by_rel.values()
    }

    pub fn len(&self) -> usize {
        self.by_rel.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_rel.is_empty()
    }
}

fn is_part_file(path: &Path) -> bool {
    path.extension().map(|e| e == "part").unwrap_or(false)
}

fn read_output_entry(dest_root: &Path, abs: &Path) -> OutputEntry {
    let rel_path = rel_path_str(dest_root, abs);
    let container = Container::from_path(abs).unwrap_or(Container::Mp4);

    let (size, mtime_ns) = match std::fs::metadata(abs) {
        Ok(meta) => {
            let mtime = meta
                .modified()
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_nanos() as i128)
                .unwrap_or(0);
            (meta.len(), mtime)
        }
        Err(_) => (0, 0),
    };

    let (fingerprint, index_error) = match fingerprint::read_fingerprint(abs) {
        Ok(fp) => (fp, None),
        Err(e) => {
            tracing::warn!(file = %rel_path, error = %e, "unreadable output treated as legacy");
            (None, Some(e.to_string()))
        }
    };

    OutputEntry {
        rel_path,
        abs_path: abs.to_path_buf(),
        size,
        mtime_ns,
        container,
        fingerprint,
        index_error,
    }
}
