//! Source tree scanner.
//!
//! Walks the lossless source root depth-first with byte-wise sorted
//! directory entries, emitting one [`SourceEntry`] per `.flac` file. The
//! content identity is the STREAMINFO audio-MD5, read from the FLAC header
//! without touching audio frames; when the header is missing, truncated, or
//! carries the all-zero sentinel, the entry falls back to the weak
//! size+mtime identity.
//!
//! The walk is a lazy iterator: producer memory stays O(1) no matter how
//! large the tree is. Per-file I/O errors mark the entry instead of
//! aborting the scan.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use walkdir::WalkDir;

/// 16-byte STREAMINFO audio-MD5.
pub type AudioMd5 = [u8; 16];

/// One discovered lossless source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceEntry {
    /// Path relative to the source root, `/`-separated.
    pub rel_path: String,
    /// Absolute path on disk.
    pub abs_path: PathBuf,
    pub size: u64,
    pub mtime_ns: i128,
    /// STREAMINFO MD5; `None` when unset, unreadable, or disabled by policy.
    pub audio_md5: Option<AudioMd5>,
    /// Set when stat or header read failed; the planner treats the entry as
    /// weak-identity.
    pub scan_error: Option<String>,
}

impl SourceEntry {
    /// Lowercase hex of the audio MD5, the form used in fingerprints.
    pub fn audio_md5_hex(&self) -> Option<String> {
        self.audio_md5.as_ref().map(|d| md5_hex(d))
    }
}

pub fn md5_hex(digest: &AudioMd5) -> String {
    let mut s = String::with_capacity(32);
    for b in digest {
        use std::fmt::Write;
        let _ = write!(s, "{b:02x}");
    }
    s
}

/// Scanner over a source root.
pub struct SourceScanner {
    root: PathBuf,
    read_streaminfo: bool,
}

impl SourceScanner {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            read_streaminfo: true,
        }
    }

    /// Disable STREAMINFO reads; entries carry only the weak identity.
    pub fn with_streaminfo(mut self, enabled: bool) -> Self {
        self.read_streaminfo = enabled;
        self
    }

    /// Lazily iterate source entries in deterministic walk order.
    pub fn iter(&self) -> impl Iterator<Item = SourceEntry> + '_ {
        let root = self.root.clone();
        let read_md5 = self.read_streaminfo;
        WalkDir::new(&self.root)
            .follow_links(false)
            .sort_by(|a, b| a.file_name().cmp(b.file_name()))
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_hidden(e.file_name()))
            .filter_map(move |entry| {
                let entry = match entry {
                    Ok(e) => e,
                    Err(e) => {
                        tracing::warn!("error walking source tree: {e}");
                        return None;
                    }
                };
                if !entry.file_type().is_file() || !has_flac_extension(entry.path()) {
                    return None;
                }
                Some(read_entry(&root, entry.path(), read_md5))
            })
    }

    /// Collect all entries sorted by `rel_path`, the order the planner
    /// consumes.
    pub fn scan_sorted(&self) -> Vec<SourceEntry> {
        let mut entries: Vec<SourceEntry> = self.iter().collect();
        entries.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
        entries
    }
}

/// Build a [`SourceEntry`] for a single known file, for callers converting
/// one file outside a tree walk.
pub fn scan_file(root: &Path, abs: &Path, read_streaminfo: bool) -> SourceEntry {
    read_entry(root, abs, read_streaminfo)
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_string_lossy().starts_with('.')
}

fn has_flac_extension(path: &Path) -> bool {
    path.extension()
        .map(|e| e.to_string_lossy().eq_ignore_ascii_case("flac"))
        .unwrap_or(false)
}

/// Relative path with forward slashes, platform-independent.
pub fn rel_path_str(root: &Path, abs: &Path) -> String {
    let rel = abs.strip_prefix(root).unwrap_or(abs);
    let mut out = String::new();
    for comp in rel.components() {
        if !out.is_empty() {
            out.push('/');
        }
        out.push_str(&comp.as_os_str().to_string_lossy());
    }
    out
}

fn read_entry(root: &Path, abs: &Path, read_md5: bool) -> SourceEntry {
    let rel_path = rel_path_str(root, abs);
    let (size, mtime_ns, stat_err) = match std::fs::metadata(abs) {
        Ok(meta) => {
            let mtime = meta
                .modified()
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_nanos() as i128)
                .unwrap_or(0);
            (meta.len(), mtime, None)
        }
        Err(e) => (0, 0, Some(format!("stat failed: {e}"))),
    };

    let (audio_md5, md5_err) = if read_md5 && stat_err.is_none() {
        match read_streaminfo_md5(abs) {
            Ok(md5) => (md5, None),
            Err(e) => (None, Some(format!("streaminfo read failed: {e}"))),
        }
    } else {
        (None, None)
    };

    let scan_error = stat_err.or(md5_err);
    if let Some(err) = &scan_error {
        tracing::warn!(file = %rel_path, error = %err, "scan error; using weak identity");
    }

    SourceEntry {
        rel_path,
        abs_path: abs.to_path_buf(),
        size,
        mtime_ns,
        audio_md5,
        scan_error,
    }
}

/// Read the STREAMINFO audio-MD5 from a FLAC header.
///
/// Parses metadata block headers only; never reads audio frames. Returns
/// `Ok(None)` for non-FLAC signatures, missing or short STREAMINFO blocks,
/// and the all-zero sentinel that the format defines as "MD5 unset".
pub fn read_streaminfo_md5(path: &Path) -> std::io::Result<Option<AudioMd5>> {
    let mut f = File::open(path)?;

    let mut sig = [0u8; 4];
    if f.read_exact(&mut sig).is_err() || &sig != b"fLaC" {
        return Ok(None);
    }

    loop {
        let mut header = [0u8; 4];
        if f.read_exact(&mut header).is_err() {
            return Ok(None);
        }
        let last = header[0] & 0x80 != 0;
        let block_type = header[0] & 0x7f;
        let length = u32::from_be_bytes([0, header[1], header[2], header[3]]) as usize;

        if block_type == 0 {
            // STREAMINFO: fixed 34-byte payload, MD5 in the last 16 bytes.
            if length < 34 {
                return Ok(None);
            }
            let mut payload = vec![0u8; length];
            if f.read_exact(&mut payload).is_err() {
                return Ok(None);
            }
            let mut md5 = [0u8; 16];
            md5.copy_from_slice(&payload[length - 16..]);
            if md5 == [0u8; 16] {
                return Ok(None);
            }
            return Ok(Some(md5));
        }

        if last {
            return Ok(None);
        }
        // Skip over non-STREAMINFO blocks without buffering them.
        std::io::copy(&mut (&mut f).take(length as u64), &mut std::io::sink())?;
    }
}
