//! The self-describing fingerprint embedded in every output.
//!
//! Wire format (stable):
//! - MP4 `.m4a`: freeform atoms with mean `org.pac` and names `src_md5`,
//!   `encoder`, `quality`, `version`, `source_rel`; UTF-8 values.
//! - Opus `.opus`: Vorbis comments `PAC_SRC_MD5`, `PAC_ENCODER`,
//!   `PAC_QUALITY`, `PAC_VERSION`, `PAC_SOURCE_REL`.
//!
//! `src_md5` is 32-char lowercase hex, `quality` a base-10 integer string,
//! `source_rel` the source-relative path with forward slashes. An output
//! missing any of the five fields is legacy.

use std::borrow::Cow;
use std::fs::File;
use std::path::Path;

use lofty::config::{ParseOptions, WriteOptions};
use lofty::file::AudioFile;
use lofty::mp4::{Atom, AtomData, AtomIdent, Ilst, Mp4File};
use lofty::ogg::{OpusFile, VorbisComments};
use lofty::tag::TagExt;
use thiserror::Error;

pub const MP4_MEAN: &str = "org.pac";
pub const MP4_NAMES: [&str; 5] = ["src_md5", "encoder", "quality", "version", "source_rel"];
pub const VORBIS_KEYS: [&str; 5] = [
    "PAC_SRC_MD5",
    "PAC_ENCODER",
    "PAC_QUALITY",
    "PAC_VERSION",
    "PAC_SOURCE_REL",
];

/// Output container flavour, derived from the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Container {
    Mp4,
    Opus,
}

impl Container {
    /// Flavour from the file name; `.part` sidecars resolve to the flavour
    /// of the output they will become.
    pub fn from_path(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_string_lossy().to_lowercase();
        let name = name.strip_suffix(".part").unwrap_or(&name);
        if name.ends_with(".m4a") || name.ends_with(".mp4") {
            Some(Container::Mp4)
        } else if name.ends_with(".opus") {
            Some(Container::Opus)
        } else {
            None
        }
    }
}

#[derive(Debug, Error)]
pub enum FingerprintError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("container parse failed: {0}")]
    Parse(String),
    #[error("tag write failed: {0}")]
    Write(String),
}

/// The embedded 5-tuple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    /// Hex of the source STREAMINFO MD5 at encode time.
    pub src_md5: String,
    /// Normalised encoder identifier, e.g. `libfdk_aac`.
    pub encoder: String,
    /// Quality setting as a decimal string.
    pub quality: String,
    /// Version of the tool that wrote the output.
    pub version: String,
    /// Source-relative path at encode time, forward slashes.
    pub source_rel: String,
}

impl Fingerprint {
    /// A fingerprint is well-formed only with a plausible content digest.
    fn is_valid(&self) -> bool {
        self.src_md5.len() == 32
            && self
                .src_md5
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
    }

    fn fields(&self) -> [&str; 5] {
        [
            &self.src_md5,
            &self.encoder,
            &self.quality,
            &self.version,
            &self.source_rel,
        ]
    }

    /// Write the five fields into an MP4 ilst, replacing prior values.
    pub fn apply_to_ilst(&self, ilst: &mut Ilst) {
        for (name, value) in MP4_NAMES.iter().zip(self.fields()) {
            ilst.insert(Atom::new(
                freeform_ident(name),
                AtomData::UTF8(value.to_string()),
            ));
        }
    }

    /// Write the five fields into a Vorbis comment block, replacing prior
    /// values.
    pub fn apply_to_vorbis(&self, comments: &mut VorbisComments) {
        for (key, value) in VORBIS_KEYS.iter().zip(self.fields()) {
            comments.remove(key).for_each(drop);
            comments.push((*key).to_string(), value.to_string());
        }
    }
}

fn freeform_ident(name: &str) -> AtomIdent<'static> {
    AtomIdent::Freeform {
        mean: Cow::Borrowed(MP4_MEAN),
        name: Cow::Owned(name.to_string()),
    }
}

fn atom_utf8(ilst: &Ilst, name: &str) -> Option<String> {
    let atom = ilst.get(&freeform_ident(name))?;
    atom.data().find_map(|d| match d {
        AtomData::UTF8(s) => Some(s.clone()),
        _ => None,
    })
}

fn from_parts(parts: [Option<String>; 5]) -> Option<Fingerprint> {
    let [src_md5, encoder, quality, version, source_rel] = parts;
    let fp = Fingerprint {
        src_md5: src_md5?,
        encoder: encoder?,
        quality: quality?,
        version: version?,
        source_rel: source_rel?,
    };
    fp.is_valid().then_some(fp)
}

/// Extract the fingerprint from an already-parsed ilst.
pub fn from_ilst(ilst: &Ilst) -> Option<Fingerprint> {
    from_parts(MP4_NAMES.map(|name| atom_utf8(ilst, name)))
}

/// Extract the fingerprint from an already-parsed Vorbis comment block.
pub fn from_vorbis(comments: &VorbisComments) -> Option<Fingerprint> {
    from_parts(VORBIS_KEYS.map(|key| comments.get(key).map(str::to_string)))
}

/// Read the fingerprint embedded in an output file.
///
/// `Ok(None)` means the file parsed but carries no complete fingerprint
/// (legacy). Parse failures are errors so the caller can tag the entry.
pub fn read_fingerprint(path: &Path) -> Result<Option<Fingerprint>, FingerprintError> {
    let container = Container::from_path(path)
        .ok_or_else(|| FingerprintError::Parse(format!("unsupported container: {}", path.display())))?;
    let mut file = File::open(path)?;
    match container {
        Container::Mp4 => {
            let mp4 = Mp4File::read_from(&mut file, ParseOptions::new())
                .map_err(|e| FingerprintError::Parse(e.to_string()))?;
            Ok(mp4.ilst().and_then(from_ilst))
        }
        Container::Opus => {
            let opus = OpusFile::read_from(&mut file, ParseOptions::new())
                .map_err(|e| FingerprintError::Parse(e.to_string()))?;
            Ok(from_vorbis(opus.vorbis_comments()))
        }
    }
}

/// Stamp a fingerprint onto an existing output file, preserving its other
/// tags.
pub fn write_fingerprint(path: &Path, fp: &Fingerprint) -> Result<(), FingerprintError> {
    let container = Container::from_path(path)
        .ok_or_else(|| FingerprintError::Parse(format!("unsupported container: {}", path.display())))?;
    let mut file = File::open(path)?;
    match container {
        Container::Mp4 => {
            let mp4 = Mp4File::read_from(&mut file, ParseOptions::new())
                .map_err(|e| FingerprintError::Parse(e.to_string()))?;
            let mut ilst = mp4.ilst().cloned().unwrap_or_default();
            fp.apply_to_ilst(&mut ilst);
            ilst.save_to_path(path, WriteOptions::default())
                .map_err(|e| FingerprintError::Write(e.to_string()))?;
        }
        Container::Opus => {
            let opus = OpusFile::read_from(&mut file, ParseOptions::new())
                .map_err(|e| FingerprintError::Parse(e.to_string()))?;
            let mut comments = opus.vorbis_comments().clone();
            fp.apply_to_vorbis(&mut comments);
            comments
                .save_to_path(path, WriteOptions::default())
                .map_err(|e| FingerprintError::Write(e.to_string()))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Fingerprint {
        Fingerprint {
            src_md5: "0123456789abcdef0123456789abcdef".into(),
            encoder: "libfdk_aac".into(),
            quality: "5".into(),
            version: "0.6.0".into(),
            source_rel: "A/1.flac".into(),
        }
    }

    #[test]
    fn vorbis_round_trip() {
        let mut comments = VorbisComments::default();
        sample().apply_to_vorbis(&mut comments);
        assert_eq!(from_vorbis(&comments), Some(sample()));
    }

    #[test]
    fn vorbis_replaces_prior_values() {
        let mut comments = VorbisComments::default();
        comments.push("PAC_SRC_MD5".into(), "ffffffffffffffffffffffffffffffff".into());
        sample().apply_to_vorbis(&mut comments);
        let fp = from_vorbis(&comments).unwrap();
        assert_eq!(fp.src_md5, sample().src_md5);
    }

    #[test]
    fn ilst_round_trip() {
        let mut ilst = Ilst::default();
        sample().apply_to_ilst(&mut ilst);
        assert_eq!(from_ilst(&ilst), Some(sample()));
    }

    #[test]
    fn missing_field_is_legacy() {
        let mut comments = VorbisComments::default();
        sample().apply_to_vorbis(&mut comments);
        comments.remove("PAC_VERSION").for_each(drop);
        assert_eq!(from_vorbis(&comments), None);
    }

    #[test]
    fn malformed_md5_is_legacy() {
        let mut fp = sample();
        fp.src_md5 = "SHOUTING".into();
        let mut comments = VorbisComments::default();
        fp.apply_to_vorbis(&mut comments);
        assert_eq!(from_vorbis(&comments), None);
    }

    #[test]
    fn container_from_extension() {
        assert_eq!(Container::from_path(Path::new("a/b.m4a")), Some(Container::Mp4));
        assert_eq!(Container::from_path(Path::new("a/b.OPUS")), Some(Container::Opus));
        assert_eq!(Container::from_path(Path::new("a/b.flac")), None);
        assert_eq!(
            Container::from_path(Path::new("a/b.m4a.part")),
            Some(Container::Mp4)
        );
        assert_eq!(Container::from_path(Path::new("a/b.part")), None);
    }
}
