//! Immutable run configuration.
//!
//! The core receives a fully-built [`Policy`] from its caller and never
//! reads command lines, environment variables, or config files itself. The
//! policy is frozen for the whole run; plan decisions depend on it, so
//! mutating it mid-run would break plan determinism.

use serde::Serialize;

/// Target codec for the derivative tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    Aac,
    Opus,
}

impl Codec {
    /// File extension of outputs in this codec, without the dot.
    pub fn extension(&self) -> &'static str {
        match self {
            Codec::Aac => "m4a",
            Codec::Opus => "opus",
        }
    }
}

impl std::fmt::Display for Codec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Codec::Aac => write!(f, "aac"),
            Codec::Opus => write!(f, "opus"),
        }
    }
}

/// Identity of an encoder backend, as recorded in output fingerprints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EncoderId {
    /// libfdk_aac through ffmpeg; accepts FLAC input directly.
    LibfdkAac,
    /// Apple AAC through the qaac CLI; fed PCM WAV over a pipe.
    Qaac,
    /// The standalone fdkaac CLI; fed PCM WAV over a pipe.
    Fdkaac,
    /// libopus through ffmpeg; accepts FLAC input directly.
    Libopus,
}

impl EncoderId {
    /// The normalised identifier written into fingerprints.
    pub fn as_str(&self) -> &'static str {
        match self {
            EncoderId::LibfdkAac => "libfdk_aac",
            EncoderId::Qaac => "qaac",
            EncoderId::Fdkaac => "fdkaac",
            EncoderId::Libopus => "libopus",
        }
    }

    pub fn codec(&self) -> Codec {
        match self {
            EncoderId::Libopus => Codec::Opus,
            _ => Codec::Aac,
        }
    }
}

impl std::fmt::Display for EncoderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// PCM codec used for the decode leg of pipe-fed encoders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PcmCodec {
    PcmS16le,
    PcmS24le,
    PcmS32le,
}

impl PcmCodec {
    pub fn as_str(&self) -> &'static str {
        match self {
            PcmCodec::PcmS16le => "pcm_s16le",
            PcmCodec::PcmS24le => "pcm_s24le",
            PcmCodec::PcmS32le => "pcm_s32le",
        }
    }
}

/// Post-encode verification behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VerifyMode {
    /// No verification pass.
    Off,
    /// Verify and log discrepancies as warnings.
    Warn,
    /// Verify and mark discrepant files failed.
    Strict,
}

/// Cover art handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ArtPolicy {
    /// Downscale images whose longest side exceeds `max_px`.
    pub resize: bool,
    /// Longest-side limit in pixels.
    pub max_px: u32,
}

impl Default for ArtPolicy {
    fn default() -> Self {
        Self {
            resize: true,
            max_px: 1500,
        }
    }
}

/// The immutable run configuration.
///
/// Built once by the caller, passed by reference to the planner and
/// executor.
#[derive(Debug, Clone, Serialize)]
pub struct Policy {
    pub codec: Codec,
    /// Force a specific backend instead of the preference order.
    pub encoder_override: Option<EncoderId>,
    /// libfdk_aac / fdkaac VBR mode 1..=5.
    pub aac_vbr: u32,
    /// qaac true-VBR scale value.
    pub qaac_tvbr: u32,
    /// Opus target bitrate in kbps (VBR).
    pub opus_vbr_kbps: u32,
    /// Worker count; `None` selects `min(physical_cores, 8)`.
    pub workers: Option<usize>,
    /// Read the STREAMINFO MD5 during scan. When off, planning falls back
    /// to the weak size+mtime identity.
    pub use_streaminfo_md5: bool,
    /// Allow Rename actions for moved sources.
    pub allow_rename: bool,
    /// Refresh stale fingerprint stamps (version / source_rel drift) on
    /// otherwise up-to-date outputs.
    pub retag_existing: bool,
    /// Adopt fingerprint-less outputs found at the expected path.
    pub adopt_legacy: bool,
    /// Delete orphaned outputs.
    pub prune_orphans: bool,
    /// Re-encode everything regardless of destination state.
    pub force_reencode: bool,
    /// Also rewrite the standard tag set from the source during Retag.
    pub sync_tags_on_retag: bool,
    /// PCM codec for the decoder leg of pipe chains.
    pub pcm_codec: PcmCodec,
    pub art: ArtPolicy,
    pub verify: VerifyMode,
    /// Probe encoder binaries that may start a compatibility layer
    /// (e.g. qaac under Wine). Off keeps startup side-effect free.
    pub probe_emulated: bool,
    /// Remove directories left empty by Prune.
    pub remove_empty_dirs: bool,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            codec: Codec::Aac,
            encoder_override: None,
            aac_vbr: 5,
            qaac_tvbr: 96,
            opus_vbr_kbps: 160,
            workers: None,
            use_streaminfo_md5: true,
            allow_rename: true,
            retag_existing: true,
            adopt_legacy: true,
            prune_orphans: false,
            force_reencode: false,
            sync_tags_on_retag: false,
            pcm_codec: PcmCodec::PcmS24le,
            art: ArtPolicy::default(),
            verify: VerifyMode::Off,
            probe_emulated: true,
            remove_empty_dirs: false,
        }
    }
}

impl Policy {
    /// Resolved worker count.
    pub fn worker_count(&self) -> usize {
        self.workers
            .unwrap_or_else(|| num_cpus::get_physical().min(8))
            .max(1)
    }

    /// The quality value recorded in fingerprints for a given backend.
    pub fn quality_for(&self, encoder: EncoderId) -> u32 {
        match encoder {
            EncoderId::Qaac => self.qaac_tvbr,
            EncoderId::LibfdkAac | EncoderId::Fdkaac => self.aac_vbr,
            EncoderId::Libopus => self.opus_vbr_kbps,
        }
    }
}
