//! Command-line definitions.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "pac", version, about = "Mirror a FLAC library into AAC or Opus")]
pub struct Cli {
    /// Console log level (error, warn, info, debug, trace)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Config file path (default: ~/.config/pac/pac.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub cmd: Commands,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CodecArg {
    Aac,
    Opus,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum VerifyArg {
    Off,
    Warn,
    Strict,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Check encoder availability and report what a run would use
    Preflight {
        #[arg(long, value_enum)]
        codec: Option<CodecArg>,

        /// Skip probing encoders that may start a compatibility layer
        #[arg(long)]
        no_probe_emulated: bool,
    },

    /// Convert a single file
    Convert {
        /// Input lossless file
        src: PathBuf,
        /// Output path; the extension picks the codec (.m4a or .opus)
        dest: PathBuf,

        /// qaac true-VBR quality
        #[arg(long)]
        tvbr: Option<u32>,

        /// libfdk_aac / fdkaac VBR mode 1..=5
        #[arg(long)]
        vbr: Option<u32>,

        /// Opus target bitrate in kbps
        #[arg(long)]
        opus_vbr_kbps: Option<u32>,
    },

    /// Reconcile a whole source tree into a destination tree
    ConvertDir {
        /// Source directory containing .flac files
        #[arg(long = "in", value_name = "DIR")]
        in_dir: PathBuf,

        /// Destination root for encoded outputs
        #[arg(long = "out", value_name = "DIR")]
        out_dir: PathBuf,

        #[arg(long, value_enum)]
        codec: Option<CodecArg>,

        /// qaac true-VBR quality (~256 kbps at 96)
        #[arg(long)]
        tvbr: Option<u32>,

        /// libfdk_aac / fdkaac VBR mode 1..=5
        #[arg(long)]
        vbr: Option<u32>,

        /// Opus target bitrate in kbps
        #[arg(long)]
        opus_vbr_kbps: Option<u32>,

        /// Parallel workers (default: min(physical cores, 8))
        #[arg(long)]
        workers: Option<usize>,

        /// Skip STREAMINFO digests; fall back to size+mtime identity
        #[arg(long)]
        no_hash: bool,

        /// Re-encode everything regardless of destination state
        #[arg(long)]
        force_reencode: bool,

        /// Never move existing outputs to follow source renames
        #[arg(long)]
        no_rename: bool,

        /// Never refresh stale fingerprint stamps
        #[arg(long)]
        no_retag: bool,

        /// Delete destination files with no matching source
        #[arg(long)]
        prune: bool,

        /// Overwrite fingerprint-less outputs instead of adopting them
        #[arg(long)]
        no_adopt: bool,

        /// Also rewrite standard tags when adopting legacy outputs
        #[arg(long)]
        sync_tags: bool,

        /// PCM codec for the decode pipe (pcm_s16le, pcm_s24le, pcm_s32le)
        #[arg(long)]
        pcm_codec: Option<String>,

        /// Post-encode verification mode
        #[arg(long, value_enum)]
        verify: Option<VerifyArg>,

        /// Keep oversized cover art at its original size
        #[arg(long)]
        no_art_resize: bool,

        /// Longest-side limit for embedded cover art, in pixels
        #[arg(long)]
        art_max_size: Option<u32>,

        /// Print the plan and exit without touching anything
        #[arg(long)]
        dry_run: bool,

        /// Write the run summary JSON to this path instead of the
        /// destination root
        #[arg(long)]
        summary: Option<PathBuf>,
    },
}
