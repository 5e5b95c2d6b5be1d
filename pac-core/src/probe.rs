//! Encoder preflight: probe the external binaries once per run and freeze
//! one backend.
//!
//! The selection feeds every fingerprint written during the run, and the
//! planner re-encodes on backend identity changes, so the choice must be
//! stable for the whole run. Preference order for AAC: libfdk_aac inside
//! ffmpeg, then qaac, then fdkaac; Opus always uses libopus inside ffmpeg.
//! A policy override pins a specific backend instead.

use std::path::PathBuf;
use std::process::{Command, Stdio};

use crate::error::{Error, Result};
use crate::policy::{Codec, EncoderId, Policy};

/// Probe result for the ffmpeg binary.
#[derive(Debug, Clone)]
pub struct FfmpegProbe {
    pub path: PathBuf,
    pub version: Option<String>,
    pub has_libfdk_aac: bool,
    pub has_libopus: bool,
}

/// Probe result for a standalone encoder CLI.
#[derive(Debug, Clone)]
pub struct CliProbe {
    pub path: PathBuf,
    pub version: Option<String>,
}

/// Everything preflight discovered.
#[derive(Debug, Clone, Default)]
pub struct BackendSet {
    pub ffmpeg: Option<FfmpegProbe>,
    pub qaac: Option<CliProbe>,
    pub fdkaac: Option<CliProbe>,
}

/// The frozen per-run backend.
#[derive(Debug, Clone)]
pub struct Backend {
    pub id: EncoderId,
    pub ffmpeg: FfmpegProbe,
    /// Set for pipe-fed CLIs (qaac, fdkaac).
    pub cli: Option<CliProbe>,
}

impl Backend {
    /// Human-readable identity for the run summary.
    pub fn describe(&self) -> String {
        match &self.cli {
            Some(cli) => format!("{} ({})", self.id, cli.path.display()),
            None => format!("{} (ffmpeg: {})", self.id, self.ffmpeg.path.display()),
        }
    }
}

fn run_capture(program: &str, args: &[&str]) -> Option<(i32, String)> {
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .ok()?;
    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&output.stderr));
    Some((output.status.code().unwrap_or(-1), text))
}

fn probe_ffmpeg() -> Option<FfmpegProbe> {
    let (code, version_out) = run_capture("ffmpeg", &["-version"])?;
    if code != 0 {
        return None;
    }
    let version = version_out.lines().next().map(str::to_string);

    let encoders = run_capture("ffmpeg", &["-hide_banner", "-encoders"])
        .map(|(_, out)| out)
        .unwrap_or_default();

    Some(FfmpegProbe {
        path: PathBuf::from("ffmpeg"),
        version,
        has_libfdk_aac: encoders.contains("libfdk_aac"),
        has_libopus: encoders.contains("libopus"),
    })
}

fn probe_qaac() -> Option<CliProbe> {
    // qaac prints its banner to stderr on --check and exits zero.
    let (code, out) = run_capture("qaac", &["--check"])?;
    if code != 0 {
        return None;
    }
    Some(CliProbe {
        path: PathBuf::from("qaac"),
        version: out.lines().next().map(str::to_string),
    })
}

fn probe_fdkaac() -> Option<CliProbe> {
    // fdkaac has no version flag; the usage banner carries the version and
    // the tool exits non-zero without arguments.
    let (_, out) = run_capture("fdkaac", &["--help"])?;
    let version = out
        .lines()
        .find(|l| l.to_ascii_lowercase().contains("fdkaac"))
        .map(str::to_string);
    Some(CliProbe {
        path: PathBuf::from("fdkaac"),
        version,
    })
}

/// Probe all candidate backends.
///
/// `probe_emulated` gates the qaac probe: qaac is a Windows binary that may
/// start a compatibility layer just by being executed, which some setups
/// want to avoid at startup.
pub fn probe(probe_emulated: bool) -> BackendSet {
    let ffmpeg = probe_ffmpeg();
    if let Some(ff) = &ffmpeg {
        tracing::info!(
            version = ff.version.as_deref().unwrap_or("unknown"),
            libfdk_aac = ff.has_libfdk_aac,
            libopus = ff.has_libopus,
            "ffmpeg probed"
        );
    } else {
        tracing::warn!("ffmpeg not found in PATH");
    }

    let qaac = if probe_emulated { probe_qaac() } else { None };
    if let Some(q) = &qaac {
        tracing::info!(version = q.version.as_deref().unwrap_or("unknown"), "qaac probed");
    }

    let fdkaac = probe_fdkaac();
    if let Some(f) = &fdkaac {
        tracing::info!(version = f.version.as_deref().unwrap_or("unknown"), "fdkaac probed");
    }

    BackendSet {
        ffmpeg,
        qaac,
        fdkaac,
    }
}

/// Apply the preference order and freeze a backend for the run.
pub fn select(set: &BackendSet, policy: &Policy) -> Result<Backend> {
    let no_backend = || Error::NoBackendAvailable {
        codec: policy.codec.to_string(),
    };
    // Every backend needs ffmpeg, if only for the decode leg.
    let ffmpeg = set.ffmpeg.clone().ok_or_else(no_backend)?;

    let build = |id: EncoderId, cli: Option<CliProbe>| Backend {
        id,
        ffmpeg: ffmpeg.clone(),
        cli,
    };

    let available = |id: EncoderId| -> Option<Backend> {
        match id {
            EncoderId::LibfdkAac if ffmpeg.has_libfdk_aac => Some(build(id, None)),
            EncoderId::Qaac => set.qaac.clone().map(|cli| build(id, Some(cli))),
            EncoderId::Fdkaac => set.fdkaac.clone().map(|cli| build(id, Some(cli))),
            EncoderId::Libopus if ffmpeg.has_libopus => Some(build(id, None)),
            _ => None,
        }
    };

    if let Some(wanted) = policy.encoder_override {
        if wanted.codec() != policy.codec {
            return Err(no_backend());
        }
        return available(wanted).ok_or_else(no_backend);
    }

    let order: &[EncoderId] = match policy.codec {
        Codec::Aac => &[EncoderId::LibfdkAac, EncoderId::Qaac, EncoderId::Fdkaac],
        Codec::Opus => &[EncoderId::Libopus],
    };

    let backend = order
        .iter()
        .find_map(|id| available(*id))
        .ok_or_else(no_backend)?;
    tracing::info!(backend = %backend.describe(), "encoder backend selected");
    Ok(backend)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ffmpeg(fdk: bool, opus: bool) -> FfmpegProbe {
        FfmpegProbe {
            path: PathBuf::from("ffmpeg"),
            version: Some("ffmpeg version 7.0".into()),
            has_libfdk_aac: fdk,
            has_libopus: opus,
        }
    }

    fn cli(name: &str) -> CliProbe {
        CliProbe {
            path: PathBuf::from(name),
            version: None,
        }
    }

    #[test]
    fn prefers_libfdk_over_clis() {
        let set = BackendSet {
            ffmpeg: Some(ffmpeg(true, true)),
            qaac: Some(cli("qaac")),
            fdkaac: Some(cli("fdkaac")),
        };
        let backend = select(&set, &Policy::default()).unwrap();
        assert_eq!(backend.id, EncoderId::LibfdkAac);
    }

    #[test]
    fn falls_back_to_qaac_then_fdkaac() {
        let mut set = BackendSet {
            ffmpeg: Some(ffmpeg(false, false)),
            qaac: Some(cli("qaac")),
            fdkaac: Some(cli("fdkaac")),
        };
        assert_eq!(select(&set, &Policy::default()).unwrap().id, EncoderId::Qaac);
        set.qaac = None;
        assert_eq!(
            select(&set, &Policy::default()).unwrap().id,
            EncoderId::Fdkaac
        );
    }

    #[test]
    fn opus_requires_libopus() {
        let policy = Policy {
            codec: Codec::Opus,
            ..Policy::default()
        };
        let set = BackendSet {
            ffmpeg: Some(ffmpeg(true, false)),
            qaac: None,
            fdkaac: None,
        };
        assert!(select(&set, &policy).is_err());

        let set = BackendSet {
            ffmpeg: Some(ffmpeg(false, true)),
            qaac: None,
            fdkaac: None,
        };
        assert_eq!(select(&set, &policy).unwrap().id, EncoderId::Libopus);
    }

    #[test]
    fn override_must_match_codec_and_availability() {
        let set = BackendSet {
            ffmpeg: Some(ffmpeg(true, true)),
            qaac: None,
            fdkaac: None,
        };
        let policy = Policy {
            encoder_override: Some(EncoderId::Qaac),
            ..Policy::default()
        };
        assert!(select(&set, &policy).is_err());

        let policy = Policy {
            encoder_override: Some(EncoderId::Libopus),
            codec: Codec::Opus,
            ..Policy::default()
        };
        assert_eq!(select(&set, &policy).unwrap().id, EncoderId::Libopus);
    }

    #[test]
    fn nothing_available_is_fatal() {
        let set = BackendSet::default();
        match select(&set, &Policy::default()) {
            Err(Error::NoBackendAvailable { codec }) => assert_eq!(codec, "aac"),
            other => panic!("expected NoBackendAvailable, got {other:?}"),
        }
    }
}
