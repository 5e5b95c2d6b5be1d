//! Layered configuration: defaults, then the TOML file, then `PAC_*`
//! environment variables. Command-line flags are applied on top by
//! `main.rs`. Unknown TOML keys are ignored.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

/// File/env-sourced settings; every field optional so absent keys leave
/// the defaults alone.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub log_level: Option<String>,
    pub codec: Option<String>,
    pub tvbr: Option<u32>,
    pub vbr: Option<u32>,
    pub opus_vbr_kbps: Option<u32>,
    pub workers: Option<usize>,
    pub hash_streaminfo: Option<bool>,
    pub adopt: Option<bool>,
    pub rename: Option<bool>,
    pub retag: Option<bool>,
    pub prune: Option<bool>,
    pub sync_tags: Option<bool>,
    pub pcm_codec: Option<String>,
    pub art_resize: Option<bool>,
    pub art_max_size: Option<u32>,
    pub verify: Option<String>,
    pub probe_emulated: Option<bool>,
}

pub fn default_config_path() -> Option<PathBuf> {
    std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config/pac/pac.toml"))
}

impl FileConfig {
    /// Read the TOML file when it exists; a missing file is just defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => match default_config_path() {
                Some(p) => p,
                None => return Ok(Self::default()),
            },
        };
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let mut cfg: FileConfig = toml::from_str(&text)
            .with_context(|| format!("parsing config {}", path.display()))?;
        cfg.apply_env();
        Ok(cfg)
    }

    /// `PAC_*` environment variables override file values.
    pub fn apply_env(&mut self) {
        fn env_str(key: &str) -> Option<String> {
            std::env::var(key).ok().filter(|v| !v.is_empty())
        }
        fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
            env_str(key).and_then(|v| v.parse().ok())
        }
        fn env_bool(key: &str) -> Option<bool> {
            env_str(key).map(|v| matches!(v.as_str(), "1" | "true" | "yes" | "on"))
        }

        if let Some(v) = env_str("PAC_LOG_LEVEL") {
            self.log_level = Some(v);
        }
        if let Some(v) = env_str("PAC_CODEC") {
            self.codec = Some(v);
        }
        if let Some(v) = env_parse("PAC_TVBR") {
            self.tvbr = Some(v);
        }
        if let Some(v) = env_parse("PAC_VBR") {
            self.vbr = Some(v);
        }
        if let Some(v) = env_parse("PAC_OPUS_VBR_KBPS") {
            self.opus_vbr_kbps = Some(v);
        }
        if let Some(v) = env_parse("PAC_WORKERS") {
            self.workers = Some(v);
        }
        if let Some(v) = env_bool("PAC_HASH_STREAMINFO") {
            self.hash_streaminfo = Some(v);
        }
        if let Some(v) = env_bool("PAC_PRUNE") {
            self.prune = Some(v);
        }
        if let Some(v) = env_bool("PAC_PROBE_EMULATED") {
            self.probe_emulated = Some(v);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let cfg = FileConfig::load(Some(Path::new("/nonexistent/pac.toml"))).unwrap();
        assert!(cfg.codec.is_none());
        assert!(cfg.tvbr.is_none());
    }

    #[test]
    fn toml_values_parse() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("pac.toml");
        std::fs::write(
            &path,
            "codec = \"opus\"\nopus_vbr_kbps = 128\nprune = true\nunknown_key = 1\n",
        )
        .unwrap();
        let cfg = FileConfig::load(Some(&path)).unwrap();
        assert_eq!(cfg.codec.as_deref(), Some("opus"));
        assert_eq!(cfg.opus_vbr_kbps, Some(128));
        assert_eq!(cfg.prune, Some(true));
    }
}
