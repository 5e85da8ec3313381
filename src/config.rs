//! # Configuration
//!
//! Optional TOML file, first found of:
//! 1. `--config <file>`
//! 2. `$RESTFILL_CONFIG`
//! 3. `<config_dir>/restfill/config.toml` (`~/.config/restfill/config.toml` on Linux)
//!
//! An explicitly named file must exist; the default location may be absent.
//!
//! ```toml
//! [matcher]
//! threshold = 0.4
//! route_bonus = 0.25
//!
//! [inference]
//! enabled = true
//! url = "http://127.0.0.1:1234/v1/chat/completions"
//! timeout_secs = 20
//! ```

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::matcher::MatchWeights;

pub const CONFIG_ENV: &str = "RESTFILL_CONFIG";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub matcher:   MatchWeights,
    pub inference: InferenceConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InferenceConfig {
    /// Consult the model when the matcher ends in a tie.
    pub enabled:      bool,
    pub url:          String,
    pub model:        Option<String>,
    pub timeout_secs: u64,
    pub temperature:  f32,
    pub max_tokens:   u32,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            enabled:      false,
            url:          "http://127.0.0.1:1234/v1/chat/completions".to_string(),
            model:        None,
            timeout_secs: 30,
            temperature:  0.0,
            max_tokens:   64,
        }
    }
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("restfill").join("config.toml"))
}

/// Which file to read, and whether it has to exist.
fn locate(explicit: Option<&Path>, env: Option<OsString>) -> Option<(PathBuf, bool)> {
    if let Some(p) = explicit {
        return Some((p.to_path_buf(), true));
    }
    if let Some(p) = env.filter(|v| !v.is_empty()) {
        return Some((PathBuf::from(p), true));
    }
    default_config_path().map(|p| (p, false))
}

pub fn load(explicit: Option<&Path>) -> Result<Config> {
    load_from(explicit, std::env::var_os(CONFIG_ENV))
}

fn load_from(explicit: Option<&Path>, env: Option<OsString>) -> Result<Config> {
    let Some((path, required)) = locate(explicit, env) else {
        return Ok(Config::default());
    };
    if !required && !path.exists() {
        tracing::debug!(path = %path.display(), "no config file; using defaults");
        return Ok(Config::default());
    }
    let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("reading config file {}", path.display()))?;
    let cfg = parse(&raw).with_context(|| format!("parsing config file {}", path.display()))?;
    tracing::debug!(path = %path.display(), "config loaded");
    Ok(cfg)
}

/// Weights from the file and from command-line flags alike.
pub fn check_weights(m: &MatchWeights) -> Result<()> {
    let named = [
        ("coverage_weight", m.coverage_weight),
        ("precision_weight", m.precision_weight),
        ("loose_match_factor", m.loose_match_factor),
        ("route_bonus", m.route_bonus),
        ("verb_bonus", m.verb_bonus),
        ("threshold", m.threshold),
    ];
    if let Some((name, w)) = named.iter().find(|(_, w)| !w.is_finite() || *w < 0.0) {
        anyhow::bail!("matcher weight {} must be finite and non-negative, got {}", name, w);
    }
    Ok(())
}

pub fn parse(raw: &str) -> Result<Config> {
    let cfg: Config = toml::from_str(raw).context("Parsing TOML")?;
    check_weights(&cfg.matcher)?;
    if cfg.inference.timeout_secs == 0 {
        anyhow::bail!("inference.timeout_secs must be at least 1");
    }
    Ok(cfg)
}
