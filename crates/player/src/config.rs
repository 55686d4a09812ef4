//! Configuration loading for the `player` binary.
//!
//! File values are read from TOML and overridden by command-line flags.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use playback_session::SessionConfig;
use serde::Deserialize;

use crate::cli::EngineKind;

/// Top-level config file.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct PlayerFileConfig {
    /// Session tuning passed to the library.
    pub session: SessionConfig,
    pub player: PlayerSection,
}

/// `[player]` table.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct PlayerSection {
    pub engine: Option<EngineKind>,
    /// Initial volume percent.
    pub volume: Option<u8>,
}

impl PlayerFileConfig {
    /// Load configuration from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let raw =
            std::fs::read_to_string(path).with_context(|| format!("read config {:?}", path))?;
        let cfg = toml::from_str::<PlayerFileConfig>(&raw)
            .with_context(|| format!("parse config {:?}", path))?;
        Ok(cfg)
    }
}

/// Fully resolved settings for `player play`.
#[derive(Clone, Debug)]
pub struct PlayConfig {
    pub paths: Vec<PathBuf>,
    pub switch_after: Option<Duration>,
    pub volume: u8,
    pub engine: EngineKind,
    pub session: SessionConfig,
}

/// Merge flags over file values.
pub fn resolve_play(
    file: PlayerFileConfig,
    engine: Option<EngineKind>,
    paths: Vec<PathBuf>,
    switch_after: Option<f64>,
    volume: Option<u8>,
) -> Result<PlayConfig> {
    let switch_after = match switch_after {
        Some(secs) if !secs.is_finite() || secs <= 0.0 => {
            bail!("--switch-after must be a positive number of seconds, got {secs}")
        }
        Some(secs) => match Duration::try_from_secs_f64(secs) {
            Ok(interval) => Some(interval),
            Err(err) => bail!("--switch-after {secs} is out of range: {err}"),
        },
        None => None,
    };
    let volume = volume.or(file.player.volume).unwrap_or(100);
    if volume > 100 {
        bail!("volume must be between 0 and 100, got {volume}");
    }
    Ok(PlayConfig {
        paths,
        switch_after,
        volume,
        engine: engine.or(file.player.engine).unwrap_or_default(),
        session: file.session,
    })
}
