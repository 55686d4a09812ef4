use std::time::Duration;

use serde::Deserialize;

/// Session tuning parameters shared by the manager and its workers.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Delay after playback start before asking the engine for parsed metadata.
    pub metadata_delay_ms: u64,
    /// How many times metadata parsing is attempted before reporting what is known.
    pub metadata_attempts: u32,
    /// End-of-media notifications this soon after a seek are ignored.
    pub end_reached_guard_ms: u64,
    /// Position notification interval of the probe engine clock.
    pub probe_tick_ms: u64,
    /// Extra engine startup args appended to the platform defaults.
    pub engine_args: Vec<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            metadata_delay_ms: 500,
            metadata_attempts: 3,
            end_reached_guard_ms: 300,
            probe_tick_ms: 250,
            engine_args: Vec::new(),
        }
    }
}

impl SessionConfig {
    pub fn metadata_delay(&self) -> Duration {
        Duration::from_millis(self.metadata_delay_ms)
    }

    pub fn end_reached_guard(&self) -> Duration {
        Duration::from_millis(self.end_reached_guard_ms)
    }

    pub fn probe_tick(&self) -> Duration {
        Duration::from_millis(self.probe_tick_ms.max(10))
    }

    /// Full engine argument list: platform defaults first, then configured extras.
    pub fn engine_args(&self) -> Vec<String> {
        let mut args: Vec<String> = engine_args_for_platform()
            .iter()
            .map(|s| s.to_string())
            .collect();
        args.extend(self.engine_args.iter().cloned());
        args
    }
}

/// Fixed hardware-acceleration startup args for the native engine.
pub fn engine_args_for_platform() -> &'static [&'static str] {
    #[cfg(target_os = "windows")]
    {
        &["--avcodec-hw=d3d11va", "--no-video-title-show"]
    }
    #[cfg(target_os = "macos")]
    {
        &["--avcodec-hw=videotoolbox", "--no-video-title-show"]
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        &["--avcodec-hw=vaapi", "--no-video-title-show"]
    }
}
