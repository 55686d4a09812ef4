//! Player runtime: the play loop and media probing.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use playback_session::engine::EngineBackend;
use playback_session::engine::probe::{ProbeBackend, probe_media};
use playback_session::engine::sim::{SimBackend, SimScript};
use playback_session::{Playback, PlaybackError, SessionConfig};
use playback_types::{PlaybackEvent, SessionId};

use crate::cli::EngineKind;
use crate::config::PlayConfig;

const EVENT_WAIT: Duration = Duration::from_millis(100);
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

pub fn backend_for(kind: EngineKind, session: &SessionConfig) -> Arc<dyn EngineBackend> {
    match kind {
        EngineKind::Probe => Arc::new(ProbeBackend::new(session.probe_tick())),
        EngineKind::Sim => Arc::new(SimBackend::new(SimScript::default())),
    }
}

/// Play every configured path, printing events as JSON lines to stdout.
///
/// Ctrl-C stops the current media and shuts down cleanly.
pub fn run_play(config: PlayConfig) -> Result<()> {
    let interrupted = Arc::new(AtomicBool::new(false));
    {
        let interrupted = interrupted.clone();
        ctrlc::set_handler(move || interrupted.store(true, Ordering::SeqCst))
            .context("install Ctrl-C handler")?;
    }
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    play_all(config, &interrupted, &mut out)
}

pub fn play_all(config: PlayConfig, interrupted: &AtomicBool, out: &mut impl Write) -> Result<()> {
    let backend = backend_for(config.engine, &config.session);
    tracing::info!(engine = backend.name(), files = config.paths.len(), "starting playback");
    let mut playback = Playback::new(backend, config.session.clone());
    playback.set_volume(config.volume);

    let mut queue = config.paths.into_iter();
    let mut current = load_next(&mut playback, &mut queue)?;
    let mut switch_at = config.switch_after.map(|d| Instant::now() + d);

    while let Some(session) = current {
        if interrupted.load(Ordering::SeqCst) {
            tracing::info!(session = %session, "interrupted");
            break;
        }
        let mut advance = false;
        for event in playback.wait_and_process(EVENT_WAIT) {
            print_event(out, &event)?;
            match event {
                PlaybackEvent::EndReached { session: s } if s == session => advance = true,
                PlaybackEvent::Error { session: s, .. } if s == session => advance = true,
                _ => {}
            }
        }
        if switch_at.is_some_and(|at| Instant::now() >= at) {
            tracing::info!(session = %session, "switch interval elapsed");
            advance = true;
        }
        if advance {
            current = load_next(&mut playback, &mut queue)?;
            switch_at = config.switch_after.map(|d| Instant::now() + d);
        }
    }

    for event in playback.shutdown(SHUTDOWN_TIMEOUT) {
        print_event(out, &event)?;
    }
    let status = playback.status();
    if status.live_surfaces > 0 {
        tracing::warn!(live_surfaces = status.live_surfaces, "sessions still tearing down at exit");
    }
    tracing::info!("playback finished");
    Ok(())
}

/// Load the next existing path. Missing files are skipped.
fn load_next(
    playback: &mut Playback,
    queue: &mut impl Iterator<Item = PathBuf>,
) -> Result<Option<SessionId>> {
    for path in queue.by_ref() {
        match playback.load_media(&path) {
            Ok(id) => return Ok(Some(id)),
            Err(PlaybackError::MediaNotFound(missing)) => {
                tracing::warn!(path = ?missing, "skipping missing media");
            }
            Err(err) => return Err(err).with_context(|| format!("load {:?}", path)),
        }
    }
    if let Some(id) = playback.stop() {
        tracing::debug!(session = %id, "queue exhausted");
    }
    Ok(None)
}

fn print_event(out: &mut impl Write, event: &PlaybackEvent) -> Result<()> {
    let line = serde_json::to_string(event).context("encode event")?;
    writeln!(out, "{line}").context("write event")?;
    Ok(())
}

/// Probe `path` with the headless engine and print its media info.
pub fn run_probe(path: &Path) -> Result<()> {
    let info = probe_media(path).with_context(|| format!("probe {:?}", path))?;
    println!(
        "{}",
        serde_json::to_string_pretty(&info).context("encode media info")?
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sim_config(paths: Vec<PathBuf>) -> PlayConfig {
        PlayConfig {
            paths,
            switch_after: Some(Duration::from_millis(150)),
            volume: 50,
            engine: EngineKind::Sim,
            session: SessionConfig {
                metadata_delay_ms: 10,
                ..SessionConfig::default()
            },
        }
    }

    fn kinds(output: &[u8]) -> Vec<String> {
        String::from_utf8_lossy(output)
            .lines()
            .map(|line| {
                let value: serde_json::Value = serde_json::from_str(line).unwrap();
                value["kind"].as_str().unwrap().to_string()
            })
            .collect()
    }

    #[test]
    fn plays_queue_and_releases_every_surface() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.mkv");
        let b = dir.path().join("b.mkv");
        std::fs::write(&a, b"a").unwrap();
        std::fs::write(&b, b"b").unwrap();
        let missing = dir.path().join("missing.mkv");

        let mut out = Vec::new();
        let interrupted = AtomicBool::new(false);
        play_all(sim_config(vec![a, missing, b]), &interrupted, &mut out).unwrap();

        let kinds = kinds(&out);
        assert_eq!(kinds.iter().filter(|k| *k == "surface_released").count(), 2);
        assert!(kinds.iter().any(|k| k == "media_loaded"));
    }

    #[test]
    fn interrupted_run_still_shuts_down() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.mkv");
        std::fs::write(&a, b"a").unwrap();

        let mut out = Vec::new();
        let interrupted = AtomicBool::new(true);
        play_all(sim_config(vec![a]), &interrupted, &mut out).unwrap();
        assert_eq!(
            kinds(&out).iter().filter(|k| *k == "surface_released").count(),
            1
        );
    }

    #[test]
    fn probe_fails_for_non_media() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, b"hello").unwrap();
        assert!(run_probe(&path).is_err());
    }
}
