//! Headless engine backed by Symphonia.
//!
//! Opening media probes the container/codec, so unreadable files fail at
//! initialization. Playback is an engine-internal clock thread that pushes
//! position and end-of-media notifications; no audio is rendered.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use playback_types::{MediaInfo, Metadata, SurfaceHandle, Track, TrackKind};
use symphonia::core::codecs::{CODEC_TYPE_NULL, CodecParameters};
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::{MetadataOptions, MetadataRevision, StandardTagKey};
use symphonia::core::probe::Hint;

use super::{
    EngineBackend, EngineInstance, EngineMedia, EngineNotification, EnginePlayer,
    NotificationSink,
};
use crate::error::EngineError;

/// Backend that probes media with Symphonia and plays it on a wall clock.
pub struct ProbeBackend {
    tick: Duration,
}

impl ProbeBackend {
    pub fn new(tick: Duration) -> Self {
        Self { tick }
    }
}

impl EngineBackend for ProbeBackend {
    fn name(&self) -> &'static str {
        "probe"
    }

    fn new_instance(&self, args: &[String]) -> Result<Box<dyn EngineInstance>, EngineError> {
        tracing::trace!(args = ?args, "probe instance created");
        Ok(Box::new(ProbeInstance { tick: self.tick }))
    }
}

struct ProbeInstance {
    tick: Duration,
}

impl EngineInstance for ProbeInstance {
    fn open_media(&mut self, path: &Path) -> Result<Box<dyn EngineMedia>, EngineError> {
        let info = probe_media(path)?;
        Ok(Box::new(ProbeMedia {
            path: path.to_path_buf(),
            info,
        }))
    }

    fn new_player(&mut self, media: &dyn EngineMedia) -> Result<Box<dyn EnginePlayer>, EngineError> {
        ProbePlayer::spawn(media.duration_ms(), self.tick).map(|p| Box::new(p) as Box<dyn EnginePlayer>)
    }

    fn release(self: Box<Self>) -> Result<(), EngineError> {
        Ok(())
    }
}

struct ProbeMedia {
    path: PathBuf,
    info: MediaInfo,
}

impl EngineMedia for ProbeMedia {
    fn path(&self) -> &Path {
        &self.path
    }

    fn duration_ms(&self) -> Option<u64> {
        self.info.duration_ms
    }

    fn parse_info(&mut self) -> Result<Option<MediaInfo>, EngineError> {
        Ok(Some(self.info.clone()))
    }

    fn release(self: Box<Self>) -> Result<(), EngineError> {
        Ok(())
    }
}

/// Probe `path` and describe its tracks and tags.
pub fn probe_media(path: &Path) -> Result<MediaInfo, EngineError> {
    let media_err = |reason: String| EngineError::Media {
        path: path.to_path_buf(),
        reason,
    };
    let file = File::open(path).map_err(|e| media_err(e.to_string()))?;

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }
    let mss = MediaSourceStream::new(Box::new(file), Default::default());
    let mut probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| media_err(e.to_string()))?;

    let mut metadata = Metadata::default();
    if let Some(mut probe_meta) = probed.metadata.get() {
        if let Some(rev) = probe_meta.skip_to_latest() {
            apply_tags(&mut metadata, rev);
        }
    }
    let format = &mut probed.format;
    if let Some(rev) = format.metadata().current() {
        apply_tags(&mut metadata, rev);
    }

    let default_id = format.default_track().map(|t| t.id);
    let mut audio_tracks = Vec::new();
    let mut duration_ms = None;
    for track in format.tracks() {
        let params = &track.codec_params;
        if params.codec == CODEC_TYPE_NULL {
            continue;
        }
        if Some(track.id) == default_id {
            duration_ms = duration_ms_from_codec_params(params);
            metadata.codec = codec_name_from_params(params);
        }
        audio_tracks.push(Track {
            id: i32::try_from(track.id).unwrap_or(i32::MAX),
            kind: TrackKind::Audio,
            display_name: track_label(audio_tracks.len() + 1, params),
            language: track.language.clone(),
        });
    }
    if audio_tracks.is_empty() {
        return Err(media_err("no decodable track".to_string()));
    }

    Ok(MediaInfo {
        metadata,
        is_video: false,
        duration_ms,
        audio_tracks,
        subtitle_tracks: Vec::new(),
    })
}

fn apply_tags(metadata: &mut Metadata, rev: &MetadataRevision) {
    for tag in rev.tags() {
        let value = tag.value.to_string();
        let slot = match tag.std_key {
            Some(StandardTagKey::TrackTitle) => &mut metadata.title,
            Some(StandardTagKey::Artist) | Some(StandardTagKey::AlbumArtist) => {
                if metadata.artist.is_some() {
                    continue;
                }
                &mut metadata.artist
            }
            Some(StandardTagKey::Album) => &mut metadata.album,
            Some(StandardTagKey::Genre) => &mut metadata.genre,
            Some(StandardTagKey::Date) | Some(StandardTagKey::ReleaseDate) => &mut metadata.date,
            _ => {
                metadata.extra.insert(tag.key.clone(), value);
                continue;
            }
        };
        *slot = Some(value);
    }
}

fn track_label(ordinal: usize, params: &CodecParameters) -> String {
    let mut label = format!("Track {ordinal}");
    if let Some(codec) = codec_name_from_params(params) {
        label.push_str(&format!(" ({codec}"));
        if let Some(channels) = params.channels {
            label.push_str(&format!(", {}ch", channels.count()));
        }
        label.push(')');
    }
    label
}

/// Best-effort duration in milliseconds from codec metadata.
fn duration_ms_from_codec_params(codec_params: &CodecParameters) -> Option<u64> {
    let frames = codec_params.n_frames?;
    let rate = codec_params.sample_rate? as u64;
    if rate == 0 {
        return None;
    }
    Some(frames.saturating_mul(1000) / rate)
}

/// Best-effort codec label.
fn codec_name_from_params(params: &CodecParameters) -> Option<String> {
    use symphonia::core::codecs::*;
    let name = match params.codec {
        CODEC_TYPE_FLAC => "FLAC",
        CODEC_TYPE_MP3 => "MP3",
        CODEC_TYPE_AAC => "AAC",
        CODEC_TYPE_ALAC => "ALAC",
        CODEC_TYPE_VORBIS => "VORBIS",
        CODEC_TYPE_OPUS => "OPUS",
        CODEC_TYPE_PCM_S16LE | CODEC_TYPE_PCM_S16BE => "PCM_S16",
        CODEC_TYPE_PCM_S24LE | CODEC_TYPE_PCM_S24BE => "PCM_S24",
        CODEC_TYPE_PCM_S32LE | CODEC_TYPE_PCM_S32BE => "PCM_S32",
        CODEC_TYPE_PCM_F32LE | CODEC_TYPE_PCM_F32BE => "PCM_F32",
        _ => return None,
    };
    Some(name.to_string())
}

#[derive(Debug)]
struct Clock {
    base_ms: u64,
    anchor: Option<Instant>,
    rate: f32,
    duration_ms: Option<u64>,
    volume: u8,
    muted: bool,
    audio_track: Option<i32>,
    subtitle_track: Option<i32>,
    sink: Option<NotificationSink>,
    shutdown: bool,
}

impl Clock {
    fn position_ms(&self, now: Instant) -> u64 {
        let advanced = match self.anchor {
            Some(anchor) => {
                (now.saturating_duration_since(anchor).as_secs_f64() * self.rate as f64 * 1000.0)
                    as u64
            }
            None => 0,
        };
        let pos = self.base_ms.saturating_add(advanced);
        match self.duration_ms {
            Some(total) => pos.min(total),
            None => pos,
        }
    }

    /// Fold elapsed time into `base_ms` and restart the anchor if running.
    fn rebase(&mut self, now: Instant) {
        self.base_ms = self.position_ms(now);
        if self.anchor.is_some() {
            self.anchor = Some(now);
        }
    }

    fn emit(&self, notification: EngineNotification) {
        if let Some(sink) = &self.sink {
            sink.notify(notification);
        }
    }
}

type SharedClock = Arc<(Mutex<Clock>, Condvar)>;

fn lock(shared: &SharedClock) -> MutexGuard<'_, Clock> {
    shared.0.lock().unwrap_or_else(|err| err.into_inner())
}

struct ProbePlayer {
    shared: SharedClock,
    ticker: Option<JoinHandle<()>>,
}

impl ProbePlayer {
    fn spawn(duration_ms: Option<u64>, tick: Duration) -> Result<Self, EngineError> {
        let shared: SharedClock = Arc::new((
            Mutex::new(Clock {
                base_ms: 0,
                anchor: None,
                rate: 1.0,
                duration_ms,
                volume: 100,
                muted: false,
                audio_track: None,
                subtitle_track: None,
                sink: None,
                shutdown: false,
            }),
            Condvar::new(),
        ));
        let for_thread = shared.clone();
        let ticker = std::thread::Builder::new()
            .name("probe-clock".to_string())
            .spawn(move || clock_loop(for_thread, tick))
            .map_err(|e| EngineError::Unavailable(format!("clock thread: {e}")))?;
        Ok(Self {
            shared,
            ticker: Some(ticker),
        })
    }

    fn with_clock<R>(&self, f: impl FnOnce(&mut Clock, Instant) -> R) -> R {
        let mut clock = lock(&self.shared);
        let out = f(&mut clock, Instant::now());
        self.shared.1.notify_all();
        out
    }

    fn shutdown(&mut self) {
        self.with_clock(|clock, _| {
            clock.shutdown = true;
            clock.sink = None;
        });
        if let Some(ticker) = self.ticker.take() {
            let _ = ticker.join();
        }
    }
}

/// Engine-internal thread: publishes position while running, end-of-media at the end.
fn clock_loop(shared: SharedClock, tick: Duration) {
    let mut last_reported = None;
    let mut clock = lock(&shared);
    loop {
        if clock.shutdown {
            break;
        }
        if clock.anchor.is_some() {
            let now = Instant::now();
            let pos = clock.position_ms(now);
            if last_reported != Some(pos) {
                clock.emit(EngineNotification::PositionChanged(pos));
                last_reported = Some(pos);
            }
            if clock.duration_ms.is_some_and(|total| pos >= total) {
                clock.base_ms = pos;
                clock.anchor = None;
                clock.emit(EngineNotification::EndReached);
            }
        }
        clock = match shared.1.wait_timeout(clock, tick) {
            Ok((guard, _)) => guard,
            Err(poisoned) => poisoned.into_inner().0,
        };
    }
}

impl EnginePlayer for ProbePlayer {
    fn set_output(&mut self, surface: SurfaceHandle) -> Result<(), EngineError> {
        tracing::trace!(surface = %surface.id, "probe output bound");
        Ok(())
    }

    fn play(&mut self) -> Result<(), EngineError> {
        self.with_clock(|clock, now| {
            if clock.duration_ms.is_some_and(|total| clock.base_ms >= total) {
                clock.base_ms = 0;
            }
            if clock.anchor.is_none() {
                clock.anchor = Some(now);
            }
            if let Some(ms) = clock.duration_ms {
                clock.emit(EngineNotification::DurationChanged(ms));
            }
            clock.emit(EngineNotification::Playing);
        });
        Ok(())
    }

    fn pause(&mut self) -> Result<(), EngineError> {
        self.with_clock(|clock, now| {
            clock.rebase(now);
            clock.anchor = None;
            clock.emit(EngineNotification::Paused);
        });
        Ok(())
    }

    fn stop(&mut self) -> Result<(), EngineError> {
        self.with_clock(|clock, _| {
            clock.anchor = None;
            clock.base_ms = 0;
        });
        Ok(())
    }

    fn seek(&mut self, ms: u64) -> Result<(), EngineError> {
        self.with_clock(|clock, now| {
            let target = clock.duration_ms.map_or(ms, |total| ms.min(total));
            clock.base_ms = target;
            if clock.anchor.is_some() {
                clock.anchor = Some(now);
            }
            clock.emit(EngineNotification::PositionChanged(target));
        });
        Ok(())
    }

    fn set_volume(&mut self, volume: u8) -> Result<(), EngineError> {
        self.with_clock(|clock, _| clock.volume = volume.min(100));
        Ok(())
    }

    fn set_mute(&mut self, muted: bool) -> Result<(), EngineError> {
        self.with_clock(|clock, _| clock.muted = muted);
        Ok(())
    }

    fn set_rate(&mut self, rate: f32) -> Result<(), EngineError> {
        if !rate.is_finite() || rate <= 0.0 {
            return Err(EngineError::call("set_rate", format!("unsupported rate {rate}")));
        }
        self.with_clock(|clock, now| {
            clock.rebase(now);
            clock.rate = rate;
        });
        Ok(())
    }

    fn select_audio_track(&mut self, id: i32) -> Result<(), EngineError> {
        self.with_clock(|clock, _| clock.audio_track = Some(id));
        Ok(())
    }

    fn select_subtitle_track(&mut self, id: Option<i32>) -> Result<(), EngineError> {
        self.with_clock(|clock, _| clock.subtitle_track = id);
        Ok(())
    }

    fn attach_notifications(&mut self, sink: NotificationSink) -> Result<(), EngineError> {
        self.with_clock(|clock, _| clock.sink = Some(sink));
        Ok(())
    }

    fn detach_notifications(&mut self) -> Result<(), EngineError> {
        self.with_clock(|clock, _| clock.sink = None);
        Ok(())
    }

    fn release(mut self: Box<Self>) -> Result<(), EngineError> {
        self.shutdown();
        Ok(())
    }
}

impl Drop for ProbePlayer {
    fn drop(&mut self) {
        if self.ticker.is_some() {
            self.shutdown();
        }
    }
}
