//! Scriptable in-process engine.
//!
//! Records every native call per instance, counts live native objects and
//! lets callers inject notifications into a running player. Used by tests and
//! by the CLI's `sim` engine.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use playback_types::{MediaInfo, Metadata, SurfaceHandle, SurfaceId, Track, TrackKind};

use super::{
    EngineBackend, EngineInstance, EngineMedia, EngineNotification, EnginePlayer,
    NotificationSink,
};
use crate::error::EngineError;

/// Native call observed by the simulated engine.
#[derive(Clone, Debug, PartialEq)]
pub enum SimCall {
    NewInstance,
    OpenMedia,
    NewPlayer,
    SetOutput(SurfaceId),
    Attach,
    Detach,
    Play,
    Pause,
    Stop,
    Seek(u64),
    SetVolume(u8),
    SetMute(bool),
    SetRate(f32),
    SelectAudioTrack(i32),
    SelectSubtitleTrack(Option<i32>),
    ParseInfo,
    ReleasePlayer,
    ReleaseMedia,
    ReleaseInstance,
}

impl SimCall {
    /// Name matched against [`SimScript::fail_calls`].
    pub fn name(&self) -> &'static str {
        match self {
            SimCall::NewInstance => "new_instance",
            SimCall::OpenMedia => "open_media",
            SimCall::NewPlayer => "new_player",
            SimCall::SetOutput(_) => "set_output",
            SimCall::Attach => "attach",
            SimCall::Detach => "detach",
            SimCall::Play => "play",
            SimCall::Pause => "pause",
            SimCall::Stop => "stop",
            SimCall::Seek(_) => "seek",
            SimCall::SetVolume(_) => "set_volume",
            SimCall::SetMute(_) => "set_mute",
            SimCall::SetRate(_) => "set_rate",
            SimCall::SelectAudioTrack(_) => "select_audio_track",
            SimCall::SelectSubtitleTrack(_) => "select_subtitle_track",
            SimCall::ParseInfo => "parse_info",
            SimCall::ReleasePlayer => "release_player",
            SimCall::ReleaseMedia => "release_media",
            SimCall::ReleaseInstance => "release_instance",
        }
    }
}

/// Behaviour knobs for the simulated engine.
#[derive(Clone, Debug)]
pub struct SimScript {
    /// Fail every `new_instance` call.
    pub fail_instance: bool,
    /// Fail every `open_media` call.
    pub fail_open: bool,
    /// Fail `open_media` for these paths only.
    pub fail_paths: Vec<PathBuf>,
    /// Calls (by [`SimCall::name`]) that return an error.
    pub fail_calls: Vec<&'static str>,
    /// Calls (by [`SimCall::name`]) that panic, like a crashing native library.
    pub panic_calls: Vec<&'static str>,
    /// Time the native `stop` call blocks.
    pub stop_delay: Duration,
    /// Number of `parse_info` calls answered with "not parsed yet".
    pub metadata_pending_polls: u32,
    pub info: MediaInfo,
}

impl Default for SimScript {
    fn default() -> Self {
        Self {
            fail_instance: false,
            fail_open: false,
            fail_paths: Vec::new(),
            fail_calls: Vec::new(),
            panic_calls: Vec::new(),
            stop_delay: Duration::ZERO,
            metadata_pending_polls: 0,
            info: default_info(),
        }
    }
}

fn default_info() -> MediaInfo {
    MediaInfo {
        metadata: Metadata {
            title: Some("Simulated".to_string()),
            codec: Some("h264".to_string()),
            ..Metadata::default()
        },
        is_video: true,
        duration_ms: Some(60_000),
        audio_tracks: vec![
            Track {
                id: 1,
                kind: TrackKind::Audio,
                display_name: "Stereo".to_string(),
                language: Some("en".to_string()),
            },
            Track {
                id: 2,
                kind: TrackKind::Audio,
                display_name: "Commentary".to_string(),
                language: Some("en".to_string()),
            },
        ],
        subtitle_tracks: vec![Track {
            id: 3,
            kind: TrackKind::Subtitle,
            display_name: "English".to_string(),
            language: Some("en".to_string()),
        }],
    }
}

/// One recorded native call.
#[derive(Clone, Debug)]
pub struct SimRecord {
    pub instance: u64,
    pub call: SimCall,
    pub at: Instant,
}

#[derive(Default)]
struct SimLogInner {
    records: Vec<SimRecord>,
    paths: HashMap<u64, PathBuf>,
    sinks: HashMap<u64, NotificationSink>,
    live: usize,
}

/// Shared record of everything the simulated engine did.
#[derive(Clone, Default)]
pub struct SimLog {
    inner: Arc<Mutex<SimLogInner>>,
}

impl SimLog {
    fn lock(&self) -> MutexGuard<'_, SimLogInner> {
        self.inner.lock().unwrap_or_else(|err| err.into_inner())
    }

    fn record(&self, instance: u64, call: SimCall) {
        self.lock().records.push(SimRecord {
            instance,
            call,
            at: Instant::now(),
        });
    }

    fn instances_for(inner: &SimLogInner, path: &Path) -> Vec<u64> {
        inner
            .paths
            .iter()
            .filter(|(_, p)| p.as_path() == path)
            .map(|(id, _)| *id)
            .collect()
    }

    /// Calls made by every instance that opened `path`, in order.
    pub fn calls_for(&self, path: &Path) -> Vec<SimCall> {
        self.records_for(path).into_iter().map(|r| r.call).collect()
    }

    pub fn records_for(&self, path: &Path) -> Vec<SimRecord> {
        let inner = self.lock();
        let ids = Self::instances_for(&inner, path);
        inner
            .records
            .iter()
            .filter(|r| ids.contains(&r.instance))
            .cloned()
            .collect()
    }

    /// When `call` was first made for `path`.
    pub fn first_call_at(&self, path: &Path, call: &SimCall) -> Option<Instant> {
        self.records_for(path)
            .into_iter()
            .find(|r| &r.call == call)
            .map(|r| r.at)
    }

    /// Number of native instances, media and players not yet dropped.
    pub fn live_objects(&self) -> usize {
        self.lock().live
    }

    /// Push a notification through the attached sink of the player for `path`.
    ///
    /// Returns `false` when no sink is attached.
    pub fn notify(&self, path: &Path, notification: EngineNotification) -> bool {
        let sink = {
            let inner = self.lock();
            Self::instances_for(&inner, path)
                .into_iter()
                .filter_map(|id| inner.sinks.get(&id).cloned())
                .last()
        };
        match sink {
            Some(sink) => {
                sink.notify(notification);
                true
            }
            None => false,
        }
    }

    fn object_created(&self) {
        self.lock().live += 1;
    }

    fn object_dropped(&self) {
        let mut inner = self.lock();
        inner.live = inner.live.saturating_sub(1);
    }
}

/// Backend producing simulated engine instances.
pub struct SimBackend {
    script: SimScript,
    log: SimLog,
    next_instance: AtomicU64,
}

impl SimBackend {
    pub fn new(script: SimScript) -> Self {
        Self {
            script,
            log: SimLog::default(),
            next_instance: AtomicU64::new(1),
        }
    }

    pub fn log(&self) -> SimLog {
        self.log.clone()
    }
}

struct Ctx {
    id: u64,
    script: Arc<SimScript>,
    log: SimLog,
}

impl Ctx {
    fn call(&self, call: SimCall) -> Result<(), EngineError> {
        let name = call.name();
        self.log.record(self.id, call);
        if self.script.panic_calls.contains(&name) {
            panic!("simulated crash in {name}");
        }
        if self.script.fail_calls.contains(&name) {
            return Err(EngineError::call(name, "scripted failure"));
        }
        Ok(())
    }

    fn clone_ctx(&self) -> Ctx {
        self.log.object_created();
        Ctx {
            id: self.id,
            script: self.script.clone(),
            log: self.log.clone(),
        }
    }
}

impl Drop for Ctx {
    fn drop(&mut self) {
        self.log.object_dropped();
    }
}

impl EngineBackend for SimBackend {
    fn name(&self) -> &'static str {
        "sim"
    }

    fn new_instance(&self, _args: &[String]) -> Result<Box<dyn EngineInstance>, EngineError> {
        if self.script.fail_instance {
            return Err(EngineError::Unavailable("simulated backend offline".to_string()));
        }
        let id = self.next_instance.fetch_add(1, Ordering::Relaxed);
        self.log.object_created();
        let ctx = Ctx {
            id,
            script: Arc::new(self.script.clone()),
            log: self.log.clone(),
        };
        self.log.record(id, SimCall::NewInstance);
        Ok(Box::new(SimInstance { ctx }))
    }
}

struct SimInstance {
    ctx: Ctx,
}

impl EngineInstance for SimInstance {
    fn open_media(&mut self, path: &Path) -> Result<Box<dyn EngineMedia>, EngineError> {
        self.ctx
            .log
            .lock()
            .paths
            .insert(self.ctx.id, path.to_path_buf());
        self.ctx.call(SimCall::OpenMedia)?;
        let script = &self.ctx.script;
        if script.fail_open || script.fail_paths.iter().any(|p| p == path) {
            return Err(EngineError::Media {
                path: path.to_path_buf(),
                reason: "unsupported container".to_string(),
            });
        }
        Ok(Box::new(SimMedia {
            ctx: self.ctx.clone_ctx(),
            path: path.to_path_buf(),
            pending_polls: script.metadata_pending_polls,
        }))
    }

    fn new_player(&mut self, media: &dyn EngineMedia) -> Result<Box<dyn EnginePlayer>, EngineError> {
        self.ctx.call(SimCall::NewPlayer)?;
        Ok(Box::new(SimPlayer {
            ctx: self.ctx.clone_ctx(),
            duration_ms: media.duration_ms(),
            sink: None,
        }))
    }

    fn release(self: Box<Self>) -> Result<(), EngineError> {
        self.ctx.call(SimCall::ReleaseInstance)
    }
}

struct SimMedia {
    ctx: Ctx,
    path: PathBuf,
    pending_polls: u32,
}

impl EngineMedia for SimMedia {
    fn path(&self) -> &Path {
        &self.path
    }

    fn duration_ms(&self) -> Option<u64> {
        self.ctx.script.info.duration_ms
    }

    fn parse_info(&mut self) -> Result<Option<MediaInfo>, EngineError> {
        self.ctx.call(SimCall::ParseInfo)?;
        if self.pending_polls > 0 {
            self.pending_polls -= 1;
            return Ok(None);
        }
        Ok(Some(self.ctx.script.info.clone()))
    }

    fn release(self: Box<Self>) -> Result<(), EngineError> {
        self.ctx.call(SimCall::ReleaseMedia)
    }
}

struct SimPlayer {
    ctx: Ctx,
    duration_ms: Option<u64>,
    sink: Option<NotificationSink>,
}

impl SimPlayer {
    fn emit(&self, notification: EngineNotification) {
        if let Some(sink) = &self.sink {
            sink.notify(notification);
        }
    }
}

impl EnginePlayer for SimPlayer {
    fn set_output(&mut self, surface: SurfaceHandle) -> Result<(), EngineError> {
        self.ctx.call(SimCall::SetOutput(surface.id))
    }

    fn play(&mut self) -> Result<(), EngineError> {
        self.ctx.call(SimCall::Play)?;
        if let Some(ms) = self.duration_ms {
            self.emit(EngineNotification::DurationChanged(ms));
        }
        self.emit(EngineNotification::Playing);
        Ok(())
    }

    fn pause(&mut self) -> Result<(), EngineError> {
        self.ctx.call(SimCall::Pause)?;
        self.emit(EngineNotification::Paused);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), EngineError> {
        let delay = self.ctx.script.stop_delay;
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        self.ctx.call(SimCall::Stop)
    }

    fn seek(&mut self, ms: u64) -> Result<(), EngineError> {
        self.ctx.call(SimCall::Seek(ms))?;
        self.emit(EngineNotification::PositionChanged(ms));
        Ok(())
    }

    fn set_volume(&mut self, volume: u8) -> Result<(), EngineError> {
        self.ctx.call(SimCall::SetVolume(volume))
    }

    fn set_mute(&mut self, muted: bool) -> Result<(), EngineError> {
        self.ctx.call(SimCall::SetMute(muted))
    }

    fn set_rate(&mut self, rate: f32) -> Result<(), EngineError> {
        self.ctx.call(SimCall::SetRate(rate))
    }

    fn select_audio_track(&mut self, id: i32) -> Result<(), EngineError> {
        self.ctx.call(SimCall::SelectAudioTrack(id))
    }

    fn select_subtitle_track(&mut self, id: Option<i32>) -> Result<(), EngineError> {
        self.ctx.call(SimCall::SelectSubtitleTrack(id))
    }

    fn attach_notifications(&mut self, sink: NotificationSink) -> Result<(), EngineError> {
        self.ctx.call(SimCall::Attach)?;
        self.ctx.log.lock().sinks.insert(self.ctx.id, sink.clone());
        self.sink = Some(sink);
        Ok(())
    }

    fn detach_notifications(&mut self) -> Result<(), EngineError> {
        self.ctx.log.lock().sinks.remove(&self.ctx.id);
        self.sink = None;
        self.ctx.call(SimCall::Detach)
    }

    fn release(self: Box<Self>) -> Result<(), EngineError> {
        self.ctx.log.lock().sinks.remove(&self.ctx.id);
        self.ctx.call(SimCall::ReleasePlayer)
    }
}
