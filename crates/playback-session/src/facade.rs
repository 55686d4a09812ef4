//! Host-facing playback API.
//!
//! Wraps a [`SessionManager`], validates input, keeps a [`PlaybackStatus`]
//! snapshot and runs event subscribers on the thread that pumps events.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use playback_types::{
    ErrorKind, Metadata, PlaybackCommand, PlaybackEvent, PlaybackStatus, RawSurface, SessionId,
    SessionState, SurfaceHandle, Track,
};

use crate::config::SessionConfig;
use crate::engine::EngineBackend;
use crate::error::PlaybackError;
use crate::manager::{ManagerEvent, SessionManager};

type Handler = Box<dyn FnMut(&PlaybackEvent)>;

/// Borrowed view of a `MediaLoaded` event.
#[derive(Debug)]
pub struct MediaLoaded<'a> {
    pub session: SessionId,
    pub metadata: &'a Metadata,
    pub is_video: bool,
    pub audio_tracks: &'a [Track],
    pub subtitle_tracks: &'a [Track],
}

pub struct Playback {
    manager: SessionManager,
    status: PlaybackStatus,
    last_request: Option<(PathBuf, Option<RawSurface>)>,
    handlers: Vec<Handler>,
}

impl Playback {
    pub fn new(backend: Arc<dyn EngineBackend>, config: SessionConfig) -> Self {
        Self {
            manager: SessionManager::new(backend, config),
            status: PlaybackStatus::default(),
            last_request: None,
            handlers: Vec::new(),
        }
    }

    pub fn manager(&self) -> &SessionManager {
        &self.manager
    }

    pub fn load_media(&mut self, path: impl AsRef<Path>) -> Result<SessionId, PlaybackError> {
        self.load_media_on(path, None)
    }

    /// Load `path`, optionally rendering into a host-provided surface.
    ///
    /// Volume, mute and rate carry over to the new session.
    pub fn load_media_on(
        &mut self,
        path: impl AsRef<Path>,
        surface_hint: Option<RawSurface>,
    ) -> Result<SessionId, PlaybackError> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::warn!(path = ?path, "media not found");
            return Err(PlaybackError::MediaNotFound(path.to_path_buf()));
        }

        self.last_request = Some((path.to_path_buf(), surface_hint));
        let id = self.manager.load(path, surface_hint)?;

        self.status.clear_media();
        self.status.path = Some(path.display().to_string());
        self.status.session = Some(id);
        self.status.state = self.manager.session_state(id);
        self.status.live_surfaces = self.manager.surfaces().live_count();

        self.manager.dispatch(PlaybackCommand::SetVolume {
            value: self.status.volume,
        });
        if self.status.muted {
            self.manager.dispatch(PlaybackCommand::SetMute { muted: true });
        }
        if self.status.rate != 1.0 {
            self.manager.dispatch(PlaybackCommand::SetRate {
                rate: self.status.rate,
            });
        }
        Ok(id)
    }

    /// Load the most recently requested media again on a fresh session.
    pub fn retry(&mut self) -> Result<SessionId, PlaybackError> {
        let Some((path, hint)) = self.last_request.clone() else {
            return Err(PlaybackError::InvalidArgument(
                "no media has been requested yet".to_string(),
            ));
        };
        tracing::info!(path = ?path, "retrying last media");
        self.load_media_on(path, hint)
    }

    pub fn play(&mut self) -> Option<SessionId> {
        self.manager.dispatch(PlaybackCommand::Play)
    }

    pub fn pause(&mut self) -> Option<SessionId> {
        self.manager.dispatch(PlaybackCommand::Pause)
    }

    pub fn toggle_pause(&mut self) -> Option<SessionId> {
        self.manager.dispatch(PlaybackCommand::TogglePause)
    }

    pub fn seek(&mut self, ms: u64) -> Option<SessionId> {
        self.manager.dispatch(PlaybackCommand::Seek { ms })
    }

    /// Set volume percent; values above 100 are clamped.
    pub fn set_volume(&mut self, value: u8) -> Option<SessionId> {
        let value = value.min(100);
        self.status.volume = value;
        self.manager.dispatch(PlaybackCommand::SetVolume { value })
    }

    pub fn set_mute(&mut self, muted: bool) -> Option<SessionId> {
        self.status.muted = muted;
        self.manager.dispatch(PlaybackCommand::SetMute { muted })
    }

    pub fn set_rate(&mut self, rate: f32) -> Result<Option<SessionId>, PlaybackError> {
        if !rate.is_finite() || rate <= 0.0 {
            return Err(PlaybackError::InvalidArgument(format!(
                "playback rate must be finite and positive, got {rate}"
            )));
        }
        self.status.rate = rate;
        Ok(self.manager.dispatch(PlaybackCommand::SetRate { rate }))
    }

    pub fn select_audio_track(&mut self, id: i32) -> Option<SessionId> {
        let target = self.manager.dispatch(PlaybackCommand::SelectAudioTrack { id });
        if target.is_some() {
            self.status.selected_audio_track = Some(id);
        }
        target
    }

    /// `None` disables subtitles.
    pub fn select_subtitle_track(&mut self, id: Option<i32>) -> Option<SessionId> {
        let target = self
            .manager
            .dispatch(PlaybackCommand::SelectSubtitleTrack { id });
        if target.is_some() {
            self.status.selected_subtitle_track = id;
        }
        target
    }

    /// Retire the active session without loading anything else.
    pub fn stop(&mut self) -> Option<SessionId> {
        let id = self.manager.stop()?;
        self.status.clear_media();
        self.status.session = None;
        Some(id)
    }

    /// Stop everything and wait up to `timeout` for retiring sessions.
    pub fn shutdown(&mut self, timeout: Duration) -> Vec<PlaybackEvent> {
        self.status.clear_media();
        self.status.session = None;
        let events = self.manager.shutdown(timeout);
        self.deliver(events)
    }

    /// Run queued events through the status snapshot and subscribers.
    pub fn process_events(&mut self) -> Vec<PlaybackEvent> {
        let events = self.manager.process_events();
        self.deliver(events)
    }

    /// Like [`Playback::process_events`], but waits up to `timeout` for the first event.
    pub fn wait_and_process(&mut self, timeout: Duration) -> Vec<PlaybackEvent> {
        let events = self.manager.wait_event(timeout);
        self.deliver(events)
    }

    pub fn status(&self) -> PlaybackStatus {
        self.status.clone()
    }

    pub fn subscribe<F>(&mut self, handler: F)
    where
        F: FnMut(&PlaybackEvent) + 'static,
    {
        self.handlers.push(Box::new(handler));
    }

    pub fn on_state_changed<F>(&mut self, mut handler: F)
    where
        F: FnMut(SessionId, SessionState) + 'static,
    {
        self.subscribe(move |event| {
            if let PlaybackEvent::StateChanged { session, state } = event {
                handler(*session, *state);
            }
        });
    }

    pub fn on_position_changed<F>(&mut self, mut handler: F)
    where
        F: FnMut(SessionId, u64) + 'static,
    {
        self.subscribe(move |event| {
            if let PlaybackEvent::PositionChanged { session, ms } = event {
                handler(*session, *ms);
            }
        });
    }

    pub fn on_duration_changed<F>(&mut self, mut handler: F)
    where
        F: FnMut(SessionId, u64) + 'static,
    {
        self.subscribe(move |event| {
            if let PlaybackEvent::DurationChanged { session, ms } = event {
                handler(*session, *ms);
            }
        });
    }

    pub fn on_media_loaded<F>(&mut self, mut handler: F)
    where
        F: FnMut(&MediaLoaded<'_>) + 'static,
    {
        self.subscribe(move |event| {
            if let PlaybackEvent::MediaLoaded {
                session,
                metadata,
                is_video,
                audio_tracks,
                subtitle_tracks,
            } = event
            {
                handler(&MediaLoaded {
                    session: *session,
                    metadata,
                    is_video: *is_video,
                    audio_tracks,
                    subtitle_tracks,
                });
            }
        });
    }

    pub fn on_end_reached<F>(&mut self, mut handler: F)
    where
        F: FnMut(SessionId) + 'static,
    {
        self.subscribe(move |event| {
            if let PlaybackEvent::EndReached { session } = event {
                handler(*session);
            }
        });
    }

    pub fn on_error<F>(&mut self, mut handler: F)
    where
        F: FnMut(SessionId, ErrorKind, &str) + 'static,
    {
        self.subscribe(move |event| {
            if let PlaybackEvent::Error {
                session,
                kind,
                message,
            } = event
            {
                handler(*session, *kind, message.as_str());
            }
        });
    }

    pub fn on_surface_released<F>(&mut self, mut handler: F)
    where
        F: FnMut(SurfaceHandle) + 'static,
    {
        self.subscribe(move |event| {
            if let PlaybackEvent::SurfaceReleased { surface } = event {
                handler(*surface);
            }
        });
    }

    fn deliver(&mut self, events: Vec<ManagerEvent>) -> Vec<PlaybackEvent> {
        let mut delivered = Vec::with_capacity(events.len());
        for event in events {
            match event {
                ManagerEvent::Playback(event) => {
                    self.apply(&event);
                    for handler in self.handlers.iter_mut() {
                        handler(&event);
                    }
                    delivered.push(event);
                }
                ManagerEvent::SessionRetired { session, report } => {
                    if !report.is_clean() {
                        tracing::debug!(
                            session = %session,
                            failures = report.failures.len(),
                            "session retired with teardown failures"
                        );
                    }
                }
            }
        }
        self.status.live_surfaces = self.manager.surfaces().live_count();
        delivered
    }

    fn apply(&mut self, event: &PlaybackEvent) {
        if let Some(session) = event.session() {
            if self.status.session != Some(session) {
                return;
            }
        }
        let status = &mut self.status;
        match event {
            PlaybackEvent::StateChanged { state, .. } => status.state = Some(*state),
            PlaybackEvent::PositionChanged { ms, .. } => status.position_ms = Some(*ms),
            PlaybackEvent::DurationChanged { ms, .. } => status.duration_ms = Some(*ms),
            PlaybackEvent::MediaLoaded {
                metadata,
                is_video,
                audio_tracks,
                subtitle_tracks,
                ..
            } => {
                status.metadata = Some(metadata.clone());
                status.is_video = *is_video;
                status.audio_tracks = audio_tracks.clone();
                status.subtitle_tracks = subtitle_tracks.clone();
                if status.selected_audio_track.is_none() {
                    status.selected_audio_track = audio_tracks.first().map(|t| t.id);
                }
            }
            PlaybackEvent::EndReached { .. } => {
                if let Some(duration) = status.duration_ms {
                    status.position_ms = Some(duration);
                }
            }
            PlaybackEvent::Error { message, .. } => status.last_error = Some(message.clone()),
            PlaybackEvent::SurfaceReleased { .. } => {}
        }
    }
}
