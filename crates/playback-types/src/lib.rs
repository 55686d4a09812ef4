use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Monotonically increasing playback session identifier.
///
/// Used for ownership and log correlation only.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

/// Identifier of one render target minted by the surface registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SurfaceId(pub u64);

impl fmt::Display for SurfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "surface-{}", self.0)
    }
}

/// Platform render-target handle supplied by the host (window id, view pointer, ...).
pub type RawSurface = u64;

/// Render target a session draws into.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SurfaceHandle {
    /// Registry-assigned id, never reused.
    pub id: SurfaceId,
    /// Host platform handle, when the host backs the surface with a real widget.
    pub raw: Option<RawSurface>,
}

/// Lifecycle state of one playback session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Worker exists, its thread has not started yet.
    Created,
    /// Native engine is being constructed and bound to its surface.
    Initializing,
    Playing,
    Paused,
    /// Retirement received, native teardown in progress.
    Stopping,
    /// Native objects released; the surface may be reclaimed.
    Stopped,
    /// Initialization or playback failed. Reported once.
    Errored,
}

impl SessionState {
    /// Stable numeric encoding used by atomic state cells.
    pub fn as_u8(self) -> u8 {
        match self {
            SessionState::Created => 0,
            SessionState::Initializing => 1,
            SessionState::Playing => 2,
            SessionState::Paused => 3,
            SessionState::Stopping => 4,
            SessionState::Stopped => 5,
            SessionState::Errored => 6,
        }
    }

    /// Inverse of [`SessionState::as_u8`]; unknown values map to `Errored`.
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => SessionState::Created,
            1 => SessionState::Initializing,
            2 => SessionState::Playing,
            3 => SessionState::Paused,
            4 => SessionState::Stopping,
            5 => SessionState::Stopped,
            _ => SessionState::Errored,
        }
    }

    /// `true` for states in which transport commands are applied.
    pub fn accepts_transport(self) -> bool {
        matches!(self, SessionState::Playing | SessionState::Paused)
    }
}

/// Transport or control request routed to the active session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlaybackCommand {
    Play,
    Pause,
    TogglePause,
    Seek { ms: u64 },
    /// Volume percent, 0..=100.
    SetVolume { value: u8 },
    SetMute { muted: bool },
    /// Playback rate multiplier, must be finite and > 0.
    SetRate { rate: f32 },
    SelectAudioTrack { id: i32 },
    /// `None` disables subtitles.
    SelectSubtitleTrack { id: Option<i32> },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackKind {
    Audio,
    Subtitle,
}

/// One selectable audio or subtitle track.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    pub id: i32,
    pub kind: TrackKind,
    pub display_name: String,
    pub language: Option<String>,
}

/// Descriptive tags read from the media container.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub genre: Option<String>,
    pub date: Option<String>,
    pub codec: Option<String>,
    /// Tags without a dedicated field, keyed by their container name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

/// Everything the engine knows about an opened media once headers are parsed.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaInfo {
    pub metadata: Metadata,
    pub is_video: bool,
    pub duration_ms: Option<u64>,
    pub audio_tracks: Vec<Track>,
    pub subtitle_tracks: Vec<Track>,
}

/// Error class surfaced to the host.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Engine or media could not be opened.
    Initialization,
    /// Engine reported a failure while playing.
    Runtime,
}

/// Event emitted by a session worker on its own thread.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionEvent {
    StateChanged { state: SessionState },
    PositionChanged { ms: u64 },
    DurationChanged { ms: u64 },
    MetadataReady { info: MediaInfo },
    EndReached,
    Error {
        #[serde(rename = "error_kind")]
        kind: ErrorKind,
        message: String,
    },
}

/// Application-level notification delivered on the control thread.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlaybackEvent {
    StateChanged {
        session: SessionId,
        state: SessionState,
    },
    PositionChanged {
        session: SessionId,
        ms: u64,
    },
    DurationChanged {
        session: SessionId,
        ms: u64,
    },
    MediaLoaded {
        session: SessionId,
        metadata: Metadata,
        is_video: bool,
        audio_tracks: Vec<Track>,
        subtitle_tracks: Vec<Track>,
    },
    EndReached {
        session: SessionId,
    },
    Error {
        session: SessionId,
        #[serde(rename = "error_kind")]
        kind: ErrorKind,
        message: String,
    },
    /// The host may now dispose the widget backing this render target.
    SurfaceReleased { surface: SurfaceHandle },
}

impl PlaybackEvent {
    /// Wrap a worker event for the given session.
    pub fn from_session(session: SessionId, event: SessionEvent) -> Self {
        match event {
            SessionEvent::StateChanged { state } => PlaybackEvent::StateChanged { session, state },
            SessionEvent::PositionChanged { ms } => PlaybackEvent::PositionChanged { session, ms },
            SessionEvent::DurationChanged { ms } => PlaybackEvent::DurationChanged { session, ms },
            SessionEvent::MetadataReady { info } => PlaybackEvent::MediaLoaded {
                session,
                metadata: info.metadata,
                is_video: info.is_video,
                audio_tracks: info.audio_tracks,
                subtitle_tracks: info.subtitle_tracks,
            },
            SessionEvent::EndReached => PlaybackEvent::EndReached { session },
            SessionEvent::Error { kind, message } => PlaybackEvent::Error {
                session,
                kind,
                message,
            },
        }
    }

    /// Session the event belongs to; `None` for surface notifications.
    pub fn session(&self) -> Option<SessionId> {
        match self {
            PlaybackEvent::StateChanged { session, .. }
            | PlaybackEvent::PositionChanged { session, .. }
            | PlaybackEvent::DurationChanged { session, .. }
            | PlaybackEvent::MediaLoaded { session, .. }
            | PlaybackEvent::EndReached { session }
            | PlaybackEvent::Error { session, .. } => Some(*session),
            PlaybackEvent::SurfaceReleased { .. } => None,
        }
    }
}

/// Facade-level playback snapshot for hosts and status displays.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlaybackStatus {
    /// Path requested by the most recent load.
    pub path: Option<String>,
    /// Currently active session, if any.
    pub session: Option<SessionId>,
    pub state: Option<SessionState>,
    pub position_ms: Option<u64>,
    pub duration_ms: Option<u64>,
    /// Volume percent (0..=100).
    pub volume: u8,
    pub muted: bool,
    pub rate: f32,
    pub metadata: Option<Metadata>,
    pub is_video: bool,
    pub audio_tracks: Vec<Track>,
    pub subtitle_tracks: Vec<Track>,
    pub selected_audio_track: Option<i32>,
    pub selected_subtitle_track: Option<i32>,
    /// Last error reported by the active session.
    pub last_error: Option<String>,
    /// Surfaces still leased to active or retiring sessions.
    pub live_surfaces: usize,
}

impl Default for PlaybackStatus {
    fn default() -> Self {
        Self {
            path: None,
            session: None,
            state: None,
            position_ms: None,
            duration_ms: None,
            volume: 100,
            muted: false,
            rate: 1.0,
            metadata: None,
            is_video: false,
            audio_tracks: Vec::new(),
            subtitle_tracks: Vec::new(),
            selected_audio_track: None,
            selected_subtitle_track: None,
            last_error: None,
            live_surfaces: 0,
        }
    }
}

impl PlaybackStatus {
    /// Clear fields tied to the media of a previous session.
    pub fn clear_media(&mut self) {
        self.state = None;
        self.position_ms = None;
        self.duration_ms = None;
        self.metadata = None;
        self.is_video = false;
        self.audio_tracks.clear();
        self.subtitle_tracks.clear();
        self.selected_audio_track = None;
        self.selected_subtitle_track = None;
        self.last_error = None;
    }
}
