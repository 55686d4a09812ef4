//! Native media engine abstraction.
//!
//! Mirrors the shape of a native playback API: one engine instance, one media
//! object and one player object per opened path. Implementations live in
//! [`probe`] (Symphonia-backed, headless) and [`sim`] (scriptable).

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use playback_types::{MediaInfo, SurfaceHandle};

use crate::error::EngineError;

mod handle;
pub mod probe;
pub mod sim;

pub use handle::NativeEngineHandle;

/// Change notification pushed by an engine-internal thread.
#[derive(Clone, Debug, PartialEq)]
pub enum EngineNotification {
    Playing,
    Paused,
    PositionChanged(u64),
    DurationChanged(u64),
    EndReached,
    Error(String),
}

/// Queued delivery target for native notifications.
///
/// Calling the sink only enqueues; it never runs receiver logic on the
/// engine's thread.
#[derive(Clone)]
pub struct NotificationSink {
    deliver: Arc<dyn Fn(EngineNotification) + Send + Sync>,
}

impl NotificationSink {
    pub fn new<F>(deliver: F) -> Self
    where
        F: Fn(EngineNotification) + Send + Sync + 'static,
    {
        Self {
            deliver: Arc::new(deliver),
        }
    }

    pub fn notify(&self, notification: EngineNotification) {
        (self.deliver)(notification);
    }
}

impl fmt::Debug for NotificationSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("NotificationSink")
    }
}

/// Factory for native engine instances.
pub trait EngineBackend: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;
    /// Create an engine instance with fixed startup args.
    fn new_instance(&self, args: &[String]) -> Result<Box<dyn EngineInstance>, EngineError>;
}

/// One native engine instance.
pub trait EngineInstance: Send {
    fn open_media(&mut self, path: &Path) -> Result<Box<dyn EngineMedia>, EngineError>;
    fn new_player(&mut self, media: &dyn EngineMedia) -> Result<Box<dyn EnginePlayer>, EngineError>;
    fn release(self: Box<Self>) -> Result<(), EngineError>;
}

/// One opened native media object.
pub trait EngineMedia: Send {
    fn path(&self) -> &Path;
    /// Total duration if the container declares one.
    fn duration_ms(&self) -> Option<u64>;
    /// Parsed media description; `Ok(None)` while the engine is still reading headers.
    fn parse_info(&mut self) -> Result<Option<MediaInfo>, EngineError>;
    fn release(self: Box<Self>) -> Result<(), EngineError>;
}

/// One native player object bound to a media.
pub trait EnginePlayer: Send {
    fn set_output(&mut self, surface: SurfaceHandle) -> Result<(), EngineError>;
    fn play(&mut self) -> Result<(), EngineError>;
    fn pause(&mut self) -> Result<(), EngineError>;
    /// May block for as long as the native engine needs.
    fn stop(&mut self) -> Result<(), EngineError>;
    fn seek(&mut self, ms: u64) -> Result<(), EngineError>;
    fn set_volume(&mut self, volume: u8) -> Result<(), EngineError>;
    fn set_mute(&mut self, muted: bool) -> Result<(), EngineError>;
    fn set_rate(&mut self, rate: f32) -> Result<(), EngineError>;
    fn select_audio_track(&mut self, id: i32) -> Result<(), EngineError>;
    fn select_subtitle_track(&mut self, id: Option<i32>) -> Result<(), EngineError>;
    fn attach_notifications(&mut self, sink: NotificationSink) -> Result<(), EngineError>;
    /// After this returns no further notification may be delivered.
    fn detach_notifications(&mut self) -> Result<(), EngineError>;
    fn release(self: Box<Self>) -> Result<(), EngineError>;
}
