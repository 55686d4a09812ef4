use std::path::{Path, PathBuf};

use playback_types::{MediaInfo, SessionId, SurfaceHandle};

use super::{EngineBackend, EngineInstance, EngineMedia, EnginePlayer, NotificationSink};
use crate::error::EngineError;
use crate::teardown::{BestEffort, TeardownReport};

/// Exclusive owner of one native instance, media and player.
///
/// Dropping the handle releases whatever is still held.
pub struct NativeEngineHandle {
    session: Option<SessionId>,
    path: PathBuf,
    surface: SurfaceHandle,
    instance: Option<Box<dyn EngineInstance>>,
    media: Option<Box<dyn EngineMedia>>,
    player: Option<Box<dyn EnginePlayer>>,
    attached: bool,
    started: bool,
}

impl NativeEngineHandle {
    /// Create instance, media and player, bind the surface and attach notifications.
    ///
    /// On failure everything created so far is released before returning.
    pub fn open(
        backend: &dyn EngineBackend,
        path: &Path,
        surface: SurfaceHandle,
        args: &[String],
        sink: NotificationSink,
        session: Option<SessionId>,
    ) -> Result<Self, EngineError> {
        tracing::debug!(
            session = ?session,
            backend = backend.name(),
            args = ?args,
            "engine startup args"
        );
        let mut handle = Self {
            session,
            path: path.to_path_buf(),
            surface,
            instance: None,
            media: None,
            player: None,
            attached: false,
            started: false,
        };

        handle.instance = Some(backend.new_instance(args)?);
        if let Some(instance) = handle.instance.as_mut() {
            handle.media = Some(instance.open_media(path)?);
        }
        if let (Some(instance), Some(media)) = (handle.instance.as_mut(), handle.media.as_deref()) {
            handle.player = Some(instance.new_player(media)?);
        }

        let player = handle.player_mut()?;
        player.set_output(surface)?;
        player.attach_notifications(sink)?;
        handle.attached = true;
        Ok(handle)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn surface(&self) -> SurfaceHandle {
        self.surface
    }

    /// `true` while any native object is still held.
    pub fn is_live(&self) -> bool {
        self.instance.is_some() || self.media.is_some() || self.player.is_some()
    }

    /// Declared media duration, if known at open time.
    pub fn duration_ms(&self) -> Option<u64> {
        self.media.as_ref().and_then(|m| m.duration_ms())
    }

    pub fn player_mut(&mut self) -> Result<&mut dyn EnginePlayer, EngineError> {
        match self.player.as_mut() {
            Some(player) => Ok(player.as_mut()),
            None => Err(EngineError::Released("player")),
        }
    }

    pub fn play(&mut self) -> Result<(), EngineError> {
        self.player_mut()?.play()?;
        self.started = true;
        Ok(())
    }

    pub fn media_info(&mut self) -> Result<Option<MediaInfo>, EngineError> {
        match self.media.as_mut() {
            Some(media) => media.parse_info(),
            None => Err(EngineError::Released("media")),
        }
    }

    /// Silence, detach, stop and release, each step independent of the others.
    ///
    /// Notifications are detached before any native object is released.
    pub fn teardown(&mut self) -> TeardownReport {
        let mut seq = BestEffort::new(self.session);
        if let Some(player) = self.player.as_mut() {
            if self.started {
                seq.step("mute", || player.set_mute(true));
                seq.step("zero_volume", || player.set_volume(0));
                seq.step("pause", || player.pause());
            }
            if self.attached {
                seq.step("detach_notifications", || player.detach_notifications());
            }
            if self.started {
                seq.step("stop", || player.stop());
            }
        }
        self.attached = false;
        self.started = false;

        if let Some(player) = self.player.take() {
            seq.step("release_player", move || player.release());
        }
        if let Some(media) = self.media.take() {
            seq.step("release_media", move || media.release());
        }
        if let Some(instance) = self.instance.take() {
            seq.step("release_instance", move || instance.release());
        }
        seq.finish()
    }
}

impl Drop for NativeEngineHandle {
    fn drop(&mut self) {
        if self.is_live() {
            let report = self.teardown();
            tracing::debug!(
                session = ?self.session,
                path = ?self.path,
                steps = report.steps_run,
                failures = report.failures.len(),
                "engine handle released on drop"
            );
        }
    }
}
