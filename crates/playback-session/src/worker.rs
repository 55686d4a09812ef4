//! Per-session playback worker.
//!
//! Each session runs on its own thread and owns exactly one
//! [`NativeEngineHandle`]. Commands, native notifications and the retire
//! message all arrive through one inbox, so they are applied in order.
//! Events go back to the control thread as queued [`WorkerMessage`]s.

use std::panic::{self, AssertUnwindSafe};
use std::any::Any;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::thread::JoinHandle;
use std::time::Instant;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use playback_types::{
    ErrorKind, MediaInfo, PlaybackCommand, SessionEvent, SessionId, SessionState, SurfaceHandle,
};

use crate::config::SessionConfig;
use crate::engine::{EngineBackend, EngineNotification, NativeEngineHandle, NotificationSink};
use crate::error::{EngineError, PlaybackError};
use crate::teardown::TeardownReport;

/// Inbox entries of a worker thread.
#[derive(Debug)]
enum WorkerInput {
    Command(PlaybackCommand),
    Native(EngineNotification),
    Retire,
}

/// Message from a worker thread to the control thread.
#[derive(Debug)]
pub enum WorkerMessage {
    Event {
        session: SessionId,
        event: SessionEvent,
    },
    /// One-shot "fully stopped" signal: native objects are gone.
    Stopped {
        session: SessionId,
        report: TeardownReport,
    },
}

/// Lock-free view of a worker's state, shared with the control thread.
#[derive(Clone, Debug)]
pub struct StateCell(Arc<AtomicU8>);

impl StateCell {
    fn new(state: SessionState) -> Self {
        Self(Arc::new(AtomicU8::new(state.as_u8())))
    }

    pub fn get(&self) -> SessionState {
        SessionState::from_u8(self.0.load(Ordering::Acquire))
    }

    fn set(&self, state: SessionState) -> SessionState {
        SessionState::from_u8(self.0.swap(state.as_u8(), Ordering::AcqRel))
    }
}

/// A worker that has been created but whose thread has not started.
pub struct SessionWorker {
    id: SessionId,
    path: PathBuf,
    surface: SurfaceHandle,
    backend: Arc<dyn EngineBackend>,
    config: SessionConfig,
    events: Sender<WorkerMessage>,
    state: StateCell,
}

impl SessionWorker {
    pub fn new(
        id: SessionId,
        path: PathBuf,
        surface: SurfaceHandle,
        backend: Arc<dyn EngineBackend>,
        config: SessionConfig,
        events: Sender<WorkerMessage>,
    ) -> Self {
        Self {
            id,
            path,
            surface,
            backend,
            config,
            events,
            state: StateCell::new(SessionState::Created),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state.get()
    }

    /// Spawn the session thread. The worker enters `Initializing` on that thread.
    pub fn start(self) -> std::io::Result<WorkerHandle> {
        let (inbox_tx, inbox_rx) = crossbeam_channel::unbounded();
        let id = self.id;
        let surface = self.surface;
        let state = self.state.clone();
        let sink_tx = inbox_tx.clone();

        let join = std::thread::Builder::new()
            .name(format!("session-{}", id.0))
            .spawn(move || {
                let events = self.events.clone();
                let state = self.state.clone();
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                    WorkerLoop::new(self).run(inbox_rx, sink_tx)
                }));
                if let Err(payload) = outcome {
                    let message = panic_message(payload.as_ref());
                    tracing::error!(session = %id, %message, "session worker panicked");
                    state.set(SessionState::Errored);
                    let _ = events.send(WorkerMessage::Event {
                        session: id,
                        event: SessionEvent::Error {
                            kind: ErrorKind::Runtime,
                            message: format!("session worker panicked: {message}"),
                        },
                    });
                    let _ = events.send(WorkerMessage::Stopped {
                        session: id,
                        report: TeardownReport::default(),
                    });
                }
            })?;

        tracing::debug!(session = %id, surface = %surface.id, "session worker started");
        Ok(WorkerHandle {
            id,
            surface,
            inbox: inbox_tx,
            state,
            join: Some(join),
            retire_sent: false,
        })
    }
}

/// Control-thread handle to a running worker.
pub struct WorkerHandle {
    id: SessionId,
    surface: SurfaceHandle,
    inbox: Sender<WorkerInput>,
    state: StateCell,
    join: Option<JoinHandle<()>>,
    retire_sent: bool,
}

impl WorkerHandle {
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn surface(&self) -> SurfaceHandle {
        self.surface
    }

    pub fn state(&self) -> SessionState {
        self.state.get()
    }

    /// Queue a command. Returns `false` once the worker is retiring or gone.
    pub fn send(&self, command: PlaybackCommand) -> bool {
        if self.retire_sent {
            return false;
        }
        self.inbox.send(WorkerInput::Command(command)).is_ok()
    }

    /// Queue the retire message. Never blocks; only the first call sends.
    pub fn retire(&mut self) -> bool {
        if self.retire_sent {
            return false;
        }
        self.retire_sent = true;
        let _ = self.inbox.send(WorkerInput::Retire);
        true
    }

    /// Join the worker thread. Only called after its stopped signal arrived.
    pub fn join(&mut self) {
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                tracing::warn!(session = %self.id, "session thread ended with a panic");
            }
        }
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        if !self.retire_sent {
            self.retire();
        }
    }
}

/// State owned by the worker thread.
struct WorkerLoop {
    id: SessionId,
    path: PathBuf,
    surface: SurfaceHandle,
    backend: Arc<dyn EngineBackend>,
    config: SessionConfig,
    events: Sender<WorkerMessage>,
    state: StateCell,
    handle: Option<NativeEngineHandle>,
    cached_info: Option<MediaInfo>,
    metadata_due: Option<Instant>,
    metadata_polls: u32,
    last_seek: Option<Instant>,
    last_position: Option<u64>,
    duration: Option<u64>,
}

impl WorkerLoop {
    fn new(worker: SessionWorker) -> Self {
        Self {
            id: worker.id,
            path: worker.path,
            surface: worker.surface,
            backend: worker.backend,
            config: worker.config,
            events: worker.events,
            state: worker.state,
            handle: None,
            cached_info: None,
            metadata_due: None,
            metadata_polls: 0,
            last_seek: None,
            last_position: None,
            duration: None,
        }
    }

    fn run(mut self, inbox: Receiver<WorkerInput>, sink_tx: Sender<WorkerInput>) {
        self.initialize(sink_tx);

        loop {
            let input = match self.metadata_due {
                Some(due) => match inbox.recv_deadline(due) {
                    Ok(input) => Some(input),
                    Err(RecvTimeoutError::Timeout) => None,
                    Err(RecvTimeoutError::Disconnected) => Some(WorkerInput::Retire),
                },
                None => Some(inbox.recv().unwrap_or(WorkerInput::Retire)),
            };
            match input {
                None => self.poll_metadata(),
                Some(WorkerInput::Retire) => break,
                Some(WorkerInput::Command(command)) => self.apply(command),
                Some(WorkerInput::Native(notification)) => self.on_native(notification),
            }
        }

        self.shut_down();
    }

    fn initialize(&mut self, sink_tx: Sender<WorkerInput>) {
        self.set_state(SessionState::Initializing);
        tracing::info!(
            session = %self.id,
            path = ?self.path,
            surface = %self.surface.id,
            backend = self.backend.name(),
            "session initializing"
        );

        let sink = NotificationSink::new(move |n| {
            let _ = sink_tx.send(WorkerInput::Native(n));
        });
        let args = self.config.engine_args();
        let opened = NativeEngineHandle::open(
            self.backend.as_ref(),
            &self.path,
            self.surface,
            &args,
            sink,
            Some(self.id),
        );
        let mut handle = match opened {
            Ok(handle) => handle,
            Err(err) => {
                self.fail(PlaybackError::Initialization(err));
                return;
            }
        };

        if let Err(err) = handle.play() {
            let report = handle.teardown();
            tracing::debug!(session = %self.id, failures = report.failures.len(), "released after failed start");
            self.fail(PlaybackError::Initialization(err));
            return;
        }
        if let Some(ms) = handle.duration_ms() {
            self.publish_duration(ms);
        }
        self.handle = Some(handle);
        self.set_state(SessionState::Playing);
        self.metadata_due = Some(Instant::now() + self.config.metadata_delay());
    }

    fn apply(&mut self, command: PlaybackCommand) {
        let state = self.state.get();
        let Some(handle) = self.handle.as_mut() else {
            tracing::debug!(session = %self.id, ?command, ?state, "command ignored without engine");
            return;
        };
        if !state.accepts_transport() {
            tracing::debug!(session = %self.id, ?command, ?state, "command ignored");
            return;
        }

        let result = match &command {
            PlaybackCommand::Play => handle.play().map(|_| Some(SessionState::Playing)),
            PlaybackCommand::Pause => pause(handle),
            PlaybackCommand::TogglePause => {
                if state == SessionState::Playing {
                    pause(handle)
                } else {
                    handle.play().map(|_| Some(SessionState::Playing))
                }
            }
            PlaybackCommand::Seek { ms } => {
                self.last_seek = Some(Instant::now());
                handle.player_mut().and_then(|p| p.seek(*ms)).map(|_| None)
            }
            PlaybackCommand::SetVolume { value } => handle
                .player_mut()
                .and_then(|p| p.set_volume((*value).min(100)))
                .map(|_| None),
            PlaybackCommand::SetMute { muted } => handle
                .player_mut()
                .and_then(|p| p.set_mute(*muted))
                .map(|_| None),
            PlaybackCommand::SetRate { rate } => {
                if !rate.is_finite() || *rate <= 0.0 {
                    tracing::warn!(session = %self.id, rate, "invalid rate ignored");
                    return;
                }
                handle.player_mut().and_then(|p| p.set_rate(*rate)).map(|_| None)
            }
            PlaybackCommand::SelectAudioTrack { id } => {
                if !track_known(self.cached_info.as_ref().map(|i| &i.audio_tracks), *id) {
                    tracing::warn!(session = %self.id, track = id, "unknown audio track ignored");
                    return;
                }
                handle
                    .player_mut()
                    .and_then(|p| p.select_audio_track(*id))
                    .map(|_| None)
            }
            PlaybackCommand::SelectSubtitleTrack { id } => {
                if let Some(track) = id {
                    if !track_known(self.cached_info.as_ref().map(|i| &i.subtitle_tracks), *track) {
                        tracing::warn!(session = %self.id, track, "unknown subtitle track ignored");
                        return;
                    }
                }
                handle
                    .player_mut()
                    .and_then(|p| p.select_subtitle_track(*id))
                    .map(|_| None)
            }
        };

        match result {
            Ok(Some(next)) => self.set_state(next),
            Ok(None) => {}
            Err(err) => self.fail(PlaybackError::Runtime(err)),
        }
    }

    fn on_native(&mut self, notification: EngineNotification) {
        let state = self.state.get();
        if !state.accepts_transport() {
            tracing::trace!(session = %self.id, ?notification, ?state, "notification dropped");
            return;
        }
        match notification {
            // Commands own Playing/Paused; the engine echo lags behind queued commands.
            confirmed @ (EngineNotification::Playing | EngineNotification::Paused) => {
                tracing::trace!(session = %self.id, ?confirmed, ?state, "transport confirmed");
            }
            EngineNotification::PositionChanged(ms) => {
                if self.last_position != Some(ms) {
                    self.last_position = Some(ms);
                    self.emit(SessionEvent::PositionChanged { ms });
                }
            }
            EngineNotification::DurationChanged(ms) => self.publish_duration(ms),
            EngineNotification::EndReached => {
                let guard = self.config.end_reached_guard();
                if self.last_seek.is_some_and(|at| at.elapsed() < guard) {
                    tracing::debug!(session = %self.id, "end reached right after seek ignored");
                    return;
                }
                self.emit(SessionEvent::EndReached);
                self.set_state(SessionState::Paused);
            }
            EngineNotification::Error(message) => {
                self.fail(PlaybackError::Runtime(EngineError::call("playback", message)))
            }
        }
    }

    fn poll_metadata(&mut self) {
        self.metadata_due = None;
        if self.cached_info.is_some() || !self.state.get().accepts_transport() {
            return;
        }
        let Some(handle) = self.handle.as_mut() else {
            return;
        };
        self.metadata_polls += 1;
        let last_attempt = self.metadata_polls >= self.config.metadata_attempts.max(1);

        match handle.media_info() {
            Ok(Some(info)) => self.publish_metadata(info),
            Ok(None) if !last_attempt => {
                tracing::debug!(session = %self.id, poll = self.metadata_polls, "metadata not parsed yet");
                self.metadata_due = Some(Instant::now() + self.config.metadata_delay());
            }
            Err(err) if !last_attempt => {
                tracing::debug!(session = %self.id, error = %err, "metadata parse failed, retrying");
                self.metadata_due = Some(Instant::now() + self.config.metadata_delay());
            }
            outcome => {
                if let Err(err) = outcome {
                    tracing::warn!(session = %self.id, error = %err, "metadata unavailable");
                }
                let info = MediaInfo {
                    duration_ms: self.duration,
                    ..MediaInfo::default()
                };
                self.publish_metadata(info);
            }
        }
    }

    fn publish_metadata(&mut self, info: MediaInfo) {
        if let Some(ms) = info.duration_ms {
            self.publish_duration(ms);
        }
        tracing::info!(
            session = %self.id,
            title = info.metadata.title.as_deref().unwrap_or(""),
            audio_tracks = info.audio_tracks.len(),
            subtitle_tracks = info.subtitle_tracks.len(),
            is_video = info.is_video,
            "metadata ready"
        );
        self.cached_info = Some(info.clone());
        self.emit(SessionEvent::MetadataReady { info });
    }

    fn publish_duration(&mut self, ms: u64) {
        if self.duration != Some(ms) {
            self.duration = Some(ms);
            self.emit(SessionEvent::DurationChanged { ms });
        }
    }

    /// Retirement: silence, detach and release the engine, then signal completion.
    fn shut_down(mut self) {
        let errored = self.state.get() == SessionState::Errored;
        if !errored {
            self.set_state(SessionState::Stopping);
        }
        let started = Instant::now();
        let report = match self.handle.take() {
            Some(mut handle) => handle.teardown(),
            None => TeardownReport::default(),
        };
        if !errored {
            self.set_state(SessionState::Stopped);
        }
        tracing::info!(
            session = %self.id,
            elapsed_ms = started.elapsed().as_millis() as u64,
            failed_steps = report.failures.len(),
            "session fully stopped"
        );
        let _ = self.events.send(WorkerMessage::Stopped {
            session: self.id,
            report,
        });
    }

    /// Enter `Errored` and report `err` once.
    fn fail(&mut self, err: PlaybackError) {
        if self.state.get() == SessionState::Errored {
            return;
        }
        let kind = err.kind().unwrap_or(ErrorKind::Runtime);
        let message = err.to_string();
        tracing::warn!(session = %self.id, ?kind, error = %message, "session errored");
        self.set_state(SessionState::Errored);
        self.metadata_due = None;
        self.emit(SessionEvent::Error { kind, message });
    }

    fn set_state(&mut self, state: SessionState) {
        let previous = self.state.set(state);
        if previous != state {
            tracing::debug!(session = %self.id, from = ?previous, to = ?state, "session state");
            self.emit(SessionEvent::StateChanged { state });
        }
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(WorkerMessage::Event {
            session: self.id,
            event,
        });
    }
}

fn pause(handle: &mut NativeEngineHandle) -> Result<Option<SessionState>, EngineError> {
    handle
        .player_mut()
        .and_then(|p| p.pause())
        .map(|_| Some(SessionState::Paused))
}

/// Unknown track lists (metadata not parsed yet) accept any id.
fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn track_known(tracks: Option<&Vec<playback_types::Track>>, id: i32) -> bool {
    tracks.is_none_or(|tracks| tracks.iter().any(|t| t.id == id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::sim::{SimBackend, SimCall, SimScript};
    use playback_types::SurfaceId;
    use std::time::Duration;

    struct Harness {
        backend: Arc<SimBackend>,
        events: Receiver<WorkerMessage>,
        handle: WorkerHandle,
        path: PathBuf,
    }

    fn fast_config() -> SessionConfig {
        SessionConfig {
            metadata_delay_ms: 20,
            metadata_attempts: 3,
            end_reached_guard_ms: 200,
            ..SessionConfig::default()
        }
    }

    fn start(script: SimScript, config: SessionConfig) -> Harness {
        let backend = Arc::new(SimBackend::new(script));
        let (tx, rx) = crossbeam_channel::unbounded();
        let path = PathBuf::from("/media/clip.mkv");
        let worker = SessionWorker::new(
            SessionId(1),
            path.clone(),
            SurfaceHandle {
                id: SurfaceId(1),
                raw: None,
            },
            backend.clone(),
            config,
            tx,
        );
        assert_eq!(worker.state(), SessionState::Created);
        let handle = worker.start().unwrap();
        Harness {
            backend,
            events: rx,
            handle,
            path,
        }
    }

    /// Collect session events until `pred` matches one; panics after 2s.
    fn wait_for(rx: &Receiver<WorkerMessage>, pred: impl Fn(&WorkerMessage) -> bool) -> Vec<WorkerMessage> {
        let deadline = Instant::now() + Duration::from_secs(2);
        let mut seen = Vec::new();
        loop {
            let msg = rx
                .recv_deadline(deadline)
                .unwrap_or_else(|_| panic!("timed out, seen {seen:?}"));
            let done = pred(&msg);
            seen.push(msg);
            if done {
                return seen;
            }
        }
    }

    fn is_event(msg: &WorkerMessage, want: &SessionEvent) -> bool {
        matches!(msg, WorkerMessage::Event { event, .. } if event == want)
    }

    fn is_stopped(msg: &WorkerMessage) -> bool {
        matches!(msg, WorkerMessage::Stopped { .. })
    }

    fn count(seen: &[WorkerMessage], pred: impl Fn(&SessionEvent) -> bool) -> usize {
        seen.iter()
            .filter(|m| matches!(m, WorkerMessage::Event { event, .. } if pred(event)))
            .count()
    }

    #[test]
    fn starts_playing_and_reports_metadata_once() {
        let mut h = start(SimScript::default(), fast_config());
        let seen = wait_for(&h.events, |m| {
            matches!(m, WorkerMessage::Event { event: SessionEvent::MetadataReady { .. }, .. })
        });
        assert!(seen.iter().any(|m| is_event(
            m,
            &SessionEvent::StateChanged {
                state: SessionState::Initializing
            }
        )));
        assert!(seen.iter().any(|m| is_event(
            m,
            &SessionEvent::StateChanged {
                state: SessionState::Playing
            }
        )));
        assert_eq!(h.handle.state(), SessionState::Playing);

        h.handle.retire();
        let rest = wait_for(&h.events, is_stopped);
        assert_eq!(
            count(&rest, |e| matches!(e, SessionEvent::MetadataReady { .. })),
            0
        );
        h.handle.join();
        assert_eq!(h.handle.state(), SessionState::Stopped);
        assert_eq!(h.backend.log().live_objects(), 0);
    }

    #[test]
    fn metadata_retries_until_parsed() {
        let mut h = start(
            SimScript {
                metadata_pending_polls: 2,
                ..SimScript::default()
            },
            fast_config(),
        );
        let seen = wait_for(&h.events, |m| {
            matches!(m, WorkerMessage::Event { event: SessionEvent::MetadataReady { .. }, .. })
        });
        let info = seen.iter().find_map(|m| match m {
            WorkerMessage::Event {
                event: SessionEvent::MetadataReady { info },
                ..
            } => Some(info.clone()),
            _ => None,
        });
        assert_eq!(info.unwrap().audio_tracks.len(), 2);
        let polls = h
            .backend
            .log()
            .calls_for(&h.path)
            .into_iter()
            .filter(|c| *c == SimCall::ParseInfo)
            .count();
        assert_eq!(polls, 3);
        h.handle.retire();
        wait_for(&h.events, is_stopped);
        h.handle.join();
    }

    #[test]
    fn metadata_falls_back_to_empty_after_last_attempt() {
        let mut h = start(
            SimScript {
                metadata_pending_polls: 10,
                ..SimScript::default()
            },
            fast_config(),
        );
        let seen = wait_for(&h.events, |m| {
            matches!(m, WorkerMessage::Event { event: SessionEvent::MetadataReady { .. }, .. })
        });
        let info = seen
            .iter()
            .find_map(|m| match m {
                WorkerMessage::Event {
                    event: SessionEvent::MetadataReady { info },
                    ..
                } => Some(info.clone()),
                _ => None,
            })
            .unwrap();
        assert!(info.audio_tracks.is_empty());
        assert_eq!(info.duration_ms, Some(60_000));
        h.handle.retire();
        wait_for(&h.events, is_stopped);
        h.handle.join();
    }

    #[test]
    fn pause_and_toggle_follow_commands() {
        let mut h = start(SimScript::default(), fast_config());
        wait_for(&h.events, |m| {
            is_event(m, &SessionEvent::StateChanged { state: SessionState::Playing })
        });
        assert!(h.handle.send(PlaybackCommand::Pause));
        wait_for(&h.events, |m| {
            is_event(m, &SessionEvent::StateChanged { state: SessionState::Paused })
        });
        assert!(h.handle.send(PlaybackCommand::TogglePause));
        wait_for(&h.events, |m| {
            is_event(m, &SessionEvent::StateChanged { state: SessionState::Playing })
        });
        h.handle.retire();
        wait_for(&h.events, is_stopped);
        h.handle.join();
    }

    #[test]
    fn play_then_pause_reports_states_in_command_order() {
        let mut h = start(SimScript::default(), fast_config());
        assert!(h.handle.send(PlaybackCommand::Play));
        assert!(h.handle.send(PlaybackCommand::Pause));
        assert!(h.handle.send(PlaybackCommand::Seek { ms: 1_000 }));
        let mut seen = wait_for(&h.events, |m| is_event(m, &SessionEvent::PositionChanged { ms: 1_000 }));
        assert_eq!(h.handle.state(), SessionState::Paused);

        h.handle.retire();
        seen.extend(wait_for(&h.events, is_stopped));
        h.handle.join();
        let states: Vec<SessionState> = seen
            .iter()
            .filter_map(|m| match m {
                WorkerMessage::Event {
                    event: SessionEvent::StateChanged { state },
                    ..
                } => Some(*state),
                _ => None,
            })
            .collect();
        assert_eq!(
            states,
            vec![
                SessionState::Initializing,
                SessionState::Playing,
                SessionState::Paused,
                SessionState::Stopping,
                SessionState::Stopped,
            ]
        );
    }

    #[test]
    fn end_reached_right_after_seek_is_ignored() {
        let mut h = start(SimScript::default(), fast_config());
        wait_for(&h.events, |m| {
            is_event(m, &SessionEvent::StateChanged { state: SessionState::Playing })
        });
        h.handle.send(PlaybackCommand::Seek { ms: 59_900 });
        wait_for(&h.events, |m| is_event(m, &SessionEvent::PositionChanged { ms: 59_900 }));
        assert!(h.backend.log().notify(&h.path, EngineNotification::EndReached));

        std::thread::sleep(Duration::from_millis(250));
        assert!(h.backend.log().notify(&h.path, EngineNotification::EndReached));
        let seen = wait_for(&h.events, |m| is_event(m, &SessionEvent::EndReached));
        assert_eq!(count(&seen, |e| *e == SessionEvent::EndReached), 1);
        h.handle.retire();
        wait_for(&h.events, is_stopped);
        h.handle.join();
    }

    #[test]
    fn initialization_error_reported_once_and_nothing_leaks() {
        let mut h = start(
            SimScript {
                fail_open: true,
                ..SimScript::default()
            },
            fast_config(),
        );
        let seen = wait_for(&h.events, |m| {
            matches!(m, WorkerMessage::Event { event: SessionEvent::Error { .. }, .. })
        });
        assert!(matches!(
            seen.last(),
            Some(WorkerMessage::Event {
                event: SessionEvent::Error {
                    kind: ErrorKind::Initialization,
                    ..
                },
                ..
            })
        ));
        assert_eq!(h.handle.state(), SessionState::Errored);
        assert_eq!(h.backend.log().live_objects(), 0);

        h.handle.send(PlaybackCommand::Play);
        h.handle.retire();
        let rest = wait_for(&h.events, is_stopped);
        assert_eq!(count(&rest, |e| matches!(e, SessionEvent::Error { .. })), 0);
        h.handle.join();
        assert_eq!(h.handle.state(), SessionState::Errored);
    }

    #[test]
    fn runtime_error_moves_to_errored_once() {
        let mut h = start(
            SimScript {
                fail_calls: vec!["seek"],
                ..SimScript::default()
            },
            fast_config(),
        );
        wait_for(&h.events, |m| {
            is_event(m, &SessionEvent::StateChanged { state: SessionState::Playing })
        });
        h.handle.send(PlaybackCommand::Seek { ms: 10 });
        h.handle.send(PlaybackCommand::Seek { ms: 20 });
        assert!(h.backend.log().notify(&h.path, EngineNotification::Error("decoder".into())));
        h.handle.retire();
        let seen = wait_for(&h.events, is_stopped);
        assert_eq!(count(&seen, |e| matches!(e, SessionEvent::Error { .. })), 1);
        assert_eq!(h.handle.state(), SessionState::Errored);
        h.handle.join();
        assert_eq!(h.backend.log().live_objects(), 0);
    }

    #[test]
    fn worker_panic_reports_runtime_error_before_stopped() {
        let mut h = start(
            SimScript {
                panic_calls: vec!["play"],
                ..SimScript::default()
            },
            fast_config(),
        );
        let seen = wait_for(&h.events, is_stopped);
        let error_at = seen.iter().position(|m| {
            matches!(
                m,
                WorkerMessage::Event {
                    event: SessionEvent::Error { kind: ErrorKind::Runtime, .. },
                    ..
                }
            )
        });
        assert_eq!(error_at, Some(seen.len() - 2));
        assert_eq!(h.handle.state(), SessionState::Errored);
        h.handle.join();
        assert_eq!(h.backend.log().live_objects(), 0);
    }

    #[test]
    fn unknown_track_selection_is_not_sent_to_engine() {
        let mut h = start(SimScript::default(), fast_config());
        wait_for(&h.events, |m| {
            matches!(m, WorkerMessage::Event { event: SessionEvent::MetadataReady { .. }, .. })
        });
        h.handle.send(PlaybackCommand::SelectAudioTrack { id: 42 });
        h.handle.send(PlaybackCommand::SelectAudioTrack { id: 2 });
        h.handle.send(PlaybackCommand::SelectSubtitleTrack { id: None });
        h.handle.retire();
        wait_for(&h.events, is_stopped);
        h.handle.join();
        let calls = h.backend.log().calls_for(&h.path);
        assert!(!calls.contains(&SimCall::SelectAudioTrack(42)));
        assert!(calls.contains(&SimCall::SelectAudioTrack(2)));
        assert!(calls.contains(&SimCall::SelectSubtitleTrack(None)));
    }

    #[test]
    fn retire_twice_sends_once() {
        let mut h = start(SimScript::default(), fast_config());
        assert!(h.handle.retire());
        assert!(!h.handle.retire());
        assert!(!h.handle.send(PlaybackCommand::Play));
        wait_for(&h.events, is_stopped);
        h.handle.join();
    }
}
