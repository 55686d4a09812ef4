//! Active/retiring session bookkeeping on the control thread.
//!
//! Routing is keyed by the active session id: commands only ever reach the
//! active worker, and worker events are dropped unless they come from it.
//! Retiring sessions are tracked until their stopped signal arrives, at which
//! point the thread is joined and the surface released.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use playback_types::{
    PlaybackCommand, PlaybackEvent, RawSurface, SessionId, SessionState, SurfaceHandle,
};

use crate::config::SessionConfig;
use crate::engine::EngineBackend;
use crate::error::PlaybackError;
use crate::surface::SurfaceRegistry;
use crate::teardown::TeardownReport;
use crate::worker::{SessionWorker, WorkerHandle, WorkerMessage};

const SHUTDOWN_POLL: Duration = Duration::from_millis(250);

/// Output of [`SessionManager::process_events`].
#[derive(Clone, Debug, PartialEq)]
pub enum ManagerEvent {
    /// Event of the active session, or a surface release.
    Playback(PlaybackEvent),
    /// A retiring session finished teardown and was joined.
    SessionRetired {
        session: SessionId,
        report: TeardownReport,
    },
}

pub struct SessionManager {
    backend: Arc<dyn EngineBackend>,
    config: SessionConfig,
    surfaces: SurfaceRegistry,
    next_session: u64,
    active: Option<WorkerHandle>,
    retiring: HashMap<SessionId, WorkerHandle>,
    events_tx: Sender<WorkerMessage>,
    events_rx: Receiver<WorkerMessage>,
}

impl SessionManager {
    pub fn new(backend: Arc<dyn EngineBackend>, config: SessionConfig) -> Self {
        let (events_tx, events_rx) = crossbeam_channel::unbounded();
        Self {
            backend,
            config,
            surfaces: SurfaceRegistry::new(),
            next_session: 0,
            active: None,
            retiring: HashMap::new(),
            events_tx,
            events_rx,
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Start a new session for `path` on a freshly allocated surface.
    ///
    /// The previous active session is retired without waiting; once this
    /// returns, commands route to the new session only.
    pub fn load(
        &mut self,
        path: impl Into<PathBuf>,
        raw_surface: Option<RawSurface>,
    ) -> Result<SessionId, PlaybackError> {
        let path = path.into();
        let surface = self.surfaces.allocate(raw_surface)?;

        if let Some(current) = self.active.take() {
            self.begin_retire(current);
        }

        self.next_session += 1;
        let id = SessionId(self.next_session);
        self.surfaces.assign(surface.id, id);

        let worker = SessionWorker::new(
            id,
            path.clone(),
            surface,
            self.backend.clone(),
            self.config.clone(),
            self.events_tx.clone(),
        );
        match worker.start() {
            Ok(handle) => {
                tracing::info!(session = %id, surface = %surface.id, path = ?path, "session loaded");
                self.active = Some(handle);
                Ok(id)
            }
            Err(err) => {
                tracing::error!(session = %id, error = %err, "failed to start session thread");
                self.surfaces.release(surface.id);
                Err(PlaybackError::Spawn(err))
            }
        }
    }

    /// Move `session` from active to retiring. Returns `false` if it is not active.
    ///
    /// Never blocks: the worker tears down on its own thread.
    pub fn retire(&mut self, session: SessionId) -> bool {
        if self.active_id() != Some(session) {
            tracing::debug!(session = %session, "retire ignored, session not active");
            return false;
        }
        match self.active.take() {
            Some(handle) => {
                self.begin_retire(handle);
                true
            }
            None => false,
        }
    }

    /// Retire the active session without loading another one.
    pub fn stop(&mut self) -> Option<SessionId> {
        let id = self.active_id()?;
        self.retire(id);
        Some(id)
    }

    fn begin_retire(&mut self, mut handle: WorkerHandle) {
        let id = handle.id();
        handle.retire();
        tracing::info!(
            session = %id,
            surface = %handle.surface().id,
            retiring = self.retiring.len() + 1,
            "session retiring"
        );
        self.retiring.insert(id, handle);
    }

    /// Forward `command` to the active session. `None` when idle.
    pub fn dispatch(&mut self, command: PlaybackCommand) -> Option<SessionId> {
        let Some(active) = self.active.as_ref() else {
            tracing::debug!(?command, "no active session, command dropped");
            return None;
        };
        if active.send(command) {
            Some(active.id())
        } else {
            tracing::warn!(session = %active.id(), "active session inbox closed");
            None
        }
    }

    /// Drain queued worker messages without blocking.
    pub fn process_events(&mut self) -> Vec<ManagerEvent> {
        let mut out = Vec::new();
        while let Ok(message) = self.events_rx.try_recv() {
            self.route(message, &mut out);
        }
        out
    }

    /// Block up to `timeout` for the next worker message, then drain the rest.
    pub fn wait_event(&mut self, timeout: Duration) -> Vec<ManagerEvent> {
        let mut out = Vec::new();
        match self.events_rx.recv_timeout(timeout) {
            Ok(message) => self.route(message, &mut out),
            // The manager holds a sender, so this can only time out.
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => return out,
        }
        out.extend(self.process_events());
        out
    }

    fn route(&mut self, message: WorkerMessage, out: &mut Vec<ManagerEvent>) {
        match message {
            WorkerMessage::Event { session, event } => {
                if self.active_id() == Some(session) {
                    out.push(ManagerEvent::Playback(PlaybackEvent::from_session(
                        session, event,
                    )));
                } else {
                    tracing::trace!(session = %session, ?event, "event from inactive session dropped");
                }
            }
            WorkerMessage::Stopped { session, report } => {
                self.complete_retire(session, report, out);
            }
        }
    }

    fn complete_retire(
        &mut self,
        session: SessionId,
        report: TeardownReport,
        out: &mut Vec<ManagerEvent>,
    ) {
        let handle = match self.retiring.remove(&session) {
            Some(handle) => Some(handle),
            // Only a worker that died on its own reports while still active.
            None if self.active_id() == Some(session) => self.active.take(),
            None => None,
        };
        let Some(mut handle) = handle else {
            tracing::warn!(session = %session, "stopped signal from unknown session");
            return;
        };

        handle.join();
        if let Some(surface) = self.surfaces.release(handle.surface().id) {
            out.push(ManagerEvent::Playback(PlaybackEvent::SurfaceReleased { surface }));
        }
        tracing::info!(
            session = %session,
            surface = %handle.surface().id,
            state = ?handle.state(),
            clean = report.is_clean(),
            "session retired"
        );
        out.push(ManagerEvent::SessionRetired { session, report });
    }

    /// Retire the active session and wait up to `timeout` for every retiring
    /// session to finish. Returns the events processed meanwhile.
    ///
    /// A timeout too large to add to the current instant (`Duration::MAX`)
    /// waits until every session has stopped.
    pub fn shutdown(&mut self, timeout: Duration) -> Vec<ManagerEvent> {
        self.stop();
        let deadline = Instant::now().checked_add(timeout);
        let mut out = Vec::new();
        while !self.retiring.is_empty() {
            let wait = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        tracing::warn!(
                            remaining = self.retiring.len(),
                            "shutdown timed out, detaching retiring sessions"
                        );
                        break;
                    }
                    (deadline - now).min(SHUTDOWN_POLL)
                }
                None => SHUTDOWN_POLL,
            };
            out.extend(self.wait_event(wait));
        }
        out
    }

    pub fn active_id(&self) -> Option<SessionId> {
        self.active.as_ref().map(|h| h.id())
    }

    pub fn active_surface(&self) -> Option<SurfaceHandle> {
        self.active.as_ref().map(|h| h.surface())
    }

    pub fn retiring_ids(&self) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = self.retiring.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Current state of an active or retiring session.
    pub fn session_state(&self, session: SessionId) -> Option<SessionState> {
        match self.active.as_ref() {
            Some(active) if active.id() == session => Some(active.state()),
            _ => self.retiring.get(&session).map(|h| h.state()),
        }
    }

    pub fn surfaces(&self) -> &SurfaceRegistry {
        &self.surfaces
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        if self.active.is_some() || !self.retiring.is_empty() {
            self.shutdown(Duration::from_secs(5));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineNotification;
    use crate::engine::sim::{SimBackend, SimCall, SimScript};
    use playback_types::ErrorKind;
    use std::path::Path;

    fn fast_config() -> SessionConfig {
        SessionConfig {
            metadata_delay_ms: 20,
            ..SessionConfig::default()
        }
    }

    fn manager(script: SimScript) -> (SessionManager, Arc<SimBackend>) {
        let backend = Arc::new(SimBackend::new(script));
        (SessionManager::new(backend.clone(), fast_config()), backend)
    }

    /// Pump events until `pred` matches; panics after `limit`.
    fn pump_until(
        mgr: &mut SessionManager,
        limit: Duration,
        pred: impl Fn(&ManagerEvent) -> bool,
    ) -> Vec<ManagerEvent> {
        let deadline = Instant::now() + limit;
        let mut seen = Vec::new();
        loop {
            let now = Instant::now();
            assert!(now < deadline, "timed out waiting, seen {seen:?}");
            let batch = mgr.wait_event(deadline - now);
            let done = batch.iter().any(&pred);
            seen.extend(batch);
            if done {
                return seen;
            }
        }
    }

    fn is_retired(id: SessionId) -> impl Fn(&ManagerEvent) -> bool {
        move |e| matches!(e, ManagerEvent::SessionRetired { session, .. } if *session == id)
    }

    fn is_state(id: SessionId, want: SessionState) -> impl Fn(&ManagerEvent) -> bool {
        move |e| {
            matches!(e, ManagerEvent::Playback(PlaybackEvent::StateChanged { session, state })
                if *session == id && *state == want)
        }
    }

    #[test]
    fn dispatch_without_active_session_is_noop() {
        let (mut mgr, backend) = manager(SimScript::default());
        assert_eq!(mgr.dispatch(PlaybackCommand::Play), None);
        assert!(mgr.process_events().is_empty());
        assert_eq!(backend.log().live_objects(), 0);
    }

    #[test]
    fn rapid_loads_route_only_to_latest() {
        let (mut mgr, backend) = manager(SimScript::default());
        let mut ids = Vec::new();
        for n in 0..8 {
            let id = mgr.load(format!("/media/{n}.mkv"), None).unwrap();
            ids.push(id);
            let target = mgr.dispatch(PlaybackCommand::Seek { ms: n * 1000 });
            assert_eq!(target, Some(id));
            assert_eq!(mgr.active_id(), Some(id));
        }
        let last = *ids.last().unwrap();
        mgr.shutdown(Duration::from_secs(5));
        assert!(mgr.retiring_ids().is_empty());
        assert_eq!(mgr.surfaces().live_count(), 0);
        assert_eq!(backend.log().live_objects(), 0);

        for n in 0..8u64 {
            let calls = backend.log().calls_for(Path::new(&format!("/media/{n}.mkv")));
            let seeks: Vec<_> = calls
                .iter()
                .filter(|c| matches!(c, SimCall::Seek(_)))
                .collect();
            // A seek can only have reached the session that was active when it was sent.
            assert!(seeks.iter().all(|c| **c == SimCall::Seek(n * 1000)), "{seeks:?}");
        }
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(last, SessionId(8));
    }

    #[test]
    fn switch_retires_old_and_routes_play_to_new() {
        let (mut mgr, backend) = manager(SimScript::default());
        let a = mgr.load("/media/a.mkv", None).unwrap();
        let b = mgr.load("/media/b.mkv", None).unwrap();
        assert_eq!(mgr.retiring_ids(), vec![a]);
        assert_eq!(mgr.dispatch(PlaybackCommand::Pause), Some(b));

        let mut seen = pump_until(&mut mgr, Duration::from_secs(2), is_retired(a));
        if !seen.iter().any(is_state(b, SessionState::Paused)) {
            seen.extend(pump_until(
                &mut mgr,
                Duration::from_secs(2),
                is_state(b, SessionState::Paused),
            ));
        }
        assert!(seen.iter().all(|e| match e {
            ManagerEvent::Playback(ev) => ev.session() != Some(a),
            _ => true,
        }));
        assert!(seen.iter().any(is_state(b, SessionState::Initializing)));

        // The only pause A sees is the one issued by its own teardown, after muting.
        let a_calls = backend.log().calls_for(Path::new("/media/a.mkv"));
        let mute_at = a_calls.iter().position(|c| *c == SimCall::SetMute(true));
        let pause_at = a_calls.iter().position(|c| *c == SimCall::Pause);
        assert!(mute_at.is_some());
        assert!(pause_at.is_none_or(|p| Some(p) > mute_at));
        assert!(a_calls.contains(&SimCall::ReleaseInstance));
        let b_calls = backend.log().calls_for(Path::new("/media/b.mkv"));
        assert!(b_calls.contains(&SimCall::Pause));
        assert_eq!(mgr.session_state(a), None);
    }

    #[test]
    fn slow_stop_does_not_block_and_surface_outlives_session() {
        let (mut mgr, backend) = manager(SimScript {
            stop_delay: Duration::from_secs(2),
            ..SimScript::default()
        });
        let a = mgr.load("/media/a.mkv", None).unwrap();
        let old_surface = mgr.active_surface().unwrap();
        pump_until(&mut mgr, Duration::from_secs(2), is_state(a, SessionState::Playing));

        let started = Instant::now();
        let b = mgr.load("/media/b.mkv", None).unwrap();
        assert!(started.elapsed() < Duration::from_millis(200));
        let new_surface = mgr.active_surface().unwrap();
        assert_ne!(new_surface.id, old_surface.id);
        assert!(mgr.surfaces().is_leased(old_surface.id));
        assert_eq!(mgr.dispatch(PlaybackCommand::Play), Some(b));

        let seen = pump_until(&mut mgr, Duration::from_secs(5), is_retired(a));
        assert!(started.elapsed() >= Duration::from_secs(2));
        let released_at = seen
            .iter()
            .position(|e| {
                matches!(e, ManagerEvent::Playback(PlaybackEvent::SurfaceReleased { surface })
                    if surface.id == old_surface.id)
            })
            .unwrap();
        let retired_at = seen.iter().position(is_retired(a)).unwrap();
        assert!(released_at < retired_at);

        let stop_at = backend
            .log()
            .first_call_at(Path::new("/media/a.mkv"), &SimCall::Stop)
            .unwrap();
        let release_at = backend
            .log()
            .first_call_at(Path::new("/media/a.mkv"), &SimCall::ReleaseInstance)
            .unwrap();
        assert!(release_at >= stop_at);
        assert!(!mgr.surfaces().is_leased(old_surface.id));
        assert!(mgr.surfaces().is_leased(new_surface.id));
    }

    #[test]
    fn initialization_error_is_reported_once() {
        let (mut mgr, backend) = manager(SimScript {
            fail_open: true,
            ..SimScript::default()
        });
        let a = mgr.load("/media/bad.mkv", None).unwrap();
        let seen = pump_until(&mut mgr, Duration::from_secs(2), |e| {
            matches!(e, ManagerEvent::Playback(PlaybackEvent::Error { .. }))
        });
        assert!(seen.iter().any(is_state(a, SessionState::Errored)));
        assert_eq!(mgr.session_state(a), Some(SessionState::Errored));
        assert_eq!(backend.log().live_objects(), 0);

        mgr.stop();
        let rest = pump_until(&mut mgr, Duration::from_secs(2), is_retired(a));
        let errors = seen
            .iter()
            .chain(rest.iter())
            .filter(|e| {
                matches!(e, ManagerEvent::Playback(PlaybackEvent::Error { kind: ErrorKind::Initialization, .. }))
            })
            .count();
        assert_eq!(errors, 1);
    }

    #[test]
    fn retire_twice_is_noop() {
        let (mut mgr, _backend) = manager(SimScript::default());
        let a = mgr.load("/media/a.mkv", None).unwrap();
        assert!(mgr.retire(a));
        assert!(!mgr.retire(a));
        assert_eq!(mgr.active_id(), None);
        assert_eq!(mgr.dispatch(PlaybackCommand::Play), None);
        pump_until(&mut mgr, Duration::from_secs(2), is_retired(a));
        assert!(!mgr.retire(a));
    }

    #[test]
    fn concurrent_retiring_sessions_each_clean_up() {
        let (mut mgr, backend) = manager(SimScript {
            stop_delay: Duration::from_millis(300),
            ..SimScript::default()
        });
        let a = mgr.load("/media/a.mkv", None).unwrap();
        let b = mgr.load("/media/b.mkv", None).unwrap();
        let c = mgr.load("/media/c.mkv", None).unwrap();
        assert_eq!(mgr.retiring_ids(), vec![a, b]);
        assert_eq!(mgr.surfaces().live_count(), 3);

        let deadline = Instant::now() + Duration::from_secs(3);
        let mut retired = Vec::new();
        while !mgr.retiring_ids().is_empty() {
            assert!(Instant::now() < deadline, "retiring sessions left: {:?}", mgr.retiring_ids());
            for event in mgr.wait_event(Duration::from_millis(100)) {
                if let ManagerEvent::SessionRetired { session, .. } = event {
                    retired.push(session);
                }
            }
        }
        retired.sort();
        assert_eq!(retired, vec![a, b]);
        assert_eq!(mgr.active_id(), Some(c));
        assert_eq!(mgr.surfaces().live_count(), 1);
        mgr.shutdown(Duration::from_secs(3));
        assert_eq!(backend.log().live_objects(), 0);
    }

    #[test]
    fn shutdown_without_deadline_drains_everything() {
        let (mut mgr, backend) = manager(SimScript {
            stop_delay: Duration::from_millis(100),
            ..SimScript::default()
        });
        let a = mgr.load("/media/a.mkv", None).unwrap();
        let b = mgr.load("/media/b.mkv", None).unwrap();
        let events = mgr.shutdown(Duration::MAX);
        for id in [a, b] {
            assert!(events.iter().any(is_retired(id)), "{id} not retired: {events:?}");
        }
        assert!(mgr.retiring_ids().is_empty());
        assert_eq!(mgr.active_id(), None);
        assert_eq!(mgr.surfaces().live_count(), 0);
        assert_eq!(backend.log().live_objects(), 0);
    }

    #[test]
    fn raw_surface_busy_until_old_session_stops() {
        let (mut mgr, _backend) = manager(SimScript::default());
        let a = mgr.load("/media/a.mkv", Some(0x10)).unwrap();
        let err = mgr.load("/media/b.mkv", Some(0x10)).unwrap_err();
        assert!(matches!(err, PlaybackError::Surface(_)));
        assert_eq!(mgr.active_id(), Some(a));

        mgr.stop();
        pump_until(&mut mgr, Duration::from_secs(2), is_retired(a));
        let b = mgr.load("/media/b.mkv", Some(0x10)).unwrap();
        assert_eq!(mgr.active_id(), Some(b));
    }

    #[test]
    fn runtime_error_from_retiring_session_is_dropped() {
        let (mut mgr, backend) = manager(SimScript {
            stop_delay: Duration::from_millis(300),
            ..SimScript::default()
        });
        let a = mgr.load("/media/a.mkv", None).unwrap();
        pump_until(&mut mgr, Duration::from_secs(2), is_state(a, SessionState::Playing));
        let _b = mgr.load("/media/b.mkv", None).unwrap();
        backend
            .log()
            .notify(Path::new("/media/a.mkv"), EngineNotification::Error("late".into()));
        let seen = pump_until(&mut mgr, Duration::from_secs(2), is_retired(a));
        assert!(!seen.iter().any(|e| matches!(
            e,
            ManagerEvent::Playback(PlaybackEvent::Error { session, .. }) if *session == a
        )));
    }
}
