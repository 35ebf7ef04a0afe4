//! Volume policy enforcement over live audio sessions.
//!
//! The engine consumes [`AudioEvent`]s from its provider's feed. Every newly
//! seen session is classified once; a classified playback session is set to
//! its policy's initial volume and tracked from then on, with later volume
//! changes recorded but never corrected. Capture sessions are scanned for the
//! meeting microphone that the mute hotkey toggles.

use super::classify::SessionClassifier;
use super::policy::{PolicyKind, PolicyTable, TrackedSession};
use super::session::{
    AudioError, AudioEvent, AudioSession, AudioSessionProvider, CaptureDevice, SessionFlow,
    SessionState,
};
use crate::alert::Alerter;
use crate::service::{blocking, Monitor, ServiceContext, ServiceError};
use crate::status::StatusReporter;
use anyhow::{anyhow, Context};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::MissedTickBehavior;

pub const SERVICE_NAME: &str = "Audio";

/// The capture session currently used for mic toggling. A lookup key only;
/// live mute state is always re-queried from the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MicSession {
    pub session_id: String,
    pub display_name: String,
    pub state: SessionState,
}

#[derive(Debug)]
struct KnownSession {
    kind: Option<PolicyKind>,
    flow: SessionFlow,
    display_name: String,
    state: SessionState,
}

#[derive(Debug)]
struct EngineState {
    policies: PolicyTable,
    known: HashMap<String, KnownSession>,
    mic: Option<MicSession>,
}

pub struct VolumePolicyEngine {
    provider: Arc<dyn AudioSessionProvider>,
    classifier: SessionClassifier,
    alerter: Arc<dyn Alerter>,
    check_interval: Duration,
    state: Mutex<EngineState>,
}

impl VolumePolicyEngine {
    pub fn new(
        provider: Arc<dyn AudioSessionProvider>,
        classifier: SessionClassifier,
        policies: PolicyTable,
        alerter: Arc<dyn Alerter>,
        check_interval: Duration,
    ) -> Self {
        Self {
            provider,
            classifier,
            alerter,
            check_interval,
            state: Mutex::new(EngineState {
                policies,
                known: HashMap::new(),
                mic: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// True when every tracked session is inside its policy range.
    pub fn is_valid(&self) -> bool {
        self.lock().policies.is_valid()
    }

    pub fn tracked(&self, kind: PolicyKind) -> Option<TrackedSession> {
        self.lock().policies.slot(kind).tracked().cloned()
    }

    pub fn mic_session(&self) -> Option<MicSession> {
        self.lock().mic.clone()
    }

    /// One-line summary of every tracked policy.
    pub fn status_text(&self) -> String {
        let state = self.lock();
        let tracked: Vec<String> = state
            .policies
            .slots()
            .filter(|slot| slot.tracked().is_some())
            .map(ToString::to_string)
            .collect();
        if tracked.is_empty() {
            "No sessions tracked".to_string()
        } else {
            tracked.join(" | ")
        }
    }

    /// Enumerate what already exists: playback sessions first, then capture
    /// devices with active ones ahead of idle ones.
    ///
    /// Sessions seen by an earlier run are resynced rather than created again:
    /// their live volume and state are recorded, and the ones that went away
    /// in the meantime are dropped.
    pub fn load_existing(&self, status: &StatusReporter) -> Result<(), AudioError> {
        let mut live: HashSet<String> = HashSet::new();
        for session in self.provider.playback_sessions()? {
            live.insert(session.id.clone());
            self.session_seen(session, status);
        }

        let mut devices = self.provider.capture_devices()?;
        devices.sort_by_key(|device| device.state);
        let mut captures_complete = true;
        for device in devices {
            match self.provider.device_sessions(&device.id) {
                Ok(sessions) => {
                    for session in sessions {
                        live.insert(session.id.clone());
                        self.session_seen(session, status);
                    }
                }
                Err(err) => {
                    captures_complete = false;
                    tracing::warn!(device = %device.name, "failed to enumerate capture sessions: {err}");
                }
            }
        }

        let gone: Vec<String> = self
            .lock()
            .known
            .iter()
            .filter(|(id, known)| {
                !live.contains(*id) && (known.flow == SessionFlow::Render || captures_complete)
            })
            .map(|(id, _)| id.clone())
            .collect();
        for session_id in gone {
            self.session_disconnected(&session_id, status);
        }

        self.refresh_status(status);
        Ok(())
    }

    fn session_seen(&self, session: AudioSession, status: &StatusReporter) {
        if !self.lock().known.contains_key(&session.id) {
            self.session_created(session, status);
            return;
        }
        self.volume_changed(&session.id, session.volume);
        self.state_changed(&session.id, session.state, status);
    }

    pub fn handle_event(&self, event: AudioEvent, status: &StatusReporter) {
        match event {
            AudioEvent::SessionCreated(session) => self.session_created(session, status),
            AudioEvent::SessionDisconnected { session_id } => {
                self.session_disconnected(&session_id, status)
            }
            AudioEvent::VolumeChanged { session_id, volume } => {
                self.volume_changed(&session_id, volume)
            }
            AudioEvent::MuteChanged { session_id, muted } => {
                tracing::debug!(session = %session_id, muted, "mute changed");
            }
            AudioEvent::StateChanged { session_id, state } => {
                self.state_changed(&session_id, state, status)
            }
            AudioEvent::CaptureDeviceAdded(device) => {
                status.log(format!("Capture device added: {}", device.name));
                self.load_device(&device, status);
            }
        }
        self.refresh_status(status);
    }

    /// Alert once if any tracked session is out of range. Returns whether it alerted.
    pub fn check(&self) -> bool {
        if self.is_valid() {
            return false;
        }
        self.alerter.alert();
        true
    }

    /// Flip the mic: the tracked Teams capture session if it still exists,
    /// otherwise the default capture device. `None` when there is no capture
    /// device at all.
    pub fn toggle_mic_mute(&self) -> Result<Option<bool>, AudioError> {
        if let Some(session_id) = self.live_mic()? {
            let muted = self.provider.session_mute(&session_id)?;
            if let Some(muted) = muted {
                match self.provider.set_session_mute(&session_id, !muted) {
                    Ok(()) => return Ok(Some(!muted)),
                    Err(AudioError::SessionNotFound { .. }) => self.forget_mic(&session_id),
                    Err(err) => return Err(err),
                }
            }
        }

        match self.provider.default_capture_mute()? {
            Some(muted) => {
                self.provider.set_default_capture_mute(!muted)?;
                Ok(Some(!muted))
            }
            None => Ok(None),
        }
    }

    /// Current mic mute state, read the same way [`Self::toggle_mic_mute`] resolves the target.
    pub fn mic_muted(&self) -> Result<Option<bool>, AudioError> {
        if let Some(session_id) = self.live_mic()? {
            if let Some(muted) = self.provider.session_mute(&session_id)? {
                return Ok(Some(muted));
            }
        }
        self.provider.default_capture_mute()
    }

    // Tracked mic id, cleared first if the session no longer exists.
    fn live_mic(&self) -> Result<Option<String>, AudioError> {
        let Some(session_id) = self.lock().mic.as_ref().map(|mic| mic.session_id.clone()) else {
            return Ok(None);
        };
        match self.provider.session_mute(&session_id) {
            Ok(Some(_)) => Ok(Some(session_id)),
            Ok(None) | Err(AudioError::SessionNotFound { .. }) => {
                self.forget_mic(&session_id);
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    fn forget_mic(&self, session_id: &str) {
        let mut state = self.lock();
        if state
            .mic
            .as_ref()
            .is_some_and(|mic| mic.session_id == session_id)
        {
            state.mic = None;
        }
    }

    fn load_device(&self, device: &CaptureDevice, status: &StatusReporter) {
        match self.provider.device_sessions(&device.id) {
            Ok(sessions) => {
                for session in sessions {
                    self.session_created(session, status);
                }
            }
            Err(err) => {
                tracing::warn!(device = %device.name, "failed to enumerate capture sessions: {err}");
            }
        }
    }

    fn session_created(&self, session: AudioSession, status: &StatusReporter) {
        if self.lock().known.contains_key(&session.id) {
            return;
        }

        match session.flow {
            SessionFlow::Render => self.playback_created(session, status),
            SessionFlow::Capture => self.capture_created(session, status),
        }
    }

    fn playback_created(&self, session: AudioSession, status: &StatusReporter) {
        let kind = self.classifier.classify(&session);
        let volume = match kind {
            Some(kind) => match self.enforce(kind, &session) {
                Some(volume) => Some(volume),
                // Gone before it could be set; nothing to track.
                None => return,
            },
            None => None,
        };

        let mut state = self.lock();
        if let (Some(kind), Some(volume)) = (kind, volume) {
            state.policies.slot_mut(kind).track(&session.id, volume);
            status.log(format!(
                "{kind}: tracking {} at {volume}",
                describe(&session)
            ));
        }
        state.known.insert(
            session.id,
            KnownSession {
                kind,
                flow: SessionFlow::Render,
                display_name: session.display_name,
                state: session.state,
            },
        );
    }

    // Set the initial target; returns the volume to record, or `None` if the
    // session vanished.
    fn enforce(&self, kind: PolicyKind, session: &AudioSession) -> Option<u8> {
        let initial = self.lock().policies.slot(kind).policy().initial();
        match self.provider.set_session_volume(&session.id, initial) {
            Ok(()) => Some(initial),
            Err(AudioError::SessionNotFound { .. }) => {
                tracing::debug!(session = %session.id, "session vanished before enforcement");
                None
            }
            Err(err) => {
                tracing::warn!(session = %session.id, "failed to set {kind} volume: {err}");
                Some(session.volume)
            }
        }
    }

    fn capture_created(&self, session: AudioSession, status: &StatusReporter) {
        let candidate = self.classifier.rules().is_mic_candidate(&session);

        let mut state = self.lock();
        if candidate && should_take_mic(state.mic.as_ref(), session.state) {
            status.log(format!("Mic session: {}", describe(&session)));
            state.mic = Some(MicSession {
                session_id: session.id.clone(),
                display_name: session.display_name.clone(),
                state: session.state,
            });
        }
        state.known.insert(
            session.id,
            KnownSession {
                kind: None,
                flow: SessionFlow::Capture,
                display_name: session.display_name,
                state: session.state,
            },
        );
    }

    fn session_disconnected(&self, session_id: &str, status: &StatusReporter) {
        let mut state = self.lock();
        state.known.remove(session_id);
        if let Some(kind) = state.policies.release(session_id) {
            status.log(format!("{kind}: session ended"));
        }
        if state
            .mic
            .as_ref()
            .is_some_and(|mic| mic.session_id == session_id)
        {
            state.mic = None;
            status.log("Mic session ended");
        }
    }

    fn volume_changed(&self, session_id: &str, volume: u8) {
        let mut state = self.lock();
        let Some(kind) = state.known.get(session_id).and_then(|known| known.kind) else {
            return;
        };
        let slot = state.policies.slot_mut(kind);
        if slot
            .tracked()
            .is_some_and(|tracked| tracked.session_id == session_id)
        {
            slot.track(session_id, volume);
        }
    }

    fn state_changed(&self, session_id: &str, new_state: SessionState, status: &StatusReporter) {
        let rules = self.classifier.rules();
        let mut state = self.lock();
        let Some(known) = state.known.get_mut(session_id) else {
            return;
        };
        known.state = new_state;
        if known.flow != SessionFlow::Capture {
            return;
        }
        let display_name = known.display_name.clone();

        if let Some(mic) = state.mic.as_mut().filter(|mic| mic.session_id == session_id) {
            mic.state = new_state;
            return;
        }

        let is_candidate = display_name
            .to_lowercase()
            .contains(&rules.mic_session_marker.to_lowercase());
        if is_candidate && should_take_mic(state.mic.as_ref(), new_state) {
            status.log(format!("Mic session: {display_name}"));
            state.mic = Some(MicSession {
                session_id: session_id.to_string(),
                display_name,
                state: new_state,
            });
        }
    }

    fn refresh_status(&self, status: &StatusReporter) {
        let (key, is_error) = {
            let state = self.lock();
            let violations: Vec<String> = state.policies.violations().map(ToString::to_string).collect();
            if violations.is_empty() {
                ("ok".to_string(), false)
            } else {
                (violations.join(" | "), true)
            }
        };
        status.set_status_key(&key, self.status_text(), is_error);
    }
}

/// A candidate replaces the current mic when there is none, or when it is
/// active and the current one is not.
fn should_take_mic(current: Option<&MicSession>, candidate: SessionState) -> bool {
    match current {
        None => true,
        Some(mic) => candidate == SessionState::Active && mic.state != SessionState::Active,
    }
}

fn describe(session: &AudioSession) -> String {
    if !session.display_name.is_empty() {
        session.display_name.clone()
    } else {
        session
            .executable_name()
            .map(str::to_string)
            .unwrap_or_else(|| format!("pid {}", session.process_id))
    }
}

#[async_trait]
impl Monitor for VolumePolicyEngine {
    fn name(&self) -> &str {
        SERVICE_NAME
    }

    async fn run(&self, ctx: ServiceContext) -> Result<(), ServiceError> {
        // Subscribe before enumerating so nothing that appears in between is missed.
        let mut events = self
            .provider
            .subscribe()
            .context("failed to subscribe to audio events")?;
        blocking(|| self.load_existing(ctx.status()))
            .context("failed to enumerate audio sessions")?;

        let mut tick = tokio::time::interval(self.check_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tick.tick().await;

        loop {
            tokio::select! {
                biased;
                _ = ctx.cancelled() => return Err(ServiceError::Cancelled),
                event = events.recv() => match event {
                    Some(event) => blocking(|| self.handle_event(event, ctx.status())),
                    None => return Err(anyhow!("audio event feed closed").into()),
                },
                _ = tick.tick() => {
                    self.check();
                }
            }
        }
    }
}
