//! In-memory fakes of every collaborator, shared by the unit tests.

use crate::alert::Alerter;
use crate::audio::session::{
    AudioError, AudioEvent, AudioSession, AudioSessionProvider, CaptureDevice, DeviceState,
    SessionFlow, SessionState,
};
use crate::clock::{Clock, SystemClock};
use crate::memory::MemoryProbe;
use crate::mic::{HotkeyRegistration, HotkeyRegistry, KeyCombo};
use crate::net::probe::{
    NetworkInterfaceInspector, Pinger, ProbeReply, Traceroute, WiredInterface, WirelessInterface,
};
use crate::process::{ProcessCommandLineReader, ProcessError};
use crate::service::ServiceError;
use anyhow::{anyhow, bail};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub fn render_session(id: &str, display_name: &str, path: Option<&str>) -> AudioSession {
    AudioSession {
        id: id.to_string(),
        display_name: display_name.to_string(),
        executable_path: path.map(str::to_string),
        process_id: 4242,
        is_system: false,
        is_muted: false,
        volume: 100,
        state: SessionState::Active,
        flow: SessionFlow::Render,
        device_name: "Speakers".to_string(),
    }
}

pub fn chrome_session(id: &str) -> AudioSession {
    render_session(
        id,
        "",
        Some(r"C:\Program Files\Google\Chrome\Application\chrome.exe"),
    )
}

pub fn capture_session(id: &str, display_name: &str, state: SessionState) -> AudioSession {
    AudioSession {
        state,
        flow: SessionFlow::Capture,
        device_name: "Headset Microphone".to_string(),
        ..render_session(id, display_name, None)
    }
}

pub fn capture_device(id: &str, state: DeviceState) -> CaptureDevice {
    CaptureDevice {
        id: id.to_string(),
        name: format!("Microphone {id}"),
        state,
    }
}

#[derive(Default)]
pub struct FakeProcesses {
    processes: Mutex<HashMap<u32, (String, u32)>>,
}

impl FakeProcesses {
    pub fn add(&self, pid: u32, command_line: &str, parent: u32) {
        lock(&self.processes).insert(pid, (command_line.to_string(), parent));
    }
}

impl ProcessCommandLineReader for FakeProcesses {
    fn command_line(&self, pid: u32) -> Result<String, ProcessError> {
        lock(&self.processes)
            .get(&pid)
            .map(|(command_line, _)| command_line.clone())
            .ok_or(ProcessError::Exited { pid })
    }

    fn parent_id(&self, pid: u32) -> Result<u32, ProcessError> {
        lock(&self.processes)
            .get(&pid)
            .map(|(_, parent)| *parent)
            .ok_or(ProcessError::Exited { pid })
    }
}

#[derive(Default)]
pub struct CountingAlerter {
    count: AtomicUsize,
}

impl CountingAlerter {
    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

impl Alerter for CountingAlerter {
    fn alert(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct FakeAudioState {
    playback: Vec<AudioSession>,
    devices: Vec<(CaptureDevice, Vec<AudioSession>)>,
    default_capture_muted: Option<bool>,
    subscribers: Vec<UnboundedSender<AudioEvent>>,
    volume_sets: Vec<(String, u8)>,
    subscribe_count: usize,
}

impl FakeAudioState {
    fn session_mut(&mut self, session_id: &str) -> Option<&mut AudioSession> {
        self.playback
            .iter_mut()
            .chain(self.devices.iter_mut().flat_map(|(_, sessions)| sessions.iter_mut()))
            .find(|session| session.id == session_id)
    }
}

/// Scriptable audio backend.
#[derive(Default)]
pub struct FakeAudio {
    state: Mutex<FakeAudioState>,
}

impl FakeAudio {
    pub fn add_playback(&self, session: AudioSession) {
        lock(&self.state).playback.push(session);
    }

    pub fn add_device(&self, device: CaptureDevice, sessions: Vec<AudioSession>) {
        lock(&self.state).devices.push((device, sessions));
    }

    pub fn remove_session(&self, session_id: &str) {
        let mut state = lock(&self.state);
        state.playback.retain(|session| session.id != session_id);
        for (_, sessions) in &mut state.devices {
            sessions.retain(|session| session.id != session_id);
        }
    }

    /// Change a session's volume behind the engine's back, without an event.
    pub fn set_session_volume_silently(&self, session_id: &str, volume: u8) {
        if let Some(session) = lock(&self.state).session_mut(session_id) {
            session.volume = volume;
        }
    }

    pub fn set_default_capture_muted(&self, muted: Option<bool>) {
        lock(&self.state).default_capture_muted = muted;
    }

    pub fn default_capture_muted(&self) -> Option<bool> {
        lock(&self.state).default_capture_muted
    }

    pub fn session(&self, session_id: &str) -> Option<AudioSession> {
        lock(&self.state).session_mut(session_id).cloned()
    }

    pub fn volume_sets(&self) -> Vec<(String, u8)> {
        lock(&self.state).volume_sets.clone()
    }

    pub fn subscribe_count(&self) -> usize {
        lock(&self.state).subscribe_count
    }

    /// Deliver an event to every subscriber.
    pub fn emit(&self, event: AudioEvent) {
        lock(&self.state)
            .subscribers
            .retain(|sender| sender.send(event.clone()).is_ok());
    }

    /// Drop every subscriber, closing their feeds.
    pub fn close_feeds(&self) {
        lock(&self.state).subscribers.clear();
    }
}

impl AudioSessionProvider for FakeAudio {
    fn subscribe(&self) -> Result<UnboundedReceiver<AudioEvent>, AudioError> {
        let (sender, receiver) = unbounded_channel();
        let mut state = lock(&self.state);
        state.subscribers.push(sender);
        state.subscribe_count += 1;
        Ok(receiver)
    }

    fn playback_sessions(&self) -> Result<Vec<AudioSession>, AudioError> {
        Ok(lock(&self.state).playback.clone())
    }

    fn capture_devices(&self) -> Result<Vec<CaptureDevice>, AudioError> {
        Ok(lock(&self.state)
            .devices
            .iter()
            .map(|(device, _)| device.clone())
            .collect())
    }

    fn device_sessions(&self, device_id: &str) -> Result<Vec<AudioSession>, AudioError> {
        lock(&self.state)
            .devices
            .iter()
            .find(|(device, _)| device.id == device_id)
            .map(|(_, sessions)| sessions.clone())
            .ok_or_else(|| AudioError::DeviceNotFound {
                device_id: device_id.to_string(),
            })
    }

    fn set_session_volume(&self, session_id: &str, volume: u8) -> Result<(), AudioError> {
        let mut state = lock(&self.state);
        let session = state
            .session_mut(session_id)
            .ok_or_else(|| AudioError::SessionNotFound {
                session_id: session_id.to_string(),
            })?;
        session.volume = volume;
        state.volume_sets.push((session_id.to_string(), volume));
        Ok(())
    }

    fn session_mute(&self, session_id: &str) -> Result<Option<bool>, AudioError> {
        Ok(lock(&self.state)
            .session_mut(session_id)
            .map(|session| session.is_muted))
    }

    fn set_session_mute(&self, session_id: &str, muted: bool) -> Result<(), AudioError> {
        let mut state = lock(&self.state);
        let session = state
            .session_mut(session_id)
            .ok_or_else(|| AudioError::SessionNotFound {
                session_id: session_id.to_string(),
            })?;
        session.is_muted = muted;
        Ok(())
    }

    fn default_capture_mute(&self) -> Result<Option<bool>, AudioError> {
        Ok(lock(&self.state).default_capture_muted)
    }

    fn set_default_capture_mute(&self, muted: bool) -> Result<(), AudioError> {
        let mut state = lock(&self.state);
        if state.default_capture_muted.is_none() {
            return Err(AudioError::DeviceNotFound {
                device_id: "default".to_string(),
            });
        }
        state.default_capture_muted = Some(muted);
        Ok(())
    }
}

/// Adapter lists handed out on every query.
pub struct FakeInspector {
    wired: Mutex<Vec<WiredInterface>>,
    wireless: Mutex<Result<Vec<WirelessInterface>, String>>,
}

impl Default for FakeInspector {
    fn default() -> Self {
        Self {
            wired: Mutex::new(Vec::new()),
            wireless: Mutex::new(Ok(Vec::new())),
        }
    }
}

impl FakeInspector {
    pub fn set_wired(&self, wired: Vec<WiredInterface>) {
        *lock(&self.wired) = wired;
    }

    pub fn set_wireless(&self, wireless: Result<Vec<WirelessInterface>, String>) {
        *lock(&self.wireless) = wireless;
    }
}

#[async_trait]
impl NetworkInterfaceInspector for FakeInspector {
    async fn wired(&self) -> anyhow::Result<Vec<WiredInterface>> {
        Ok(lock(&self.wired).clone())
    }

    async fn wireless(&self) -> anyhow::Result<Vec<WirelessInterface>> {
        lock(&self.wireless).clone().map_err(|err| anyhow!(err))
    }
}

/// Replies are consumed in call order; an empty script answers 10 ms.
#[derive(Default)]
pub struct FakePinger {
    script: Mutex<VecDeque<Result<ProbeReply, String>>>,
    probes: AtomicUsize,
}

impl FakePinger {
    pub fn push_reply(&self, reply: Result<ProbeReply, String>) {
        lock(&self.script).push_back(reply);
    }

    pub fn probe_count(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Pinger for FakePinger {
    async fn probe(&self, _target: &str, _cancel: &CancellationToken) -> anyhow::Result<ProbeReply> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        lock(&self.script)
            .pop_front()
            .unwrap_or_else(|| Ok(ProbeReply::success(10)))
            .map_err(|err| anyhow!(err))
    }
}

#[derive(Default)]
pub struct FakeTraceroute {
    traces: AtomicUsize,
    hosts: Mutex<Vec<String>>,
}

impl FakeTraceroute {
    pub fn trace_count(&self) -> usize {
        self.traces.load(Ordering::SeqCst)
    }

    pub fn traced_hosts(&self) -> Vec<String> {
        lock(&self.hosts).clone()
    }
}

#[async_trait]
impl Traceroute for FakeTraceroute {
    async fn trace(&self, host: &str, _cancel: &CancellationToken) -> anyhow::Result<String> {
        self.traces.fetch_add(1, Ordering::SeqCst);
        lock(&self.hosts).push(host.to_string());
        Ok(format!(" 1  192.168.1.1  2 ms\n 2  {host}  40 ms"))
    }
}

/// Real timers, but a local hour chosen by the test.
pub struct FixedHourClock {
    hour: AtomicU32,
}

impl FixedHourClock {
    pub fn new(hour: u32) -> Self {
        Self {
            hour: AtomicU32::new(hour),
        }
    }
}

#[async_trait]
impl Clock for FixedHourClock {
    async fn delay(&self, duration: Duration, cancel: &CancellationToken) -> Result<(), ServiceError> {
        SystemClock.delay(duration, cancel).await
    }

    fn local_hour(&self) -> u32 {
        self.hour.load(Ordering::SeqCst)
    }
}

pub struct FakeMemory {
    bytes: Option<u64>,
    reads: AtomicUsize,
}

impl FakeMemory {
    pub fn new(bytes: u64) -> Self {
        Self {
            bytes: Some(bytes),
            reads: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            bytes: None,
            reads: AtomicUsize::new(0),
        }
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

impl MemoryProbe for FakeMemory {
    fn private_bytes(&self) -> anyhow::Result<u64> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.bytes.ok_or_else(|| anyhow!("access denied"))
    }
}

#[derive(Default)]
pub struct FakeHotkeys {
    registrations: Arc<Mutex<Vec<(u64, KeyCombo, UnboundedSender<()>)>>>,
    next_id: AtomicU64,
}

impl FakeHotkeys {
    pub fn registered(&self) -> Vec<KeyCombo> {
        lock(&self.registrations)
            .iter()
            .map(|(_, combo, _)| *combo)
            .collect()
    }

    /// Press every registered combination once.
    pub fn press(&self) {
        for (_, _, sender) in lock(&self.registrations).iter() {
            let _ = sender.send(());
        }
    }

    pub fn unregister_all(&self) {
        lock(&self.registrations).clear();
    }
}

/// Rejects a combination that is still held, like RegisterHotKey does.
impl HotkeyRegistry for FakeHotkeys {
    fn register(&self, combo: &KeyCombo) -> anyhow::Result<HotkeyRegistration> {
        let mut registrations = lock(&self.registrations);
        if registrations.iter().any(|(_, held, _)| held == combo) {
            bail!("hotkey {combo} is already registered");
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (sender, receiver) = unbounded_channel();
        registrations.push((id, *combo, sender));

        let registrations = Arc::clone(&self.registrations);
        Ok(HotkeyRegistration::new(receiver, move || {
            lock(&registrations).retain(|(held, _, _)| *held != id);
        }))
    }
}
