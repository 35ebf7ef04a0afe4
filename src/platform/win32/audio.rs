//! Audio sessions via WASAPI.
//!
//! All COM objects live on one worker thread. Callers talk to it through a
//! request channel; the worker also polls the session lists on a timer and
//! turns the differences into [`AudioEvent`]s for every subscriber.

use super::notifications::EndpointNotificationClient;
use super::{process, take_com_string, wide, ComGuard};
use crate::audio::{
    percent_to_scalar, scalar_to_percent, AudioError, AudioEvent, AudioSession,
    AudioSessionProvider, CaptureDevice, DeviceState, SessionFlow, SessionState,
};
use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, SyncSender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use windows::core::{Interface, PCWSTR};
use windows::Win32::Devices::Properties::DEVPKEY_Device_FriendlyName;
use windows::Win32::Foundation::S_OK;
use windows::Win32::Media::Audio::Endpoints::IAudioEndpointVolume;
use windows::Win32::Media::Audio::{
    eCapture, eConsole, eRender, AudioSessionStateActive, AudioSessionStateExpired,
    IAudioSessionControl2, IAudioSessionManager2, IMMDevice, IMMDeviceEnumerator, IMMEndpoint,
    IMMNotificationClient, ISimpleAudioVolume, MMDeviceEnumerator, DEVICE_STATE,
    DEVICE_STATEMASK_ALL, DEVICE_STATE_ACTIVE, DEVICE_STATE_DISABLED, DEVICE_STATE_UNPLUGGED,
};
use windows::Win32::System::Com::{CoCreateInstance, CLSCTX_ALL, COINIT_MULTITHREADED, STGM};
use windows::Win32::UI::Shell::PropertiesSystem::{IPropertyStore, PROPERTYKEY};

type Reply<T> = SyncSender<Result<T, AudioError>>;
type Subscribers = Arc<Mutex<Vec<UnboundedSender<AudioEvent>>>>;

/// Work for the COM thread.
pub enum Request {
    PlaybackSessions(Reply<Vec<AudioSession>>),
    CaptureDevices(Reply<Vec<CaptureDevice>>),
    DeviceSessions(String, Reply<Vec<AudioSession>>),
    SetVolume(String, u8, Reply<()>),
    SessionMute(String, Reply<Option<bool>>),
    SetSessionMute(String, bool, Reply<()>),
    DefaultCaptureMute(Reply<Option<bool>>),
    SetDefaultCaptureMute(bool, Reply<()>),
    /// Endpoint plugged in or enabled (from the notification client)
    DeviceArrived(String),
    Shutdown,
}

/// [`AudioSessionProvider`] backed by a dedicated COM thread.
pub struct WindowsAudio {
    requests: Sender<Request>,
    subscribers: Subscribers,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl WindowsAudio {
    /// Start the COM thread. Fails if COM or the device enumerator cannot be
    /// created.
    pub fn start(poll_interval: Duration) -> Result<Self, AudioError> {
        let (requests, inbox) = mpsc::channel();
        let subscribers: Subscribers = Arc::default();
        let (ready_tx, ready_rx) = mpsc::sync_channel(1);

        let worker_requests = requests.clone();
        let worker_subscribers = subscribers.clone();
        let worker = thread::Builder::new()
            .name("deskwarden-audio".to_string())
            .spawn(move || {
                let _com = match ComGuard::new(COINIT_MULTITHREADED) {
                    Ok(guard) => guard,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                match Worker::new(worker_requests, worker_subscribers) {
                    Ok(mut worker) => {
                        let _ = ready_tx.send(Ok(()));
                        worker.run(inbox, poll_interval);
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                    }
                }
            })
            .map_err(|_| AudioError::BackendStopped)?;

        ready_rx.recv().map_err(|_| AudioError::BackendStopped)??;
        tracing::info!("Audio backend started");

        Ok(Self {
            requests,
            subscribers,
            worker: Mutex::new(Some(worker)),
        })
    }

    fn call<T>(&self, request: impl FnOnce(Reply<T>) -> Request) -> Result<T, AudioError> {
        let (tx, rx) = mpsc::sync_channel(1);
        self.requests
            .send(request(tx))
            .map_err(|_| AudioError::BackendStopped)?;
        rx.recv().map_err(|_| AudioError::BackendStopped)?
    }
}

impl Drop for WindowsAudio {
    fn drop(&mut self) {
        let _ = self.requests.send(Request::Shutdown);
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(worker) = worker {
            let _ = worker.join();
        }
    }
}

impl AudioSessionProvider for WindowsAudio {
    fn subscribe(&self) -> Result<UnboundedReceiver<AudioEvent>, AudioError> {
        let (tx, rx) = unbounded_channel();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        Ok(rx)
    }

    fn playback_sessions(&self) -> Result<Vec<AudioSession>, AudioError> {
        self.call(Request::PlaybackSessions)
    }

    fn capture_devices(&self) -> Result<Vec<CaptureDevice>, AudioError> {
        self.call(Request::CaptureDevices)
    }

    fn device_sessions(&self, device_id: &str) -> Result<Vec<AudioSession>, AudioError> {
        self.call(|reply| Request::DeviceSessions(device_id.to_string(), reply))
    }

    fn set_session_volume(&self, session_id: &str, volume: u8) -> Result<(), AudioError> {
        self.call(|reply| Request::SetVolume(session_id.to_string(), volume, reply))
    }

    fn session_mute(&self, session_id: &str) -> Result<Option<bool>, AudioError> {
        self.call(|reply| Request::SessionMute(session_id.to_string(), reply))
    }

    fn set_session_mute(&self, session_id: &str, muted: bool) -> Result<(), AudioError> {
        self.call(|reply| Request::SetSessionMute(session_id.to_string(), muted, reply))
    }

    fn default_capture_mute(&self) -> Result<Option<bool>, AudioError> {
        self.call(Request::DefaultCaptureMute)
    }

    fn set_default_capture_mute(&self, muted: bool) -> Result<(), AudioError> {
        self.call(|reply| Request::SetDefaultCaptureMute(muted, reply))
    }
}

/// A live session and the interfaces used to control it.
struct SessionEntry {
    volume: ISimpleAudioVolume,
    session: AudioSession,
}

struct Worker {
    enumerator: IMMDeviceEnumerator,
    client: Option<IMMNotificationClient>,
    sessions: HashMap<String, SessionEntry>,
    subscribers: Subscribers,
}

impl Worker {
    fn new(requests: Sender<Request>, subscribers: Subscribers) -> Result<Self, AudioError> {
        let enumerator: IMMDeviceEnumerator = unsafe {
            CoCreateInstance(&MMDeviceEnumerator, None, CLSCTX_ALL)
                .map_err(AudioError::EnumerationFailed)?
        };

        // Arrivals are nice to have; polling still finds the sessions.
        let client = match EndpointNotificationClient::new(requests).register(&enumerator) {
            Ok(client) => Some(client),
            Err(e) => {
                tracing::warn!("Endpoint notifications unavailable: {}", e);
                None
            }
        };

        Ok(Self {
            enumerator,
            client,
            sessions: HashMap::new(),
            subscribers,
        })
    }

    fn run(&mut self, inbox: Receiver<Request>, poll_interval: Duration) {
        loop {
            match inbox.recv_timeout(poll_interval) {
                Ok(Request::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
                Ok(request) => self.handle(request),
                Err(RecvTimeoutError::Timeout) => {
                    if let Err(e) = self.poll() {
                        tracing::debug!("Session poll failed: {}", e);
                    }
                }
            }
        }

        if let Some(client) = self.client.take() {
            unsafe {
                let _ = self
                    .enumerator
                    .UnregisterEndpointNotificationCallback(&client);
            }
        }
        tracing::info!("Audio backend stopped");
    }

    fn handle(&mut self, request: Request) {
        match request {
            Request::PlaybackSessions(reply) => {
                let result = self
                    .default_render()
                    .and_then(|device| self.adopt(&device, SessionFlow::Render));
                let _ = reply.send(result);
            }
            Request::CaptureDevices(reply) => {
                let _ = reply.send(self.capture_devices());
            }
            Request::DeviceSessions(device_id, reply) => {
                let result = self
                    .device(&device_id)
                    .and_then(|device| self.adopt(&device, SessionFlow::Capture));
                let _ = reply.send(result);
            }
            Request::SetVolume(session_id, volume, reply) => {
                let _ = reply.send(self.set_volume(&session_id, volume));
            }
            Request::SessionMute(session_id, reply) => {
                let result = match self.sessions.get(&session_id) {
                    Some(entry) => unsafe {
                        entry
                            .volume
                            .GetMute()
                            .map(|muted| Some(muted.as_bool()))
                            .map_err(AudioError::WindowsError)
                    },
                    None => Ok(None),
                };
                let _ = reply.send(result);
            }
            Request::SetSessionMute(session_id, muted, reply) => {
                let _ = reply.send(self.set_mute(&session_id, muted));
            }
            Request::DefaultCaptureMute(reply) => {
                let result = match self.default_capture_volume() {
                    Some(endpoint) => unsafe {
                        endpoint
                            .GetMute()
                            .map(|muted| Some(muted.as_bool()))
                            .map_err(AudioError::WindowsError)
                    },
                    None => Ok(None),
                };
                let _ = reply.send(result);
            }
            Request::SetDefaultCaptureMute(muted, reply) => {
                let result = match self.default_capture_volume() {
                    Some(endpoint) => unsafe {
                        endpoint
                            .SetMute(muted, std::ptr::null())
                            .map_err(AudioError::WindowsError)
                    },
                    None => Err(AudioError::DeviceNotFound {
                        device_id: "default capture".to_string(),
                    }),
                };
                let _ = reply.send(result);
            }
            Request::DeviceArrived(device_id) => self.device_arrived(&device_id),
            Request::Shutdown => {}
        }
    }

    fn publish(&self, event: AudioEvent) {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn default_render(&self) -> Result<IMMDevice, AudioError> {
        unsafe {
            self.enumerator
                .GetDefaultAudioEndpoint(eRender, eConsole)
                .map_err(AudioError::EnumerationFailed)
        }
    }

    fn device(&self, device_id: &str) -> Result<IMMDevice, AudioError> {
        let id = wide(device_id);
        unsafe {
            self.enumerator
                .GetDevice(PCWSTR::from_raw(id.as_ptr()))
                .map_err(|_| AudioError::DeviceNotFound {
                    device_id: device_id.to_string(),
                })
        }
    }

    fn default_capture_volume(&self) -> Option<IAudioEndpointVolume> {
        unsafe {
            let device = self
                .enumerator
                .GetDefaultAudioEndpoint(eCapture, eConsole)
                .ok()?;
            device.Activate::<IAudioEndpointVolume>(CLSCTX_ALL, None).ok()
        }
    }

    fn capture_devices(&self) -> Result<Vec<CaptureDevice>, AudioError> {
        unsafe {
            let collection = self
                .enumerator
                .EnumAudioEndpoints(eCapture, DEVICE_STATEMASK_ALL)
                .map_err(AudioError::EnumerationFailed)?;
            let count = collection
                .GetCount()
                .map_err(AudioError::EnumerationFailed)?;

            let mut devices = Vec::with_capacity(count as usize);
            for i in 0..count {
                let device = collection.Item(i).map_err(AudioError::EnumerationFailed)?;
                if let Ok(capture) = describe_device(&device) {
                    devices.push(capture);
                }
            }
            Ok(devices)
        }
    }

    fn device_arrived(&mut self, device_id: &str) {
        let Ok(device) = self.device(device_id) else {
            return;
        };
        let is_capture = unsafe {
            device
                .cast::<IMMEndpoint>()
                .and_then(|endpoint| endpoint.GetDataFlow())
                .map(|flow| flow == eCapture)
                .unwrap_or(false)
        };
        if !is_capture {
            return;
        }
        match describe_device(&device) {
            Ok(capture) if capture.state == DeviceState::Active => {
                tracing::info!("Capture device arrived: {}", capture.name);
                self.publish(AudioEvent::CaptureDeviceAdded(capture));
            }
            Ok(_) => {}
            Err(e) => tracing::debug!("Arrived device unreadable: {}", e),
        }
    }

    /// Read the sessions on `device` and remember them for later control.
    fn adopt(
        &mut self,
        device: &IMMDevice,
        flow: SessionFlow,
    ) -> Result<Vec<AudioSession>, AudioError> {
        let entries = read_sessions(device, flow)?;
        let mut sessions = Vec::with_capacity(entries.len());
        for entry in entries {
            sessions.push(entry.session.clone());
            self.sessions.insert(entry.session.id.clone(), entry);
        }
        Ok(sessions)
    }

    /// Diff every endpoint's sessions against the last snapshot.
    fn poll(&mut self) -> Result<(), AudioError> {
        let mut current: HashMap<String, SessionEntry> = HashMap::new();

        let render = self.default_render()?;
        for entry in read_sessions(&render, SessionFlow::Render)? {
            current.insert(entry.session.id.clone(), entry);
        }

        unsafe {
            let collection = self
                .enumerator
                .EnumAudioEndpoints(eCapture, DEVICE_STATE_ACTIVE)
                .map_err(AudioError::EnumerationFailed)?;
            let count = collection
                .GetCount()
                .map_err(AudioError::EnumerationFailed)?;
            for i in 0..count {
                let device = collection.Item(i).map_err(AudioError::EnumerationFailed)?;
                match read_sessions(&device, SessionFlow::Capture) {
                    Ok(entries) => {
                        for entry in entries {
                            current.insert(entry.session.id.clone(), entry);
                        }
                    }
                    Err(e) => tracing::debug!("Capture sessions unreadable: {}", e),
                }
            }
        }

        let gone: Vec<String> = self
            .sessions
            .keys()
            .filter(|id| !current.contains_key(*id))
            .cloned()
            .collect();
        for session_id in gone {
            self.sessions.remove(&session_id);
            self.publish(AudioEvent::SessionDisconnected { session_id });
        }

        for (id, entry) in current {
            let Some(previous) = self.sessions.get(&id).map(|known| known.session.clone()) else {
                self.publish(AudioEvent::SessionCreated(entry.session.clone()));
                self.sessions.insert(id, entry);
                continue;
            };

            let now = &entry.session;
            if now.volume != previous.volume {
                self.publish(AudioEvent::VolumeChanged {
                    session_id: id.clone(),
                    volume: now.volume,
                });
            }
            if now.is_muted != previous.is_muted {
                self.publish(AudioEvent::MuteChanged {
                    session_id: id.clone(),
                    muted: now.is_muted,
                });
            }
            if now.state != previous.state {
                self.publish(AudioEvent::StateChanged {
                    session_id: id.clone(),
                    state: now.state,
                });
            }
            self.sessions.insert(id, entry);
        }
        Ok(())
    }

    fn entry(&mut self, session_id: &str) -> Result<&mut SessionEntry, AudioError> {
        if !self.sessions.contains_key(session_id) {
            // May have appeared since the last poll.
            self.poll()?;
        }
        self.sessions
            .get_mut(session_id)
            .ok_or_else(|| AudioError::SessionNotFound {
                session_id: session_id.to_string(),
            })
    }

    fn set_volume(&mut self, session_id: &str, volume: u8) -> Result<(), AudioError> {
        let entry = self.entry(session_id)?;
        unsafe {
            entry
                .volume
                .SetMasterVolume(percent_to_scalar(volume), std::ptr::null())
                .map_err(AudioError::WindowsError)?;
        }
        // Our own change is not news for the next poll.
        entry.session.volume = volume.min(100);
        Ok(())
    }

    fn set_mute(&mut self, session_id: &str, muted: bool) -> Result<(), AudioError> {
        let entry = self.entry(session_id)?;
        unsafe {
            entry
                .volume
                .SetMute(muted, std::ptr::null())
                .map_err(AudioError::WindowsError)?;
        }
        entry.session.is_muted = muted;
        Ok(())
    }
}

fn device_state(state: DEVICE_STATE) -> DeviceState {
    match state {
        s if s == DEVICE_STATE_ACTIVE => DeviceState::Active,
        s if s == DEVICE_STATE_DISABLED => DeviceState::Disabled,
        s if s == DEVICE_STATE_UNPLUGGED => DeviceState::Unplugged,
        _ => DeviceState::NotPresent,
    }
}

fn describe_device(device: &IMMDevice) -> Result<CaptureDevice, AudioError> {
    unsafe {
        let id = take_com_string(device.GetId().map_err(AudioError::EnumerationFailed)?)?;
        let state = device.GetState().map_err(AudioError::EnumerationFailed)?;
        Ok(CaptureDevice {
            id,
            name: friendly_name(device).unwrap_or_else(|| "Unknown".to_string()),
            state: device_state(state),
        })
    }
}

/// Friendly name from the device property store.
fn friendly_name(device: &IMMDevice) -> Option<String> {
    unsafe {
        let props: IPropertyStore = device.OpenPropertyStore(STGM(0)).ok()?;
        let key = PROPERTYKEY {
            fmtid: DEVPKEY_Device_FriendlyName.fmtid,
            pid: DEVPKEY_Device_FriendlyName.pid,
        };
        let name = props.GetValue(&key).ok()?.to_string();
        (!name.is_empty()).then_some(name)
    }
}

fn session_state(control: &IAudioSessionControl2) -> Result<SessionState, AudioError> {
    let state = unsafe { control.GetState() }.map_err(AudioError::WindowsError)?;
    Ok(match state {
        s if s == AudioSessionStateActive => SessionState::Active,
        s if s == AudioSessionStateExpired => SessionState::Expired,
        _ => SessionState::Inactive,
    })
}

/// Live, non-expired sessions on `device`.
fn read_sessions(device: &IMMDevice, flow: SessionFlow) -> Result<Vec<SessionEntry>, AudioError> {
    let device_name = friendly_name(device).unwrap_or_else(|| "Unknown".to_string());
    unsafe {
        let manager = device
            .Activate::<IAudioSessionManager2>(CLSCTX_ALL, None)
            .map_err(AudioError::WindowsError)?;
        let sessions = manager
            .GetSessionEnumerator()
            .map_err(AudioError::WindowsError)?;
        let count = sessions.GetCount().map_err(AudioError::WindowsError)?;

        let mut entries = Vec::with_capacity(count.max(0) as usize);
        for i in 0..count {
            let Ok(control) = sessions.GetSession(i) else {
                continue;
            };
            let Ok(control) = control.cast::<IAudioSessionControl2>() else {
                continue;
            };
            match read_session(&control, flow, &device_name) {
                Ok(Some(entry)) => entries.push(entry),
                Ok(None) => {}
                Err(e) => tracing::debug!("Skipping unreadable session: {}", e),
            }
        }
        Ok(entries)
    }
}

fn read_session(
    control: &IAudioSessionControl2,
    flow: SessionFlow,
    device_name: &str,
) -> Result<Option<SessionEntry>, AudioError> {
    let state = session_state(control)?;
    if state == SessionState::Expired {
        return Ok(None);
    }

    unsafe {
        let id = take_com_string(
            control
                .GetSessionInstanceIdentifier()
                .map_err(AudioError::WindowsError)?,
        )?;
        let display_name =
            take_com_string(control.GetDisplayName().map_err(AudioError::WindowsError)?)?;
        let process_id = control.GetProcessId().unwrap_or(0);
        let is_system = control.IsSystemSoundsSession() == S_OK;

        let volume = control
            .cast::<ISimpleAudioVolume>()
            .map_err(|_| AudioError::VolumeNotAvailable)?;
        let level = volume.GetMasterVolume().map_err(AudioError::WindowsError)?;
        let muted = volume.GetMute().map_err(AudioError::WindowsError)?;

        let executable_path = if process_id == 0 {
            None
        } else {
            process::image_path(process_id)
        };

        Ok(Some(SessionEntry {
            volume,
            session: AudioSession {
                id,
                display_name,
                executable_path,
                process_id,
                is_system,
                is_muted: muted.as_bool(),
                volume: scalar_to_percent(level),
                state,
                flow,
                device_name: device_name.to_string(),
            },
        }))
    }
}
