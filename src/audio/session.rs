//! Audio session data models and the audio backend seam.
//!
//! Defines the sessions, capture devices and events the policy engine works
//! with, plus the [`AudioSessionProvider`] trait implemented by the platform
//! backend (and by in-memory fakes in tests).

use thiserror::Error;
use tokio::sync::mpsc::UnboundedReceiver;

/// Direction of the endpoint a session lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionFlow {
    /// Playback (speakers, headset output)
    Render,

    /// Recording (microphones)
    Capture,
}

/// Activity state of an audio session (maps to AudioSessionState).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Inactive,
    Active,
    Expired,
}

/// Endpoint device state, ordered so that `Active` sorts first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DeviceState {
    /// Device is active and available for use
    Active,

    /// Device is disabled in Windows Sound settings
    Disabled,

    /// Device is not present (driver issue)
    NotPresent,

    /// Device is unplugged (for pluggable devices)
    Unplugged,
}

/// A microphone-class endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureDevice {
    /// Opaque endpoint ID (IMMDevice::GetId)
    pub id: String,

    /// Friendly name from the device property store
    pub name: String,

    pub state: DeviceState,
}

/// One application's audio stream on an endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioSession {
    /// Session instance identifier, unique per live session
    pub id: String,

    pub display_name: String,

    /// Full path of the owning process image, when it could be read
    pub executable_path: Option<String>,

    pub process_id: u32,

    /// True for the system sounds session of the mixer
    pub is_system: bool,

    pub is_muted: bool,

    /// Volume as percentage (0-100)
    pub volume: u8,

    pub state: SessionState,

    pub flow: SessionFlow,

    /// Friendly name of the endpoint the session plays or records on
    pub device_name: String,
}

impl AudioSession {
    /// File name component of the executable path (handles both separators).
    pub fn executable_name(&self) -> Option<&str> {
        self.executable_path
            .as_deref()
            .and_then(|path| path.rsplit(&['\\', '/'][..]).next())
            .filter(|name| !name.is_empty())
    }
}

/// Notifications from the audio backend, delivered through the engine inbox.
#[derive(Debug, Clone, PartialEq)]
pub enum AudioEvent {
    /// A new session appeared (or was re-announced; handling is idempotent)
    SessionCreated(AudioSession),

    /// The session went away
    SessionDisconnected { session_id: String },

    VolumeChanged { session_id: String, volume: u8 },

    MuteChanged { session_id: String, muted: bool },

    StateChanged {
        session_id: String,
        state: SessionState,
    },

    /// A capture endpoint was plugged in or enabled
    CaptureDeviceAdded(CaptureDevice),
}

/// Audio backend error types.
#[derive(Debug, Error)]
pub enum AudioError {
    #[error("Session not found: {session_id}")]
    SessionNotFound { session_id: String },

    #[error("Device not found: {device_id}")]
    DeviceNotFound { device_id: String },

    #[error("Volume control not available for session")]
    VolumeNotAvailable,

    #[error("Audio backend is not running")]
    BackendStopped,

    #[cfg(windows)]
    #[error("COM initialization failed: {0}")]
    ComInitFailed(#[source] windows::core::Error),

    #[cfg(windows)]
    #[error("Failed to enumerate devices: {0}")]
    EnumerationFailed(#[source] windows::core::Error),

    #[cfg(windows)]
    #[error("Windows API error: {0}")]
    WindowsError(#[source] windows::core::Error),

    #[error("String conversion error: {0}")]
    StringConversion(String),
}

/// Audio subsystem as seen by the policy engine.
///
/// Implementations own all OS device and session objects; callers only hold
/// ids and re-query live state through these methods.
pub trait AudioSessionProvider: Send + Sync {
    /// Open a new event feed. Every call returns an independent receiver.
    fn subscribe(&self) -> Result<UnboundedReceiver<AudioEvent>, AudioError>;

    /// Sessions on the default playback endpoint.
    fn playback_sessions(&self) -> Result<Vec<AudioSession>, AudioError>;

    /// All capture endpoints, in backend order.
    fn capture_devices(&self) -> Result<Vec<CaptureDevice>, AudioError>;

    /// Sessions on one capture endpoint.
    fn device_sessions(&self, device_id: &str) -> Result<Vec<AudioSession>, AudioError>;

    fn set_session_volume(&self, session_id: &str, volume: u8) -> Result<(), AudioError>;

    /// Live mute state, `None` if the session no longer exists.
    fn session_mute(&self, session_id: &str) -> Result<Option<bool>, AudioError>;

    fn set_session_mute(&self, session_id: &str, muted: bool) -> Result<(), AudioError>;

    /// Mute state of the default capture endpoint, `None` if there is none.
    fn default_capture_mute(&self) -> Result<Option<bool>, AudioError>;

    fn set_default_capture_mute(&self, muted: bool) -> Result<(), AudioError>;
}

/// Volume scalar (0.0 to 1.0) as percentage (0-100).
pub fn scalar_to_percent(level: f32) -> u8 {
    (level.clamp(0.0, 1.0) * 100.0).round() as u8
}

/// Percentage (0-100) as volume scalar (0.0 to 1.0).
pub fn percent_to_scalar(volume: u8) -> f32 {
    f32::from(volume.min(100)) / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(path: Option<&str>) -> AudioSession {
        AudioSession {
            id: "s".to_string(),
            display_name: String::new(),
            executable_path: path.map(str::to_string),
            process_id: 1,
            is_system: false,
            is_muted: false,
            volume: 50,
            state: SessionState::Active,
            flow: SessionFlow::Render,
            device_name: "Speakers".to_string(),
        }
    }

    #[test]
    fn test_executable_name() {
        assert_eq!(
            session(Some(r"C:\Program Files\Google\Chrome\Application\chrome.exe"))
                .executable_name(),
            Some("chrome.exe")
        );
        assert_eq!(session(Some("/usr/bin/firefox")).executable_name(), Some("firefox"));
        assert_eq!(session(Some(r"C:\dir\")).executable_name(), None);
        assert_eq!(session(None).executable_name(), None);
    }

    #[test]
    fn test_volume_conversion() {
        assert_eq!(scalar_to_percent(0.796), 80);
        assert_eq!(scalar_to_percent(1.7), 100);
        assert_eq!(scalar_to_percent(-0.2), 0);
        assert!((percent_to_scalar(35) - 0.35).abs() < f32::EPSILON);
        assert!((percent_to_scalar(250) - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_device_state_orders_active_first() {
        let mut states = vec![
            DeviceState::Unplugged,
            DeviceState::Active,
            DeviceState::Disabled,
        ];
        states.sort();
        assert_eq!(states[0], DeviceState::Active);
    }
}
