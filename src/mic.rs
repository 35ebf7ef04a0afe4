//! Global hotkey that toggles the meeting microphone.

use crate::audio::engine::VolumePolicyEngine;
use crate::audio::session::AudioError;
use crate::service::{blocking, Monitor, ServiceContext, ServiceError};
use anyhow::{anyhow, Context};
use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::MissedTickBehavior;

pub const SERVICE_NAME: &str = "Mic";

/// Status text while the mic is muted.
pub const MUTED_STATUS: &str = "Mic muted";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyComboError {
    #[error("empty key combination")]
    Empty,

    #[error("unknown key '{0}'")]
    UnknownKey(String),

    #[error("key combination has no key, only modifiers")]
    MissingKey,

    #[error("key combination names more than one key")]
    MultipleKeys,

    #[error("key combination needs at least one modifier")]
    NoModifier,
}

/// Non-modifier key of a combination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Key {
    /// A-Z or 0-9, stored upper-case
    Char(char),
    /// F1-F24
    Function(u8),
}

impl Key {
    /// Windows virtual-key code.
    pub fn virtual_key(self) -> u32 {
        match self {
            Key::Char(c) => c as u32,
            Key::Function(n) => 0x70 + u32::from(n) - 1,
        }
    }

    fn parse(token: &str) -> Option<Self> {
        let upper = token.to_ascii_uppercase();
        let mut chars = upper.chars();
        if let (Some(c), None) = (chars.next(), chars.next()) {
            return c.is_ascii_alphanumeric().then_some(Key::Char(c));
        }
        upper
            .strip_prefix('F')
            .and_then(|n| n.parse::<u8>().ok())
            .filter(|n| (1..=24).contains(n))
            .map(Key::Function)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Char(c) => write!(f, "{c}"),
            Key::Function(n) => write!(f, "F{n}"),
        }
    }
}

/// A modifier set plus one key, e.g. `Ctrl+Alt+M`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyCombo {
    pub ctrl: bool,
    pub alt: bool,
    pub shift: bool,
    pub win: bool,
    pub key: Key,
}

impl KeyCombo {
    /// `MOD_*` flags for RegisterHotKey.
    pub fn modifier_flags(&self) -> u32 {
        let mut flags = 0;
        if self.alt {
            flags |= 0x0001;
        }
        if self.ctrl {
            flags |= 0x0002;
        }
        if self.shift {
            flags |= 0x0004;
        }
        if self.win {
            flags |= 0x0008;
        }
        flags
    }
}

impl FromStr for KeyCombo {
    type Err = KeyComboError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().is_empty() {
            return Err(KeyComboError::Empty);
        }

        let (mut ctrl, mut alt, mut shift, mut win) = (false, false, false, false);
        let mut key = None;
        for token in s.split('+').map(str::trim) {
            match token.to_ascii_lowercase().as_str() {
                "ctrl" | "control" => ctrl = true,
                "alt" => alt = true,
                "shift" => shift = true,
                "win" | "super" | "meta" => win = true,
                _ => {
                    let parsed =
                        Key::parse(token).ok_or_else(|| KeyComboError::UnknownKey(token.to_string()))?;
                    if key.replace(parsed).is_some() {
                        return Err(KeyComboError::MultipleKeys);
                    }
                }
            }
        }

        let key = key.ok_or(KeyComboError::MissingKey)?;
        if !(ctrl || alt || shift || win) {
            return Err(KeyComboError::NoModifier);
        }
        Ok(Self {
            ctrl,
            alt,
            shift,
            win,
            key,
        })
    }
}

impl fmt::Display for KeyCombo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (held, name) in [
            (self.ctrl, "Ctrl"),
            (self.alt, "Alt"),
            (self.shift, "Shift"),
            (self.win, "Win"),
        ] {
            if held {
                write!(f, "{name}+")?;
            }
        }
        write!(f, "{}", self.key)
    }
}

impl Serialize for KeyCombo {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for KeyCombo {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

/// Registers system-wide hotkeys.
pub trait HotkeyRegistry: Send + Sync {
    fn register(&self, combo: &KeyCombo) -> anyhow::Result<HotkeyRegistration>;
}

/// A held hotkey. Presses arrive as `()`. Dropping the registration releases
/// the combination before the drop returns, so it can be registered again
/// right away.
pub struct HotkeyRegistration {
    presses: UnboundedReceiver<()>,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl HotkeyRegistration {
    pub fn new(presses: UnboundedReceiver<()>, release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            presses,
            release: Some(Box::new(release)),
        }
    }

    /// Next press; `None` once the backend has dropped the registration.
    pub async fn pressed(&mut self) -> Option<()> {
        self.presses.recv().await
    }
}

impl Drop for HotkeyRegistration {
    fn drop(&mut self) {
        self.presses.close();
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl fmt::Debug for HotkeyRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HotkeyRegistration")
            .field("released", &self.release.is_none())
            .finish()
    }
}

/// Mute control the hotkey drives.
pub trait MicControl: Send + Sync {
    fn toggle_mic_mute(&self) -> Result<Option<bool>, AudioError>;

    fn mic_muted(&self) -> Result<Option<bool>, AudioError>;
}

impl MicControl for VolumePolicyEngine {
    fn toggle_mic_mute(&self) -> Result<Option<bool>, AudioError> {
        VolumePolicyEngine::toggle_mic_mute(self)
    }

    fn mic_muted(&self) -> Result<Option<bool>, AudioError> {
        VolumePolicyEngine::mic_muted(self)
    }
}

pub struct MicMuteService {
    combo: KeyCombo,
    hotkeys: Arc<dyn HotkeyRegistry>,
    mic: Arc<dyn MicControl>,
    refresh_interval: Duration,
}

impl MicMuteService {
    pub fn new(
        combo: KeyCombo,
        hotkeys: Arc<dyn HotkeyRegistry>,
        mic: Arc<dyn MicControl>,
        refresh_interval: Duration,
    ) -> Self {
        Self {
            combo,
            hotkeys,
            mic,
            refresh_interval,
        }
    }

    fn toggle(&self, ctx: &ServiceContext) {
        let result = blocking(|| self.mic.toggle_mic_mute());
        if let Ok(state) = &result {
            ctx.log(format!("{} pressed: {}", self.combo, describe(*state)));
        }
        report(ctx, result);
    }

    fn refresh(&self, ctx: &ServiceContext) {
        report(ctx, blocking(|| self.mic.mic_muted()));
    }
}

fn describe(state: Option<bool>) -> &'static str {
    match state {
        Some(true) => MUTED_STATUS,
        Some(false) => "Mic live",
        None => "No capture device",
    }
}

fn report(ctx: &ServiceContext, result: Result<Option<bool>, AudioError>) {
    match result {
        Ok(state) => ctx.set_status(describe(state), false),
        Err(err) => {
            tracing::warn!("mic mute query failed: {err}");
            ctx.set_status_key("failed", format!("Mic unavailable: {err}"), true);
        }
    }
}

#[async_trait]
impl Monitor for MicMuteService {
    fn name(&self) -> &str {
        SERVICE_NAME
    }

    async fn run(&self, ctx: ServiceContext) -> Result<(), ServiceError> {
        let mut hotkey = self
            .hotkeys
            .register(&self.combo)
            .with_context(|| format!("failed to register hotkey {}", self.combo))?;
        ctx.log(format!("Hotkey {} registered", self.combo));
        self.refresh(&ctx);

        let mut tick = tokio::time::interval(self.refresh_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tick.tick().await;

        loop {
            tokio::select! {
                biased;
                _ = ctx.cancelled() => return Err(ServiceError::Cancelled),
                press = hotkey.pressed() => match press {
                    Some(()) => self.toggle(&ctx),
                    None => return Err(anyhow!("hotkey {} was unregistered", self.combo).into()),
                },
                _ = tick.tick() => self.refresh(&ctx),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::classify::{ClassifierRules, SessionClassifier};
    use crate::audio::policy::{PolicyKind, PolicyTable, VolumePolicy};
    use crate::service::ServiceSupervisor;
    use crate::status::StatusBus;
    use crate::testing::{CountingAlerter, FakeAudio, FakeHotkeys, FakeProcesses};

    #[test]
    fn test_parse_and_format() {
        let combo: KeyCombo = "ctrl + alt + m".parse().unwrap();
        assert!(combo.ctrl && combo.alt && !combo.shift && !combo.win);
        assert_eq!(combo.key, Key::Char('M'));
        assert_eq!(combo.to_string(), "Ctrl+Alt+M");
        assert_eq!(combo.modifier_flags(), 0x0003);
        assert_eq!(combo.key.virtual_key(), 0x4D);

        let function: KeyCombo = "Shift+Win+F9".parse().unwrap();
        assert_eq!(function.to_string(), "Shift+Win+F9");
        assert_eq!(function.key.virtual_key(), 0x78);
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!("".parse::<KeyCombo>(), Err(KeyComboError::Empty));
        assert_eq!("Ctrl+Alt".parse::<KeyCombo>(), Err(KeyComboError::MissingKey));
        assert_eq!("M".parse::<KeyCombo>(), Err(KeyComboError::NoModifier));
        assert_eq!("Ctrl+M+N".parse::<KeyCombo>(), Err(KeyComboError::MultipleKeys));
        assert_eq!(
            "Ctrl+F25".parse::<KeyCombo>(),
            Err(KeyComboError::UnknownKey("F25".to_string()))
        );
        assert_eq!(
            "Ctrl+Space".parse::<KeyCombo>(),
            Err(KeyComboError::UnknownKey("Space".to_string()))
        );
    }

    #[test]
    fn test_serde_uses_text_form() {
        let combo: KeyCombo = serde_json::from_str("\"Ctrl+Shift+0\"").unwrap();
        assert_eq!(serde_json::to_string(&combo).unwrap(), "\"Ctrl+Shift+0\"");
        assert!(serde_json::from_str::<KeyCombo>("\"Ctrl\"").is_err());
    }

    fn engine(audio: Arc<FakeAudio>) -> Arc<VolumePolicyEngine> {
        let policies = PolicyTable::new(
            PolicyKind::ALL
                .iter()
                .map(|&kind| VolumePolicy::new(kind, 50, 0, 100).unwrap())
                .collect(),
        )
        .unwrap();
        Arc::new(VolumePolicyEngine::new(
            audio,
            SessionClassifier::new(ClassifierRules::default(), Arc::new(FakeProcesses::default())),
            policies,
            Arc::new(CountingAlerter::default()),
            Duration::from_secs(10),
        ))
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_press_toggles_and_refresh_tracks_external_changes() {
        let audio = Arc::new(FakeAudio::default());
        audio.set_default_capture_muted(Some(false));
        let hotkeys = Arc::new(FakeHotkeys::default());
        let combo: KeyCombo = "Ctrl+Alt+M".parse().unwrap();
        let service = Arc::new(MicMuteService::new(
            combo,
            hotkeys.clone(),
            engine(audio.clone()),
            Duration::from_secs(5),
        ));
        let mut supervisor = ServiceSupervisor::new(StatusBus::new());
        let handle = supervisor.register(service);

        supervisor.start_all().await;
        settle().await;
        assert_eq!(hotkeys.registered(), vec![combo]);
        assert_eq!(handle.status().text, "Mic live");

        hotkeys.press();
        settle().await;
        assert_eq!(handle.status().text, "Mic muted");
        assert_eq!(audio.default_capture_muted(), Some(true));

        audio.set_default_capture_muted(Some(false));
        tokio::time::sleep(Duration::from_secs(6)).await;
        settle().await;
        assert_eq!(handle.status().text, "Mic live");

        audio.set_default_capture_muted(None);
        hotkeys.press();
        settle().await;
        assert_eq!(handle.status().text, "No capture device");

        supervisor.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_lost_registration_fails_service() {
        let hotkeys = Arc::new(FakeHotkeys::default());
        let service = Arc::new(MicMuteService::new(
            "Ctrl+Alt+M".parse().unwrap(),
            hotkeys.clone(),
            engine(Arc::new(FakeAudio::default())),
            Duration::from_secs(5),
        ));
        let mut supervisor = ServiceSupervisor::new(StatusBus::new());
        let handle = supervisor.register(service);

        supervisor.start_all().await;
        settle().await;
        hotkeys.unregister_all();
        settle().await;

        assert!(handle.status().is_error);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_registers_the_hotkey_again() {
        let audio = Arc::new(FakeAudio::default());
        audio.set_default_capture_muted(Some(false));
        let hotkeys = Arc::new(FakeHotkeys::default());
        let combo: KeyCombo = "Ctrl+Alt+M".parse().unwrap();
        let service = Arc::new(MicMuteService::new(
            combo,
            hotkeys.clone(),
            engine(audio.clone()),
            Duration::from_secs(5),
        ));
        let mut supervisor = ServiceSupervisor::new(StatusBus::new());
        let handle = supervisor.register(service);

        supervisor.start_all().await;
        settle().await;
        handle.stop().await;
        assert!(hotkeys.registered().is_empty());

        handle.restart().await;
        settle().await;
        assert!(!handle.status().is_error);
        assert_eq!(hotkeys.registered(), vec![combo]);

        hotkeys.press();
        settle().await;
        assert_eq!(handle.status().text, "Mic muted");

        for _ in 0..3 {
            handle.restart().await;
            settle().await;
        }
        assert!(!handle.status().is_error);
        assert_eq!(hotkeys.registered(), vec![combo]);

        supervisor.shutdown().await;
        assert!(hotkeys.registered().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_held_combination_cannot_be_registered_twice() {
        let hotkeys = Arc::new(FakeHotkeys::default());
        let combo: KeyCombo = "Ctrl+Alt+M".parse().unwrap();
        let mut supervisor = ServiceSupervisor::new(StatusBus::new());
        let first = supervisor.register(Arc::new(MicMuteService::new(
            combo,
            hotkeys.clone(),
            engine(Arc::new(FakeAudio::default())),
            Duration::from_secs(5),
        )));

        supervisor.start_all().await;
        settle().await;
        assert!(!first.status().is_error);

        let held = hotkeys.register(&combo);
        assert!(held.is_err());

        first.stop().await;
        let again = hotkeys.register(&combo);
        assert!(again.is_ok());
        drop(again);
        assert!(hotkeys.registered().is_empty());

        supervisor.shutdown().await;
    }
}
