//! Win32 and COM implementations of the service seams.

pub mod audio;
pub mod hotkey;
pub mod memory;
pub mod network;
pub mod notifications;
pub mod process;

pub use audio::WindowsAudio;
pub use hotkey::WindowsHotkeys;
pub use memory::WindowsMemoryProbe;
pub use network::WindowsNetworkInspector;
pub use process::ToolhelpProcessReader;

use crate::alert::Alerter;
use crate::audio::AudioError;
use windows::core::PWSTR;
use windows::Win32::System::Com::{CoInitializeEx, CoTaskMemFree, CoUninitialize, COINIT};
use windows::Win32::UI::WindowsAndMessaging::{MessageBeep, MB_ICONWARNING};

/// COM initialization guard that uninitializes COM on drop.
pub struct ComGuard {
    initialized: bool,
}

impl ComGuard {
    /// Initialize COM for the current thread.
    pub fn new(model: COINIT) -> Result<Self, AudioError> {
        unsafe {
            CoInitializeEx(None, model)
                .ok()
                .map_err(AudioError::ComInitFailed)?;
        }
        Ok(Self { initialized: true })
    }
}

impl Drop for ComGuard {
    fn drop(&mut self) {
        if self.initialized {
            unsafe {
                CoUninitialize();
            }
        }
    }
}

/// Copy a COM-allocated string and free it.
pub(crate) unsafe fn take_com_string(value: PWSTR) -> Result<String, AudioError> {
    if value.is_null() {
        return Ok(String::new());
    }
    let text = value
        .to_string()
        .map_err(|e| AudioError::StringConversion(e.to_string()));
    CoTaskMemFree(Some(value.0 as *const _));
    text
}

/// NUL-terminated UTF-16 copy of `text`.
pub(crate) fn wide(text: &str) -> Vec<u16> {
    text.encode_utf16().chain(std::iter::once(0)).collect()
}

/// System warning sound.
#[derive(Debug, Clone, Copy, Default)]
pub struct BeepAlerter;

impl Alerter for BeepAlerter {
    fn alert(&self) {
        unsafe {
            if let Err(e) = MessageBeep(MB_ICONWARNING) {
                tracing::debug!("MessageBeep failed: {}", e);
            }
        }
    }
}
