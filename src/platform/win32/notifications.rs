//! Endpoint arrival notifications using IMMNotificationClient.

use super::audio::Request;
use std::sync::mpsc::Sender;
use windows::core::{implement, PCWSTR};
use windows::Win32::Media::Audio::{
    EDataFlow, ERole, IMMDeviceEnumerator, IMMNotificationClient, IMMNotificationClient_Impl,
    DEVICE_STATE, DEVICE_STATE_ACTIVE,
};
// Re-export windows_core so the implement macro can find it
#[allow(unused_imports)]
use windows_core;

/// Forwards endpoint arrivals to the audio worker, which decides whether
/// they are capture endpoints.
#[implement(IMMNotificationClient)]
pub struct EndpointNotificationClient {
    requests: Sender<Request>,
}

impl EndpointNotificationClient {
    pub fn new(requests: Sender<Request>) -> Self {
        Self { requests }
    }

    /// Register with `enumerator`. The returned interface must be kept alive
    /// and unregistered before the enumerator is released.
    pub fn register(
        self,
        enumerator: &IMMDeviceEnumerator,
    ) -> Result<IMMNotificationClient, windows::core::Error> {
        unsafe {
            let client: IMMNotificationClient = self.into();
            enumerator.RegisterEndpointNotificationCallback(&client)?;
            Ok(client)
        }
    }
}

impl EndpointNotificationClient_Impl {
    fn forward(&self, device_id: &PCWSTR) {
        unsafe {
            if let Ok(id) = device_id.to_string() {
                let _ = self.requests.send(Request::DeviceArrived(id));
            }
        }
    }
}

impl IMMNotificationClient_Impl for EndpointNotificationClient_Impl {
    fn OnDeviceStateChanged(
        &self,
        pwstrdeviceid: &PCWSTR,
        dwnewstate: DEVICE_STATE,
    ) -> windows::core::Result<()> {
        if dwnewstate == DEVICE_STATE_ACTIVE {
            self.forward(pwstrdeviceid);
        }
        Ok(())
    }

    fn OnDeviceAdded(&self, pwstrdeviceid: &PCWSTR) -> windows::core::Result<()> {
        self.forward(pwstrdeviceid);
        Ok(())
    }

    fn OnDeviceRemoved(&self, _pwstrdeviceid: &PCWSTR) -> windows::core::Result<()> {
        Ok(())
    }

    fn OnDefaultDeviceChanged(
        &self,
        _flow: EDataFlow,
        _role: ERole,
        _pwstrdefaultdeviceid: &PCWSTR,
    ) -> windows::core::Result<()> {
        Ok(())
    }

    fn OnPropertyValueChanged(
        &self,
        _pwstrdeviceid: &PCWSTR,
        _key: &windows::Win32::UI::Shell::PropertiesSystem::PROPERTYKEY,
    ) -> windows::core::Result<()> {
        Ok(())
    }
}
