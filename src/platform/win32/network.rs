//! Adapter inspection: IP Helper for wired links, `netsh` for Wi-Fi radios.

use crate::net::command::{parse_netsh_interfaces, run_tool};
use crate::net::{NetworkInterfaceInspector, WiredInterface, WirelessInterface};
use anyhow::{bail, Result};
use async_trait::async_trait;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use windows::Win32::Foundation::{ERROR_BUFFER_OVERFLOW, ERROR_SUCCESS};
use windows::Win32::NetworkManagement::IpHelper::{
    GetAdaptersAddresses, GAA_FLAG_INCLUDE_GATEWAYS, GAA_FLAG_SKIP_DNS_SERVER,
    GAA_FLAG_SKIP_MULTICAST, IP_ADAPTER_ADDRESSES_LH,
};
use windows::Win32::NetworkManagement::Ndis::IfOperStatusUp;
use windows::Win32::Networking::WinSock::AF_UNSPEC;

const IF_TYPE_ETHERNET_CSMACD: u32 = 6;
const NETSH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, Default)]
pub struct WindowsNetworkInspector;

fn ethernet_adapters() -> Result<Vec<WiredInterface>> {
    let flags = GAA_FLAG_INCLUDE_GATEWAYS | GAA_FLAG_SKIP_DNS_SERVER | GAA_FLAG_SKIP_MULTICAST;
    let mut size = 16 * 1024u32;

    // Retry once the API has told us how much it needs.
    for _ in 0..3 {
        let mut buffer = vec![0u64; (size as usize).div_ceil(8)];
        let first = buffer.as_mut_ptr() as *mut IP_ADAPTER_ADDRESSES_LH;
        let result = unsafe {
            GetAdaptersAddresses(AF_UNSPEC.0 as u32, flags, None, Some(first), &mut size)
        };

        if result == ERROR_BUFFER_OVERFLOW.0 {
            continue;
        }
        if result != ERROR_SUCCESS.0 {
            bail!("GetAdaptersAddresses failed: {result}");
        }

        let mut adapters = Vec::new();
        let mut current = first as *const IP_ADAPTER_ADDRESSES_LH;
        while let Some(adapter) = unsafe { current.as_ref() } {
            if adapter.IfType == IF_TYPE_ETHERNET_CSMACD {
                let name = unsafe { adapter.FriendlyName.to_string() }.unwrap_or_default();
                adapters.push(WiredInterface {
                    name,
                    is_up: adapter.OperStatus == IfOperStatusUp,
                    has_gateway: !adapter.FirstGatewayAddress.is_null(),
                });
            }
            current = adapter.Next;
        }
        return Ok(adapters);
    }
    bail!("GetAdaptersAddresses kept asking for a larger buffer")
}

#[async_trait]
impl NetworkInterfaceInspector for WindowsNetworkInspector {
    async fn wired(&self) -> Result<Vec<WiredInterface>> {
        tokio::task::spawn_blocking(ethernet_adapters).await?
    }

    async fn wireless(&self) -> Result<Vec<WirelessInterface>> {
        let args: Vec<String> = ["wlan", "show", "interfaces"]
            .iter()
            .map(|arg| arg.to_string())
            .collect();
        let output = run_tool("netsh", &args, NETSH_TIMEOUT, &CancellationToken::new()).await?;
        // No WLAN service means no wireless adapters.
        if !output.status.success() {
            tracing::debug!("netsh wlan exited with {}", output.status);
            return Ok(Vec::new());
        }
        Ok(parse_netsh_interfaces(&String::from_utf8_lossy(&output.stdout)))
    }
}
