//! Network probing seams.

use async_trait::async_trait;
use std::fmt;
use tokio_util::sync::CancellationToken;

/// A wired (Ethernet) adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WiredInterface {
    pub name: String,
    pub is_up: bool,
    pub has_gateway: bool,
}

impl WiredInterface {
    /// Up and routed; enough to call the link healthy.
    pub fn is_usable(&self) -> bool {
        self.is_up && self.has_gateway
    }
}

/// 802.11 radio generation reported for a wireless adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhyType {
    A,
    B,
    G,
    N,
    Ac,
    Ax,
    Be,
    Unknown(String),
}

impl PhyType {
    /// Parse radio type text such as "802.11ax".
    pub fn from_radio_type(text: &str) -> Self {
        let text = text.trim();
        let suffix = text
            .to_ascii_lowercase()
            .strip_prefix("802.11")
            .map(str::to_string);
        match suffix.as_deref() {
            Some("a") => PhyType::A,
            Some("b") => PhyType::B,
            Some("g") => PhyType::G,
            Some("n") => PhyType::N,
            Some("ac") => PhyType::Ac,
            Some("ax") => PhyType::Ax,
            Some("be") => PhyType::Be,
            _ => PhyType::Unknown(text.to_string()),
        }
    }

    /// Wi-Fi 5 or newer.
    pub fn is_modern(&self) -> bool {
        matches!(self, PhyType::Ac | PhyType::Ax | PhyType::Be)
    }
}

impl fmt::Display for PhyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PhyType::A => f.write_str("802.11a"),
            PhyType::B => f.write_str("802.11b"),
            PhyType::G => f.write_str("802.11g"),
            PhyType::N => f.write_str("802.11n"),
            PhyType::Ac => f.write_str("802.11ac"),
            PhyType::Ax => f.write_str("802.11ax"),
            PhyType::Be => f.write_str("802.11be"),
            PhyType::Unknown(text) => f.write_str(text),
        }
    }
}

/// A wireless adapter with its current radio type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WirelessInterface {
    pub name: String,
    pub description: String,
    pub phy: PhyType,
    /// Hosted network or other virtual adapter
    pub is_virtual: bool,
}

#[async_trait]
pub trait NetworkInterfaceInspector: Send + Sync {
    async fn wired(&self) -> anyhow::Result<Vec<WiredInterface>>;

    async fn wireless(&self) -> anyhow::Result<Vec<WirelessInterface>>;
}

/// Outcome of one echo request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeStatus {
    Success,
    TimedOut,
    Unreachable,
    Other(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeReply {
    pub status: ProbeStatus,
    pub round_trip_ms: u32,
}

impl ProbeReply {
    pub fn success(round_trip_ms: u32) -> Self {
        Self {
            status: ProbeStatus::Success,
            round_trip_ms,
        }
    }
}

#[async_trait]
pub trait Pinger: Send + Sync {
    /// Send one echo request. Errors mean the probe itself could not run.
    async fn probe(&self, target: &str, cancel: &CancellationToken) -> anyhow::Result<ProbeReply>;
}

#[async_trait]
pub trait Traceroute: Send + Sync {
    /// Route report to `host`, one hop per line.
    async fn trace(&self, host: &str, cancel: &CancellationToken) -> anyhow::Result<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_radio_types() {
        assert_eq!(PhyType::from_radio_type("802.11ax"), PhyType::Ax);
        assert_eq!(PhyType::from_radio_type(" 802.11AC "), PhyType::Ac);
        assert!(PhyType::from_radio_type("802.11be").is_modern());
        assert!(!PhyType::from_radio_type("802.11n").is_modern());
        assert_eq!(
            PhyType::from_radio_type("HRDSSS"),
            PhyType::Unknown("HRDSSS".to_string())
        );
    }
}
