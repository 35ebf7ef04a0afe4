//! Link type and latency health.
//!
//! Every interval the monitor works out what kind of link the machine is on
//! and pings two targets concurrently. The faster reply feeds a rolling
//! window; a slow result captures a traceroute, and repeated slowness, a
//! failed probe or an unusable link beeps.

use super::probe::{NetworkInterfaceInspector, Pinger, ProbeStatus, Traceroute, WirelessInterface};
use super::window::MovingWindowAverage;
use crate::alert::Alerter;
use crate::service::{Monitor, ServiceContext, ServiceError};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

pub const SERVICE_NAME: &str = "Network";

/// Link classification.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum NetState {
    /// No usable link, or the Wi-Fi adapter could not be identified
    #[default]
    None,
    EthernetOk,
    WifiOk,
    /// Wi-Fi on an older radio generation
    WifiBad,
}

impl NetState {
    pub fn is_ok(self) -> bool {
        matches!(self, NetState::EthernetOk | NetState::WifiOk)
    }
}

impl fmt::Display for NetState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            NetState::None => "No link",
            NetState::EthernetOk => "Ethernet",
            NetState::WifiOk => "Wi-Fi",
            NetState::WifiBad => "Wi-Fi (old radio)",
        })
    }
}

/// Latency classification of the last tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PingState {
    #[default]
    None,
    Ok,
    /// A probe came back with a non-success status
    InvalidStatus,
    Slow,
    /// A probe could not run at all
    Exception,
}

impl fmt::Display for PingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PingState::None => "Ping -",
            PingState::Ok => "Ping Ok",
            PingState::InvalidStatus => "Ping failed",
            PingState::Slow => "Ping slow",
            PingState::Exception => "Ping error",
        })
    }
}

#[derive(Debug, Clone)]
pub struct NetworkSettings {
    pub interval: Duration,
    /// Probed by name, so DNS problems show up too
    pub ping_host: String,
    /// Probed by address
    pub ping_address: String,
    pub slow_threshold_ms: u32,
    /// Only wireless adapters whose name contains this are considered
    pub wifi_name_filter: Option<String>,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(15 * 60),
            ping_host: "www.google.com".to_string(),
            ping_address: "1.1.1.1".to_string(),
            slow_threshold_ms: 250,
            wifi_name_filter: None,
        }
    }
}

/// State carried from one tick to the next.
#[derive(Debug, Default)]
pub struct NetworkState {
    pub net: NetState,
    pub ping: PingState,
    pub window: MovingWindowAverage,
}

impl NetworkState {
    pub fn is_error(&self) -> bool {
        self.ping != PingState::Ok || !self.net.is_ok()
    }

    /// Identifies the logical mode; the rolling numbers are left out.
    pub fn status_key(&self) -> String {
        format!("{}|{}", self.ping, self.net)
    }

    pub fn status_text(&self) -> String {
        match self.window.stats() {
            Some(stats) => format!("{} {stats} ms | {}", self.ping, self.net),
            None => format!("{} | {}", self.ping, self.net),
        }
    }
}

pub struct NetworkQualityMonitor {
    settings: NetworkSettings,
    inspector: Arc<dyn NetworkInterfaceInspector>,
    pinger: Arc<dyn Pinger>,
    traceroute: Arc<dyn Traceroute>,
    alerter: Arc<dyn Alerter>,
}

impl NetworkQualityMonitor {
    pub fn new(
        settings: NetworkSettings,
        inspector: Arc<dyn NetworkInterfaceInspector>,
        pinger: Arc<dyn Pinger>,
        traceroute: Arc<dyn Traceroute>,
        alerter: Arc<dyn Alerter>,
    ) -> Self {
        Self {
            settings,
            inspector,
            pinger,
            traceroute,
            alerter,
        }
    }

    /// One tick: classify the link, probe, update status, beep at most once.
    pub async fn evaluate(
        &self,
        state: &mut NetworkState,
        ctx: &ServiceContext,
    ) -> Result<(), ServiceError> {
        let mut alert = false;

        let net = self.link_state().await;
        if net == NetState::None {
            alert = true;
        }
        if net != state.net {
            ctx.log(format!("Link: {} -> {net}", state.net));
            state.net = net;
        }

        let ping = self.ping_state(state, ctx).await?;
        match ping {
            PingState::Exception | PingState::InvalidStatus => alert = true,
            PingState::Slow => {
                if state.ping == PingState::Slow {
                    alert = true;
                }
                self.capture_trace(ctx).await?;
            }
            PingState::Ok | PingState::None => {}
        }
        state.ping = ping;

        ctx.set_status_key(&state.status_key(), state.status_text(), state.is_error());
        if alert {
            self.alerter.alert();
        }
        Ok(())
    }

    async fn link_state(&self) -> NetState {
        match self.inspector.wired().await {
            Ok(wired) if wired.iter().any(|adapter| adapter.is_usable()) => {
                return NetState::EthernetOk;
            }
            Ok(_) => {}
            Err(err) => tracing::warn!("wired adapter query failed: {err:#}"),
        }

        let wireless: Vec<WirelessInterface> = match self.inspector.wireless().await {
            Ok(interfaces) => interfaces
                .into_iter()
                .filter(|interface| !interface.is_virtual)
                .filter(|interface| self.matches_filter(interface))
                .collect(),
            Err(err) => {
                tracing::warn!("wireless adapter query failed: {err:#}");
                Vec::new()
            }
        };

        match wireless.as_slice() {
            [interface] if interface.phy.is_modern() => NetState::WifiOk,
            [interface] => {
                tracing::debug!(adapter = %interface.name, phy = %interface.phy, "old radio type");
                NetState::WifiBad
            }
            others => {
                tracing::debug!(count = others.len(), "expected exactly one wireless adapter");
                NetState::None
            }
        }
    }

    fn matches_filter(&self, interface: &WirelessInterface) -> bool {
        self.settings
            .wifi_name_filter
            .as_deref()
            .map_or(true, |filter| {
                interface
                    .name
                    .to_lowercase()
                    .contains(&filter.to_lowercase())
            })
    }

    async fn ping_state(
        &self,
        state: &mut NetworkState,
        ctx: &ServiceContext,
    ) -> Result<PingState, ServiceError> {
        let token = ctx.token();
        let (by_name, by_address) = tokio::join!(
            self.pinger.probe(&self.settings.ping_host, token),
            self.pinger.probe(&self.settings.ping_address, token),
        );
        if ctx.is_cancelled() {
            return Err(ServiceError::Cancelled);
        }

        let replies = match (by_name, by_address) {
            (Ok(a), Ok(b)) => [a, b],
            (Err(err), _) | (_, Err(err)) => {
                ctx.log(format!("Ping error: {err:#}"));
                return Ok(PingState::Exception);
            }
        };

        if let Some(failed) = replies
            .iter()
            .find(|reply| reply.status != ProbeStatus::Success)
        {
            ctx.log(format!("Ping status: {:?}", failed.status));
            return Ok(PingState::InvalidStatus);
        }

        let fastest = replies
            .iter()
            .map(|reply| reply.round_trip_ms)
            .min()
            .unwrap_or_default();
        state.window.push(fastest);

        if fastest > self.settings.slow_threshold_ms {
            Ok(PingState::Slow)
        } else {
            Ok(PingState::Ok)
        }
    }

    async fn capture_trace(&self, ctx: &ServiceContext) -> Result<(), ServiceError> {
        let report = self
            .traceroute
            .trace(&self.settings.ping_host, ctx.token())
            .await;
        if ctx.is_cancelled() {
            return Err(ServiceError::Cancelled);
        }
        match report {
            Ok(report) => ctx.log(format!("Traceroute to {}:\n{report}", self.settings.ping_host)),
            Err(err) => ctx.log(format!("Traceroute failed: {err:#}")),
        }
        Ok(())
    }
}

#[async_trait]
impl Monitor for NetworkQualityMonitor {
    fn name(&self) -> &str {
        SERVICE_NAME
    }

    async fn run(&self, ctx: ServiceContext) -> Result<(), ServiceError> {
        let mut state = NetworkState::default();
        loop {
            self.evaluate(&mut state, &ctx).await?;
            ctx.delay(self.settings.interval).await?;
        }
    }
}
