//! Network quality monitoring.

pub mod command;
pub mod monitor;
pub mod probe;
pub mod window;

pub use command::{parse_netsh_interfaces, parse_ping_reply, SystemPinger, SystemTraceroute};
pub use monitor::{NetState, NetworkQualityMonitor, NetworkSettings, NetworkState, PingState};
pub use probe::{
    NetworkInterfaceInspector, PhyType, Pinger, ProbeReply, ProbeStatus, Traceroute,
    WiredInterface, WirelessInterface,
};
pub use window::{MovingWindowAverage, WindowStats};
