//! Probes backed by the OS `ping` and `tracert`/`traceroute` tools, plus
//! parsers for their output and for `netsh wlan show interfaces`.

use super::probe::{PhyType, Pinger, ProbeReply, ProbeStatus, Traceroute, WirelessInterface};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Run a console tool to completion, killing it on cancellation or timeout.
pub async fn run_tool(
    program: &str,
    args: &[String],
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<Output> {
    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(windows)]
    command.creation_flags(CREATE_NO_WINDOW);

    let child = command
        .spawn()
        .with_context(|| format!("failed to spawn {program}"))?;

    tokio::select! {
        biased;
        _ = cancel.cancelled() => bail!("{program} cancelled"),
        output = tokio::time::timeout(timeout, child.wait_with_output()) => match output {
            Ok(output) => output.with_context(|| format!("failed to read {program} output")),
            Err(_) => bail!("{program} did not finish within {}s", timeout.as_secs()),
        },
    }
}

/// Extract the round-trip time from ping output.
///
/// Reads both the Windows form (`time=12ms`, `time<1ms`) and the Unix form
/// (`time=12.3 ms`). Sub-millisecond replies read as 0.
pub fn parse_ping_reply(text: &str) -> ProbeReply {
    for line in text.lines() {
        let lower = line.to_ascii_lowercase();
        if let Some(rest) = lower.split_once("time<").map(|(_, rest)| rest) {
            if leading_number(rest).is_some() {
                return ProbeReply::success(0);
            }
        }
        if let Some(rest) = lower.split_once("time=").map(|(_, rest)| rest) {
            if let Some(ms) = leading_number(rest) {
                return ProbeReply::success(ms.round() as u32);
            }
        }
    }

    let lower = text.to_ascii_lowercase();
    let status = if lower.contains("unreachable") {
        ProbeStatus::Unreachable
    } else if lower.contains("timed out") || lower.contains("100% packet loss") || lower.contains("100% loss") {
        ProbeStatus::TimedOut
    } else {
        let last = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .last()
            .unwrap_or("no reply");
        ProbeStatus::Other(last.to_string())
    };

    ProbeReply {
        status,
        round_trip_ms: 0,
    }
}

fn leading_number(text: &str) -> Option<f64> {
    let end = text
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(text.len());
    text[..end].parse().ok()
}

/// Parse the per-interface blocks of `netsh wlan show interfaces`.
pub fn parse_netsh_interfaces(text: &str) -> Vec<WirelessInterface> {
    let mut interfaces: Vec<WirelessInterface> = Vec::new();

    for line in text.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let (key, value) = (key.trim(), value.trim());

        if key.eq_ignore_ascii_case("name") {
            interfaces.push(WirelessInterface {
                name: value.to_string(),
                description: String::new(),
                phy: PhyType::Unknown(String::new()),
                is_virtual: false,
            });
            continue;
        }

        let Some(current) = interfaces.last_mut() else {
            continue;
        };
        if key.eq_ignore_ascii_case("description") {
            let lower = value.to_ascii_lowercase();
            current.is_virtual = lower.contains("virtual") || lower.contains("hosted network");
            current.description = value.to_string();
        } else if key.eq_ignore_ascii_case("radio type") {
            current.phy = PhyType::from_radio_type(value);
        }
    }

    interfaces
}

/// `ping` with a single echo request.
#[derive(Debug, Clone)]
pub struct SystemPinger {
    timeout: Duration,
}

impl SystemPinger {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn args(&self, target: &str) -> Vec<String> {
        if cfg!(windows) {
            vec![
                "-n".to_string(),
                "1".to_string(),
                "-w".to_string(),
                self.timeout.as_millis().to_string(),
                target.to_string(),
            ]
        } else {
            vec![
                "-c".to_string(),
                "1".to_string(),
                "-W".to_string(),
                self.timeout.as_secs().max(1).to_string(),
                target.to_string(),
            ]
        }
    }
}

#[async_trait]
impl Pinger for SystemPinger {
    async fn probe(&self, target: &str, cancel: &CancellationToken) -> Result<ProbeReply> {
        // Generous outer limit; ping enforces the reply timeout itself.
        let limit = self.timeout + Duration::from_secs(5);
        let output = run_tool("ping", &self.args(target), limit, cancel).await?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        let reply = parse_ping_reply(&stdout);
        tracing::debug!(target, ?reply, "ping finished");
        Ok(reply)
    }
}

/// `tracert` on Windows, `traceroute` elsewhere.
#[derive(Debug, Clone)]
pub struct SystemTraceroute {
    max_hops: u32,
    timeout: Duration,
}

impl SystemTraceroute {
    pub fn new(max_hops: u32, timeout: Duration) -> Self {
        Self { max_hops, timeout }
    }
}

#[async_trait]
impl Traceroute for SystemTraceroute {
    async fn trace(&self, host: &str, cancel: &CancellationToken) -> Result<String> {
        let hops = self.max_hops.to_string();
        let (program, args) = if cfg!(windows) {
            ("tracert", vec!["-d".to_string(), "-h".to_string(), hops, host.to_string()])
        } else {
            ("traceroute", vec!["-n".to_string(), "-m".to_string(), hops, host.to_string()])
        };

        let output = run_tool(program, &args, self.timeout, cancel).await?;
        let report = String::from_utf8_lossy(&output.stdout);
        let report: Vec<&str> = report
            .lines()
            .map(str::trim_end)
            .filter(|line| !line.trim().is_empty())
            .collect();
        if report.is_empty() {
            bail!("{program} produced no output (status {})", output.status);
        }
        Ok(report.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_windows_ping_reply() {
        let output = "\r\nPinging 1.1.1.1 with 32 bytes of data:\r\n\
                      Reply from 1.1.1.1: bytes=32 time=14ms TTL=57\r\n\r\n\
                      Ping statistics for 1.1.1.1:\r\n";
        assert_eq!(parse_ping_reply(output), ProbeReply::success(14));
    }

    #[test]
    fn test_sub_millisecond_reply() {
        let output = "Reply from 192.168.1.1: bytes=32 time<1ms TTL=64";
        assert_eq!(parse_ping_reply(output), ProbeReply::success(0));
    }

    #[test]
    fn test_unix_ping_reply() {
        let output = "PING 1.1.1.1 (1.1.1.1) 56(84) bytes of data.\n\
                      64 bytes from 1.1.1.1: icmp_seq=1 ttl=57 time=12.6 ms\n";
        assert_eq!(parse_ping_reply(output), ProbeReply::success(13));
    }

    #[test]
    fn test_failed_ping_statuses() {
        assert_eq!(
            parse_ping_reply("Request timed out.\r\n").status,
            ProbeStatus::TimedOut
        );
        assert_eq!(
            parse_ping_reply("Reply from 10.0.0.1: Destination host unreachable.").status,
            ProbeStatus::Unreachable
        );
        assert_eq!(
            parse_ping_reply("General failure.\r\n").status,
            ProbeStatus::Other("General failure.".to_string())
        );
    }

    #[test]
    fn test_netsh_interfaces() {
        let output = "\r\n\
            There are 2 interfaces on the system:\r\n\r\n\
            \x20   Name                   : Wi-Fi\r\n\
            \x20   Description            : Intel(R) Wi-Fi 6 AX201 160MHz\r\n\
            \x20   Physical address       : 3c:58:c2:aa:bb:cc\r\n\
            \x20   State                  : connected\r\n\
            \x20   Radio type             : 802.11ax\r\n\r\n\
            \x20   Name                   : Local Area Connection* 2\r\n\
            \x20   Description            : Microsoft Wi-Fi Direct Virtual Adapter\r\n\
            \x20   State                  : disconnected\r\n";

        let interfaces = parse_netsh_interfaces(output);

        assert_eq!(interfaces.len(), 2);
        assert_eq!(interfaces[0].name, "Wi-Fi");
        assert_eq!(interfaces[0].phy, PhyType::Ax);
        assert!(!interfaces[0].is_virtual);
        assert!(interfaces[1].is_virtual);
        assert_eq!(interfaces[1].phy, PhyType::Unknown(String::new()));
    }

    #[test]
    fn test_netsh_without_interfaces() {
        assert!(parse_netsh_interfaces("There is no wireless interface on the system.").is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cancel_kills_long_running_tool() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let result = run_tool("sleep", &["30".to_string()], Duration::from_secs(60), &cancel).await;

        let err = result.expect_err("cancelled tool must not succeed");
        assert!(err.to_string().contains("cancelled"));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_kills_long_running_tool() {
        let started = std::time::Instant::now();
        let result = run_tool(
            "sleep",
            &["30".to_string()],
            Duration::from_millis(200),
            &CancellationToken::new(),
        )
        .await;

        assert!(result.is_err());
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
