//! Application configuration.
//!
//! Read once at startup from `DESKWARDEN_CONFIG` or
//! `<config dir>/deskwarden/config.json`. Every field has a default, so a
//! missing file or a partial one is fine; values are validated before any
//! service starts.

use crate::audio::classify::ClassifierRules;
use crate::audio::policy::{PolicyError, PolicyKind, PolicyTable, VolumePolicy};
use crate::memory::MemorySettings;
use crate::mic::{Key, KeyCombo};
use crate::net::monitor::NetworkSettings;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_ENV: &str = "DESKWARDEN_CONFIG";
pub const APP_DIR: &str = "deskwarden";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub logging: LoggingConfig,
    pub audio: AudioConfig,
    pub network: NetworkConfig,
    pub memory: MemoryConfig,
    pub mic: MicConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is not set
    pub level: String,
    /// Write to a log file under the local data directory
    pub to_file: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            to_file: true,
        }
    }
}

/// Initial volume and allowed range of one policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyValues {
    pub initial: u8,
    pub min: u8,
    pub max: u8,
}

impl PolicyValues {
    const fn new(initial: u8, min: u8, max: u8) -> Self {
        Self { initial, min, max }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub system: PolicyValues,
    pub teams_call: PolicyValues,
    pub teams_notification: PolicyValues,
    pub browser: PolicyValues,
    pub media: PolicyValues,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            system: PolicyValues::new(30, 10, 40),
            teams_call: PolicyValues::new(80, 60, 100),
            teams_notification: PolicyValues::new(40, 20, 60),
            browser: PolicyValues::new(50, 30, 70),
            media: PolicyValues::new(25, 10, 40),
        }
    }
}

impl PolicyConfig {
    fn values(&self, kind: PolicyKind) -> PolicyValues {
        match kind {
            PolicyKind::System => self.system,
            PolicyKind::TeamsCall => self.teams_call,
            PolicyKind::TeamsNotification => self.teams_notification,
            PolicyKind::Browser => self.browser,
            PolicyKind::Media => self.media,
        }
    }

    pub fn table(&self) -> Result<PolicyTable, PolicyError> {
        let policies = PolicyKind::ALL
            .iter()
            .map(|&kind| {
                let values = self.values(kind);
                VolumePolicy::new(kind, values.initial, values.min, values.max)
            })
            .collect::<Result<Vec<_>, _>>()?;
        PolicyTable::new(policies)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub check_interval_secs: u64,
    pub policies: PolicyConfig,
    pub classifier: ClassifierRules,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: 10,
            policies: PolicyConfig::default(),
            classifier: ClassifierRules::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub interval_secs: u64,
    pub ping_host: String,
    pub ping_address: String,
    pub slow_threshold_ms: u32,
    pub ping_timeout_secs: u64,
    pub wifi_name_filter: Option<String>,
    pub traceroute_max_hops: u32,
    pub traceroute_timeout_secs: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        let defaults = NetworkSettings::default();
        Self {
            interval_secs: defaults.interval.as_secs(),
            ping_host: defaults.ping_host,
            ping_address: defaults.ping_address,
            slow_threshold_ms: defaults.slow_threshold_ms,
            ping_timeout_secs: 4,
            wifi_name_filter: defaults.wifi_name_filter,
            traceroute_max_hops: 30,
            traceroute_timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    pub interval_secs: u64,
    /// Private bytes ceiling outside the workday, in MiB
    pub ceiling_mb: u64,
    pub workday_start_hour: u32,
    pub workday_end_hour: u32,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        let defaults = MemorySettings::default();
        Self {
            interval_secs: defaults.interval.as_secs(),
            ceiling_mb: defaults.ceiling_bytes / (1024 * 1024),
            workday_start_hour: *defaults.workday_hours.start(),
            workday_end_hour: *defaults.workday_hours.end(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MicConfig {
    pub hotkey: KeyCombo,
    pub refresh_interval_secs: u64,
}

impl Default for MicConfig {
    fn default() -> Self {
        Self {
            hotkey: KeyCombo {
                ctrl: true,
                alt: true,
                shift: false,
                win: false,
                key: Key::Char('M'),
            },
            refresh_interval_secs: 5,
        }
    }
}

impl AppConfig {
    /// Location of the configuration file.
    pub fn path() -> Option<PathBuf> {
        match env::var_os(CONFIG_ENV) {
            Some(path) if !path.is_empty() => Some(PathBuf::from(path)),
            _ => dirs::config_dir().map(|dir| dir.join(APP_DIR).join("config.json")),
        }
    }

    /// Load and validate; defaults when there is no file.
    pub fn load() -> Result<Self> {
        match Self::path() {
            Some(path) => Self::load_from(&path),
            None => {
                let config = Self::default();
                config.validate()?;
                Ok(config)
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let config = if path.exists() {
            let text = fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            serde_json::from_str(&text)
                .with_context(|| format!("failed to parse {}", path.display()))?
        } else {
            Self::default()
        };
        config
            .validate()
            .with_context(|| format!("invalid configuration in {}", path.display()))?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        tracing_subscriber::EnvFilter::try_new(&self.logging.level)
            .with_context(|| format!("logging.level '{}' is not a valid filter", self.logging.level))?;

        for (name, secs) in [
            ("audio.check_interval_secs", self.audio.check_interval_secs),
            ("network.interval_secs", self.network.interval_secs),
            ("network.ping_timeout_secs", self.network.ping_timeout_secs),
            ("network.traceroute_timeout_secs", self.network.traceroute_timeout_secs),
            ("memory.interval_secs", self.memory.interval_secs),
            ("mic.refresh_interval_secs", self.mic.refresh_interval_secs),
        ] {
            if secs == 0 {
                bail!("{name} must be at least 1 second");
            }
        }

        self.audio.policies.table()?;
        let empty = self.audio.classifier.empty_markers();
        if !empty.is_empty() {
            bail!("audio.classifier markers must not be empty: {}", empty.join(", "));
        }

        let network = &self.network;
        if network.ping_host.trim().is_empty() || network.ping_address.trim().is_empty() {
            bail!("network.ping_host and network.ping_address must be set");
        }
        if network.slow_threshold_ms == 0 {
            bail!("network.slow_threshold_ms must be positive");
        }
        if !(1..=64).contains(&network.traceroute_max_hops) {
            bail!(
                "network.traceroute_max_hops must be between 1 and 64, got {}",
                network.traceroute_max_hops
            );
        }

        let memory = &self.memory;
        if memory.ceiling_mb == 0 {
            bail!("memory.ceiling_mb must be positive");
        }
        if memory.workday_end_hour > 23 || memory.workday_start_hour > memory.workday_end_hour {
            bail!(
                "memory workday hours must satisfy start <= end <= 23, got {}..={}",
                memory.workday_start_hour,
                memory.workday_end_hour
            );
        }

        Ok(())
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.audio.check_interval_secs)
    }

    pub fn mic_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.mic.refresh_interval_secs)
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_secs(self.network.ping_timeout_secs)
    }

    pub fn traceroute_timeout(&self) -> Duration {
        Duration::from_secs(self.network.traceroute_timeout_secs)
    }

    pub fn network_settings(&self) -> NetworkSettings {
        NetworkSettings {
            interval: Duration::from_secs(self.network.interval_secs),
            ping_host: self.network.ping_host.clone(),
            ping_address: self.network.ping_address.clone(),
            slow_threshold_ms: self.network.slow_threshold_ms,
            wifi_name_filter: self
                .network
                .wifi_name_filter
                .clone()
                .filter(|filter| !filter.trim().is_empty()),
        }
    }

    pub fn memory_settings(&self) -> MemorySettings {
        MemorySettings {
            interval: Duration::from_secs(self.memory.interval_secs),
            ceiling_bytes: self.memory.ceiling_mb * 1024 * 1024,
            workday_hours: self.memory.workday_start_hour..=self.memory.workday_end_hour,
        }
    }
}
