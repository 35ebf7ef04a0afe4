//! Self memory watchdog.

use crate::alert::Alerter;
use crate::service::{Monitor, ServiceContext, ServiceError};
use async_trait::async_trait;
use std::ops::RangeInclusive;
use std::sync::Arc;
use std::time::Duration;

pub const SERVICE_NAME: &str = "Memory";

const MIB: u64 = 1024 * 1024;

/// Reads this process's committed private memory.
pub trait MemoryProbe: Send + Sync {
    fn private_bytes(&self) -> anyhow::Result<u64>;
}

#[derive(Debug, Clone)]
pub struct MemorySettings {
    pub interval: Duration,
    /// Limit outside the workday
    pub ceiling_bytes: u64,
    /// Local hours during which the limit is halved
    pub workday_hours: RangeInclusive<u32>,
}

impl Default for MemorySettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            ceiling_bytes: 400 * MIB,
            workday_hours: 8..=17,
        }
    }
}

impl MemorySettings {
    pub fn limit_at(&self, hour: u32) -> u64 {
        if self.workday_hours.contains(&hour) {
            self.ceiling_bytes / 2
        } else {
            self.ceiling_bytes
        }
    }
}

pub struct MemoryWatchdog {
    settings: MemorySettings,
    probe: Arc<dyn MemoryProbe>,
    alerter: Arc<dyn Alerter>,
}

impl MemoryWatchdog {
    pub fn new(settings: MemorySettings, probe: Arc<dyn MemoryProbe>, alerter: Arc<dyn Alerter>) -> Self {
        Self {
            settings,
            probe,
            alerter,
        }
    }

    /// Read, compare, report. Returns true when usage is within the limit.
    pub fn check(&self, ctx: &ServiceContext) -> bool {
        let limit = self.settings.limit_at(ctx.clock().local_hour());
        match self.probe.private_bytes() {
            Ok(used) if used <= limit => {
                ctx.set_status_key(
                    "ok",
                    format!("{} MB (limit {} MB)", used / MIB, limit / MIB),
                    false,
                );
                true
            }
            Ok(used) => {
                ctx.set_status_key(
                    "over",
                    format!("{} MB over {} MB limit", used / MIB, limit / MIB),
                    true,
                );
                self.alerter.alert();
                false
            }
            Err(err) => {
                tracing::warn!("memory probe failed: {err:#}");
                ctx.set_status("Memory probe failed", true);
                self.alerter.alert();
                false
            }
        }
    }
}

#[async_trait]
impl Monitor for MemoryWatchdog {
    fn name(&self) -> &str {
        SERVICE_NAME
    }

    async fn run(&self, ctx: ServiceContext) -> Result<(), ServiceError> {
        loop {
            self.check(&ctx);
            ctx.delay(self.settings.interval).await?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::ServiceSupervisor;
    use crate::status::StatusBus;
    use crate::testing::{CountingAlerter, FakeMemory, FixedHourClock};
    use tokio_util::sync::CancellationToken;

    fn context(hour: u32) -> ServiceContext {
        ServiceContext::new(
            CancellationToken::new(),
            StatusBus::new().reporter(SERVICE_NAME),
            Arc::new(FixedHourClock::new(hour)),
        )
    }

    #[test]
    fn test_limit_halves_during_workday() {
        let settings = MemorySettings::default();
        assert_eq!(settings.limit_at(7), 400 * MIB);
        assert_eq!(settings.limit_at(8), 200 * MIB);
        assert_eq!(settings.limit_at(17), 200 * MIB);
        assert_eq!(settings.limit_at(18), 400 * MIB);
    }

    #[test]
    fn test_same_usage_depends_on_hour() {
        let memory = Arc::new(FakeMemory::new(300 * MIB));
        let alerter = Arc::new(CountingAlerter::default());
        let watchdog = MemoryWatchdog::new(MemorySettings::default(), memory, alerter.clone());

        let evening = context(21);
        assert!(watchdog.check(&evening));
        assert_eq!(evening.status().status().text, "300 MB (limit 400 MB)");

        let morning = context(10);
        assert!(!watchdog.check(&morning));
        assert_eq!(morning.status().status().text, "300 MB over 200 MB limit");
        assert!(morning.status().status().is_error);
        assert_eq!(alerter.count(), 1);
    }

    #[test]
    fn test_probe_failure_is_an_error() {
        let memory = Arc::new(FakeMemory::failing());
        let alerter = Arc::new(CountingAlerter::default());
        let watchdog = MemoryWatchdog::new(MemorySettings::default(), memory, alerter.clone());
        let ctx = context(12);

        assert!(!watchdog.check(&ctx));
        assert!(ctx.status().status().is_error);
        assert_eq!(alerter.count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_checks_every_interval() {
        let memory = Arc::new(FakeMemory::new(10 * MIB));
        let watchdog = Arc::new(MemoryWatchdog::new(
            MemorySettings::default(),
            memory.clone(),
            Arc::new(CountingAlerter::default()),
        ));
        let mut supervisor =
            ServiceSupervisor::with_clock(StatusBus::new(), Arc::new(FixedHourClock::new(9)));
        supervisor.register(watchdog);

        supervisor.start_all().await;
        tokio::time::sleep(Duration::from_secs(150)).await;
        supervisor.shutdown().await;

        assert_eq!(memory.reads(), 3);
    }
}
