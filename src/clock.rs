//! Time source shared by the service loops.

use crate::service::ServiceError;
use async_trait::async_trait;
use chrono::Timelike;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Delays and wall-clock queries.
#[async_trait]
pub trait Clock: Send + Sync {
    /// Sleep for `duration`, returning [`ServiceError::Cancelled`] as soon as
    /// `cancel` fires.
    async fn delay(&self, duration: Duration, cancel: &CancellationToken)
        -> Result<(), ServiceError>;

    /// Current local hour, 0..=23.
    fn local_hour(&self) -> u32;
}

/// Tokio timers and the local system time zone.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    async fn delay(
        &self,
        duration: Duration,
        cancel: &CancellationToken,
    ) -> Result<(), ServiceError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ServiceError::Cancelled),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }

    fn local_hour(&self) -> u32 {
        chrono::Local::now().hour()
    }
}
