//! Service lifecycle management.
//!
//! Each watcher implements [`Monitor`] and is wrapped in a [`ServiceHandle`]
//! that gives it uniform start/stop/restart, a child cancellation scope of the
//! process-wide root token, and crash isolation: a failing or panicking body
//! flips its own status to "Error" and never takes siblings or the process
//! down with it.

use crate::clock::{Clock, SystemClock};
use crate::status::{ServiceStatus, StatusBus, StatusReporter};
use async_trait::async_trait;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Termination cause of a monitor body.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The service's cancellation scope fired. Always a clean shutdown.
    #[error("service cancelled")]
    Cancelled,

    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

/// Run a synchronous call that may wait on an OS backend. On a multi-thread
/// runtime the worker is handed off first so sibling services keep running.
pub fn blocking<R>(f: impl FnOnce() -> R) -> R {
    match Handle::try_current().map(|handle| handle.runtime_flavor()) {
        Ok(RuntimeFlavor::MultiThread) => tokio::task::block_in_place(f),
        _ => f(),
    }
}

/// A long-running watcher supervised by a [`ServiceHandle`].
#[async_trait]
pub trait Monitor: Send + Sync + 'static {
    /// Stable name used in status events and for lookups.
    fn name(&self) -> &str;

    /// Run until cancelled or failed. Returning `Ok(())` means the watcher
    /// finished on its own.
    async fn run(&self, ctx: ServiceContext) -> Result<(), ServiceError>;
}

/// Everything a running monitor body gets from its supervisor.
#[derive(Clone)]
pub struct ServiceContext {
    token: CancellationToken,
    status: StatusReporter,
    clock: Arc<dyn Clock>,
}

impl ServiceContext {
    pub fn new(token: CancellationToken, status: StatusReporter, clock: Arc<dyn Clock>) -> Self {
        Self {
            token,
            status,
            clock,
        }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves when this service is cancelled.
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    pub fn status(&self) -> &StatusReporter {
        &self.status
    }

    /// Sleep on the service clock; `Err(Cancelled)` once the scope is cancelled.
    pub async fn delay(&self, duration: Duration) -> Result<(), ServiceError> {
        self.clock.delay(duration, &self.token).await
    }

    pub fn set_status(&self, text: impl Into<String>, is_error: bool) {
        self.status.set_status(text, is_error);
    }

    pub fn set_status_key(&self, key: &str, display: impl Into<String>, is_error: bool) {
        self.status.set_status_key(key, display, is_error);
    }

    pub fn log(&self, message: impl Into<String>) {
        self.status.log(message);
    }
}

struct Running {
    token: CancellationToken,
    task: JoinHandle<()>,
}

/// Lifecycle wrapper around one [`Monitor`].
pub struct ServiceHandle {
    monitor: Arc<dyn Monitor>,
    status: StatusReporter,
    clock: Arc<dyn Clock>,
    root: Mutex<Option<CancellationToken>>,
    // Serializes start/stop/restart so at most one body runs per handle.
    running: tokio::sync::Mutex<Option<Running>>,
}

impl ServiceHandle {
    pub fn new(monitor: Arc<dyn Monitor>, bus: &StatusBus, clock: Arc<dyn Clock>) -> Self {
        let status = bus.reporter(monitor.name());
        Self {
            monitor,
            status,
            clock,
            root: Mutex::new(None),
            running: tokio::sync::Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        self.monitor.name()
    }

    pub fn status(&self) -> ServiceStatus {
        self.status.status()
    }

    /// True while a body task is alive.
    pub async fn is_running(&self) -> bool {
        self.running
            .lock()
            .await
            .as_ref()
            .is_some_and(|running| !running.task.is_finished())
    }

    /// Start the monitor under a child scope of `root`. No-op if already running.
    pub async fn start(&self, root: &CancellationToken) {
        let mut running = self.running.lock().await;
        if running
            .as_ref()
            .is_some_and(|current| !current.task.is_finished())
        {
            tracing::debug!(service = %self.name(), "start ignored, already running");
            return;
        }

        *self.root.lock().unwrap_or_else(PoisonError::into_inner) = Some(root.clone());
        *running = Some(self.spawn(root.child_token()));
    }

    /// Cancel the body and wait for it to finish. No-op if not running.
    pub async fn stop(&self) {
        let mut running = self.running.lock().await;
        let Some(current) = running.take() else {
            return;
        };

        self.status.set_status("Stopping", false);
        current.token.cancel();
        if let Err(err) = current.task.await {
            tracing::error!(service = %self.name(), "supervisor task failed: {err}");
        }
        self.status.set_status("Stopped", false);
    }

    /// Stop, then start again under the root token recorded by the first start.
    pub async fn restart(&self) {
        let root = self
            .root
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let Some(root) = root else {
            self.status.log("Restart ignored, service was never started");
            return;
        };

        self.stop().await;
        self.start(&root).await;
    }

    fn spawn(&self, token: CancellationToken) -> Running {
        self.status.set_status("Starting", false);

        let ctx = ServiceContext::new(token.clone(), self.status.clone(), Arc::clone(&self.clock));
        let monitor = Arc::clone(&self.monitor);
        let body = tokio::spawn(async move { monitor.run(ctx).await });

        let status = self.status.clone();
        let task = tokio::spawn(async move {
            match body.await {
                Ok(Ok(())) => status.set_status("Stopped", false),
                Ok(Err(ServiceError::Cancelled)) => {}
                Ok(Err(ServiceError::Failed(err))) => {
                    tracing::error!(service = %status.service(), "service failed: {err:?}");
                    status.log(format!("{err:?}"));
                    status.set_status("Error", true);
                }
                Err(join_err) if join_err.is_panic() => {
                    tracing::error!(service = %status.service(), "service panicked: {join_err}");
                    status.log(format!("panic: {join_err}"));
                    status.set_status("Error", true);
                }
                Err(_) => {}
            }
        });

        Running { token, task }
    }
}

impl std::fmt::Debug for ServiceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceHandle")
            .field("name", &self.name())
            .field("status", &self.status())
            .finish()
    }
}

/// Owner of the root cancellation token and every registered service.
pub struct ServiceSupervisor {
    root: CancellationToken,
    bus: StatusBus,
    clock: Arc<dyn Clock>,
    services: Vec<Arc<ServiceHandle>>,
}

impl ServiceSupervisor {
    pub fn new(bus: StatusBus) -> Self {
        Self::with_clock(bus, Arc::new(SystemClock))
    }

    pub fn with_clock(bus: StatusBus, clock: Arc<dyn Clock>) -> Self {
        Self {
            root: CancellationToken::new(),
            bus,
            clock,
            services: Vec::new(),
        }
    }

    pub fn bus(&self) -> &StatusBus {
        &self.bus
    }

    pub fn root(&self) -> &CancellationToken {
        &self.root
    }

    pub fn register(&mut self, monitor: Arc<dyn Monitor>) -> Arc<ServiceHandle> {
        let handle = Arc::new(ServiceHandle::new(monitor, &self.bus, Arc::clone(&self.clock)));
        self.services.push(Arc::clone(&handle));
        handle
    }

    pub fn services(&self) -> &[Arc<ServiceHandle>] {
        &self.services
    }

    pub fn service(&self, name: &str) -> Option<Arc<ServiceHandle>> {
        self.services
            .iter()
            .find(|handle| handle.name() == name)
            .cloned()
    }

    pub async fn start_all(&self) {
        for handle in &self.services {
            handle.start(&self.root).await;
        }
    }

    /// Restart the named service. Returns false if no such service exists.
    pub async fn restart(&self, name: &str) -> bool {
        match self.service(name) {
            Some(handle) => {
                handle.restart().await;
                true
            }
            None => false,
        }
    }

    /// Stop the named service. Returns false if no such service exists.
    pub async fn stop(&self, name: &str) -> bool {
        match self.service(name) {
            Some(handle) => {
                handle.stop().await;
                true
            }
            None => false,
        }
    }

    /// Cancel the root scope and wait for every service to wind down.
    pub async fn shutdown(&self) {
        self.root.cancel();
        for handle in &self.services {
            handle.stop().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::StatusEvent;
    use anyhow::anyhow;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc::UnboundedReceiver;

    /// Loops on a delay until cancelled; counts how many times it started.
    struct Ticker {
        name: String,
        starts: AtomicUsize,
    }

    impl Ticker {
        fn new(name: &str) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                starts: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Monitor for Ticker {
        fn name(&self) -> &str {
            &self.name
        }

        async fn run(&self, ctx: ServiceContext) -> Result<(), ServiceError> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            ctx.set_status("Running", false);
            loop {
                ctx.delay(Duration::from_secs(10)).await?;
            }
        }
    }

    struct Failing;

    #[async_trait]
    impl Monitor for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        async fn run(&self, ctx: ServiceContext) -> Result<(), ServiceError> {
            ctx.delay(Duration::from_secs(1)).await?;
            Err(anyhow!("adapter exploded").into())
        }
    }

    struct Panicking;

    #[async_trait]
    impl Monitor for Panicking {
        fn name(&self) -> &str {
            "panicking"
        }

        async fn run(&self, _ctx: ServiceContext) -> Result<(), ServiceError> {
            panic!("bug in monitor body");
        }
    }

    struct OneShot;

    #[async_trait]
    impl Monitor for OneShot {
        fn name(&self) -> &str {
            "oneshot"
        }

        async fn run(&self, ctx: ServiceContext) -> Result<(), ServiceError> {
            ctx.log("did the thing");
            Ok(())
        }
    }

    fn statuses(events: &mut UnboundedReceiver<StatusEvent>, service: &str) -> Vec<(String, bool)> {
        let mut out = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let StatusEvent::StatusChanged {
                service: name,
                status,
                is_error,
                ..
            } = event
            {
                if name == service {
                    out.push((status, is_error));
                }
            }
        }
        out
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_before_start_is_noop() {
        let bus = StatusBus::new();
        let mut events = bus.subscribe();
        let handle = ServiceHandle::new(Ticker::new("ticker"), &bus, Arc::new(SystemClock));

        handle.stop().await;

        assert!(statuses(&mut events, "ticker").is_empty());
        assert!(!handle.is_running().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_cycles_without_error() {
        let bus = StatusBus::new();
        let mut events = bus.subscribe();
        let ticker = Ticker::new("ticker");
        let handle = ServiceHandle::new(ticker.clone(), &bus, Arc::new(SystemClock));
        let root = CancellationToken::new();

        handle.start(&root).await;
        settle().await;
        handle.restart().await;
        settle().await;

        let seen = statuses(&mut events, "ticker");
        let texts: Vec<&str> = seen.iter().map(|(text, _)| text.as_str()).collect();
        assert_eq!(
            texts,
            vec!["Starting", "Running", "Stopping", "Stopped", "Starting", "Running"]
        );
        assert!(seen.iter().all(|(_, is_error)| !is_error));
        assert_eq!(ticker.starts.load(Ordering::SeqCst), 2);
        assert!(handle.is_running().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_double_start_keeps_single_task() {
        let bus = StatusBus::new();
        let ticker = Ticker::new("ticker");
        let handle = ServiceHandle::new(ticker.clone(), &bus, Arc::new(SystemClock));
        let root = CancellationToken::new();

        handle.start(&root).await;
        handle.start(&root).await;
        settle().await;

        assert_eq!(ticker.starts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_is_contained() {
        let bus = StatusBus::new();
        let mut events = bus.subscribe();
        let mut supervisor = ServiceSupervisor::new(bus);
        let ticker = Ticker::new("ticker");
        supervisor.register(ticker.clone());
        let failing = supervisor.register(Arc::new(Failing));

        supervisor.start_all().await;
        tokio::time::sleep(Duration::from_secs(5)).await;
        settle().await;

        assert_eq!(
            failing.status(),
            ServiceStatus {
                text: "Error".to_string(),
                is_error: true
            }
        );
        assert!(!failing.is_running().await);

        let ticker_handle = supervisor.service("ticker").expect("ticker registered");
        assert_eq!(ticker_handle.status().text, "Running");
        assert!(ticker_handle.is_running().await);

        let mut logged_failure = false;
        while let Ok(event) = events.try_recv() {
            if let StatusEvent::Log { service, message, .. } = event {
                if service == "failing" && message.contains("adapter exploded") {
                    logged_failure = true;
                }
            }
        }
        assert!(logged_failure);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panic_becomes_error_status() {
        let bus = StatusBus::new();
        let handle = ServiceHandle::new(Arc::new(Panicking), &bus, Arc::new(SystemClock));

        handle.start(&CancellationToken::new()).await;
        settle().await;

        assert!(handle.status().is_error);
    }

    #[tokio::test(start_paused = true)]
    async fn test_graceful_completion_reports_stopped() {
        let bus = StatusBus::new();
        let handle = ServiceHandle::new(Arc::new(OneShot), &bus, Arc::new(SystemClock));

        handle.start(&CancellationToken::new()).await;
        settle().await;

        assert_eq!(handle.status().text, "Stopped");
        assert!(!handle.status().is_error);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_service_recovers_on_restart() {
        let bus = StatusBus::new();
        let mut supervisor = ServiceSupervisor::new(bus);
        let failing = supervisor.register(Arc::new(Failing));

        supervisor.start_all().await;
        tokio::time::sleep(Duration::from_secs(2)).await;
        settle().await;
        assert!(failing.status().is_error);

        assert!(supervisor.restart("failing").await);
        settle().await;
        assert_eq!(failing.status().text, "Starting");
        assert!(!supervisor.restart("missing").await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_root_cancellation_is_permanent() {
        let bus = StatusBus::new();
        let mut supervisor = ServiceSupervisor::new(bus.clone());
        let ticker = Ticker::new("ticker");
        let handle = supervisor.register(ticker.clone());

        supervisor.start_all().await;
        settle().await;
        supervisor.shutdown().await;
        assert!(!handle.is_running().await);

        let mut events = bus.subscribe();
        handle.restart().await;
        settle().await;

        assert!(!handle.is_running().await);
        assert!(statuses(&mut events, "ticker")
            .iter()
            .all(|(_, is_error)| !is_error));
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_without_start_is_ignored() {
        let bus = StatusBus::new();
        let ticker = Ticker::new("ticker");
        let handle = ServiceHandle::new(ticker.clone(), &bus, Arc::new(SystemClock));

        handle.restart().await;
        settle().await;

        assert_eq!(ticker.starts.load(Ordering::SeqCst), 0);
        assert_eq!(handle.status().text, "Not started");
    }

    #[test]
    fn test_blocking_runs_outside_a_runtime() {
        assert_eq!(blocking(|| 7), 7);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_blocking_on_multi_thread_runtime() {
        let task = tokio::spawn(async { blocking(|| std::thread::current().id()) });
        assert!(task.await.is_ok());
    }
}
