//! Status publishing.
//!
//! Every service reports a textual status, an error flag and free-form log
//! lines through a [`StatusReporter`]. Reporters publish onto a shared
//! [`StatusBus`]; listeners (the tray board, the log sink, tests) subscribe
//! before services start and receive events in the order each service
//! changed state.

use chrono::{DateTime, Local};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

/// Events published on the status bus.
#[derive(Debug, Clone)]
pub enum StatusEvent {
    /// A service changed (or refreshed) its status.
    StatusChanged {
        service: String,
        status: String,
        is_error: bool,
        /// Error flag before this change; `is_error && !was_already_error`
        /// marks a new error transition.
        was_already_error: bool,
    },

    /// A timestamped log line from a service.
    Log {
        service: String,
        at: DateTime<Local>,
        message: String,
    },
}

impl StatusEvent {
    /// Name of the service that emitted this event.
    pub fn service(&self) -> &str {
        match self {
            StatusEvent::StatusChanged { service, .. } | StatusEvent::Log { service, .. } => service,
        }
    }
}

/// Fan-out publisher for status events.
#[derive(Clone, Default)]
pub struct StatusBus {
    subscribers: Arc<Mutex<Vec<UnboundedSender<StatusEvent>>>>,
}

impl StatusBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a new listener. Events published before this call are not replayed.
    pub fn subscribe(&self) -> UnboundedReceiver<StatusEvent> {
        let (sender, receiver) = unbounded_channel();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(sender);
        receiver
    }

    /// Deliver an event to every live listener, dropping closed ones.
    pub fn publish(&self, event: StatusEvent) {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        subscribers.retain(|sender| sender.send(event.clone()).is_ok());
    }

    /// Create a reporter publishing on this bus under `service`.
    pub fn reporter(&self, service: &str) -> StatusReporter {
        StatusReporter::new(service, self.clone())
    }
}

impl std::fmt::Debug for StatusBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self
            .subscribers
            .lock()
            .map(|subscribers| subscribers.len())
            .unwrap_or(0);
        f.debug_struct("StatusBus").field("subscribers", &count).finish()
    }
}

/// Current status of one service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceStatus {
    pub text: String,
    pub is_error: bool,
}

impl Default for ServiceStatus {
    fn default() -> Self {
        Self {
            text: "Not started".to_string(),
            is_error: false,
        }
    }
}

#[derive(Debug, Default)]
struct ReporterState {
    status: ServiceStatus,
    last_key: Option<String>,
}

/// Per-service status handle.
///
/// Cloning is cheap; all clones share the same status. Publishing happens
/// under the status lock, so events from one service are delivered in the
/// order its state changed.
#[derive(Debug, Clone)]
pub struct StatusReporter {
    service: Arc<str>,
    bus: StatusBus,
    state: Arc<Mutex<ReporterState>>,
}

impl StatusReporter {
    pub fn new(service: &str, bus: StatusBus) -> Self {
        Self {
            service: Arc::from(service),
            bus,
            state: Arc::new(Mutex::new(ReporterState::default())),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    /// Snapshot of the current status.
    pub fn status(&self) -> ServiceStatus {
        self.lock().status.clone()
    }

    /// Update the status; a log line is written when the text changes.
    pub fn set_status(&self, text: impl Into<String>, is_error: bool) {
        let text = text.into();
        let key = text.clone();
        self.set_status_key(&key, text, is_error);
    }

    /// Update the status where `key` identifies the logical mode and
    /// `display` may carry fast-changing detail. Only key changes are logged.
    pub fn set_status_key(&self, key: &str, display: impl Into<String>, is_error: bool) {
        let display = display.into();
        let mut state = self.lock();
        let was_already_error = state.status.is_error;
        state.status = ServiceStatus {
            text: display.clone(),
            is_error,
        };

        self.bus.publish(StatusEvent::StatusChanged {
            service: self.service.to_string(),
            status: display.clone(),
            is_error,
            was_already_error,
        });

        if state.last_key.as_deref() != Some(key) {
            state.last_key = Some(key.to_string());
            self.emit_log(&display, is_error);
        }
    }

    /// Publish a free-form log line.
    pub fn log(&self, message: impl Into<String>) {
        let message = message.into();
        let _state = self.lock();
        self.emit_log(&message, false);
    }

    // Caller holds the state lock.
    fn emit_log(&self, message: &str, is_error: bool) {
        if is_error {
            tracing::warn!(service = %self.service, "{message}");
        } else {
            tracing::info!(service = %self.service, "{message}");
        }
        self.bus.publish(StatusEvent::Log {
            service: self.service.to_string(),
            at: Local::now(),
            message: message.to_string(),
        });
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ReporterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Outcome of folding one event into a [`StatusBoard`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BoardUpdate {
    /// Displayed text or error flag changed.
    pub changed: bool,
    /// A service entered the error state (it was not in error before).
    pub new_error: bool,
}

/// Aggregated view of every service's latest status, in registration order.
#[derive(Debug, Default)]
pub struct StatusBoard {
    entries: Vec<(String, ServiceStatus)>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve a row for `service` so it is listed before it reports.
    pub fn register(&mut self, service: &str) {
        if !self.entries.iter().any(|(name, _)| name == service) {
            self.entries
                .push((service.to_string(), ServiceStatus::default()));
        }
    }

    pub fn apply(&mut self, event: &StatusEvent) -> BoardUpdate {
        let StatusEvent::StatusChanged {
            service,
            status,
            is_error,
            was_already_error,
        } = event
        else {
            return BoardUpdate::default();
        };

        self.register(service);
        let Some((_, current)) = self.entries.iter_mut().find(|(name, _)| name == service) else {
            return BoardUpdate::default();
        };

        let next = ServiceStatus {
            text: status.clone(),
            is_error: *is_error,
        };
        let changed = *current != next;
        *current = next;

        BoardUpdate {
            changed,
            new_error: *is_error && !*was_already_error,
        }
    }

    pub fn status(&self, service: &str) -> Option<&ServiceStatus> {
        self.entries
            .iter()
            .find(|(name, _)| name == service)
            .map(|(_, status)| status)
    }

    pub fn has_error(&self) -> bool {
        self.entries.iter().any(|(_, status)| status.is_error)
    }

    pub fn services(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    /// One line per service, errors marked with `!`.
    pub fn summary(&self) -> String {
        self.entries
            .iter()
            .map(|(name, status)| {
                let marker = if status.is_error { "!" } else { "" };
                format!("{marker}{name}: {}", status.text)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}
