//! Deskwarden - Library
//!
//! A tray daemon that keeps a Windows workstation in shape while you work.
//!
//! ## Services
//!
//! - **Audio**: holds the system, Teams, browser and media sessions to their
//!   volume ranges and beeps when a tracked session drifts out of range
//! - **Network**: watches the link type and ping quality, tracerouting when
//!   the connection stays slow
//! - **Memory**: beeps when the daemon's own private bytes pass a ceiling
//!   that tightens during working hours
//! - **Mic**: a global hotkey that mutes and unmutes the meeting microphone
//!
//! Each service runs under [`service::ServiceSupervisor`] and reports through
//! the [`status::StatusBus`]; the tray shows the aggregate.

pub mod alert;
pub mod audio;
pub mod clock;
pub mod config;
pub mod logging;
pub mod memory;
pub mod mic;
pub mod net;
pub mod platform;
pub mod process;
pub mod service;
pub mod status;
pub mod ui;

#[cfg(test)]
mod testing;

pub use audio::{AudioError, AudioSessionProvider, VolumePolicyEngine};
pub use config::AppConfig;
pub use service::{Monitor, ServiceContext, ServiceError, ServiceSupervisor};
pub use status::{StatusBoard, StatusBus, StatusEvent};
