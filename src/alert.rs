//! Audible alerts.

use std::io::Write;

/// Something that can get the user's attention.
pub trait Alerter: Send + Sync {
    fn alert(&self);
}

/// Terminal bell on stderr. Used where no platform beep is available.
#[derive(Debug, Clone, Copy, Default)]
pub struct TerminalBell;

impl Alerter for TerminalBell {
    fn alert(&self) {
        let mut stderr = std::io::stderr();
        let _ = stderr.write_all(b"\x07");
        let _ = stderr.flush();
    }
}
