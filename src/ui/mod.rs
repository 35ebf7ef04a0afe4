//! Status surface: the tray icon, its tooltip and its menu.

pub mod icons;
#[cfg(windows)]
pub mod tray;

pub use icons::IconState;
#[cfg(windows)]
pub use tray::{TrayCommand, TrayError, TrayManager};

use crate::status::StatusBoard;

/// Longest tooltip the shell displays.
pub const TOOLTIP_MAX_CHARS: usize = 127;

/// Tooltip listing every service, cut to what the shell can show.
pub fn tooltip(board: &StatusBoard) -> String {
    let text = format!("Deskwarden\n{}", board.summary());
    if text.chars().count() <= TOOLTIP_MAX_CHARS {
        return text;
    }
    let mut cut: String = text.chars().take(TOOLTIP_MAX_CHARS - 3).collect();
    cut.push_str("...");
    cut
}
