//! System tray icon management.
//!
//! Shows the aggregate service status as the icon and tooltip, and offers a
//! menu to toggle the mic, restart or stop each service, and exit.

use super::icons::{self, IconState, ICON_SIZE};
use std::collections::HashMap;
use thiserror::Error;
use tray_icon::{
    menu::{Menu, MenuEvent, MenuId, MenuItem, PredefinedMenuItem, Submenu},
    Icon, TrayIcon, TrayIconBuilder,
};

/// Commands chosen from the tray menu.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrayCommand {
    ToggleMic,
    Restart(String),
    Stop(String),
    Exit,
}

/// Tray service error types.
#[derive(Debug, Error)]
pub enum TrayError {
    #[error("Failed to create tray icon: {0}")]
    CreateFailed(String),

    #[error("Failed to load icon resource")]
    IconLoadFailed,

    #[error("Tray icon not initialized")]
    NotInitialized,

    #[error("Failed to create menu: {0}")]
    MenuFailed(String),
}

fn menu_err(err: tray_icon::menu::Error) -> TrayError {
    TrayError::MenuFailed(err.to_string())
}

/// System tray manager.
#[derive(Default)]
pub struct TrayManager {
    tray_icon: Option<TrayIcon>,
    commands: HashMap<MenuId, TrayCommand>,
    icon_state: Option<IconState>,
}

impl TrayManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create and show the tray icon with one submenu per service.
    pub fn create(&mut self, services: &[String], tooltip: &str) -> Result<(), TrayError> {
        let state = IconState {
            has_error: false,
            muted: false,
        };
        let menu = Menu::new();

        let toggle = MenuItem::new("Toggle microphone", true, None);
        self.commands
            .insert(toggle.id().clone(), TrayCommand::ToggleMic);
        menu.append(&toggle).map_err(menu_err)?;
        menu.append(&PredefinedMenuItem::separator())
            .map_err(menu_err)?;

        for service in services {
            let submenu = Submenu::new(service, true);
            let restart = MenuItem::new("Restart", true, None);
            let stop = MenuItem::new("Stop", true, None);
            self.commands
                .insert(restart.id().clone(), TrayCommand::Restart(service.clone()));
            self.commands
                .insert(stop.id().clone(), TrayCommand::Stop(service.clone()));
            submenu.append(&restart).map_err(menu_err)?;
            submenu.append(&stop).map_err(menu_err)?;
            menu.append(&submenu).map_err(menu_err)?;
        }

        menu.append(&PredefinedMenuItem::separator())
            .map_err(menu_err)?;
        let exit = MenuItem::new("Exit", true, None);
        self.commands.insert(exit.id().clone(), TrayCommand::Exit);
        menu.append(&exit).map_err(menu_err)?;

        let tray_icon = TrayIconBuilder::new()
            .with_icon(create_icon(state)?)
            .with_tooltip(tooltip)
            .with_menu(Box::new(menu))
            .build()
            .map_err(|e| TrayError::CreateFailed(e.to_string()))?;

        self.tray_icon = Some(tray_icon);
        self.icon_state = Some(state);
        Ok(())
    }

    /// Next menu command, if one was chosen. Call this from the event loop.
    pub fn poll_command(&self) -> Option<TrayCommand> {
        let event = MenuEvent::receiver().try_recv().ok()?;
        self.commands.get(&event.id).cloned()
    }

    /// Redraw the icon if its state changed.
    pub fn set_state(&mut self, state: IconState) -> Result<(), TrayError> {
        if self.icon_state == Some(state) {
            return Ok(());
        }
        let icon = create_icon(state)?;
        let tray = self.tray_icon.as_mut().ok_or(TrayError::NotInitialized)?;
        tray.set_icon(Some(icon))
            .map_err(|e| TrayError::CreateFailed(e.to_string()))?;
        self.icon_state = Some(state);
        Ok(())
    }

    pub fn set_tooltip(&mut self, text: &str) -> Result<(), TrayError> {
        let tray = self.tray_icon.as_mut().ok_or(TrayError::NotInitialized)?;
        tray.set_tooltip(Some(text))
            .map_err(|e| TrayError::CreateFailed(e.to_string()))?;
        Ok(())
    }

    /// Destroy the tray icon.
    pub fn destroy(&mut self) {
        self.tray_icon = None;
        self.icon_state = None;
    }
}

fn create_icon(state: IconState) -> Result<Icon, TrayError> {
    Icon::from_rgba(icons::render(state), ICON_SIZE, ICON_SIZE)
        .map_err(|_| TrayError::IconLoadFailed)
}
