//! System-wide hotkeys via RegisterHotKey.
//!
//! Each registration gets its own thread, since WM_HOTKEY is posted to the
//! queue of the thread that registered it. Releasing a registration stops
//! that thread and joins it, so the combination is free once the drop returns.

use crate::mic::{HotkeyRegistration, HotkeyRegistry, KeyCombo};
use crate::service::blocking;
use anyhow::{anyhow, Context, Result};
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;
use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};
use windows::Win32::UI::Input::KeyboardAndMouse::{
    RegisterHotKey, UnregisterHotKey, HOT_KEY_MODIFIERS, MOD_NOREPEAT,
};
use windows::Win32::UI::WindowsAndMessaging::{PeekMessageW, MSG, PM_REMOVE, WM_HOTKEY};

const POLL: Duration = Duration::from_millis(50);

#[derive(Debug, Default)]
pub struct WindowsHotkeys {
    next_id: AtomicI32,
}

impl WindowsHotkeys {
    pub fn new() -> Self {
        Self::default()
    }
}

fn listen(
    id: i32,
    combo: KeyCombo,
    presses: UnboundedSender<()>,
    stop: Arc<AtomicBool>,
    ready: mpsc::Sender<Result<()>>,
) {
    let modifiers = HOT_KEY_MODIFIERS(combo.modifier_flags()) | MOD_NOREPEAT;
    let registered = unsafe { RegisterHotKey(None, id, modifiers, combo.key.virtual_key()) };
    if let Err(e) = registered {
        let _ = ready.send(Err(anyhow!("RegisterHotKey({combo}) failed: {e}")));
        return;
    }
    let _ = ready.send(Ok(()));
    tracing::info!("Hotkey {} registered", combo);

    let mut msg = MSG::default();
    while !stop.load(Ordering::Acquire) {
        let got = unsafe { PeekMessageW(&mut msg, None, 0, 0, PM_REMOVE) };
        if !got.as_bool() {
            thread::sleep(POLL);
            continue;
        }
        if msg.message == WM_HOTKEY && msg.wParam.0 as i32 == id && presses.send(()).is_err() {
            break;
        }
    }

    unsafe {
        let _ = UnregisterHotKey(None, id);
    }
    tracing::info!("Hotkey {} released", combo);
}

impl HotkeyRegistry for WindowsHotkeys {
    fn register(&self, combo: &KeyCombo) -> Result<HotkeyRegistration> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = unbounded_channel();
        let (ready_tx, ready_rx) = mpsc::channel();
        let stop = Arc::new(AtomicBool::new(false));
        let combo = *combo;

        let thread_stop = Arc::clone(&stop);
        let listener = thread::Builder::new()
            .name(format!("deskwarden-hotkey-{id}"))
            .spawn(move || listen(id, combo, tx, thread_stop, ready_tx))
            .context("failed to spawn hotkey thread")?;

        ready_rx
            .recv()
            .context("hotkey thread exited before registering")??;

        Ok(HotkeyRegistration::new(rx, move || {
            stop.store(true, Ordering::Release);
            if blocking(|| listener.join()).is_err() {
                tracing::error!("hotkey {combo} thread panicked");
            }
        }))
    }
}
