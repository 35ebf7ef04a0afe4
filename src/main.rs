#![windows_subsystem = "windows"]

#[cfg(windows)]
fn main() -> anyhow::Result<()> {
    host::run()
}

#[cfg(not(windows))]
fn main() -> anyhow::Result<()> {
    anyhow::bail!("deskwarden only runs on Windows")
}

#[cfg(windows)]
mod host {
    use anyhow::{Context, Result};
    use deskwarden::alert::Alerter;
    use deskwarden::audio::{SessionClassifier, VolumePolicyEngine};
    use deskwarden::config::AppConfig;
    use deskwarden::logging;
    use deskwarden::memory::MemoryWatchdog;
    use deskwarden::mic::{self, MicMuteService};
    use deskwarden::net::{NetworkQualityMonitor, SystemPinger, SystemTraceroute};
    use deskwarden::platform::win32::{
        BeepAlerter, ToolhelpProcessReader, WindowsAudio, WindowsHotkeys,
        WindowsMemoryProbe, WindowsNetworkInspector,
    };
    use deskwarden::service::ServiceSupervisor;
    use deskwarden::status::{StatusBoard, StatusBus, StatusEvent};
    use deskwarden::ui::{self, IconState, TrayCommand, TrayManager};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::runtime::Runtime;
    use tokio::sync::mpsc::UnboundedReceiver;
    use windows::core::PCWSTR;
    use windows::Win32::UI::WindowsAndMessaging::{
        DispatchMessageW, MessageBoxW, PeekMessageW, TranslateMessage, MB_ICONERROR, MB_OK, MSG,
        PM_REMOVE, WM_QUIT,
    };

    const AUDIO_POLL: Duration = Duration::from_millis(500);
    const UI_TICK: Duration = Duration::from_millis(50);

    fn show_error(msg: &str) {
        unsafe {
            let msg_wide: Vec<u16> = msg.encode_utf16().chain(std::iter::once(0)).collect();
            let title_wide: Vec<u16> =
                "Deskwarden Error".encode_utf16().chain(std::iter::once(0)).collect();
            MessageBoxW(
                None,
                PCWSTR(msg_wide.as_ptr()),
                PCWSTR(title_wide.as_ptr()),
                MB_OK | MB_ICONERROR,
            );
        }
    }

    pub fn run() -> Result<()> {
        let config = match AppConfig::load() {
            Ok(config) => config,
            Err(e) => {
                show_error(&format!("Configuration error: {e:#}"));
                return Err(e);
            }
        };
        if let Some(path) = logging::init(&config.logging) {
            tracing::info!("Logging to {}", path.display());
        }

        let result = Daemon::build(&config).and_then(|daemon| daemon.run());
        if let Err(e) = &result {
            tracing::error!("Fatal: {e:#}");
            show_error(&format!("{e:#}"));
        }
        result
    }

    /// Services plus the runtime they run on. Lives on the UI thread.
    struct Daemon {
        runtime: Runtime,
        supervisor: Arc<ServiceSupervisor>,
        engine: Arc<VolumePolicyEngine>,
        statuses: UnboundedReceiver<StatusEvent>,
        board: StatusBoard,
    }

    impl Daemon {
        fn build(config: &AppConfig) -> Result<Self> {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .thread_name("deskwarden-worker")
                .build()
                .context("failed to start the async runtime")?;

            let alerter: Arc<dyn Alerter> = Arc::new(BeepAlerter);
            let audio = Arc::new(WindowsAudio::start(AUDIO_POLL).context("audio backend")?);
            let classifier = SessionClassifier::new(
                config.audio.classifier.clone(),
                Arc::new(ToolhelpProcessReader),
            );
            let engine = Arc::new(VolumePolicyEngine::new(
                audio,
                classifier,
                config.audio.policies.table()?,
                Arc::clone(&alerter),
                config.check_interval(),
            ));

            let network = NetworkQualityMonitor::new(
                config.network_settings(),
                Arc::new(WindowsNetworkInspector),
                Arc::new(SystemPinger::new(config.ping_timeout())),
                Arc::new(SystemTraceroute::new(
                    config.network.traceroute_max_hops,
                    config.traceroute_timeout(),
                )),
                Arc::clone(&alerter),
            );
            let memory = MemoryWatchdog::new(
                config.memory_settings(),
                Arc::new(WindowsMemoryProbe),
                Arc::clone(&alerter),
            );
            let mic = MicMuteService::new(
                config.mic.hotkey,
                Arc::new(WindowsHotkeys::new()),
                engine.clone(),
                config.mic_refresh_interval(),
            );

            let bus = StatusBus::new();
            let statuses = bus.subscribe();
            let mut supervisor = ServiceSupervisor::new(bus);
            supervisor.register(engine.clone());
            supervisor.register(Arc::new(network));
            supervisor.register(Arc::new(memory));
            supervisor.register(Arc::new(mic));

            let mut board = StatusBoard::new();
            for handle in supervisor.services() {
                board.register(handle.name());
            }

            Ok(Self {
                runtime,
                supervisor: Arc::new(supervisor),
                engine,
                statuses,
                board,
            })
        }

        fn run(mut self) -> Result<()> {
            let names: Vec<String> = self.board.services().map(str::to_string).collect();
            let mut tray = TrayManager::new();
            tray.create(&names, &ui::tooltip(&self.board))?;

            self.runtime.block_on(self.supervisor.start_all());
            tracing::info!("Started {} services", names.len());

            let mut muted = false;
            'ui: loop {
                if !pump_messages() {
                    break;
                }

                let mut changed = false;
                while let Ok(event) = self.statuses.try_recv() {
                    let update = self.board.apply(&event);
                    if update.new_error {
                        tracing::warn!(service = %event.service(), "Service entered error state");
                    }
                    changed |= update.changed;
                }
                if changed {
                    if let Some(status) = self.board.status(mic::SERVICE_NAME) {
                        if !status.is_error {
                            muted = status.text == mic::MUTED_STATUS;
                        }
                    }
                }

                while let Some(command) = tray.poll_command() {
                    match command {
                        TrayCommand::ToggleMic => match self.engine.toggle_mic_mute() {
                            Ok(Some(now)) => {
                                muted = now;
                                changed = true;
                            }
                            Ok(None) => tracing::info!("No capture device to toggle"),
                            Err(e) => tracing::warn!("Mic toggle failed: {e}"),
                        },
                        TrayCommand::Restart(name) => {
                            let supervisor = Arc::clone(&self.supervisor);
                            self.runtime.spawn(async move {
                                supervisor.restart(&name).await;
                            });
                        }
                        TrayCommand::Stop(name) => {
                            let supervisor = Arc::clone(&self.supervisor);
                            self.runtime.spawn(async move {
                                supervisor.stop(&name).await;
                            });
                        }
                        TrayCommand::Exit => break 'ui,
                    }
                }

                if changed {
                    let state = IconState {
                        has_error: self.board.has_error(),
                        muted,
                    };
                    if let Err(e) = tray.set_state(state) {
                        tracing::warn!("Tray icon update failed: {e}");
                    }
                    if let Err(e) = tray.set_tooltip(&ui::tooltip(&self.board)) {
                        tracing::warn!("Tray tooltip update failed: {e}");
                    }
                }

                std::thread::sleep(UI_TICK);
            }

            tracing::info!("Shutting down");
            self.runtime.block_on(self.supervisor.shutdown());
            tray.destroy();
            Ok(())
        }
    }

    /// Dispatch pending window messages. False once WM_QUIT arrives.
    fn pump_messages() -> bool {
        let mut msg = MSG::default();
        unsafe {
            while PeekMessageW(&mut msg, None, 0, 0, PM_REMOVE).as_bool() {
                if msg.message == WM_QUIT {
                    return false;
                }
                let _ = TranslateMessage(&msg);
                DispatchMessageW(&msg);
            }
        }
        true
    }
}
