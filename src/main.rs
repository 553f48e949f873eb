use anyhow::Context;
use display_hotkeys::settings::Settings;
use display_hotkeys::settings_store::{default_settings_path, JsonSettingsStore, SettingsStore};
use std::path::PathBuf;
use std::sync::Arc;

fn main() -> anyhow::Result<()> {
    let settings_path = match std::env::args_os().nth(1) {
        Some(path) => PathBuf::from(path),
        None => default_settings_path()?,
    };
    let store = Arc::new(
        JsonSettingsStore::open(&settings_path)
            .with_context(|| format!("open settings {}", settings_path.display()))?,
    );
    let mut settings = store.application();
    settings.sanitize();
    display_hotkeys::logging::init(settings.debug_logging, settings.log_file.clone());
    tracing::info!(path = %settings_path.display(), "settings loaded");

    run(store, &settings)
}

#[cfg(windows)]
fn run(store: Arc<JsonSettingsStore>, settings: &Settings) -> anyhow::Result<()> {
    use display_hotkeys::display::win32::WindowsDisplayBackend;
    use display_hotkeys::display::TopologyAdapter;
    use display_hotkeys::hotkey_engine::HotkeyEngine;
    use display_hotkeys::key_source::RdevKeySource;
    use display_hotkeys::service::LogSink;
    use display_hotkeys::startup::StartupEntry;
    use display_hotkeys::{HotkeyService, ProfileModel};

    let topology = TopologyAdapter::new(Arc::new(WindowsDisplayBackend::new()));
    let mut profile = ProfileModel::load(topology, store, Arc::new(HotkeyEngine::new()));
    match StartupEntry::for_current_exe() {
        Ok(entry) => {
            if let Err(err) = entry.sync(settings.run_on_startup) {
                tracing::warn!(?err, "failed to update startup entry");
            }
            profile = profile.with_startup_entry(entry);
        }
        Err(err) => tracing::warn!(?err, "startup folder unavailable"),
    }

    let mut service = HotkeyService::new(
        Arc::new(profile),
        Box::new(RdevKeySource::new()),
        Arc::new(LogSink),
        settings.poll_interval(),
    );
    service.start()?;

    loop {
        std::thread::park();
    }
}

#[cfg(not(windows))]
fn run(_store: Arc<JsonSettingsStore>, _settings: &Settings) -> anyhow::Result<()> {
    tracing::error!("no display backend is available on this platform");
    anyhow::bail!("display hotkeys requires Windows")
}
