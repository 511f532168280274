use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use prosuite::config::{AppConfig, ConfigStore, TomlConfigStore};
use prosuite::engine::{Collaborators, Engine};
use prosuite::input_manager::InputManager;
use prosuite::observer::LogStatus;
use prosuite::output::InputSink;
use prosuite::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

fn main() -> Result<()> {
    FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_thread_names(true)
        .compact()
        .init();

    // Request 1ms timer resolution for precise macro timing
    #[cfg(windows)]
    unsafe {
        windows::Win32::Media::timeBeginPeriod(1);
    }

    let store = Arc::new(TomlConfigStore::new(AppConfig::default_path()));
    let config = match store.load() {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };
    info!(path = %store.path().display(), "Configuration loaded");

    let engine = Engine::new(
        config.clone(),
        Collaborators {
            sink: output_sink(),
            store,
            ..Collaborators::default()
        },
    );

    let (sender, receiver) = crossbeam_channel::unbounded();
    let manager = InputManager::start(&config, sender, Arc::new(LogStatus));
    if manager.backend_count() == 0 {
        warn!("No input backends are running; nothing to do");
    }
    signal::install(manager.stop_handle())?;

    // Returns once every backend has stopped and dropped its sender
    engine.run(receiver);

    manager.shutdown();
    engine.shutdown(SHUTDOWN_TIMEOUT);
    Ok(())
}

#[cfg(windows)]
fn output_sink() -> Arc<dyn InputSink> {
    Arc::new(prosuite::output::SendInputSink)
}

#[cfg(not(windows))]
fn output_sink() -> Arc<dyn InputSink> {
    warn!("Synthetic input is not supported on this platform; outputs are discarded");
    Arc::new(prosuite::output::NullSink)
}
