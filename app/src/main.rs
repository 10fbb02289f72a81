//! devpoll
//!
//! Runs a fleet of simulated devices through the polling engine until Ctrl+C.

use anyhow::{Context, Result};
use clap::Parser;
use devpoll_app::config::{AppConfig, LogFormat};
use devpoll_engine::{
    ChannelSink, DeviceHandle, DeviceManager, EventRecorder, LoggingSink, Sinks, WorkerPool,
};
use devpoll_transport::SimulatedDevice;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

#[derive(Parser)]
#[command(name = "devpoll")]
#[command(version)]
#[command(about = "Polls configured devices and records their state", long_about = None)]
struct Args {
    /// Configuration file (default: standard locations)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let config = match &args.config {
        Some(path) => AppConfig::load_from(path)?,
        None => AppConfig::load()?,
    };

    init_logging(config.log_format);

    tracing::info!("╔══════════════════════════════════════════╗");
    tracing::info!("║        devpoll device polling engine     ║");
    tracing::info!("║            Version {:<22}║", env!("CARGO_PKG_VERSION"));
    tracing::info!("╚══════════════════════════════════════════╝");

    if config.config_path.as_os_str().is_empty() {
        tracing::warn!("No configuration file found, using defaults");
    } else {
        tracing::info!("Configuration loaded from {:?}", config.config_path);
    }
    config.validate().context("Invalid configuration")?;

    if config.devices.is_empty() {
        tracing::warn!("No devices configured, nothing to poll");
    }

    // Initialize event recorder
    let data_dir = PathBuf::from(&config.data_directory);
    let mut recorder = EventRecorder::new(&data_dir)?;
    if config.auto_record {
        recorder.start_session(&config.session_name)?;
    }
    let recorder = Arc::new(RwLock::new(recorder));
    tracing::info!("Event recorder ready ({})", data_dir.display());

    // Initialize the engine
    let pool = WorkerPool::current(&config.engine);
    let (sink, mut event_rx) = ChannelSink::new();
    let manager = DeviceManager::new(pool, Sinks::shared(Arc::new(sink)));

    for device in &config.devices {
        let transport = Arc::new(SimulatedDevice::new(&device.id, device.profile()));
        manager
            .add_device(
                DeviceHandle::new(&device.id),
                transport,
                device.polling_or(&config.polling),
            )
            .with_context(|| format!("Failed to start device {}", device.id))?;
        tracing::info!("Device {} ({}) is being polled", device.id, device.display_name());
    }

    // Spawn event processor
    let recorder_clone = recorder.clone();
    let mut event_task = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            event.dispatch(&LoggingSink, &LoggingSink);

            if let Err(e) = recorder_clone.write().await.record_event(&event) {
                tracing::error!("Error recording event: {}", e);
            }
        }
    });

    print_system_status(&config);

    tracing::info!("Polling {} devices", manager.len());
    tracing::info!("Press Ctrl+C to stop");

    // Wait for shutdown signal
    let event_task_running = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
            true
        }
        _ = &mut event_task => {
            tracing::warn!("Event task ended unexpectedly");
            false
        }
    };

    // Cleanup
    tracing::info!("Shutting down...");
    for id in manager.device_ids() {
        if let Some(state) = manager.availability(id.id()) {
            tracing::info!("  {}: {}", id, state);
        }
    }
    manager.shutdown();
    drop(manager);

    // The channel closes once the last device task lets go of the sinks
    if event_task_running
        && tokio::time::timeout(Duration::from_secs(2), &mut event_task).await.is_err()
    {
        tracing::warn!("Event queue did not drain in time");
        event_task.abort();
    }

    let mut recorder = recorder.write().await;
    recorder.flush()?;
    if let Some(session) = recorder.end_session()? {
        tracing::info!("Recording session ended: {} events captured", session.event_count());
    }

    tracing::info!("devpoll shutdown complete");

    Ok(())
}

fn init_logging(format: LogFormat) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("info,devpoll=debug,devpoll_engine=debug,devpoll_transport=debug")
    });

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry.with(fmt::layer().json().with_target(true)).init(),
        LogFormat::Text => registry
            .with(fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false))
            .init(),
    }
}

fn print_system_status(config: &AppConfig) {
    use sysinfo::System;

    let mut sys = System::new_all();
    sys.refresh_all();

    tracing::info!("╭─────────────── System Status ───────────────╮");
    tracing::info!("│ Hostname: {:>33} │", System::host_name().unwrap_or_default());
    tracing::info!("│ OS: {:>39} │", System::name().unwrap_or_default());
    tracing::info!("│ CPUs: {:>37} │", sys.cpus().len());
    tracing::info!("│ Memory: {:>24} MB / {} MB │",
        sys.used_memory() / 1024 / 1024,
        sys.total_memory() / 1024 / 1024);
    tracing::info!("├──────────────── Configuration ──────────────┤");
    tracing::info!("│ Session: {:>34} │", config.session_name);
    tracing::info!("│ Recording: {:>32} │", if config.auto_record { "on" } else { "off" });
    tracing::info!("│ Devices: {:>34} │", config.devices.len());
    tracing::info!("│ Default interval: {:>24} s │", config.polling.refresh_interval_secs);
    tracing::info!("│ Concurrent fetches: {:>23} │", config.engine.max_concurrent_fetches);
    tracing::info!("╰─────────────────────────────────────────────╯");
}
