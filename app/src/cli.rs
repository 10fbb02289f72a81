//! devpoll CLI Tool
//!
//! Command-line interface for inspecting recorded sessions and configuration.

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use devpoll_app::config::AppConfig;
use devpoll_engine::{AvailabilityState, DeviceEvent, EventRecorder};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "devpoll-cli")]
#[command(version)]
#[command(about = "devpoll session and configuration tool", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Data directory
    #[arg(short, long, default_value = "/var/lib/devpoll/data")]
    data_dir: PathBuf,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// List recording sessions
    Sessions {
        /// Show per-device event counts
        #[arg(short, long)]
        verbose: bool,
    },

    /// Show events from a session
    Events {
        /// Session ID
        session_id: String,

        /// Only events of this device
        #[arg(short, long)]
        device: Option<String>,

        /// Only availability changes
        #[arg(short, long)]
        status_only: bool,

        #[arg(short, long, value_enum, default_value = "table")]
        format: OutputFormat,
    },

    /// Export session data
    Export {
        /// Session ID
        session_id: String,

        /// Output file path
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Generate sample configuration
    Config {
        /// Output path
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Check a configuration file
    Validate {
        file: PathBuf,
    },

    /// System information
    Info,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Sessions { verbose } => {
            list_sessions(&cli.data_dir, verbose)?;
        }

        Commands::Events { session_id, device, status_only, format } => {
            show_events(&cli.data_dir, &session_id, device.as_deref(), status_only, format)?;
        }

        Commands::Export { session_id, output } => {
            export_session(&cli.data_dir, &session_id, &output)?;
        }

        Commands::Config { output } => {
            generate_config(output)?;
        }

        Commands::Validate { file } => {
            validate_config(&file)?;
        }

        Commands::Info => {
            show_info()?;
        }
    }

    Ok(())
}

fn list_sessions(data_dir: &Path, verbose: bool) -> Result<()> {
    let recorder = EventRecorder::new(data_dir)?;
    let sessions = recorder.list_sessions()?;

    if sessions.is_empty() {
        println!("No recording sessions found.");
        return Ok(());
    }

    println!("╭──────────────────────────────────────────────────────────────────────────╮");
    println!("│                           Recording Sessions                             │");
    println!("├──────────────────────────┬──────────────────────┬────────────┬───────────┤");
    println!("│ Session ID               │ Name                 │ Events     │ Duration  │");
    println!("├──────────────────────────┼──────────────────────┼────────────┼───────────┤");

    for session in &sessions {
        let duration = session.duration();
        let duration_str = format!("{}:{:02}:{:02}",
            duration.num_hours(),
            duration.num_minutes() % 60,
            duration.num_seconds() % 60);

        println!("│ {:24} │ {:20} │ {:>10} │ {:>9} │",
            truncate(&session.id, 24),
            truncate(&session.name, 20),
            session.event_count(),
            duration_str);
    }

    println!("╰──────────────────────────┴──────────────────────┴────────────┴───────────╯");

    if verbose {
        for session in &sessions {
            println!("\n{}", "─".repeat(60));
            println!("Session: {}", session.id);
            println!("  Name: {}", session.name);
            println!("  Start: {}", session.start_time);
            match session.end_time {
                Some(end) => println!("  End: {}", end),
                None => println!("  End: (still recording or interrupted)"),
            }
            println!("  State changes: {}", session.state_changes);
            println!("  Status changes: {}", session.status_changes);

            if !session.devices.is_empty() {
                println!("  Devices:");
                for (device, count) in &session.devices {
                    println!("    - {}: {} events", device, count);
                }
            }
        }
    }

    Ok(())
}

fn show_events(
    data_dir: &Path,
    session_id: &str,
    device: Option<&str>,
    status_only: bool,
    format: OutputFormat,
) -> Result<()> {
    let recorder = EventRecorder::new(data_dir)?;
    let mut events = recorder.load_events(session_id)?;

    // Apply filters
    if let Some(device) = device {
        events.retain(|e| e.device().id() == device);
    }
    if status_only {
        events.retain(|e| matches!(e, DeviceEvent::StatusChanged { .. }));
    }

    if events.is_empty() {
        println!("No events found matching criteria.");
        return Ok(());
    }

    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(&events)?;
            println!("{}", json);
        }
        OutputFormat::Table => {
            println!("╭───────────────────────────────────────────────────────────────────────────╮");
            println!("│                                Event Log                                  │");
            println!("├──────────────┬──────────────────┬──────────────────┬──────────────────────┤");
            println!("│ Time         │ Device           │ Channel          │ Value                │");
            println!("├──────────────┼──────────────────┼──────────────────┼──────────────────────┤");

            for event in &events {
                let time_str = event.at().format("%H:%M:%S%.3f").to_string();
                let (channel, value) = match event {
                    DeviceEvent::StateChanged { channel, value, .. } => {
                        (channel.clone(), value.to_string())
                    }
                    DeviceEvent::StatusChanged { status, .. } => {
                        ("<status>".to_string(), status_label(status))
                    }
                };

                println!("│ {:12} │ {:16} │ {:16} │ {:20} │",
                    time_str,
                    truncate(event.device().id(), 16),
                    truncate(&channel, 16),
                    truncate(&value, 20));
            }

            println!("╰──────────────┴──────────────────┴──────────────────┴──────────────────────╯");
            println!("\nTotal events: {}", events.len());
        }
    }

    Ok(())
}

fn status_label(status: &AvailabilityState) -> String {
    match status {
        AvailabilityState::Offline(reason) => format!("OFFLINE {:?}", reason.kind),
        other => other.to_string(),
    }
}

fn export_session(data_dir: &Path, session_id: &str, output: &Path) -> Result<()> {
    let recorder = EventRecorder::new(data_dir)?;
    recorder.export_session(session_id, output)?;
    println!("Session exported to: {:?}", output);
    Ok(())
}

fn generate_config(output: Option<PathBuf>) -> Result<()> {
    let example = AppConfig::example();

    if let Some(path) = output {
        std::fs::write(&path, example)?;
        println!("Configuration written to: {:?}", path);
    } else {
        println!("{}", example);
    }

    Ok(())
}

fn validate_config(path: &Path) -> Result<()> {
    let config = AppConfig::load_from(path)?;
    config.validate()?;

    println!("{} is valid", path.display());
    println!("  Default interval: {} s", config.polling.refresh_interval_secs);
    println!("  Devices: {}", config.devices.len());
    for device in &config.devices {
        let polling = device.polling_or(&config.polling);
        println!("    - {} ({}): every {} s, {} fields",
            device.id,
            device.display_name(),
            polling.refresh_interval_secs,
            device.profile().fields.len());
    }
    Ok(())
}

fn show_info() -> Result<()> {
    use sysinfo::System;

    let mut sys = System::new_all();
    sys.refresh_all();

    println!("╭──────────────────────────────────────────────────────────────╮");
    println!("│                devpoll System Information                    │");
    println!("╰──────────────────────────────────────────────────────────────╯\n");

    println!("System:");
    println!("  Hostname: {}", System::host_name().unwrap_or_default());
    println!("  OS: {} {}",
        System::name().unwrap_or_default(),
        System::os_version().unwrap_or_default());
    println!("  Kernel: {}", System::kernel_version().unwrap_or_default());

    println!("\nHardware:");
    println!("  CPU: {}", sys.cpus().first().map(|c| c.brand()).unwrap_or("Unknown"));
    println!("  Cores: {}", sys.cpus().len());
    println!("  Memory: {} MB total, {} MB used",
        sys.total_memory() / 1024 / 1024,
        sys.used_memory() / 1024 / 1024);

    println!("\ndevpoll:");
    println!("  Version: {}", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::load()?;
    if config.config_path.as_os_str().is_empty() {
        println!("  Configuration: none found, defaults apply");
    } else {
        println!("  Configuration: {}", config.config_path.display());
    }
    println!("  Data directory: {}", config.data_directory);
    println!("  Configured devices: {}", config.devices.len());

    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}
