// Application Configuration

use anyhow::{bail, Context, Result};
use devpoll_engine::{EngineConfig, PollingConfig};
use devpoll_transport::{SimulatedField, SimulatedProfile};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Default session name
    #[serde(default = "default_session")]
    pub session_name: String,

    /// Data directory for recordings
    #[serde(default = "default_data_dir")]
    pub data_directory: String,

    /// Auto-start recording on launch
    #[serde(default)]
    pub auto_record: bool,

    #[serde(default)]
    pub log_format: LogFormat,

    #[serde(default)]
    pub engine: EngineConfig,

    /// Polling parameters for devices without their own
    #[serde(default)]
    pub polling: PollingConfig,

    #[serde(default)]
    pub devices: Vec<DeviceConfig>,

    /// Path to config file (for reference)
    #[serde(skip)]
    pub config_path: PathBuf,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Preset {
    Thermostat,
    SmartPlug,
}

/// One simulated device
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub id: String,

    #[serde(default)]
    pub label: Option<String>,

    /// Built-in field table to start from
    #[serde(default)]
    pub preset: Option<Preset>,

    /// Extra fields; a field named like a preset field replaces it
    #[serde(default)]
    pub fields: Vec<SimulatedField>,

    #[serde(default)]
    pub latency_ms: Option<u64>,

    #[serde(default)]
    pub failure_rate: Option<f64>,

    /// Overrides the top-level `[polling]` block
    #[serde(default)]
    pub polling: Option<PollingConfig>,
}

impl DeviceConfig {
    pub fn display_name(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.id)
    }

    pub fn profile(&self) -> SimulatedProfile {
        let mut profile = match self.preset {
            Some(Preset::Thermostat) => SimulatedProfile::thermostat(),
            Some(Preset::SmartPlug) => SimulatedProfile::smart_plug(),
            None => SimulatedProfile::default(),
        };

        for field in &self.fields {
            match profile.fields.iter_mut().find(|f| f.name == field.name) {
                Some(existing) => *existing = field.clone(),
                None => profile.fields.push(field.clone()),
            }
        }
        if let Some(latency) = self.latency_ms {
            profile.latency_ms = latency;
        }
        if let Some(rate) = self.failure_rate {
            profile = profile.with_failure_rate(rate);
        }
        profile
    }

    pub fn polling_or<'a>(&'a self, default: &'a PollingConfig) -> &'a PollingConfig {
        self.polling.as_ref().unwrap_or(default)
    }
}

fn default_session() -> String { format!("session_{}", chrono::Utc::now().format("%Y%m%d_%H%M%S")) }
fn default_data_dir() -> String { "/var/lib/devpoll/data".to_string() }

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            session_name: default_session(),
            data_directory: default_data_dir(),
            auto_record: false,
            log_format: LogFormat::default(),
            engine: EngineConfig::default(),
            polling: PollingConfig::default(),
            devices: Vec::new(),
            config_path: PathBuf::new(),
        }
    }
}

impl AppConfig {
    /// Load configuration from standard paths
    pub fn load() -> Result<Self> {
        let config_paths = [
            PathBuf::from("/etc/devpoll/config.toml"),
            dirs::config_dir()
                .map(|p| p.join("devpoll/config.toml"))
                .unwrap_or_default(),
            PathBuf::from("./config.toml"),
        ];

        for path in &config_paths {
            if path.is_file() {
                return Self::load_from(path);
            }
        }

        Ok(Self::default())
    }

    /// Load configuration from specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let mut config: AppConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        config.config_path = path.to_path_buf();
        Ok(config)
    }

    /// Check everything the engine would otherwise reject one device at a time
    pub fn validate(&self) -> Result<()> {
        self.engine.validate()?;
        self.polling.validate().context("[polling]")?;

        let mut seen = HashSet::new();
        for device in &self.devices {
            if device.id.trim().is_empty() {
                bail!("Device ids must not be empty");
            }
            if !seen.insert(device.id.as_str()) {
                bail!("Duplicate device id: {}", device.id);
            }
            if let Some(polling) = &device.polling {
                polling
                    .validate()
                    .with_context(|| format!("Device {}", device.id))?;
            }
            if let Some(rate) = device.failure_rate {
                if !(0.0..=1.0).contains(&rate) {
                    bail!("Device {}: failure_rate must be between 0.0 and 1.0", device.id);
                }
            }
        }
        Ok(())
    }

    /// Example configuration file
    pub fn example() -> &'static str {
        EXAMPLE
    }
}

const EXAMPLE: &str = r#"# devpoll Configuration File
#
# Copy this file to /etc/devpoll/config.toml or ~/.config/devpoll/config.toml

# Default session name (auto-generated if not set)
session_name = "living_room"

# Data directory for recordings
data_directory = "/var/lib/devpoll/data"

# Auto-start recording on launch
auto_record = true

# Log output: "text" or "json"
log_format = "text"

[engine]
# Fetches and commands in progress at once, across all devices
max_concurrent_fetches = 16

# Defaults for every device
[polling]
refresh_interval_secs = 30
initial_delay_secs = 0
# Settle time before the refresh that follows a command
command_refresh_delay_ms = 0
transport_timeout_ms = 5000

[[devices]]
id = "thermostat"
label = "Hallway thermostat"
preset = "thermostat"

[[devices]]
id = "plug"
label = "Desk plug"
preset = "smart_plug"
failure_rate = 0.05

[devices.polling]
refresh_interval_secs = 10

[[devices]]
id = "garage-door"
latency_ms = 200

[[devices.fields]]
name = "open"
value = false
writable = true

[[devices.fields]]
name = "battery"
value = 87.0
drift = 0.5
"#;

/// Helper for getting config directories
mod dirs {
    use std::path::PathBuf;

    pub fn config_dir() -> Option<PathBuf> {
        std::env::var("XDG_CONFIG_HOME")
            .ok()
            .map(PathBuf::from)
            .or_else(|| {
                std::env::var("HOME")
                    .ok()
                    .map(|h| PathBuf::from(h).join(".config"))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use devpoll_transport::Value;

    #[test]
    fn example_parses_and_validates() {
        let config: AppConfig = toml::from_str(AppConfig::example()).unwrap();
        config.validate().unwrap();

        assert_eq!(config.devices.len(), 3);
        assert_eq!(config.polling.refresh_interval_secs, 30);

        let plug = &config.devices[1];
        assert_eq!(plug.polling_or(&config.polling).refresh_interval_secs, 10);
        assert_eq!(plug.display_name(), "Desk plug");

        let garage = config.devices[2].profile();
        assert_eq!(garage.latency_ms, 200);
        assert_eq!(garage.fields.len(), 2);
        assert!(garage.fields[0].writable);
        assert_eq!(garage.fields[1].value, Value::Number(87.0));
    }

    #[test]
    fn empty_file_gives_defaults() {
        let config: AppConfig = toml::from_str("").unwrap();
        assert!(config.devices.is_empty());
        assert_eq!(config.log_format, LogFormat::Text);
        assert_eq!(config.engine.max_concurrent_fetches, 16);
        assert_eq!(config.polling, PollingConfig::default());
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let config: AppConfig = toml::from_str(
            r#"
            [[devices]]
            id = "lamp"
            [[devices]]
            id = "lamp"
            "#,
        )
        .unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("Duplicate device id"));
    }

    #[test]
    fn zero_interval_is_rejected() {
        let config: AppConfig = toml::from_str(
            r#"
            [[devices]]
            id = "lamp"
            [devices.polling]
            refresh_interval_secs = 0
            "#,
        )
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn custom_fields_override_preset() {
        let device: DeviceConfig = toml::from_str(
            r#"
            id = "plug"
            preset = "smart_plug"
            [[fields]]
            name = "watts"
            value = 0.0
            "#,
        )
        .unwrap();

        let profile = device.profile();
        assert_eq!(profile.fields.len(), SimulatedProfile::smart_plug().fields.len());
        let watts = profile.fields.iter().find(|f| f.name == "watts").unwrap();
        assert_eq!(watts.value, Value::Number(0.0));
        assert_eq!(watts.drift, 0.0);
    }
}
