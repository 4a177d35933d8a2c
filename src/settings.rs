use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::{fs, net::SocketAddr, path::PathBuf, time::Duration};

pub const CONFIG_PATH_ENV: &str = "BRIDGE_CONFIG";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,
    pub topic: String,
    pub client_id_prefix: String,
    pub keep_alive_secs: u64,
    pub reconnect_delay_ms: u64,
}

impl Default for MqttSettings {
    fn default() -> Self {
        Self {
            host: "test.mosquitto.org".into(),
            port: 1883,
            topic: "factory/compressor/data".into(),
            client_id_prefix: "compressor-bridge".into(),
            keep_alive_secs: 60,
            reconnect_delay_ms: 1_000,
        }
    }
}

impl MqttSettings {
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    /// Client ids must be unique per broker, so every client gets a fresh suffix.
    pub fn client_id(&self, role: &str) -> String {
        format!("{}-{role}-{}", self.client_id_prefix, uuid::Uuid::new_v4().simple())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageSettings {
    pub path: PathBuf,
    pub retention_days: u64,
    pub maintenance_interval_secs: u64,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from("maintenance_logs.db"),
            retention_days: 7,
            maintenance_interval_secs: 100,
        }
    }
}

impl StorageSettings {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_days.saturating_mul(24 * 60 * 60))
    }

    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_secs(self.maintenance_interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SimulatorSettings {
    pub enabled: bool,
    pub interval_ms: u64,
}

impl Default for SimulatorSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 100,
        }
    }
}

impl SimulatorSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BridgeSettings {
    pub http_bind: SocketAddr,
    pub mqtt: MqttSettings,
    pub storage: StorageSettings,
    pub simulator: SimulatorSettings,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            http_bind: SocketAddr::from(([0, 0, 0, 0], 8000)),
            mqtt: MqttSettings::default(),
            storage: StorageSettings::default(),
            simulator: SimulatorSettings::default(),
        }
    }
}

impl BridgeSettings {
    /// Defaults, then the JSON file named by `BRIDGE_CONFIG`, then `BRIDGE_*` variables.
    pub fn load() -> Result<Self> {
        let mut settings = match std::env::var_os(CONFIG_PATH_ENV) {
            Some(path) => Self::from_file(PathBuf::from(path))?,
            None => Self::default(),
        };
        settings.apply_overrides(|key| std::env::var(key).ok())?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_file(path: PathBuf) -> Result<Self> {
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read settings from {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse settings in {}", path.display()))
    }

    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("BRIDGE_MQTT_HOST") {
            self.mqtt.host = host;
        }
        if let Some(port) = lookup("BRIDGE_MQTT_PORT") {
            self.mqtt.port = parse_override("BRIDGE_MQTT_PORT", &port)?;
        }
        if let Some(topic) = lookup("BRIDGE_MQTT_TOPIC") {
            self.mqtt.topic = topic;
        }
        if let Some(days) = lookup("BRIDGE_RETENTION_DAYS") {
            self.storage.retention_days = parse_override("BRIDGE_RETENTION_DAYS", &days)?;
        }
        if let Some(secs) = lookup("BRIDGE_MAINTENANCE_SECS") {
            self.storage.maintenance_interval_secs =
                parse_override("BRIDGE_MAINTENANCE_SECS", &secs)?;
        }
        if let Some(path) = lookup("BRIDGE_DB_PATH") {
            self.storage.path = PathBuf::from(path);
        }
        if let Some(ms) = lookup("BRIDGE_SIMULATOR_INTERVAL_MS") {
            self.simulator.interval_ms = parse_override("BRIDGE_SIMULATOR_INTERVAL_MS", &ms)?;
        }
        if let Some(enabled) = lookup("BRIDGE_SIMULATOR_ENABLED") {
            self.simulator.enabled = parse_flag(&enabled)
                .ok_or_else(|| anyhow!("BRIDGE_SIMULATOR_ENABLED: expected a boolean, got '{enabled}'"))?;
        }
        if let Some(bind) = lookup("BRIDGE_HTTP_BIND") {
            self.http_bind = parse_override("BRIDGE_HTTP_BIND", &bind)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.mqtt.topic.is_empty() {
            return Err(anyhow!("mqtt.topic must not be empty"));
        }
        if self.storage.retention_days == 0 {
            return Err(anyhow!("storage.retention_days must be at least 1"));
        }
        if self.simulator.interval_ms == 0 {
            return Err(anyhow!("simulator.interval_ms must be greater than zero"));
        }
        if self.storage.maintenance_interval_secs == 0 {
            return Err(anyhow!("storage.maintenance_interval_secs must be greater than zero"));
        }
        Ok(())
    }
}

fn parse_override<T>(key: &str, raw: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|err| anyhow!("{key}: invalid value '{raw}': {err}"))
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim() {
        "1" => Some(true),
        "0" => Some(false),
        value if value.eq_ignore_ascii_case("true") => Some(true),
        value if value.eq_ignore_ascii_case("false") => Some(false),
        _ => None,
    }
}
