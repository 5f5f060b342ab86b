use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid config json: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub pass: String,
    pub client_id: String,
    pub keep_alive_secs: u64,
}

impl MqttConfig {
    fn with_client(host: &str, client_id: &str) -> Self {
        Self {
            host: host.to_string(),
            port: 1883,
            user: String::new(),
            pass: String::new(),
            client_id: client_id.to_string(),
            keep_alive_secs: 20,
        }
    }

    fn sanitize(&mut self, default_client_id: &str) {
        if self.port == 0 {
            self.port = 1883;
        }
        if self.client_id.trim().is_empty() {
            self.client_id = default_client_id.to_string();
        }
        self.keep_alive_secs = self.keep_alive_secs.clamp(5, 3_600);
    }

    fn apply_env(&mut self, lookup: &impl Fn(&str) -> Option<String>) {
        if let Some(host) = lookup("MQTT_HOST") {
            self.host = host;
        }
        if let Some(port) = lookup("MQTT_PORT").and_then(|value| value.parse::<u16>().ok()) {
            self.port = port;
        }
        if let Some(user) = lookup("MQTT_USER") {
            self.user = user;
        }
        if let Some(pass) = lookup("MQTT_PASS") {
            self.pass = pass;
        }
        if let Some(client_id) = lookup("MQTT_CLIENT_ID") {
            self.client_id = client_id;
        }
    }
}

/// Settings for the emulated oven process.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EmulatorConfig {
    pub mqtt: MqttConfig,
    pub tick_interval_ms: u64,
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self {
            mqtt: MqttConfig::with_client("mqtt", "koven_client"),
            tick_interval_ms: 1_000,
        }
    }
}

impl EmulatorConfig {
    pub fn from_json(raw: &[u8]) -> Result<Self, ConfigError> {
        let mut config: Self = serde_json::from_slice(raw)?;
        config.sanitize();
        Ok(config)
    }

    pub fn sanitize(&mut self) {
        self.mqtt.sanitize("koven_client");
        self.tick_interval_ms = self.tick_interval_ms.clamp(10, 60_000);
    }

    /// Applies environment overrides, then re-sanitizes.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        self.mqtt.apply_env(&lookup);
        if let Some(ms) = lookup("KOVEN_TICK_MS").and_then(|value| value.parse::<u64>().ok()) {
            self.tick_interval_ms = ms;
        }
        self.sanitize();
    }
}

/// Settings for the remote-control platform service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlatformConfig {
    pub mqtt: MqttConfig,
    pub http_addr: String,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            mqtt: MqttConfig::with_client("localhost", "koven_platform"),
            http_addr: "127.0.0.1:8080".to_string(),
        }
    }
}

impl PlatformConfig {
    pub fn from_json(raw: &[u8]) -> Result<Self, ConfigError> {
        let mut config: Self = serde_json::from_slice(raw)?;
        config.sanitize();
        Ok(config)
    }

    pub fn sanitize(&mut self) {
        self.mqtt.sanitize("koven_platform");
        if self.http_addr.trim().is_empty() {
            self.http_addr = Self::default().http_addr;
        }
    }

    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        self.mqtt.apply_env(&lookup);
        if let Some(addr) = lookup("KOVEN_HTTP_ADDR") {
            self.http_addr = addr;
        }
        self.sanitize();
    }
}
