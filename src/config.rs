//! Layered configuration: TOML file + environment overrides.
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub printers: Vec<PrinterDescriptor>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_uploads_dir")]
    pub uploads_dir: String,
    #[serde(default = "default_tempcsv_dir")]
    pub tempcsv_dir: String,
    #[serde(default)]
    pub database_uri: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            uploads_dir: default_uploads_dir(),
            tempcsv_dir: default_tempcsv_dir(),
            database_uri: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DispatchConfig {
    #[serde(default = "default_baud")]
    pub baud_rate: u32,
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            baud_rate: default_baud(),
            read_timeout_ms: default_read_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PrinterDescriptor {
    pub id: i64,
    pub device: String,
    pub description: String,
    pub hwid: String,
    pub name: String,
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_uploads_dir() -> String {
    "uploads".to_string()
}
fn default_tempcsv_dir() -> String {
    "tempcsv".to_string()
}
fn default_baud() -> u32 {
    115200
}
fn default_read_timeout_ms() -> u64 {
    10_000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            storage: StorageConfig::default(),
            dispatch: DispatchConfig::default(),
            printers: Vec::new(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file, then apply environment overrides.
    pub fn load_config(config_path: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let mut config = if let Ok(mut file) = File::open(config_path) {
            let mut contents = String::new();
            file.read_to_string(&mut contents)?;
            toml::from_str(&contents)?
        } else {
            tracing::warn!("config file {} not found, using defaults", config_path);
            Config::default()
        };

        if let Ok(base_url) = std::env::var("BASE_URL") {
            if let Some((host, port)) = base_url.rsplit_once(':') {
                config.server.bind_address = host.to_string();
                if let Ok(p) = port.parse() {
                    config.server.port = p;
                }
            }
        }
        if let Ok(db) = std::env::var("DATABASE_URL") {
            config.storage.database_uri = Some(db);
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.dispatch.baud_rate, 115200);
        assert_eq!(config.server.port, 8080);
    }

    #[test]
    fn parses_toml() {
        let toml_src = r#"
[server]
bind_address = "127.0.0.1"
port = 9000

[storage]
uploads_dir = "/tmp/up"

[[printers]]
id = 1
device = "/dev/ttyUSB0"
description = "Original Prusa i3 MK3"
hwid = "USB VID:PID=2C99:0002"
name = "mk3-1"
"#;
        let config: Config = toml::from_str(toml_src).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.printers.len(), 1);
        assert_eq!(config.printers[0].name, "mk3-1");
    }
}
