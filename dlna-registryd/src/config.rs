use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use serde::Deserialize;
use anyhow::{Context, Result};
use shared::protocol::{DATA_FILE_NAME, LOCATION_PORT_FILE_NAME};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub settings: Settings,
    #[serde(default)]
    pub api: ApiConfig,
}

/// Runtime settings of the player host.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Settings {
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    #[serde(default)]
    pub host_ip: Option<String>,
    #[serde(default = "default_product")]
    pub product: String,
    /// Comma separated `key:value` display name rules
    #[serde(default)]
    pub aliases: String,
    #[serde(default)]
    pub location_url: Option<String>,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default = "default_platform")]
    pub platform: String,
    #[serde(default = "default_version")]
    pub platform_version: String,
    #[serde(default = "default_notify_interval")]
    pub notify_interval_secs: f64,
    #[serde(default = "default_config_path")]
    pub config_path: PathBuf,
    #[serde(default = "default_data_file_name")]
    pub data_file_name: String,
    #[serde(default = "default_location_port_file_name")]
    pub location_port_file_name: String,
    /// Ports handed out by this process, in allocation order
    #[serde(default)]
    pub device_ports: Vec<u16>,
    /// High-water mark the next allocated port is derived from
    #[serde(default = "default_base_port")]
    pub base_port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
}

fn default_http_port() -> u16 {
    32488
}

fn default_product() -> String {
    "Plex DLNA Player".to_string()
}

fn default_version() -> String {
    "1".to_string()
}

fn default_platform() -> String {
    "Linux".to_string()
}

fn default_notify_interval() -> f64 {
    0.5
}

fn default_config_path() -> PathBuf {
    PathBuf::from("config")
}

fn default_data_file_name() -> String {
    DATA_FILE_NAME.to_string()
}

fn default_location_port_file_name() -> String {
    LOCATION_PORT_FILE_NAME.to_string()
}

fn default_base_port() -> u16 {
    32489
}

fn default_listen() -> String {
    "127.0.0.1:32480".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            http_port: default_http_port(),
            host_ip: None,
            product: default_product(),
            aliases: String::new(),
            location_url: None,
            version: default_version(),
            platform: default_platform(),
            platform_version: default_version(),
            notify_interval_secs: default_notify_interval(),
            config_path: default_config_path(),
            data_file_name: default_data_file_name(),
            location_port_file_name: default_location_port_file_name(),
            device_ports: Vec::new(),
            base_port: default_base_port(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

impl Settings {
    /// Polling interval for client notifications; unusable values read as zero
    pub fn notify_interval(&self) -> Duration {
        Duration::try_from_secs_f64(self.notify_interval_secs).unwrap_or(Duration::ZERO)
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Like [`Config::load`], but a missing file yields the defaults
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::info!("No config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        Self::load(path)
    }

    /// Apply overrides from the process environment
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from `lookup`, keyed by upper-cased field name.
    /// Overrides win over the file, which wins over the defaults.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let s = &mut self.settings;

        if let Some(v) = lookup("HTTP_PORT") {
            s.http_port = parse_var("HTTP_PORT", &v)?;
        }
        if let Some(v) = lookup("HOST_IP") {
            s.host_ip = Some(v);
        }
        if let Some(v) = lookup("PRODUCT") {
            s.product = v;
        }
        if let Some(v) = lookup("ALIASES") {
            s.aliases = v;
        }
        if let Some(v) = lookup("LOCATION_URL") {
            s.location_url = Some(v);
        }
        if let Some(v) = lookup("VERSION") {
            s.version = v;
        }
        if let Some(v) = lookup("PLATFORM") {
            s.platform = v;
        }
        if let Some(v) = lookup("PLATFORM_VERSION") {
            s.platform_version = v;
        }
        if let Some(v) = lookup("NOTIFY_INTERVAL") {
            s.notify_interval_secs = parse_var("NOTIFY_INTERVAL", &v)?;
        }
        if let Some(v) = lookup("CONFIG_PATH") {
            s.config_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("DATA_FILE_NAME") {
            s.data_file_name = v;
        }
        if let Some(v) = lookup("LOCATION_PORT_FILE_NAME") {
            s.location_port_file_name = v;
        }
        if let Some(v) = lookup("BASE_PORT") {
            s.base_port = parse_var("BASE_PORT", &v)?;
        }
        if let Some(v) = lookup("API_LISTEN") {
            self.api.listen = v;
        }

        Ok(())
    }
}

fn parse_var<T>(key: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .trim()
        .parse()
        .with_context(|| format!("Invalid value for {}: {:?}", key, value))
}
