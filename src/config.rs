use crate::prelude::*;

use serde::Deserialize;
use std::time::Duration;

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Config {
    pub port: String,
    #[serde(default = "Config::default_baudrate")]
    pub baudrate: u32,
    #[serde(default = "Config::default_station_id")]
    pub station_id: u8,
    #[serde(default = "Config::default_timeout_seconds")]
    pub timeout_seconds: u64,

    #[serde(default = "Config::default_interval_minutes")]
    pub interval_minutes: u64,
    #[serde(default = "Config::default_check_interval_millis")]
    pub check_interval_millis: u64,
    #[serde(default)]
    pub run_on_start: bool,

    pub channel_map: ChannelMap,

    #[serde(default = "Config::default_storage_location")]
    pub storage_location: String,

    /// Optional path to append raw register blocks to, one JSON object per line
    pub datalog_file: Option<String>,

    #[serde(default = "Config::default_loglevel")]
    pub loglevel: String,
}

impl Config {
    pub fn new(file: &str) -> Result<Self> {
        let content = std::fs::read_to_string(file)
            .map_err(|err| anyhow!("error reading {}: {}", file, err))?;

        Self::from_yaml(&content).with_context(|| format!("invalid configuration in {}", file))
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Logs the effective configuration, one setting per line.
    pub fn log_summary(&self) {
        info!("Configuration loaded successfully:");
        info!("  Serial port: {}", self.port);
        info!("    Baudrate: {}", self.baudrate);
        info!("    Station ID: {}", self.station_id);
        info!("    Timeout: {}s", self.timeout_seconds);
        info!("  Scheduler:");
        info!("    Interval: {}m", self.interval_minutes);
        info!("    Check interval: {}ms", self.check_interval_millis);
        info!("    Run on start: {}", self.run_on_start);
        info!("  Channels: {} configured", self.channel_map.len());
        for channel in self.channel_map.iter() {
            info!(
                "    [{}] {} (divisor {})",
                channel.address(),
                channel.name(),
                channel.divisor()
            );
        }
        info!("  Storage: {}", self.storage_location);
        if let Some(datalog) = &self.datalog_file {
            info!("  Datalog: {}", datalog);
        }
        info!("  Log Level: {}", self.loglevel);
    }

    fn validate(&self) -> Result<()> {
        if self.port.is_empty() {
            bail!("port cannot be empty");
        }
        if self.baudrate == 0 {
            bail!("baudrate must be greater than 0");
        }
        if self.timeout_seconds == 0 {
            bail!("timeoutSeconds must be greater than 0");
        }
        if self.interval_minutes == 0 {
            bail!("intervalMinutes must be greater than 0");
        }
        if self.check_interval_millis == 0 {
            bail!("checkIntervalMillis must be greater than 0");
        }
        if self.storage_location.is_empty() {
            bail!("storageLocation cannot be empty");
        }

        Ok(())
    }

    pub fn port(&self) -> &str {
        &self.port
    }

    pub fn baudrate(&self) -> u32 {
        self.baudrate
    }

    pub fn station_id(&self) -> u8 {
        self.station_id
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_minutes.saturating_mul(60))
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_millis)
    }

    pub fn run_on_start(&self) -> bool {
        self.run_on_start
    }

    pub fn channel_map(&self) -> &ChannelMap {
        &self.channel_map
    }

    pub fn storage_location(&self) -> &str {
        &self.storage_location
    }

    pub fn datalog_file(&self) -> Option<&str> {
        self.datalog_file.as_deref()
    }

    pub fn loglevel(&self) -> &str {
        &self.loglevel
    }

    fn default_baudrate() -> u32 {
        9600
    }

    fn default_station_id() -> u8 {
        1
    }

    fn default_timeout_seconds() -> u64 {
        1
    }

    fn default_interval_minutes() -> u64 {
        15
    }

    fn default_check_interval_millis() -> u64 {
        1000
    }

    fn default_storage_location() -> String {
        "sensor_data.db".to_string()
    }

    fn default_loglevel() -> String {
        "info".to_string()
    }
}
