use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_lookback_days")]
    pub lookback_days: i64,

    /// Hard cap on records considered per run
    #[serde(default = "default_daily_record_cap")]
    pub daily_record_cap: usize,
}

fn default_lookback_days() -> i64 {
    30
}

fn default_daily_record_cap() -> usize {
    500
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            lookback_days: default_lookback_days(),
            daily_record_cap: default_daily_record_cap(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComposeConfig {
    #[serde(default = "default_renderer_command")]
    pub renderer_command: String,

    #[serde(default = "default_renderer_timeout_secs")]
    pub renderer_timeout_secs: u64,

    /// Concurrent composite jobs within one destination group
    #[serde(default = "default_compose_workers")]
    pub workers: usize,

    #[serde(default = "default_font")]
    pub font: String,

    #[serde(default = "default_callsign_size_pt")]
    pub callsign_size_pt: u32,

    #[serde(default = "default_detail_size_pt")]
    pub detail_size_pt: u32,

    #[serde(default = "default_fill")]
    pub fill: String,

    #[serde(default = "default_stroke")]
    pub stroke: String,

    /// Template-height divisors for the default detail and grid line
    /// offsets
    #[serde(default = "default_offset_divisors")]
    pub offset_divisors: [f32; 2],
}

fn default_renderer_command() -> String {
    "magick".to_string()
}

fn default_renderer_timeout_secs() -> u64 {
    30
}

fn default_compose_workers() -> usize {
    4
}

fn default_font() -> String {
    "DejaVu-Sans".to_string()
}

fn default_callsign_size_pt() -> u32 {
    48
}

fn default_detail_size_pt() -> u32 {
    24
}

fn default_fill() -> String {
    "#ffffff".to_string()
}

fn default_stroke() -> String {
    "#1a1a1a".to_string()
}

fn default_offset_divisors() -> [f32; 2] {
    [2.15, 2.5]
}

impl Default for ComposeConfig {
    fn default() -> Self {
        Self {
            renderer_command: default_renderer_command(),
            renderer_timeout_secs: default_renderer_timeout_secs(),
            workers: default_compose_workers(),
            font: default_font(),
            callsign_size_pt: default_callsign_size_pt(),
            detail_size_pt: default_detail_size_pt(),
            fill: default_fill(),
            stroke: default_stroke(),
            offset_divisors: default_offset_divisors(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    pub host: String,

    #[serde(default = "default_smtp_port")]
    pub port: u16,

    pub username: Option<String>,
    pub password: Option<String>,

    /// Sender address of every digest
    pub from: String,

    /// "starttls" (default), "tls", or "none"
    #[serde(default = "default_smtp_tls")]
    pub tls: String,

    #[serde(default = "default_smtp_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_smtp_port() -> u16 {
    587
}

fn default_smtp_tls() -> String {
    "starttls".to_string()
}

fn default_smtp_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryConfig {
    pub url: String,

    #[serde(default = "default_directory_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_directory_ttl_secs")]
    pub cache_ttl_secs: i64,
}

fn default_directory_timeout_secs() -> u64 {
    10
}

fn default_directory_ttl_secs() -> i64 {
    6 * 3600
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertConfig {
    /// Admin alerts go here when set; otherwise they only hit the log
    pub admin_address: Option<String>,

    #[serde(default = "default_alert_channel")]
    pub channel: String,
}

fn default_alert_channel() -> String {
    "eqsl".to_string()
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            admin_address: None,
            channel: default_alert_channel(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// Cards attached per digest; further contacts appear in the summary
    /// text only
    #[serde(default = "default_attachment_cap")]
    pub attachment_cap: usize,

    #[serde(default)]
    pub schedule: ScheduleConfig,

    #[serde(default)]
    pub compose: ComposeConfig,

    pub smtp: SmtpConfig,

    pub directory: DirectoryConfig,

    #[serde(default)]
    pub alerts: AlertConfig,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_data_dir() -> String {
    "data".to_string()
}

fn default_attachment_cap() -> usize {
    3
}

impl DispatcherConfig {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: DispatcherConfig = toml::from_str(&content)?;
        Ok(config)
    }
}

pub static CONFIG: OnceLock<DispatcherConfig> = OnceLock::new();

pub fn read_config() -> anyhow::Result<()> {
    let path = std::env::var("EQSL_CONFIG").unwrap_or_else(|_| "config.toml".to_string());
    let config = DispatcherConfig::from_file(&path)?;
    CONFIG
        .set(config)
        .map_err(|_| anyhow::anyhow!("Configuration already loaded"))?;
    Ok(())
}
