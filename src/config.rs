//! Configuration loading.
//!
//! Mirrors the teacher's `env::var(...)` convention (see the original
//! `alert-service::main`): every knob is read from the process environment
//! once at startup. A missing `channels_dvr_host` or invalid `tz` is a
//! Configuration error (spec §7) — the caller is expected to log it and
//! enter standby rather than exit.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use chrono_tz::Tz;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{0} is not a valid value: {1}")]
    Invalid(&'static str, String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImagePreference {
    Channel,
    Program,
}

impl FromStr for ImagePreference {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "CHANNEL" => Ok(ImagePreference::Channel),
            "PROGRAM" => Ok(ImagePreference::Program),
            other => Err(ConfigError::Invalid(
                "cw_image_source",
                other.to_string(),
            )),
        }
    }
}

/// Which body fields the Alert Formatter includes for a channel-watching alert.
#[derive(Debug, Clone)]
pub struct ChannelWatchingOptions {
    pub enabled: bool,
    pub show_channel: bool,
    pub show_resolution: bool,
    pub show_device: bool,
    pub show_source: bool,
    pub show_ip: bool,
    pub show_program: bool,
    pub image_source: ImagePreference,
}

impl Default for ChannelWatchingOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            show_channel: true,
            show_resolution: true,
            show_device: true,
            show_source: true,
            show_ip: true,
            show_program: true,
            image_source: ImagePreference::Channel,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RecordingEventsOptions {
    pub enabled: bool,
    pub alert_scheduled: bool,
    pub alert_started: bool,
    pub alert_completed: bool,
    pub alert_cancelled: bool,
}

impl Default for RecordingEventsOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            alert_scheduled: true,
            alert_started: true,
            alert_completed: true,
            alert_cancelled: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct VodWatchingOptions {
    pub enabled: bool,
    pub alert_cooldown_secs: u64,
    pub significant_threshold_secs: u64,
}

impl Default for VodWatchingOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            alert_cooldown_secs: 300,
            significant_threshold_secs: 300,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DiskSpaceOptions {
    pub enabled: bool,
    pub threshold_percent: f64,
    pub threshold_gb: f64,
}

impl Default for DiskSpaceOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold_percent: 10.0,
            threshold_gb: 50.0,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CacheTtls {
    pub channel_secs: u64,
    pub program_secs: u64,
    pub job_secs: u64,
    pub vod_secs: u64,
}

impl CacheTtls {
    fn defaults() -> Self {
        Self {
            channel_secs: 24 * 3600,
            program_secs: 24 * 3600,
            job_secs: 3600,
            vod_secs: 24 * 3600,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PushoverConfig {
    pub user_key: Option<String>,
    pub api_token: Option<String>,
}

impl PushoverConfig {
    pub fn is_configured(&self) -> bool {
        self.user_key.is_some() && self.api_token.is_some()
    }
}

#[derive(Debug, Clone, Default)]
pub struct AppriseConfig {
    /// Raw `apprise_*` service URLs, e.g. `discord://...`, `mailto://...`.
    pub service_urls: Vec<String>,
    pub email_to: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub channels_dvr_host: String,
    pub channels_dvr_port: u16,
    pub tz: Tz,
    pub log_level: u8,
    pub log_retention_days: u32,

    pub alert_channel_watching: bool,
    pub alert_vod_watching: bool,
    pub alert_disk_space: bool,
    pub alert_recording_events: bool,
    pub stream_count: bool,

    pub channel_watching: ChannelWatchingOptions,
    pub recording_events: RecordingEventsOptions,
    pub vod_watching: VodWatchingOptions,
    pub disk_space: DiskSpaceOptions,
    pub cache_ttls: CacheTtls,

    pub pushover: PushoverConfig,
    pub apprise: AppriseConfig,

    pub state_dir: String,
}

fn env_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<bool>().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_f64(key: &str, default: f64) -> f64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<f64>().ok())
        .unwrap_or(default)
}

fn env_list(key: &str) -> Vec<String> {
    env::var(key)
        .ok()
        .map(|v| {
            v.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let channels_dvr_host = env::var("channels_dvr_host")
            .ok()
            .filter(|v| !v.is_empty())
            .ok_or(ConfigError::Missing("channels_dvr_host"))?;

        let channels_dvr_port = env::var("channels_dvr_port")
            .ok()
            .and_then(|v| v.parse::<u16>().ok())
            .unwrap_or(8089);

        let tz_name = env::var("tz").unwrap_or_else(|_| "UTC".to_string());
        let tz: Tz = tz_name
            .parse()
            .map_err(|_| ConfigError::Invalid("tz", tz_name.clone()))?;

        let cw_image_source = env::var("cw_image_source").unwrap_or_else(|_| "CHANNEL".to_string());
        let image_source = cw_image_source.parse().unwrap_or(ImagePreference::Channel);

        Ok(Self {
            channels_dvr_host,
            channels_dvr_port,
            tz,
            log_level: env_u64("log_level", 1) as u8,
            log_retention_days: env_u64("log_retention_days", 7) as u32,

            alert_channel_watching: env_bool("alert_channel_watching", true),
            alert_vod_watching: env_bool("alert_vod_watching", true),
            alert_disk_space: env_bool("alert_disk_space", true),
            alert_recording_events: env_bool("alert_recording_events", true),
            stream_count: env_bool("stream_count", true),

            channel_watching: ChannelWatchingOptions {
                enabled: env_bool("alert_channel_watching", true),
                show_channel: env_bool("cw_channel", true),
                show_resolution: env_bool("cw_resolution", true),
                show_device: env_bool("cw_device", true),
                show_source: env_bool("cw_source", true),
                show_ip: env_bool("cw_ip", true),
                show_program: env_bool("cw_program", true),
                image_source,
            },
            recording_events: RecordingEventsOptions {
                enabled: env_bool("alert_recording_events", true),
                alert_scheduled: env_bool("rd_alert_scheduled", true),
                alert_started: env_bool("rd_alert_started", true),
                alert_completed: env_bool("rd_alert_completed", true),
                alert_cancelled: env_bool("rd_alert_cancelled", true),
            },
            vod_watching: VodWatchingOptions {
                enabled: env_bool("alert_vod_watching", true),
                alert_cooldown_secs: env_u64("vod_alert_cooldown", 300),
                significant_threshold_secs: env_u64("vod_significant_threshold", 300),
            },
            disk_space: DiskSpaceOptions {
                enabled: env_bool("alert_disk_space", true),
                threshold_percent: env_f64("ds_threshold_percent", 10.0),
                threshold_gb: env_f64("ds_threshold_gb", 50.0),
            },
            cache_ttls: {
                let defaults = CacheTtls::defaults();
                CacheTtls {
                    channel_secs: env_u64("channel_cache_ttl", defaults.channel_secs),
                    program_secs: env_u64("program_cache_ttl", defaults.program_secs),
                    job_secs: env_u64("job_cache_ttl", defaults.job_secs),
                    vod_secs: env_u64("vod_cache_ttl", defaults.vod_secs),
                }
            },

            pushover: PushoverConfig {
                user_key: env::var("pushover_user_key").ok(),
                api_token: env::var("pushover_api_token").ok(),
            },
            apprise: AppriseConfig {
                service_urls: env_list("apprise_service_urls"),
                email_to: env::var("apprise_email_to").ok(),
            },

            state_dir: env::var("dvr_sentinel_state_dir").unwrap_or_else(|_| ".".to_string()),
        })
    }

    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.channels_dvr_host, self.channels_dvr_port)
    }
}

pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(15);
pub const STANDBY_RETRY_INTERVAL: Duration = Duration::from_secs(30);
