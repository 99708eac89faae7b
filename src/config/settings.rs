use std::fmt;
use std::str::FromStr;

use anyhow::Result;

use super::Config;
use crate::account::Proxy;
use crate::consts::{
    DEFAULT_LOG_LEVEL, DEFAULT_MAX_TASKS, DEFAULT_MAX_TASKS_PER_PROXY, DEFAULT_MIN_ACCOUNT_AGE_DAYS,
    DEFAULT_MIN_FOLLOWERS,
};
use crate::error::ConfigError;

/// Keys understood by [`Settings::load`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingKey {
    MaxTasks,
    MaxTasksPerProxy,
    DefaultProxy,
    MinAccountAgeDays,
    MinFollowers,
    IgnoreWarnings,
    InviteCode,
    LogLevel,
}

impl SettingKey {
    pub const ALL: &[SettingKey] = &[
        SettingKey::MaxTasks,
        SettingKey::MaxTasksPerProxy,
        SettingKey::DefaultProxy,
        SettingKey::MinAccountAgeDays,
        SettingKey::MinFollowers,
        SettingKey::IgnoreWarnings,
        SettingKey::InviteCode,
        SettingKey::LogLevel,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SettingKey::MaxTasks => "max_tasks",
            SettingKey::MaxTasksPerProxy => "max_tasks_per_proxy",
            SettingKey::DefaultProxy => "default_proxy",
            SettingKey::MinAccountAgeDays => "min_account_age_days",
            SettingKey::MinFollowers => "min_followers",
            SettingKey::IgnoreWarnings => "ignore_warnings",
            SettingKey::InviteCode => "invite_code",
            SettingKey::LogLevel => "log_level",
        }
    }
}

impl fmt::Display for SettingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SettingKey {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, ConfigError> {
        SettingKey::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| ConfigError::InvalidValue {
                key: s.to_string(),
                reason: "unknown setting".to_string(),
            })
    }
}

/// Typed run settings. Passed explicitly to the scheduler and the stages.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// Global concurrency ceiling.
    pub max_tasks: usize,
    /// Concurrency ceiling per proxy (or per "direct" route).
    pub max_tasks_per_proxy: usize,
    /// Used by accounts without their own proxy.
    pub default_proxy: Option<Proxy>,
    pub min_account_age_days: Option<i64>,
    pub min_followers: Option<u64>,
    /// Downgrade age/follower rejections to warnings.
    pub ignore_warnings: bool,
    pub invite_code: Option<String>,
    pub log_level: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_tasks: DEFAULT_MAX_TASKS,
            max_tasks_per_proxy: DEFAULT_MAX_TASKS_PER_PROXY,
            default_proxy: None,
            min_account_age_days: Some(DEFAULT_MIN_ACCOUNT_AGE_DAYS),
            min_followers: Some(DEFAULT_MIN_FOLLOWERS),
            ignore_warnings: false,
            invite_code: None,
            log_level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

impl Settings {
    /// Defaults overlaid with whatever the config store holds.
    pub fn load(config: &Config) -> Result<Self> {
        let mut settings = Settings::default();
        for key in SettingKey::ALL {
            if let Some(value) = config.get(key.as_str())? {
                settings.apply(*key, &value)?;
            }
        }
        Ok(settings)
    }

    /// Validate and store one raw value.
    pub fn apply(&mut self, key: SettingKey, raw: &str) -> Result<(), ConfigError> {
        let raw = raw.trim();
        match key {
            SettingKey::MaxTasks => self.max_tasks = positive(key, raw)?,
            SettingKey::MaxTasksPerProxy => self.max_tasks_per_proxy = positive(key, raw)?,
            SettingKey::DefaultProxy => {
                self.default_proxy = optional(raw)
                    .map(|p| Proxy::parse(p).map_err(|e| invalid(key, e)))
                    .transpose()?
            }
            SettingKey::MinAccountAgeDays => {
                self.min_account_age_days = optional(raw).map(|v| non_negative(key, v)).transpose()?
            }
            SettingKey::MinFollowers => {
                self.min_followers = optional(raw)
                    .map(|v| v.parse::<u64>().map_err(|e| invalid(key, e)))
                    .transpose()?
            }
            SettingKey::IgnoreWarnings => {
                self.ignore_warnings = raw.parse::<bool>().map_err(|e| invalid(key, e))?
            }
            SettingKey::InviteCode => self.invite_code = optional(raw).map(str::to_string),
            SettingKey::LogLevel => {
                if raw.is_empty() {
                    return Err(invalid(key, "empty log level"));
                }
                self.log_level = raw.to_string()
            }
        }
        Ok(())
    }
}

/// `""` and `"none"` clear an optional setting.
fn optional(raw: &str) -> Option<&str> {
    match raw {
        "" | "none" => None,
        v => Some(v),
    }
}

fn invalid(key: SettingKey, reason: impl fmt::Display) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        reason: reason.to_string(),
    }
}

fn positive(key: SettingKey, raw: &str) -> Result<usize, ConfigError> {
    let value: i64 = raw.parse().map_err(|e| invalid(key, e))?;
    if value <= 0 {
        return Err(ConfigError::NonPositiveLimit {
            name: key.as_str(),
            value,
        });
    }
    Ok(value as usize)
}

fn non_negative(key: SettingKey, raw: &str) -> Result<i64, ConfigError> {
    let value: i64 = raw.parse().map_err(|e| invalid(key, e))?;
    if value < 0 {
        return Err(invalid(key, "must not be negative"));
    }
    Ok(value)
}
