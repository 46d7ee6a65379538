//! Core configuration
//!
//! Defaults suit a single device talking to a local relay. Every field can be
//! overridden through a `SIHBOLT_*` environment variable.

use std::path::PathBuf;
use std::time::Duration;

use crate::crypto::keys::ONE_TIME_PREKEY_DEFAULT;
use crate::crypto::ratchet::MAX_SKIP;
use crate::crypto::sessions::MESSAGE_KEY_CACHE_LIMIT;
use crate::error::{CoreError, CoreResult};

/// Configuration for the session manager and its collaborators
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Relay base URL
    pub api_url: String,
    /// Project API key sent as `apikey`
    pub api_key: String,
    /// User access token; the API key is used as bearer when absent
    pub access_token: Option<String>,
    /// SQLite file holding device keys and sessions
    pub database_path: PathBuf,
    pub device_label: String,
    pub one_time_prekey_count: usize,
    pub message_key_cache_limit: usize,
    pub max_skipped_message_keys: u32,
    pub request_timeout_secs: u64,
    pub telemetry_enabled: bool,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            api_url: "http://127.0.0.1:54321".to_string(),
            api_key: String::new(),
            access_token: None,
            database_path: PathBuf::from("sihbolt.db"),
            device_label: "primary".to_string(),
            one_time_prekey_count: ONE_TIME_PREKEY_DEFAULT,
            message_key_cache_limit: MESSAGE_KEY_CACHE_LIMIT,
            max_skipped_message_keys: MAX_SKIP,
            request_timeout_secs: 30,
            telemetry_enabled: true,
        }
    }
}

impl CoreConfig {
    /// Defaults overridden by the process environment
    pub fn from_env() -> CoreResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Defaults overridden by `lookup`, which maps variable names to values
    pub fn from_lookup<F>(lookup: F) -> CoreResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(value) = lookup("SIHBOLT_API_URL") {
            config.api_url = value;
        }
        if let Some(value) = lookup("SIHBOLT_API_KEY") {
            config.api_key = value;
        }
        if let Some(value) = lookup("SIHBOLT_ACCESS_TOKEN") {
            config.access_token = Some(value).filter(|token| !token.is_empty());
        }
        if let Some(value) = lookup("SIHBOLT_DATABASE_PATH") {
            config.database_path = PathBuf::from(value);
        }
        if let Some(value) = lookup("SIHBOLT_DEVICE_LABEL") {
            config.device_label = value;
        }
        if let Some(value) = lookup("SIHBOLT_ONE_TIME_PREKEYS") {
            config.one_time_prekey_count = parse_number("SIHBOLT_ONE_TIME_PREKEYS", &value)?;
        }
        if let Some(value) = lookup("SIHBOLT_MESSAGE_KEY_CACHE_LIMIT") {
            config.message_key_cache_limit =
                parse_number("SIHBOLT_MESSAGE_KEY_CACHE_LIMIT", &value)?;
        }
        if let Some(value) = lookup("SIHBOLT_MAX_SKIP") {
            config.max_skipped_message_keys = parse_number("SIHBOLT_MAX_SKIP", &value)?;
        }
        if let Some(value) = lookup("SIHBOLT_REQUEST_TIMEOUT_SECS") {
            config.request_timeout_secs = parse_number("SIHBOLT_REQUEST_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = lookup("SIHBOLT_TELEMETRY") {
            config.telemetry_enabled = parse_flag("SIHBOLT_TELEMETRY", &value)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject values the core cannot work with
    pub fn validate(&self) -> CoreResult<()> {
        let url = url::Url::parse(&self.api_url)
            .map_err(|e| CoreError::Config(format!("Invalid API URL {}: {}", self.api_url, e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(CoreError::Config(format!(
                "API URL must be http or https, got {}",
                url.scheme()
            )));
        }

        if self.device_label.trim().is_empty() {
            return Err(CoreError::Config("Device label must not be empty".to_string()));
        }
        if self.message_key_cache_limit == 0 {
            return Err(CoreError::Config(
                "Message key cache limit must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn parse_number<T: std::str::FromStr>(name: &str, value: &str) -> CoreResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| CoreError::Config(format!("{} must be a non-negative integer, got {:?}", name, value)))
}

fn parse_flag(name: &str, value: &str) -> CoreResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(CoreError::Config(format!("{} must be a boolean, got {:?}", name, value))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = CoreConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.device_label, "primary");
        assert_eq!(config.one_time_prekey_count, 10);
        assert_eq!(config.message_key_cache_limit, 128);
        assert_eq!(config.max_skipped_message_keys, 1000);
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
        assert!(config.telemetry_enabled);
        assert!(config.access_token.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = CoreConfig::from_lookup(lookup(&[
            ("SIHBOLT_API_URL", "https://relay.example.com"),
            ("SIHBOLT_ACCESS_TOKEN", "token"),
            ("SIHBOLT_DEVICE_LABEL", "laptop"),
            ("SIHBOLT_ONE_TIME_PREKEYS", "25"),
            ("SIHBOLT_MAX_SKIP", " 50 "),
            ("SIHBOLT_TELEMETRY", "off"),
        ]))
        .unwrap();

        assert_eq!(config.api_url, "https://relay.example.com");
        assert_eq!(config.access_token.as_deref(), Some("token"));
        assert_eq!(config.device_label, "laptop");
        assert_eq!(config.one_time_prekey_count, 25);
        assert_eq!(config.max_skipped_message_keys, 50);
        assert!(!config.telemetry_enabled);
    }

    #[test]
    fn test_invalid_values() {
        let bad_number = CoreConfig::from_lookup(lookup(&[("SIHBOLT_ONE_TIME_PREKEYS", "-1")]));
        assert!(matches!(bad_number, Err(CoreError::Config(_))));

        let bad_url = CoreConfig::from_lookup(lookup(&[("SIHBOLT_API_URL", "ftp://relay")]));
        assert!(matches!(bad_url, Err(CoreError::Config(_))));

        let bad_flag = CoreConfig::from_lookup(lookup(&[("SIHBOLT_TELEMETRY", "maybe")]));
        assert!(matches!(bad_flag, Err(CoreError::Config(_))));

        let empty_label = CoreConfig::from_lookup(lookup(&[("SIHBOLT_DEVICE_LABEL", "  ")]));
        assert!(matches!(empty_label, Err(CoreError::Config(_))));
    }
}
