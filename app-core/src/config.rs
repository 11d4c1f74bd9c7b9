use crate::errors::{AppError, AppResult};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

const KEY_API_BASE_URL: &str = "API_BASE_URL";
const KEY_REQUEST_TIMEOUT: &str = "REQUEST_TIMEOUT_SECS";
const KEY_DATA_DIR: &str = "DATA_DIR";
const KEY_DEVICE_SECRET: &str = "DEVICE_SECRET";
const KEY_LOG_HTTP_BODIES: &str = "LOG_HTTP_BODIES";

/// Default request timeout applied to every backend call.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_REQUEST_TIMEOUT_SECS: u32 = 120;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Environment {
    Development,
    Production,
    Test,
}

impl Environment {
    fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "production" | "prod" => Environment::Production,
            "test" | "testing" => Environment::Test,
            _ => Environment::Development,
        }
    }
}

/// Raw key/value configuration with per-environment defaults and `FESTIVAL_*` overrides.
#[derive(Debug, Clone)]
pub struct ConfigMap {
    environment: Environment,
    values: HashMap<String, String>,
}

impl ConfigMap {
    pub fn new(environment: Environment) -> Self {
        let mut config = Self {
            environment,
            values: HashMap::new(),
        };
        config.load_defaults();
        config
    }

    /// Build from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable lookup, e.g. a map in tests.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let environment = lookup("FESTIVAL_ENVIRONMENT")
            .map(|value| Environment::parse(&value))
            .unwrap_or(Environment::Development);
        let mut config = Self::new(environment);
        config.apply_overrides(lookup);
        config
    }

    pub fn environment(&self) -> Environment {
        self.environment
    }

    pub fn get(&self, key: &str) -> Option<&String> {
        self.values.get(key)
    }

    pub fn get_required(&self, key: &str) -> AppResult<&String> {
        self.values.get(key).ok_or_else(|| {
            AppError::ValidationError(format!("Required config key '{}' not found", key))
        })
    }

    pub fn get_bool_with_default(&self, key: &str, default: bool) -> AppResult<bool> {
        match self.values.get(key) {
            Some(value) => parse_bool_flag(value, key),
            None => Ok(default),
        }
    }

    pub fn get_u32_with_default(&self, key: &str, default: u32) -> AppResult<u32> {
        match self.values.get(key) {
            Some(value) => parse_u32_value(value, key),
            None => Ok(default),
        }
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    fn load_defaults(&mut self) {
        self.values
            .insert(KEY_REQUEST_TIMEOUT.to_string(), "10".to_string());

        match self.environment {
            Environment::Production => {
                self.values.insert(
                    KEY_API_BASE_URL.to_string(),
                    "https://api.festival-points.app".to_string(),
                );
                self.values
                    .insert(KEY_LOG_HTTP_BODIES.to_string(), "false".to_string());
            }
            Environment::Development => {
                self.values.insert(
                    KEY_API_BASE_URL.to_string(),
                    "http://localhost:8080".to_string(),
                );
                self.values
                    .insert(KEY_LOG_HTTP_BODIES.to_string(), "true".to_string());
                self.values.insert(
                    KEY_DEVICE_SECRET.to_string(),
                    "festival-development-device".to_string(),
                );
            }
            Environment::Test => {
                self.values.insert(
                    KEY_API_BASE_URL.to_string(),
                    "http://127.0.0.1:8080".to_string(),
                );
                self.values
                    .insert(KEY_LOG_HTTP_BODIES.to_string(), "true".to_string());
                self.values.insert(
                    KEY_DEVICE_SECRET.to_string(),
                    "festival-test-device".to_string(),
                );
            }
        }
    }

    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let env_mappings = [
            ("FESTIVAL_API_BASE_URL", KEY_API_BASE_URL),
            ("FESTIVAL_REQUEST_TIMEOUT_SECS", KEY_REQUEST_TIMEOUT),
            ("FESTIVAL_DATA_DIR", KEY_DATA_DIR),
            ("FESTIVAL_DEVICE_SECRET", KEY_DEVICE_SECRET),
            ("FESTIVAL_LOG_HTTP_BODIES", KEY_LOG_HTTP_BODIES),
        ];

        for (env_var, config_key) in &env_mappings {
            if let Some(value) = lookup(env_var) {
                if value.trim().is_empty() {
                    log::warn!("Environment variable {} is empty", env_var);
                    continue;
                }

                if value.chars().any(|c| c.is_control()) {
                    log::warn!(
                        "Environment variable {} contains control characters, ignoring",
                        env_var
                    );
                    continue;
                }

                self.values.insert(config_key.to_string(), value);
                log::debug!(
                    "Loaded configuration {} from environment variable {}",
                    config_key,
                    env_var
                );
            }
        }
    }
}

/// Typed configuration consumed by the client core.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub environment: Environment,
    pub api_base_url: String,
    pub request_timeout: Duration,
    /// Root of on-disk state; `None` keeps everything in memory.
    pub data_dir: Option<PathBuf>,
    pub device_secret: SecretString,
    pub log_http_bodies: bool,
}

impl ClientConfig {
    pub fn from_env() -> AppResult<Self> {
        Self::from_map(&ConfigMap::from_env())
    }

    pub fn from_map(map: &ConfigMap) -> AppResult<Self> {
        let api_base_url = normalize_base_url(map.get_required(KEY_API_BASE_URL)?)?;

        let timeout_secs = map.get_u32_with_default(KEY_REQUEST_TIMEOUT, 10)?;
        if timeout_secs == 0 || timeout_secs > MAX_REQUEST_TIMEOUT_SECS {
            return Err(AppError::ValidationError(format!(
                "Request timeout must be between 1 and {} seconds",
                MAX_REQUEST_TIMEOUT_SECS
            )));
        }

        let device_secret = map.get_required(KEY_DEVICE_SECRET).map_err(|_| {
            AppError::ValidationError(format!(
                "Required configuration key '{}' is missing for {} environment",
                KEY_DEVICE_SECRET,
                format!("{:?}", map.environment()).to_lowercase()
            ))
        })?;

        Ok(Self {
            environment: map.environment(),
            api_base_url,
            request_timeout: Duration::from_secs(u64::from(timeout_secs)),
            data_dir: map.get(KEY_DATA_DIR).map(PathBuf::from),
            device_secret: SecretString::from(device_secret.clone()),
            log_http_bodies: map.get_bool_with_default(KEY_LOG_HTTP_BODIES, false)?,
        })
    }

    /// Configuration pointing at an explicit backend, everything else at test defaults.
    pub fn for_base_url(base_url: impl AsRef<str>) -> AppResult<Self> {
        let mut map = ConfigMap::new(Environment::Test);
        map.set(KEY_API_BASE_URL, base_url.as_ref());
        Self::from_map(&map)
    }

    pub fn is_production(&self) -> bool {
        self.environment == Environment::Production
    }
}

fn normalize_base_url(raw: &str) -> AppResult<String> {
    let trimmed = raw.trim().trim_end_matches('/');
    if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
        return Err(AppError::ValidationError(format!(
            "API base URL must use http or https: {}",
            raw
        )));
    }
    Ok(trimmed.to_string())
}

fn parse_bool_flag(value: &str, key: &str) -> AppResult<bool> {
    let normalized = value.trim().to_ascii_lowercase();
    match normalized.as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(AppError::ValidationError(format!(
            "Invalid boolean value '{}' for key '{}'",
            value, key
        ))),
    }
}

fn parse_u32_value(value: &str, key: &str) -> AppResult<u32> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(AppError::ValidationError(format!(
            "Configuration key '{}' cannot be empty",
            key
        )));
    }

    trimmed.parse::<u32>().map_err(|_| {
        AppError::ValidationError(format!(
            "Invalid numeric value '{}' for key '{}'",
            value, key
        ))
    })
}
