//! Global application configuration manager.
//!
//! `AppConfig` is a lazily initialized, globally accessible singleton containing
//! runtime configuration values loaded from environment variables. It provides
//! thread-safe access and mutation for testing or overrides in runtime environments.

use std::env;
use std::str::FromStr;
use std::sync::{OnceLock, PoisonError, RwLock, RwLockReadGuard};

/// Represents the complete application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub env: String,
    pub project_name: String,
    pub log_level: String,
    pub log_file: String,
    pub log_to_stdout: bool,
    pub database_path: String,
    pub host: String,
    pub port: u16,
    pub jwt_secret: String,
    pub jwt_duration_minutes: u64,
    /// Capacity of every connection's outbound queue.
    pub ws_outbound_capacity: usize,
    pub ws_read_timeout_secs: u64,
    pub ws_heartbeat_secs: u64,
    pub ws_write_timeout_secs: u64,
    pub typing_debounce_ms: u64,
    pub dm_cache_ttl_secs: u64,
    /// Per-topic buffer of the in-process broker before slow subscribers lag.
    pub broker_topic_capacity: usize,
}

/// Lazily-initialized, thread-safe singleton instance of `AppConfig`.
static CONFIG_INSTANCE: OnceLock<RwLock<AppConfig>> = OnceLock::new();

fn var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.into())
}

fn parse_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|raw| raw.trim().parse().ok())
        .unwrap_or(default)
}

impl AppConfig {
    /// Loads the configuration from `.env` and environment variables.
    ///
    /// Numeric values that are missing or malformed fall back to their defaults.
    /// `JWT_SECRET` has no sensible default and must be present.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        Self {
            env: var_or("APP_ENV", "development"),
            project_name: var_or("PROJECT_NAME", "chat-relay"),
            log_level: var_or("LOG_LEVEL", "api=info"),
            log_file: var_or("LOG_FILE", "api.log"),
            log_to_stdout: var_or("LOG_TO_STDOUT", "false") == "true",
            database_path: var_or("DATABASE_PATH", "data/chat.db"),
            host: var_or("HOST", "127.0.0.1"),
            port: parse_or("PORT", 3000),
            jwt_secret: env::var("JWT_SECRET").expect("JWT_SECRET is required"),
            jwt_duration_minutes: parse_or("JWT_DURATION_MINUTES", 60 * 24),
            ws_outbound_capacity: parse_or("WS_OUTBOUND_CAPACITY", 256),
            ws_read_timeout_secs: parse_or("WS_READ_TIMEOUT_SECS", 60),
            ws_heartbeat_secs: parse_or("WS_HEARTBEAT_SECS", 54),
            ws_write_timeout_secs: parse_or("WS_WRITE_TIMEOUT_SECS", 10),
            typing_debounce_ms: parse_or("TYPING_DEBOUNCE_MS", 3000),
            dm_cache_ttl_secs: parse_or("DM_CACHE_TTL_SECS", 300),
            broker_topic_capacity: parse_or("BROKER_TOPIC_CAPACITY", 256),
        }
    }

    /// Returns a shared reference to the global configuration.
    pub fn global() -> RwLockReadGuard<'static, AppConfig> {
        CONFIG_INSTANCE
            .get_or_init(|| RwLock::new(AppConfig::from_env()))
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Resets the configuration by reloading from environment variables.
    ///
    /// Useful in tests to clear overrides.
    pub fn reset() {
        if let Some(lock) = CONFIG_INSTANCE.get() {
            let mut guard = lock.write().unwrap_or_else(PoisonError::into_inner);
            *guard = AppConfig::from_env();
        }
    }

    /// Generic internal setter for any field in the config.
    fn set_field<F>(setter: F)
    where
        F: FnOnce(&mut AppConfig),
    {
        let lock = CONFIG_INSTANCE.get_or_init(|| RwLock::new(AppConfig::from_env()));
        let mut guard = lock.write().unwrap_or_else(PoisonError::into_inner);
        setter(&mut guard);
    }

    // --- Per-field setters below ---

    pub fn set_env(value: impl Into<String>) {
        AppConfig::set_field(|cfg| cfg.env = value.into());
    }

    pub fn set_log_level(value: impl Into<String>) {
        AppConfig::set_field(|cfg| cfg.log_level = value.into());
    }

    pub fn set_database_path(value: impl Into<String>) {
        AppConfig::set_field(|cfg| cfg.database_path = value.into());
    }

    pub fn set_port(value: u16) {
        AppConfig::set_field(|cfg| cfg.port = value);
    }

    pub fn set_jwt_secret(value: impl Into<String>) {
        AppConfig::set_field(|cfg| cfg.jwt_secret = value.into());
    }

    pub fn set_ws_outbound_capacity(value: usize) {
        AppConfig::set_field(|cfg| cfg.ws_outbound_capacity = value);
    }

    pub fn set_typing_debounce_ms(value: u64) {
        AppConfig::set_field(|cfg| cfg.typing_debounce_ms = value);
    }

    pub fn set_dm_cache_ttl_secs(value: u64) {
        AppConfig::set_field(|cfg| cfg.dm_cache_ttl_secs = value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn with_secret() {
        // SAFETY: tests touching the process environment run serially.
        unsafe { env::set_var("JWT_SECRET", "test-secret") };
    }

    #[test]
    #[serial]
    fn defaults_match_transport_timings() {
        with_secret();
        unsafe {
            env::remove_var("WS_READ_TIMEOUT_SECS");
            env::remove_var("WS_HEARTBEAT_SECS");
            env::remove_var("WS_OUTBOUND_CAPACITY");
        }
        let cfg = AppConfig::from_env();
        assert_eq!(cfg.ws_read_timeout_secs, 60);
        assert_eq!(cfg.ws_heartbeat_secs, 54);
        assert_eq!(cfg.ws_outbound_capacity, 256);
        assert_eq!(cfg.typing_debounce_ms, 3000);
    }

    #[test]
    #[serial]
    fn malformed_numbers_fall_back_to_defaults() {
        with_secret();
        unsafe { env::set_var("WS_WRITE_TIMEOUT_SECS", "ten") };
        let cfg = AppConfig::from_env();
        assert_eq!(cfg.ws_write_timeout_secs, 10);
        unsafe { env::remove_var("WS_WRITE_TIMEOUT_SECS") };
    }

    #[test]
    #[serial]
    fn setters_override_global_values() {
        with_secret();
        AppConfig::set_ws_outbound_capacity(8);
        assert_eq!(AppConfig::global().ws_outbound_capacity, 8);
        AppConfig::reset();
        assert_eq!(AppConfig::global().ws_outbound_capacity, 256);
    }
}
