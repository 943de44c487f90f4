use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use listwatch_client::BrowserOptions;
use listwatch_core::error::AppError;
use listwatch_core::job::DispatcherConfig;
use listwatch_core::job_queue::RetentionPolicy;
use listwatch_core::throttle::RateConfig;
use listwatch_store::StoreConfig;

/// Process configuration, read from the environment.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: IpAddr,
    pub port: u16,
    pub api_key: Option<String>,
    pub store: StoreConfig,
    pub dispatcher: DispatcherConfig,
    pub retention: RetentionPolicy,
    pub rate: RateConfig,
    pub browser: BrowserOptions,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 8000,
            api_key: None,
            store: StoreConfig::default(),
            dispatcher: DispatcherConfig::default(),
            retention: RetentionPolicy::KeepAll,
            rate: RateConfig::default(),
            browser: BrowserOptions::default(),
        }
    }
}

impl ServerConfig {
    /// Read configuration from environment variables.
    ///
    /// - `LISTWATCH_BIND` (default `127.0.0.1`)
    /// - `LISTWATCH_PORT` (default `8000`)
    /// - `LISTWATCH_API_KEY` (unset disables the `/v1` API)
    /// - `LISTWATCH_DATA_DIR` (default `data/cl`)
    /// - `LISTWATCH_MAX_CONCURRENT_JOBS` (default `4`)
    /// - `LISTWATCH_JOB_RETENTION` (number of jobs kept; unset keeps all)
    /// - `LISTWATCH_BASE_DELAY_SECS` (default `1.0`)
    /// - `LISTWATCH_BLOCK_BACKOFF_SECS` (default `360`)
    /// - `LISTWATCH_HEADLESS` (default `true`)
    /// - `LISTWATCH_NAV_TIMEOUT_SECS` (default `30`)
    /// - `CHROME_BIN` (optional browser binary)
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`ServerConfig::from_env`] over an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let defaults = Self::default();
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let bind = parse_or(&var, "LISTWATCH_BIND", defaults.bind)?;
        let port = parse_or(&var, "LISTWATCH_PORT", defaults.port)?;

        let store = match var("LISTWATCH_DATA_DIR") {
            Some(dir) => StoreConfig::new(dir),
            None => defaults.store,
        };

        let max_jobs: usize = parse_or(
            &var,
            "LISTWATCH_MAX_CONCURRENT_JOBS",
            defaults.dispatcher.max_concurrent_jobs,
        )?;
        if max_jobs == 0 {
            return Err(AppError::ConfigError(
                "LISTWATCH_MAX_CONCURRENT_JOBS must be at least 1".into(),
            ));
        }

        let retention = match var("LISTWATCH_JOB_RETENTION") {
            None => RetentionPolicy::KeepAll,
            Some(raw) if raw.eq_ignore_ascii_case("all") => RetentionPolicy::KeepAll,
            Some(raw) => match raw.trim().parse::<usize>() {
                Ok(n) if n > 0 => RetentionPolicy::KeepLatest(n),
                _ => {
                    return Err(AppError::ConfigError(format!(
                        "Invalid LISTWATCH_JOB_RETENTION '{raw}': must be a positive integer or 'all'"
                    )));
                }
            },
        };

        let base_delay = seconds_or(&var, "LISTWATCH_BASE_DELAY_SECS", defaults.rate.baseline)?;
        let backoff = seconds_or(
            &var,
            "LISTWATCH_BLOCK_BACKOFF_SECS",
            defaults.rate.block_backoff,
        )?;

        let headless = match var("LISTWATCH_HEADLESS") {
            None => defaults.browser.headless,
            Some(raw) => parse_bool(&raw).ok_or_else(|| {
                AppError::ConfigError(format!(
                    "Invalid LISTWATCH_HEADLESS '{raw}': expected true or false"
                ))
            })?,
        };
        let nav_timeout = seconds_or(
            &var,
            "LISTWATCH_NAV_TIMEOUT_SECS",
            defaults.browser.nav_timeout,
        )?;

        Ok(Self {
            bind,
            port,
            api_key: var("LISTWATCH_API_KEY"),
            store,
            dispatcher: defaults.dispatcher.with_max_concurrent_jobs(max_jobs),
            retention,
            rate: RateConfig::new(base_delay, backoff),
            browser: BrowserOptions {
                headless,
                chrome_bin: var("CHROME_BIN").map(PathBuf::from),
                nav_timeout,
                ..defaults.browser
            },
        })
    }

    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }
}

fn parse_or<T: FromStr>(
    var: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, AppError> {
    match var(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| AppError::ConfigError(format!("Invalid {key} '{raw}'"))),
    }
}

fn seconds_or(
    var: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: Duration,
) -> Result<Duration, AppError> {
    let secs: f64 = parse_or(var, key, default.as_secs_f64())?;
    if !secs.is_finite() || secs < 0.0 {
        return Err(AppError::ConfigError(format!(
            "Invalid {key} '{secs}': must be a non-negative number of seconds"
        )));
    }
    Ok(Duration::from_secs_f64(secs))
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
