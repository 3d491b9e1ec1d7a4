//! Runtime configuration, loaded from the environment: explicit defaults,
//! eager validation, `.env` support for local development.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::AofError;

#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub poll_interval: Duration,
    pub max_concurrent_dispatches: u32,
    pub default_lease_ttl: Duration,
    pub max_lease_renewals: u32,
    pub spawn_timeout: Duration,
    pub min_dispatch_interval: Option<Duration>,
    pub max_dispatches_per_poll: u32,
    pub dry_run: bool,
}

impl Config {
    pub fn load() -> Result<Self, AofError> {
        match dotenvy::dotenv() {
            Ok(path) => tracing::info!(?path, "loaded .env file"),
            Err(e) => tracing::debug!(%e, "no .env file loaded"),
        }

        let data_dir = env::var("AOF_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./aof-data"));

        let poll_interval = parse_ms_env("AOF_POLL_INTERVAL_MS", 10_000)?;
        let max_concurrent_dispatches = parse_env("AOF_MAX_CONCURRENT_DISPATCHES", 10)?;
        let default_lease_ttl = parse_ms_env("AOF_DEFAULT_LEASE_TTL_MS", 300_000)?;
        let max_lease_renewals = parse_env("AOF_MAX_LEASE_RENEWALS", 10)?;
        let spawn_timeout = parse_ms_env("AOF_SPAWN_TIMEOUT_MS", 30_000)?;
        let min_dispatch_interval_ms: u64 = parse_env("AOF_MIN_DISPATCH_INTERVAL_MS", 0)?;
        let min_dispatch_interval = if min_dispatch_interval_ms == 0 {
            None
        } else {
            Some(Duration::from_millis(min_dispatch_interval_ms))
        };
        let max_dispatches_per_poll = parse_env("AOF_MAX_DISPATCHES_PER_POLL", 5)?;
        let dry_run = parse_bool_env("AOF_DRY_RUN", false)?;

        if max_concurrent_dispatches == 0 {
            return Err(AofError::Config(
                "AOF_MAX_CONCURRENT_DISPATCHES must be greater than zero".into(),
            ));
        }

        Ok(Self {
            data_dir,
            poll_interval,
            max_concurrent_dispatches,
            default_lease_ttl,
            max_lease_renewals,
            spawn_timeout,
            min_dispatch_interval,
            max_dispatches_per_poll,
            dry_run,
        })
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T, AofError> {
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| AofError::Config(format!("{key} is not a valid value: {raw:?}"))),
        Err(_) => Ok(default),
    }
}

fn parse_ms_env(key: &str, default_ms: u64) -> Result<Duration, AofError> {
    let ms: u64 = parse_env(key, default_ms)?;
    Ok(Duration::from_millis(ms))
}

fn parse_bool_env(key: &str, default: bool) -> Result<bool, AofError> {
    match env::var(key) {
        Ok(raw) => match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" => Ok(true),
            "0" | "false" | "no" => Ok(false),
            _ => Err(AofError::Config(format!("{key} is not a valid boolean: {raw:?}"))),
        },
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn defaults_apply_with_no_env() {
        for key in [
            "AOF_DATA_DIR",
            "AOF_POLL_INTERVAL_MS",
            "AOF_MAX_CONCURRENT_DISPATCHES",
            "AOF_DRY_RUN",
        ] {
            env::remove_var(key);
        }
        let config = Config::load().unwrap();
        assert_eq!(config.poll_interval, Duration::from_secs(10));
        assert_eq!(config.max_concurrent_dispatches, 10);
        assert!(!config.dry_run);
    }

    #[test]
    #[serial]
    fn rejects_zero_concurrency_cap() {
        env::set_var("AOF_MAX_CONCURRENT_DISPATCHES", "0");
        let err = Config::load().unwrap_err();
        env::remove_var("AOF_MAX_CONCURRENT_DISPATCHES");
        assert!(matches!(err, AofError::Config(_)));
    }

    #[test]
    #[serial]
    fn parses_dry_run_flag() {
        env::set_var("AOF_DRY_RUN", "true");
        let config = Config::load().unwrap();
        env::remove_var("AOF_DRY_RUN");
        assert!(config.dry_run);
    }
}
