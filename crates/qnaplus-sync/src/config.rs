//! Pipeline configuration.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use qnaplus_sync_realtime::BackoffPolicy;

use crate::error::{Result, SyncError};

/// Configuration for the sync pipeline.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// SQLite database file.
    pub database_path: PathBuf,
    /// Six-field cron expression driving reconciliation and dispatch.
    pub schedule: String,
    /// Ids per failure-pass range fetch.
    pub failure_batch_size: usize,
    /// Pause between failure-pass batches.
    pub failure_batch_interval: Duration,
    /// Upper bound on any single upstream fetch.
    pub fetch_timeout: Duration,
    /// Micro-batch debounce window.
    pub debounce: Duration,
    /// Events per notifier call.
    pub notify_chunk_size: usize,
    /// How long a precheck response waits for its acknowledgement.
    pub precheck_timeout: Duration,
    /// Resubscribe policy for expired channel credentials.
    pub resubscribe: BackoffPolicy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("qnaplus.db"),
            schedule: "0 */5 * * * *".to_string(),
            failure_batch_size: 10,
            failure_batch_interval: Duration::from_millis(1500),
            fetch_timeout: Duration::from_secs(120),
            debounce: Duration::from_millis(1000),
            notify_chunk_size: 10,
            precheck_timeout: Duration::from_millis(10_000),
            resubscribe: BackoffPolicy::default(),
        }
    }
}

impl SyncConfig {
    /// Build a config from the process environment, falling back to
    /// defaults for unset variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(path) = lookup("QNAPLUS_DATABASE_PATH") {
            config.database_path = PathBuf::from(path);
        }
        if let Some(schedule) = lookup("DATABASE_UPDATE_INTERVAL") {
            if schedule.trim().is_empty() {
                return Err(SyncError::Config(
                    "DATABASE_UPDATE_INTERVAL must not be empty".into(),
                ));
            }
            config.schedule = schedule;
        }
        if let Some(n) = parse::<usize>(&lookup, "QNAPLUS_FAILURE_BATCH_SIZE")? {
            config.failure_batch_size = positive("QNAPLUS_FAILURE_BATCH_SIZE", n)?;
        }
        if let Some(ms) = parse::<u64>(&lookup, "QNAPLUS_FAILURE_BATCH_INTERVAL_MS")? {
            config.failure_batch_interval = Duration::from_millis(ms);
        }
        if let Some(secs) = parse::<u64>(&lookup, "QNAPLUS_FETCH_TIMEOUT_SECS")? {
            config.fetch_timeout = Duration::from_secs(positive("QNAPLUS_FETCH_TIMEOUT_SECS", secs)?);
        }
        if let Some(ms) = parse::<u64>(&lookup, "QNAPLUS_DEBOUNCE_MS")? {
            config.debounce = Duration::from_millis(ms);
        }
        if let Some(n) = parse::<usize>(&lookup, "QNAPLUS_NOTIFY_CHUNK_SIZE")? {
            config.notify_chunk_size = positive("QNAPLUS_NOTIFY_CHUNK_SIZE", n)?;
        }
        if let Some(ms) = parse::<u64>(&lookup, "QNAPLUS_PRECHECK_TIMEOUT_MS")? {
            config.precheck_timeout = Duration::from_millis(ms);
        }

        Ok(config)
    }
}

fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|e| SyncError::Config(format!("{key}={raw:?}: {e}")))
        })
        .transpose()
}

fn positive<T: PartialOrd + Default>(key: &str, value: T) -> Result<T> {
    if value > T::default() {
        Ok(value)
    } else {
        Err(SyncError::Config(format!("{key} must be greater than zero")))
    }
}
