//! Outbox pipeline configuration.
//!
//! Every knob of the background loop lives here; nothing in the loop is a
//! hard-coded constant. Values come from defaults, a deserialized file
//! section, or `COURIER_*` environment variables (in that order of overlay).

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::{CourierError, CourierResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutboxConfig {
    #[serde(with = "duration_ms", rename = "poll_interval_ms")]
    pub poll_interval: Duration,

    /// Max Pending records selected per cycle.
    pub batch_size: usize,

    /// Max Completed records deleted per cycle.
    pub cleanup_batch_size: usize,

    pub max_retries: u32,

    /// Stop polling after this long without processing a record.
    #[serde(with = "duration_ms", rename = "idle_timeout_ms")]
    pub idle_timeout: Duration,

    /// Reclaim Processing records older than this. `None` disables reclaim.
    #[serde(with = "opt_duration_ms", rename = "stale_processing_ms")]
    pub stale_processing_timeout: Option<Duration>,

    /// Restart a Stopped poller when a new event is published.
    pub resume_on_publish: bool,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            batch_size: 100,
            cleanup_batch_size: 100,
            max_retries: 3,
            idle_timeout: Duration::from_secs(10 * 60),
            stale_processing_timeout: None,
            resume_on_publish: false,
        }
    }
}

impl OutboxConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overlaid with `COURIER_*` environment variables.
    pub fn from_env() -> CourierResult<Self> {
        Self::default().overlay_env(|key| std::env::var(key).ok())
    }

    /// Overlay values from an arbitrary key lookup (env, test maps, ...).
    pub fn overlay_env<F>(mut self, lookup: F) -> CourierResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(ms) = parse_var::<u64, _>(&lookup, "COURIER_POLL_INTERVAL_MS")? {
            self.poll_interval = Duration::from_millis(ms);
        }
        if let Some(n) = parse_var(&lookup, "COURIER_BATCH_SIZE")? {
            self.batch_size = n;
        }
        if let Some(n) = parse_var(&lookup, "COURIER_CLEANUP_BATCH_SIZE")? {
            self.cleanup_batch_size = n;
        }
        if let Some(n) = parse_var(&lookup, "COURIER_MAX_RETRIES")? {
            self.max_retries = n;
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, "COURIER_IDLE_TIMEOUT_MS")? {
            self.idle_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, "COURIER_STALE_PROCESSING_MS")? {
            self.stale_processing_timeout = (ms > 0).then(|| Duration::from_millis(ms));
        }
        if let Some(flag) = parse_var(&lookup, "COURIER_RESUME_ON_PUBLISH")? {
            self.resume_on_publish = flag;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> CourierResult<()> {
        if self.poll_interval.is_zero() {
            return Err(CourierError::Config("poll_interval must be > 0".into()));
        }
        if self.batch_size == 0 {
            return Err(CourierError::Config("batch_size must be > 0".into()));
        }
        if self.cleanup_batch_size == 0 {
            return Err(CourierError::Config("cleanup_batch_size must be > 0".into()));
        }
        if self.max_retries == 0 {
            return Err(CourierError::Config("max_retries must be > 0".into()));
        }
        Ok(())
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    pub fn with_cleanup_batch_size(mut self, size: usize) -> Self {
        self.cleanup_batch_size = size;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn with_stale_processing_timeout(mut self, timeout: Duration) -> Self {
        self.stale_processing_timeout = Some(timeout);
        self
    }

    pub fn with_resume_on_publish(mut self, resume: bool) -> Self {
        self.resume_on_publish = resume;
        self
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> CourierResult<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| CourierError::Config(format!("{key}={raw:?}: {e}"))),
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

mod opt_duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_some(&(d.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(d).map(|ms| ms.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_reference_values() {
        let config = OutboxConfig::default();
        assert_eq!(config.poll_interval, Duration::from_secs(5));
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.cleanup_batch_size, 100);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.idle_timeout, Duration::from_secs(600));
        assert!(config.stale_processing_timeout.is_none());
        assert!(!config.resume_on_publish);
    }

    #[test]
    fn env_overlays_defaults() {
        let config = OutboxConfig::default()
            .overlay_env(lookup(&[
                ("COURIER_POLL_INTERVAL_MS", "250"),
                ("COURIER_MAX_RETRIES", "5"),
                ("COURIER_STALE_PROCESSING_MS", "60000"),
                ("COURIER_RESUME_ON_PUBLISH", "true"),
            ]))
            .unwrap();

        assert_eq!(config.poll_interval, Duration::from_millis(250));
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.stale_processing_timeout, Some(Duration::from_secs(60)));
        assert!(config.resume_on_publish);
        assert_eq!(config.batch_size, 100);
    }

    #[test]
    fn malformed_env_value_is_config_error() {
        let err = OutboxConfig::default()
            .overlay_env(lookup(&[("COURIER_BATCH_SIZE", "lots")]))
            .unwrap_err();
        assert!(matches!(err, CourierError::Config(msg) if msg.contains("COURIER_BATCH_SIZE")));
    }

    #[test]
    fn zero_retries_is_rejected() {
        let err = OutboxConfig::default()
            .with_max_retries(0)
            .validate()
            .unwrap_err();
        assert!(matches!(err, CourierError::Config(_)));
    }

    #[test]
    fn deserializes_partial_json_section() {
        let config: OutboxConfig =
            serde_json::from_str(r#"{"poll_interval_ms": 1000, "batch_size": 10}"#).unwrap();
        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.max_retries, 3);
    }
}
