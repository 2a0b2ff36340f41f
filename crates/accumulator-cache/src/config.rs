use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, de};
use tracing::level_filters::LevelFilter;

/// Controls the log format
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Auto detect (pretty for tty, simplified for other)
    Auto,
    /// With colors
    Pretty,
    /// Simplified log output
    Simplified,
    /// Dump out JSON lines
    Json,
}

/// Controls the logging system.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Logging {
    /// The log level for the accumulator cache.
    #[serde(deserialize_with = "deserialize_level_filter")]
    pub level: LevelFilter,
    /// Controls the log format.
    pub format: LogFormat,
}

impl Default for Logging {
    fn default() -> Self {
        Logging {
            level: LevelFilter::INFO,
            format: LogFormat::Auto,
        }
    }
}

/// Control the metrics.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Metrics {
    /// host/port of statsd instance
    pub statsd: Option<String>,
    /// The prefix that should be added to all metrics.
    pub prefix: String,
    /// A map containing custom tags and their values.
    ///
    /// These tags will be appended to every metric.
    pub custom_tags: BTreeMap<String, String>,
}

impl Default for Metrics {
    fn default() -> Self {
        Metrics {
            statsd: env::var("STATSD_SERVER").ok(),
            prefix: "accumulators".into(),
            custom_tags: BTreeMap::new(),
        }
    }
}

/// How concurrent refreshes of the same cache interact.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshMode {
    /// Every refresh fetches on its own, the last one to finish publishes its result.
    #[default]
    Overlapping,
    /// At most one fetch is in flight, concurrent refreshes wait for it instead of fetching.
    SingleFlight,
}

/// Fine-tuning of the accumulator refresh policy.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    /// Minimum time between two unforced refreshes.
    #[serde(with = "humantime_serde")]
    pub min_refresh_interval: Duration,

    /// Upper bound for a single accumulator request to the job runtime.
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,

    /// Whether concurrent refreshes may fetch at the same time.
    pub refresh_mode: RefreshMode,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            min_refresh_interval: Duration::from_secs(5),
            request_timeout: Duration::from_secs(10),
            refresh_mode: RefreshMode::Overlapping,
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Refresh policy of the accumulator cache.
    pub cache: CacheConfig,

    /// Configuration for internal logging.
    pub logging: Logging,

    /// Configuration for reporting metrics to a statsd instance.
    pub metrics: Metrics,
}

impl Config {
    pub fn get(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_reader(
                fs::File::open(path).context("failed to open configuration file")?,
            ),
            None => Ok(Config::default()),
        }
    }

    fn from_reader(mut reader: impl std::io::Read) -> Result<Self> {
        let mut config = String::new();
        reader
            .read_to_string(&mut config)
            .context("failed reading config file")?;
        // check for empty files explicitly
        if config.trim().is_empty() {
            anyhow::bail!("config file empty");
        }
        serde_yaml::from_str(&config).context("failed to parse config YAML")
    }
}

#[derive(Debug)]
struct LevelFilterVisitor;

impl de::Visitor<'_> for LevelFilterVisitor {
    type Value = LevelFilter;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> std::fmt::Result {
        write!(
            formatter,
            r#"one of the strings "off", "error", "warn", "info", "debug", or "trace""#
        )
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        match v {
            "off" => Ok(LevelFilter::OFF),
            "error" => Ok(LevelFilter::ERROR),
            "warn" => Ok(LevelFilter::WARN),
            "info" => Ok(LevelFilter::INFO),
            "debug" => Ok(LevelFilter::DEBUG),
            "trace" => Ok(LevelFilter::TRACE),
            _ => Err(de::Error::unknown_variant(
                v,
                &["off", "error", "warn", "info", "debug", "trace"],
            )),
        }
    }
}

fn deserialize_level_filter<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<LevelFilter, D::Error> {
    deserializer.deserialize_str(LevelFilterVisitor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = Config::get(None).unwrap();
        assert_eq!(cfg.cache, CacheConfig::default());
        assert_eq!(cfg.cache.min_refresh_interval, Duration::from_secs(5));
        assert_eq!(cfg.logging.level, LevelFilter::INFO);
        assert_eq!(cfg.metrics.prefix, "accumulators");
    }

    #[test]
    fn test_cache_config() {
        let yaml = r#"
            cache:
              min_refresh_interval: 2m
              refresh_mode: single_flight
        "#;
        let cfg = Config::from_reader(yaml.as_bytes()).unwrap();
        assert_eq!(cfg.cache.min_refresh_interval, Duration::from_secs(120));
        assert_eq!(cfg.cache.refresh_mode, RefreshMode::SingleFlight);
        // unset values keep their defaults
        assert_eq!(
            cfg.cache.request_timeout,
            CacheConfig::default().request_timeout
        );
    }

    #[test]
    fn test_zero_second_interval() {
        // 0s intervals will not be set to defaults
        let yaml = r#"
            cache:
              min_refresh_interval: 0s
              request_timeout: 500ms
        "#;
        let cfg = Config::from_reader(yaml.as_bytes()).unwrap();
        assert_eq!(cfg.cache.min_refresh_interval, Duration::ZERO);
        assert_eq!(cfg.cache.request_timeout, Duration::from_millis(500));
    }

    #[test]
    fn test_logging_config() {
        let yaml = r#"
            logging:
              level: debug
              format: json
        "#;
        let cfg = Config::from_reader(yaml.as_bytes()).unwrap();
        assert_eq!(cfg.logging.level, LevelFilter::DEBUG);
        assert_eq!(cfg.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_invalid_level() {
        let yaml = r#"
            logging:
              level: verbose
        "#;
        assert!(Config::from_reader(yaml.as_bytes()).is_err());
    }

    #[test]
    fn test_unknown_fields() {
        // Unknown fields should not cause failure
        let yaml = r#"
            cache:
              max_entries: 100
        "#;
        let cfg = Config::from_reader(yaml.as_bytes());
        assert!(cfg.is_ok());
    }

    #[test]
    fn test_empty_file() {
        // Empty files aren't supported
        let yaml = r#""#;
        let result = Config::from_reader(yaml.as_bytes());
        assert!(result.is_err());
    }
}
