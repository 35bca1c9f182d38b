//! INI configuration parsing: one section per broker (`in_req`, `in_sub`,
//! `out_req`, `out_sub`, `monitor` endpoints), a `zmq` section listing
//! broker names and timings, and per-component sections for the worker,
//! handler and expiry binaries. Parsed once at startup; there is no reload
//! protocol.

use std::collections::HashMap;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(String),
    #[error("missing required key `{section}.{key}`")]
    MissingKey { section: String, key: String },
    #[error("key `{section}.{key}` could not be parsed as {expected}")]
    BadValue {
        section: String,
        key: String,
        expected: &'static str,
    },
}

/// A single broker's socket endpoints, as configured in its own `[name]`
/// section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerEndpoints {
    pub in_req: String,
    pub in_sub: String,
    pub out_req: String,
    pub out_sub: String,
    pub monitor: String,
}

/// Timings shared across every broker connection, read from the `[zmq]`
/// section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZmqTimings {
    pub liveness_time_secs: i64,
    pub resubscribe_interval_secs: i64,
    pub settle_time_secs: i64,
    pub zombie_time_secs: i64,
    pub heartbeat_interval_secs: i64,
    pub resubmit_interval_secs: i64,
}

impl Default for ZmqTimings {
    fn default() -> ZmqTimings {
        ZmqTimings {
            liveness_time_secs: 30,
            resubscribe_interval_secs: 3600,
            settle_time_secs: 5,
            zombie_time_secs: 300,
            heartbeat_interval_secs: 1,
            resubmit_interval_secs: 1,
        }
    }
}

/// The parsed configuration file: every broker's endpoints plus the shared
/// `[zmq]` timings and a raw per-section key/value view for component-
/// specific sections (worker, handler, expiry) to read from.
#[derive(Debug, Clone)]
pub struct Config {
    pub brokers: HashMap<String, BrokerEndpoints>,
    pub broker_names: Vec<String>,
    pub timings: ZmqTimings,
    sections: HashMap<String, HashMap<String, Option<String>>>,
}

const RESERVED_SECTIONS: &[&str] = &["zmq", "default"];

impl Config {
    pub fn from_file(path: &str) -> Result<Config, ConfigError> {
        let raw = ini::macro_safe_load(path).map_err(ConfigError::Io)?;
        Self::from_raw(raw)
    }

    pub fn from_str(contents: &str) -> Result<Config, ConfigError> {
        let raw = ini::macro_safe_read(contents).map_err(ConfigError::Io)?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: HashMap<String, HashMap<String, Option<String>>>) -> Result<Config, ConfigError> {
        let zmq_section = raw.get("zmq").cloned().unwrap_or_default();
        let broker_names = parse_list(zmq_section.get("broker_names"));
        let heartbeat_interval_secs = parse_opt_i64(&zmq_section, "zmq", "heartbeat_interval_secs", 1)?;
        let timings = ZmqTimings {
            liveness_time_secs: parse_opt_i64(&zmq_section, "zmq", "liveness_time_secs", 30)?,
            resubscribe_interval_secs: parse_opt_i64(&zmq_section, "zmq", "resubscribe_interval_secs", 3600)?,
            settle_time_secs: parse_opt_i64(&zmq_section, "zmq", "settle_time_secs", 5)?,
            zombie_time_secs: parse_opt_i64(&zmq_section, "zmq", "zombie_time_secs", 300)?,
            heartbeat_interval_secs,
            // defaults to the heartbeat interval, matching `tile_broker_impl.cpp`'s
            // `config.get<unsigned int>("zmq.resubmit_interval", heartbeat_interval)`.
            resubmit_interval_secs: parse_opt_i64(&zmq_section, "zmq", "resubmit_interval", heartbeat_interval_secs)?,
        };

        let mut brokers = HashMap::new();
        for name in &broker_names {
            let section = raw
                .get(name)
                .ok_or_else(|| ConfigError::MissingKey {
                    section: name.clone(),
                    key: "<section>".to_string(),
                })?;
            brokers.insert(
                name.clone(),
                BrokerEndpoints {
                    in_req: required(section, name, "in_req")?,
                    in_sub: required(section, name, "in_sub")?,
                    out_req: required(section, name, "out_req")?,
                    out_sub: required(section, name, "out_sub")?,
                    monitor: required(section, name, "monitor")?,
                },
            );
        }

        Ok(Config {
            brokers,
            broker_names,
            timings,
            sections: raw,
        })
    }

    /// Looks up `key` in an arbitrary named section (e.g. `worker`,
    /// `handler`, `expiry`), for fields not part of the broker/zmq schema.
    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.sections
            .get(section)?
            .get(key)?
            .as_deref()
    }

    pub fn get_required(&self, section: &str, key: &str) -> Result<&str, ConfigError> {
        self.get(section, key).ok_or_else(|| ConfigError::MissingKey {
            section: section.to_string(),
            key: key.to_string(),
        })
    }

    pub fn get_i64(&self, section: &str, key: &str, default: i64) -> Result<i64, ConfigError> {
        match self.get(section, key) {
            None => Ok(default),
            Some(s) => s.parse().map_err(|_| ConfigError::BadValue {
                section: section.to_string(),
                key: key.to_string(),
                expected: "an integer",
            }),
        }
    }

    /// All component sections other than broker endpoints and `[zmq]`.
    pub fn component_sections(&self) -> impl Iterator<Item = &str> {
        self.sections
            .keys()
            .map(String::as_str)
            .filter(|name| !RESERVED_SECTIONS.contains(name) && !self.brokers.contains_key(*name))
    }

    /// Every `key = value` pair in a section, skipping valueless keys.
    /// Used for sections like `[rewrite]`/`[formats]`/`[forced_formats]`/
    /// `[zoom_limits]`/`[dirty_list]`, where each key is itself a style name
    /// rather than a fixed field.
    pub fn section_entries(&self, section: &str) -> impl Iterator<Item = (&str, &str)> {
        self.sections
            .get(section)
            .into_iter()
            .flat_map(|kv| kv.iter())
            .filter_map(|(k, v)| v.as_deref().map(|v| (k.as_str(), v)))
    }
}

fn required(
    section: &HashMap<String, Option<String>>,
    section_name: &str,
    key: &str,
) -> Result<String, ConfigError> {
    section
        .get(key)
        .and_then(|v| v.clone())
        .ok_or_else(|| ConfigError::MissingKey {
            section: section_name.to_string(),
            key: key.to_string(),
        })
}

fn parse_opt_i64(
    section: &HashMap<String, Option<String>>,
    section_name: &str,
    key: &str,
    default: i64,
) -> Result<i64, ConfigError> {
    match section.get(key).and_then(|v| v.as_deref()) {
        None => Ok(default),
        Some(s) => s.parse().map_err(|_| ConfigError::BadValue {
            section: section_name.to_string(),
            key: key.to_string(),
            expected: "an integer",
        }),
    }
}

fn parse_list(value: Option<&Option<String>>) -> Vec<String> {
    match value.and_then(|v| v.as_deref()) {
        None => Vec::new(),
        Some(s) => s
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
    }
}
