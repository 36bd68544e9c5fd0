//! Relay settings with deep merge and environment variable overrides.
//!
//! Settings are layered, lowest priority first:
//! 1. [`RelaySettings::default()`]
//! 2. the settings file, laid over the defaults with [`overlay`]
//! 3. `RELAY_*` environment variables
//! 4. command-line flags, via [`RelaySettings::apply_overrides`]
//!
//! The result is validated after each load and again after overrides.

use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::relay::RelayConfig;

/// Errors that can occur when loading or parsing settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read settings file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse settings JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid settings value: {0}")]
    InvalidValue(String),
}

pub type Result<T> = std::result::Result<T, SettingsError>;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelaySettings {
    pub server: ServerSettings,
    pub records: RecordSettings,
    /// SQLite file backing participant lookups. A leading `~/` is expanded.
    pub database_path: String,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            server: ServerSettings::default(),
            records: RecordSettings::default(),
            database_path: "~/.relay/relay.db".to_owned(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub outbound_queue_capacity: usize,
    /// Seconds between server pings; `0` disables them.
    pub ping_interval_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_owned(),
            port: 8090,
            outbound_queue_capacity: 64,
            ping_interval_secs: 30,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RecordSettings {
    /// Prefix for document links; patient and case ids are appended.
    pub record_base_url: String,
}

impl Default for RecordSettings {
    fn default() -> Self {
        Self {
            record_base_url: "https://records.local/record_p/".to_owned(),
        }
    }
}

impl RelaySettings {
    pub fn validate(&self) -> Result<()> {
        if self.server.host.trim().is_empty() {
            return Err(SettingsError::InvalidValue("server.host is empty".into()));
        }
        if self.server.outbound_queue_capacity == 0 {
            return Err(SettingsError::InvalidValue(
                "server.outboundQueueCapacity must be at least 1".into(),
            ));
        }
        if self.records.record_base_url.trim().is_empty() {
            return Err(SettingsError::InvalidValue(
                "records.recordBaseUrl is empty".into(),
            ));
        }
        Ok(())
    }

    /// Apply command-line overrides and re-check the result.
    pub fn apply_overrides(&mut self, host: Option<String>, port: Option<u16>) -> Result<()> {
        if let Some(host) = host {
            self.server.host = host;
        }
        if let Some(port) = port {
            self.server.port = port;
        }
        self.validate()
    }

    pub fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            queue_capacity: self.server.outbound_queue_capacity,
            ping_interval: (self.server.ping_interval_secs > 0)
                .then(|| Duration::from_secs(self.server.ping_interval_secs)),
            record_base_url: self.records.record_base_url.clone(),
        }
    }

    pub fn resolved_database_path(&self) -> PathBuf {
        expand_home(&self.database_path)
    }
}

fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_owned());
            PathBuf::from(home).join(rest)
        }
        None => PathBuf::from(path),
    }
}

/// Default settings file (`~/.relay/settings.json`).
pub fn settings_path() -> PathBuf {
    expand_home("~/.relay/settings.json")
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. Invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<RelaySettings> {
    let mut layered = serde_json::to_value(RelaySettings::default())?;
    if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        overlay(&mut layered, serde_json::from_str(&content)?);
    } else {
        debug!(?path, "settings file not found, using defaults");
    }

    let mut settings: RelaySettings = serde_json::from_value(layered)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

/// Lay `patch` over `base` in place.
///
/// Objects combine key by key and a `null` leaves the base value alone.
/// Any other value, arrays included, replaces what was there.
pub fn overlay(base: &mut Value, patch: Value) {
    match (base, patch) {
        (_, Value::Null) => {}
        (Value::Object(base), Value::Object(patch)) => {
            for (key, value) in patch {
                match base.get_mut(&key) {
                    Some(slot) => overlay(slot, value),
                    None if value.is_null() => {}
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, patch) => *base = patch,
    }
}

/// Apply `RELAY_*` overrides from the process environment.
pub fn apply_env_overrides(settings: &mut RelaySettings) {
    apply_env_overrides_from(settings, |name| std::env::var(name).ok());
}

/// Apply overrides read through `lookup`.
///
/// Numbers must parse and fall within range; anything else is ignored with
/// a warning. Empty strings count as unset.
pub fn apply_env_overrides_from(
    settings: &mut RelaySettings,
    lookup: impl Fn(&str) -> Option<String>,
) {
    let read = |name: &str| lookup(name).filter(|v| !v.is_empty());
    let server = &mut settings.server;

    if let Some(v) = read("RELAY_HOST") {
        server.host = v;
    }
    set_number(&read, "RELAY_PORT", 0..=u16::MAX, &mut server.port);
    set_number(
        &read,
        "RELAY_QUEUE_CAPACITY",
        1..=1_000_000,
        &mut server.outbound_queue_capacity,
    );
    set_number(
        &read,
        "RELAY_PING_INTERVAL",
        0..=86_400,
        &mut server.ping_interval_secs,
    );
    if let Some(v) = read("RELAY_RECORD_BASE_URL") {
        settings.records.record_base_url = v;
    }
    if let Some(v) = read("RELAY_DB_PATH") {
        settings.database_path = v;
    }
}

/// Store `key` into `slot` when it parses and lies within `range`.
fn set_number<T>(
    read: &impl Fn(&str) -> Option<String>,
    key: &str,
    range: RangeInclusive<T>,
    slot: &mut T,
) where
    T: FromStr + PartialOrd,
{
    let Some(raw) = read(key) else { return };
    match parse_in_range(&raw, &range) {
        Some(n) => *slot = n,
        None => warn!(key, value = %raw, "invalid env var, ignoring"),
    }
}

fn parse_in_range<T>(raw: &str, range: &RangeInclusive<T>) -> Option<T>
where
    T: FromStr + PartialOrd,
{
    let n: T = raw.trim().parse().ok()?;
    range.contains(&n).then_some(n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults() {
        let s = RelaySettings::default();
        assert_eq!(s.server.host, "0.0.0.0");
        assert_eq!(s.server.port, 8090);
        assert_eq!(s.server.outbound_queue_capacity, 64);
        assert_eq!(s.server.ping_interval_secs, 30);
        assert_eq!(
            s.records.record_base_url,
            "https://records.local/record_p/"
        );
        assert!(s.validate().is_ok());
    }

    #[test]
    fn serializes_camel_case() {
        let v = serde_json::to_value(RelaySettings::default()).unwrap();
        assert_eq!(v["server"]["outboundQueueCapacity"], 64);
        assert_eq!(
            v["records"]["recordBaseUrl"],
            "https://records.local/record_p/"
        );
        assert!(v.get("databasePath").is_some());
    }

    #[test]
    fn overlay_nested_and_nulls() {
        let mut base = json!({"server": {"host": "0.0.0.0", "port": 8090}, "databasePath": "a"});
        let patch = json!({
            "server": {"port": 9000, "host": null},
            "databasePath": "b",
            "extra": null,
        });
        overlay(&mut base, patch);
        let expected = json!({"server": {"host": "0.0.0.0", "port": 9000}, "databasePath": "b"});
        assert_eq!(base, expected);
    }

    #[test]
    fn overlay_replaces_arrays_and_scalars() {
        let mut base = json!({"a": [1, 2, 3], "b": {"c": 1}});
        overlay(&mut base, json!({"a": [9], "b": 4}));
        assert_eq!(base, json!({"a": [9], "b": 4}));
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.json");
        let s = load_settings_from_path(&path).unwrap();
        assert_eq!(s.server.port, RelaySettings::default().server.port);
    }

    #[test]
    fn partial_file_is_merged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let body = r#"{"server": {"outboundQueueCapacity": 5}, "records": null}"#;
        std::fs::write(&path, body).unwrap();
        let s = load_settings_from_path(&path).unwrap();
        assert_eq!(s.server.outbound_queue_capacity, 5);
        assert_eq!(s.server.host, "0.0.0.0");
        assert_eq!(s.records, RecordSettings::default());
    }

    #[test]
    fn invalid_json_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{ nope").unwrap();
        let err = load_settings_from_path(&path).unwrap_err();
        assert!(matches!(err, SettingsError::Json(_)), "got: {err}");
    }

    #[test]
    fn zero_capacity_fails_validation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"server": {"outboundQueueCapacity": 0}}"#).unwrap();
        let err = load_settings_from_path(&path).unwrap_err();
        assert!(matches!(err, SettingsError::InvalidValue(_)), "got: {err}");
    }

    #[test]
    fn env_overrides_apply() {
        let mut s = RelaySettings::default();
        apply_env_overrides_from(
            &mut s,
            env(&[
                ("RELAY_HOST", "127.0.0.1"),
                ("RELAY_PORT", "9100"),
                ("RELAY_QUEUE_CAPACITY", "16"),
                ("RELAY_PING_INTERVAL", "0"),
                ("RELAY_RECORD_BASE_URL", "https://r.example/"),
                ("RELAY_DB_PATH", "/var/lib/relay.db"),
            ]),
        );
        assert_eq!(s.server.host, "127.0.0.1");
        assert_eq!(s.server.port, 9100);
        assert_eq!(s.server.outbound_queue_capacity, 16);
        assert_eq!(s.server.ping_interval_secs, 0);
        assert_eq!(s.records.record_base_url, "https://r.example/");
        assert_eq!(s.database_path, "/var/lib/relay.db");
    }

    #[test]
    fn invalid_env_values_are_ignored() {
        let mut s = RelaySettings::default();
        apply_env_overrides_from(
            &mut s,
            env(&[
                ("RELAY_PORT", "not-a-port"),
                ("RELAY_QUEUE_CAPACITY", "0"),
                ("RELAY_PING_INTERVAL", "-5"),
                ("RELAY_HOST", ""),
            ]),
        );
        assert_eq!(s, RelaySettings::default());
    }

    #[test]
    fn relay_config_maps_zero_ping_to_disabled() {
        let mut s = RelaySettings::default();
        let interval = s.relay_config().ping_interval;
        assert_eq!(interval, Some(Duration::from_secs(30)));
        s.server.ping_interval_secs = 0;
        assert_eq!(s.relay_config().ping_interval, None);
    }

    #[test]
    fn absolute_database_path_is_kept() {
        let mut s = RelaySettings::default();
        s.database_path = "/data/relay.db".into();
        assert_eq!(s.resolved_database_path(), PathBuf::from("/data/relay.db"));
    }

    #[test]
    fn numbers_must_parse_within_range() {
        assert_eq!(parse_in_range::<u16>("8080", &(1..=u16::MAX)), Some(8080));
        assert_eq!(parse_in_range::<u16>("70000", &(1..=u16::MAX)), None);
        assert_eq!(parse_in_range::<u64>(" 12 ", &(0..=100)), Some(12));
        assert_eq!(parse_in_range::<usize>("0", &(1..=10)), None);
    }

    #[test]
    fn env_numbers_at_range_edges() {
        let mut s = RelaySettings::default();
        apply_env_overrides_from(
            &mut s,
            env(&[
                ("RELAY_PORT", "65535"),
                ("RELAY_QUEUE_CAPACITY", "1000001"),
                ("RELAY_PING_INTERVAL", "86400"),
            ]),
        );
        assert_eq!(s.server.port, 65535);
        assert_eq!(s.server.outbound_queue_capacity, 64);
        assert_eq!(s.server.ping_interval_secs, 86_400);
    }

    #[test]
    fn overrides_are_validated() {
        let mut s = RelaySettings::default();
        let host = Some("127.0.0.1".to_owned());
        s.apply_overrides(host, Some(0)).unwrap();
        assert_eq!(s.server.host, "127.0.0.1");
        assert_eq!(s.server.port, 0);

        let err = s.apply_overrides(Some("  ".into()), None).unwrap_err();
        assert!(matches!(err, SettingsError::InvalidValue(_)), "got: {err}");
    }

    #[test]
    fn no_overrides_keeps_settings() {
        let mut s = RelaySettings::default();
        s.apply_overrides(None, None).unwrap();
        assert_eq!(s, RelaySettings::default());
    }
}
