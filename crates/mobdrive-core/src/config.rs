//! Layered configuration source for mobdrive.
//!
//! Settings are a flat set of string-keyed properties. They come from three
//! layers, highest precedence first:
//!
//! 1. runtime overrides (the `MOBDRIVE_PLATFORM` environment variable, or
//!    values added with [`ConfigSource::with_override`], e.g. from CLI flags)
//! 2. persisted settings in `~/.mobdrive/config.json`
//! 3. built-in defaults, supplied by the caller of each getter
//!
//! The persisted file is a flat JSON object. String, number and boolean
//! values are all accepted and stored as strings.
//!
//! Typed getters never fail: a missing, empty or malformed value yields the
//! default. A misspelled boolean is therefore indistinguishable from an
//! absent one.
//!
//! # Example
//!
//! ```no_run
//! use mobdrive_core::config::ConfigSource;
//!
//! // Load (returns an empty source if the file doesn't exist)
//! let config = ConfigSource::load();
//!
//! let timeout = config.get_int("appium.newCommandTimeout", 60);
//! let no_reset = config.get_bool("appium.noReset", false);
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::capabilities::ConfigurationError;

const CONFIG_FILENAME: &str = "config.json";

/// Environment variable overriding the `platform` setting.
pub const PLATFORM_ENV: &str = "MOBDRIVE_PLATFORM";

/// Key of the platform selector.
pub const PLATFORM_KEY: &str = "platform";

/// Returns the mobdrive settings directory (`~/.mobdrive/`).
///
/// Falls back to `./.mobdrive` when no home directory can be determined.
pub fn mobdrive_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".mobdrive")
}

/// Returns the path of the persisted settings file.
pub fn default_config_path() -> PathBuf {
    mobdrive_dir().join(CONFIG_FILENAME)
}

/// A flat, string-keyed property set with runtime overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigSource {
    properties: BTreeMap<String, String>,
    overrides: BTreeMap<String, String>,
}

impl ConfigSource {
    /// Load persisted settings from `~/.mobdrive/config.json` and apply
    /// environment overrides.
    ///
    /// Returns an empty source (plus overrides) if the file does not exist or
    /// cannot be parsed.
    pub fn load() -> Self {
        Self::from_file(default_config_path())
            .unwrap_or_default()
            .with_env_overrides()
    }

    /// Load persisted settings from a specific file.
    ///
    /// Unlike [`load`](Self::load), a missing or malformed file is an error:
    /// the caller asked for this file explicitly.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigurationError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigurationError::Unreadable {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::from_json_str(&contents).map_err(|reason| ConfigurationError::Unreadable {
            path: path.to_path_buf(),
            reason,
        })
    }

    /// Parse persisted settings from a JSON object.
    ///
    /// Scalars are stringified; nested arrays and objects are ignored.
    pub fn from_json_str(json: &str) -> Result<Self, String> {
        let raw: BTreeMap<String, Value> = serde_json::from_str(json).map_err(|e| e.to_string())?;
        let properties = raw
            .into_iter()
            .filter_map(|(key, value)| match value {
                Value::String(s) => Some((key, s)),
                Value::Number(n) => Some((key, n.to_string())),
                Value::Bool(b) => Some((key, b.to_string())),
                _ => None,
            })
            .collect();
        Ok(Self {
            properties,
            overrides: BTreeMap::new(),
        })
    }

    /// Build a source from in-memory key/value pairs.
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            properties: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            overrides: BTreeMap::new(),
        }
    }

    /// Apply runtime overrides from the process environment.
    pub fn with_env_overrides(self) -> Self {
        match std::env::var(PLATFORM_ENV) {
            Ok(platform) if !platform.trim().is_empty() => self.with_override(PLATFORM_KEY, platform),
            _ => self,
        }
    }

    /// Add a runtime override that takes precedence over persisted settings.
    pub fn with_override(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.overrides.insert(key.into(), value.into());
        self
    }

    /// Set a persisted property.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.properties.insert(key.into(), value.into());
    }

    /// Look up a value: override first, then persisted property.
    ///
    /// Empty (or whitespace-only) values count as absent.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.overrides
            .get(key)
            .or_else(|| self.properties.get(key))
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    /// Whether a non-empty value is present for `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Look up a value with a default.
    pub fn get_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).unwrap_or(default)
    }

    /// Parse an integer, falling back to `default` if absent or malformed.
    pub fn get_int(&self, key: &str, default: i64) -> i64 {
        self.get(key)
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(default)
    }

    /// Parse a boolean (`true`/`false`, any case), falling back to `default`
    /// if absent or malformed.
    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.get(key).map(str::to_ascii_lowercase).as_deref() {
            Some("true") => true,
            Some("false") => false,
            _ => default,
        }
    }

    /// Save the persisted properties (not the overrides) as pretty JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&self.properties)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        std::fs::write(path, json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn override_wins_over_property() {
        let config = ConfigSource::from_pairs([("platform", "android")]).with_override("platform", "ios");
        assert_eq!(config.get("platform"), Some("ios"));
    }

    #[test]
    fn empty_values_count_as_absent() {
        let config = ConfigSource::from_pairs([("android.app.path", "  ")]);
        assert_eq!(config.get("android.app.path"), None);
        assert!(!config.contains("android.app.path"));
        assert_eq!(config.get_or("android.app.path", "fallback"), "fallback");
    }

    #[test]
    fn malformed_int_falls_back_to_default() {
        let config = ConfigSource::from_pairs([
            ("appium.newCommandTimeout", "sixty"),
            ("android.systemPort", "8201"),
        ]);
        assert_eq!(config.get_int("appium.newCommandTimeout", 60), 60);
        assert_eq!(config.get_int("android.systemPort", 8200), 8201);
        assert_eq!(config.get_int("missing", 7), 7);
    }

    #[test]
    fn malformed_bool_falls_back_to_default() {
        let config = ConfigSource::from_pairs([
            ("a", "TRUE"),
            ("b", "false"),
            ("c", "yes"),
        ]);
        assert!(config.get_bool("a", false));
        assert!(!config.get_bool("b", true));
        assert!(config.get_bool("c", true));
        assert!(!config.get_bool("c", false));
        assert!(config.get_bool("missing", true));
    }

    #[test]
    fn json_scalars_are_stringified() {
        let config = ConfigSource::from_json_str(
            r#"{"platform": "ios", "ios.wdaLocalPort": 8101, "ios.useNewWDA": true, "nested": {"x": 1}}"#,
        )
        .unwrap();
        assert_eq!(config.get("platform"), Some("ios"));
        assert_eq!(config.get_int("ios.wdaLocalPort", 8100), 8101);
        assert!(config.get_bool("ios.useNewWDA", false));
        assert!(!config.contains("nested"));
    }

    #[test]
    fn deserialize_empty_json() {
        let config = ConfigSource::from_json_str("{}").unwrap();
        assert_eq!(config, ConfigSource::default());
    }

    #[test]
    fn from_file_missing_is_an_error() {
        let result = ConfigSource::from_file("/nonexistent/mobdrive/config.json");
        assert!(matches!(result, Err(ConfigurationError::Unreadable { .. })));
    }

    #[test]
    fn save_and_reload_roundtrip() {
        let path = std::env::temp_dir()
            .join(format!("mobdrive_config_{}", uuid::Uuid::new_v4()))
            .join("config.json");
        let mut config = ConfigSource::from_pairs([("platform", "ios")]).with_override("platform", "android");
        config.set("ios.device.name", "iPhone 15");
        config.save(&path).unwrap();

        let loaded = ConfigSource::from_file(&path).unwrap();
        // Overrides are runtime-only and never persisted.
        assert_eq!(loaded.get("platform"), Some("ios"));
        assert_eq!(loaded.get("ios.device.name"), Some("iPhone 15"));
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn load_does_not_panic() {
        // The real settings file may or may not exist.
        let _ = ConfigSource::load();
    }
}
