//! Platform-specific capability resolution.
//!
//! [`resolve`] turns a [`ConfigSource`] into an immutable [`CapabilityBundle`]
//! for one [`PlatformKind`]. The bundle is what a new automation session is
//! started with; it is built once and only read afterwards.
//!
//! Resolution is a pure function over the configuration:
//!
//! - common options (`newCommandTimeout`, `noReset`, `fullReset`) are always
//!   present, with typed defaults
//! - platform-specific required options (device name, automation engine,
//!   application identity) must resolve or construction fails
//! - platform-specific optional options are only added when configured
//!
//! When both an installable application path and an installed application
//! identifier are configured, the path wins.
//!
//! # Example
//!
//! ```
//! use mobdrive_core::capabilities::{resolve, CapabilityValue, PlatformKind};
//! use mobdrive_core::config::ConfigSource;
//!
//! let config = ConfigSource::from_pairs([
//!     ("android.device.name", "Pixel 7"),
//!     ("android.app.path", "/builds/app.apk"),
//! ]);
//! let bundle = resolve(PlatformKind::Android, &config).unwrap();
//! assert_eq!(bundle.get("app"), Some(&CapabilityValue::from("/builds/app.apk")));
//! ```

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::config::{ConfigSource, PLATFORM_KEY};

/// W3C capability names that are sent without a vendor prefix.
const W3C_CAPABILITIES: &[&str] = &[
    "platformName",
    "browserName",
    "browserVersion",
    "acceptInsecureCerts",
    "pageLoadStrategy",
    "proxy",
    "setWindowRect",
    "timeouts",
    "strictFileInteractability",
    "unhandledPromptBehavior",
];

const APPIUM_PREFIX: &str = "appium:";

const DEFAULT_ANDROID_URL: &str = "http://127.0.0.1:4723";
const DEFAULT_IOS_URL: &str = "http://127.0.0.1:4724";

/// Errors raised while resolving configuration into capabilities.
#[derive(Error, Debug)]
pub enum ConfigurationError {
    /// The platform selector names no supported platform.
    #[error("Unsupported platform: {0}")]
    UnsupportedPlatform(String),

    /// A required option has no value.
    #[error("Missing required option '{key}' for {platform}")]
    MissingOption {
        /// The platform being resolved.
        platform: PlatformKind,
        /// The configuration key that was looked up.
        key: String,
    },

    /// Neither an application path nor an installed application id is configured.
    #[error("No application configured for {platform}: set {path_key} or {id_key}")]
    MissingApplication {
        /// The platform being resolved.
        platform: PlatformKind,
        /// The key holding an installable application path.
        path_key: &'static str,
        /// The key holding an installed application identifier.
        id_key: &'static str,
    },

    /// The automation server URL does not parse.
    #[error("Invalid automation server URL '{url}': {reason}")]
    InvalidServerUrl {
        /// The configured URL.
        url: String,
        /// Why it was rejected.
        reason: String,
    },

    /// An explicitly requested settings file could not be read or parsed.
    #[error("Cannot read configuration file {}: {reason}", .path.display())]
    Unreadable {
        /// The file path.
        path: PathBuf,
        /// Why reading failed.
        reason: String,
    },
}

/// The two supported target platforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlatformKind {
    /// Android via UiAutomator2 (the default platform).
    Android,
    /// iOS via XCUITest.
    Ios,
}

impl PlatformKind {
    /// The configuration-key prefix for this platform (`android` / `ios`).
    pub fn key_prefix(&self) -> &'static str {
        match self {
            PlatformKind::Android => "android",
            PlatformKind::Ios => "ios",
        }
    }

    /// The W3C `platformName` value.
    pub fn platform_name(&self) -> &'static str {
        match self {
            PlatformKind::Android => "Android",
            PlatformKind::Ios => "iOS",
        }
    }

    /// The Appium automation engine used for this platform.
    pub fn automation_name(&self) -> &'static str {
        match self {
            PlatformKind::Android => "UiAutomator2",
            PlatformKind::Ios => "XCUITest",
        }
    }

    fn server_url_key(&self) -> &'static str {
        match self {
            PlatformKind::Android => "appium.android.url",
            PlatformKind::Ios => "appium.ios.url",
        }
    }

    fn default_server_url(&self) -> &'static str {
        match self {
            PlatformKind::Android => DEFAULT_ANDROID_URL,
            PlatformKind::Ios => DEFAULT_IOS_URL,
        }
    }
}

impl Default for PlatformKind {
    fn default() -> Self {
        PlatformKind::Android
    }
}

impl fmt::Display for PlatformKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key_prefix())
    }
}

impl FromStr for PlatformKind {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "android" => Ok(PlatformKind::Android),
            "ios" => Ok(PlatformKind::Ios),
            _ => Err(ConfigurationError::UnsupportedPlatform(s.to_string())),
        }
    }
}

/// A single capability value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CapabilityValue {
    Bool(bool),
    Int(i64),
    Str(String),
}

impl From<&str> for CapabilityValue {
    fn from(value: &str) -> Self {
        CapabilityValue::Str(value.to_string())
    }
}

impl From<String> for CapabilityValue {
    fn from(value: String) -> Self {
        CapabilityValue::Str(value)
    }
}

impl From<i64> for CapabilityValue {
    fn from(value: i64) -> Self {
        CapabilityValue::Int(value)
    }
}

impl From<bool> for CapabilityValue {
    fn from(value: bool) -> Self {
        CapabilityValue::Bool(value)
    }
}

impl fmt::Display for CapabilityValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CapabilityValue::Bool(b) => write!(f, "{}", b),
            CapabilityValue::Int(i) => write!(f, "{}", i),
            CapabilityValue::Str(s) => f.write_str(s),
        }
    }
}

impl CapabilityValue {
    fn to_json(&self) -> Value {
        match self {
            CapabilityValue::Bool(b) => Value::Bool(*b),
            CapabilityValue::Int(i) => Value::from(*i),
            CapabilityValue::Str(s) => Value::String(s.clone()),
        }
    }
}

/// Resolved, read-only capability set for one platform.
///
/// Entries keep their insertion order. There is no public way to change a
/// bundle once [`resolve`] has returned it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilityBundle {
    platform: PlatformKind,
    entries: Vec<(String, CapabilityValue)>,
}

impl CapabilityBundle {
    /// Options every bundle must carry.
    pub const REQUIRED: [&'static str; 3] = ["platformName", "deviceName", "automationName"];

    fn new(platform: PlatformKind) -> Self {
        Self {
            platform,
            entries: Vec::new(),
        }
    }

    fn set(&mut self, name: &str, value: impl Into<CapabilityValue>) {
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| k == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name.to_string(), value)),
        }
    }

    /// The platform this bundle was resolved for.
    pub fn platform(&self) -> PlatformKind {
        self.platform
    }

    /// Look up a capability by its unprefixed name.
    pub fn get(&self, name: &str) -> Option<&CapabilityValue> {
        self.entries.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    /// Look up a string capability.
    pub fn get_str(&self, name: &str) -> Option<&str> {
        match self.get(name) {
            Some(CapabilityValue::Str(s)) => Some(s),
            _ => None,
        }
    }

    /// Whether a capability is present.
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Iterate over entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &CapabilityValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The capability names as sent on the wire: W3C names unchanged,
    /// everything else under the `appium:` vendor prefix.
    pub fn to_w3c(&self) -> Map<String, Value> {
        self.entries
            .iter()
            .map(|(name, value)| {
                let key = if W3C_CAPABILITIES.contains(&name.as_str()) || name.contains(':') {
                    name.clone()
                } else {
                    format!("{}{}", APPIUM_PREFIX, name)
                };
                (key, value.to_json())
            })
            .collect()
    }

    /// The W3C new-session request body.
    pub fn new_session_payload(&self) -> Value {
        json!({
            "capabilities": {
                "alwaysMatch": Value::Object(self.to_w3c()),
                "firstMatch": [{}],
            }
        })
    }

    fn validate(self) -> Result<Self, ConfigurationError> {
        for name in Self::REQUIRED {
            if !self.contains(name) {
                return Err(ConfigurationError::MissingOption {
                    platform: self.platform,
                    key: name.to_string(),
                });
            }
        }
        Ok(self)
    }
}

impl Serialize for CapabilityBundle {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (k, v) in &self.entries {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

/// Determine the platform: runtime override, else persisted setting, else Android.
pub fn resolve_platform(config: &ConfigSource) -> Result<PlatformKind, ConfigurationError> {
    match config.get(PLATFORM_KEY) {
        Some(selector) => selector.parse(),
        None => Ok(PlatformKind::default()),
    }
}

/// The automation server URL configured for `platform`.
pub fn server_url(platform: PlatformKind, config: &ConfigSource) -> Result<Url, ConfigurationError> {
    let raw = config.get_or(platform.server_url_key(), platform.default_server_url());
    Url::parse(raw).map_err(|e| ConfigurationError::InvalidServerUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })
}

/// Build the capability bundle for `platform` from `config`.
///
/// # Errors
///
/// - [`ConfigurationError::MissingOption`] if the device name is not configured
/// - [`ConfigurationError::MissingApplication`] if no application identity is configured
pub fn resolve(platform: PlatformKind, config: &ConfigSource) -> Result<CapabilityBundle, ConfigurationError> {
    let mut bundle = CapabilityBundle::new(platform);

    bundle.set("newCommandTimeout", config.get_int("appium.newCommandTimeout", 60));
    bundle.set("noReset", config.get_bool("appium.noReset", false));
    bundle.set("fullReset", config.get_bool("appium.fullReset", false));

    match platform {
        PlatformKind::Android => resolve_android(&mut bundle, config)?,
        PlatformKind::Ios => resolve_ios(&mut bundle, config)?,
    }

    bundle.validate()
}

fn required<'a>(
    config: &'a ConfigSource,
    platform: PlatformKind,
    key: &str,
) -> Result<&'a str, ConfigurationError> {
    config.get(key).ok_or_else(|| ConfigurationError::MissingOption {
        platform,
        key: key.to_string(),
    })
}

fn set_engine_flags(bundle: &mut CapabilityBundle, config: &ConfigSource, platform: PlatformKind) {
    let prefix = platform.key_prefix();
    bundle.set(
        "skipServerInstallation",
        config.get_bool(&format!("{prefix}.skipServerInstallation"), false),
    );
    bundle.set(
        "skipDeviceInitialization",
        config.get_bool(&format!("{prefix}.skipDeviceInitialization"), false),
    );
    bundle.set("ignoreHiddenApiPolicyError", true);
}

fn resolve_android(bundle: &mut CapabilityBundle, config: &ConfigSource) -> Result<(), ConfigurationError> {
    let platform = PlatformKind::Android;
    bundle.set("platformName", platform.platform_name());
    bundle.set("deviceName", required(config, platform, "android.device.name")?);
    bundle.set("automationName", platform.automation_name());
    set_engine_flags(bundle, config, platform);

    if let Some(path) = config.get("android.app.path") {
        bundle.set("app", path);
    } else if let Some(package) = config.get("android.app.package") {
        bundle.set("appPackage", package);
        if let Some(activity) = config.get("android.app.activity") {
            bundle.set("appActivity", activity);
        }
    } else {
        return Err(ConfigurationError::MissingApplication {
            platform,
            path_key: "android.app.path",
            id_key: "android.app.package",
        });
    }

    bundle.set("autoGrantPermissions", config.get_bool("android.autoGrantPermissions", true));
    bundle.set("unicodeKeyboard", config.get_bool("android.unicodeKeyboard", false));
    bundle.set("resetKeyboard", config.get_bool("android.resetKeyboard", false));

    if config.contains("android.systemPort") {
        bundle.set("systemPort", config.get_int("android.systemPort", 8200));
    }

    Ok(())
}

fn resolve_ios(bundle: &mut CapabilityBundle, config: &ConfigSource) -> Result<(), ConfigurationError> {
    let platform = PlatformKind::Ios;
    bundle.set("platformName", platform.platform_name());
    bundle.set("deviceName", required(config, platform, "ios.device.name")?);
    if let Some(udid) = config.get("ios.device.udid") {
        bundle.set("udid", udid);
    }
    if let Some(version) = config.get("ios.platform.version") {
        bundle.set("platformVersion", version);
    }
    bundle.set("automationName", platform.automation_name());
    set_engine_flags(bundle, config, platform);

    if let Some(path) = config.get("ios.app.path") {
        bundle.set("app", path);
    } else if let Some(bundle_id) = config.get("ios.bundle.id") {
        bundle.set("bundleId", bundle_id);
    } else {
        return Err(ConfigurationError::MissingApplication {
            platform,
            path_key: "ios.app.path",
            id_key: "ios.bundle.id",
        });
    }

    bundle.set("autoAcceptAlerts", config.get_bool("ios.autoAcceptAlerts", true));
    bundle.set("useNewWDA", config.get_bool("ios.useNewWDA", false));
    bundle.set("usePrebuiltWDA", config.get_bool("ios.usePrebuiltWDA", false));
    bundle.set("showXcodeLog", config.get_bool("ios.showXcodeLog", true));

    if let Some(url) = config.get("ios.webDriverAgentUrl") {
        bundle.set("webDriverAgentUrl", url);
    }
    if config.contains("ios.wdaLocalPort") {
        bundle.set("wdaLocalPort", config.get_int("ios.wdaLocalPort", 8100));
    }

    Ok(())
}
