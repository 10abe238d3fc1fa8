//! Shared configuration for the `afero` binary and embedding applications.
//!
//! TOML profiles, credential resolution (env + keyring + plaintext), and
//! translation to [`afero_core::BridgeConfig`] and
//! [`afero_api::TransportConfig`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use afero_api::{TransportConfig, Vendor};
use afero_core::BridgeConfig;

const KEYRING_SERVICE: &str = "afero";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("profile '{name}' is not defined")]
    UnknownProfile { name: String },

    #[error("no refresh token configured for profile '{profile}'")]
    NoCredentials { profile: String },

    #[error("keyring error: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Deserialize, Serialize, PartialEq)]
pub struct Config {
    /// Profile used when none is named on the command line.
    pub default_profile: Option<String>,

    #[serde(default)]
    pub defaults: Defaults,

    /// Named account profiles.
    #[serde(default)]
    pub profiles: HashMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Defaults::default(),
            profiles: HashMap::new(),
        }
    }
}

/// Values a profile inherits unless it overrides them.
#[derive(Debug, Deserialize, Serialize, PartialEq)]
pub struct Defaults {
    #[serde(default)]
    pub vendor: Vendor,

    /// HTTP request timeout, seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Seconds between poll cycles.
    #[serde(default = "default_poll_interval")]
    pub poll_interval: u64,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            vendor: Vendor::default(),
            timeout: default_timeout(),
            poll_interval: default_poll_interval(),
        }
    }
}

fn default_timeout() -> u64 {
    30
}
fn default_poll_interval() -> u64 {
    30
}

/// A named account profile.
#[derive(Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct Profile {
    /// `hubspace` or `myko`.
    pub vendor: Option<Vendor>,

    /// Account e-mail, shown for identification only.
    pub username: Option<String>,

    /// OpenID refresh token (plaintext; prefer keyring or env var).
    pub refresh_token: Option<String>,

    /// Environment variable name containing the refresh token.
    pub refresh_token_env: Option<String>,

    /// Override HTTP timeout, seconds.
    pub timeout: Option<u64>,

    /// Override poll interval, seconds.
    pub poll_interval: Option<u64>,

    /// Consecutive missed polls before a device is dropped.
    pub miss_threshold: Option<u32>,

    /// Retries after the first command attempt.
    pub command_retries: Option<u32>,

    /// Per-command deadline, seconds.
    pub command_timeout: Option<u64>,
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("net", "afero", "afero").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("afero");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full config from the canonical file plus `AFERO_` env vars.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load from `path` plus environment. A missing file yields defaults.
///
/// Nested keys use a double underscore:
/// `AFERO_PROFILES__HOME__POLL_INTERVAL=10`.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("AFERO_").split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

/// Load config, returning a default if it cannot be read.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write it to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    save_config_to(cfg, &config_path())
}

pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Profile selection ───────────────────────────────────────────────

impl Config {
    /// Pick `name`, or the default profile, returning the resolved name.
    pub fn profile(&self, name: Option<&str>) -> Result<(String, &Profile), ConfigError> {
        let name = name
            .or(self.default_profile.as_deref())
            .unwrap_or("default");
        self.profiles
            .get(name)
            .map(|profile| (name.to_owned(), profile))
            .ok_or_else(|| ConfigError::UnknownProfile { name: name.into() })
    }
}

// ── Credential resolution ───────────────────────────────────────────

/// Resolve the refresh token: profile env var, then keyring, then plaintext.
pub fn resolve_refresh_token(
    profile: &Profile,
    profile_name: &str,
) -> Result<SecretString, ConfigError> {
    // 1. Profile's refresh_token_env → env var lookup
    if let Some(ref env_name) = profile.refresh_token_env {
        if let Ok(val) = std::env::var(env_name) {
            return Ok(SecretString::from(val));
        }
    }

    // 2. System keyring
    if let Ok(entry) = keyring_entry(profile_name) {
        if let Ok(secret) = entry.get_password() {
            return Ok(SecretString::from(secret));
        }
    }

    // 3. Plaintext in config
    if let Some(ref token) = profile.refresh_token {
        return Ok(SecretString::from(token.clone()));
    }

    Err(ConfigError::NoCredentials {
        profile: profile_name.into(),
    })
}

/// Persist a (possibly rotated) refresh token in the system keyring.
pub fn store_refresh_token(profile_name: &str, token: &SecretString) -> Result<(), ConfigError> {
    keyring_entry(profile_name)?.set_password(token.expose_secret())?;
    Ok(())
}

fn keyring_entry(profile_name: &str) -> Result<keyring::Entry, keyring::Error> {
    keyring::Entry::new(KEYRING_SERVICE, &format!("{profile_name}/refresh-token"))
}

// ── Translation ─────────────────────────────────────────────────────

/// Build the HTTP transport settings for a profile.
pub fn profile_to_transport_config(defaults: &Defaults, profile: &Profile) -> TransportConfig {
    TransportConfig {
        vendor: profile.vendor.unwrap_or(defaults.vendor),
        timeout: Duration::from_secs(profile.timeout.unwrap_or(defaults.timeout)),
        user_agent: None,
    }
}

/// Build a validated [`BridgeConfig`] from a profile. Knobs a profile does
/// not set keep the bridge defaults.
pub fn profile_to_bridge_config(
    defaults: &Defaults,
    profile: &Profile,
) -> Result<BridgeConfig, ConfigError> {
    let base = BridgeConfig::default();
    let config = BridgeConfig {
        poll_interval: Duration::from_secs(profile.poll_interval.unwrap_or(defaults.poll_interval)),
        miss_threshold: profile.miss_threshold.unwrap_or(base.miss_threshold),
        command_retries: profile.command_retries.unwrap_or(base.command_retries),
        command_timeout: profile
            .command_timeout
            .map_or(base.command_timeout, Duration::from_secs),
        ..base
    };

    config.validate().map_err(|e| ConfigError::Validation {
        field: "profile".into(),
        reason: e.to_string(),
    })?;
    Ok(config)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    const SAMPLE: &str = r#"
default_profile = "home"

[defaults]
vendor = "hubspace"
poll_interval = 45

[profiles.home]
username = "me@example.com"
refresh_token = "plain-refresh"
miss_threshold = 3

[profiles.cabin]
vendor = "myko"
poll_interval = 120
command_timeout = 10
"#;

    fn load(contents: &str) -> Config {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, contents).unwrap();
        load_config_from(&path).unwrap()
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.default_profile.as_deref(), Some("default"));
        assert!(config.profiles.is_empty());
        assert_eq!(config.defaults.poll_interval, 30);
    }

    #[test]
    fn profiles_inherit_defaults() {
        let config = load(SAMPLE);
        let (name, home) = config.profile(None).unwrap();
        assert_eq!(name, "home");

        let bridge = profile_to_bridge_config(&config.defaults, home).unwrap();
        assert_eq!(bridge.poll_interval, Duration::from_secs(45));
        assert_eq!(bridge.miss_threshold, 3);
        assert_eq!(bridge.command_retries, 3);

        let transport = profile_to_transport_config(&config.defaults, home);
        assert_eq!(transport.vendor, Vendor::Hubspace);
        assert_eq!(transport.timeout, Duration::from_secs(30));
    }

    #[test]
    fn profile_overrides_win() {
        let config = load(SAMPLE);
        let (_, cabin) = config.profile(Some("cabin")).unwrap();

        let bridge = profile_to_bridge_config(&config.defaults, cabin).unwrap();
        assert_eq!(bridge.poll_interval, Duration::from_secs(120));
        assert_eq!(bridge.command_timeout, Duration::from_secs(10));
        assert_eq!(profile_to_transport_config(&config.defaults, cabin).vendor, Vendor::Myko);
    }

    #[test]
    fn unknown_profile_is_an_error() {
        let config = load(SAMPLE);
        assert!(matches!(
            config.profile(Some("office")),
            Err(ConfigError::UnknownProfile { .. })
        ));
    }

    #[test]
    fn invalid_knobs_are_rejected() {
        let profile = Profile {
            miss_threshold: Some(0),
            ..Profile::default()
        };
        let err = profile_to_bridge_config(&Defaults::default(), &profile).unwrap_err();
        assert!(matches!(err, ConfigError::Validation { .. }));
    }

    #[test]
    fn plaintext_token_is_the_last_resort() {
        let profile = Profile {
            refresh_token_env: Some("AFERO_TEST_UNSET_REFRESH_TOKEN".into()),
            refresh_token: Some("plain-refresh".into()),
            ..Profile::default()
        };
        let token = resolve_refresh_token(&profile, "afero-config-test-profile").unwrap();
        assert_eq!(token.expose_secret(), "plain-refresh");
    }

    #[test]
    fn save_then_load_preserves_profiles() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = Config::default();
        config.profiles.insert(
            "default".into(),
            Profile {
                vendor: Some(Vendor::Myko),
                poll_interval: Some(15),
                ..Profile::default()
            },
        );

        save_config_to(&config, &path).unwrap();
        assert_eq!(load_config_from(&path).unwrap(), config);
    }
}
