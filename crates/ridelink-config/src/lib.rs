//! Shared configuration for ridelink tools.
//!
//! TOML profiles, token resolution (env + keyring + plaintext), and
//! translation to `ridelink_core::ClientConfig`. The CLI layers its
//! `GlobalOpts` overrides on top of this.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use ridelink_api::TlsMode;
use ridelink_core::{ClientConfig, SearchConfig};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Keyring service name for stored tokens.
pub const KEYRING_SERVICE: &str = "ridelink";

/// Env var consulted when a profile names no `token_env`.
pub const TOKEN_ENV: &str = "RIDELINK_TOKEN";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("profile '{name}' not found")]
    UnknownProfile { name: String },

    #[error("no token configured for profile '{profile}'")]
    NoCredentials { profile: String },

    #[error("keyring error: {0}")]
    Keyring(String),

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
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Config {
    /// Profile used when `--profile` is not given.
    pub default_profile: Option<String>,

    #[serde(default)]
    pub defaults: Defaults,

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

impl Config {
    /// Name of the profile to use, honouring an explicit choice first.
    pub fn profile_name<'a>(&'a self, explicit: Option<&'a str>) -> &'a str {
        explicit
            .or(self.default_profile.as_deref())
            .unwrap_or("default")
    }

    pub fn profile(&self, name: &str) -> Result<&Profile, ConfigError> {
        self.profiles
            .get(name)
            .ok_or_else(|| ConfigError::UnknownProfile { name: name.into() })
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_output")]
    pub output: String,

    #[serde(default = "default_color")]
    pub color: String,

    /// Query API timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output: default_output(),
            color: default_color(),
            timeout: default_timeout(),
        }
    }
}

fn default_output() -> String {
    "table".into()
}
fn default_color() -> String {
    "auto".into()
}
fn default_timeout() -> u64 {
    15
}

/// A named backend profile.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Profile {
    /// Socket endpoint (e.g., "wss://rides.example.com/socket").
    pub server: String,

    /// Query API base URL (e.g., "https://rides.example.com/api").
    pub api: String,

    /// User id presented when connecting.
    pub rider_id: Option<String>,

    /// Access token (plaintext, prefer keyring or env var).
    pub token: Option<String>,

    /// Environment variable holding the token.
    pub token_env: Option<String>,

    /// Extra CA certificate for the query API.
    pub ca_cert: Option<PathBuf>,

    /// Override the query API timeout.
    pub timeout: Option<u64>,

    /// Search tuning overrides.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search: Option<SearchOverrides>,
}

/// Optional per-profile search tuning. Unset fields keep the defaults.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct SearchOverrides {
    pub initial_radius_km: Option<f64>,
    pub radius_increment_km: Option<f64>,
    pub max_radius_km: Option<f64>,
    pub max_attempts: Option<u32>,
    pub attempt_deadline_secs: Option<u64>,
}

impl SearchOverrides {
    fn apply(&self, search: &mut SearchConfig) {
        if let Some(v) = self.initial_radius_km {
            search.initial_radius_km = v;
        }
        if let Some(v) = self.radius_increment_km {
            search.radius_increment_km = v;
        }
        if let Some(v) = self.max_radius_km {
            search.max_radius_km = v;
        }
        if let Some(v) = self.max_attempts {
            search.max_attempts = v;
        }
        if let Some(v) = self.attempt_deadline_secs {
            search.attempt_deadline = Duration::from_secs(v);
        }
    }
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("com", "ridelink", "ridelink").map_or_else(
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
    p.push("ridelink");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load from `path` merged with `RIDELINK_*` variables. Nested keys use a
/// double underscore: `RIDELINK_PROFILES__HOME__SERVER`.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("RIDELINK_").split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

/// Load config, returning a default if nothing usable is on disk.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
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

// ── Credential resolution (without CLI flags) ───────────────────────

/// Resolve the access token: env var, then system keyring, then the
/// plaintext value in the profile.
pub fn resolve_token(profile: &Profile, profile_name: &str) -> Result<SecretString, ConfigError> {
    // 1. Profile's token_env (or RIDELINK_TOKEN) → env var lookup
    let env_name = profile.token_env.as_deref().unwrap_or(TOKEN_ENV);
    if let Ok(val) = std::env::var(env_name) {
        if !val.is_empty() {
            return Ok(SecretString::from(val));
        }
    }

    // 2. System keyring
    if let Ok(entry) = keyring::Entry::new(KEYRING_SERVICE, &keyring_user(profile_name)) {
        if let Ok(secret) = entry.get_password() {
            return Ok(SecretString::from(secret));
        }
    }

    // 3. Plaintext in config
    if let Some(ref token) = profile.token {
        return Ok(SecretString::from(token.clone()));
    }

    Err(ConfigError::NoCredentials {
        profile: profile_name.into(),
    })
}

/// Store a token in the system keyring for `profile_name`.
pub fn store_token(profile_name: &str, token: &str) -> Result<(), ConfigError> {
    keyring::Entry::new(KEYRING_SERVICE, &keyring_user(profile_name))
        .and_then(|entry| entry.set_password(token))
        .map_err(|e| ConfigError::Keyring(e.to_string()))
}

fn keyring_user(profile_name: &str) -> String {
    format!("{profile_name}/token")
}

// ── Translation ─────────────────────────────────────────────────────

/// Build a `ClientConfig` from a profile, no CLI flag overrides.
pub fn profile_to_client_config(
    profile: &Profile,
    defaults: &Defaults,
) -> Result<ClientConfig, ConfigError> {
    let server_url = parse_url("server", &profile.server, &["ws", "wss"])?;
    let api_url = parse_url("api", &profile.api, &["http", "https"])?;

    let mut config = ClientConfig::new(server_url, api_url);
    config.request_timeout = Duration::from_secs(profile.timeout.unwrap_or(defaults.timeout));
    if let Some(ref ca_path) = profile.ca_cert {
        config.tls = TlsMode::CustomCa(ca_path.clone());
    }
    if let Some(ref search) = profile.search {
        search.apply(&mut config.search);
    }
    validate_search(&config.search)?;
    Ok(config)
}

/// Parse `raw` as a URL whose scheme is one of `schemes`.
pub fn parse_url(field: &str, raw: &str, schemes: &[&str]) -> Result<Url, ConfigError> {
    let url: Url = raw.parse().map_err(|_| ConfigError::Validation {
        field: field.into(),
        reason: format!("invalid URL: {raw}"),
    })?;
    if !schemes.contains(&url.scheme()) {
        return Err(ConfigError::Validation {
            field: field.into(),
            reason: format!("expected a {} URL, got '{raw}'", schemes.join("/")),
        });
    }
    Ok(url)
}

fn validate_search(search: &SearchConfig) -> Result<(), ConfigError> {
    let invalid = |reason: &str| ConfigError::Validation {
        field: "search".into(),
        reason: reason.into(),
    };
    if search.initial_radius_km <= 0.0 || search.max_radius_km < search.initial_radius_km {
        return Err(invalid("radius must be positive and not exceed max_radius_km"));
    }
    if search.max_attempts == 0 {
        return Err(invalid("max_attempts must be at least 1"));
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;
    use secrecy::ExposeSecret;

    use super::*;

    fn profile() -> Profile {
        Profile {
            server: "wss://rides.example.com/socket".into(),
            api: "https://rides.example.com/api".into(),
            ..Profile::default()
        }
    }

    #[test]
    fn loads_profiles_from_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
default_profile = "home"

[profiles.home]
server = "wss://rides.example.com/socket"
api = "https://rides.example.com/api"
rider_id = "rider-1"

[profiles.home.search]
max_attempts = 3
"#,
        )
        .unwrap();

        let cfg = load_config_from(&path).unwrap();

        assert_eq!(cfg.profile_name(None), "home");
        assert_eq!(cfg.profile_name(Some("work")), "work");
        let home = cfg.profile("home").unwrap();
        assert_eq!(home.rider_id.as_deref(), Some("rider-1"));
        assert_eq!(cfg.defaults.output, "table");
        assert!(matches!(
            cfg.profile("work"),
            Err(ConfigError::UnknownProfile { .. })
        ));

        let client = profile_to_client_config(home, &cfg.defaults).unwrap();
        assert_eq!(client.search.max_attempts, 3);
        assert!((client.search.initial_radius_km - 5.0).abs() < f64::EPSILON);
        assert_eq!(client.request_timeout, Duration::from_secs(15));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_config_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(cfg.default_profile.as_deref(), Some("default"));
        assert!(cfg.profiles.is_empty());
    }

    #[test]
    fn saved_config_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut cfg = Config::default();
        cfg.profiles.insert("default".into(), profile());

        save_config_to(&cfg, &path).unwrap();

        assert_eq!(load_config_from(&path).unwrap(), cfg);
    }

    #[test]
    fn urls_are_checked_for_scheme() {
        let bad_server = Profile {
            server: "https://rides.example.com/socket".into(),
            ..profile()
        };
        let err = profile_to_client_config(&bad_server, &Defaults::default()).unwrap_err();
        assert!(err.to_string().contains("ws/wss"));

        let bad_api = Profile {
            api: "not a url".into(),
            ..profile()
        };
        assert!(profile_to_client_config(&bad_api, &Defaults::default()).is_err());
    }

    #[test]
    fn profile_overrides_reach_client_config() {
        let custom = Profile {
            ca_cert: Some(PathBuf::from("/etc/ridelink/ca.pem")),
            timeout: Some(40),
            search: Some(SearchOverrides {
                max_radius_km: Some(12.0),
                attempt_deadline_secs: Some(120),
                ..SearchOverrides::default()
            }),
            ..profile()
        };

        let client = profile_to_client_config(&custom, &Defaults::default()).unwrap();

        assert_eq!(client.tls, TlsMode::CustomCa(PathBuf::from("/etc/ridelink/ca.pem")));
        assert_eq!(client.request_timeout, Duration::from_secs(40));
        assert_eq!(client.search.attempt_deadline, Duration::from_secs(120));
        assert!((client.search.max_radius_km - 12.0).abs() < f64::EPSILON);
    }

    #[test]
    fn inconsistent_search_tuning_is_rejected() {
        let custom = Profile {
            search: Some(SearchOverrides {
                max_radius_km: Some(1.0),
                ..SearchOverrides::default()
            }),
            ..profile()
        };
        assert!(matches!(
            profile_to_client_config(&custom, &Defaults::default()),
            Err(ConfigError::Validation { .. })
        ));
    }

    #[test]
    fn plaintext_token_is_the_last_resort() {
        let with_token = Profile {
            token: Some("plain-token".into()),
            token_env: Some("RIDELINK_TEST_TOKEN_THAT_IS_NEVER_SET".into()),
            ..profile()
        };
        let token = resolve_token(&with_token, "ridelink-test-profile").unwrap();
        assert_eq!(token.expose_secret(), "plain-token");

        let without = Profile {
            token_env: Some("RIDELINK_TEST_TOKEN_THAT_IS_NEVER_SET".into()),
            ..profile()
        };
        assert!(matches!(
            resolve_token(&without, "ridelink-test-profile"),
            Err(ConfigError::NoCredentials { .. })
        ));
    }
}
