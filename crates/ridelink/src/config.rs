//! Profile resolution: layers `GlobalOpts` overrides on top of
//! `ridelink-config` and produces the `ClientConfig` core runs on.

use secrecy::SecretString;

use ridelink_config::{self as rc, Config, Profile};
use ridelink_core::ClientConfig;

use crate::cli::GlobalOpts;
use crate::error::CliError;

/// Everything a backend-bound command needs.
#[derive(Debug)]
pub struct Resolved {
    pub profile_name: String,
    pub client: ClientConfig,
    pub token: SecretString,
    rider_id: Option<String>,
}

impl Resolved {
    /// The user id to connect as (`--rider` > profile).
    pub fn rider_id(&self) -> Result<&str, CliError> {
        self.rider_id
            .as_deref()
            .ok_or_else(|| CliError::Validation {
                field: "rider".into(),
                reason: format!(
                    "no rider id for profile '{}'; pass --rider or set rider_id",
                    self.profile_name
                ),
            })
    }
}

/// Resolve the active profile name from CLI flags and config.
pub fn active_profile_name(global: &GlobalOpts, config: &Config) -> String {
    config.profile_name(global.profile.as_deref()).to_owned()
}

/// Build the runtime configuration from the config file, profile, and
/// CLI overrides. Flags alone suffice when no profile exists.
pub fn resolve(global: &GlobalOpts, config: &Config) -> Result<Resolved, CliError> {
    let profile_name = active_profile_name(global, config);

    let profile = match config.profiles.get(&profile_name) {
        Some(profile) => overlay(profile.clone(), global),
        None if global.server.is_some() || global.api.is_some() => {
            overlay(Profile::default(), global)
        }
        None if global.profile.is_some() => {
            let mut available: Vec<&str> = config.profiles.keys().map(String::as_str).collect();
            available.sort_unstable();
            return Err(CliError::ProfileNotFound {
                name: profile_name,
                available: available.join(", "),
            });
        }
        None => {
            return Err(CliError::NoConfig {
                path: rc::config_path().display().to_string(),
            });
        }
    };

    if profile.server.is_empty() || profile.api.is_empty() {
        return Err(CliError::Validation {
            field: if profile.server.is_empty() { "server" } else { "api" }.into(),
            reason: "both --server and --api are required without a profile".into(),
        });
    }

    let client = rc::profile_to_client_config(&profile, &config.defaults)?;
    let token = match global.token {
        Some(ref token) => SecretString::from(token.clone()),
        None => rc::resolve_token(&profile, &profile_name)?,
    };

    Ok(Resolved {
        profile_name,
        client,
        token,
        rider_id: profile.rider_id,
    })
}

/// Apply flag overrides (flag > env > profile).
fn overlay(mut profile: Profile, global: &GlobalOpts) -> Profile {
    if let Some(ref server) = global.server {
        profile.server.clone_from(server);
    }
    if let Some(ref api) = global.api {
        profile.api.clone_from(api);
    }
    if let Some(ref rider) = global.rider {
        profile.rider_id = Some(rider.clone());
    }
    if let Some(timeout) = global.timeout {
        profile.timeout = Some(timeout);
    }
    profile
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use clap::Parser;
    use secrecy::ExposeSecret;

    use super::*;
    use crate::cli::Cli;

    fn global(args: &[&str]) -> GlobalOpts {
        let mut argv = vec!["ridelink"];
        argv.extend_from_slice(args);
        argv.extend_from_slice(&["status", "r-1"]);
        Cli::try_parse_from(argv).unwrap().global
    }

    fn config_with_home() -> Config {
        let mut config = Config::default();
        config.default_profile = Some("home".into());
        config.profiles.insert(
            "home".into(),
            Profile {
                server: "wss://rides.example.com/socket".into(),
                api: "https://rides.example.com/api".into(),
                rider_id: Some("rider-1".into()),
                token: Some("profile-token".into()),
                token_env: Some("RIDELINK_TEST_UNSET_TOKEN_VAR".into()),
                ..Profile::default()
            },
        );
        config
    }

    #[test]
    fn flags_override_profile() {
        let opts = global(&[
            "--api",
            "http://localhost:9000/api",
            "--rider",
            "rider-9",
            "--token",
            "flag-token",
            "--timeout",
            "3",
        ]);

        let resolved = resolve(&opts, &config_with_home()).unwrap();

        assert_eq!(resolved.profile_name, "home");
        assert_eq!(resolved.client.api_url.as_str(), "http://localhost:9000/api");
        assert_eq!(
            resolved.client.server_url.as_str(),
            "wss://rides.example.com/socket"
        );
        assert_eq!(resolved.rider_id().unwrap(), "rider-9");
        assert_eq!(resolved.token.expose_secret(), "flag-token");
        assert_eq!(resolved.client.request_timeout, Duration::from_secs(3));
    }

    #[test]
    fn profile_token_used_without_flag() {
        let opts = global(&[]);
        let resolved = resolve(&opts, &config_with_home()).unwrap();
        assert_eq!(resolved.token.expose_secret(), "profile-token");
    }

    #[test]
    fn unknown_profile_lists_alternatives() {
        let opts = global(&["--profile", "work"]);
        let err = resolve(&opts, &config_with_home()).unwrap_err();
        assert!(
            matches!(err, CliError::ProfileNotFound { ref available, .. } if available == "home")
        );
    }

    #[test]
    fn nothing_configured_points_at_init() {
        let opts = global(&[]);
        let err = resolve(&opts, &Config::default()).unwrap_err();
        assert!(matches!(err, CliError::NoConfig { .. }));
    }
}
