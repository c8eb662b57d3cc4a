//! Config subcommand handlers.

use dialoguer::{Input, Select};

use ridelink_config::{self as rc, Config, Profile};

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::config::active_profile_name;
use crate::error::CliError;
use crate::output::{self, Painter};

const REDACTED: &str = "********";

pub fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        ConfigCommand::Path => {
            output::print_output(&rc::config_path().display().to_string(), global.quiet);
            Ok(())
        }
        ConfigCommand::Show => {
            let cfg = rc::load_config()?;
            let shown = redacted(cfg);
            let painter = Painter::new(global.color);
            let rendered = output::render_single(
                global.output,
                &shown,
                |cfg| show_text(painter, cfg, global),
                |cfg| {
                    let mut names: Vec<&str> = cfg.profiles.keys().map(String::as_str).collect();
                    names.sort_unstable();
                    names.join("\n")
                },
            )?;
            output::print_output(&rendered, global.quiet);
            Ok(())
        }
        ConfigCommand::Init => init(global),
    }
}

// ── Init: interactive wizard ─────────────────────────────────────────

fn init(global: &GlobalOpts) -> Result<(), CliError> {
    let config_path = rc::config_path();
    eprintln!("ridelink configuration wizard");
    eprintln!("   Config path: {}\n", config_path.display());

    let mut cfg = rc::load_config_or_default();

    let profile_name: String = Input::new()
        .with_prompt("Profile name")
        .default(global.profile.clone().unwrap_or_else(|| "default".into()))
        .interact_text()
        .map_err(CliError::prompt)?;

    let server: String = Input::new()
        .with_prompt("Socket URL")
        .default("wss://rides.example.com/socket".into())
        .validate_with(|s: &String| {
            rc::parse_url("server", s, &["ws", "wss"])
                .map(|_| ())
                .map_err(|e| e.to_string())
        })
        .interact_text()
        .map_err(CliError::prompt)?;

    let api: String = Input::new()
        .with_prompt("Query API URL")
        .default("https://rides.example.com/api".into())
        .validate_with(|s: &String| {
            rc::parse_url("api", s, &["http", "https"])
                .map(|_| ())
                .map_err(|e| e.to_string())
        })
        .interact_text()
        .map_err(CliError::prompt)?;

    let rider_id: String = Input::new()
        .with_prompt("Rider id")
        .allow_empty(true)
        .interact_text()
        .map_err(CliError::prompt)?;

    let token = rpassword::prompt_password("Access token: ").map_err(CliError::prompt)?;
    if token.is_empty() {
        return Err(CliError::Validation {
            field: "token".into(),
            reason: "token cannot be empty".into(),
        });
    }

    let store_choices = &[
        "Store in system keyring (recommended)",
        "Save to config file (plaintext)",
    ];
    let store_selection = Select::new()
        .with_prompt("Where to store the token?")
        .items(store_choices)
        .default(0)
        .interact()
        .map_err(CliError::prompt)?;

    let plaintext = if store_selection == 0 {
        rc::store_token(&profile_name, &token)?;
        eprintln!("   ✓ Token stored in system keyring");
        None
    } else {
        Some(token)
    };

    let previous = cfg.profiles.remove(&profile_name).unwrap_or_default();
    cfg.profiles.insert(
        profile_name.clone(),
        Profile {
            server,
            api,
            rider_id: Some(rider_id).filter(|id| !id.is_empty()),
            token: plaintext,
            ..previous
        },
    );
    if cfg.profiles.len() == 1 {
        cfg.default_profile = Some(profile_name.clone());
    }

    rc::save_config_to(&cfg, &config_path)?;
    eprintln!("\n   ✓ Profile '{profile_name}' saved to {}", config_path.display());
    Ok(())
}

// ── Show helpers ─────────────────────────────────────────────────────

fn redacted(mut cfg: Config) -> Config {
    for profile in cfg.profiles.values_mut() {
        if profile.token.is_some() {
            profile.token = Some(REDACTED.into());
        }
    }
    cfg
}

fn show_text(painter: Painter, cfg: &Config, global: &GlobalOpts) -> String {
    let active = active_profile_name(global, cfg);
    let mut entries: Vec<(&String, &Profile)> = cfg.profiles.iter().collect();
    entries.sort_unstable_by_key(|(name, _)| *name);

    let mut blocks = vec![output::detail_block(
        painter,
        &[
            ("default profile", cfg.profile_name(None).to_owned()),
            ("output", cfg.defaults.output.clone()),
            ("timeout", format!("{}s", cfg.defaults.timeout)),
        ],
    )];

    for (name, profile) in entries {
        let heading = if *name == active {
            painter.good(&format!("[{name}] (active)"))
        } else {
            painter.accent(&format!("[{name}]"))
        };
        let token = match (&profile.token, &profile.token_env) {
            (Some(_), _) => "plaintext".to_owned(),
            (None, Some(var)) => format!("${var}"),
            (None, None) => "keyring / $RIDELINK_TOKEN".to_owned(),
        };
        let mut rows = vec![
            ("server", profile.server.clone()),
            ("api", profile.api.clone()),
            (
                "rider",
                profile.rider_id.clone().unwrap_or_else(|| "-".into()),
            ),
            ("token", token),
        ];
        if let Some(ref ca) = profile.ca_cert {
            rows.push(("ca cert", ca.display().to_string()));
        }
        if let Some(timeout) = profile.timeout {
            rows.push(("timeout", format!("{timeout}s")));
        }
        blocks.push(format!("{heading}\n{}", output::detail_block(painter, &rows)));
    }
    blocks.join("\n\n")
}
