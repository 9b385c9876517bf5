//! Config subcommand handlers.

use dialoguer::Input;

use devwatch_config::{Config, Profile, profile_to_tracker_config};

use crate::cli::{ConfigArgs, ConfigCommand, ConfigInitArgs, GlobalOpts};
use crate::config;
use crate::error::CliError;
use crate::output;

// ── Helpers ─────────────────────────────────────────────────────────

/// Map a dialoguer / interactive I/O failure into CliError.
fn prompt_err(e: impl std::fmt::Display) -> CliError {
    CliError::Validation {
        field: "interactive".into(),
        reason: format!("prompt failed: {e}"),
    }
}

/// Ask for the profile fields `init` was not given on the command line.
fn prompt_profile(args: &ConfigInitArgs) -> Result<(String, Profile), CliError> {
    eprintln!("devwatch configuration wizard");
    eprintln!("   Config path: {}\n", config::config_path().display());

    let name: String = Input::new()
        .with_prompt("Profile name")
        .default(args.profile_name.clone())
        .interact_text()
        .map_err(prompt_err)?;

    let backend: String = Input::new()
        .with_prompt("Backend URL")
        .default("http://localhost:8080".into())
        .interact_text()
        .map_err(prompt_err)?;
    config::parse_url("backend", &backend)?;

    let websocket: String = Input::new()
        .with_prompt("Broker WebSocket URL (empty to derive from the backend)")
        .allow_empty(true)
        .interact_text()
        .map_err(prompt_err)?;

    let agent_id: String = Input::new()
        .with_prompt("Agent id")
        .default(args.agent_id.clone().unwrap_or_else(|| "devwatch".into()))
        .interact_text()
        .map_err(prompt_err)?;

    let mut profile = Profile::new(backend);
    profile.websocket = Some(websocket).filter(|w| !w.trim().is_empty());
    profile.agent_id = agent_id;
    Ok((name, profile))
}

fn profile_from_flags(args: &ConfigInitArgs, backend: &str) -> Profile {
    let mut profile = Profile::new(backend);
    profile.websocket.clone_from(&args.websocket_url);
    if let Some(ref agent) = args.agent_id {
        agent.clone_into(&mut profile.agent_id);
    }
    profile
}

fn init(args: &ConfigInitArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let (name, profile) = match args.backend_url.as_deref() {
        Some(backend) => (args.profile_name.clone(), profile_from_flags(args, backend)),
        None => prompt_profile(args)?,
    };

    let mut cfg = config::load_config_or_default();
    // Reject a profile that could never run.
    profile_to_tracker_config(&profile, &cfg.defaults)?;

    let first = cfg.profiles.is_empty();
    cfg.profiles.insert(name.clone(), profile);
    if first {
        cfg.default_profile = Some(name.clone());
    }
    let path = config::save_config(&cfg)?;

    if !global.quiet {
        eprintln!("Profile '{name}' saved to {}", path.display());
    }
    Ok(())
}

fn show(cfg: &Config, global: &GlobalOpts) -> Result<(), CliError> {
    let out = output::render_single(
        &global.output,
        cfg,
        |c| toml::to_string_pretty(c).unwrap_or_else(|e| format!("<unrenderable config: {e}>")),
        |c| c.profiles.keys().cloned().collect::<Vec<_>>().join("\n"),
    );
    output::print_output(&out, global.quiet);
    Ok(())
}

fn use_profile(name: &str, global: &GlobalOpts) -> Result<(), CliError> {
    let mut cfg = config::load_config()?;
    if !cfg.profiles.contains_key(name) {
        let available = cfg.profiles.keys().cloned().collect::<Vec<_>>().join(", ");
        return Err(CliError::ProfileNotFound {
            name: name.into(),
            available,
        });
    }
    cfg.default_profile = Some(name.into());
    config::save_config(&cfg)?;
    if !global.quiet {
        eprintln!("Default profile set to '{name}'");
    }
    Ok(())
}

// ── Handler ─────────────────────────────────────────────────────────

pub fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        ConfigCommand::Init(init_args) => init(&init_args, global),
        ConfigCommand::Show => show(&config::load_config()?, global),
        ConfigCommand::Path => {
            println!("{}", config::config_path().display());
            Ok(())
        }
        ConfigCommand::Use { name } => use_profile(&name, global),
    }
}
