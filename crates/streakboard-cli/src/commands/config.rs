//! Config commands for CLI.
//!
//! Keys are dot paths into `config.toml`: `user.id`, `engine.max_retries`,
//! `clock.utc_offset_hours`, `log.level`.

use clap::Subcommand;
use streakboard_core::{Config, ConfigError};

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Print one value, e.g. `engine.max_retries`
    Get { key: String },
    /// Change one value; the type must match the existing setting
    Set { key: String, value: String },
    /// Print the whole configuration as TOML
    List,
    /// Print where the configuration file lives
    Path,
    /// Restore defaults (user id, retries, clock, log level)
    Reset,
}

pub fn run(action: ConfigAction) -> Result<(), Box<dyn std::error::Error>> {
    match action {
        ConfigAction::Get { key } => {
            let value = Config::load()?
                .get(&key)
                .ok_or(ConfigError::UnknownKey(key))?;
            println!("{value}");
        }
        ConfigAction::Set { key, value } => {
            let mut config = Config::load()?;
            config.set(&key, &value)?;
            // Echo the stored form so typos in numeric values are visible.
            let stored = config.get(&key).unwrap_or(value);
            println!("{key} = {stored}");
        }
        ConfigAction::List => {
            print!("{}", toml::to_string_pretty(&Config::load()?)?);
        }
        ConfigAction::Path => {
            println!("{}", Config::path()?.display());
        }
        ConfigAction::Reset => {
            Config::default().save()?;
            println!("config reset to defaults");
        }
    }
    Ok(())
}
