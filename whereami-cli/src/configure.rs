use anyhow::{Context, Result};
use inquire::{Password, PasswordDisplayMode, Select, Text};
use whereami_core::{Config, DisplayMode, LocationMode, ProviderId, Unit};

/// Prompt for every preference, starting from the saved values, and write them back.
pub fn run(preselect: Option<&str>) -> Result<()> {
    let mut config = Config::load()?;

    if let Some(name) = preselect {
        config.provider = ProviderId::try_from(name)?;
    }

    let providers = ProviderId::all().to_vec();
    let start = providers.iter().position(|p| *p == config.provider).unwrap_or(0);
    config.provider = Select::new("Weather provider:", providers)
        .with_starting_cursor(start)
        .prompt()
        .context("Provider selection cancelled")?;

    if config.provider.requires_api_key() || config.fallback_provider.is_some_and(|p| p.requires_api_key()) {
        let key = Password::new("API key (leave empty to keep the current one):")
            .with_display_mode(PasswordDisplayMode::Masked)
            .without_confirmation()
            .prompt()
            .context("API key entry cancelled")?;
        if !key.trim().is_empty() {
            config.set_api_key(key);
        }
    }

    let units = [Unit::Celsius, Unit::Fahrenheit];
    let start = units.iter().position(|u| *u == config.unit).unwrap_or(0);
    let picked = Select::new("Temperature unit:", vec!["Celsius (°C)", "Fahrenheit (°F)"])
        .with_starting_cursor(start)
        .raw_prompt()
        .context("Unit selection cancelled")?;
    config.unit = units[picked.index];

    let modes = [LocationMode::Auto, LocationMode::Manual];
    let start = modes.iter().position(|m| *m == config.location_mode).unwrap_or(0);
    let picked = Select::new("Location:", vec!["Detect automatically", "Fixed place"])
        .with_starting_cursor(start)
        .raw_prompt()
        .context("Location mode selection cancelled")?;
    config.location_mode = modes[picked.index];

    if config.location_mode == LocationMode::Manual {
        let current = config.static_location.clone().unwrap_or_default();
        let place = Text::new("Place name:")
            .with_initial_value(&current)
            .prompt()
            .context("Place entry cancelled")?;
        config.static_location = Some(place.trim().to_string()).filter(|p| !p.is_empty());
    }

    let displays = vec![DisplayMode::Compact, DisplayMode::Detailed];
    let start = displays.iter().position(|d| *d == config.display).unwrap_or(0);
    config.display = Select::new("Display:", displays)
        .with_starting_cursor(start)
        .prompt()
        .context("Display selection cancelled")?;

    config.save()?;
    println!("Saved configuration to {}", Config::config_file_path()?.display());
    Ok(())
}
