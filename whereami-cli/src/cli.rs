use anyhow::Context;
use clap::{ArgAction, Parser, Subcommand};
use std::time::Duration;
use tokio::{sync::broadcast::error::RecvError, time::Instant};
use whereami_core::{Config, DisplayMode, QueryOutcome, WeatherService};

use crate::{configure, render};

/// Top-level CLI struct.
#[derive(Debug, Parser)]
#[command(name = "whereami", version, about = "Where am I, and what's the weather like")]
pub struct Cli {
    /// More log output on stderr (-v info, -vv debug).
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Interactively set provider, API key, units and location preferences.
    Configure {
        /// Provider to preselect, e.g. "aggregator" or "daily-service".
        provider: Option<String>,
    },

    /// Show weather for the current location or a named place.
    Show {
        /// Place name; empty means the configured or detected location.
        query: Vec<String>,

        /// Seconds to wait for a background fetch when nothing is cached yet.
        #[arg(long, default_value_t = 5)]
        wait: u64,

        /// Include one line per forecast day.
        #[arg(long)]
        detailed: bool,
    },

    /// Show the detected location only.
    Locate,

    /// Manage the weather cache.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Debug, Subcommand)]
pub enum CacheAction {
    /// Drop every cached entry.
    Clear,
}

impl Cli {
    pub async fn run(self) -> anyhow::Result<()> {
        match self.command {
            Command::Configure { provider } => configure::run(provider.as_deref())?,
            Command::Show { query, wait, detailed } => {
                let config = Config::load()?;
                let mode = if detailed { DisplayMode::Detailed } else { config.display };
                let unit = config.unit;
                let service = WeatherService::from_config(config)?;

                let text = query.join(" ");
                let outcome = query_and_wait(&service, &text, Duration::from_secs(wait)).await;
                render::print_items(&render::render(&outcome, unit, mode));
            }
            Command::Locate => {
                let service = WeatherService::from_config(Config::load()?)?;
                let location = service.locate().await.context("Failed to determine location")?;
                render::print_items(&render::render_location(&location));
            }
            Command::Cache { action: CacheAction::Clear } => {
                let service = WeatherService::from_config(Config::load()?)?;
                service.clear_cache();
                println!("Weather cache cleared.");
            }
        }

        Ok(())
    }
}

/// Query once; while the answer is a placeholder, wait for the matching fetch to land.
async fn query_and_wait(service: &WeatherService, text: &str, wait: Duration) -> QueryOutcome {
    let key = service.cache_key(text);
    let mut events = service.subscribe();

    service.prefetch();
    let mut outcome = service.query(text);

    let deadline = Instant::now() + wait;
    while matches!(outcome, QueryOutcome::Pending) {
        match tokio::time::timeout_at(deadline, events.recv()).await {
            Ok(Ok(event)) if event.key == key => outcome = service.query(text),
            Ok(Ok(_)) | Ok(Err(RecvError::Lagged(_))) => continue,
            Ok(Err(RecvError::Closed)) | Err(_) => break,
        }
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn show_joins_query_words() {
        let cli = Cli::try_parse_from(["whereami", "show", "New", "York", "--wait", "0"]).unwrap();
        match cli.command {
            Command::Show { query, wait, detailed } => {
                assert_eq!(query.join(" "), "New York");
                assert_eq!(wait, 0);
                assert!(!detailed);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn verbose_is_global() {
        let cli = Cli::try_parse_from(["whereami", "locate", "-vv"]).unwrap();
        assert_eq!(cli.verbose, 2);
    }
}
