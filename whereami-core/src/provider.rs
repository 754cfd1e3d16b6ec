use crate::{
    Config,
    error::WeatherError,
    fallback::{Candidate, OrderedAttempts},
    model::{Unit, WeatherQuery, WeatherSnapshot},
    provider::{openmeteo::OpenMeteoProvider, openweather::OpenWeatherProvider},
};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::{fmt::Debug, sync::Arc};

pub mod openmeteo;
pub mod openweather;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProviderId {
    /// Key-based forecast-list aggregator (OpenWeather).
    #[serde(rename = "aggregator", alias = "openweather")]
    Aggregator,
    /// Keyless daily forecast service (Open-Meteo).
    #[serde(rename = "daily-service", alias = "open-meteo", alias = "openmeteo")]
    DailyService,
}

impl ProviderId {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderId::Aggregator => "aggregator",
            ProviderId::DailyService => "daily-service",
        }
    }

    pub const fn all() -> &'static [ProviderId] {
        &[ProviderId::Aggregator, ProviderId::DailyService]
    }

    pub fn requires_api_key(&self) -> bool {
        matches!(self, ProviderId::Aggregator)
    }
}

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for ProviderId {
    type Error = anyhow::Error;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let lower = value.to_lowercase();

        match lower.as_str() {
            "aggregator" | "openweather" => Ok(ProviderId::Aggregator),
            "daily-service" | "open-meteo" | "openmeteo" => Ok(ProviderId::DailyService),
            _ => Err(anyhow::anyhow!(
                "Unknown provider '{value}'. Supported providers: aggregator, daily-service."
            )),
        }
    }
}

#[async_trait]
pub trait WeatherProvider: Send + Sync + Debug {
    /// Short name used in logs.
    fn name(&self) -> &str;

    async fn fetch(&self, query: &WeatherQuery, unit: Unit) -> Result<WeatherSnapshot, WeatherError>;
}

impl Candidate for Arc<dyn WeatherProvider> {
    fn label(&self) -> &str {
        self.name()
    }
}

/// Tries each provider in order; stops early when one reports the location as not found.
#[derive(Debug)]
pub struct FallbackProvider {
    providers: Vec<Arc<dyn WeatherProvider>>,
    attempts: OrderedAttempts,
}

impl FallbackProvider {
    pub fn new(providers: Vec<Arc<dyn WeatherProvider>>, attempts: OrderedAttempts) -> Self {
        Self { providers, attempts }
    }
}

#[async_trait]
impl WeatherProvider for FallbackProvider {
    fn name(&self) -> &str {
        "fallback"
    }

    async fn fetch(&self, query: &WeatherQuery, unit: Unit) -> Result<WeatherSnapshot, WeatherError> {
        self.attempts
            .run(&self.providers, |p| p.fetch(query, unit))
            .await
    }
}

fn single_provider(
    id: ProviderId,
    config: &Config,
    http: &Client,
) -> anyhow::Result<Arc<dyn WeatherProvider>> {
    let provider: Arc<dyn WeatherProvider> = match id {
        ProviderId::Aggregator => {
            let api_key = config.api_key().ok_or_else(|| {
                anyhow::anyhow!(
                    "No API key configured for provider '{id}'.\n\
                     Hint: run `whereami configure` and enter your API key."
                )
            })?;
            Arc::new(OpenWeatherProvider::new(api_key.to_owned(), http.clone()))
        }
        ProviderId::DailyService => Arc::new(OpenMeteoProvider::new(http.clone())),
    };

    Ok(provider)
}

/// Construct the configured provider, wrapped in a fallback chain when a second one is set.
pub fn provider_from_config(
    config: &Config,
    http: &Client,
) -> anyhow::Result<Arc<dyn WeatherProvider>> {
    let primary = single_provider(config.provider, config, http)?;

    match config.fallback_provider {
        Some(fallback) if fallback != config.provider => {
            let secondary = single_provider(fallback, config, http)?;
            // Two requests (geocode + forecast) may run inside one attempt.
            let attempts = OrderedAttempts::new(config.http_timeout() * 2);
            Ok(Arc::new(FallbackProvider::new(vec![primary, secondary], attempts)))
        }
        _ => Ok(primary),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CurrentConditions;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Debug)]
    struct StubProvider {
        name: &'static str,
        result: Result<WeatherSnapshot, WeatherError>,
        calls: AtomicUsize,
    }

    impl StubProvider {
        fn new(name: &'static str, result: Result<WeatherSnapshot, WeatherError>) -> Arc<Self> {
            Arc::new(Self { name, result, calls: AtomicUsize::new(0) })
        }
    }

    #[async_trait]
    impl WeatherProvider for StubProvider {
        fn name(&self) -> &str {
            self.name
        }

        async fn fetch(&self, _: &WeatherQuery, _: Unit) -> Result<WeatherSnapshot, WeatherError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result.clone()
        }
    }

    fn snapshot(city: &str) -> WeatherSnapshot {
        WeatherSnapshot {
            city_name: city.to_string(),
            country_code: "XX".to_string(),
            current: CurrentConditions { temp: 10, condition_code: 0, description: "clear".into() },
            forecast: Vec::new(),
            fetched_at: Utc::now(),
            latitude: None,
            longitude: None,
        }
    }

    fn chain(a: Arc<StubProvider>, b: Arc<StubProvider>) -> FallbackProvider {
        let providers = vec![a as Arc<dyn WeatherProvider>, b];
        FallbackProvider::new(providers, OrderedAttempts::new(Duration::from_secs(1)))
    }

    #[test]
    fn provider_id_as_str_roundtrip() {
        for id in ProviderId::all() {
            let s = id.as_str();
            let parsed = ProviderId::try_from(s).expect("roundtrip should succeed");
            assert_eq!(*id, parsed);
        }
    }

    #[test]
    fn provider_id_accepts_service_names() {
        assert_eq!(ProviderId::try_from("OpenWeather").unwrap(), ProviderId::Aggregator);
        assert_eq!(ProviderId::try_from("open-meteo").unwrap(), ProviderId::DailyService);
    }

    #[test]
    fn unknown_provider_error() {
        let err = ProviderId::try_from("doesnotexist").unwrap_err();
        assert!(err.to_string().contains("Unknown provider"));
    }

    #[test]
    fn provider_from_config_errors_when_missing_api_key() {
        let cfg = Config { provider: ProviderId::Aggregator, ..Config::default() };
        let err = provider_from_config(&cfg, &Client::new()).unwrap_err();
        assert!(err.to_string().contains("No API key configured for provider"));
    }

    #[test]
    fn default_config_needs_no_key() {
        let provider = provider_from_config(&Config::default(), &Client::new()).unwrap();
        assert_eq!(provider.name(), "open-meteo");
    }

    #[test]
    fn fallback_provider_is_built_when_configured() {
        let mut cfg = Config {
            provider: ProviderId::Aggregator,
            fallback_provider: Some(ProviderId::DailyService),
            ..Config::default()
        };
        cfg.set_api_key("KEY".into());

        let provider = provider_from_config(&cfg, &Client::new()).unwrap();
        assert_eq!(provider.name(), "fallback");
    }

    #[tokio::test]
    async fn fallback_uses_second_provider_on_upstream_error() {
        let a = StubProvider::new("a", Err(WeatherError::Upstream("down".into())));
        let b = StubProvider::new("b", Ok(snapshot("Lisbon")));
        let provider = chain(a.clone(), b.clone());

        let snap = provider
            .fetch(&WeatherQuery::City("Lisbon".into()), Unit::Celsius)
            .await
            .unwrap();

        assert_eq!(snap.city_name, "Lisbon");
        assert_eq!(a.calls.load(Ordering::SeqCst), 1);
        assert_eq!(b.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn fallback_stops_on_not_found() {
        let a = StubProvider::new("a", Err(WeatherError::NotFound("Atlantis".into())));
        let b = StubProvider::new("b", Ok(snapshot("Atlantis")));
        let provider = chain(a, b.clone());

        let err = provider
            .fetch(&WeatherQuery::City("Atlantis".into()), Unit::Celsius)
            .await
            .unwrap_err();

        assert_eq!(err, WeatherError::NotFound("Atlantis".into()));
        assert_eq!(b.calls.load(Ordering::SeqCst), 0);
    }
}
