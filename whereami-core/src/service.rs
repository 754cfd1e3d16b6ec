//! Wires configuration, location, provider and cache into one query entry point.

use parking_lot::RwLock;
use reqwest::Client;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::{
    Config,
    cache::WeatherCache,
    coordinator::{Clock, FetchCoordinator, FetchEvent, QueryOutcome, system_clock},
    error::WeatherError,
    fallback::OrderedAttempts,
    http,
    location::{IpGeoSource, LocationResolver, LocationSource, ReverseGeocoder},
    model::{CanonicalLocation, WeatherQuery},
    provider::{WeatherProvider, provider_from_config},
};

#[derive(Debug)]
struct Settings {
    config: Config,
    provider: Arc<dyn WeatherProvider>,
}

#[derive(Debug)]
pub struct WeatherService {
    settings: RwLock<Settings>,
    resolver: Arc<LocationResolver>,
    coordinator: FetchCoordinator,
    http: Client,
}

impl WeatherService {
    /// Build the default stack: IP geolocation chain, configured provider, cache file on disk.
    pub fn from_config(config: Config) -> anyhow::Result<Self> {
        let http = http::client(config.http_timeout())?;
        let provider = provider_from_config(&config, &http)?;

        let sources: Vec<Arc<dyn LocationSource>> = IpGeoSource::defaults(&http)
            .into_iter()
            .map(|s| Arc::new(s) as Arc<dyn LocationSource>)
            .collect();
        let resolver = LocationResolver::new(sources, OrderedAttempts::new(config.http_timeout()))
            .with_reverse_geocoder(ReverseGeocoder::new(http.clone()));

        let cache = match Config::cache_file_path() {
            Ok(path) => WeatherCache::load(path),
            Err(e) => {
                tracing::warn!("No cache directory, caching in memory only: {e}");
                WeatherCache::in_memory()
            }
        };

        Ok(Self::new(config, provider, resolver, cache, system_clock(), http))
    }

    pub fn new(
        config: Config,
        provider: Arc<dyn WeatherProvider>,
        resolver: LocationResolver,
        cache: WeatherCache,
        clock: Clock,
        http: Client,
    ) -> Self {
        let coordinator = FetchCoordinator::new(cache, config.ttl(), clock);
        coordinator.reconcile_unit(config.unit);

        Self {
            settings: RwLock::new(Settings { config, provider }),
            resolver: Arc::new(resolver),
            coordinator,
            http,
        }
    }

    /// Apply changed preferences. A unit change empties the cache.
    ///
    /// The provider is rebuilt only when the settings it is built from changed.
    pub fn update_config(&self, config: Config) -> anyhow::Result<()> {
        let rebuilt = {
            let settings = self.settings.read();
            if provider_inputs_changed(&settings.config, &config) {
                Some(provider_from_config(&config, &self.http)?)
            } else {
                None
            }
        };

        self.coordinator.reconcile_unit(config.unit);
        let mut settings = self.settings.write();
        if let Some(provider) = rebuilt {
            settings.provider = provider;
        }
        settings.config = config;
        Ok(())
    }

    pub fn cache_key(&self, text: &str) -> String {
        self.settings.read().config.cache_key(text)
    }

    /// Warm the cache for the empty-query key: `"auto"`, or the static location in manual mode.
    pub fn prefetch(&self) -> QueryOutcome {
        self.query("")
    }

    /// Answer immediately from cache, or a placeholder while a refresh runs in the background.
    pub fn query(&self, text: &str) -> QueryOutcome {
        let (key, request, provider, unit) = {
            let settings = self.settings.read();
            let config = &settings.config;
            (
                config.cache_key(text),
                config.effective_query(text),
                Arc::clone(&settings.provider),
                config.unit,
            )
        };
        // Preferences may have been edited on disk by another process.
        self.coordinator.reconcile_unit(unit);

        let resolver = Arc::clone(&self.resolver);
        self.coordinator.query(&key, move || async move {
            let query = match request {
                Some(city) => WeatherQuery::City(city),
                None => WeatherQuery::Location(resolver.resolve().await?),
            };
            provider.fetch(&query, unit).await
        })
    }

    /// Where am I, without weather.
    pub async fn locate(&self) -> Result<CanonicalLocation, WeatherError> {
        self.resolver.resolve().await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FetchEvent> {
        self.coordinator.subscribe()
    }

    pub fn clear_cache(&self) {
        self.coordinator.invalidate_all();
    }
}

fn provider_inputs_changed(old: &Config, new: &Config) -> bool {
    old.provider != new.provider
        || old.fallback_provider != new.fallback_provider
        || old.api_key() != new.api_key()
        || old.http_timeout() != new.http_timeout()
}
