//! Approximate location from IP geolocation services.

use async_trait::async_trait;
use std::{fmt::Debug, sync::Arc};

use crate::{
    error::WeatherError,
    fallback::{Candidate, OrderedAttempts},
    model::{CanonicalLocation, coordinate_label},
};

pub mod ip;
pub mod nominatim;

pub use ip::{IpGeoService, IpGeoSource};
pub use nominatim::ReverseGeocoder;

/// One way of finding out where the user is.
#[async_trait]
pub trait LocationSource: Send + Sync + Debug {
    fn name(&self) -> &str;

    /// A raw fix; `city` may still be missing.
    async fn locate(&self) -> Result<LocationFix, WeatherError>;
}

impl Candidate for Arc<dyn LocationSource> {
    fn label(&self) -> &str {
        self.name()
    }
}

/// Normalized answer from a source, before the city name is guaranteed.
#[derive(Debug, Clone, PartialEq)]
pub struct LocationFix {
    pub latitude: f64,
    pub longitude: f64,
    pub city: Option<String>,
    pub region: Option<String>,
    pub country_code: Option<String>,
}

/// Walks the configured sources in order and returns the first usable fix.
///
/// Nothing is cached here; the weather cache one layer up owns that.
#[derive(Debug)]
pub struct LocationResolver {
    sources: Vec<Arc<dyn LocationSource>>,
    attempts: OrderedAttempts,
    reverse: Option<ReverseGeocoder>,
}

impl LocationResolver {
    pub fn new(sources: Vec<Arc<dyn LocationSource>>, attempts: OrderedAttempts) -> Self {
        Self { sources, attempts, reverse: None }
    }

    /// Fill in missing city names from coordinates.
    pub fn with_reverse_geocoder(mut self, reverse: ReverseGeocoder) -> Self {
        self.reverse = Some(reverse);
        self
    }

    /// Fails only once every source has errored or timed out.
    pub async fn resolve(&self) -> Result<CanonicalLocation, WeatherError> {
        let fix = self
            .attempts
            .run(&self.sources, |source| async move {
                source.locate().await.map_err(|err| match err {
                    WeatherError::Upstream(_) => err,
                    other => WeatherError::Upstream(format!("{}: {other}", source.name())),
                })
            })
            .await
            .map_err(|err| {
                tracing::warn!("All location sources failed, last error: {err}");
                WeatherError::LocationUnavailable
            })?;

        let mut city = fix.city.clone().filter(|c| !c.trim().is_empty());
        let mut country_code = fix.country_code.clone();

        if city.is_none() {
            if let Some(reverse) = &self.reverse {
                if let Some(place) = reverse.lookup(fix.latitude, fix.longitude).await {
                    city = Some(place.city);
                    country_code = country_code.or(place.country_code);
                }
            }
        }

        let location = CanonicalLocation {
            latitude: fix.latitude,
            longitude: fix.longitude,
            city: city.unwrap_or_else(|| coordinate_label(fix.latitude, fix.longitude)),
            country_code: country_code.unwrap_or_default().to_uppercase(),
            region: fix.region,
        };

        tracing::info!(
            "Resolved location: {} ({}, {})",
            location.city,
            location.latitude,
            location.longitude
        );
        Ok(location)
    }
}
