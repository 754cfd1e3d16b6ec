use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use reqwest::Client;
use serde::Deserialize;

use crate::{
    error::WeatherError,
    http::get_json,
    model::{CanonicalLocation, CurrentConditions, ForecastDay, Unit, WeatherQuery, WeatherSnapshot},
};

use super::WeatherProvider;

const DEFAULT_FORECAST_URL: &str = "https://api.open-meteo.com";
const DEFAULT_GEOCODING_URL: &str = "https://geocoding-api.open-meteo.com";
const FORECAST_DAYS: usize = 2;

/// WMO weather interpretation codes.
static WMO_DESCRIPTIONS: &[(i32, &str)] = &[
    (0, "clear sky"),
    (1, "mainly clear"),
    (2, "partly cloudy"),
    (3, "overcast"),
    (45, "fog"),
    (48, "depositing rime fog"),
    (51, "light drizzle"),
    (53, "moderate drizzle"),
    (55, "dense drizzle"),
    (56, "light freezing drizzle"),
    (57, "dense freezing drizzle"),
    (61, "slight rain"),
    (63, "moderate rain"),
    (65, "heavy rain"),
    (66, "light freezing rain"),
    (67, "heavy freezing rain"),
    (71, "slight snow fall"),
    (73, "moderate snow fall"),
    (75, "heavy snow fall"),
    (77, "snow grains"),
    (80, "slight rain showers"),
    (81, "moderate rain showers"),
    (82, "violent rain showers"),
    (85, "slight snow showers"),
    (86, "heavy snow showers"),
    (95, "thunderstorm"),
    (96, "thunderstorm with slight hail"),
    (99, "thunderstorm with heavy hail"),
];

pub fn describe_wmo_code(code: i32) -> &'static str {
    WMO_DESCRIPTIONS
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, desc)| *desc)
        .unwrap_or("unknown")
}

/// Keyless daily forecast service; city names are geocoded first.
#[derive(Debug, Clone)]
pub struct OpenMeteoProvider {
    http: Client,
    forecast_url: String,
    geocoding_url: String,
}

impl OpenMeteoProvider {
    pub fn new(http: Client) -> Self {
        Self {
            http,
            forecast_url: DEFAULT_FORECAST_URL.to_string(),
            geocoding_url: DEFAULT_GEOCODING_URL.to_string(),
        }
    }

    pub fn with_base_urls(mut self, forecast_url: impl Into<String>, geocoding_url: impl Into<String>) -> Self {
        self.forecast_url = forecast_url.into();
        self.geocoding_url = geocoding_url.into();
        self
    }

    /// Best (first) geocoding match for a city name.
    async fn geocode(&self, city: &str) -> Result<CanonicalLocation, WeatherError> {
        let url = format!("{}/v1/search", self.geocoding_url);

        let parsed: OmGeocodingResponse = get_json(
            self.http
                .get(url)
                .query(&[("name", city), ("count", "1"), ("language", "en"), ("format", "json")]),
            "Open-Meteo geocoding",
            city,
        )
        .await?;

        let hit = parsed
            .results
            .into_iter()
            .next()
            .ok_or_else(|| WeatherError::NotFound(city.to_string()))?;

        tracing::debug!("Geocoded {city} to {} ({}, {})", hit.name, hit.latitude, hit.longitude);

        Ok(CanonicalLocation {
            latitude: hit.latitude,
            longitude: hit.longitude,
            city: hit.name,
            country_code: hit.country_code.unwrap_or_default(),
            region: hit.admin1,
        })
    }

    async fn fetch_daily(&self, location: &CanonicalLocation, unit: Unit) -> Result<OmForecastResponse, WeatherError> {
        let url = format!("{}/v1/forecast", self.forecast_url);
        let temperature_unit = match unit {
            Unit::Celsius => "celsius",
            Unit::Fahrenheit => "fahrenheit",
        };

        get_json(
            self.http.get(url).query(&[
                ("latitude", location.latitude.to_string()),
                ("longitude", location.longitude.to_string()),
                ("current_weather", "true".to_string()),
                ("daily", "weathercode,temperature_2m_max,temperature_2m_min".to_string()),
                ("timezone", "auto".to_string()),
                ("temperature_unit", temperature_unit.to_string()),
            ]),
            "Open-Meteo forecast",
            &location.city,
        )
        .await
    }
}

#[async_trait]
impl WeatherProvider for OpenMeteoProvider {
    fn name(&self) -> &str {
        "open-meteo"
    }

    async fn fetch(&self, query: &WeatherQuery, unit: Unit) -> Result<WeatherSnapshot, WeatherError> {
        let location = match query {
            WeatherQuery::City(name) => self.geocode(name).await?,
            WeatherQuery::Location(loc) => loc.clone(),
        };

        let parsed = self.fetch_daily(&location, unit).await?;

        let current = CurrentConditions {
            temp: parsed.current_weather.temperature.round() as i32,
            condition_code: parsed.current_weather.weathercode,
            description: describe_wmo_code(parsed.current_weather.weathercode).to_string(),
        };
        let forecast = parsed.daily.after_today().take(FORECAST_DAYS).collect();

        tracing::info!("Open-Meteo returned daily forecast for {}", location.city);

        Ok(WeatherSnapshot {
            city_name: location.city,
            country_code: location.country_code,
            current,
            forecast,
            fetched_at: Utc::now(),
            latitude: Some(location.latitude),
            longitude: Some(location.longitude),
        })
    }
}

#[derive(Debug, Deserialize)]
struct OmGeocodingHit {
    name: String,
    latitude: f64,
    longitude: f64,
    #[serde(default)]
    country_code: Option<String>,
    #[serde(default)]
    admin1: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OmGeocodingResponse {
    // Absent entirely when nothing matched.
    #[serde(default)]
    results: Vec<OmGeocodingHit>,
}

#[derive(Debug, Deserialize)]
struct OmCurrentWeather {
    temperature: f64,
    weathercode: i32,
}

#[derive(Debug, Deserialize)]
struct OmDaily {
    time: Vec<String>,
    weathercode: Vec<Option<i32>>,
    temperature_2m_max: Vec<Option<f64>>,
    temperature_2m_min: Vec<Option<f64>>,
}

impl OmDaily {
    /// Days after the first row, in the order returned. Row 0 is today and is
    /// dropped by position; later rows with missing values are skipped.
    fn after_today(&self) -> impl Iterator<Item = ForecastDay> + '_ {
        self.time.iter().enumerate().skip(1).filter_map(|(i, day)| {
            let code = (*self.weathercode.get(i)?)?;
            let max = (*self.temperature_2m_max.get(i)?)?;
            let min = (*self.temperature_2m_min.get(i)?)?;
            Some(ForecastDay {
                date: NaiveDate::parse_from_str(day, "%Y-%m-%d").ok(),
                min_temp: min.round() as i32,
                max_temp: max.round() as i32,
                condition_code: code,
                description: describe_wmo_code(code).to_string(),
            })
        })
    }
}

#[derive(Debug, Deserialize)]
struct OmForecastResponse {
    current_weather: OmCurrentWeather,
    daily: OmDaily,
}
