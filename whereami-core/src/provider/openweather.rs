use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::collections::BTreeMap;

use crate::{
    error::WeatherError,
    http::get_json,
    model::{CurrentConditions, ForecastDay, Unit, WeatherQuery, WeatherSnapshot},
};

use super::WeatherProvider;

const DEFAULT_BASE_URL: &str = "https://api.openweathermap.org";
const FORECAST_DAYS: usize = 2;

/// Key-based provider: one 3-hourly forecast list, folded into per-day min/max.
#[derive(Debug, Clone)]
pub struct OpenWeatherProvider {
    api_key: String,
    http: Client,
    base_url: String,
}

impl OpenWeatherProvider {
    pub fn new(api_key: String, http: Client) -> Self {
        Self {
            api_key,
            http,
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn fetch_forecast(&self, query: &WeatherQuery, unit: Unit) -> Result<OwForecastResponse, WeatherError> {
        let url = format!("{}/data/2.5/forecast", self.base_url);
        let units = match unit {
            Unit::Celsius => "metric",
            Unit::Fahrenheit => "imperial",
        };

        let mut params: Vec<(&str, String)> = vec![
            ("appid", self.api_key.clone()),
            ("units", units.to_string()),
        ];
        let subject = match query {
            WeatherQuery::City(name) => {
                params.push(("q", name.clone()));
                name.clone()
            }
            WeatherQuery::Location(loc) => {
                params.push(("lat", loc.latitude.to_string()));
                params.push(("lon", loc.longitude.to_string()));
                loc.city.clone()
            }
        };

        tracing::debug!("OpenWeather forecast request for {subject}");
        get_json(self.http.get(url).query(&params), "OpenWeather forecast", &subject).await
    }
}

#[async_trait]
impl WeatherProvider for OpenWeatherProvider {
    fn name(&self) -> &str {
        "openweather"
    }

    async fn fetch(&self, query: &WeatherQuery, unit: Unit) -> Result<WeatherSnapshot, WeatherError> {
        if self.api_key.trim().is_empty() {
            return Err(WeatherError::InvalidCredentials);
        }

        let parsed = self.fetch_forecast(query, unit).await?;

        let first = parsed.list.first().ok_or_else(|| {
            WeatherError::Upstream("OpenWeather forecast response contained no data".to_string())
        })?;
        let (code, description) = first.condition();
        let current = CurrentConditions {
            temp: round_temp(first.main.temp),
            condition_code: code,
            description,
        };

        let forecast = aggregate_by_date(&parsed.list, parsed.city.timezone.unwrap_or(0))
            .into_iter()
            .skip(1)
            .take(FORECAST_DAYS)
            .map(DayAggregate::into_forecast_day)
            .collect();

        let (fallback_city, fallback_coords) = match query {
            WeatherQuery::City(name) => (name.clone(), None),
            WeatherQuery::Location(loc) => (loc.city.clone(), Some((loc.latitude, loc.longitude))),
        };
        let coords = parsed.city.coord.map(|c| (c.lat, c.lon)).or(fallback_coords);
        let city_name = parsed.city.name.filter(|n| !n.is_empty()).unwrap_or(fallback_city);

        tracing::info!("OpenWeather returned {} entries for {city_name}", parsed.list.len());

        Ok(WeatherSnapshot {
            city_name,
            country_code: parsed.city.country.unwrap_or_default(),
            current,
            forecast,
            fetched_at: Utc::now(),
            latitude: coords.map(|c| c.0),
            longitude: coords.map(|c| c.1),
        })
    }
}

/// Per-date fold of forecast-list entries.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct DayAggregate {
    pub date: NaiveDate,
    pub min: f64,
    pub max: f64,
    pub condition_code: i32,
    pub description: String,
}

impl DayAggregate {
    fn into_forecast_day(self) -> ForecastDay {
        ForecastDay {
            date: Some(self.date),
            min_temp: round_temp(self.min),
            max_temp: round_temp(self.max),
            condition_code: self.condition_code,
            description: self.description,
        }
    }
}

/// Group entries by calendar date, ascending.
///
/// The representative condition for a date comes from its earliest entry; later
/// entries for the same date only widen min/max.
pub(crate) fn aggregate_by_date(entries: &[OwForecastEntry], utc_offset_secs: i64) -> Vec<DayAggregate> {
    let mut ordered: Vec<&OwForecastEntry> = entries.iter().collect();
    ordered.sort_by_key(|e| e.dt);

    let mut days: BTreeMap<NaiveDate, DayAggregate> = BTreeMap::new();
    for entry in ordered {
        let Some(local) = DateTime::<Utc>::from_timestamp(entry.dt + utc_offset_secs, 0) else {
            continue;
        };
        let date = local.date_naive();
        let (min, max) = entry.main.min_max();

        days.entry(date)
            .and_modify(|day| {
                day.max = day.max.max(max);
                day.min = day.min.min(min);
            })
            .or_insert_with(|| {
                let (condition_code, description) = entry.condition();
                DayAggregate { date, min, max, condition_code, description }
            });
    }

    days.into_values().collect()
}

fn round_temp(t: f64) -> i32 {
    t.round() as i32
}

#[derive(Debug, Deserialize)]
pub(crate) struct OwMain {
    pub temp: f64,
    #[serde(default)]
    pub temp_min: Option<f64>,
    #[serde(default)]
    pub temp_max: Option<f64>,
}

impl OwMain {
    fn min_max(&self) -> (f64, f64) {
        (self.temp_min.unwrap_or(self.temp), self.temp_max.unwrap_or(self.temp))
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct OwWeather {
    pub id: i32,
    pub description: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct OwForecastEntry {
    pub dt: i64,
    pub main: OwMain,
    #[serde(default)]
    pub weather: Vec<OwWeather>,
}

impl OwForecastEntry {
    fn condition(&self) -> (i32, String) {
        self.weather
            .first()
            .map(|w| (w.id, w.description.clone()))
            .unwrap_or_else(|| (0, "unknown".to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct OwCoord {
    lat: f64,
    lon: f64,
}

#[derive(Debug, Deserialize)]
struct OwCity {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    country: Option<String>,
    #[serde(default)]
    coord: Option<OwCoord>,
    #[serde(default)]
    timezone: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct OwForecastResponse {
    city: OwCity,
    list: Vec<OwForecastEntry>,
}
