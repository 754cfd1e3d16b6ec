use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Measurement system for temperatures. Stored values are denominated in it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Unit {
    #[default]
    #[serde(rename = "c")]
    Celsius,
    #[serde(rename = "f")]
    Fahrenheit,
}

impl Unit {
    pub fn as_str(&self) -> &'static str {
        match self {
            Unit::Celsius => "c",
            Unit::Fahrenheit => "f",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "c" | "celsius" | "metric" => Some(Unit::Celsius),
            "f" | "fahrenheit" | "imperial" => Some(Unit::Fahrenheit),
            _ => None,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Unit::Celsius => "°C",
            Unit::Fahrenheit => "°F",
        }
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Approximate position of the user, normalized from whichever source answered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalLocation {
    pub latitude: f64,
    pub longitude: f64,
    pub city: String,
    pub country_code: String,
    #[serde(default)]
    pub region: Option<String>,
}

impl CanonicalLocation {
    pub fn maps_url(&self) -> String {
        maps_url(self.latitude, self.longitude)
    }
}

pub fn maps_url(latitude: f64, longitude: f64) -> String {
    format!("https://www.google.com/maps?q={latitude},{longitude}")
}

pub fn coordinate_label(latitude: f64, longitude: f64) -> String {
    format!("{latitude:.4}, {longitude:.4}")
}

/// What a provider is asked for.
#[derive(Debug, Clone, PartialEq)]
pub enum WeatherQuery {
    City(String),
    Location(CanonicalLocation),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentConditions {
    pub temp: i32,
    pub condition_code: i32,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastDay {
    #[serde(default)]
    pub date: Option<NaiveDate>,
    pub min_temp: i32,
    pub max_temp: i32,
    pub condition_code: i32,
    pub description: String,
}

/// Provider-agnostic weather record; the unit of caching.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherSnapshot {
    pub city_name: String,
    pub country_code: String,
    pub current: CurrentConditions,
    pub forecast: Vec<ForecastDay>,
    pub fetched_at: DateTime<Utc>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
}

impl WeatherSnapshot {
    pub fn maps_url(&self) -> Option<String> {
        Some(maps_url(self.latitude?, self.longitude?))
    }
}
