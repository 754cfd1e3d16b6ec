//! Reverse geocoding (coordinates to place name) via Nominatim, best effort.

use reqwest::Client;
use serde::Deserialize;

use crate::http::get_json;

const DEFAULT_BASE_URL: &str = "https://nominatim.openstreetmap.org";

#[derive(Debug, Clone, PartialEq)]
pub struct Place {
    pub city: String,
    pub country_code: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ReverseGeocoder {
    http: Client,
    base_url: String,
}

impl ReverseGeocoder {
    pub fn new(http: Client) -> Self {
        Self { http, base_url: DEFAULT_BASE_URL.to_string() }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Returns `None` on any failure; the caller falls back to a coordinate label.
    pub async fn lookup(&self, latitude: f64, longitude: f64) -> Option<Place> {
        let url = format!("{}/reverse", self.base_url);
        let request = self.http.get(url).query(&[
            ("format", "json".to_string()),
            ("lat", latitude.to_string()),
            ("lon", longitude.to_string()),
            ("zoom", "10".to_string()),
            ("addressdetails", "1".to_string()),
        ]);

        let body: NominatimResponse = match get_json(request, "Nominatim", "coordinates").await {
            Ok(body) => body,
            Err(e) => {
                tracing::debug!("Reverse geocode failed: {e}");
                return None;
            }
        };

        let place = body.address?.into_place();
        if let Some(place) = &place {
            tracing::debug!("Reverse geocoded to {}", place.city);
        }
        place
    }
}

#[derive(Debug, Deserialize)]
struct NominatimResponse {
    address: Option<NominatimAddress>,
}

#[derive(Debug, Deserialize)]
struct NominatimAddress {
    city: Option<String>,
    town: Option<String>,
    village: Option<String>,
    county: Option<String>,
    country_code: Option<String>,
}

impl NominatimAddress {
    fn into_place(self) -> Option<Place> {
        let city = self.city.or(self.town).or(self.village).or(self.county)?;
        Some(Place {
            city,
            country_code: self.country_code.map(|c| c.to_uppercase()),
        })
    }
}
