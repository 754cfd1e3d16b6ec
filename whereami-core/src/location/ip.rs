use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::{error::WeatherError, http::get_json};

use super::{LocationFix, LocationSource};

/// Known IP geolocation services, in the order they are tried by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpGeoService {
    IpApi,
    IpApiCo,
    IpInfo,
}

impl IpGeoService {
    pub const fn all() -> &'static [IpGeoService] {
        &[IpGeoService::IpApi, IpGeoService::IpApiCo, IpGeoService::IpInfo]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            IpGeoService::IpApi => "ip-api.com",
            IpGeoService::IpApiCo => "ipapi.co",
            IpGeoService::IpInfo => "ipinfo.io",
        }
    }

    pub fn default_endpoint(&self) -> &'static str {
        match self {
            IpGeoService::IpApi => "http://ip-api.com/json/",
            IpGeoService::IpApiCo => "https://ipapi.co/json/",
            IpGeoService::IpInfo => "https://ipinfo.io/json",
        }
    }
}

#[derive(Debug, Clone)]
pub struct IpGeoSource {
    service: IpGeoService,
    endpoint: String,
    http: Client,
}

impl IpGeoSource {
    pub fn new(service: IpGeoService, http: Client) -> Self {
        Self {
            service,
            endpoint: service.default_endpoint().to_string(),
            http,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// One source per known service, in default order.
    pub fn defaults(http: &Client) -> Vec<IpGeoSource> {
        IpGeoService::all()
            .iter()
            .map(|service| IpGeoSource::new(*service, http.clone()))
            .collect()
    }
}

#[async_trait]
impl LocationSource for IpGeoSource {
    fn name(&self) -> &str {
        self.service.as_str()
    }

    async fn locate(&self) -> Result<LocationFix, WeatherError> {
        let raw: RawIpGeo =
            get_json(self.http.get(&self.endpoint), self.service.as_str(), "current IP").await?;
        raw.normalize(self.service.as_str())
    }
}

/// Union of the field names used by the supported services.
#[derive(Debug, Default, Deserialize)]
struct RawIpGeo {
    // ip-api.com reports failures in-band.
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    message: Option<String>,
    // ipapi.co
    #[serde(default)]
    error: Option<bool>,
    #[serde(default)]
    reason: Option<String>,

    #[serde(default, alias = "lat")]
    latitude: Option<f64>,
    #[serde(default, alias = "lon")]
    longitude: Option<f64>,
    // ipinfo.io: "lat,lon"
    #[serde(default)]
    loc: Option<String>,

    #[serde(default)]
    city: Option<String>,
    #[serde(default)]
    region: Option<String>,
    #[serde(default, rename = "regionName")]
    region_name: Option<String>,
    #[serde(default, alias = "countryCode")]
    country_code: Option<String>,
    #[serde(default)]
    country: Option<String>,
}

impl RawIpGeo {
    fn normalize(self, source: &str) -> Result<LocationFix, WeatherError> {
        if self.status.as_deref() == Some("fail") || self.error == Some(true) {
            let why = self.message.or(self.reason).unwrap_or_else(|| "unknown".to_string());
            return Err(WeatherError::Upstream(format!("{source} refused lookup: {why}")));
        }

        let (latitude, longitude) = match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) => (lat, lon),
            _ => self
                .loc
                .as_deref()
                .and_then(parse_loc)
                .ok_or_else(|| WeatherError::Upstream(format!("{source} returned no coordinates")))?,
        };

        let country_code = self
            .country_code
            .or_else(|| self.country.filter(|c| c.len() == 2))
            .map(|c| c.to_uppercase());

        Ok(LocationFix {
            latitude,
            longitude,
            city: non_empty(self.city),
            region: non_empty(self.region_name).or(non_empty(self.region)),
            country_code,
        })
    }
}

fn parse_loc(loc: &str) -> Option<(f64, f64)> {
    let (lat, lon) = loc.split_once(',')?;
    Some((lat.trim().parse().ok()?, lon.trim().parse().ok()?))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
