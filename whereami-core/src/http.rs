use std::time::Duration;

use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;

use crate::error::WeatherError;

pub const USER_AGENT: &str = concat!("whereami/", env!("CARGO_PKG_VERSION"));

/// Build the shared HTTP client; every request made through it is bounded by `timeout`.
pub fn client(timeout: Duration) -> Result<Client, WeatherError> {
    Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| WeatherError::Upstream(format!("Failed to build HTTP client: {e}")))
}

/// Send `request`, classify a non-2xx status, and decode the JSON body.
pub(crate) async fn get_json<T: DeserializeOwned>(
    request: RequestBuilder,
    source: &str,
    subject: &str,
) -> Result<T, WeatherError> {
    let res = request
        .send()
        .await
        .map_err(|e| WeatherError::transport(source, e))?;

    let status = res.status();
    let body = res
        .text()
        .await
        .map_err(|e| WeatherError::transport(source, e))?;

    if !status.is_success() {
        return Err(WeatherError::from_status(status, subject, &body));
    }

    serde_json::from_str(&body).map_err(|e| WeatherError::malformed(source, e))
}
