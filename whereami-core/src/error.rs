use reqwest::StatusCode;

/// Failure classification shared by every provider and the coordinator.
///
/// Providers classify at their own boundary (HTTP status, transport, payload shape);
/// nothing downstream inspects message text to decide what went wrong.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WeatherError {
    #[error("Could not determine current location: no geolocation provider responded")]
    LocationUnavailable,

    #[error("Location not found: {0}")]
    NotFound(String),

    #[error("API key was rejected or is missing")]
    InvalidCredentials,

    #[error("Upstream error: {0}")]
    Upstream(String),
}

impl WeatherError {
    /// Map a non-success HTTP status to an error kind. `subject` names what was looked up.
    pub fn from_status(status: StatusCode, subject: &str, body: &str) -> Self {
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => WeatherError::InvalidCredentials,
            StatusCode::NOT_FOUND => WeatherError::NotFound(subject.to_string()),
            _ => WeatherError::Upstream(format!(
                "Request for {subject} failed with status {status}: {}",
                truncate_body(body)
            )),
        }
    }

    pub fn transport(what: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            WeatherError::Upstream(format!("{what} request timed out"))
        } else {
            WeatherError::Upstream(format!("{what} request failed: {err}"))
        }
    }

    pub fn malformed(what: &str, err: serde_json::Error) -> Self {
        WeatherError::Upstream(format!("Failed to parse {what} JSON: {err}"))
    }

    /// Whether another candidate in a fallback chain is worth trying after this error.
    pub fn is_terminal(&self) -> bool {
        matches!(self, WeatherError::NotFound(_))
    }
}

pub(crate) fn truncate_body(body: &str) -> String {
    const MAX: usize = 200;
    if body.len() > MAX {
        let mut end = MAX;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &body[..end])
    } else {
        body.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert_eq!(
            WeatherError::from_status(StatusCode::UNAUTHORIZED, "forecast", ""),
            WeatherError::InvalidCredentials
        );
        assert_eq!(
            WeatherError::from_status(StatusCode::NOT_FOUND, "Atlantis", ""),
            WeatherError::NotFound("Atlantis".into())
        );
        assert!(matches!(
            WeatherError::from_status(StatusCode::BAD_GATEWAY, "forecast", "oops"),
            WeatherError::Upstream(_)
        ));
    }

    #[test]
    fn only_not_found_is_terminal() {
        assert!(WeatherError::NotFound("x".into()).is_terminal());
        assert!(!WeatherError::InvalidCredentials.is_terminal());
        assert!(!WeatherError::Upstream("x".into()).is_terminal());
        assert!(!WeatherError::LocationUnavailable.is_terminal());
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let body = "é".repeat(150);
        let out = truncate_body(&body);
        assert!(out.ends_with("..."));
        assert!(out.len() <= 203);
    }
}
