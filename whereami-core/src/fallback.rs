//! Ordered "first candidate that answers wins" with a bounded timeout per attempt.

use std::future::Future;
use std::time::Duration;

use crate::error::WeatherError;

/// Something that can be tried as part of an ordered fallback chain.
pub trait Candidate {
    fn label(&self) -> &str;
}

#[derive(Debug, Clone, Copy)]
pub struct OrderedAttempts {
    per_attempt: Duration,
}

impl OrderedAttempts {
    pub fn new(per_attempt: Duration) -> Self {
        Self { per_attempt }
    }

    /// Try each candidate once, in order, returning the first success.
    ///
    /// A timed-out attempt counts as an upstream failure. A terminal error
    /// (see [`WeatherError::is_terminal`]) ends the walk immediately. When every
    /// candidate fails the last error is returned; an empty list yields
    /// `Upstream("no candidates configured")`.
    pub async fn run<'a, S, T, F, Fut>(&self, candidates: &'a [S], mut attempt: F) -> Result<T, WeatherError>
    where
        S: Candidate,
        F: FnMut(&'a S) -> Fut,
        Fut: Future<Output = Result<T, WeatherError>>,
    {
        let mut last_err = WeatherError::Upstream("no candidates configured".to_string());

        for candidate in candidates {
            let label = candidate.label();
            tracing::debug!("Trying {label}");

            let outcome = match tokio::time::timeout(self.per_attempt, attempt(candidate)).await {
                Ok(outcome) => outcome,
                Err(_) => Err(WeatherError::Upstream(format!(
                    "{label} timed out after {}ms",
                    self.per_attempt.as_millis()
                ))),
            };

            match outcome {
                Ok(value) => return Ok(value),
                Err(err) if err.is_terminal() => {
                    tracing::debug!("{label} gave a definitive answer: {err}");
                    return Err(err);
                }
                Err(err) => {
                    tracing::debug!("{label} failed: {err}");
                    last_err = err;
                }
            }
        }

        Err(last_err)
    }
}
