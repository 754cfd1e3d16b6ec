//! Core library for the `whereami` CLI.
//!
//! This crate defines:
//! - Configuration & credentials handling
//! - IP-based location resolution with ordered fallback
//! - Weather providers normalized to one snapshot shape
//! - A persistent TTL cache and a single-flight background fetch coordinator
//!
//! It is used by `whereami-cli`, but can also be embedded in launchers or other front ends.

pub mod cache;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod fallback;
pub mod http;
pub mod location;
pub mod model;
pub mod provider;
pub mod service;

pub use cache::{CacheEntry, PendingWrite, WeatherCache};
pub use config::{Config, DisplayMode, LocationMode};
pub use coordinator::{FetchCoordinator, FetchEvent, FetchState, QueryOutcome};
pub use error::WeatherError;
pub use location::LocationResolver;
pub use model::{CanonicalLocation, ForecastDay, Unit, WeatherQuery, WeatherSnapshot};
pub use provider::{ProviderId, WeatherProvider};
pub use service::WeatherService;
