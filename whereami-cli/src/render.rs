//! Turns query outcomes into a short ranked list of display items.

use chrono::Local;
use whereami_core::{
    CanonicalLocation, DisplayMode, ForecastDay, QueryOutcome, Unit, WeatherError, WeatherSnapshot,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayItem {
    pub title: String,
    pub subtitle: String,
    pub url: Option<String>,
}

impl DisplayItem {
    fn new(title: impl Into<String>, subtitle: impl Into<String>) -> Self {
        Self { title: title.into(), subtitle: subtitle.into(), url: None }
    }

    fn with_url(mut self, url: String) -> Self {
        self.url = Some(url);
        self
    }
}

pub fn render(outcome: &QueryOutcome, unit: Unit, mode: DisplayMode) -> Vec<DisplayItem> {
    match outcome {
        QueryOutcome::Ready(snapshot) => render_snapshot(snapshot, unit, mode, false),
        QueryOutcome::Stale(snapshot) => render_snapshot(snapshot, unit, mode, true),
        QueryOutcome::Pending => vec![DisplayItem::new(
            "Fetching weather...",
            "Nothing cached yet, try again in a moment",
        )],
        QueryOutcome::Failed(err) => vec![render_error(err)],
    }
}

pub fn render_location(location: &CanonicalLocation) -> Vec<DisplayItem> {
    let mut place = location.city.clone();
    if let Some(region) = location.region.as_deref().filter(|r| *r != location.city) {
        place.push_str(", ");
        place.push_str(region);
    }
    if !location.country_code.is_empty() {
        place.push_str(", ");
        place.push_str(&location.country_code);
    }

    vec![
        DisplayItem::new(format!("You are in: {place}"), "Approximate, based on your IP address"),
        DisplayItem::new("Open in map", format!("{:.4}, {:.4}", location.latitude, location.longitude))
            .with_url(location.maps_url()),
    ]
}

fn render_snapshot(snapshot: &WeatherSnapshot, unit: Unit, mode: DisplayMode, stale: bool) -> Vec<DisplayItem> {
    let symbol = unit.symbol();
    let place = if snapshot.country_code.is_empty() {
        snapshot.city_name.clone()
    } else {
        format!("{}, {}", snapshot.city_name, snapshot.country_code)
    };

    let updated = snapshot.fetched_at.with_timezone(&Local).format("%H:%M");
    let subtitle = if stale {
        format!("Updated {updated} (refresh failed, showing last known data)")
    } else {
        format!("Updated {updated}")
    };

    let mut items = vec![DisplayItem::new(
        format!(
            "{place}: {}{symbol}, {}",
            snapshot.current.temp, snapshot.current.description
        ),
        subtitle,
    )];

    match mode {
        DisplayMode::Compact if !snapshot.forecast.is_empty() => {
            let summary: Vec<String> = snapshot
                .forecast
                .iter()
                .enumerate()
                .map(|(i, day)| format!("{} {}", day_label(i, day), temp_range(day, symbol)))
                .collect();
            items.push(DisplayItem::new(summary.join(" · "), "Forecast"));
        }
        DisplayMode::Compact => {}
        DisplayMode::Detailed => {
            items.extend(snapshot.forecast.iter().enumerate().map(|(i, day)| {
                DisplayItem::new(
                    format!("{}: {}, {}", day_label(i, day), temp_range(day, symbol), day.description),
                    "Forecast",
                )
            }));
        }
    }

    if let Some(url) = snapshot.maps_url() {
        items.push(DisplayItem::new("Open in map", place).with_url(url));
    }

    items
}

fn day_label(index: usize, day: &ForecastDay) -> String {
    match (index, day.date) {
        (0, _) => "Tomorrow".to_string(),
        (_, Some(date)) => date.format("%a").to_string(),
        (i, None) => format!("Day +{}", i + 1),
    }
}

fn temp_range(day: &ForecastDay, symbol: &str) -> String {
    format!("{}–{}{symbol}", day.min_temp, day.max_temp)
}

fn render_error(err: &WeatherError) -> DisplayItem {
    match err {
        WeatherError::LocationUnavailable => DisplayItem::new(
            "Could not determine your location",
            "Set a static location with `whereami configure`",
        ),
        WeatherError::NotFound(place) => {
            DisplayItem::new(format!("No weather found for '{place}'"), "Check the spelling and try again")
        }
        WeatherError::InvalidCredentials => DisplayItem::new(
            "API key rejected",
            "Run `whereami configure` to enter a valid key",
        ),
        WeatherError::Upstream(_) => {
            DisplayItem::new("Weather service unavailable", "Try again later")
        }
    }
}

pub fn print_items(items: &[DisplayItem]) {
    for item in items {
        println!("{}", item.title);
        if !item.subtitle.is_empty() {
            println!("    {}", item.subtitle);
        }
        if let Some(url) = &item.url {
            println!("    {url}");
        }
    }
}
