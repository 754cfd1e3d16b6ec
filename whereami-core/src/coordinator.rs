//! Non-blocking, single-flight refresh of cached weather.
//!
//! `query` never waits on the network: it answers from the cache, or returns a
//! placeholder after making sure exactly one background fetch per key is running.
//! Finished fetches are written to the cache and announced on a broadcast channel.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::{
    collections::{HashMap, HashSet},
    fmt,
    future::Future,
    sync::Arc,
};
use tokio::sync::broadcast;

use crate::{
    cache::WeatherCache,
    error::WeatherError,
    model::{Unit, WeatherSnapshot},
};

const EVENT_CAPACITY: usize = 16;

pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub fn system_clock() -> Clock {
    Arc::new(Utc::now)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchState {
    Idle,
    Fetching,
}

/// What the caller gets back immediately.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutcome {
    /// Cached and younger than the TTL.
    Ready(WeatherSnapshot),
    /// Expired, but the last refresh failed so this is the best available.
    Stale(WeatherSnapshot),
    /// Placeholder: a fetch is on its way.
    Pending,
    /// The last refresh failed and nothing was ever cached for this key.
    Failed(WeatherError),
}

impl QueryOutcome {
    pub fn snapshot(&self) -> Option<&WeatherSnapshot> {
        match self {
            QueryOutcome::Ready(s) | QueryOutcome::Stale(s) => Some(s),
            QueryOutcome::Pending | QueryOutcome::Failed(_) => None,
        }
    }
}

/// Published when a background fetch finishes, successful or not.
#[derive(Debug, Clone)]
pub struct FetchEvent {
    pub key: String,
    pub result: Result<WeatherSnapshot, WeatherError>,
}

#[derive(Debug)]
struct Shared {
    cache: WeatherCache,
    fetching: HashSet<String>,
    last_error: HashMap<String, WeatherError>,
    // Bumped on every invalidation; results from older fetches are dropped.
    generation: u64,
}

impl Shared {
    fn invalidated(&mut self) {
        self.last_error.clear();
        self.generation += 1;
    }
}

#[derive(Clone)]
pub struct FetchCoordinator {
    shared: Arc<Mutex<Shared>>,
    ttl: chrono::Duration,
    clock: Clock,
    events: broadcast::Sender<FetchEvent>,
}

impl fmt::Debug for FetchCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchCoordinator")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl FetchCoordinator {
    pub fn new(cache: WeatherCache, ttl: chrono::Duration, clock: Clock) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            shared: Arc::new(Mutex::new(Shared {
                cache,
                fetching: HashSet::new(),
                last_error: HashMap::new(),
                generation: 0,
            })),
            ttl,
            clock,
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FetchEvent> {
        self.events.subscribe()
    }

    pub fn state(&self, key: &str) -> FetchState {
        if self.shared.lock().fetching.contains(key) {
            FetchState::Fetching
        } else {
            FetchState::Idle
        }
    }

    /// Cached snapshot for `key` regardless of age.
    pub fn peek(&self, key: &str) -> Option<WeatherSnapshot> {
        self.shared.lock().cache.get(key).map(|e| e.snapshot.clone())
    }

    /// Answer from cache, starting a background fetch when the entry is missing or expired.
    ///
    /// `fetch` is only invoked when this call is the one that launches the fetch.
    /// Must be called from within a Tokio runtime.
    pub fn query<F, Fut>(&self, key: &str, fetch: F) -> QueryOutcome
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<WeatherSnapshot, WeatherError>> + Send + 'static,
    {
        let now = (self.clock)();
        let mut shared = self.shared.lock();

        let cached = shared.cache.get(key).cloned();
        if let Some(entry) = &cached {
            if entry.is_fresh(now, self.ttl) {
                return QueryOutcome::Ready(entry.snapshot.clone());
            }
        }

        let last_error = shared.last_error.get(key).cloned();
        let launch = shared.fetching.insert(key.to_string());
        let generation = shared.generation;
        drop(shared);

        if launch {
            tracing::debug!("Starting background fetch for {key}");
            let guard = InFlight {
                shared: Arc::clone(&self.shared),
                key: key.to_string(),
                released: false,
            };
            let task = fetch();
            let clock = Arc::clone(&self.clock);
            let events = self.events.clone();
            tokio::spawn(async move {
                let result = task.await;
                guard.complete(generation, result, clock(), &events);
            });
        } else {
            tracing::debug!("Fetch for {key} already in flight");
        }

        match (cached, last_error) {
            (Some(entry), Some(err)) => {
                tracing::debug!("Serving stale {key} after failed refresh: {err}");
                QueryOutcome::Stale(entry.snapshot)
            }
            (None, Some(err)) => QueryOutcome::Failed(err),
            _ => QueryOutcome::Pending,
        }
    }

    /// Record `unit`, clearing the whole cache first if it was stored in another unit.
    pub fn reconcile_unit(&self, unit: Unit) -> bool {
        let (invalidated, write) = {
            let mut shared = self.shared.lock();
            let invalidated = shared.cache.reconcile_unit(unit);
            if invalidated {
                shared.invalidated();
            }
            (invalidated, shared.cache.take_write())
        };
        if let Some(write) = write {
            write.commit();
        }
        invalidated
    }

    pub fn invalidate_all(&self) {
        let write = {
            let mut shared = self.shared.lock();
            shared.cache.invalidate_all();
            shared.invalidated();
            shared.cache.take_write()
        };
        if let Some(write) = write {
            write.commit();
        }
    }
}

/// Owns a key's `Fetching` flag; dropping it (even by panic unwind) releases the key.
struct InFlight {
    shared: Arc<Mutex<Shared>>,
    key: String,
    released: bool,
}

impl InFlight {
    fn complete(
        mut self,
        generation: u64,
        result: Result<WeatherSnapshot, WeatherError>,
        now: DateTime<Utc>,
        events: &broadcast::Sender<FetchEvent>,
    ) {
        let write = {
            let mut shared = self.shared.lock();
            if shared.generation != generation {
                tracing::debug!("Discarding fetch for {} started before invalidation", self.key);
            } else {
                match &result {
                    Ok(snapshot) => {
                        tracing::info!("Fetched weather for {} ({})", self.key, snapshot.city_name);
                        shared.cache.put(&self.key, snapshot.clone(), now);
                        shared.last_error.remove(&self.key);
                    }
                    Err(err) => {
                        tracing::warn!("Weather fetch for {} failed: {err}", self.key);
                        shared.last_error.insert(self.key.clone(), err.clone());
                    }
                }
            }
            shared.fetching.remove(&self.key);
            self.released = true;
            shared.cache.take_write()
        };
        if let Some(write) = write {
            write.commit();
        }

        // No subscribers is fine.
        let _ = events.send(FetchEvent { key: self.key.clone(), result });
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if !self.released {
            tracing::warn!("Fetch for {} ended abnormally", self.key);
            self.shared.lock().fetching.remove(&self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CurrentConditions;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Notify;

    const T0: i64 = 1_714_550_400;
    const TTL_SECS: i64 = 600;

    struct TestClock(Arc<AtomicI64>);

    impl TestClock {
        fn new() -> (Self, Clock) {
            let secs = Arc::new(AtomicI64::new(T0));
            let handle = Arc::clone(&secs);
            let clock: Clock =
                Arc::new(move || Utc.timestamp_opt(handle.load(Ordering::SeqCst), 0).unwrap());
            (Self(secs), clock)
        }

        fn set(&self, secs_after_t0: i64) {
            self.0.store(T0 + secs_after_t0, Ordering::SeqCst);
        }
    }

    fn at(secs_after_t0: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(T0 + secs_after_t0, 0).unwrap()
    }

    fn snapshot(city: &str, temp: i32) -> WeatherSnapshot {
        WeatherSnapshot {
            city_name: city.to_string(),
            country_code: "PT".to_string(),
            current: CurrentConditions { temp, condition_code: 800, description: "clear sky".into() },
            forecast: Vec::new(),
            fetched_at: at(0),
            latitude: None,
            longitude: None,
        }
    }

    fn coordinator_with(entries: &[(&str, WeatherSnapshot, i64)]) -> (FetchCoordinator, TestClock) {
        let mut cache = WeatherCache::in_memory();
        cache.reconcile_unit(Unit::Celsius);
        for (key, snap, ts) in entries {
            cache.put(key, snap.clone(), at(*ts));
        }
        let (test_clock, clock) = TestClock::new();
        (FetchCoordinator::new(cache, chrono::Duration::seconds(TTL_SECS), clock), test_clock)
    }

    fn counting_fetch(
        calls: &Arc<AtomicUsize>,
        result: Result<WeatherSnapshot, WeatherError>,
    ) -> impl FnOnce() -> std::future::Ready<Result<WeatherSnapshot, WeatherError>> {
        let calls = Arc::clone(calls);
        move || {
            calls.fetch_add(1, Ordering::SeqCst);
            std::future::ready(result)
        }
    }

    async fn next_event(rx: &mut broadcast::Receiver<FetchEvent>) -> FetchEvent {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("fetch event in time")
            .expect("channel open")
    }

    #[tokio::test]
    async fn fresh_entry_is_served_without_fetching() {
        let (coordinator, clock) = coordinator_with(&[("auto", snapshot("Lisbon", 20), 0)]);
        let calls = Arc::new(AtomicUsize::new(0));

        clock.set(TTL_SECS - 1);
        let outcome = coordinator.query("auto", counting_fetch(&calls, Ok(snapshot("Other", 1))));

        assert_eq!(outcome, QueryOutcome::Ready(snapshot("Lisbon", 20)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(coordinator.state("auto"), FetchState::Idle);
    }

    #[tokio::test]
    async fn expired_entry_triggers_exactly_one_fetch() {
        let (coordinator, clock) = coordinator_with(&[("auto", snapshot("Lisbon", 20), 0)]);
        let mut rx = coordinator.subscribe();
        let calls = Arc::new(AtomicUsize::new(0));

        clock.set(TTL_SECS);
        let outcome = coordinator.query("auto", counting_fetch(&calls, Ok(snapshot("Lisbon", 22))));
        assert_eq!(outcome, QueryOutcome::Pending);

        let event = next_event(&mut rx).await;
        assert_eq!(event.key, "auto");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(coordinator.state("auto"), FetchState::Idle);

        let outcome = coordinator.query("auto", counting_fetch(&calls, Ok(snapshot("Other", 1))));
        assert_eq!(outcome, QueryOutcome::Ready(snapshot("Lisbon", 22)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrent_queries_share_one_fetch() {
        let (coordinator, _clock) = coordinator_with(&[]);
        let mut rx = coordinator.subscribe();
        let calls = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Notify::new());

        for _ in 0..10 {
            let calls = Arc::clone(&calls);
            let gate = Arc::clone(&gate);
            let outcome = coordinator.query("porto", move || {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    gate.notified().await;
                    Ok(snapshot("Porto", 18))
                }
            });
            assert_eq!(outcome, QueryOutcome::Pending);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(coordinator.state("porto"), FetchState::Fetching);

        gate.notify_one();
        next_event(&mut rx).await;

        assert_eq!(coordinator.state("porto"), FetchState::Idle);
        assert_eq!(coordinator.peek("porto"), Some(snapshot("Porto", 18)));
    }

    #[tokio::test]
    async fn different_keys_fetch_independently() {
        let (coordinator, _clock) = coordinator_with(&[]);
        let calls = Arc::new(AtomicUsize::new(0));

        coordinator.query("lisbon", counting_fetch(&calls, Ok(snapshot("Lisbon", 20))));
        coordinator.query("porto", counting_fetch(&calls, Ok(snapshot("Porto", 18))));

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn unit_change_clears_auto_before_next_fetch() {
        let (coordinator, _clock) = coordinator_with(&[
            ("auto", snapshot("Lisbon", 20), 0),
            ("porto", snapshot("Porto", 18), 0),
        ]);
        let calls = Arc::new(AtomicUsize::new(0));

        assert!(!coordinator.reconcile_unit(Unit::Celsius));
        assert!(coordinator.reconcile_unit(Unit::Fahrenheit));

        assert_eq!(coordinator.peek("auto"), None);
        assert_eq!(coordinator.peek("porto"), None);

        let outcome = coordinator.query("auto", counting_fetch(&calls, Ok(snapshot("Lisbon", 68))));
        assert_eq!(outcome, QueryOutcome::Pending);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_refresh_serves_stale_snapshot() {
        let (coordinator, clock) = coordinator_with(&[("auto", snapshot("Lisbon", 20), 0)]);
        let mut rx = coordinator.subscribe();
        let calls = Arc::new(AtomicUsize::new(0));

        clock.set(TTL_SECS * 3);
        let failing = || counting_fetch(&calls, Err(WeatherError::Upstream("timeout".into())));

        assert_eq!(coordinator.query("auto", failing()), QueryOutcome::Pending);
        let event = next_event(&mut rx).await;
        assert!(event.result.is_err());

        let outcome = coordinator.query("auto", failing());
        assert_eq!(outcome, QueryOutcome::Stale(snapshot("Lisbon", 20)));
        assert_eq!(coordinator.peek("auto"), Some(snapshot("Lisbon", 20)));
    }

    #[tokio::test]
    async fn failure_without_any_entry_is_reported() {
        let (coordinator, _clock) = coordinator_with(&[]);
        let mut rx = coordinator.subscribe();
        let calls = Arc::new(AtomicUsize::new(0));

        let outcome = coordinator.query(
            "atlantis",
            counting_fetch(&calls, Err(WeatherError::NotFound("atlantis".into()))),
        );
        assert_eq!(outcome, QueryOutcome::Pending);
        next_event(&mut rx).await;

        let outcome = coordinator.query(
            "atlantis",
            counting_fetch(&calls, Err(WeatherError::NotFound("atlantis".into()))),
        );
        assert_eq!(outcome, QueryOutcome::Failed(WeatherError::NotFound("atlantis".into())));
    }

    #[tokio::test]
    async fn success_clears_previous_error() {
        let (coordinator, _clock) = coordinator_with(&[]);
        let mut rx = coordinator.subscribe();
        let calls = Arc::new(AtomicUsize::new(0));

        coordinator.query("auto", counting_fetch(&calls, Err(WeatherError::LocationUnavailable)));
        next_event(&mut rx).await;

        let outcome = coordinator.query("auto", counting_fetch(&calls, Ok(snapshot("Lisbon", 20))));
        assert_eq!(outcome, QueryOutcome::Failed(WeatherError::LocationUnavailable));
        next_event(&mut rx).await;

        let outcome = coordinator.query("auto", counting_fetch(&calls, Ok(snapshot("Other", 0))));
        assert_eq!(outcome, QueryOutcome::Ready(snapshot("Lisbon", 20)));
    }

    #[tokio::test]
    async fn completed_fetch_and_invalidation_are_written_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("weather_cache.json");
        let (_test_clock, clock) = TestClock::new();
        let cache = WeatherCache::load(&path);
        let coordinator = FetchCoordinator::new(cache, chrono::Duration::seconds(TTL_SECS), clock);
        coordinator.reconcile_unit(Unit::Celsius);
        let mut rx = coordinator.subscribe();
        let calls = Arc::new(AtomicUsize::new(0));

        coordinator.query("auto", counting_fetch(&calls, Ok(snapshot("Lisbon", 20))));
        next_event(&mut rx).await;

        let on_disk = WeatherCache::load(&path);
        assert_eq!(on_disk.get("auto").map(|e| e.snapshot.city_name.as_str()), Some("Lisbon"));
        assert_eq!(on_disk.unit(), Some(Unit::Celsius));

        coordinator.invalidate_all();
        assert!(WeatherCache::load(&path).is_empty());
    }

    #[tokio::test]
    async fn panicking_fetch_still_releases_the_key() {
        let (coordinator, _clock) = coordinator_with(&[]);
        let calls = Arc::new(AtomicUsize::new(0));

        coordinator.query("auto", || async {
            if std::hint::black_box(false) {
                return Ok(snapshot("never", 0));
            }
            panic!("provider blew up");
        });

        for _ in 0..200 {
            if coordinator.state("auto") == FetchState::Idle {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(coordinator.state("auto"), FetchState::Idle);

        coordinator.query("auto", counting_fetch(&calls, Ok(snapshot("Lisbon", 20))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn results_from_before_invalidation_are_discarded() {
        let (coordinator, _clock) = coordinator_with(&[]);
        let mut rx = coordinator.subscribe();
        let gate = Arc::new(Notify::new());

        let wait = Arc::clone(&gate);
        coordinator.query("auto", move || async move {
            wait.notified().await;
            Ok(snapshot("Lisbon", 20))
        });

        coordinator.invalidate_all();
        gate.notify_one();
        next_event(&mut rx).await;

        assert_eq!(coordinator.peek("auto"), None);
        assert_eq!(coordinator.state("auto"), FetchState::Idle);
    }
}
