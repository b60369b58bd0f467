use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::error::HttpError;
use crate::rest::TripsApi;
use crate::types::trip::{CreateTripRequest, Trip, TripDelta, TripStatus};

/// Single source of truth for the trip list and the trip currently on
/// screen. REST snapshots and realtime deltas both land here; the UI layer
/// only observes. Failures surface through `last_error`, never as panics.
pub struct TripStore {
    api: Arc<dyn TripsApi>,
    state: Mutex<TripState>,
    /// Kill switch for realtime merging.
    realtime_enabled: AtomicBool,
    /// Generation tag for detail fetches: a stale, slow response must not
    /// overwrite a newer one.
    detail_generation: AtomicU64,
}

#[derive(Default)]
struct TripState {
    trips: Vec<Trip>,
    active: Option<Trip>,
    last_error: Option<String>,
}

impl TripStore {
    pub fn new(api: Arc<dyn TripsApi>) -> Arc<Self> {
        Arc::new(Self {
            api,
            state: Mutex::new(TripState::default()),
            realtime_enabled: AtomicBool::new(true),
            detail_generation: AtomicU64::new(0),
        })
    }

    pub fn trips(&self) -> Vec<Trip> {
        self.state.lock().unwrap().trips.clone()
    }

    /// The trip currently displayed/tracked, if any.
    pub fn active_trip(&self) -> Option<Trip> {
        self.state.lock().unwrap().active.clone()
    }

    /// Trips still in flight.
    pub fn current_trips(&self) -> Vec<Trip> {
        self.state
            .lock()
            .unwrap()
            .trips
            .iter()
            .filter(|t| !t.status.is_terminal())
            .cloned()
            .collect()
    }

    /// Finished trips, for the history view.
    pub fn historical_trips(&self) -> Vec<Trip> {
        self.state
            .lock()
            .unwrap()
            .trips
            .iter()
            .filter(|t| t.status.is_terminal())
            .cloned()
            .collect()
    }

    pub fn last_error(&self) -> Option<String> {
        self.state.lock().unwrap().last_error.clone()
    }

    pub fn clear_error(&self) {
        self.state.lock().unwrap().last_error = None;
    }

    pub fn set_realtime_enabled(&self, enabled: bool) {
        self.realtime_enabled.store(enabled, Ordering::SeqCst);
    }

    /// Fetch a fresh list snapshot. The new snapshot fully supersedes the
    /// old list; nothing is merged.
    pub async fn fetch_trips(&self, status: Option<TripStatus>) -> Result<Vec<Trip>, HttpError> {
        match self.api.list_trips(status).await {
            Ok(trips) => {
                let mut state = self.state.lock().unwrap();
                state.trips = trips.clone();
                state.last_error = None;
                Ok(trips)
            }
            Err(err) => {
                self.record_error(&err);
                Err(err)
            }
        }
    }

    /// Fetch one trip and make it the active one. Returns `None` when a
    /// newer detail fetch superseded this one while it was in flight; the
    /// stale response is dropped instead of written.
    pub async fn fetch_trip_details(&self, id: &str) -> Result<Option<Trip>, HttpError> {
        let generation = self.detail_generation.fetch_add(1, Ordering::SeqCst) + 1;
        match self.api.get_trip(id).await {
            Ok(trip) => {
                if self.detail_generation.load(Ordering::SeqCst) != generation {
                    debug!(trip = id, "dropping stale trip detail response");
                    return Ok(None);
                }
                let mut state = self.state.lock().unwrap();
                state.active = Some(trip.clone());
                state.last_error = None;
                Ok(Some(trip))
            }
            Err(err) => {
                self.record_error(&err);
                Err(err)
            }
        }
    }

    /// Create a ride, prepend it to the list and make it active.
    pub async fn create_trip(&self, request: &CreateTripRequest) -> Result<Trip, HttpError> {
        match self.api.create_trip(request).await {
            Ok(trip) => {
                let mut state = self.state.lock().unwrap();
                state.trips.insert(0, trip.clone());
                state.active = Some(trip.clone());
                state.last_error = None;
                Ok(trip)
            }
            Err(err) => {
                self.record_error(&err);
                Err(err)
            }
        }
    }

    /// Ask the backend for a status change. Returns `false` instead of an
    /// error; the failure lands in `last_error` for the UI to display.
    pub async fn update_trip_status(
        &self,
        id: &str,
        status: TripStatus,
        reason: Option<&str>,
    ) -> bool {
        match self.api.update_trip_status(id, status, reason).await {
            Ok(trip) => {
                let mut state = self.state.lock().unwrap();
                if let Some(existing) = state.trips.iter_mut().find(|t| t.id == trip.id) {
                    *existing = trip.clone();
                }
                let is_active = state
                    .active
                    .as_ref()
                    .map(|active| active.id == trip.id)
                    .unwrap_or(false);
                if is_active {
                    state.active = Some(trip);
                }
                state.last_error = None;
                true
            }
            Err(err) => {
                self.record_error(&err);
                false
            }
        }
    }

    /// Shallow-merge a realtime delta into the list entry and the active
    /// snapshot. Trips already in a terminal state are left untouched; the
    /// late delta is logged and dropped whole. Transition legality is
    /// otherwise the backend's business, the client mirrors what it is told.
    pub fn apply_realtime_update(&self, id: &str, delta: &TripDelta) {
        if !self.realtime_enabled.load(Ordering::SeqCst) {
            return;
        }
        let mut state = self.state.lock().unwrap();
        if let Some(existing) = state.trips.iter_mut().find(|t| t.id == id) {
            if existing.status.is_terminal() {
                debug!(trip = id, "dropping realtime update for finished trip");
            } else {
                existing.apply(delta);
            }
        }
        if let Some(active) = state.active.as_mut() {
            if active.id == id && !active.status.is_terminal() {
                active.apply(delta);
            }
        }
    }

    /// Position push for the assigned driver. Same terminal guard as the
    /// status path; a trip without a driver snapshot ignores positions.
    pub fn apply_driver_location(&self, id: &str, latitude: f64, longitude: f64) {
        if !self.realtime_enabled.load(Ordering::SeqCst) {
            return;
        }
        let mut state = self.state.lock().unwrap();
        let state = &mut *state;
        for trip in state
            .trips
            .iter_mut()
            .chain(state.active.as_mut())
            .filter(|t| t.id == id && !t.status.is_terminal())
        {
            if let Some(driver) = trip.driver.as_mut() {
                driver.latitude = Some(latitude);
                driver.longitude = Some(longitude);
            }
        }
    }

    fn record_error(&self, err: &HttpError) {
        self.state.lock().unwrap().last_error = Some(err.to_string());
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::time::sleep;

    use super::*;
    use crate::types::location::Location;
    use crate::types::trip::DriverSnapshot;

    fn trip(id: &str, status: TripStatus) -> Trip {
        Trip {
            id: id.to_string(),
            status,
            origin: Location::new(-0.18, -78.46),
            destination: Location::new(-0.20, -78.50),
            scheduled_at: None,
            started_at: None,
            completed_at: None,
            cancelled_at: None,
            distance: None,
            duration: None,
            price: None,
            driver: None,
            vehicle: None,
            payment: None,
        }
    }

    /// Scripted backend: serves from an in-memory map, optionally failing
    /// or delaying calls.
    #[derive(Default)]
    struct StubApi {
        trips: Mutex<HashMap<String, Trip>>,
        fail: AtomicBool,
        get_delays: Mutex<VecDeque<Duration>>,
    }

    impl StubApi {
        fn with_trip(trip: Trip) -> Arc<Self> {
            let stub = Arc::new(Self::default());
            stub.trips.lock().unwrap().insert(trip.id.clone(), trip);
            stub
        }

        fn failure() -> HttpError {
            HttpError::Status {
                status: reqwest::StatusCode::SERVICE_UNAVAILABLE,
                message: "backend down".into(),
                method: "GET".into(),
                path: "/trips".into(),
            }
        }
    }

    #[async_trait]
    impl TripsApi for StubApi {
        async fn list_trips(&self, status: Option<TripStatus>) -> Result<Vec<Trip>, HttpError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(Self::failure());
            }
            Ok(self
                .trips
                .lock()
                .unwrap()
                .values()
                .filter(|t| status.map(|s| t.status == s).unwrap_or(true))
                .cloned()
                .collect())
        }

        async fn get_trip(&self, id: &str) -> Result<Trip, HttpError> {
            let delay = self.get_delays.lock().unwrap().pop_front();
            if let Some(delay) = delay {
                sleep(delay).await;
            }
            if self.fail.load(Ordering::SeqCst) {
                return Err(Self::failure());
            }
            self.trips
                .lock()
                .unwrap()
                .get(id)
                .cloned()
                .ok_or_else(Self::failure)
        }

        async fn create_trip(&self, request: &CreateTripRequest) -> Result<Trip, HttpError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(Self::failure());
            }
            let mut created = trip("trip-new", TripStatus::Searching);
            created.origin = request.origin.clone();
            created.destination = request.destination.clone();
            self.trips
                .lock()
                .unwrap()
                .insert(created.id.clone(), created.clone());
            Ok(created)
        }

        async fn update_trip_status(
            &self,
            id: &str,
            status: TripStatus,
            _reason: Option<&str>,
        ) -> Result<Trip, HttpError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(Self::failure());
            }
            let mut trips = self.trips.lock().unwrap();
            let existing = trips.get_mut(id).ok_or_else(Self::failure)?;
            existing.status = status;
            Ok(existing.clone())
        }
    }

    #[tokio::test]
    async fn fetch_replaces_the_list_wholesale() {
        let stub = StubApi::with_trip(trip("trip-1", TripStatus::Searching));
        let store = TripStore::new(stub.clone());
        store.fetch_trips(None).await.unwrap();
        assert_eq!(store.trips().len(), 1);

        stub.trips.lock().unwrap().clear();
        stub.trips
            .lock()
            .unwrap()
            .insert("trip-2".into(), trip("trip-2", TripStatus::Confirmed));
        store.fetch_trips(None).await.unwrap();
        let trips = store.trips();
        assert_eq!(trips.len(), 1);
        assert_eq!(trips[0].id, "trip-2");
    }

    #[tokio::test]
    async fn create_prepends_and_activates() {
        let stub = StubApi::with_trip(trip("trip-1", TripStatus::Completed));
        let store = TripStore::new(stub);
        store.fetch_trips(None).await.unwrap();
        let request = CreateTripRequest {
            origin: Location::new(-0.18, -78.46),
            destination: Location::new(-0.20, -78.50),
            scheduled_at: None,
            payment_method: None,
        };
        store.create_trip(&request).await.unwrap();
        assert_eq!(store.trips()[0].id, "trip-new");
        assert_eq!(store.active_trip().unwrap().id, "trip-new");
    }

    #[tokio::test]
    async fn realtime_delta_merges_shallowly() {
        let stub = StubApi::with_trip(trip("trip-1", TripStatus::Searching));
        let store = TripStore::new(stub);
        store.fetch_trip_details("trip-1").await.unwrap();
        store.apply_realtime_update(
            "trip-1",
            &TripDelta {
                status: Some(TripStatus::Confirmed),
                driver: Some(DriverSnapshot {
                    id: "driver-1".into(),
                    name: "María".into(),
                    phone: None,
                    rating: Some(4.9),
                    latitude: None,
                    longitude: None,
                }),
                ..Default::default()
            },
        );
        let active = store.active_trip().unwrap();
        assert_eq!(active.status, TripStatus::Confirmed);
        assert_eq!(active.driver.unwrap().name, "María");
        // destination untouched by the delta
        assert_eq!(active.destination.longitude, -78.50);
    }

    #[tokio::test]
    async fn terminal_trips_reject_realtime_updates_entirely() {
        let stub = StubApi::with_trip(trip("trip-1", TripStatus::Searching));
        let store = TripStore::new(stub);
        store.fetch_trips(None).await.unwrap();
        store.fetch_trip_details("trip-1").await.unwrap();
        assert!(
            store
                .update_trip_status("trip-1", TripStatus::Cancelled, Some("user cancelled"))
                .await
        );

        store.apply_realtime_update(
            "trip-1",
            &TripDelta {
                status: Some(TripStatus::InProgress),
                price: Some(9.99),
                ..Default::default()
            },
        );
        let active = store.active_trip().unwrap();
        assert_eq!(active.status, TripStatus::Cancelled);
        // the whole delta is dropped, not just the status field
        assert_eq!(active.price, None);
        assert_eq!(store.trips()[0].status, TripStatus::Cancelled);
    }

    #[tokio::test]
    async fn kill_switch_disables_realtime_merging() {
        let stub = StubApi::with_trip(trip("trip-1", TripStatus::Searching));
        let store = TripStore::new(stub);
        store.fetch_trip_details("trip-1").await.unwrap();
        store.set_realtime_enabled(false);
        store.apply_realtime_update(
            "trip-1",
            &TripDelta {
                status: Some(TripStatus::Confirmed),
                ..Default::default()
            },
        );
        assert_eq!(store.active_trip().unwrap().status, TripStatus::Searching);
    }

    #[tokio::test]
    async fn failed_status_update_returns_false_and_records_error() {
        let stub = StubApi::with_trip(trip("trip-1", TripStatus::Searching));
        let store = TripStore::new(stub.clone());
        store.fetch_trips(None).await.unwrap();
        stub.fail.store(true, Ordering::SeqCst);
        assert!(
            !store
                .update_trip_status("trip-1", TripStatus::Cancelled, None)
                .await
        );
        assert!(store.last_error().unwrap().contains("backend down"));
        store.clear_error();
        assert_eq!(store.last_error(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_detail_response_never_overwrites_a_newer_one() {
        let stub = StubApi::with_trip(trip("trip-1", TripStatus::Searching));
        stub.trips
            .lock()
            .unwrap()
            .insert("trip-2".into(), trip("trip-2", TripStatus::Confirmed));
        // first fetch resolves slowly, second quickly
        stub.get_delays
            .lock()
            .unwrap()
            .extend([Duration::from_millis(100), Duration::from_millis(10)]);
        let store = TripStore::new(stub);

        let slow = {
            let store = store.clone();
            tokio::spawn(async move { store.fetch_trip_details("trip-1").await })
        };
        tokio::task::yield_now().await;
        let fast = {
            let store = store.clone();
            tokio::spawn(async move { store.fetch_trip_details("trip-2").await })
        };

        let fast_result = fast.await.unwrap().unwrap();
        let slow_result = slow.await.unwrap().unwrap();
        assert_eq!(fast_result.unwrap().id, "trip-2");
        assert_eq!(slow_result, None);
        assert_eq!(store.active_trip().unwrap().id, "trip-2");
    }

    #[tokio::test]
    async fn derived_views_split_current_and_history() {
        let stub = StubApi::with_trip(trip("trip-1", TripStatus::InProgress));
        stub.trips
            .lock()
            .unwrap()
            .insert("trip-2".into(), trip("trip-2", TripStatus::Completed));
        let store = TripStore::new(stub);
        store.fetch_trips(None).await.unwrap();
        assert_eq!(store.current_trips().len(), 1);
        assert_eq!(store.historical_trips().len(), 1);
    }
}
