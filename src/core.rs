use std::sync::Arc;

use crate::channel::transport::ChannelTransport;
use crate::channel::{ChannelClient, ChannelEvent, EventKind};
use crate::config::Config;
use crate::error::{ChannelError, CoreError};
use crate::rest::{RestClient, RoutingApi, TripsApi};
use crate::route::RouteController;
use crate::storage::{KeyValueStore, RecentLocations};
use crate::store::TripStore;
use crate::types::trip::Trip;

/// Composition root. Built once by the host application and handed down by
/// handle; owning exactly one of these gives one trip store, one route
/// controller and one logical realtime connection.
pub struct ClientCore {
    pub rest: Arc<RestClient>,
    pub trips: Arc<TripStore>,
    pub channel: Arc<ChannelClient>,
    pub routes: Arc<RouteController>,
    pub recent_locations: RecentLocations,
}

impl ClientCore {
    pub fn new(
        config: &Config,
        storage: Arc<dyn KeyValueStore>,
        transport: Arc<dyn ChannelTransport>,
    ) -> Result<Self, ChannelError> {
        let rest = Arc::new(RestClient::new(
            config.rest_base_url.clone(),
            storage.clone(),
        ));
        Self::with_apis(
            config,
            storage,
            transport,
            rest.clone(),
            rest.clone(),
            rest,
        )
    }

    /// Test seam: same wiring, with the REST-backed APIs swappable for
    /// stubs.
    pub fn with_apis(
        config: &Config,
        storage: Arc<dyn KeyValueStore>,
        transport: Arc<dyn ChannelTransport>,
        rest: Arc<RestClient>,
        trips_api: Arc<dyn TripsApi>,
        routing_api: Arc<dyn RoutingApi>,
    ) -> Result<Self, ChannelError> {
        let trips = TripStore::new(trips_api);
        let channel = Arc::new(ChannelClient::new(config, transport)?);
        let routes = RouteController::new(
            routing_api,
            config.route_max_retries,
            config.route_retry_base_delay,
        );

        // realtime events flow straight into the trip store
        let store = trips.clone();
        channel.on(EventKind::TripUpdate, move |event| {
            if let ChannelEvent::TripUpdate { trip_id, delta } = event {
                store.apply_realtime_update(trip_id, delta);
            }
            Ok(())
        });
        let store = trips.clone();
        channel.on(EventKind::DriverLocation, move |event| {
            if let ChannelEvent::DriverLocation {
                trip_id,
                latitude,
                longitude,
                ..
            } = event
            {
                store.apply_driver_location(trip_id, *latitude, *longitude);
            }
            Ok(())
        });

        Ok(Self {
            rest,
            trips,
            channel,
            routes,
            recent_locations: RecentLocations::new(storage, config.recent_locations_cap),
        })
    }

    /// Typical sequence when a trip view opens: fetch the REST snapshot,
    /// bring the channel up if needed, follow the trip's events.
    pub async fn watch_trip(&self, trip_id: &str) -> Result<Option<Trip>, CoreError> {
        let trip = self.trips.fetch_trip_details(trip_id).await?;
        if let Some(token) = self.rest.token().await {
            self.channel.initialize(&token).await?;
            self.channel.subscribe_to_trip(trip_id).await?;
        }
        Ok(trip)
    }

    pub fn stop_watching(&self, trip_id: &str) {
        self.channel.unsubscribe_from_trip(trip_id);
    }
}
