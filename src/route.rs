use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, warn};

use crate::rest::RoutingApi;
use crate::types::location::Location;
use crate::types::route::Route;

/// Fetches a route whenever the endpoint pair changes, retrying transient
/// failures with bounded exponential backoff. Every pair change bumps a
/// generation, so a chain still running for the previous pair can never
/// write its result over the newer one.
pub struct RouteController {
    api: Arc<dyn RoutingApi>,
    /// Retries after the initial attempt.
    max_retries: u32,
    base_delay: Duration,
    state: Mutex<RouteState>,
}

#[derive(Default)]
struct RouteState {
    generation: u64,
    route: Option<Route>,
    error: bool,
}

impl RouteController {
    pub fn new(api: Arc<dyn RoutingApi>, max_retries: u32, base_delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            api,
            max_retries,
            base_delay,
            state: Mutex::new(RouteState::default()),
        })
    }

    pub fn route(&self) -> Option<Route> {
        self.state.lock().unwrap().route.clone()
    }

    /// Sticky until the next pair change.
    pub fn has_error(&self) -> bool {
        self.state.lock().unwrap().error
    }

    /// Entry point for the view-model layer: call on every change of the
    /// origin/destination pair. The current route is cleared immediately
    /// (it describes endpoints that no longer apply) and a fresh fetch
    /// cycle starts.
    pub async fn endpoints_changed(&self, origin: &Location, destination: &Location) {
        let generation = {
            let mut state = self.state.lock().unwrap();
            state.generation += 1;
            state.route = None;
            state.error = false;
            state.generation
        };
        let max_attempts = self.max_retries + 1;
        for attempt in 1..=max_attempts {
            match self.api.fetch_route(origin, destination).await {
                Ok(route) => {
                    let mut state = self.state.lock().unwrap();
                    if state.generation == generation {
                        state.route = Some(route);
                        state.error = false;
                    }
                    return;
                }
                Err(err) => {
                    if self.is_stale(generation) {
                        return;
                    }
                    if attempt < max_attempts {
                        let delay = self.base_delay * 2u32.pow(attempt - 1);
                        debug!(%err, attempt, ?delay, "route fetch failed, retrying");
                        sleep(delay).await;
                        if self.is_stale(generation) {
                            return;
                        }
                    } else {
                        warn!(%err, "route fetch failed after {} attempts", max_attempts);
                        let mut state = self.state.lock().unwrap();
                        if state.generation == generation {
                            state.error = true;
                        }
                    }
                }
            }
        }
    }

    fn is_stale(&self, generation: u64) -> bool {
        self.state.lock().unwrap().generation != generation
    }
}
