use std::time::Duration;

/// Runtime knobs for the client core, fixed at construction. Defaults match
/// production behavior; `from_env` lets a host shell point at other
/// backends and retune the retry behavior without a rebuild.
#[derive(Debug, Clone)]
pub struct Config {
    pub rest_base_url: String,
    pub channel_url: String,
    /// First reconnect delay; doubles on every further scheduled attempt.
    pub reconnect_base_interval: Duration,
    pub max_reconnect_attempts: u32,
    /// Delay between a terminal trip event and dropping its subscription,
    /// so late events for the finished trip still get through.
    pub unsubscribe_grace: Duration,
    /// Retries after the initial route fetch attempt.
    pub route_max_retries: u32,
    pub route_retry_base_delay: Duration,
    pub recent_locations_cap: usize,
    /// How long subscribe waits for a server acknowledgment.
    pub ack_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rest_base_url: String::from("https://api.rumbo-movil.app/api"),
            channel_url: String::from("wss://realtime.rumbo-movil.app/trips"),
            reconnect_base_interval: Duration::from_secs(1),
            max_reconnect_attempts: 5,
            unsubscribe_grace: Duration::from_secs(10),
            route_max_retries: 2,
            route_retry_base_delay: Duration::from_secs(1),
            recent_locations_cap: 10,
            ack_timeout: Duration::from_secs(5),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let mut config = Config::default();
        if let Ok(url) = std::env::var("RUMBO_API_URL") {
            config.rest_base_url = url;
        }
        if let Ok(url) = std::env::var("RUMBO_REALTIME_URL") {
            config.channel_url = url;
        }
        if let Some(ms) = env_parsed("RUMBO_RECONNECT_BASE_MS") {
            config.reconnect_base_interval = Duration::from_millis(ms);
        }
        if let Some(attempts) = env_parsed("RUMBO_MAX_RECONNECT_ATTEMPTS") {
            config.max_reconnect_attempts = attempts;
        }
        if let Some(ms) = env_parsed("RUMBO_UNSUBSCRIBE_GRACE_MS") {
            config.unsubscribe_grace = Duration::from_millis(ms);
        }
        if let Some(retries) = env_parsed("RUMBO_ROUTE_MAX_RETRIES") {
            config.route_max_retries = retries;
        }
        if let Some(ms) = env_parsed("RUMBO_ROUTE_RETRY_BASE_MS") {
            config.route_retry_base_delay = Duration::from_millis(ms);
        }
        if let Some(cap) = env_parsed("RUMBO_RECENT_LOCATIONS_CAP") {
            config.recent_locations_cap = cap;
        }
        config
    }
}

/// Unset and unparseable values both fall back to the default.
fn env_parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|value| value.parse().ok())
}
