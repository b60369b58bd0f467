//! Realtime trip channel: one logical connection to the backend's trip
//! namespace, kept authenticated and re-subscribed across reconnects.

pub mod mock;
pub mod protocol;
pub mod transport;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};
use url::Url;

use self::protocol::{ClientFrame, ServerFrame};
use self::transport::{ChannelTransport, Connection};
use crate::config::Config;
use crate::error::ChannelError;
use crate::types::trip::TripDelta;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    /// Transport up, handshake not yet accepted.
    Connected,
    Authenticated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    TripUpdate,
    DriverLocation,
    TripNotification,
    RatingReceived,
}

/// Server push delivered to listeners, in transport arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    TripUpdate {
        trip_id: String,
        delta: TripDelta,
    },
    DriverLocation {
        trip_id: String,
        latitude: f64,
        longitude: f64,
        heading: Option<f64>,
    },
    TripNotification {
        trip_id: String,
        title: String,
        body: String,
    },
    RatingReceived {
        trip_id: String,
        rating: u8,
        comment: Option<String>,
    },
}

impl ChannelEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            ChannelEvent::TripUpdate { .. } => EventKind::TripUpdate,
            ChannelEvent::DriverLocation { .. } => EventKind::DriverLocation,
            ChannelEvent::TripNotification { .. } => EventKind::TripNotification,
            ChannelEvent::RatingReceived { .. } => EventKind::RatingReceived,
        }
    }

    pub fn trip_id(&self) -> &str {
        match self {
            ChannelEvent::TripUpdate { trip_id, .. }
            | ChannelEvent::DriverLocation { trip_id, .. }
            | ChannelEvent::TripNotification { trip_id, .. }
            | ChannelEvent::RatingReceived { trip_id, .. } => trip_id,
        }
    }

    fn from_frame(frame: ServerFrame) -> Option<ChannelEvent> {
        match frame {
            ServerFrame::TripUpdate { trip_id, delta } => {
                Some(ChannelEvent::TripUpdate { trip_id, delta })
            }
            ServerFrame::DriverLocation {
                trip_id,
                latitude,
                longitude,
                heading,
            } => Some(ChannelEvent::DriverLocation {
                trip_id,
                latitude,
                longitude,
                heading,
            }),
            ServerFrame::TripNotification {
                trip_id,
                title,
                body,
            } => Some(ChannelEvent::TripNotification {
                trip_id,
                title,
                body,
            }),
            ServerFrame::RatingReceived {
                trip_id,
                rating,
                comment,
            } => Some(ChannelEvent::RatingReceived {
                trip_id,
                rating,
                comment,
            }),
            _ => None,
        }
    }
}

pub type ListenerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;
type Listener = Arc<dyn Fn(&ChannelEvent) -> ListenerResult + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerId(u64);

/// Client side of the trip channel. Explicitly constructed and passed by
/// handle; owning exactly one of these preserves "one logical connection"
/// without global state.
pub struct ChannelClient {
    inner: Arc<ChannelInner>,
}

struct ChannelInner {
    transport: Arc<dyn ChannelTransport>,
    url: Url,
    base_interval: Duration,
    max_reconnect_attempts: u32,
    unsubscribe_grace: Duration,
    ack_timeout: Duration,
    state: Mutex<ConnectionState>,
    token: Mutex<Option<String>>,
    outgoing: Mutex<Option<mpsc::UnboundedSender<ClientFrame>>>,
    /// Insertion-ordered; replayed verbatim after every reconnect.
    subscriptions: Mutex<Vec<String>>,
    listeners: Mutex<HashMap<EventKind, Vec<(u64, Listener)>>>,
    /// Ack waiters per trip; concurrent subscribes for one id all resolve
    /// from the same ack.
    pending_subscribes: Mutex<HashMap<String, Vec<oneshot::Sender<bool>>>>,
    /// Callers of initialize waiting for the handshake outcome.
    auth_waiters: Mutex<Vec<oneshot::Sender<Result<(), String>>>>,
    reconnect_attempts: AtomicU32,
    /// Per-trip epoch, renewed on every subscribe and removed on
    /// unsubscribe; a grace timer only fires if its epoch is still current.
    /// Values come from `epoch_counter` so a removed-then-renewed entry can
    /// never collide with one an older timer captured.
    sub_epochs: Mutex<HashMap<String, u64>>,
    epoch_counter: AtomicU64,
    /// Identifies the current connection so a reader task left over from an
    /// older one cannot clobber live state.
    connection_seq: AtomicU64,
    next_listener_id: AtomicU64,
}

impl ChannelClient {
    pub fn new(
        config: &Config,
        transport: Arc<dyn ChannelTransport>,
    ) -> Result<Self, ChannelError> {
        let url = Url::parse(&config.channel_url)
            .map_err(|err| ChannelError::Transport(err.to_string()))?;
        Ok(Self {
            inner: Arc::new(ChannelInner {
                transport,
                url,
                base_interval: config.reconnect_base_interval,
                max_reconnect_attempts: config.max_reconnect_attempts,
                unsubscribe_grace: config.unsubscribe_grace,
                ack_timeout: config.ack_timeout,
                state: Mutex::new(ConnectionState::Disconnected),
                token: Mutex::new(None),
                outgoing: Mutex::new(None),
                subscriptions: Mutex::new(Vec::new()),
                listeners: Mutex::new(HashMap::new()),
                pending_subscribes: Mutex::new(HashMap::new()),
                auth_waiters: Mutex::new(Vec::new()),
                reconnect_attempts: AtomicU32::new(0),
                sub_epochs: Mutex::new(HashMap::new()),
                epoch_counter: AtomicU64::new(0),
                connection_seq: AtomicU64::new(0),
                next_listener_id: AtomicU64::new(0),
            }),
        })
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.lock().unwrap()
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.inner.subscriptions.lock().unwrap().clone()
    }

    /// Open the connection with this token and wait for the handshake
    /// outcome. No-op when a connection is already up or being opened; also
    /// resets the reconnect budget, so a client that gave up earlier starts
    /// trying again. A rejected handshake leaves the transport connected
    /// (no handshake retry) and surfaces as `AuthRejected`.
    pub async fn initialize(&self, token: &str) -> Result<(), ChannelError> {
        *self.inner.token.lock().unwrap() = Some(token.to_string());
        if *self.inner.state.lock().unwrap() != ConnectionState::Disconnected {
            return Ok(());
        }
        self.inner.reconnect_attempts.store(0, Ordering::SeqCst);
        let (ack_tx, ack_rx) = oneshot::channel();
        self.inner.auth_waiters.lock().unwrap().push(ack_tx);
        if let Err(err) = ChannelInner::connect(self.inner.clone()).await {
            self.inner.auth_waiters.lock().unwrap().clear();
            return Err(err);
        }
        match timeout(self.inner.ack_timeout, ack_rx).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(message))) => Err(ChannelError::AuthRejected { message }),
            Ok(Err(_)) => Err(ChannelError::NotConnected),
            Err(_) => {
                // connection is up; authentication may still land later
                warn!("trip channel handshake unresolved");
                Ok(())
            }
        }
    }

    /// Start receiving events for one trip. Resolves once the server
    /// acknowledges; the id joins the subscription set at the back.
    pub async fn subscribe_to_trip(&self, trip_id: &str) -> Result<(), ChannelError> {
        let inner = &self.inner;
        if *inner.state.lock().unwrap() != ConnectionState::Authenticated {
            return Err(ChannelError::NotConnected);
        }
        ChannelInner::bump_epoch(inner, trip_id);
        let token = inner.token.lock().unwrap().clone().unwrap_or_default();
        let (ack_tx, ack_rx) = oneshot::channel();
        {
            let mut pending = inner.pending_subscribes.lock().unwrap();
            let waiters = pending.entry(trip_id.to_string()).or_default();
            waiters.retain(|waiter| !waiter.is_closed());
            waiters.push(ack_tx);
        }
        inner.send(ClientFrame::Subscribe {
            trip_id: trip_id.to_string(),
            token,
        })?;
        let ok = match timeout(inner.ack_timeout, ack_rx).await {
            Ok(Ok(ok)) => ok,
            // pending acks are dropped on disconnect
            Ok(Err(_)) => return Err(ChannelError::NotConnected),
            // the entry stays; a late ack or the next disconnect clears it
            Err(_) => return Err(ChannelError::AckTimeout),
        };
        if !ok {
            return Err(ChannelError::SubscribeRejected {
                trip_id: trip_id.to_string(),
            });
        }
        let mut subscriptions = inner.subscriptions.lock().unwrap();
        if !subscriptions.iter().any(|existing| existing == trip_id) {
            subscriptions.push(trip_id.to_string());
        }
        Ok(())
    }

    /// Stop receiving events for one trip. The id leaves the subscription
    /// set whether or not the server acknowledges; an emptied set tears the
    /// connection down entirely.
    pub fn unsubscribe_from_trip(&self, trip_id: &str) {
        ChannelInner::unsubscribe(&self.inner, trip_id);
    }

    pub fn on(
        &self,
        kind: EventKind,
        listener: impl Fn(&ChannelEvent) -> ListenerResult + Send + Sync + 'static,
    ) -> ListenerId {
        let id = self.inner.next_listener_id.fetch_add(1, Ordering::SeqCst);
        self.inner
            .listeners
            .lock()
            .unwrap()
            .entry(kind)
            .or_default()
            .push((id, Arc::new(listener)));
        ListenerId(id)
    }

    pub fn off(&self, kind: EventKind, id: ListenerId) {
        if let Some(registered) = self.inner.listeners.lock().unwrap().get_mut(&kind) {
            registered.retain(|(existing, _)| *existing != id.0);
        }
    }
}

impl ChannelInner {
    async fn connect(inner: Arc<Self>) -> Result<(), ChannelError> {
        {
            let mut state = inner.state.lock().unwrap();
            if *state != ConnectionState::Disconnected {
                return Ok(());
            }
            *state = ConnectionState::Connecting;
        }
        let mut url = inner.url.clone();
        if let Some(token) = inner.token.lock().unwrap().clone() {
            url.query_pairs_mut().append_pair("token", &token);
        }
        let connection = match inner.transport.connect(&url).await {
            Ok(connection) => connection,
            Err(err) => {
                *inner.state.lock().unwrap() = ConnectionState::Disconnected;
                Self::maybe_schedule_reconnect(&inner);
                return Err(err);
            }
        };
        let Connection { outgoing, incoming } = connection;
        let seq = inner.connection_seq.fetch_add(1, Ordering::SeqCst) + 1;
        *inner.outgoing.lock().unwrap() = Some(outgoing);
        *inner.state.lock().unwrap() = ConnectionState::Connected;
        inner.reconnect_attempts.store(0, Ordering::SeqCst);
        tokio::spawn(Self::run(inner.clone(), incoming, seq));
        if let Some(token) = inner.token.lock().unwrap().clone() {
            inner.send(ClientFrame::Authenticate { token })?;
        }
        Ok(())
    }

    async fn run(inner: Arc<Self>, mut incoming: mpsc::UnboundedReceiver<ServerFrame>, seq: u64) {
        while let Some(frame) = incoming.recv().await {
            Self::handle_frame(&inner, frame);
        }
        if inner.connection_seq.load(Ordering::SeqCst) != seq {
            return; // a newer connection took over
        }
        Self::on_disconnect(&inner);
    }

    fn handle_frame(inner: &Arc<Self>, frame: ServerFrame) {
        match frame {
            ServerFrame::AuthOk => {
                *inner.state.lock().unwrap() = ConnectionState::Authenticated;
                info!("trip channel authenticated");
                for waiter in inner.auth_waiters.lock().unwrap().drain(..) {
                    let _ = waiter.send(Ok(()));
                }
                Self::resubscribe_all(inner);
            }
            ServerFrame::AuthError { message } => {
                // stay connected-unauthenticated; no handshake retry
                warn!(%message, "trip channel authentication rejected");
                for waiter in inner.auth_waiters.lock().unwrap().drain(..) {
                    let _ = waiter.send(Err(message.clone()));
                }
            }
            ServerFrame::SubscribeAck { trip_id, ok } => {
                match inner.pending_subscribes.lock().unwrap().remove(&trip_id) {
                    Some(waiters) => {
                        for waiter in waiters {
                            let _ = waiter.send(ok);
                        }
                    }
                    None => debug!(%trip_id, ok, "subscription restored"),
                }
            }
            ServerFrame::UnsubscribeAck { trip_id } => {
                debug!(%trip_id, "unsubscribe acknowledged");
            }
            other => {
                if let Some(event) = ChannelEvent::from_frame(other) {
                    if let ChannelEvent::TripUpdate { trip_id, delta } = &event {
                        if delta.status.map(|s| s.is_terminal()).unwrap_or(false) {
                            Self::schedule_grace_unsubscribe(inner, trip_id.clone());
                        }
                    }
                    Self::dispatch(inner, &event);
                }
            }
        }
    }

    fn dispatch(inner: &Arc<Self>, event: &ChannelEvent) {
        let listeners: Vec<(u64, Listener)> = inner
            .listeners
            .lock()
            .unwrap()
            .get(&event.kind())
            .cloned()
            .unwrap_or_default();
        for (id, listener) in listeners {
            if let Err(err) = listener(event) {
                // a failing listener must not block the others
                warn!(listener = id, %err, "event listener failed");
            }
        }
    }

    /// Replay the subscription set in insertion order. Acks are not awaited;
    /// the set is already authoritative.
    fn resubscribe_all(inner: &Arc<Self>) {
        let token = inner.token.lock().unwrap().clone().unwrap_or_default();
        let ids = inner.subscriptions.lock().unwrap().clone();
        for trip_id in ids {
            debug!(%trip_id, "re-subscribing after reconnect");
            if let Err(err) = inner.send(ClientFrame::Subscribe {
                trip_id: trip_id.clone(),
                token: token.clone(),
            }) {
                warn!(%trip_id, %err, "failed to re-subscribe");
            }
        }
    }

    fn unsubscribe(inner: &Arc<Self>, trip_id: &str) {
        // invalidates any pending grace timer and prunes the bookkeeping
        inner.sub_epochs.lock().unwrap().remove(trip_id);
        if *inner.state.lock().unwrap() != ConnectionState::Disconnected {
            if let Err(err) = inner.send(ClientFrame::Unsubscribe {
                trip_id: trip_id.to_string(),
            }) {
                debug!(%trip_id, %err, "unsubscribe send failed");
            }
        }
        let now_empty = {
            let mut subscriptions = inner.subscriptions.lock().unwrap();
            subscriptions.retain(|existing| existing != trip_id);
            subscriptions.is_empty()
        };
        if now_empty {
            // nothing left to watch, no point keeping the socket open
            Self::disconnect(inner);
        }
    }

    fn disconnect(inner: &Arc<Self>) {
        inner.outgoing.lock().unwrap().take();
        inner.pending_subscribes.lock().unwrap().clear();
        inner.auth_waiters.lock().unwrap().clear();
        *inner.state.lock().unwrap() = ConnectionState::Disconnected;
        // invalidate the reader so it does not treat this as a lost link
        inner.connection_seq.fetch_add(1, Ordering::SeqCst);
    }

    fn on_disconnect(inner: &Arc<Self>) {
        *inner.state.lock().unwrap() = ConnectionState::Disconnected;
        inner.outgoing.lock().unwrap().take();
        inner.pending_subscribes.lock().unwrap().clear();
        inner.auth_waiters.lock().unwrap().clear();
        info!("trip channel disconnected");
        Self::maybe_schedule_reconnect(inner);
    }

    fn maybe_schedule_reconnect(inner: &Arc<Self>) {
        if inner.subscriptions.lock().unwrap().is_empty() {
            return;
        }
        let attempts = inner.reconnect_attempts.load(Ordering::SeqCst);
        if attempts >= inner.max_reconnect_attempts {
            // give up silently until the next initialize()
            debug!("reconnect attempts exhausted");
            return;
        }
        let delay = inner.base_interval * 2u32.pow(attempts);
        inner.reconnect_attempts.store(attempts + 1, Ordering::SeqCst);
        info!(?delay, attempt = attempts + 1, "scheduling trip channel reconnect");
        let inner = inner.clone();
        tokio::spawn(async move {
            sleep(delay).await;
            if let Err(err) = Self::connect(inner).await {
                debug!(%err, "reconnect attempt failed");
            }
        });
    }

    /// A terminal status arrived for this trip: unsubscribe after the grace
    /// delay so late events still get through, unless a newer subscribe or
    /// unsubscribe for the same trip lands first.
    fn schedule_grace_unsubscribe(inner: &Arc<Self>, trip_id: String) {
        let Some(epoch) = inner.sub_epochs.lock().unwrap().get(&trip_id).copied() else {
            return;
        };
        debug!(%trip_id, "trip finished, scheduling delayed unsubscribe");
        let inner = inner.clone();
        tokio::spawn(async move {
            sleep(inner.unsubscribe_grace).await;
            let current = inner.sub_epochs.lock().unwrap().get(&trip_id).copied();
            if current != Some(epoch) {
                return;
            }
            let still_subscribed = inner
                .subscriptions
                .lock()
                .unwrap()
                .iter()
                .any(|existing| existing == &trip_id);
            if still_subscribed {
                Self::unsubscribe(&inner, &trip_id);
            }
        });
    }

    fn bump_epoch(inner: &Arc<Self>, trip_id: &str) {
        let epoch = inner.epoch_counter.fetch_add(1, Ordering::SeqCst) + 1;
        inner
            .sub_epochs
            .lock()
            .unwrap()
            .insert(trip_id.to_string(), epoch);
    }

    fn send(&self, frame: ClientFrame) -> Result<(), ChannelError> {
        match self.outgoing.lock().unwrap().as_ref() {
            Some(tx) => tx.send(frame).map_err(|_| ChannelError::NotConnected),
            None => Err(ChannelError::NotConnected),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    use super::mock::MockTransport;
    use super::*;
    use crate::types::trip::TripStatus;

    fn test_config() -> Config {
        Config::default()
    }

    fn client(transport: &Arc<MockTransport>) -> ChannelClient {
        ChannelClient::new(&test_config(), transport.clone()).unwrap()
    }

    async fn settle() {
        sleep(Duration::from_millis(10)).await;
    }

    fn subscribes_after_nth_auth(frames: &[ClientFrame], n: usize) -> Vec<String> {
        let auth_index = frames
            .iter()
            .enumerate()
            .filter(|(_, f)| matches!(f, ClientFrame::Authenticate { .. }))
            .map(|(i, _)| i)
            .nth(n - 1)
            .expect("handshake not sent");
        frames[auth_index + 1..]
            .iter()
            .filter_map(|f| match f {
                ClientFrame::Subscribe { trip_id, .. } => Some(trip_id.clone()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn initialize_connects_and_authenticates() {
        let transport = MockTransport::new();
        let channel = client(&transport);
        channel.initialize("token-1").await.unwrap();
        settle().await;
        assert_eq!(channel.state(), ConnectionState::Authenticated);
        assert!(matches!(
            transport.sent_frames().first(),
            Some(ClientFrame::Authenticate { .. })
        ));

        // a second initialize against a live connection is a no-op
        channel.initialize("token-1").await.unwrap();
        assert_eq!(transport.connect_attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn subscribe_requires_authentication() {
        let transport = MockTransport::new();
        let channel = client(&transport);
        let err = channel.subscribe_to_trip("trip-a").await.unwrap_err();
        assert!(matches!(err, ChannelError::NotConnected));
    }

    #[tokio::test(start_paused = true)]
    async fn subscribe_adds_to_set_on_ack() {
        let transport = MockTransport::new();
        let channel = client(&transport);
        channel.initialize("token-1").await.unwrap();
        settle().await;
        channel.subscribe_to_trip("trip-a").await.unwrap();
        assert_eq!(channel.subscriptions(), vec!["trip-a".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_subscribes_to_one_trip_all_resolve() {
        let transport = MockTransport::silent();
        let channel = client(&transport);
        let (outcome, ()) = tokio::join!(channel.initialize("token-1"), async {
            settle().await;
            transport.push(ServerFrame::AuthOk);
        });
        outcome.unwrap();
        settle().await;

        let (first, second, ()) = tokio::join!(
            channel.subscribe_to_trip("trip-a"),
            channel.subscribe_to_trip("trip-a"),
            async {
                settle().await;
                transport.push(ServerFrame::SubscribeAck {
                    trip_id: "trip-a".into(),
                    ok: true,
                });
            }
        );
        first.unwrap();
        second.unwrap();
        assert_eq!(channel.subscriptions(), vec!["trip-a".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn lost_ack_times_out() {
        let transport = MockTransport::silent();
        let channel = client(&transport);
        channel.initialize("token-1").await.unwrap();
        settle().await;
        transport.push(ServerFrame::AuthOk);
        settle().await;
        let err = channel.subscribe_to_trip("trip-a").await.unwrap_err();
        assert!(matches!(err, ChannelError::AckTimeout));
        assert!(channel.subscriptions().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn auth_rejection_leaves_client_connected_unauthenticated() {
        let transport = MockTransport::silent();
        let channel = client(&transport);
        let (outcome, ()) = tokio::join!(channel.initialize("bad-token"), async {
            settle().await;
            transport.push(ServerFrame::AuthError {
                message: "expired".into(),
            });
        });
        let err = outcome.unwrap_err();
        assert!(matches!(err, ChannelError::AuthRejected { ref message } if message == "expired"));
        settle().await;
        assert_eq!(channel.state(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_replays_subscriptions_in_order() {
        let transport = MockTransport::new();
        let channel = client(&transport);
        channel.initialize("token-1").await.unwrap();
        settle().await;
        channel.subscribe_to_trip("trip-a").await.unwrap();
        channel.subscribe_to_trip("trip-b").await.unwrap();

        transport.drop_connection();
        // first reconnect is scheduled one base interval out
        sleep(Duration::from_secs(2)).await;
        settle().await;

        assert_eq!(channel.state(), ConnectionState::Authenticated);
        assert_eq!(transport.connect_attempts(), 2);
        let replayed = subscribes_after_nth_auth(&transport.sent_frames(), 2);
        assert_eq!(replayed, vec!["trip-a".to_string(), "trip-b".to_string()]);
        assert_eq!(
            channel.subscriptions(),
            vec!["trip-a".to_string(), "trip-b".to_string()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_gives_up_after_the_attempt_ceiling() {
        let transport = MockTransport::new();
        let channel = client(&transport);
        channel.initialize("token-1").await.unwrap();
        settle().await;
        channel.subscribe_to_trip("trip-a").await.unwrap();

        transport.fail_next_connects(1000);
        transport.drop_connection();
        // backoff doubles every attempt: 1+2+4+8+16 = 31s covers all five
        sleep(Duration::from_secs(60)).await;

        // 1 initial success + 5 failed reconnects, then silence
        assert_eq!(transport.connect_attempts(), 6);
        assert_eq!(channel.state(), ConnectionState::Disconnected);

        // an explicit initialize starts over
        transport.fail_next_connects(0);
        channel.initialize("token-1").await.unwrap();
        settle().await;
        assert_eq!(channel.state(), ConnectionState::Authenticated);
    }

    #[tokio::test(start_paused = true)]
    async fn no_reconnect_without_subscriptions() {
        let transport = MockTransport::new();
        let channel = client(&transport);
        channel.initialize("token-1").await.unwrap();
        settle().await;
        transport.drop_connection();
        sleep(Duration::from_secs(60)).await;
        assert_eq!(transport.connect_attempts(), 1);
        assert_eq!(channel.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_event_unsubscribes_after_grace_period() {
        let transport = MockTransport::new();
        let channel = client(&transport);
        channel.initialize("token-1").await.unwrap();
        settle().await;
        channel.subscribe_to_trip("trip-a").await.unwrap();

        transport.push(ServerFrame::TripUpdate {
            trip_id: "trip-a".into(),
            delta: TripDelta {
                status: Some(TripStatus::Completed),
                ..Default::default()
            },
        });
        sleep(Duration::from_secs(9)).await;
        assert!(
            !transport
                .sent_frames()
                .iter()
                .any(|f| matches!(f, ClientFrame::Unsubscribe { .. })),
            "unsubscribed before the grace period elapsed"
        );

        sleep(Duration::from_secs(2)).await;
        assert!(transport
            .sent_frames()
            .iter()
            .any(|f| matches!(f, ClientFrame::Unsubscribe { trip_id } if trip_id == "trip-a")));
        assert!(channel.subscriptions().is_empty());
        // last subscription gone, connection torn down
        assert_eq!(channel.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn fresh_subscribe_cancels_pending_grace_unsubscribe() {
        let transport = MockTransport::new();
        let channel = client(&transport);
        channel.initialize("token-1").await.unwrap();
        settle().await;
        channel.subscribe_to_trip("trip-a").await.unwrap();

        transport.push(ServerFrame::TripUpdate {
            trip_id: "trip-a".into(),
            delta: TripDelta {
                status: Some(TripStatus::Completed),
                ..Default::default()
            },
        });
        sleep(Duration::from_secs(5)).await;
        channel.subscribe_to_trip("trip-a").await.unwrap();

        sleep(Duration::from_secs(30)).await;
        assert!(!transport
            .sent_frames()
            .iter()
            .any(|f| matches!(f, ClientFrame::Unsubscribe { .. })));
        assert_eq!(channel.subscriptions(), vec!["trip-a".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn unsubscribe_prunes_the_trip_bookkeeping() {
        let transport = MockTransport::new();
        let channel = client(&transport);
        channel.initialize("token-1").await.unwrap();
        settle().await;
        channel.subscribe_to_trip("trip-a").await.unwrap();
        channel.subscribe_to_trip("trip-b").await.unwrap();
        channel.unsubscribe_from_trip("trip-a");
        channel.unsubscribe_from_trip("trip-b");
        assert!(channel.inner.sub_epochs.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn stale_grace_timer_cannot_touch_a_renewed_subscription() {
        let transport = MockTransport::new();
        let channel = client(&transport);
        channel.initialize("token-1").await.unwrap();
        settle().await;
        channel.subscribe_to_trip("trip-a").await.unwrap();

        transport.push(ServerFrame::TripUpdate {
            trip_id: "trip-a".into(),
            delta: TripDelta {
                status: Some(TripStatus::Completed),
                ..Default::default()
            },
        });
        sleep(Duration::from_secs(5)).await;

        // rider leaves the trip view and comes straight back
        channel.unsubscribe_from_trip("trip-a");
        channel.initialize("token-1").await.unwrap();
        settle().await;
        channel.subscribe_to_trip("trip-a").await.unwrap();

        // the timer scheduled before the unsubscribe must not fire
        sleep(Duration::from_secs(30)).await;
        assert_eq!(channel.subscriptions(), vec!["trip-a".to_string()]);
        assert_eq!(channel.state(), ConnectionState::Authenticated);
    }

    #[tokio::test(start_paused = true)]
    async fn one_failing_listener_does_not_block_the_rest() {
        let transport = MockTransport::new();
        let channel = client(&transport);
        channel.initialize("token-1").await.unwrap();
        settle().await;

        channel.on(EventKind::TripNotification, |_| Err("boom".into()));
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_by_listener = seen.clone();
        channel.on(EventKind::TripNotification, move |_| {
            seen_by_listener.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        transport.push(ServerFrame::TripNotification {
            trip_id: "trip-a".into(),
            title: "Conductor asignado".into(),
            body: "Tu conductor está en camino".into(),
        });
        settle().await;
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn events_arrive_in_transport_order() {
        let transport = MockTransport::new();
        let channel = client(&transport);
        channel.initialize("token-1").await.unwrap();
        settle().await;

        let order = Arc::new(Mutex::new(Vec::new()));
        let sink = order.clone();
        channel.on(EventKind::DriverLocation, move |event| {
            if let ChannelEvent::DriverLocation { latitude, .. } = event {
                sink.lock().unwrap().push(*latitude);
            }
            Ok(())
        });

        for i in 0..3 {
            transport.push(ServerFrame::DriverLocation {
                trip_id: "trip-a".into(),
                latitude: i as f64,
                longitude: -78.46,
                heading: None,
            });
        }
        settle().await;
        assert_eq!(*order.lock().unwrap(), vec![0.0, 1.0, 2.0]);
    }

    #[tokio::test(start_paused = true)]
    async fn removed_listener_stops_receiving() {
        let transport = MockTransport::new();
        let channel = client(&transport);
        channel.initialize("token-1").await.unwrap();
        settle().await;

        let seen = Arc::new(AtomicUsize::new(0));
        let seen_by_listener = seen.clone();
        let id = channel.on(EventKind::RatingReceived, move |_| {
            seen_by_listener.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        channel.off(EventKind::RatingReceived, id);

        transport.push(ServerFrame::RatingReceived {
            trip_id: "trip-a".into(),
            rating: 5,
            comment: None,
        });
        settle().await;
        assert_eq!(seen.load(Ordering::SeqCst), 0);
    }
}
