//! Scripted in-memory transport for exercising the channel client without a
//! server. Tests inject server frames, inspect what the client sent, and
//! force disconnects.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use url::Url;

use super::protocol::{ClientFrame, ServerFrame};
use super::transport::{ChannelTransport, Connection};
use crate::error::ChannelError;

pub struct MockTransport {
    inner: Arc<MockInner>,
}

struct MockInner {
    sent: Mutex<Vec<ClientFrame>>,
    server_tx: Mutex<Option<mpsc::UnboundedSender<ServerFrame>>>,
    attempts: AtomicUsize,
    failures_left: AtomicUsize,
    auto_ack: bool,
}

impl MockTransport {
    /// Transport that acknowledges every handshake, subscribe and
    /// unsubscribe on its own.
    pub fn new() -> Arc<Self> {
        Self::build(true)
    }

    /// Transport that never replies by itself; the test scripts every
    /// server frame through `push`.
    pub fn silent() -> Arc<Self> {
        Self::build(false)
    }

    fn build(auto_ack: bool) -> Arc<Self> {
        Arc::new(Self {
            inner: Arc::new(MockInner {
                sent: Mutex::new(Vec::new()),
                server_tx: Mutex::new(None),
                attempts: AtomicUsize::new(0),
                failures_left: AtomicUsize::new(0),
                auto_ack,
            }),
        })
    }

    /// Make the next `count` connect calls fail.
    pub fn fail_next_connects(&self, count: usize) {
        self.inner.failures_left.store(count, Ordering::SeqCst);
    }

    /// Total connect calls, failed ones included.
    pub fn connect_attempts(&self) -> usize {
        self.inner.attempts.load(Ordering::SeqCst)
    }

    /// Everything the client has written, across all connections.
    pub fn sent_frames(&self) -> Vec<ClientFrame> {
        self.inner.sent.lock().unwrap().clone()
    }

    /// Deliver a frame to the client, as if the server pushed it.
    pub fn push(&self, frame: ServerFrame) {
        if let Some(tx) = self.inner.server_tx.lock().unwrap().as_ref() {
            let _ = tx.send(frame);
        }
    }

    /// Simulate a transport-level disconnect.
    pub fn drop_connection(&self) {
        self.inner.server_tx.lock().unwrap().take();
    }
}

#[async_trait]
impl ChannelTransport for MockTransport {
    async fn connect(&self, _url: &Url) -> Result<Connection, ChannelError> {
        self.inner.attempts.fetch_add(1, Ordering::SeqCst);
        let failures = self.inner.failures_left.load(Ordering::SeqCst);
        if failures > 0 {
            self.inner.failures_left.store(failures - 1, Ordering::SeqCst);
            return Err(ChannelError::Transport("scripted connect failure".into()));
        }

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ClientFrame>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<ServerFrame>();
        *self.inner.server_tx.lock().unwrap() = Some(in_tx);

        let inner = self.inner.clone();
        tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                inner.sent.lock().unwrap().push(frame.clone());
                if !inner.auto_ack {
                    continue;
                }
                let reply = match &frame {
                    ClientFrame::Authenticate { .. } => ServerFrame::AuthOk,
                    ClientFrame::Subscribe { trip_id, .. } => ServerFrame::SubscribeAck {
                        trip_id: trip_id.clone(),
                        ok: true,
                    },
                    ClientFrame::Unsubscribe { trip_id } => ServerFrame::UnsubscribeAck {
                        trip_id: trip_id.clone(),
                    },
                };
                // replies only flow while this connection is still current
                if let Some(tx) = inner.server_tx.lock().unwrap().as_ref() {
                    let _ = tx.send(reply);
                }
            }
        });

        Ok(Connection {
            outgoing: out_tx,
            incoming: in_rx,
        })
    }
}
