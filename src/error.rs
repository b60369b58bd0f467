use reqwest::StatusCode;
use thiserror::Error;

/// Failure of a REST call, normalized so callers never touch `reqwest`
/// errors directly.
#[derive(Debug, Error)]
pub enum HttpError {
    /// The request never produced a response.
    #[error("{method} {path} failed: {source}")]
    Transport {
        method: String,
        path: String,
        #[source]
        source: reqwest::Error,
    },
    /// Non-2xx response, with whatever body the backend sent.
    #[error("{method} {path} returned {status}: {message}")]
    Status {
        status: StatusCode,
        message: String,
        method: String,
        path: String,
    },
    #[error("failed to decode response from {path}: {source}")]
    Decode {
        path: String,
        #[source]
        source: reqwest::Error,
    },
}

impl HttpError {
    /// Status code of the response, when one was received at all.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            HttpError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("channel is not connected")]
    NotConnected,
    #[error("authentication rejected: {message}")]
    AuthRejected { message: String },
    #[error("subscribe to trip {trip_id} rejected by server")]
    SubscribeRejected { trip_id: String },
    #[error("timed out waiting for server acknowledgment")]
    AckTimeout,
    #[error("transport error: {0}")]
    Transport(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage backend: {0}")]
    Backend(String),
    #[error("corrupt stored value: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Umbrella error for composed operations that cross layers.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Http(#[from] HttpError),
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error(transparent)]
    Store(#[from] StoreError),
}
