use serde::{Deserialize, Serialize};

use crate::types::trip::TripDelta;

/// Frames the client writes to the trip channel.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Authenticate { token: String },
    Subscribe { trip_id: String, token: String },
    Unsubscribe { trip_id: String },
}

/// Frames the server pushes. The last four are the event kinds fanned out
/// to listeners.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    AuthOk,
    AuthError {
        message: String,
    },
    SubscribeAck {
        trip_id: String,
        ok: bool,
    },
    UnsubscribeAck {
        trip_id: String,
    },
    TripUpdate {
        trip_id: String,
        delta: TripDelta,
    },
    DriverLocation {
        trip_id: String,
        latitude: f64,
        longitude: f64,
        #[serde(default)]
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
        #[serde(default)]
        comment: Option<String>,
    },
}
