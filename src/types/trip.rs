use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::location::Location;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TripStatus {
    Searching,
    Confirmed,
    InProgress,
    Completed,
    Cancelled,
    Scheduled,
}

impl TripStatus {
    /// Completed and cancelled trips accept no further mutation through the
    /// synchronization path.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TripStatus::Completed | TripStatus::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TripStatus::Searching => "SEARCHING",
            TripStatus::Confirmed => "CONFIRMED",
            TripStatus::InProgress => "IN_PROGRESS",
            TripStatus::Completed => "COMPLETED",
            TripStatus::Cancelled => "CANCELLED",
            TripStatus::Scheduled => "SCHEDULED",
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DriverSnapshot {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub rating: Option<f64>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VehicleSnapshot {
    pub plate: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PaymentSnapshot {
    pub method: String,
    #[serde(default)]
    pub amount: Option<f64>,
    #[serde(default)]
    pub currency: Option<String>,
}

/// One ride as the backend reports it. The backend owns the state machine;
/// at most one of `completed_at`/`cancelled_at` is ever set.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Trip {
    pub id: String,
    pub status: TripStatus,
    pub origin: Location,
    pub destination: Location,
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub cancelled_at: Option<DateTime<Utc>>,
    /// Metres, as reported by the backend.
    #[serde(default)]
    pub distance: Option<f64>,
    /// Seconds.
    #[serde(default)]
    pub duration: Option<i64>,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub driver: Option<DriverSnapshot>,
    #[serde(default)]
    pub vehicle: Option<VehicleSnapshot>,
    #[serde(default)]
    pub payment: Option<PaymentSnapshot>,
}

/// Partial trip fields pushed over the realtime channel. Absent fields leave
/// the snapshot untouched (shallow merge).
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TripDelta {
    #[serde(default)]
    pub status: Option<TripStatus>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub cancelled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub distance: Option<f64>,
    #[serde(default)]
    pub duration: Option<i64>,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub driver: Option<DriverSnapshot>,
    #[serde(default)]
    pub vehicle: Option<VehicleSnapshot>,
    #[serde(default)]
    pub payment: Option<PaymentSnapshot>,
}

impl Trip {
    /// Shallow merge: fields present in the delta overwrite, the rest stay.
    pub fn apply(&mut self, delta: &TripDelta) {
        if let Some(status) = delta.status {
            self.status = status;
        }
        if let Some(started_at) = delta.started_at {
            self.started_at = Some(started_at);
        }
        if let Some(completed_at) = delta.completed_at {
            self.completed_at = Some(completed_at);
        }
        if let Some(cancelled_at) = delta.cancelled_at {
            self.cancelled_at = Some(cancelled_at);
        }
        if let Some(distance) = delta.distance {
            self.distance = Some(distance);
        }
        if let Some(duration) = delta.duration {
            self.duration = Some(duration);
        }
        if let Some(price) = delta.price {
            self.price = Some(price);
        }
        if let Some(driver) = &delta.driver {
            self.driver = Some(driver.clone());
        }
        if let Some(vehicle) = &delta.vehicle {
            self.vehicle = Some(vehicle.clone());
        }
        if let Some(payment) = &delta.payment {
            self.payment = Some(payment.clone());
        }
    }
}

/// Payload for trip creation.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CreateTripRequest {
    pub origin: Location,
    pub destination: Location,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_method: Option<String>,
}
