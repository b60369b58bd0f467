use serde::{Deserialize, Serialize};

/// Structured address as returned by the geocoding backend. Every part is
/// optional; usable display strings are derived in `crate::location`.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Address {
    #[serde(default)]
    pub street: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
}

/// A point on the map, optionally with an identity and naming. Coordinates
/// are always present; everything else depends on where the value came from
/// (geocoder result, saved place, raw map tap).
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<Address>,
}

impl Location {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            ..Default::default()
        }
    }

    /// Same physical place: matching ids when both carry one, exact
    /// coordinate equality otherwise.
    pub fn same_place(&self, other: &Location) -> bool {
        match (&self.id, &other.id) {
            (Some(a), Some(b)) => a == b,
            _ => self.latitude == other.latitude && self.longitude == other.longitude,
        }
    }
}
