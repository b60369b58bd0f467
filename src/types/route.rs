use geo_types::Point;
use serde::{Deserialize, Serialize};

/// Routing backend result. Opaque to the client: nothing here is
/// interpreted beyond pulling the coordinate sequence out for display.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Route {
    /// `[longitude, latitude]` pairs, as the backend encodes them.
    coordinates: Vec<[f64; 2]>,
    /// Metres.
    pub distance: f64,
    /// Seconds.
    pub duration: i64,
}

impl Route {
    pub fn new(coordinates: Vec<[f64; 2]>, distance: f64, duration: i64) -> Self {
        Self {
            coordinates,
            distance,
            duration,
        }
    }

    /// The polyline to draw.
    pub fn points(&self) -> impl Iterator<Item = Point<f64>> + '_ {
        self.coordinates.iter().map(|c| Point::new(c[0], c[1]))
    }
}
