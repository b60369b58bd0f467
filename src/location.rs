//! Deterministic filling of `name`/`display_name` for raw locations, so the
//! UI always has something to print for a map tap or a bare geocoder hit.

use crate::types::location::{Address, Location};

/// Shown when nothing better than the raw coordinates is known.
pub const PLACEHOLDER_NAME: &str = "Ubicación";

/// Fill in a usable `name` and `display_name`. Both derivations read the
/// *original* input only, never each other's freshly derived value, and
/// fields that are already present are never overwritten, so enhancing twice
/// is the same as enhancing once.
pub fn enhance(location: &Location) -> Location {
    let mut enhanced = location.clone();
    if enhanced.name.is_none() {
        enhanced.name = Some(derive_name(location));
    }
    if enhanced.display_name.is_none() {
        enhanced.display_name = Some(derive_display_name(location));
    }
    enhanced
}

// street → text before the first comma of display_name → placeholder
fn derive_name(location: &Location) -> String {
    if let Some(street) = location.address.as_ref().and_then(|a| a.street.as_deref()) {
        return street.to_string();
    }
    if let Some(display_name) = location.display_name.as_deref() {
        return display_name
            .split(',')
            .next()
            .unwrap_or(display_name)
            .to_string();
    }
    PLACEHOLDER_NAME.to_string()
}

// street/city/state joined, else the raw coordinates
fn derive_display_name(location: &Location) -> String {
    let empty = Address::default();
    let address = location.address.as_ref().unwrap_or(&empty);
    let parts: Vec<&str> = [&address.street, &address.city, &address.state]
        .into_iter()
        .filter_map(|part| part.as_deref())
        .collect();
    if parts.is_empty() {
        format!("{:.6}, {:.6}", location.latitude, location.longitude)
    } else {
        parts.join(", ")
    }
}
