//! Geographic eligibility filter.
//!
//! Decides whether a state vector lies inside the monitored circle and
//! belongs to an allowed aircraft category.

use std::collections::BTreeSet;

use crate::aircraft::StateVector;

/// Mean Earth radius in kilometers.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Great-circle distance between two points in kilometers (haversine).
#[must_use]
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();
    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_KM * c
}

/// Center of the monitored area.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Center {
    /// Latitude in decimal degrees.
    pub lat: f64,
    /// Longitude in decimal degrees.
    pub lon: f64,
}

/// Radius and category filter around a fixed center.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoFilter {
    center: Center,
    radius_km: f64,
    categories: BTreeSet<u8>,
}

impl GeoFilter {
    /// Create a filter. An empty allowlist admits every category.
    #[must_use]
    pub fn new(center: Center, radius_km: f64, categories: impl IntoIterator<Item = u8>) -> Self {
        Self {
            center,
            radius_km,
            categories: categories.into_iter().collect(),
        }
    }

    /// The monitored center.
    #[must_use]
    pub fn center(&self) -> Center {
        self.center
    }

    /// The monitored radius in kilometers.
    #[must_use]
    pub fn radius_km(&self) -> f64 {
        self.radius_km
    }

    /// Distance from the center, or `None` if the state has no position.
    #[must_use]
    pub fn distance_km(&self, state: &StateVector) -> Option<f64> {
        let (lat, lon) = state.position()?;
        if !lat.is_finite() || !lon.is_finite() {
            return None;
        }
        Some(haversine_km(self.center.lat, self.center.lon, lat, lon))
    }

    /// Whether the state is positioned inside the radius.
    #[must_use]
    pub fn in_radius(&self, state: &StateVector) -> bool {
        self.distance_km(state)
            .is_some_and(|distance| distance <= self.radius_km)
    }

    /// Whether the state's category passes the allowlist.
    ///
    /// States without a category, and any state when the allowlist is
    /// empty, pass.
    #[must_use]
    pub fn category_allowed(&self, state: &StateVector) -> bool {
        match state.category {
            Some(category) if !self.categories.is_empty() => self.categories.contains(&category),
            _ => true,
        }
    }

    /// Whether the state is inside the radius and passes the category test.
    #[must_use]
    pub fn is_eligible(&self, state: &StateVector) -> bool {
        self.in_radius(state) && self.category_allowed(state)
    }
}
