//! Geometry of delivery: coordinates, the service point directory and
//! distance tiers.

use super::catalog::Entry;
use super::session::ChatId;
use crate::error::{BotError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::Display;

/// Mean Earth radius in kilometres.
const EARTH_RADIUS_KM: f64 = 6371.0088;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Great-circle distance in kilometres (haversine).
    pub fn distance_km(&self, other: &GeoPoint) -> f64 {
        let (lat1, lat2) = (self.lat.to_radians(), other.lat.to_radians());
        let d_lat = lat2 - lat1;
        let d_lon = (other.lon - self.lon).to_radians();

        let a = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_KM * a.sqrt().min(1.0).asin()
    }
}

/// A physical branch orders can be picked up from or delivered out of.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServicePoint {
    pub id: String,
    #[serde(default)]
    pub alias: String,
    pub address: String,
    pub location: GeoPoint,
    /// Chat that receives courier notifications for this branch.
    #[serde(default)]
    pub staff_contact: Option<ChatId>,
}

impl TryFrom<&Entry> for ServicePoint {
    type Error = BotError;

    fn try_from(entry: &Entry) -> Result<Self> {
        let lat = number_field(entry, "latitude")?;
        let lon = number_field(entry, "longitude")?;
        let address = entry
            .field_str("address")
            .ok_or_else(|| BotError::Validation(format!("entry {} has no address", entry.id)))?;

        let staff_contact = match entry.fields.get("delivery_man") {
            Some(Value::Number(n)) => n.as_i64().map(ChatId),
            Some(Value::String(s)) => s.trim().parse::<i64>().ok().map(ChatId),
            _ => None,
        };

        Ok(Self {
            id: entry.id.clone(),
            alias: entry.field_str("alias").unwrap_or_default().to_string(),
            address: address.to_string(),
            location: GeoPoint::new(lat, lon),
            staff_contact,
        })
    }
}

/// Backends store coordinates either as JSON numbers or as strings.
fn number_field(entry: &Entry, name: &str) -> Result<f64> {
    let value = match entry.fields.get(name) {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };

    value.filter(|v| v.is_finite()).ok_or_else(|| {
        BotError::Validation(format!("entry {} has no valid {}", entry.id, name))
    })
}

/// Finds the service point closest to `location`.
///
/// Ties resolve to the first minimal point in slice order, so the result is
/// only as deterministic as the order the directory was read in.
pub fn nearest_service_point<'a>(
    location: &GeoPoint,
    points: &'a [ServicePoint],
) -> Result<(&'a ServicePoint, f64)> {
    let mut nearest: Option<(&ServicePoint, f64)> = None;

    for point in points {
        let distance = location.distance_km(&point.location);
        match nearest {
            Some((_, best)) if distance >= best => {}
            _ => nearest = Some((point, distance)),
        }
    }

    nearest.ok_or(BotError::NoServicePoints)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryTier {
    Near,
    Mid,
    Far,
    OutOfRange,
}

/// Upper bounds (exclusive, in km) of the `Near`, `Mid` and `Far` tiers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TierThresholds {
    near: f64,
    mid: f64,
    far: f64,
}

impl TierThresholds {
    pub fn new(near: f64, mid: f64, far: f64) -> Result<Self> {
        let all_finite = [near, mid, far].iter().all(|v| v.is_finite());
        if !all_finite || near <= 0.0 || near >= mid || mid >= far {
            return Err(BotError::Config(format!(
                "tier thresholds must be positive and strictly ascending, got {near}/{mid}/{far}"
            )));
        }
        Ok(Self { near, mid, far })
    }

    pub fn near(&self) -> f64 {
        self.near
    }

    pub fn mid(&self) -> f64 {
        self.mid
    }

    pub fn far(&self) -> f64 {
        self.far
    }

    /// Maps a distance onto its tier using half-open `[low, high)` intervals.
    ///
    /// A distance equal to a threshold belongs to the next tier up; anything
    /// at or beyond `far` (or not a number) is out of range.
    pub fn classify(&self, distance_km: f64) -> DeliveryTier {
        if distance_km < self.near {
            DeliveryTier::Near
        } else if distance_km < self.mid {
            DeliveryTier::Mid
        } else if distance_km < self.far {
            DeliveryTier::Far
        } else {
            DeliveryTier::OutOfRange
        }
    }
}

impl Default for TierThresholds {
    fn default() -> Self {
        Self {
            near: 0.5,
            mid: 5.0,
            far: 20.0,
        }
    }
}
