use crate::config::SERVICE_POINT_COLLECTION;
use crate::domain::event::{Event, EventPayload};
use crate::domain::geo::{GeoPoint, ServicePoint, nearest_service_point};
use crate::domain::ports::{CommerceGatewayRef, GeocoderRef};
use crate::error::Result;
use tracing::debug;

/// Turns user input into coordinates and matches them against the service
/// point directory kept on the commerce backend.
#[derive(Clone)]
pub struct GeoResolver {
    geocoder: GeocoderRef,
    commerce: CommerceGatewayRef,
}

impl GeoResolver {
    pub fn new(geocoder: GeocoderRef, commerce: CommerceGatewayRef) -> Self {
        Self { geocoder, commerce }
    }

    /// A shared geolocation is returned verbatim; free text is geocoded and
    /// the first (most relevant) candidate taken.
    pub async fn resolve_location(&self, event: &Event) -> Result<Option<GeoPoint>> {
        match &event.payload {
            EventPayload::Location { location } => Ok(Some(*location)),
            EventPayload::Text { text } if !text.trim().is_empty() => {
                let candidates = self.geocoder.lookup(text.trim()).await?;
                debug!(chat_id = %event.chat_id, found = candidates.len(), "geocoded address");
                Ok(candidates.into_iter().next())
            }
            _ => Ok(None),
        }
    }

    pub async fn service_points(&self) -> Result<Vec<ServicePoint>> {
        self.commerce
            .get_all_entries(SERVICE_POINT_COLLECTION)
            .await?
            .iter()
            .map(ServicePoint::try_from)
            .collect()
    }

    pub async fn service_point(&self, id: &str) -> Result<ServicePoint> {
        let entry = self
            .commerce
            .get_an_entry(SERVICE_POINT_COLLECTION, id)
            .await?;
        ServicePoint::try_from(&entry)
    }

    /// Nearest service point and its distance in km; fails with
    /// `NoServicePoints` when the directory is empty.
    pub async fn nearest(&self, location: &GeoPoint) -> Result<(ServicePoint, f64)> {
        let points = self.service_points().await?;
        let (point, distance) = nearest_service_point(location, &points)?;
        Ok((point.clone(), distance))
    }
}
